use crate::error::Error;

/// The 4-bit opcode tag carried by every frame (RFC 6455 §5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        match byte & 0x0F {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(Error::InvalidOpcode(other)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    pub fn is_data(&self) -> bool {
        !self.is_control()
    }
}

/// Named close codes (RFC 6455 §7.4.1). Values outside this list (e.g.
/// codes reserved by the RFC, or ones an application wants to invent) are
/// still representable as a plain `u16` wherever this type isn't used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    NormalClose,
    ShuttingDown,
    ProtocolError,
    UnsupportedData,
    InconsistentData,
    PolicyViolation,
    MessageTooBig,
    UnexpectedError,
}

impl CloseCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            CloseCode::NormalClose => 1000,
            CloseCode::ShuttingDown => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::InconsistentData => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::UnexpectedError => 1011,
        }
    }
}

/// Maximum control-frame payload allowed by the RFC.
pub const CONTROL_PAYLOAD_CAP: usize = 125;

/// Encode a single frame header + optional mask + payload.
///
/// The server role never supplies a mask (server -> client frames are
/// unmasked), but the function accepts one so the same routine can frame a
/// masked test fixture representing a client frame.
pub fn encode_frame(fin: bool, opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let len = payload.len();
    let b0 = (if fin { 0x80 } else { 0x00 }) | opcode.as_u8();
    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };

    let mut out = Vec::with_capacity(len + 14);
    out.push(b0);

    if len < 126 {
        out.push(mask_bit | len as u8);
    } else if len <= 0xFFFF {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    if let Some(key) = mask {
        out.extend_from_slice(&key);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i & 3]));
    } else {
        out.extend_from_slice(payload);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trip() {
        for b in [0x0u8, 0x1, 0x2, 0x8, 0x9, 0xA] {
            let op = OpCode::from_byte(b).unwrap();
            assert_eq!(op.as_u8(), b);
        }
        assert!(OpCode::from_byte(0x3).is_err());
    }

    #[test]
    fn control_vs_data() {
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Close.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(OpCode::Binary.is_data());
    }

    #[test]
    fn encode_short_unmasked_text_frame() {
        // RFC 6455 §1.3 worked example, server reply "Hello"
        let bytes = encode_frame(true, OpCode::Text, b"Hello", None);
        assert_eq!(bytes, vec![0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[test]
    fn encode_masked_client_frame_matches_rfc_example() {
        // RFC 6455 §1.3 worked example, client "Hello" masked with 37 fa 21 3d
        let bytes = encode_frame(true, OpCode::Text, b"Hello", Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(
            bytes,
            vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn encode_medium_payload_uses_16_bit_length() {
        let payload = vec![0u8; 200];
        let bytes = encode_frame(true, OpCode::Binary, &payload, None);
        assert_eq!(bytes[1], 126);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 200);
    }

    #[test]
    fn encode_large_payload_uses_64_bit_length() {
        let payload = vec![0u8; 70_000];
        let bytes = encode_frame(true, OpCode::Binary, &payload, None);
        assert_eq!(bytes[1], 127);
        let len_bytes: [u8; 8] = bytes[2..10].try_into().unwrap();
        assert_eq!(u64::from_be_bytes(len_bytes), 70_000);
    }
}

//! Incremental UTF-8 validation for TEXT messages.
//!
//! A small byte-range state machine that validates a TEXT message's bytes
//! as they arrive across frame boundaries, without needing the whole
//! message buffered first. See RFC 3629 §3 for the continuation-byte range
//! table this follows.

use crate::error::Error;

/// Tracks at most one partially-seen multi-byte sequence across calls.
#[derive(Default)]
pub struct Utf8Incremental {
    pending: Vec<u8>,
}

/// A lead byte's total sequence length and the valid range for its first
/// continuation byte (narrower than 0x80..=0xBF for a few lead bytes, to
/// rule out overlong encodings, surrogates, and codepoints past U+10FFFF).
fn lead_byte_info(b: u8) -> Option<(usize, u8, u8)> {
    match b {
        0x00..=0x7F => Some((1, 0, 0)),
        0xC2..=0xDF => Some((2, 0x80, 0xBF)),
        0xE0 => Some((3, 0xA0, 0xBF)),
        0xE1..=0xEC => Some((3, 0x80, 0xBF)),
        0xED => Some((3, 0x80, 0x9F)),
        0xEE..=0xEF => Some((3, 0x80, 0xBF)),
        0xF0 => Some((4, 0x90, 0xBF)),
        0xF1..=0xF3 => Some((4, 0x80, 0xBF)),
        0xF4 => Some((4, 0x80, 0x8F)),
        _ => None, // 0xC0, 0xC1, 0xF5..=0xFF and bare continuation bytes
    }
}

/// Scan `buf` from the start. Returns the length of the longest prefix that
/// is both valid and made of complete sequences; anything after that is
/// either empty or a sequence still waiting on more bytes.
fn longest_complete_prefix(buf: &[u8]) -> Result<usize, Error> {
    let mut i = 0;
    while i < buf.len() {
        let lead = buf[i];
        let (seq_len, lo, hi) = lead_byte_info(lead).ok_or(Error::InvalidUtf8)?;
        if seq_len == 1 {
            i += 1;
            continue;
        }
        if i + 1 >= buf.len() {
            return Ok(i); // sequence started but no continuation bytes yet
        }
        let c1 = buf[i + 1];
        if c1 < lo || c1 > hi {
            return Err(Error::InvalidUtf8);
        }
        for k in 2..seq_len {
            if i + k >= buf.len() {
                return Ok(i); // incomplete, wait for more bytes
            }
            let ck = buf[i + k];
            if !(0x80..=0xBF).contains(&ck) {
                return Err(Error::InvalidUtf8);
            }
        }
        i += seq_len;
    }
    Ok(i)
}

impl Utf8Incremental {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Validate `data` as a continuation of previously buffered bytes,
    /// returning the decoded text for every complete codepoint seen so far
    /// (across this and prior calls since the last `reset`). When
    /// `final_chunk` is true, any bytes still pending at the end is a
    /// truncated codepoint and is reported as `Error::InvalidUtf8`, even if
    /// the truncation happened at a frame boundary.
    pub fn decode(&mut self, data: &[u8], final_chunk: bool) -> Result<String, Error> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(data);

        let complete_len = longest_complete_prefix(&buf)?;
        if final_chunk && complete_len != buf.len() {
            return Err(Error::InvalidUtf8);
        }

        self.pending = buf.split_off(complete_len);
        // buf[..complete_len] is, by construction, a sequence of whole,
        // range-valid UTF-8 codepoints, so this can't fail.
        String::from_utf8(buf).map_err(|_| Error::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_whole_valid_text_in_one_call() {
        let mut d = Utf8Incremental::new();
        let text = "héllo wörld 🎉";
        let out = d.decode(text.as_bytes(), true).unwrap();
        assert_eq!(out, text);
    }

    #[test]
    fn accepts_multibyte_sequence_split_across_calls() {
        let text = "🎉"; // 4-byte sequence: F0 9F 8E 89
        let bytes = text.as_bytes();
        let mut d = Utf8Incremental::new();
        let first = d.decode(&bytes[..2], false).unwrap();
        assert_eq!(first, "");
        let second = d.decode(&bytes[2..], true).unwrap();
        assert_eq!(second, text);
    }

    #[test]
    fn rejects_invalid_continuation_byte() {
        let mut d = Utf8Incremental::new();
        let bad = [0xE0u8, 0x80, 0x80]; // overlong encoding
        assert!(d.decode(&bad, true).is_err());
    }

    #[test]
    fn rejects_truncated_sequence_at_message_end() {
        let mut d = Utf8Incremental::new();
        let truncated = [0xF0u8, 0x9F, 0x8E]; // missing final continuation byte
        assert!(d.decode(&truncated, true).is_err());
    }

    #[test]
    fn split_byte_by_byte_still_validates() {
        let text = "ascii + héllo";
        let mut d = Utf8Incremental::new();
        let mut out = String::new();
        let bytes = text.as_bytes();
        for (i, b) in bytes.iter().enumerate() {
            let is_last = i == bytes.len() - 1;
            out.push_str(&d.decode(std::slice::from_ref(b), is_last).unwrap());
        }
        assert_eq!(out, text);
    }
}

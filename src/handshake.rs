//! Upgrade handshake validation and response construction.
//!
//! HTTP request *parsing* is an external collaborator; this module only
//! validates an already-parsed request line + header map and produces the
//! `101 Switching Protocols` response bytes, computing `Sec-WebSocket-Accept`
//! with `sha1`+`base64`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};
use std::collections::HashMap;

use crate::error::Error;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Other,
}

/// The minimal view of an HTTP/1.1 upgrade request this engine needs. The
/// caller (the external HTTP layer) is responsible for producing this from
/// whatever request representation it parses.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub method: Method,
    /// Header names are expected lower-cased by the caller, matching
    /// `httparse`-derived call sites that normalize case up front.
    pub headers: HashMap<String, String>,
}

impl UpgradeRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Validate the RFC 6455 upgrade requirements. On success, returns the
/// `Sec-WebSocket-Accept` token to echo back.
pub fn validate_upgrade(req: &UpgradeRequest) -> Result<String, Error> {
    if req.method != Method::Get {
        return Err(Error::InvalidMethod);
    }
    let upgrade = req.header("upgrade").ok_or(Error::NoUpgradeHeader)?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::NoUpgradeHeader);
    }
    let connection = req.header("connection").ok_or(Error::NoConnectionHeader)?;
    if !connection
        .split(',')
        .any(|tok| tok.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(Error::NoConnectionHeader);
    }
    let key = req.header("sec-websocket-key").ok_or(Error::NoSecWebSocketKey)?;
    let version = req.header("sec-websocket-version").unwrap_or("");
    let version_ok = version.parse::<u32>().map(|v| v >= 13).unwrap_or(false);
    if !version_ok {
        return Err(Error::UnsupportedVersion);
    }

    Ok(accept_token(key))
}

/// `base64(SHA1(key ++ GUID))`.
pub fn accept_token(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// The literal `101 Switching Protocols` response.
pub fn build_response(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: WebSocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn accepts_canonical_handshake_and_matches_rfc_example() {
        // RFC 6455 §1.3 worked example.
        let req = UpgradeRequest {
            method: Method::Get,
            headers: headers(&[
                ("upgrade", "websocket"),
                ("connection", "Upgrade"),
                ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
                ("sec-websocket-version", "13"),
            ]),
        };
        let accept = validate_upgrade(&req).unwrap();
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        let response = build_response(&accept);
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[test]
    fn rejects_non_get_method() {
        let req = UpgradeRequest {
            method: Method::Other,
            headers: headers(&[
                ("upgrade", "websocket"),
                ("connection", "Upgrade"),
                ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
                ("sec-websocket-version", "13"),
            ]),
        };
        assert!(matches!(validate_upgrade(&req), Err(Error::InvalidMethod)));
    }

    #[test]
    fn rejects_low_version() {
        let req = UpgradeRequest {
            method: Method::Get,
            headers: headers(&[
                ("upgrade", "websocket"),
                ("connection", "Upgrade"),
                ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
                ("sec-websocket-version", "8"),
            ]),
        };
        assert!(matches!(validate_upgrade(&req), Err(Error::UnsupportedVersion)));
    }

    #[test]
    fn rejects_missing_key() {
        let req = UpgradeRequest {
            method: Method::Get,
            headers: headers(&[("upgrade", "websocket"), ("connection", "Upgrade")]),
        };
        assert!(matches!(validate_upgrade(&req), Err(Error::NoSecWebSocketKey)));
    }
}

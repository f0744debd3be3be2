//! Validates the HTTP/1.1 upgrade request and computes the
//! `Sec-WebSocket-Accept` value (spec §4.8).
//!
//! The host HTTP server parses the request line and headers; this module
//! only consumes the handful of header values the upgrade needs. Grounded
//! on the ancestor crate's `utils.rs` (`generate_websocket_accept_value`)
//! and `handshake.rs` (`parse_websocket_key`), generalized from the
//! client-side accept-check to the server-side accept-compute direction.

use crate::error::Error;
use crate::registry::ProtocolRegistry;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The subset of the upgrade request the host HTTP server has already
/// parsed and handed to us. Header lookups are expected to be
/// case-insensitive on the caller's side already (as any real HTTP
/// header map would provide); we only compare/normalize values here.
#[derive(Debug, Clone, Default)]
pub struct UpgradeRequest {
    pub method: String,
    pub connection: Option<String>,
    pub upgrade: Option<String>,
    pub sec_websocket_version: Option<String>,
    pub sec_websocket_protocol: Option<String>,
    pub sec_websocket_key: Option<String>,
}

/// Result of a successful upgrade: the chosen subprotocol's name and the
/// computed `Sec-WebSocket-Accept` value, plus the full response headers
/// the caller should write back to the socket.
#[derive(Debug, Clone)]
pub struct UpgradeResponse {
    pub accept: String,
    pub chosen_protocol: String,
}

impl UpgradeResponse {
    /// Renders the exact header block from spec §4.8.
    pub fn to_http_response(&self) -> String {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             Sec-WebSocket-Protocol: {}\r\n\
             \r\n",
            self.accept, self.chosen_protocol
        )
    }
}

/// Validates `req` against the fields enumerated in spec §4.8 and, if
/// valid, picks the first client-offered subprotocol that is registered.
/// Any validation failure is reported as an `Error`; the caller is
/// expected to fall through to ordinary HTTP handling on failure, never
/// propagate it to the client as a WebSocket-framed error.
pub fn validate_upgrade(
    req: &UpgradeRequest,
    registry: &ProtocolRegistry,
) -> Result<UpgradeResponse, Error> {
    if !req.method.eq_ignore_ascii_case("GET") {
        return Err(Error::NoConnectionUpgradeHeader);
    }

    let connection_ok = req
        .connection
        .as_deref()
        .map(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        })
        .unwrap_or(false);
    if !connection_ok {
        return Err(Error::NoConnectionUpgradeHeader);
    }

    let upgrade_ok = req
        .upgrade
        .as_deref()
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if !upgrade_ok {
        return Err(Error::NoUpgradeWebsocketHeader);
    }

    let version_ok = req
        .sec_websocket_version
        .as_deref()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .map(|v| v >= 13)
        .unwrap_or(false);
    if !version_ok {
        return Err(Error::UnsupportedVersion);
    }

    let offered = req
        .sec_websocket_protocol
        .as_deref()
        .unwrap_or("")
        .trim();
    if offered.is_empty() {
        return Err(Error::NoSubprotocolOffered);
    }

    let key = req
        .sec_websocket_key
        .as_deref()
        .ok_or(Error::NoSecWebSocketKey)?;
    let decoded = BASE64_STANDARD
        .decode(key.trim())
        .map_err(|_| Error::InvalidSecWebSocketKey)?;
    if decoded.len() != 16 {
        return Err(Error::InvalidSecWebSocketKey);
    }

    // The server ignores every offered token after the first one it
    // recognizes (spec §4.8: "<chosen> is the first client-offered
    // subprotocol; the server ignores further tokens").
    let chosen = offered
        .split(',')
        .map(str::trim)
        .find(|name| registry.contains(name))
        .ok_or(Error::NoMatchingSubprotocol)?
        .to_string();

    let accept = compute_accept(key.trim());

    Ok(UpgradeResponse {
        accept,
        chosen_protocol: chosen,
    })
}

/// `base64(SHA1(key + GUID))`, per RFC 6455 §1.3 and spec §4.8/§9 (no
/// trailing NUL or encoding normalization on the concatenated bytes).
pub fn compute_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::chat::ChatProtocol;

    #[test]
    fn known_accept_value() {
        // Spec §8 "Handshake accept" testable property.
        assert_eq!(
            compute_accept("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    fn base_request() -> UpgradeRequest {
        UpgradeRequest {
            method: "GET".into(),
            connection: Some("Upgrade".into()),
            upgrade: Some("websocket".into()),
            sec_websocket_version: Some("13".into()),
            sec_websocket_protocol: Some("synopsejson, synopsebinary".into()),
            sec_websocket_key: Some("dGhlIHNhbXBsZSBub25jZQ==".into()),
        }
    }

    #[test]
    fn negotiates_only_registered_subprotocol() {
        let mut registry = ProtocolRegistry::new();
        registry
            .add(Box::new(ChatProtocol::new("synopsebinary")))
            .unwrap();
        let resp = validate_upgrade(&base_request(), &registry).unwrap();
        assert_eq!(resp.chosen_protocol, "synopsebinary");
        assert_eq!(resp.accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn rejects_short_key() {
        let mut req = base_request();
        req.sec_websocket_key = Some(BASE64_STANDARD.encode([0u8; 8]));
        let mut registry = ProtocolRegistry::new();
        registry
            .add(Box::new(ChatProtocol::new("synopsebinary")))
            .unwrap();
        assert!(matches!(
            validate_upgrade(&req, &registry),
            Err(Error::InvalidSecWebSocketKey)
        ));
    }

    #[test]
    fn rejects_when_no_registered_protocol_offered() {
        let mut req = base_request();
        req.sec_websocket_protocol = Some("somethingelse".into());
        let mut registry = ProtocolRegistry::new();
        registry
            .add(Box::new(ChatProtocol::new("synopsebinary")))
            .unwrap();
        assert!(matches!(
            validate_upgrade(&req, &registry),
            Err(Error::NoMatchingSubprotocol)
        ));
    }
}

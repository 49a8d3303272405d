//! Opening-handshake validation and accept-token computation
//! (RFC 6455 §4.2.1).

use base64::prelude::*;
use http::{header, Method, Request};
use sha1::{Digest, Sha1};

use crate::{Result, WebSocketError};

/// GUID every server concatenates with the client key (RFC 6455 §1.3).
const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` token for a client key:
/// base64(SHA-1(key + GUID)).
///
/// Pure and deterministic; the RFC 6455 sample key
/// `dGhlIHNhbXBsZSBub25jZQ==` maps to `s3pPLMBiTxaQ9kYGzzhZRbK+xOo=`.
pub fn accept_key(key: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(WS_GUID);
    let digest = sha1.finalize();
    BASE64_STANDARD.encode(&digest[..])
}

/// Validates the opening-handshake request and returns the client key.
///
/// Checks run in a fixed order and the first failure wins: GET method,
/// `Connection: Upgrade`, `Upgrade: websocket`, `Sec-WebSocket-Version: 13`,
/// then a non-empty `Sec-WebSocket-Key`. Header names are matched
/// case-insensitively by `http`; values are compared byte-exactly.
pub(crate) fn validate<B>(request: &Request<B>) -> Result<&str> {
    if request.method() != Method::GET {
        return Err(WebSocketError::InvalidMethod);
    }

    let headers = request.headers();

    if headers.get(header::CONNECTION).map(|v| v.as_bytes()) != Some(b"Upgrade") {
        return Err(WebSocketError::InvalidConnectionHeader);
    }

    if headers.get(header::UPGRADE).map(|v| v.as_bytes()) != Some(b"websocket") {
        return Err(WebSocketError::InvalidUpgradeHeader);
    }

    if headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .map(|v| v.as_bytes())
        != Some(b"13")
    {
        return Err(WebSocketError::InvalidSecWebsocketVersion);
    }

    headers
        .get(header::SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .filter(|key| !key.is_empty())
        .ok_or(WebSocketError::MissingSecWebSocketKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> http::request::Builder {
        Request::builder()
            .method(Method::GET)
            .uri("/chat")
            .header("Host", "server.example.com")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
    }

    #[test]
    fn accept_key_matches_the_rfc_vector() {
        assert_eq!(
            accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn valid_request_yields_the_key() {
        let request = sample_request().body(()).unwrap();
        assert_eq!(validate(&request).unwrap(), "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn rejects_non_get_methods() {
        for method in [Method::POST, Method::PUT, Method::DELETE, Method::HEAD] {
            let request = sample_request().method(method).body(()).unwrap();
            assert!(matches!(
                validate(&request),
                Err(WebSocketError::InvalidMethod)
            ));
        }
    }

    #[test]
    fn rejects_wrong_connection_header() {
        let request = Request::builder()
            .method(Method::GET)
            .header("Connection", "keep-alive")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(())
            .unwrap();
        assert!(matches!(
            validate(&request),
            Err(WebSocketError::InvalidConnectionHeader)
        ));
    }

    #[test]
    fn rejects_wrong_upgrade_header() {
        let request = Request::builder()
            .method(Method::GET)
            .header("Connection", "Upgrade")
            .header("Upgrade", "h2c")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(())
            .unwrap();
        assert!(matches!(
            validate(&request),
            Err(WebSocketError::InvalidUpgradeHeader)
        ));
    }

    #[test]
    fn rejects_wrong_version() {
        let request = Request::builder()
            .method(Method::GET)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "8")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(())
            .unwrap();
        assert!(matches!(
            validate(&request),
            Err(WebSocketError::InvalidSecWebsocketVersion)
        ));
    }

    #[test]
    fn rejects_missing_or_empty_key() {
        let request = Request::builder()
            .method(Method::GET)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .body(())
            .unwrap();
        assert!(matches!(
            validate(&request),
            Err(WebSocketError::MissingSecWebSocketKey)
        ));

        let request = Request::builder()
            .method(Method::GET)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", "")
            .body(())
            .unwrap();
        assert!(matches!(
            validate(&request),
            Err(WebSocketError::MissingSecWebSocketKey)
        ));
    }

    #[test]
    fn first_failing_check_wins() {
        // missing Connection AND wrong version: the connection check fires
        let request = Request::builder()
            .method(Method::GET)
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "8")
            .body(())
            .unwrap();
        assert!(matches!(
            validate(&request),
            Err(WebSocketError::InvalidConnectionHeader)
        ));

        // wrong method trumps everything else
        let request = Request::builder().method(Method::POST).body(()).unwrap();
        assert!(matches!(
            validate(&request),
            Err(WebSocketError::InvalidMethod)
        ));
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let request = Request::builder()
            .method(Method::GET)
            .header("CONNECTION", "Upgrade")
            .header("UPGRADE", "websocket")
            .header("SEC-WEBSOCKET-VERSION", "13")
            .header("SEC-WEBSOCKET-KEY", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(())
            .unwrap();
        assert!(validate(&request).is_ok());
    }
}

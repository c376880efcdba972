//! WebSocket upgrade handshake: token check and loopback origin guard
use std::net::IpAddr;

const SUBPROTOCOL_PREFIX: &str = "auth.bearer.";

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("missing or malformed Sec-WebSocket-Protocol header")]
    MissingSubprotocol,
    #[error("bearer token does not match")]
    TokenMismatch,
    #[error("request Origin is not a loopback host")]
    NonLoopbackOrigin,
}

/// Extracts the bearer token from a `Sec-WebSocket-Protocol` header value,
/// which may list several comma-separated subprotocols.
pub fn extract_token(header_value: &str) -> Option<&str> {
    header_value
        .split(',')
        .map(str::trim)
        .find_map(|p| p.strip_prefix(SUBPROTOCOL_PREFIX))
}

pub fn check_token(header_value: Option<&str>, expected: &str) -> Result<String, HandshakeError> {
    let token = header_value
        .and_then(extract_token)
        .ok_or(HandshakeError::MissingSubprotocol)?;
    if token != expected {
        return Err(HandshakeError::TokenMismatch);
    }
    Ok(matched_subprotocol(token))
}

/// The echoed subprotocol value for a successful handshake.
pub fn matched_subprotocol(token: &str) -> String {
    format!("{SUBPROTOCOL_PREFIX}{token}")
}

/// Accepts `Origin` headers that name a loopback host at any port, or no
/// `Origin` header at all (non-browser clients never send one).
pub fn check_origin(origin_header: Option<&str>) -> Result<(), HandshakeError> {
    let Some(origin) = origin_header else {
        return Ok(());
    };
    let authority = origin.split("://").nth(1).unwrap_or(origin);
    let host = if let Some(rest) = authority.strip_prefix('[') {
        // Bracketed IPv6 host, e.g. `[::1]:5173` — the bracket is the only
        // unambiguous end-of-host marker since the address itself is full
        // of colons.
        rest.split(']').next().unwrap_or("")
    } else {
        authority.split(':').next().unwrap_or("")
    };

    let is_loopback = host == "localhost"
        || host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false);

    if is_loopback {
        Ok(())
    } else {
        Err(HandshakeError::NonLoopbackOrigin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_token_from_single_subprotocol() {
        assert_eq!(extract_token("auth.bearer.abc123"), Some("abc123"));
    }

    #[test]
    fn extracts_token_among_several_subprotocols() {
        assert_eq!(
            extract_token("chat, auth.bearer.abc123, binary"),
            Some("abc123")
        );
    }

    #[test]
    fn missing_header_is_rejected() {
        assert!(matches!(
            check_token(None, "abc123"),
            Err(HandshakeError::MissingSubprotocol)
        ));
    }

    #[test]
    fn mismatched_token_is_rejected() {
        assert!(matches!(
            check_token(Some("auth.bearer.wrong"), "abc123"),
            Err(HandshakeError::TokenMismatch)
        ));
    }

    #[test]
    fn matching_token_is_accepted() {
        assert!(check_token(Some("auth.bearer.abc123"), "abc123").is_ok());
    }

    #[test]
    fn loopback_origins_are_accepted() {
        assert!(check_origin(Some("http://127.0.0.1:5173")).is_ok());
        assert!(check_origin(Some("http://localhost:5173")).is_ok());
        assert!(check_origin(Some("http://[::1]:5173")).is_ok());
        assert!(check_origin(None).is_ok());
    }

    #[test]
    fn non_loopback_origin_is_rejected() {
        assert!(matches!(
            check_origin(Some("http://example.com")),
            Err(HandshakeError::NonLoopbackOrigin)
        ));
    }
}

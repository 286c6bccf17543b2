#[cfg(test)]
mod tests {
    use mazed::websocket::{Handshake, HandshakeError, Request, TOKEN_MAX, accept_key};

    const UPGRADE: &str = "GET /alice HTTP/1.1\r\n\
        Host: localhost:1234\r\n\
        Upgrade: websocket\r\n\
        Connection: keep-alive, Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    fn parse(request: &str) -> Result<Option<Request>, HandshakeError> {
        Handshake::new().feed(request.as_bytes())
    }

    #[test]
    fn test_accept_key() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_upgrade_request() {
        let request = parse(UPGRADE)
            .expect("Request should be accepted")
            .expect("Request should be complete");

        assert_eq!(request.path, "/alice");
        assert_eq!(request.login(), Some("alice"));
        assert_eq!(
            request.response(),
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"
        );
    }

    #[test]
    fn test_fed_one_byte_at_a_time() {
        let mut handshake = Handshake::new();
        let mut request = None;

        for byte in UPGRADE.bytes() {
            if let Some(done) = handshake.feed(&[byte]).expect("Byte should be accepted") {
                request = Some(done);
            }
        }

        let request = request.expect("Request should be complete");
        assert_eq!(request.key, "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn test_incomplete_request_waits() {
        let cut = &UPGRADE[..UPGRADE.len() - 2];
        assert_eq!(parse(cut), Ok(None));
    }

    #[test]
    fn test_bare_lf_lines() {
        let request = UPGRADE.replace("\r\n", "\n");
        let request = parse(&request)
            .expect("LF line endings should be accepted")
            .expect("Request should be complete");
        assert_eq!(request.login(), Some("alice"));
    }

    #[test]
    fn test_folded_header_value() {
        let request = UPGRADE.replace("keep-alive, Upgrade", "keep-alive,\r\n\tUpgrade");
        assert!(matches!(parse(&request), Ok(Some(_))), "Folded value should be joined");
    }

    #[test]
    fn test_folded_request_line() {
        let request = UPGRADE.replace("HTTP/1.1\r\nHost", "HTTP/1.1\r\n Host");
        assert_eq!(parse(&request), Err(HandshakeError::Malformed));
    }

    #[test]
    fn test_method_and_version() {
        let post = UPGRADE.replace("GET ", "POST ");
        assert_eq!(parse(&post), Err(HandshakeError::Method));
        assert_eq!(
            HandshakeError::Method.response(),
            "HTTP/1.1 501 Not Implemented\r\n\r\n"
        );

        let old = UPGRADE.replace("HTTP/1.1\r\nHost", "HTTP/1.0\r\nHost");
        assert_eq!(parse(&old), Err(HandshakeError::Version));
        assert_eq!(
            HandshakeError::Version.response(),
            "HTTP/1.1 505 HTTP Version Not Supported\r\n\r\n"
        );
    }

    #[test]
    fn test_header_requirements() {
        let duplicate = UPGRADE.replace(
            "Sec-WebSocket-Version",
            "Sec-WebSocket-Key: AAAAAAAAAAAAAAAAAAAAAA==\r\nSec-WebSocket-Version",
        );
        assert_eq!(parse(&duplicate), Err(HandshakeError::DuplicateKey));

        let no_key = UPGRADE.replace("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n", "");
        assert_eq!(parse(&no_key), Err(HandshakeError::Incomplete));

        let no_upgrade = UPGRADE.replace("Upgrade: websocket\r\n", "");
        assert_eq!(parse(&no_upgrade), Err(HandshakeError::Incomplete));

        let wrong_version = UPGRADE.replace("Version: 13", "Version: 8");
        assert_eq!(parse(&wrong_version), Err(HandshakeError::Unsupported));

        let wrong_protocol = UPGRADE.replace("Upgrade: websocket", "Upgrade: h2c");
        assert_eq!(parse(&wrong_protocol), Err(HandshakeError::Unsupported));

        assert_eq!(
            HandshakeError::Incomplete.response(),
            "HTTP/1.1 400 Bad Request\r\n\r\n"
        );
    }

    #[test]
    fn test_header_names_ignore_case() {
        let request = UPGRADE
            .replace("Upgrade: websocket", "UPGRADE: WebSocket")
            .replace("Sec-WebSocket-Version", "sec-websocket-version");
        assert!(matches!(parse(&request), Ok(Some(_))));
    }

    #[test]
    fn test_token_too_long() {
        let path = "a".repeat(TOKEN_MAX);
        let request = UPGRADE.replace("/alice", &format!("/{path}"));
        assert_eq!(parse(&request), Err(HandshakeError::TokenTooLong));
    }

    #[test]
    fn test_root_path_names_no_user() {
        let request = parse(&UPGRADE.replace("/alice", "/"))
            .expect("Request should be accepted")
            .expect("Request should be complete");
        assert_eq!(request.login(), None);
        assert_eq!(
            HandshakeError::NotFound.response(),
            "HTTP/1.1 404 Not Found\r\n\r\n"
        );
    }
}

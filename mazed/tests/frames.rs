#[cfg(test)]
mod tests {
    use mazed::websocket::{
        CloseCode, FrameEvent, FrameParser, MAX_CONTROL_PAYLOAD, MAX_PAYLOAD, Opcode, encode_close, encode_frame,
    };

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    /// Builds a masked client frame.
    fn client_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![if fin { 0x80 | opcode } else { opcode }];

        match payload.len() {
            n if n <= 125 => frame.push(0x80 | n as u8),
            n if n <= usize::from(u16::MAX) => {
                frame.push(0x80 | 126);
                frame.extend_from_slice(&(n as u16).to_be_bytes());
            }
            n => {
                frame.push(0x80 | 127);
                frame.extend_from_slice(&(n as u64).to_be_bytes());
            }
        }

        frame.extend_from_slice(&MASK);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ MASK[i % 4]));
        frame
    }

    fn events(parser: &mut FrameParser, bytes: &[u8]) -> (Vec<FrameEvent>, Result<(), CloseCode>) {
        let mut events = Vec::new();
        let result = parser.feed(bytes, |event| events.push(event));
        (events, result)
    }

    #[test]
    fn test_binary_message() {
        let mut parser = FrameParser::new();
        let (events, result) = events(&mut parser, &client_frame(true, 0x2, &[1]));

        assert_eq!(result, Ok(()));
        assert_eq!(events, vec![FrameEvent::Message(vec![1])]);
    }

    #[test]
    fn test_fragments_are_reassembled() {
        let mut bytes = client_frame(false, 0x2, b"hello ");
        bytes.extend(client_frame(true, 0x0, b"world"));

        let mut parser = FrameParser::new();
        let mut received = Vec::new();
        for byte in bytes {
            parser
                .feed(&[byte], |event| received.push(event))
                .expect("Fragment should be accepted");
        }

        assert_eq!(received, vec![FrameEvent::Message(b"hello world".to_vec())]);
    }

    #[test]
    fn test_ping_between_fragments() {
        let mut bytes = client_frame(false, 0x2, b"ab");
        bytes.extend(client_frame(true, 0x9, b"hi"));
        bytes.extend(client_frame(true, 0x0, b"cd"));

        let mut parser = FrameParser::new();
        let (events, result) = events(&mut parser, &bytes);

        assert_eq!(result, Ok(()));
        assert_eq!(
            events,
            vec![
                FrameEvent::Ping(b"hi".to_vec()),
                FrameEvent::Message(b"abcd".to_vec())
            ]
        );
    }

    #[test]
    fn test_extended_length() {
        let payload = vec![7u8; 300];
        let mut parser = FrameParser::new();
        let (events, result) = events(&mut parser, &client_frame(true, 0x2, &payload));

        assert_eq!(result, Ok(()));
        assert_eq!(events, vec![FrameEvent::Message(payload)]);
    }

    #[test]
    fn test_empty_message_is_dropped() {
        let mut parser = FrameParser::new();
        let (events, result) = events(&mut parser, &client_frame(true, 0x2, &[]));

        assert_eq!(result, Ok(()));
        assert!(events.is_empty());
    }

    #[test]
    fn test_protocol_errors() {
        let stray = client_frame(true, 0x0, b"x");
        assert_eq!(events(&mut FrameParser::new(), &stray).1, Err(CloseCode::ProtocolError));

        let mut reserved = client_frame(true, 0x2, b"x");
        reserved[0] |= 0x40;
        assert_eq!(events(&mut FrameParser::new(), &reserved).1, Err(CloseCode::ProtocolError));

        let unknown = client_frame(true, 0x3, b"x");
        assert_eq!(events(&mut FrameParser::new(), &unknown).1, Err(CloseCode::ProtocolError));

        let unmasked = [0x82, 0x01, 0x01];
        assert_eq!(events(&mut FrameParser::new(), &unmasked).1, Err(CloseCode::ProtocolError));
    }

    #[test]
    fn test_control_frame_limits() {
        let fragmented = client_frame(false, 0x9, b"ping");
        assert_eq!(events(&mut FrameParser::new(), &fragmented).1, Err(CloseCode::ProtocolError));

        let oversized = client_frame(true, 0x9, &[0u8; 126]);
        assert_eq!(events(&mut FrameParser::new(), &oversized).1, Err(CloseCode::ProtocolError));

        let oversized_close = client_frame(true, 0x8, &[0u8; 126]);
        assert_eq!(
            events(&mut FrameParser::new(), &oversized_close).1,
            Err(CloseCode::ProtocolError)
        );

        let largest = client_frame(true, 0xa, &[0u8; MAX_CONTROL_PAYLOAD as usize]);
        assert_eq!(events(&mut FrameParser::new(), &largest), (Vec::new(), Ok(())));
    }

    #[test]
    fn test_refused_frames() {
        let text = client_frame(true, 0x1, b"hello");
        assert_eq!(events(&mut FrameParser::new(), &text).1, Err(CloseCode::Unsupported));

        let close = client_frame(true, 0x8, &1000u16.to_be_bytes());
        assert_eq!(events(&mut FrameParser::new(), &close).1, Err(CloseCode::Normal));

        let big = client_frame(true, 0x2, &vec![0u8; MAX_PAYLOAD + 1]);
        assert_eq!(events(&mut FrameParser::new(), &big).1, Err(CloseCode::TooBig));

        let mut bytes = client_frame(false, 0x2, &vec![0u8; MAX_PAYLOAD]);
        bytes.extend(client_frame(true, 0x0, &[0]));
        assert_eq!(events(&mut FrameParser::new(), &bytes).1, Err(CloseCode::TooBig));
    }

    #[test]
    fn test_server_frames() {
        assert_eq!(encode_frame(Opcode::Binary, &[1, 2]), vec![0x82, 2, 1, 2]);
        assert_eq!(encode_frame(Opcode::Pong, b""), vec![0x8a, 0]);
        assert_eq!(encode_close(CloseCode::TooBig), vec![0x88, 2, 0x03, 0xf1]);

        let frame = encode_frame(Opcode::Binary, &[0; 1200]);
        assert_eq!(&frame[..4], &[0x82, 126, 0x04, 0xb0]);
        assert_eq!(frame.len(), 1204);
    }
}

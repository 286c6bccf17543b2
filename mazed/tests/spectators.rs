#[cfg(test)]
mod tests {
    use mazed::level::LevelCatalog;
    use mazed::net;
    use mazed::proto::Session;
    use mazed::reactor::Reactor;
    use mazed::websocket::Hub;
    use mazed::worker::{COMMAND_KILL, COMMAND_RESUME, connect_spectators};
    use std::cell::{Cell, RefCell};
    use std::io::{ErrorKind, Read, Write};
    use std::os::unix::net::UnixStream;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    const TICK: Duration = Duration::from_millis(10);
    const MASK: [u8; 4] = [1, 2, 3, 4];

    fn masked(opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x80 | opcode, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&MASK);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ MASK[i % 4]));
        frame
    }

    fn turn_until(reactor: &mut Reactor, limit: Duration, done: impl Fn() -> bool) {
        let start = Instant::now();
        while !done() && start.elapsed() < limit {
            reactor.turn(Some(TICK)).expect("Failed to run reactor turn");
        }
    }

    fn spectator(reactor: &mut Reactor, hub: &Hub) -> UnixStream {
        let (ours, theirs) = net::socket_pair().expect("Failed to create socket pair");
        hub.add(reactor, ours).expect("Failed to add spectator");

        let client = UnixStream::from(theirs);
        client.set_nonblocking(true).expect("Failed to set nonblocking");
        client
    }

    /// Turns the reactor until `len` bytes arrived or the peer closed.
    fn receive(reactor: &mut Reactor, client: &mut UnixStream, len: usize) -> Vec<u8> {
        let start = Instant::now();
        let mut received = Vec::new();

        while received.len() < len && start.elapsed() < Duration::from_secs(2) {
            reactor.turn(Some(TICK)).expect("Failed to run reactor turn");

            let mut buf = [0u8; 4096];
            match client.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => panic!("Failed to read from stream: {e}"),
            }
        }
        received
    }

    #[test]
    fn test_messages_reach_the_callback() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let hub = Hub::new();
        let messages = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&messages);
        hub.on_message(move |_, _, message| sink.borrow_mut().push(message.to_vec()));

        let mut client = spectator(&mut reactor, &hub);
        assert_eq!(hub.len(), 1);

        client.write_all(&masked(0x2, &[7, 8])).expect("Failed to write frame");
        turn_until(&mut reactor, Duration::from_secs(2), || !messages.borrow().is_empty());

        assert_eq!(messages.borrow().as_slice(), &[vec![7u8, 8]]);
    }

    #[test]
    fn test_ping_is_answered() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let hub = Hub::new();
        let mut client = spectator(&mut reactor, &hub);

        client.write_all(&masked(0x9, b"abc")).expect("Failed to write frame");
        assert_eq!(receive(&mut reactor, &mut client, 5), vec![0x8a, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let hub = Hub::new();
        let mut first = spectator(&mut reactor, &hub);
        let mut second = spectator(&mut reactor, &hub);

        hub.broadcast(&mut reactor, &[1, 2, 3]);

        let frame = vec![0x82, 3, 1, 2, 3];
        assert_eq!(receive(&mut reactor, &mut first, frame.len()), frame);
        assert_eq!(receive(&mut reactor, &mut second, frame.len()), frame);
    }

    #[test]
    fn test_text_frame_closes_with_1003() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let hub = Hub::new();
        let left = Rc::new(Cell::new(false));

        let flag = Rc::clone(&left);
        hub.on_empty(move || flag.set(true));
        let mut client = spectator(&mut reactor, &hub);

        client.write_all(&masked(0x1, b"hi")).expect("Failed to write frame");
        let reply = receive(&mut reactor, &mut client, 8);

        assert_eq!(reply, vec![0x88, 2, 0x03, 0xeb], "Close frame and then end of stream");
        turn_until(&mut reactor, Duration::from_secs(2), || left.get());
        assert!(left.get(), "The hub should report being empty");
        assert!(!hub.connected());
    }

    #[test]
    fn test_spectator_commands() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let hub = Hub::new();
        let session = Session::new("alice", LevelCatalog::builtin(), hub.clone(), reactor.shutdown_handle());
        connect_spectators(&reactor, &session, &hub);

        let mut client = spectator(&mut reactor, &hub);

        session.pause(&mut reactor);
        assert!(session.is_waiting());

        client.write_all(&masked(0x2, &[COMMAND_RESUME])).expect("Failed to write frame");
        turn_until(&mut reactor, Duration::from_secs(2), || !session.is_waiting());
        assert!(!session.is_waiting(), "Resume command should resume the session");

        let shutdown = reactor.shutdown_handle();
        client.write_all(&masked(0x2, &[COMMAND_KILL])).expect("Failed to write frame");
        turn_until(&mut reactor, Duration::from_secs(2), || shutdown.is_requested());
        assert!(shutdown.is_requested(), "Kill command should stop the worker");
    }

    #[test]
    fn test_last_spectator_of_idle_session() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let hub = Hub::new();
        let session = Session::new("alice", LevelCatalog::builtin(), hub.clone(), reactor.shutdown_handle());
        connect_spectators(&reactor, &session, &hub);
        let shutdown = reactor.shutdown_handle();

        let client = spectator(&mut reactor, &hub);
        drop(client);

        turn_until(&mut reactor, Duration::from_secs(2), || shutdown.is_requested());
        assert!(shutdown.is_requested(), "No game connection and no spectator left");
    }

    #[test]
    fn test_redraw_sends_screen() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let hub = Hub::new();
        let session = Session::new("alice", LevelCatalog::builtin(), hub.clone(), reactor.shutdown_handle());
        let mut client = spectator(&mut reactor, &hub);

        session.redraw(&mut reactor, true);
        let frame = receive(&mut reactor, &mut client, 16);

        // An empty screen is the 4-byte header plus five runs.
        assert_eq!(frame.len(), 16);
        assert_eq!(&frame[..2], &[0x82, 14], "Screens go out as binary frames");
    }
}

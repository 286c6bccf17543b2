#[cfg(test)]
mod tests {
    use mazed::Error;
    use mazed::reactor::{Dispatch, Interest, Reactor, Ready, SIGUSR1, Token};
    use std::cell::Cell;
    use std::io::{Read, Write};
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    const TICK: Duration = Duration::from_millis(10);

    fn turn_until(reactor: &mut Reactor, limit: Duration, done: impl Fn() -> bool) {
        let start = Instant::now();
        while !done() && start.elapsed() < limit {
            reactor.turn(Some(TICK)).expect("Failed to run reactor turn");
        }
    }

    fn turn_for(reactor: &mut Reactor, period: Duration) {
        let start = Instant::now();
        while start.elapsed() < period {
            reactor.turn(Some(TICK)).expect("Failed to run reactor turn");
        }
    }

    #[test]
    fn test_one_shot_timer_fires_once() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let fired = Rc::new(Cell::new(0u64));

        let counter = Rc::clone(&fired);
        let timer = reactor
            .timer_new(move |_, _, count| {
                counter.set(counter.get() + count);
                Ok(())
            })
            .expect("Failed to create timer");

        reactor.timer_arm(timer, 20, false).expect("Failed to arm timer");
        assert!(reactor.timer_is_armed(timer));

        turn_until(&mut reactor, Duration::from_secs(2), || fired.get() > 0);
        assert_eq!(fired.get(), 1, "Timer should have fired exactly once");
        assert!(!reactor.timer_is_armed(timer), "One-shot timer should disarm itself");

        turn_for(&mut reactor, Duration::from_millis(60));
        assert_eq!(fired.get(), 1, "One-shot timer should not fire again");
    }

    #[test]
    fn test_repeating_timer_keeps_firing() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let fired = Rc::new(Cell::new(0u64));

        let counter = Rc::clone(&fired);
        let timer = reactor
            .timer_new(move |_, _, count| {
                counter.set(counter.get() + count);
                Ok(())
            })
            .expect("Failed to create timer");
        reactor.timer_arm(timer, 10, true).expect("Failed to arm timer");

        turn_until(&mut reactor, Duration::from_secs(2), || fired.get() >= 3);
        assert!(fired.get() >= 3, "Repeating timer should fire repeatedly");
        assert!(reactor.timer_is_armed(timer));

        reactor.timer_disarm(timer).expect("Failed to disarm timer");
        reactor.timer_disarm(timer).expect("Disarming twice should succeed");
        let count = fired.get();
        turn_for(&mut reactor, Duration::from_millis(50));
        assert_eq!(fired.get(), count, "Disarmed timer should stay silent");
    }

    #[test]
    fn test_paused_timer_waits_for_resume() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let fired = Rc::new(Cell::new(false));

        let flag = Rc::clone(&fired);
        let timer = reactor
            .timer_new(move |_, _, _| {
                flag.set(true);
                Ok(())
            })
            .expect("Failed to create timer");
        reactor.timer_arm(timer, 30, false).expect("Failed to arm timer");

        reactor.timer_pause(timer).expect("Failed to pause timer");
        reactor.timer_pause(timer).expect("Pausing twice should succeed");
        turn_for(&mut reactor, Duration::from_millis(100));
        assert!(!fired.get(), "Paused timer should not fire");
        assert!(reactor.timer_is_armed(timer), "Pausing should keep the timer armed");

        reactor.timer_resume(timer).expect("Failed to resume timer");
        turn_until(&mut reactor, Duration::from_secs(2), || fired.get());
        assert!(fired.get(), "Resumed timer should fire");
    }

    #[test]
    fn test_timer_deleted_from_its_own_callback() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let fired = Rc::new(Cell::new(0u32));

        let counter = Rc::clone(&fired);
        let timer = reactor
            .timer_new(move |reactor, id, _| {
                counter.set(counter.get() + 1);
                reactor.timer_delete(id);
                Ok(())
            })
            .expect("Failed to create timer");
        reactor.timer_arm(timer, 5, true).expect("Failed to arm timer");

        turn_until(&mut reactor, Duration::from_secs(2), || fired.get() > 0);
        turn_for(&mut reactor, Duration::from_millis(40));

        assert_eq!(fired.get(), 1, "Deleted timer should not fire again");
        assert!(!reactor.timer_is_armed(timer));
        assert!(matches!(reactor.timer_arm(timer, 5, false), Err(Error::UnknownTimer)));
    }

    #[test]
    fn test_descriptor_watched_once() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let (ours, _theirs) = UnixStream::pair().expect("Failed to create socket pair");
        let fd = ours.as_raw_fd();

        reactor
            .watch(fd, Interest::READ, |_: &mut Reactor, _: Ready| -> mazed::Result<Dispatch> {
                Ok(Dispatch::Continue)
            })
            .expect("Failed to watch descriptor");
        let second = reactor.watch(fd, Interest::READ, |_: &mut Reactor, _: Ready| -> mazed::Result<Dispatch> {
            Ok(Dispatch::Continue)
        });

        assert!(matches!(second, Err(Error::AlreadyWatched(f)) if f == fd));
    }

    #[test]
    fn test_watcher_removes_itself() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let (ours, mut theirs) = UnixStream::pair().expect("Failed to create socket pair");
        let calls = Rc::new(Cell::new(0u32));
        let own: Rc<Cell<Option<Token>>> = Rc::new(Cell::new(None));

        let counter = Rc::clone(&calls);
        let slot = Rc::clone(&own);
        let token = reactor
            .watch(ours.as_raw_fd(), Interest::READ, move |reactor: &mut Reactor, _: Ready| -> mazed::Result<Dispatch> {
                counter.set(counter.get() + 1);
                if let Some(token) = slot.get() {
                    reactor.unwatch(token);
                }
                Ok(Dispatch::Continue)
            })
            .expect("Failed to watch descriptor");
        own.set(Some(token));

        theirs.write_all(b"x").expect("Failed to write to stream");
        turn_until(&mut reactor, Duration::from_secs(2), || calls.get() > 0);
        turn_for(&mut reactor, Duration::from_millis(40));

        assert_eq!(calls.get(), 1, "Removed watcher should not run again");
        assert_eq!(reactor.interest(token), None);
        reactor.unwatch(token);
    }

    #[test]
    fn test_disabled_watcher_resumes() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let (mut ours, mut theirs) = UnixStream::pair().expect("Failed to create socket pair");
        let calls = Rc::new(Cell::new(0u32));

        let counter = Rc::clone(&calls);
        let token = reactor
            .watch(ours.as_raw_fd(), Interest::READ, move |_: &mut Reactor, _: Ready| -> mazed::Result<Dispatch> {
                counter.set(counter.get() + 1);
                Ok(Dispatch::Disable)
            })
            .expect("Failed to watch descriptor");

        // Never read, so the descriptor stays readable.
        theirs.write_all(b"x").expect("Failed to write to stream");
        turn_until(&mut reactor, Duration::from_secs(2), || calls.get() > 0);
        turn_for(&mut reactor, Duration::from_millis(40));
        assert_eq!(calls.get(), 1, "Disabled watcher should not be called");

        reactor.resume(token).expect("Failed to resume registration");
        turn_until(&mut reactor, Duration::from_secs(2), || calls.get() > 1);
        assert_eq!(calls.get(), 2, "Resumed watcher should be called again");

        let mut buf = [0u8; 1];
        ours.read_exact(&mut buf).expect("Failed to read from stream");
    }

    #[test]
    fn test_shutdown_stops_the_loop() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let timer = reactor
            .timer_new(|reactor, _, _| {
                reactor.shutdown();
                Ok(())
            })
            .expect("Failed to create timer");
        reactor.timer_arm(timer, 10, false).expect("Failed to arm timer");

        reactor.run().expect("Reactor should stop cleanly");

        let handle = reactor.shutdown_handle();
        assert!(handle.is_requested());
        handle.request();
        assert!(!reactor.turn(Some(TICK)).expect("Failed to run reactor turn"));
    }

    #[test]
    fn test_signal_delivered_in_loop() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let received = Rc::new(Cell::new(None));

        let slot = Rc::clone(&received);
        reactor
            .watch_signals(&[SIGUSR1], move |_, signo| {
                slot.set(Some(signo));
                Ok(())
            })
            .expect("Failed to watch signals");

        // Blocked for this thread, so it stays pending for the signalfd.
        let rc = unsafe { libc::raise(SIGUSR1) };
        assert_eq!(rc, 0, "Failed to raise signal");

        turn_until(&mut reactor, Duration::from_secs(2), || received.get().is_some());
        assert_eq!(received.get(), Some(SIGUSR1));
    }
}

//! The per-user worker process.
//!
//! A worker is started by the master with its control pipe as stderr. It
//! serves one session: game connections and spectators arrive through the
//! pipe, and the process ends when the session has nothing left to serve,
//! when a spectator asks for it, or when nothing arrives in time.

use crate::config::Config;
use crate::error::Result;
use crate::ipc::{ControlPipe, HandoffKind, HandoffTarget};
use crate::level::LevelCatalog;
use crate::net::Socket;
use crate::proto::Session;
use crate::reactor::{Reactor, SIGINT, SIGTERM};
use crate::websocket::Hub;

use std::os::fd::{FromRawFd, OwnedFd};
use tracing::{info, info_span};

/// Descriptor of the control pipe.
pub const CONTROL_FD: i32 = 2;

/// Spectator message resuming a waiting session.
pub const COMMAND_RESUME: u8 = 1;

/// Spectator message ending the worker.
pub const COMMAND_KILL: u8 = 2;

/// Routes handed-off connections into the session.
pub struct WorkerTarget {
    session: Session,
    hub: Hub,
}

impl WorkerTarget {
    pub fn new(session: Session, hub: Hub) -> Self {
        Self { session, hub }
    }
}

impl HandoffTarget for WorkerTarget {
    fn receive(&mut self, reactor: &mut Reactor, fd: OwnedFd, kind: HandoffKind) -> Result<()> {
        match kind {
            HandoffKind::Websocket => {
                self.hub.add(reactor, fd)?;
                self.session.redraw(reactor, true);
            }
            HandoffKind::Game(ending) => {
                self.session.add_client(reactor, fd, ending)?;
            }
        }
        Ok(())
    }
}

/// Wires a session to its spectators.
///
/// `1` resumes the session, `2` ends the worker. The worker also ends when
/// the last spectator leaves a session without game connections.
pub fn connect_spectators(reactor: &Reactor, session: &Session, hub: &Hub) {
    let shutdown = reactor.shutdown_handle();
    let commands = session.clone();
    hub.on_message(move |reactor, _, message| match message.first() {
        Some(&COMMAND_RESUME) => commands.resume(reactor),
        Some(&COMMAND_KILL) => {
            info!("terminated by a spectator");
            shutdown.request();
        }
        _ => {}
    });

    let shutdown = reactor.shutdown_handle();
    let idle = session.clone();
    hub.on_empty(move || {
        if idle.connections() == 0 {
            info!("last spectator left an idle session");
            shutdown.request();
        }
    });
}

/// Runs the worker of `login` until its session ends.
pub fn run(config: &Config, login: &str) -> Result<()> {
    let span = info_span!("worker", login);
    let _guard = span.enter();

    let mut reactor = Reactor::new()?;
    let hub = Hub::new();
    let session = Session::new(login, LevelCatalog::builtin(), hub.clone(), reactor.shutdown_handle())
        .with_result_hook(config.result_hook.clone())
        .with_queue_limit(config.queue_limit);
    connect_spectators(&reactor, &session, &hub);

    let idle_ms = config.idle_timeout_ms;
    let idle = reactor.timer_new(move |reactor, _, _| {
        info!(idle_ms, "no connection arrived, terminating");
        reactor.shutdown();
        Ok(())
    })?;
    reactor.timer_arm(idle, idle_ms, false)?;

    // SAFETY: fd 2 is open for the whole life of the process and nothing
    // else claims ownership of it.
    let control = unsafe { OwnedFd::from_raw_fd(CONTROL_FD) };
    let pipe = Socket::add(
        &mut reactor,
        control,
        ControlPipe::new(WorkerTarget::new(session.clone(), hub), Some(idle)),
    )?;
    // fd 2 is never closed.
    if let Some(fd) = pipe.set_unmanaged() {
        std::mem::forget(fd);
    }

    reactor.watch_signals(&[SIGINT, SIGTERM], |reactor, signo| {
        info!(signo, "terminating on signal");
        reactor.shutdown();
        Ok(())
    })?;

    info!("started");
    reactor.run()?;
    info!("terminating cleanly");
    Ok(())
}

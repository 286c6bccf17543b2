//! The master process.
//!
//! Listens on the game and WebSocket ports, finds out which user every new
//! connection belongs to and hands it to that user's worker.

use crate::config::Config;
use crate::error::Result;
use crate::ipc::Directory;
use crate::net::Listener;
use crate::reactor::{Reactor, SIGCHLD, SIGHUP, SIGINT, SIGTERM, reap_children};
use crate::users::UserDirectory;
use crate::{proto, websocket};

use std::cell::RefCell;
use std::ffi::OsString;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{info, info_span, warn};

/// The master's listeners and user directory.
pub struct Master {
    directory: Rc<RefCell<UserDirectory>>,
    game: Listener,
    websocket: Listener,
}

impl Master {
    /// Loads the users and starts listening.
    ///
    /// Workers are started as `program <worker_args> worker <login>`.
    pub fn start(
        reactor: &mut Reactor,
        config: &Config,
        program: PathBuf,
        worker_args: Vec<OsString>,
    ) -> Result<Self> {
        let mut users = UserDirectory::new(&config.users_file, program, worker_args);
        users.reload()?;

        let directory = Rc::new(RefCell::new(users));
        let shared: Rc<RefCell<dyn Directory>> = directory.clone();

        let game = proto::listen(reactor, config.game_port, Rc::clone(&shared))?;
        let websocket = websocket::listen(reactor, config.websocket_port, shared)?;

        let signals = Rc::clone(&directory);
        reactor.watch_signals(&[SIGINT, SIGTERM, SIGCHLD, SIGHUP], move |reactor, signo| {
            match signo {
                SIGCHLD => {
                    for child in reap_children() {
                        signals.borrow_mut().end_process(reactor, child.pid);
                    }
                }
                SIGHUP => {
                    if let Err(e) = signals.borrow_mut().reload() {
                        warn!(error = %e, "unable to reload users, keeping the previous list");
                    }
                }
                _ => {
                    info!(signo, "terminating on signal");
                    reactor.shutdown();
                }
            }
            Ok(())
        })?;

        Ok(Self {
            directory,
            game,
            websocket,
        })
    }

    /// The user directory.
    pub fn directory(&self) -> &Rc<RefCell<UserDirectory>> {
        &self.directory
    }

    /// Game port actually bound.
    pub fn game_port(&self) -> Result<u16> {
        Ok(self.game.local_addr()?.port())
    }

    /// WebSocket port actually bound.
    pub fn websocket_port(&self) -> Result<u16> {
        Ok(self.websocket.local_addr()?.port())
    }
}

/// Runs the master until it is told to stop.
pub fn run(config: &Config, program: PathBuf, worker_args: Vec<OsString>) -> Result<()> {
    let span = info_span!("master");
    let _guard = span.enter();

    let mut reactor = Reactor::new()?;
    let master = Master::start(&mut reactor, config, program, worker_args)?;

    info!(
        game_port = master.game_port()?,
        websocket_port = master.websocket_port()?,
        "started"
    );
    reactor.run()?;
    info!("terminating cleanly");
    Ok(())
}

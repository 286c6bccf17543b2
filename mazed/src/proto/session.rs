//! Per-user game session.
//!
//! A worker runs exactly one [`Session`]: every game connection handed to
//! it joins the session, and the first one to bind starts the level. All
//! connections then share that level, its deadline and its timers.

use super::connection::GameConnection;
use super::fault::Fault;
use super::line::{LineEnding, LineParser};
use super::phase::Bind;

use crate::display::{Button, Screen};
use crate::error::Result;
use crate::level::{Level, LevelCatalog, LevelContext, LevelTimers, PlayerId, Step};
use crate::net::{QUEUE_LIMIT, Socket, WeakSocket};
use crate::reactor::{Reactor, Shutdown};
use crate::utils::slab::{Key, Slab};
use crate::websocket::Hub;

use std::cell::RefCell;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Period of the spectator redraw timer.
pub const REDRAW_INTERVAL_MS: u64 = 200;

const RECORDING_FAILED: &str = "An unexpected error occurred while recording the result.";

struct ActiveLevel {
    code: String,
    level: Box<dyn Level>,
}

struct State {
    login: String,
    catalog: LevelCatalog,
    active: Option<ActiveLevel>,
    connections: Slab<Option<WeakSocket>>,
    bound: usize,
    waiting: bool,
    deadline: Option<Instant>,
    /// Time left when the session was paused.
    frozen: Option<Duration>,
    timers: LevelTimers,
    screen: Screen,
    /// The level changed since it was last drawn.
    dirty: bool,
    hub: Hub,
    shutdown: Shutdown,
    result_hook: Option<PathBuf>,
    queue_limit: usize,
}

impl State {
    fn time_left(&self) -> Option<Duration> {
        if self.frozen.is_some() {
            return self.frozen;
        }
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn live_connections(&self) -> Vec<Socket> {
        self.connections
            .iter()
            .filter_map(|(_, conn)| conn.as_ref().and_then(WeakSocket::upgrade))
            .collect()
    }

    fn start_level(
        &mut self,
        reactor: &mut Reactor,
        code: &str,
        session: Weak<RefCell<State>>,
    ) -> std::result::Result<(), Fault> {
        let Some(mut level) = self.catalog.open(code) else {
            info!(level = code, "unknown level");
            return Err(Fault::LevelUnknown);
        };
        info!(level = code, "starting level");

        let mut cx = LevelContext {
            reactor: &mut *reactor,
            timers: &mut self.timers,
        };
        if let Err(e) = level.start(&mut cx) {
            error!(level = code, error = %e, "level failed to start");
            self.timers.clear(reactor);
            return Err(Fault::Unserviceable);
        }

        reactor
            .timer_new(move |reactor, _, _| {
                if let Some(state) = session.upgrade() {
                    Session(state).redraw(reactor, false);
                }
                Ok(())
            })
            .and_then(|id| reactor.timer_arm(id, REDRAW_INTERVAL_MS, true))
            .map_err(|e| {
                error!(error = %e, "unable to start the redraw timer");
                Fault::Unserviceable
            })?;

        self.deadline = level.max_time().map(|max| Instant::now() + max);
        self.screen.set_button(Button::Kill, true);
        self.active = Some(ActiveLevel {
            code: code.to_string(),
            level,
        });

        Ok(())
    }

    fn bind(
        &mut self,
        reactor: &mut Reactor,
        code: &str,
        session: Weak<RefCell<State>>,
    ) -> std::result::Result<PlayerId, Fault> {
        match &self.active {
            Some(active) if active.code != code => return Err(Fault::LevelMismatch),
            Some(_) => {}
            None => self.start_level(reactor, code, session)?,
        }

        let Some(active) = self.active.as_mut() else {
            return Err(Fault::Unserviceable);
        };
        if self.bound >= active.level.max_connections() {
            return Err(Fault::TooManyConnections);
        }

        let player = active.level.join();
        self.bound += 1;
        self.dirty = true;
        Ok(player)
    }
}

/// The game state shared by all connections of one worker.
///
/// Cloned handles refer to the same session.
#[derive(Clone)]
pub struct Session(Rc<RefCell<State>>);

impl Session {
    /// A session for `login` with no level started yet.
    ///
    /// Spectators are reached through `hub`. `shutdown` is requested once
    /// the session has nothing left to serve.
    pub fn new(login: &str, catalog: LevelCatalog, hub: Hub, shutdown: Shutdown) -> Self {
        Self(Rc::new(RefCell::new(State {
            login: login.to_string(),
            catalog,
            active: None,
            connections: Slab::new(),
            bound: 0,
            waiting: false,
            deadline: None,
            frozen: None,
            timers: LevelTimers::new(),
            screen: Screen::new(),
            dirty: true,
            hub,
            shutdown,
            result_hook: None,
            queue_limit: QUEUE_LIMIT,
        })))
    }

    /// Runs `hook login code` whenever the level is solved.
    pub fn with_result_hook(self, hook: Option<PathBuf>) -> Self {
        self.0.borrow_mut().result_hook = hook;
        self
    }

    /// Bounds the outbound queue of every game connection.
    pub fn with_queue_limit(self, limit: usize) -> Self {
        self.0.borrow_mut().queue_limit = limit;
        self
    }

    pub fn login(&self) -> String {
        self.0.borrow().login.clone()
    }

    /// Code of the running level, once one was started.
    pub fn level_code(&self) -> Option<String> {
        self.0.borrow().active.as_ref().map(|active| active.code.clone())
    }

    /// Number of game connections, bound or not.
    pub fn connections(&self) -> usize {
        self.0.borrow().connections.len()
    }

    /// Number of connections bound to the level.
    pub fn bound(&self) -> usize {
        self.0.borrow().bound
    }

    /// Returns `true` while paused by `WAIT`.
    pub fn is_waiting(&self) -> bool {
        self.0.borrow().waiting
    }

    /// Time left to solve the level; `None` without a time limit.
    ///
    /// Frozen while the session waits.
    pub fn time_left(&self) -> Option<Duration> {
        self.0.borrow().time_left()
    }

    /// Returns `true` once the time limit has run out.
    pub fn is_expired(&self) -> bool {
        self.time_left() == Some(Duration::ZERO)
    }

    /// Takes over a game connection handed to this worker.
    ///
    /// `ending` is the terminator the connection used for `USER`. The
    /// connection is greeted with `DONE` and must bind a level next.
    pub fn add_client(&self, reactor: &mut Reactor, fd: OwnedFd, ending: LineEnding) -> Result<Socket> {
        let (slot, queue_limit) = {
            let mut state = self.0.borrow_mut();
            (state.connections.insert(None), state.queue_limit)
        };
        let seat = Seat {
            session: self.clone(),
            slot,
            player: None,
        };

        let handler = GameConnection::new(LineParser::with_ending(ending), Box::new(Bind::new(seat)));
        let socket = Socket::with_limit(reactor, fd, handler, queue_limit)?;

        if let Some(conn) = self.0.borrow_mut().connections.get_mut(slot) {
            *conn = Some(socket.downgrade());
        }
        info!(fd = socket.fd(), "game connection added");

        let mut greeting = b"DONE".to_vec();
        greeting.extend_from_slice(ending.as_bytes());
        if let Err(e) = socket.write(reactor, greeting) {
            warn!(fd = socket.fd(), error = %e, "unable to greet game connection");
            socket.close(reactor);
        }

        Ok(socket)
    }

    /// Binds a connection to level `code`, starting the level on the first
    /// bind.
    pub(crate) fn bind(&self, reactor: &mut Reactor, code: &str) -> std::result::Result<PlayerId, Fault> {
        let weak = Rc::downgrade(&self.0);
        self.0.borrow_mut().bind(reactor, code, weak)
    }

    /// Runs a query against the level. `None` before a level was started.
    pub(crate) fn query<R>(&self, f: impl FnOnce(&dyn Level) -> R) -> Option<R> {
        let state = self.0.borrow();
        state.active.as_ref().map(|active| f(active.level.as_ref()))
    }

    /// Moves `player` and marks the screen for redrawing.
    pub(crate) fn step(&self, player: PlayerId, direction: u8) -> Option<Step> {
        let mut state = self.0.borrow_mut();
        let step = state
            .active
            .as_mut()
            .map(|active| active.level.step(player, direction));
        state.dirty = true;
        step
    }

    /// Freezes the session until [`resume`](Self::resume).
    ///
    /// Reads on every game connection and every level timer are suspended,
    /// and the time left stops running. Pausing a waiting session does
    /// nothing.
    pub fn pause(&self, reactor: &mut Reactor) {
        let (sockets, timers) = {
            let mut state = self.0.borrow_mut();
            if state.waiting {
                return;
            }

            state.frozen = state.time_left();
            state.waiting = true;
            state.screen.set_button(Button::Wait, true);
            (state.live_connections(), state.timers.clone())
        };

        info!("session paused");
        timers.pause_all(reactor);
        for socket in &sockets {
            socket.pause(reactor);
        }
    }

    /// Undoes [`pause`](Self::pause). Resuming a running session does
    /// nothing.
    pub fn resume(&self, reactor: &mut Reactor) {
        let (sockets, timers) = {
            let mut state = self.0.borrow_mut();
            if !state.waiting {
                return;
            }

            if let Some(left) = state.frozen.take() {
                state.deadline = Some(Instant::now() + left);
            }
            state.waiting = false;
            state.screen.set_button(Button::Wait, false);
            (state.live_connections(), state.timers.clone())
        };

        info!("session resumed");
        for socket in &sockets {
            socket.resume(reactor);
        }
        timers.resume_all(reactor);
    }

    /// Sends the screen to the spectators if it changed, or unconditionally
    /// with `force`.
    pub fn redraw(&self, reactor: &mut Reactor, force: bool) {
        let (frame, hub) = {
            let mut guard = self.0.borrow_mut();
            let state = &mut *guard;

            let seconds = state
                .time_left()
                .map(|left| u32::try_from(left.as_millis().div_ceil(1000)).unwrap_or(u32::MAX));
            state.screen.set_seconds(seconds);

            if state.dirty {
                if let Some(active) = &state.active {
                    active.level.redraw(&mut state.screen);
                }
                state.dirty = false;
            }

            let frame = if force {
                Some(state.screen.force_commit())
            } else {
                state.screen.commit()
            };
            (frame, state.hub.clone())
        };

        if let Some(frame) = frame {
            hub.broadcast(reactor, &frame);
        }
    }

    /// Records a win and returns the message to close the connection with.
    pub(crate) fn report_win(&self, message: String) -> String {
        let (hook, login, code) = {
            let state = self.0.borrow();
            (
                state.result_hook.clone(),
                state.login.clone(),
                state.active.as_ref().map(|a| a.code.clone()).unwrap_or_default(),
            )
        };

        let Some(hook) = hook else {
            info!(login = %login, level = %code, "level solved");
            return message;
        };

        match run_result_hook(&hook, &login, &code) {
            Ok(Some(report)) => report,
            Ok(None) => message,
            Err(reason) => {
                error!(login = %login, level = %code, hook = %hook.display(), %reason, "error recording the result");
                RECORDING_FAILED.to_string()
            }
        }
    }

    fn release(&self, slot: Key, player: Option<PlayerId>) {
        let Ok(mut state) = self.0.try_borrow_mut() else {
            warn!("session busy while releasing a connection");
            return;
        };

        state.connections.remove(slot);
        if let Some(player) = player {
            state.bound = state.bound.saturating_sub(1);
            if let Some(active) = state.active.as_mut() {
                active.level.leave(player);
            }
            state.dirty = true;
        }

        if state.connections.is_empty() || player.is_some() {
            info!(bound = player.is_some(), "game connection closed, ending the session");
            state.shutdown.request();
        }
    }
}

/// Runs the result hook and interprets its output.
///
/// `Ok(Some(report))` replaces the win message, `Ok(None)` keeps it.
fn run_result_hook(hook: &Path, login: &str, code: &str) -> std::result::Result<Option<String>, String> {
    info!(hook = %hook.display(), login, level = code, "winner, running the result hook");

    let output = Command::new(hook)
        .args([login, code])
        .output()
        .map_err(|e| e.to_string())?;
    if !output.status.success() {
        return Err(format!("exited with {}", output.status));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if let Some(report) = stdout.strip_prefix("REPORT: ") {
        let report = report.strip_suffix('\n').unwrap_or(report);
        if report.is_empty() {
            return Err("empty report received".to_string());
        }
        info!(report, "reporting");
        return Ok(Some(report.to_string()));
    }
    if stdout.starts_with("ERROR: ") {
        return Err(stdout.trim_end().to_string());
    }
    if stdout.starts_with("OK") {
        return Ok(None);
    }

    Err(format!("unexpected output: {}", stdout.trim_end()))
}

/// A connection's place in the session, released when the connection is
/// destroyed.
pub(crate) struct Seat {
    session: Session,
    slot: Key,
    player: Option<PlayerId>,
}

impl Seat {
    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn player(&self) -> Option<PlayerId> {
        self.player
    }

    pub(crate) fn set_player(&mut self, player: PlayerId) {
        self.player = Some(player);
    }
}

impl Drop for Seat {
    fn drop(&mut self) {
        self.session.release(self.slot, self.player);
    }
}

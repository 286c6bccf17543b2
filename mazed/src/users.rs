//! User directory and worker processes.
//!
//! The master knows its users from a plain text file, one login per line.
//! Each user gets at most one worker process, started the first time one of
//! their connections has to be handed over. The worker's stderr is one end
//! of a socket pair: the master sends descriptors through it and relays
//! whatever the worker logs.

use crate::error::{Error, Result};
use crate::ipc::Directory;
use crate::net::{self, Socket, SocketHandler};
use crate::reactor::Reactor;

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{error, info, warn};

/// Longest login; longer lines are truncated.
pub const LOGIN_MAX: usize = 30;

const READ_CHUNK: usize = 1024;

/// A running worker.
struct Worker {
    pid: libc::pid_t,
    pipe: Socket,
}

#[derive(Default)]
struct User {
    worker: Option<Worker>,
}

/// The set of known users and their workers.
pub struct UserDirectory {
    path: PathBuf,
    program: PathBuf,
    /// Passed to every worker before `worker <login>`.
    worker_args: Vec<OsString>,
    users: HashMap<String, User>,
    /// Users removed by a reload, kept while their worker runs.
    inactive: HashMap<String, User>,
}

impl UserDirectory {
    /// A directory backed by `path`, spawning workers as `program`.
    ///
    /// Nothing is read until [`reload`](Self::reload).
    pub fn new(path: impl Into<PathBuf>, program: impl Into<PathBuf>, worker_args: Vec<OsString>) -> Self {
        Self {
            path: path.into(),
            program: program.into(),
            worker_args,
            users: HashMap::new(),
            inactive: HashMap::new(),
        }
    }

    /// The users file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the users file.
    ///
    /// Users that disappeared keep their running worker until it exits, but
    /// are no longer accepted. Users that come back get their worker back.
    pub fn reload(&mut self) -> Result<()> {
        info!(path = %self.path.display(), "reloading users");
        let content = fs::read(&self.path)?;

        let before = self.inactive.len();
        self.inactive.extend(self.users.drain());
        let mut added = 0;

        for login in parse_logins(&content) {
            if self.users.contains_key(&login) {
                warn!(login = %login, path = %self.path.display(), "duplicate login");
                continue;
            }

            let user = self.inactive.remove(&login).unwrap_or_else(|| {
                added += 1;
                User::default()
            });
            self.users.insert(login, user);
        }

        self.inactive.retain(|_, user| user.worker.is_some());
        info!(
            users = self.users.len(),
            new = added,
            inactive_before = before,
            inactive_after = self.inactive.len(),
            "users reloaded"
        );
        Ok(())
    }

    /// Number of accepted logins.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Returns `true` if `login` has a running worker.
    pub fn has_worker(&self, login: &str) -> bool {
        self.users.get(login).is_some_and(|user| user.worker.is_some())
    }

    /// Starts a worker for `login`.
    pub fn spawn(&mut self, reactor: &mut Reactor, login: &str) -> Result<Socket> {
        let user = self
            .users
            .get_mut(login)
            .ok_or_else(|| Error::UnknownUser(login.to_string()))?;

        let (ours, theirs) = net::socket_pair()?;
        let child = Command::new(&self.program)
            .args(&self.worker_args)
            .arg("worker")
            .arg(login)
            .stderr(Stdio::from(theirs))
            .spawn()?;
        let pid = libc::pid_t::try_from(child.id()).unwrap_or(libc::pid_t::MAX);

        let pipe = Socket::add(
            reactor,
            ours,
            WorkerOutput {
                login: login.to_string(),
            },
        )?;
        info!(login, pid, fd = pipe.fd(), "worker started");

        user.worker = Some(Worker {
            pid,
            pipe: pipe.clone(),
        });
        Ok(pipe)
    }

    /// Forgets the worker with `pid` after it exited.
    pub fn end_process(&mut self, reactor: &mut Reactor, pid: libc::pid_t) {
        let found = self
            .users
            .iter_mut()
            .chain(self.inactive.iter_mut())
            .find(|(_, user)| user.worker.as_ref().is_some_and(|w| w.pid == pid));

        let Some((login, user)) = found else {
            error!(pid, "unknown pid reported as terminated");
            return;
        };

        if let Some(worker) = user.worker.take() {
            worker.pipe.close(reactor);
        }
        info!(login = %login, pid, "worker terminated");

        self.inactive.retain(|_, user| user.worker.is_some());
    }
}

impl Directory for UserDirectory {
    fn user_exists(&self, login: &str) -> bool {
        self.users.contains_key(login)
    }

    fn worker_pipe(&mut self, reactor: &mut Reactor, login: &str) -> Option<Socket> {
        if let Some(worker) = self.users.get(login)?.worker.as_ref() {
            return Some(worker.pipe.clone());
        }

        match self.spawn(reactor, login) {
            Ok(pipe) => Some(pipe),
            Err(e) => {
                error!(login, error = %e, "unable to start worker");
                None
            }
        }
    }
}

/// Splits a users file into logins.
///
/// Every line is one login, cut to [`LOGIN_MAX`] bytes. Blank lines are
/// skipped.
pub fn parse_logins(content: &[u8]) -> Vec<String> {
    content
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(|line| {
            let line = &line[..line.len().min(LOGIN_MAX)];
            String::from_utf8_lossy(line).into_owned()
        })
        .collect()
}

/// Relays a worker's log output to our own stderr.
struct WorkerOutput {
    login: String,
}

impl SocketHandler for WorkerOutput {
    fn readable(&mut self, _reactor: &mut Reactor, socket: &Socket) {
        let mut buf = [0u8; READ_CHUNK];
        let mut stderr = io::stderr().lock();

        loop {
            let n = socket.read(&mut buf);
            if n == 0 {
                return;
            }
            if let Err(e) = stderr.write_all(&buf[..n]) {
                warn!(login = %self.login, error = %e, "unable to relay worker output");
                return;
            }
        }
    }
}

//! # mazed
//!
//! **mazed** is the network core of a multi-tenant maze game. One master
//! process accepts every connection; each user is served by a dedicated
//! worker process that receives that user's connections as passed file
//! descriptors.
//!
//! The crate provides:
//!
//! - A **single-threaded epoll reactor** with pausable timers and signal delivery
//! - **Managed sockets** with a bounded write queue and descriptor passing
//! - The **line protocol** clients play the game with
//! - A **WebSocket** channel for live spectators
//! - The **master/worker plumbing**: user directory, worker spawning and handoff
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mazed::config::Config;
//!
//! let config = Config::load(None)?;
//! mazed::master::run(&config, std::env::current_exe()?, Vec::new())?;
//! ```
//!
//! ## Modules
//!
//! - [`reactor`]: event loop, timers, signals
//! - [`net`]: managed sockets and listeners
//! - [`proto`]: line protocol and game sessions
//! - [`websocket`]: handshake, framing, spectator hub
//! - [`ipc`]: descriptor handoff between master and workers
//! - [`level`]: level interface and built-in levels
//! - [`display`]: spectator screen encoding

pub mod config;
pub mod display;
pub mod error;
pub mod ipc;
pub mod level;
pub mod logging;
pub mod master;
pub mod net;
pub mod proto;
pub mod reactor;
pub mod users;
pub mod websocket;
pub mod worker;

pub(crate) mod utils;

pub use error::{Error, Result};

//! Platform-specific readiness poller and system call wrappers.
//!
//! Only Linux is supported: the reactor relies on `epoll`, `timerfd` and
//! `signalfd`, and the fd handoff relies on `SCM_RIGHTS`.

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(target_os = "linux")]
pub(crate) mod linux;

#[cfg(target_os = "linux")]
pub(crate) use linux as platform;

use libc::{
    AF_INET, AF_INET6, AF_UNIX, IPPROTO_IPV6, IPV6_V6ONLY, MSG_CMSG_CLOEXEC,
    MSG_DONTWAIT, MSG_NOSIGNAL, SFD_CLOEXEC, SFD_NONBLOCK, SO_REUSEADDR,
    SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_STREAM, SOL_SOCKET, TFD_CLOEXEC, TFD_NONBLOCK, WNOHANG,
    accept4, bind, c_int, c_void, iovec, itimerspec, listen, msghdr, recvmsg, sendmsg,
    setsockopt, sigset_t, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socket,
    socketpair, socklen_t, timespec,
};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use std::{io, mem, ptr};

/// Converts a negative return code into the current OS error.
fn check(rc: c_int) -> io::Result<c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

/// Creates a non-blocking, close-on-exec stream socket.
pub(crate) fn sys_socket(domain: c_int) -> io::Result<OwnedFd> {
    let fd = check(unsafe { socket(domain, SOCK_STREAM | SOCK_NONBLOCK | SOCK_CLOEXEC, 0) })?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Creates a connected pair of Unix stream sockets, both close-on-exec.
pub(crate) fn sys_socketpair() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [c_int; 2] = [-1, -1];
    check(unsafe { socketpair(AF_UNIX, SOCK_STREAM | SOCK_CLOEXEC, 0, fds.as_mut_ptr()) })?;
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

fn set_int_option(fd: RawFd, level: c_int, name: c_int, value: c_int) -> io::Result<()> {
    check(unsafe {
        setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        )
    })?;
    Ok(())
}

/// Enables `SO_REUSEADDR` on a socket.
pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    set_int_option(fd, SOL_SOCKET, SO_REUSEADDR, 1)
}

/// Sets the `IPV6_V6ONLY` socket option.
pub(crate) fn sys_set_v6only(fd: RawFd, v6only: bool) -> io::Result<()> {
    set_int_option(fd, IPPROTO_IPV6, IPV6_V6ONLY, v6only as c_int)
}

/// Binds a socket to an address.
pub(crate) fn sys_bind(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);
    check(unsafe { bind(fd, &storage as *const _ as *const sockaddr, len) })?;
    Ok(())
}

/// Marks a socket as a listening socket.
pub(crate) fn sys_listen(fd: RawFd) -> io::Result<()> {
    check(unsafe { listen(fd, 128) })?;
    Ok(())
}

/// Accepts one pending connection.
///
/// The returned socket is already non-blocking and close-on-exec.
pub(crate) fn sys_accept(fd: RawFd) -> io::Result<(OwnedFd, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let client = check(unsafe {
        accept4(
            fd,
            &mut storage as *mut _ as *mut sockaddr,
            &mut len,
            SOCK_NONBLOCK | SOCK_CLOEXEC,
        )
    })?;
    let client = unsafe { OwnedFd::from_raw_fd(client) };

    let addr = sockaddr_storage_to_socketaddr(&storage)?;
    Ok((client, addr))
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    check(unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
    sockaddr_storage_to_socketaddr(&storage)
}

/// Sends `data` with an optional control message in one `sendmsg` call.
///
/// Never raises `SIGPIPE`; a closed peer is reported as `EPIPE`.
pub(crate) fn sys_sendmsg(fd: RawFd, data: &[u8], control: Option<&[u8]>) -> io::Result<usize> {
    let mut iov = iovec {
        iov_base: data.as_ptr() as *mut c_void,
        iov_len: data.len(),
    };

    let mut msg: msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    if let Some(control) = control {
        msg.msg_control = control.as_ptr() as *mut c_void;
        msg.msg_controllen = control.len() as _;
    }

    let n = unsafe { sendmsg(fd, &msg, MSG_NOSIGNAL | MSG_DONTWAIT) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Receives into `data`, collecting ancillary data into `control`.
///
/// Returns the number of data bytes and the number of control bytes.
/// Passed descriptors are received close-on-exec.
pub(crate) fn sys_recvmsg(
    fd: RawFd,
    data: &mut [u8],
    control: &mut [u8],
) -> io::Result<(usize, usize)> {
    let mut iov = iovec {
        iov_base: data.as_mut_ptr() as *mut c_void,
        iov_len: data.len(),
    };

    let mut msg: msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    if !control.is_empty() {
        msg.msg_control = control.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = control.len() as _;
    }

    let n = unsafe { recvmsg(fd, &mut msg, MSG_CMSG_CLOEXEC | MSG_DONTWAIT) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok((n as usize, msg.msg_controllen as usize))
}

/// Converts a `sockaddr_storage` to a Rust `SocketAddr`.
///
/// IPv4-mapped IPv6 peers of a dual-stack listener are reported as IPv4.
pub(crate) fn sockaddr_storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);

            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }

        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);

            if let Some(v4) = ip.to_ipv4_mapped() {
                return Ok(SocketAddr::V4(SocketAddrV4::new(v4, port)));
            }

            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }

        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

/// Converts a `SocketAddr` to a `sockaddr_storage`.
pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

/// Creates a non-blocking, close-on-exec monotonic `timerfd`.
pub(crate) fn sys_timerfd() -> io::Result<OwnedFd> {
    let fd = check(unsafe {
        libc::timerfd_create(libc::CLOCK_MONOTONIC, TFD_NONBLOCK | TFD_CLOEXEC)
    })?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn to_timespec(d: Duration) -> timespec {
    timespec {
        tv_sec: d.as_secs() as _,
        tv_nsec: d.subsec_nanos() as _,
    }
}

fn from_timespec(ts: &timespec) -> Duration {
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

/// Arms a `timerfd`. A zero `value` disarms it.
pub(crate) fn sys_timer_set(fd: &OwnedFd, value: Duration, interval: Duration) -> io::Result<()> {
    let spec = itimerspec {
        it_interval: to_timespec(interval),
        it_value: to_timespec(value),
    };

    check(unsafe { libc::timerfd_settime(fd.as_raw_fd(), 0, &spec, ptr::null_mut()) })?;
    Ok(())
}

/// Returns the time left until the next expiration of a `timerfd`.
pub(crate) fn sys_timer_remaining(fd: &OwnedFd) -> io::Result<Duration> {
    let mut spec: itimerspec = unsafe { mem::zeroed() };
    check(unsafe { libc::timerfd_gettime(fd.as_raw_fd(), &mut spec) })?;
    Ok(from_timespec(&spec.it_value))
}

/// Reads the expiration counter of a `timerfd`.
///
/// Returns 0 when the timer has not expired since the last read.
pub(crate) fn sys_timer_read(fd: &OwnedFd) -> io::Result<u64> {
    let mut count: u64 = 0;
    let n = unsafe {
        libc::read(
            fd.as_raw_fd(),
            &mut count as *mut u64 as *mut c_void,
            mem::size_of::<u64>(),
        )
    };

    if n < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(0);
        }
        return Err(err);
    }

    Ok(count)
}

fn sigset(signals: &[c_int]) -> io::Result<sigset_t> {
    let mut set: sigset_t = unsafe { mem::zeroed() };
    check(unsafe { libc::sigemptyset(&mut set) })?;
    for &signo in signals {
        check(unsafe { libc::sigaddset(&mut set, signo) })?;
    }
    Ok(set)
}

/// Blocks `signals` for the calling thread and returns a `signalfd`
/// delivering them.
pub(crate) fn sys_signalfd(signals: &[c_int]) -> io::Result<OwnedFd> {
    let set = sigset(signals)?;

    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }

    let fd = check(unsafe { libc::signalfd(-1, &set, SFD_NONBLOCK | SFD_CLOEXEC) })?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Reads one pending signal from a `signalfd`.
///
/// Returns `None` when no signal is pending.
pub(crate) fn sys_signal_read(fd: &OwnedFd) -> io::Result<Option<c_int>> {
    let mut info: libc::signalfd_siginfo = unsafe { mem::zeroed() };
    let size = mem::size_of::<libc::signalfd_siginfo>();

    let n = unsafe { libc::read(fd.as_raw_fd(), &mut info as *mut _ as *mut c_void, size) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(None);
        }
        return Err(err);
    }
    if n as usize != size {
        return Ok(None);
    }

    Ok(Some(info.ssi_signo as c_int))
}

/// Collects one exited child without blocking.
///
/// Returns `None` when no child has exited (or there are no children).
pub(crate) fn sys_reap_child() -> Option<(libc::pid_t, c_int)> {
    let mut status: c_int = 0;
    let pid = unsafe { libc::waitpid(-1, &mut status, WNOHANG) };

    if pid <= 0 { None } else { Some((pid, status)) }
}

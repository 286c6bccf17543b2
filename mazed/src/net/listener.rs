use super::socket::{Socket, SocketHandler};

use crate::error::Result;
use crate::reactor::platform::{
    sys_accept, sys_bind, sys_listen, sys_set_reuseaddr, sys_set_v6only, sys_socket, sys_sockname,
};
use crate::reactor::{Dispatch, Interest, Reactor, Ready, Token};

use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::os::fd::{AsRawFd, OwnedFd};
use tracing::{info, warn};

/// A bound, listening TCP socket registered with the reactor.
///
/// Every accepted connection becomes a [`Socket`] whose handler is built by
/// the listener's factory.
pub struct Listener {
    /// Listening descriptor.
    fd: OwnedFd,

    /// Reactor registration.
    token: Token,
}

impl Listener {
    /// Listens on `port` on all interfaces, IPv4 and IPv6 alike.
    ///
    /// The socket is dual-stack (`IPV6_V6ONLY` off) with `SO_REUSEADDR`.
    /// Port 0 picks an ephemeral port, see [`local_addr`](Self::local_addr).
    pub fn bind<F, H>(reactor: &mut Reactor, port: u16, factory: F) -> Result<Self>
    where
        F: FnMut(&mut Reactor, SocketAddr) -> H + 'static,
        H: SocketHandler + 'static,
    {
        let address = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0));
        Self::bind_addr(reactor, address, factory)
    }

    /// Listens on an explicit address.
    pub fn bind_addr<F, H>(reactor: &mut Reactor, address: SocketAddr, mut factory: F) -> Result<Self>
    where
        F: FnMut(&mut Reactor, SocketAddr) -> H + 'static,
        H: SocketHandler + 'static,
    {
        let domain = match address {
            SocketAddr::V4(_) => libc::AF_INET,
            SocketAddr::V6(_) => libc::AF_INET6,
        };

        let fd = sys_socket(domain)?;
        let raw = fd.as_raw_fd();

        sys_set_reuseaddr(raw)?;
        if domain == libc::AF_INET6 {
            sys_set_v6only(raw, false)?;
        }
        sys_bind(raw, &address)?;
        sys_listen(raw)?;

        let watcher = move |reactor: &mut Reactor, _: Ready| -> Result<Dispatch> {
            accept_all(reactor, raw, &mut factory);
            Ok(Dispatch::Continue)
        };
        let token = reactor.watch(raw, Interest::READ, watcher)?;

        info!(%address, "listening");
        Ok(Self { fd, token })
    }

    /// Returns the local address, useful after binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(sys_sockname(self.fd.as_raw_fd())?)
    }

    /// Stops accepting and closes the listening socket.
    pub fn close(self, reactor: &mut Reactor) {
        reactor.unwatch(self.token);
    }
}

/// Accepts every pending connection.
fn accept_all<F, H>(reactor: &mut Reactor, listener: i32, factory: &mut F)
where
    F: FnMut(&mut Reactor, SocketAddr) -> H,
    H: SocketHandler + 'static,
{
    loop {
        let (fd, peer) = match sys_accept(listener) {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "accept failed");
                return;
            }
        };

        let raw = fd.as_raw_fd();
        info!(fd = raw, %peer, "new connection");

        let handler = factory(reactor, peer);
        if let Err(e) = Socket::add(reactor, fd, handler) {
            warn!(fd = raw, error = %e, "unable to manage accepted connection");
        }
    }
}

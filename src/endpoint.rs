//! A reference-counted wrapper over one network socket, shared among
//! sibling clients. Closes itself deterministically when the last user
//! detaches.

use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{Result, StatsdError};

enum Socket {
    Datagram(UdpSocket),
    Stream(Mutex<TcpStream>),
}

struct EndpointInner {
    socket: Socket,
    closed: AtomicBool,
}

impl EndpointInner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing statsd endpoint");
        if let Socket::Stream(stream) = &self.socket {
            if let Ok(guard) = stream.lock() {
                let _ = guard.shutdown(Shutdown::Both);
            }
        }
    }
}

impl Drop for EndpointInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// One OS socket, shared by reference among any number of clients.
///
/// `Endpoint::attach` (a cheap `Arc` clone) and dropping a handle (`detach`)
/// together realize the refcounted attach/detach contract: the socket is
/// released exactly when the last handle is dropped, with no dependence on
/// finalizer ordering since Rust's `Drop` runs deterministically.
///
/// Opaque outside the crate: it appears in [`crate::Transport`]'s signature
/// only so `Client<T>` can drive a transport generically, not as something
/// callers construct directly.
#[derive(Clone)]
pub struct Endpoint(Arc<EndpointInner>);

impl Endpoint {
    pub(crate) fn open_datagram(target: SocketAddr) -> Result<Self> {
        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)?;
        debug!(%target, "opened statsd datagram endpoint");
        Ok(Endpoint(Arc::new(EndpointInner {
            socket: Socket::Datagram(socket),
            closed: AtomicBool::new(false),
        })))
    }

    pub(crate) fn open_stream(target: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(target)?;
        debug!(%target, "opened statsd stream endpoint");
        Ok(Endpoint(Arc::new(EndpointInner {
            socket: Socket::Stream(Mutex::new(stream)),
            closed: AtomicBool::new(false),
        })))
    }

    /// Attach an additional user of this endpoint; just a cheap `Arc` clone.
    pub(crate) fn attach(&self) -> Self {
        self.clone()
    }

    pub(crate) fn send_datagram(&self, bytes: &[u8], addr: SocketAddr) -> Result<()> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(StatsdError::EndpointClosed);
        }
        match &self.0.socket {
            Socket::Datagram(socket) => {
                socket.send_to(bytes, addr)?;
                Ok(())
            }
            Socket::Stream(_) => unreachable!("datagram send on a stream endpoint"),
        }
    }

    pub(crate) fn send_stream(&self, bytes: &[u8]) -> Result<()> {
        use std::io::Write;
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(StatsdError::EndpointClosed);
        }
        match &self.0.socket {
            Socket::Stream(stream) => {
                let mut guard = stream
                    .lock()
                    .map_err(|_| StatsdError::EndpointClosed)?;
                guard.write_all(bytes)?;
                Ok(())
            }
            Socket::Datagram(_) => unreachable!("stream send on a datagram endpoint"),
        }
    }
}

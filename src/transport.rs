//! The two transport kinds a client can be built over: connectionless
//! datagram and connection-oriented stream. Each client is generic over one
//! of these, composing capability rather than using deep inheritance.

use std::net::SocketAddr;

use crate::endpoint::Endpoint;
use crate::error::Result;

/// A transport capability. Implemented by the zero-sized marker types
/// [`Datagram`] and [`Stream`]. `open`/`write` are crate-internal plumbing,
/// exposed on the trait only so `Client<T>` can drive them generically.
pub trait Transport: Send + Sync + 'static {
    /// Open a fresh endpoint connected/bound for sending to `target`.
    fn open(target: SocketAddr) -> Result<Endpoint>;

    /// Write one frame through `endpoint` to `target`.
    fn write(endpoint: &Endpoint, target: SocketAddr, frame: &[u8]) -> Result<()>;

    /// Whether a host/port change should force the endpoint to be dropped
    /// (stream transports must reconnect to the new destination; datagram
    /// transports keep the socket open since the destination is per-packet).
    const RECONNECT_ON_READDRESS: bool;
}

/// Sends each frame as one datagram to the resolved address. No
/// fragmentation is performed; a frame must fit in a single send.
#[derive(Debug, Clone, Copy, Default)]
pub struct Datagram;

impl Transport for Datagram {
    fn open(target: SocketAddr) -> Result<Endpoint> {
        Endpoint::open_datagram(target)
    }

    fn write(endpoint: &Endpoint, target: SocketAddr, frame: &[u8]) -> Result<()> {
        endpoint.send_datagram(frame, target)
    }

    const RECONNECT_ON_READDRESS: bool = false;
}

/// Sends length-delimited frames over a persistent stream connection,
/// terminated by a single newline.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stream;

impl Transport for Stream {
    fn open(target: SocketAddr) -> Result<Endpoint> {
        Endpoint::open_stream(target)
    }

    fn write(endpoint: &Endpoint, _target: SocketAddr, frame: &[u8]) -> Result<()> {
        // A batched frame already ends in `\n` (each packed metric carries
        // its own terminator); a direct single-metric frame does not. Write
        // exactly one trailing newline either way, in a single atomic call.
        if frame.ends_with(b"\n") {
            endpoint.send_stream(frame)
        } else {
            let mut buf = Vec::with_capacity(frame.len() + 1);
            buf.extend_from_slice(frame);
            buf.push(b'\n');
            endpoint.send_stream(&buf)
        }
    }

    const RECONNECT_ON_READDRESS: bool = true;
}

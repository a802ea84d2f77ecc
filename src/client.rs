//! The base client: host, port, optional prefix, cached resolved address,
//! and a reference to a shared endpoint. Submission operations live here;
//! framing is delegated to the `Transport` the client is generic over.

use std::marker::PhantomData;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::batch::BatchBuffer;
use crate::endpoint::Endpoint;
use crate::error::{Result, StatsdError};
use crate::metric::{normalize_metric_name, Metric};
use crate::sampler::should_send;
use crate::transport::{Datagram, Stream, Transport};

/// Default StatsD server port.
pub const DEFAULT_PORT: u16 = 8125;

/// Default batch size, in bytes, for [`Client::batch_client`].
pub const DEFAULT_BATCH_SIZE: usize = 512;

pub(crate) fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(StatsdError::InvalidArgument(
            "port must be in 1..65535".into(),
        ));
    }
    Ok(())
}

/// A plain-data description of how to reach a statsd server, suitable for
/// loading from a host application's own configuration file.
///
/// ```
/// use statsdmetrics::ClientConfig;
///
/// let config = ClientConfig::builder("127.0.0.1", 8125)
///     .prefix("myapp.")
///     .batch_size(512)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl ClientConfig {
    pub fn builder(host: impl Into<String>, port: u16) -> ClientBuilder {
        ClientBuilder::new(host, port)
    }
}

/// Builder for [`ClientConfig`], mirroring the teacher's
/// `ClientConfigBuilder`.
pub struct ClientBuilder {
    host: String,
    port: u16,
    prefix: String,
    batch_size: Option<usize>,
}

impl ClientBuilder {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientBuilder {
            host: host.into(),
            port,
            prefix: String::new(),
            batch_size: None,
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn build(self) -> ClientConfig {
        ClientConfig {
            host: self.host,
            port: self.port,
            prefix: self.prefix,
            batch_size: self.batch_size,
        }
    }
}

pub(crate) struct ClientCore {
    host: RwLock<String>,
    port: RwLock<u16>,
    prefix: String,
    resolved: RwLock<Option<SocketAddr>>,
    endpoint: Mutex<Option<Endpoint>>,
}

impl ClientCore {
    pub(crate) fn new(host: String, port: u16, prefix: String) -> Self {
        ClientCore {
            host: RwLock::new(host),
            port: RwLock::new(port),
            prefix,
            resolved: RwLock::new(None),
            endpoint: Mutex::new(None),
        }
    }

    pub(crate) fn host(&self) -> String {
        self.host.read().unwrap().clone()
    }

    pub(crate) fn port(&self) -> u16 {
        *self.port.read().unwrap()
    }

    pub(crate) fn set_host(&self, host: String) {
        *self.host.write().unwrap() = host;
        *self.resolved.write().unwrap() = None;
    }

    pub(crate) fn set_port(&self, port: u16) {
        *self.port.write().unwrap() = port;
        *self.resolved.write().unwrap() = None;
    }

    pub(crate) fn disconnect(&self) {
        *self.endpoint.lock().unwrap() = None;
    }

    /// Snapshot of this core's cached address and endpoint, used when
    /// spawning a batch sibling: later changes to the parent no longer
    /// affect the sibling.
    pub(crate) fn snapshot(&self) -> ClientCore {
        ClientCore {
            host: RwLock::new(self.host()),
            port: RwLock::new(self.port()),
            prefix: self.prefix.clone(),
            resolved: RwLock::new(*self.resolved.read().unwrap()),
            endpoint: Mutex::new(self.endpoint.lock().unwrap().as_ref().map(Endpoint::attach)),
        }
    }

    pub(crate) fn resolved_address(&self) -> Result<SocketAddr> {
        if let Some(addr) = *self.resolved.read().unwrap() {
            return Ok(addr);
        }
        let host = self.host();
        let port = self.port();
        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|source| StatsdError::ResolutionFailed {
                host: host.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| StatsdError::ResolutionFailed {
                host: host.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved"),
            })?;
        *self.resolved.write().unwrap() = Some(addr);
        Ok(addr)
    }

    pub(crate) fn endpoint_for<T: Transport>(&self, addr: SocketAddr) -> Result<Endpoint> {
        let mut guard = self.endpoint.lock().unwrap();
        if let Some(endpoint) = guard.as_ref() {
            return Ok(endpoint.attach());
        }
        let endpoint = T::open(addr)?;
        *guard = Some(endpoint.attach());
        Ok(endpoint)
    }

    pub(crate) fn final_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, normalize_metric_name(name))
    }
}

/// A statsd client generic over its transport (see [`Datagram`] and
/// [`Stream`]). Cheaply `Clone`-able: clones share the same host/port/prefix
/// state and endpoint, so a single client can be used concurrently from
/// multiple threads.
pub struct Client<T: Transport> {
    pub(crate) core: Arc<ClientCore>,
    _transport: PhantomData<T>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Client {
            core: Arc::clone(&self.core),
            _transport: PhantomData,
        }
    }
}

/// A client sending one datagram per frame.
pub type DatagramClient = Client<Datagram>;
/// A client sending length-delimited frames over a persistent connection.
pub type StreamClient = Client<Stream>;

impl<T: Transport> Client<T> {
    pub fn new(host: impl Into<String>, port: u16, prefix: impl Into<String>) -> Result<Self> {
        validate_port(port)?;
        Ok(Client {
            core: Arc::new(ClientCore::new(host.into(), port, prefix.into())),
            _transport: PhantomData,
        })
    }

    /// Build a client from a [`ClientConfig`], e.g. one loaded from a host
    /// application's own configuration file.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Client::new(config.host.clone(), config.port, config.prefix.clone())
    }

    pub fn host(&self) -> String {
        self.core.host()
    }

    pub fn port(&self) -> u16 {
        self.core.port()
    }

    /// Changing `host` invalidates the cached resolved address. For a
    /// [`Stream`] transport this additionally disconnects, since the
    /// endpoint is bound to the previous destination.
    pub fn set_host(&self, host: impl Into<String>) {
        self.core.set_host(host.into());
        if T::RECONNECT_ON_READDRESS {
            self.core.disconnect();
        }
    }

    /// Changing `port` invalidates the cached resolved address, with the
    /// same per-transport reconnection behavior as [`Client::set_host`].
    pub fn set_port(&self, port: u16) -> Result<()> {
        validate_port(port)?;
        self.core.set_port(port);
        if T::RECONNECT_ON_READDRESS {
            self.core.disconnect();
        }
        Ok(())
    }

    /// Force a fresh endpoint on the next send, to the same address. Unlike
    /// [`Client::set_host`]/[`Client::set_port`], this disconnects
    /// unconditionally regardless of transport, e.g. to recover from a
    /// suspected dead stream connection.
    pub fn reconnect(&self) {
        self.core.disconnect();
    }

    pub fn increment(&self, name: &str) -> Result<()> {
        self.increment_sampled(name, 1, 1.0)
    }

    pub fn increment_by(&self, name: &str, count: i64) -> Result<()> {
        self.increment_sampled(name, count, 1.0)
    }

    pub fn increment_sampled(&self, name: &str, count: i64, rate: f64) -> Result<()> {
        self.counter(name, count, rate)
    }

    pub fn decrement(&self, name: &str) -> Result<()> {
        self.decrement_sampled(name, 1, 1.0)
    }

    pub fn decrement_by(&self, name: &str, count: i64) -> Result<()> {
        self.decrement_sampled(name, count, 1.0)
    }

    pub fn decrement_sampled(&self, name: &str, count: i64, rate: f64) -> Result<()> {
        self.counter(name, -count, rate)
    }

    fn counter(&self, name: &str, count: i64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        let metric = Metric::counter(self.core.final_name(name), count, rate)?;
        self.dispatch(&metric)
    }

    pub fn timing(&self, name: &str, milliseconds: f64) -> Result<()> {
        self.timing_sampled(name, milliseconds, 1.0)
    }

    pub fn timing_sampled(&self, name: &str, milliseconds: f64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        let metric = Metric::timer(self.core.final_name(name), milliseconds, rate)?;
        self.dispatch(&metric)
    }

    pub fn gauge(&self, name: &str, value: f64) -> Result<()> {
        self.gauge_sampled(name, value, 1.0)
    }

    pub fn gauge_sampled(&self, name: &str, value: f64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        let metric = Metric::gauge(self.core.final_name(name), value, rate)?;
        self.dispatch(&metric)
    }

    pub fn gauge_delta(&self, name: &str, delta: f64) -> Result<()> {
        self.gauge_delta_sampled(name, delta, 1.0)
    }

    pub fn gauge_delta_sampled(&self, name: &str, delta: f64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        let metric = Metric::gauge_delta(self.core.final_name(name), delta, rate)?;
        self.dispatch(&metric)
    }

    pub fn set(&self, name: &str, value: impl Into<String>) -> Result<()> {
        self.set_sampled(name, value, 1.0)
    }

    pub fn set_sampled(&self, name: &str, value: impl Into<String>, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        let metric = Metric::set(self.core.final_name(name), value, rate)?;
        self.dispatch(&metric)
    }

    fn dispatch(&self, metric: &Metric) -> Result<()> {
        let frame = metric.encode();
        let addr = self.core.resolved_address()?;
        let endpoint = self.core.endpoint_for::<T>(addr)?;
        T::write(&endpoint, addr, frame.as_bytes())
    }

    /// Spawn a batch sibling sharing this client's endpoint. The sibling
    /// gets its own copy of the currently resolved address and host/port;
    /// later changes to the parent do not affect it.
    pub fn batch_client(&self, size: usize) -> Result<BatchClient<T>> {
        if size == 0 {
            return Err(StatsdError::InvalidArgument(
                "batch size must be positive".into(),
            ));
        }
        Ok(BatchClient {
            core: Arc::new(self.core.snapshot()),
            buffer: Mutex::new(BatchBuffer::new(size)),
            _transport: PhantomData,
        })
    }
}

/// A batch sibling of [`Client`]. Buffers encoded metrics into frames
/// bounded by its configured size and flushes them on demand or on drop.
pub struct BatchClient<T: Transport> {
    core: Arc<ClientCore>,
    buffer: Mutex<BatchBuffer>,
    _transport: PhantomData<T>,
}

impl<T: Transport> BatchClient<T> {
    pub fn host(&self) -> String {
        self.core.host()
    }

    pub fn port(&self) -> u16 {
        self.core.port()
    }

    pub fn set_host(&self, host: impl Into<String>) {
        self.core.set_host(host.into());
        if T::RECONNECT_ON_READDRESS {
            self.core.disconnect();
        }
    }

    pub fn set_port(&self, port: u16) -> Result<()> {
        validate_port(port)?;
        self.core.set_port(port);
        if T::RECONNECT_ON_READDRESS {
            self.core.disconnect();
        }
        Ok(())
    }

    pub fn increment(&self, name: &str) -> Result<()> {
        self.increment_sampled(name, 1, 1.0)
    }

    pub fn increment_sampled(&self, name: &str, count: i64, rate: f64) -> Result<()> {
        self.buffer_metric(Metric::counter, name, count, rate)
    }

    pub fn decrement(&self, name: &str) -> Result<()> {
        self.decrement_sampled(name, 1, 1.0)
    }

    pub fn decrement_sampled(&self, name: &str, count: i64, rate: f64) -> Result<()> {
        self.buffer_metric(Metric::counter, name, -count, rate)
    }

    pub fn timing(&self, name: &str, milliseconds: f64) -> Result<()> {
        self.timing_sampled(name, milliseconds, 1.0)
    }

    pub fn timing_sampled(&self, name: &str, milliseconds: f64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        let metric = Metric::timer(self.core.final_name(name), milliseconds, rate)?;
        self.buffer(&metric);
        Ok(())
    }

    pub fn gauge(&self, name: &str, value: f64) -> Result<()> {
        self.gauge_sampled(name, value, 1.0)
    }

    pub fn gauge_sampled(&self, name: &str, value: f64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        let metric = Metric::gauge(self.core.final_name(name), value, rate)?;
        self.buffer(&metric);
        Ok(())
    }

    pub fn gauge_delta(&self, name: &str, delta: f64) -> Result<()> {
        self.gauge_delta_sampled(name, delta, 1.0)
    }

    pub fn gauge_delta_sampled(&self, name: &str, delta: f64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        let metric = Metric::gauge_delta(self.core.final_name(name), delta, rate)?;
        self.buffer(&metric);
        Ok(())
    }

    pub fn set(&self, name: &str, value: impl Into<String>) -> Result<()> {
        self.set_sampled(name, value, 1.0)
    }

    pub fn set_sampled(&self, name: &str, value: impl Into<String>, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        let metric = Metric::set(self.core.final_name(name), value, rate)?;
        self.buffer(&metric);
        Ok(())
    }

    fn buffer_metric(
        &self,
        build: fn(String, i64, f64) -> Result<Metric>,
        name: &str,
        count: i64,
        rate: f64,
    ) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        let metric = build(self.core.final_name(name), count, rate)?;
        self.buffer(&metric);
        Ok(())
    }

    fn buffer(&self, metric: &Metric) {
        let mut payload = metric.encode().into_bytes();
        payload.push(b'\n');
        self.buffer.lock().unwrap().append(&payload);
    }

    /// Flush buffered frames to the transport in order. On failure, the
    /// remaining frames stay buffered for a subsequent flush.
    pub fn flush(&self) -> Result<()> {
        let addr = self.core.resolved_address()?;
        let endpoint = self.core.endpoint_for::<T>(addr)?;
        self.buffer
            .lock()
            .unwrap()
            .flush_with(|frame| T::write(&endpoint, addr, frame))
    }

    /// Discard all buffered frames without sending them.
    pub fn clear(&self) {
        self.buffer.lock().unwrap().clear();
    }
}

impl<T: Transport> Drop for BatchClient<T> {
    fn drop(&mut self) {
        let is_empty = self
            .buffer
            .lock()
            .map(|b| b.is_empty())
            .unwrap_or(true);
        if !is_empty {
            if let Err(err) = self.flush() {
                warn!(error = %err, "failed to flush batch client on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, UdpSocket};
    use std::io::{BufRead, BufReader};

    fn next_udp_server() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").unwrap()
    }

    fn recv_datagram(server: &UdpSocket) -> String {
        let mut buf = [0u8; 512];
        let (len, _) = server.recv_from(&mut buf).unwrap();
        String::from_utf8(buf[..len].to_vec()).unwrap()
    }

    #[test]
    fn scenario_a_basic_counter() {
        let server = next_udp_server();
        let addr = server.local_addr().unwrap();
        let client: Client<Datagram> = Client::new(addr.ip().to_string(), addr.port(), "").unwrap();
        client.increment("event").unwrap();
        assert_eq!(recv_datagram(&server), "event:1|c");
    }

    #[test]
    fn scenario_b_normalization_and_prefix() {
        let server = next_udp_server();
        server
            .set_read_timeout(Some(std::time::Duration::from_millis(20)))
            .unwrap();
        let addr = server.local_addr().unwrap();
        let client: Client<Datagram> =
            Client::new(addr.ip().to_string(), addr.port(), "region.c_").unwrap();
        // rate=0.5 is probabilistic, so retry until the gate actually lets a
        // frame through, then check its payload.
        let mut buf = [0u8; 512];
        let mut received = None;
        for _ in 0..500 {
            client
                .increment_sampled("region.event name", 2, 0.5)
                .unwrap();
            if let Ok((len, _)) = server.recv_from(&mut buf) {
                received = Some(String::from_utf8(buf[..len].to_vec()).unwrap());
                break;
            }
        }
        assert_eq!(
            received,
            Some("region.c_region.event_name:2|c|@0.5".to_string())
        );
    }

    #[test]
    fn scenario_c_gauge_delta_signs() {
        let server = next_udp_server();
        let addr = server.local_addr().unwrap();
        let client: Client<Datagram> = Client::new(addr.ip().to_string(), addr.port(), "").unwrap();
        client.gauge_delta("memory!", 128.0).unwrap();
        assert_eq!(recv_datagram(&server), "memory:+128|g");
        client.gauge_delta("memory", -128.0).unwrap();
        assert_eq!(recv_datagram(&server), "memory:-128|g");
    }

    #[test]
    fn readdress_invalidates_cache_and_reresolves() {
        let first = next_udp_server();
        let first_addr = first.local_addr().unwrap();
        let second = next_udp_server();
        let second_addr = second.local_addr().unwrap();

        let client: Client<Datagram> =
            Client::new(first_addr.ip().to_string(), first_addr.port(), "").unwrap();
        client.increment("a").unwrap();
        assert_eq!(recv_datagram(&first), "a:1|c");

        client.set_host(second_addr.ip().to_string());
        client.set_port(second_addr.port()).unwrap();
        client.increment("b").unwrap();
        assert_eq!(recv_datagram(&second), "b:1|c");
    }

    #[test]
    fn stream_readdress_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client: Client<Stream> = Client::new(addr.ip().to_string(), addr.port(), "").unwrap();
        client.increment("a").unwrap();
        let (conn, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(conn);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "a:1|c\n");

        // Changing port should force a reconnect to the new destination.
        let listener2 = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr2 = listener2.local_addr().unwrap();
        client.set_port(addr2.port()).unwrap();
        client.increment("b").unwrap();
        let (conn2, _) = listener2.accept().unwrap();
        let mut reader2 = BufReader::new(conn2);
        let mut line2 = String::new();
        reader2.read_line(&mut line2).unwrap();
        assert_eq!(line2, "b:1|c\n");
    }

    #[test]
    fn reconnect_forces_a_fresh_stream_connection_to_the_same_address() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client: Client<Stream> = Client::new(addr.ip().to_string(), addr.port(), "").unwrap();
        client.increment("a").unwrap();
        let (conn, _) = listener.accept().unwrap();

        client.reconnect();
        client.increment("b").unwrap();
        // The old connection's peer sees EOF once the stale endpoint is
        // dropped and a fresh socket is opened for the second send.
        drop(conn);
        let (conn2, _) = listener.accept().unwrap();
        let mut reader2 = BufReader::new(conn2);
        let mut line2 = String::new();
        reader2.read_line(&mut line2).unwrap();
        assert_eq!(line2, "b:1|c\n");
    }

    #[test]
    fn batch_client_flushes_packed_frames() {
        let server = next_udp_server();
        let addr = server.local_addr().unwrap();
        let client: Client<Datagram> = Client::new(addr.ip().to_string(), addr.port(), "").unwrap();
        let batch = client.batch_client(20).unwrap();
        batch.increment("fit.a.batch.123").unwrap();
        batch.flush().unwrap();
        assert_eq!(recv_datagram(&server), "fit.a.batch.123:1|c\n");
    }

    #[test]
    fn batch_client_flushes_on_drop() {
        let server = next_udp_server();
        let addr = server.local_addr().unwrap();
        let client: Client<Datagram> = Client::new(addr.ip().to_string(), addr.port(), "").unwrap();
        {
            let batch = client.batch_client(512).unwrap();
            batch.gauge("load", 9.0).unwrap();
        }
        assert_eq!(recv_datagram(&server), "load:9|g\n");
    }

    #[test]
    fn batch_client_clear_suppresses_flush() {
        let server = next_udp_server();
        server.set_read_timeout(Some(std::time::Duration::from_millis(50))).unwrap();
        let addr = server.local_addr().unwrap();
        let client: Client<Datagram> = Client::new(addr.ip().to_string(), addr.port(), "").unwrap();
        {
            let batch = client.batch_client(512).unwrap();
            batch.gauge("load", 9.0).unwrap();
            batch.clear();
        }
        let mut buf = [0u8; 512];
        assert!(server.recv_from(&mut buf).is_err());
    }

    #[test]
    fn sibling_snapshot_is_independent_of_parent_readdress() {
        let server = next_udp_server();
        let addr = server.local_addr().unwrap();
        let client: Client<Datagram> = Client::new(addr.ip().to_string(), addr.port(), "").unwrap();
        let batch = client.batch_client(512).unwrap();

        let other_server = next_udp_server();
        let other_addr = other_server.local_addr().unwrap();
        client.set_host(other_addr.ip().to_string());
        client.set_port(other_addr.port()).unwrap();

        batch.increment("still.old.dest").unwrap();
        batch.flush().unwrap();
        assert_eq!(recv_datagram(&server), "still.old.dest:1|c\n");
    }

    #[test]
    fn invalid_port_rejected() {
        let res: Result<Client<Datagram>> = Client::new("localhost", 0, "");
        assert!(res.is_err());
    }

    #[test]
    fn client_config_builds_from_toml_like_source() {
        let server = next_udp_server();
        let addr = server.local_addr().unwrap();
        let config = ClientConfig::builder(addr.ip().to_string(), addr.port())
            .prefix("app.")
            .batch_size(512)
            .build();
        assert_eq!(config.batch_size, Some(512));

        let client: Client<Datagram> = Client::from_config(&config).unwrap();
        client.increment("login").unwrap();
        assert_eq!(recv_datagram(&server), "app.login:1|c");
    }

    #[test]
    fn client_config_serde_round_trip() {
        let config = ClientConfig::builder("localhost", 8125).prefix("a.").build();
        let encoded = serde_json::to_string(&config).unwrap();
        let decoded: ClientConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.host, "localhost");
        assert_eq!(decoded.port, 8125);
        assert_eq!(decoded.prefix, "a.");
        assert_eq!(decoded.batch_size, None);
    }
}

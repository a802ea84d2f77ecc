//! Wall-clock timing helper, ported from `statsdmetrics.client.timer.Timer`:
//! measure an operation and submit the elapsed time as a Timer metric,
//! without coupling the caller to any one client type.

use std::future::Future;
use std::time::Instant;

use crate::async_client::AsyncClient;
use crate::client::{BatchClient, Client};
use crate::error::Result;
use crate::transport::Transport;

/// Anything able to submit a rate-gated Timer metric by name.
pub trait SubmitsTiming {
    fn timing_sampled(&self, name: &str, milliseconds: f64, rate: f64) -> Result<()>;
}

impl<T: Transport> SubmitsTiming for Client<T> {
    fn timing_sampled(&self, name: &str, milliseconds: f64, rate: f64) -> Result<()> {
        Client::timing_sampled(self, name, milliseconds, rate)
    }
}

impl<T: Transport> SubmitsTiming for BatchClient<T> {
    fn timing_sampled(&self, name: &str, milliseconds: f64, rate: f64) -> Result<()> {
        BatchClient::timing_sampled(self, name, milliseconds, rate)
    }
}

impl<T: Transport> SubmitsTiming for AsyncClient<T> {
    fn timing_sampled(&self, name: &str, milliseconds: f64, rate: f64) -> Result<()> {
        AsyncClient::timing_sampled(self, name, milliseconds, rate)
    }
}

/// Measures elapsed wall-clock time against a configured metric name and
/// sample rate, submitting through any [`SubmitsTiming`] client.
pub struct Stopwatch<'a, C: SubmitsTiming> {
    client: &'a C,
    name: String,
    rate: f64,
}

impl<'a, C: SubmitsTiming> Stopwatch<'a, C> {
    pub fn new(client: &'a C, name: impl Into<String>, rate: f64) -> Self {
        Stopwatch {
            client,
            name: name.into(),
            rate,
        }
    }

    /// Submit the elapsed time between `reference` and now, at the rate
    /// configured on this stopwatch.
    pub fn since(&self, reference: Instant) -> Result<()> {
        self.since_with_rate(reference, self.rate)
    }

    /// Submit the elapsed time between `reference` and now, overriding the
    /// configured rate for this one submission.
    pub fn since_with_rate(&self, reference: Instant, rate: f64) -> Result<()> {
        let elapsed = reference.elapsed().as_secs_f64() * 1000.0;
        self.client.timing_sampled(&self.name, elapsed, rate)
    }

    /// Time a synchronous callable, submitting on return (including on
    /// panic-free early return paths inside `f`), and yielding `f`'s result
    /// unchanged. A submission failure is not propagated to the caller of
    /// `f`; inspect the return value of [`Stopwatch::since`] directly if
    /// that matters.
    pub fn time_callable<R>(&self, f: impl FnOnce() -> R) -> R {
        self.time_callable_with_rate(self.rate, f)
    }

    /// Like [`Stopwatch::time_callable`], overriding the configured rate for
    /// this one call.
    pub fn time_callable_with_rate<R>(&self, rate: f64, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let result = f();
        let _ = self.since_with_rate(start, rate);
        result
    }

    /// Time an async future the same way [`Stopwatch::time_callable`] times
    /// a synchronous callable.
    pub async fn time_future<F: Future>(&self, fut: F) -> F::Output {
        self.time_future_with_rate(self.rate, fut).await
    }

    /// Like [`Stopwatch::time_future`], overriding the configured rate for
    /// this one call.
    pub async fn time_future_with_rate<F: Future>(&self, rate: f64, fut: F) -> F::Output {
        let start = Instant::now();
        let result = fut.await;
        let _ = self.since_with_rate(start, rate);
        result
    }

    /// A scoped guard that submits elapsed time when dropped.
    pub fn scoped(&'a self) -> ScopedTiming<'a, C> {
        self.scoped_with_rate(self.rate)
    }

    /// Like [`Stopwatch::scoped`], overriding the configured rate for this
    /// one guard.
    pub fn scoped_with_rate(&'a self, rate: f64) -> ScopedTiming<'a, C> {
        ScopedTiming {
            stopwatch: self,
            start: Instant::now(),
            rate,
        }
    }
}

/// Captures a reference instant on construction, submits the elapsed Timer
/// metric when dropped.
pub struct ScopedTiming<'a, C: SubmitsTiming> {
    stopwatch: &'a Stopwatch<'a, C>,
    start: Instant,
    rate: f64,
}

impl<'a, C: SubmitsTiming> Drop for ScopedTiming<'a, C> {
    fn drop(&mut self) {
        let _ = self.stopwatch.since_with_rate(self.start, self.rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Datagram;
    use std::net::UdpSocket;
    use std::thread::sleep;
    use std::time::Duration;

    fn next_udp_server() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").unwrap()
    }

    fn recv_datagram(server: &UdpSocket) -> String {
        let mut buf = [0u8; 512];
        let (len, _) = server.recv_from(&mut buf).unwrap();
        String::from_utf8(buf[..len].to_vec()).unwrap()
    }

    #[test]
    fn time_callable_submits_a_timer_frame() {
        let server = next_udp_server();
        let addr = server.local_addr().unwrap();
        let client: Client<Datagram> = Client::new(addr.ip().to_string(), addr.port(), "").unwrap();
        let sw = Stopwatch::new(&client, "op", 1.0);
        let result = sw.time_callable(|| {
            sleep(Duration::from_millis(5));
            42
        });
        assert_eq!(result, 42);
        let frame = recv_datagram(&server);
        assert!(frame.starts_with("op:"));
        assert!(frame.ends_with("|ms"));
    }

    #[test]
    fn zero_rate_suppresses_submission() {
        let server = next_udp_server();
        server
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let addr = server.local_addr().unwrap();
        let client: Client<Datagram> = Client::new(addr.ip().to_string(), addr.port(), "").unwrap();
        let sw = Stopwatch::new(&client, "op", 0.0);
        sw.time_callable(|| ());
        let mut buf = [0u8; 512];
        assert!(server.recv_from(&mut buf).is_err());
    }

    #[test]
    fn per_call_rate_override_suppresses_despite_nonzero_configured_rate() {
        let server = next_udp_server();
        server
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let addr = server.local_addr().unwrap();
        let client: Client<Datagram> = Client::new(addr.ip().to_string(), addr.port(), "").unwrap();
        let sw = Stopwatch::new(&client, "op", 1.0);
        sw.time_callable_with_rate(0.0, || ());
        let mut buf = [0u8; 512];
        assert!(server.recv_from(&mut buf).is_err());
    }

    #[test]
    fn scoped_guard_submits_on_drop() {
        let server = next_udp_server();
        let addr = server.local_addr().unwrap();
        let client: Client<Datagram> = Client::new(addr.ip().to_string(), addr.port(), "").unwrap();
        let sw = Stopwatch::new(&client, "scoped.op", 1.0);
        {
            let _guard = sw.scoped();
            sleep(Duration::from_millis(2));
        }
        let frame = recv_datagram(&server);
        assert!(frame.starts_with("scoped.op:"));
    }
}

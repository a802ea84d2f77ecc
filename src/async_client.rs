//! Asynchronous sender: a single-consumer queue drained by one background
//! worker thread per client, so callers never block on network I/O beyond
//! the bounded cost of an enqueue. Mirrors the threaded design in the
//! original Python `statsdmetrics.client.threaded` module: a `Queue` plus a
//! daemon `Thread`, here a `std::sync::mpsc` channel plus a joinable
//! `std::thread`.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::batch::BatchBuffer;
use crate::client::ClientCore;
use crate::error::{Result, StatsdError};
use crate::metric::Metric;
use crate::sampler::should_send;
use crate::transport::Transport;

enum WorkerMsg {
    Frame(Vec<u8>),
    Stop,
}

struct Worker {
    handle: Option<JoinHandle<()>>,
    done_rx: mpsc::Receiver<()>,
}

impl Worker {
    fn spawn<T: Transport>(core: Arc<ClientCore>, rx: mpsc::Receiver<WorkerMsg>) -> Self {
        let (done_tx, done_rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            debug!("statsd async sender worker started");
            while let Ok(WorkerMsg::Frame(frame)) = rx.recv() {
                if let Err(err) = write_frame::<T>(&core, &frame) {
                    // The worker does not block the queue on a transport
                    // failure; the frame is dropped and the failure is only
                    // observable through this diagnostics event (see
                    // DESIGN.md).
                    warn!(error = %err, "statsd async sender dropped a frame");
                }
            }
            debug!("statsd async sender worker exiting");
            let _ = done_tx.send(());
        });
        Worker {
            handle: Some(handle),
            done_rx,
        }
    }

    fn join(&mut self, timeout: Option<Duration>) {
        match timeout {
            None => {
                let _ = self.done_rx.recv();
            }
            Some(t) => match self.done_rx.recv_timeout(t) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {
                    warn!("statsd async sender did not shut down within timeout, detaching");
                }
                Err(RecvTimeoutError::Disconnected) => {}
            },
        }
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
            // Otherwise: best-effort detach, the thread is left to exit on
            // its own; we don't block the caller any further.
        }
    }
}

fn write_frame<T: Transport>(core: &ClientCore, frame: &[u8]) -> Result<()> {
    let addr = core.resolved_address()?;
    let endpoint = core.endpoint_for::<T>(addr)?;
    T::write(&endpoint, addr, frame)
}

/// An async variant of [`crate::client::Client`]: submissions enqueue a
/// frame and return immediately; a single background worker drains the
/// queue and owns the transport write-side exclusively.
pub struct AsyncClient<T: Transport> {
    core: Arc<ClientCore>,
    tx: mpsc::Sender<WorkerMsg>,
    closed: Arc<AtomicBool>,
    worker: Worker,
    _transport: PhantomData<T>,
}

impl<T: Transport> AsyncClient<T> {
    pub fn new(host: impl Into<String>, port: u16, prefix: impl Into<String>) -> Result<Self> {
        crate::client::validate_port(port)?;
        let core = Arc::new(ClientCore::new(host.into(), port, prefix.into()));
        let (tx, rx) = mpsc::channel();
        let worker = Worker::spawn::<T>(Arc::clone(&core), rx);
        Ok(AsyncClient {
            core,
            tx,
            closed: Arc::new(AtomicBool::new(false)),
            worker,
            _transport: PhantomData,
        })
    }

    pub fn host(&self) -> String {
        self.core.host()
    }

    pub fn port(&self) -> u16 {
        self.core.port()
    }

    pub fn increment(&self, name: &str) -> Result<()> {
        self.increment_sampled(name, 1, 1.0)
    }

    pub fn increment_sampled(&self, name: &str, count: i64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        self.submit_built(Metric::counter(self.core.final_name(name), count, rate))
    }

    pub fn decrement(&self, name: &str) -> Result<()> {
        self.decrement_sampled(name, 1, 1.0)
    }

    pub fn decrement_sampled(&self, name: &str, count: i64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        self.submit_built(Metric::counter(self.core.final_name(name), -count, rate))
    }

    pub fn timing(&self, name: &str, milliseconds: f64) -> Result<()> {
        self.timing_sampled(name, milliseconds, 1.0)
    }

    pub fn timing_sampled(&self, name: &str, milliseconds: f64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        self.submit_built(Metric::timer(self.core.final_name(name), milliseconds, rate))
    }

    pub fn gauge(&self, name: &str, value: f64) -> Result<()> {
        self.gauge_sampled(name, value, 1.0)
    }

    pub fn gauge_sampled(&self, name: &str, value: f64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        self.submit_built(Metric::gauge(self.core.final_name(name), value, rate))
    }

    pub fn gauge_delta(&self, name: &str, delta: f64) -> Result<()> {
        self.gauge_delta_sampled(name, delta, 1.0)
    }

    pub fn gauge_delta_sampled(&self, name: &str, delta: f64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        self.submit_built(Metric::gauge_delta(self.core.final_name(name), delta, rate))
    }

    pub fn set(&self, name: &str, value: impl Into<String>) -> Result<()> {
        self.set_sampled(name, value, 1.0)
    }

    pub fn set_sampled(&self, name: &str, value: impl Into<String>, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        self.submit_built(Metric::set(self.core.final_name(name), value, rate))
    }

    /// Encode an already rate-gated metric and enqueue it.
    fn submit_built(&self, built: Result<Metric>) -> Result<()> {
        self.submit(built?.encode().into_bytes())
    }

    /// Enqueue a raw, already-encoded frame. Returns `ClientClosed` if the
    /// client has been closed; otherwise returns immediately without
    /// performing any I/O on the caller's thread.
    fn submit(&self, frame: Vec<u8>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StatsdError::ClientClosed);
        }
        self.tx
            .send(WorkerMsg::Frame(frame))
            .map_err(|_| StatsdError::ClientClosed)
    }

    /// Signal the worker to exit after draining whatever is already
    /// queued. Idempotent. If `wait` is true, blocks until the worker
    /// observes the stop sentinel, up to `timeout` (unbounded if `None`);
    /// on timeout the worker is detached and its eventual exit is
    /// best-effort.
    pub fn close(&mut self, wait: bool, timeout: Option<Duration>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(WorkerMsg::Stop);
        if wait {
            self.worker.join(timeout);
        }
    }
}

impl<T: Transport> Drop for AsyncClient<T> {
    fn drop(&mut self) {
        // Final-release safety: signal the worker even if the caller never
        // called close(), without blocking the dropping thread.
        self.close(false, None);
    }
}

/// An async variant of [`crate::client::BatchClient`]: metrics are buffered
/// locally, and `flush` enqueues the buffered frames for the worker rather
/// than writing them directly (the worker exclusively owns the transport
/// write-side).
pub struct AsyncBatchClient<T: Transport> {
    core: Arc<ClientCore>,
    buffer: std::sync::Mutex<BatchBuffer>,
    tx: mpsc::Sender<WorkerMsg>,
    closed: Arc<AtomicBool>,
    worker: Worker,
    _transport: PhantomData<T>,
}

impl<T: Transport> AsyncBatchClient<T> {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        prefix: impl Into<String>,
        batch_size: usize,
    ) -> Result<Self> {
        crate::client::validate_port(port)?;
        let core = Arc::new(ClientCore::new(host.into(), port, prefix.into()));
        let (tx, rx) = mpsc::channel();
        let worker = Worker::spawn::<T>(Arc::clone(&core), rx);
        Ok(AsyncBatchClient {
            core,
            buffer: std::sync::Mutex::new(BatchBuffer::new(batch_size)),
            tx,
            closed: Arc::new(AtomicBool::new(false)),
            worker,
            _transport: PhantomData,
        })
    }

    pub fn increment(&self, name: &str) -> Result<()> {
        self.increment_sampled(name, 1, 1.0)
    }

    pub fn increment_sampled(&self, name: &str, count: i64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        self.buffer_metric(Metric::counter(self.core.final_name(name), count, rate))
    }

    pub fn decrement(&self, name: &str) -> Result<()> {
        self.decrement_sampled(name, 1, 1.0)
    }

    pub fn decrement_sampled(&self, name: &str, count: i64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        self.buffer_metric(Metric::counter(self.core.final_name(name), -count, rate))
    }

    pub fn timing(&self, name: &str, milliseconds: f64) -> Result<()> {
        self.timing_sampled(name, milliseconds, 1.0)
    }

    pub fn timing_sampled(&self, name: &str, milliseconds: f64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        self.buffer_metric(Metric::timer(self.core.final_name(name), milliseconds, rate))
    }

    pub fn gauge(&self, name: &str, value: f64) -> Result<()> {
        self.gauge_sampled(name, value, 1.0)
    }

    pub fn gauge_sampled(&self, name: &str, value: f64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        self.buffer_metric(Metric::gauge(self.core.final_name(name), value, rate))
    }

    pub fn gauge_delta(&self, name: &str, delta: f64) -> Result<()> {
        self.gauge_delta_sampled(name, delta, 1.0)
    }

    pub fn gauge_delta_sampled(&self, name: &str, delta: f64, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        self.buffer_metric(Metric::gauge_delta(self.core.final_name(name), delta, rate))
    }

    pub fn set(&self, name: &str, value: impl Into<String>) -> Result<()> {
        self.set_sampled(name, value, 1.0)
    }

    pub fn set_sampled(&self, name: &str, value: impl Into<String>, rate: f64) -> Result<()> {
        if !should_send(rate) {
            return Ok(());
        }
        self.buffer_metric(Metric::set(self.core.final_name(name), value, rate))
    }

    fn buffer_metric(&self, built: Result<Metric>) -> Result<()> {
        let metric = built?;
        let mut payload = metric.encode().into_bytes();
        payload.push(b'\n');
        self.buffer.lock().unwrap().append(&payload);
        Ok(())
    }

    /// Enqueue all buffered frames for the worker, in order.
    pub fn flush(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StatsdError::ClientClosed);
        }
        let tx = &self.tx;
        self.buffer.lock().unwrap().flush_with(|frame| {
            tx.send(WorkerMsg::Frame(frame.to_vec()))
                .map_err(|_| StatsdError::ClientClosed)
        })
    }

    pub fn clear(&self) {
        self.buffer.lock().unwrap().clear();
    }

    /// Flush buffered frames, then close as in [`AsyncClient::close`].
    pub fn close(&mut self, wait: bool, timeout: Option<Duration>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.flush();
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.tx.send(WorkerMsg::Stop);
        if wait {
            self.worker.join(timeout);
        }
    }
}

impl<T: Transport> Drop for AsyncBatchClient<T> {
    fn drop(&mut self) {
        self.close(false, None);
    }
}

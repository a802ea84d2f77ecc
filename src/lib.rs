//! A StatsD client: counters, timers, gauges and sets over datagram or
//! stream transports, with optional batching and an async sender.
//!
//! ```no_run
//! use statsdmetrics::DatagramClient;
//!
//! let client = DatagramClient::new("localhost", statsdmetrics::DEFAULT_PORT, "myapp.").unwrap();
//! client.increment("requests").unwrap();
//! ```

mod async_client;
mod batch;
mod client;
pub mod endpoint;
mod error;
mod metric;
mod sampler;
mod timer;
mod transport;

pub use async_client::{AsyncBatchClient, AsyncClient};
pub use client::{
    BatchClient, Client, ClientBuilder, ClientConfig, DatagramClient, StreamClient,
    DEFAULT_BATCH_SIZE, DEFAULT_PORT,
};
pub use endpoint::Endpoint;
pub use error::{Result, StatsdError};
pub use metric::{normalize_metric_name, Metric};
pub use timer::{ScopedTiming, Stopwatch, SubmitsTiming};
pub use transport::{Datagram, Stream, Transport};

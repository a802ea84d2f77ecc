//! Statsd client utility app: reads metrics from standard input, one per
//! line, and forwards them to a statsd server. Mirrors
//! `statsdmetrics.app.statsdclient`.

use std::io::{self, BufRead};

use clap::Parser;
use tracing::error;

use statsdmetrics::{DatagramClient, DEFAULT_PORT};

/// Sends metrics to a Statsd server on host (default=localhost), and port
/// (default=8125).
///
/// Metrics are read from standard input, one metric per line:
///
///     method metric_name [value] [sample_rate]
///
/// Supported methods are: increment, decrement, timing, gauge, gauge_delta, set
///
/// Example:
///
///     timing db.search.username 3500
///     increment login
///     decrement connections 2 0.6
///     gauge_delta memory -256
#[derive(Parser)]
#[command(name = "statsdclient", version, about, long_about = None)]
struct Cli {
    /// Prefix for all metric names.
    #[arg(long, default_value = "")]
    prefix: String,

    /// Server address as `host` or `host:port`.
    #[arg(default_value = "localhost")]
    address: String,
}

fn parse_address(address: &str) -> (String, u16) {
    match address.split_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (address.to_string(), DEFAULT_PORT),
        },
        None => (address.to_string(), DEFAULT_PORT),
    }
}

fn main() {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let cli = Cli::parse();
    let (host, port) = parse_address(&cli.address);

    let client = match DatagramClient::new(host, port, cli.prefix) {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "could not create statsd client");
            std::process::exit(78);
        }
    };

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if let Err(err) = dispatch_line(&client, &line) {
            error!(%err, "could not submit metric");
        }
    }
}

fn dispatch_line(client: &DatagramClient, line: &str) -> Result<(), statsdmetrics::StatsdError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        error!(line, "ignoring invalid input");
        return Ok(());
    }
    let method = tokens[0];
    let name = tokens[1];
    let value = tokens.get(2).copied();
    let rate: f64 = tokens
        .get(3)
        .map(|s| s.parse().unwrap_or(1.0))
        .unwrap_or(1.0);

    match method {
        "increment" => {
            let count = value.and_then(|v| v.parse().ok()).unwrap_or(1);
            client.increment_sampled(name, count, rate)
        }
        "decrement" => {
            let count = value.and_then(|v| v.parse().ok()).unwrap_or(1);
            client.decrement_sampled(name, count, rate)
        }
        "timing" => {
            let ms = value.and_then(|v| v.parse().ok()).unwrap_or(0.0);
            client.timing_sampled(name, ms, rate)
        }
        "gauge" => {
            let v = value.and_then(|v| v.parse().ok()).unwrap_or(0.0);
            client.gauge_sampled(name, v, rate)
        }
        "gauge_delta" => {
            let v = value.and_then(|v| v.parse().ok()).unwrap_or(0.0);
            client.gauge_delta_sampled(name, v, rate)
        }
        "set" => {
            let v = value.unwrap_or("").to_string();
            client.set_sampled(name, v, rate)
        }
        other => {
            error!(method = other, "ignoring invalid method");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_address_defaults_port() {
        assert_eq!(parse_address("localhost"), ("localhost".to_string(), DEFAULT_PORT));
    }

    #[test]
    fn parse_address_splits_host_and_port() {
        assert_eq!(parse_address("stats.example.com:9125"), ("stats.example.com".to_string(), 9125));
    }
}

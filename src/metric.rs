//! The metric value model and its wire-format encoding.
//!
//! Construction validates each field; encoding is pure and side-effect-free.

use crate::error::{Result, StatsdError};

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StatsdError::InvalidArgument(
            "metric name must not be empty".into(),
        ));
    }
    Ok(())
}

fn check_rate(rate: f64) -> Result<()> {
    if rate.is_nan() || rate <= 0.0 {
        return Err(StatsdError::InvalidArgument(format!(
            "sample rate must be positive, got {}",
            rate
        )));
    }
    Ok(())
}

/// One of the five StatsD metric kinds, immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Counter {
        name: String,
        count: i64,
        sample_rate: f64,
    },
    Timer {
        name: String,
        milliseconds: f64,
        sample_rate: f64,
    },
    Gauge {
        name: String,
        value: f64,
        sample_rate: f64,
    },
    GaugeDelta {
        name: String,
        delta: f64,
        sample_rate: f64,
    },
    Set {
        name: String,
        value: String,
        sample_rate: f64,
    },
}

impl Metric {
    pub fn counter(name: impl Into<String>, count: i64, sample_rate: f64) -> Result<Self> {
        let name = name.into();
        check_name(&name)?;
        check_rate(sample_rate)?;
        Ok(Metric::Counter {
            name,
            count,
            sample_rate,
        })
    }

    pub fn timer(name: impl Into<String>, milliseconds: f64, sample_rate: f64) -> Result<Self> {
        let name = name.into();
        check_name(&name)?;
        check_rate(sample_rate)?;
        if milliseconds < 0.0 {
            return Err(StatsdError::InvalidArgument(
                "timer milliseconds must be non-negative".into(),
            ));
        }
        Ok(Metric::Timer {
            name,
            milliseconds,
            sample_rate,
        })
    }

    pub fn gauge(name: impl Into<String>, value: f64, sample_rate: f64) -> Result<Self> {
        let name = name.into();
        check_name(&name)?;
        check_rate(sample_rate)?;
        if value < 0.0 {
            return Err(StatsdError::InvalidArgument(
                "gauge value must be non-negative".into(),
            ));
        }
        Ok(Metric::Gauge {
            name,
            value,
            sample_rate,
        })
    }

    pub fn gauge_delta(name: impl Into<String>, delta: f64, sample_rate: f64) -> Result<Self> {
        let name = name.into();
        check_name(&name)?;
        check_rate(sample_rate)?;
        Ok(Metric::GaugeDelta {
            name,
            delta,
            sample_rate,
        })
    }

    pub fn set(name: impl Into<String>, value: impl Into<String>, sample_rate: f64) -> Result<Self> {
        let name = name.into();
        check_name(&name)?;
        check_rate(sample_rate)?;
        Ok(Metric::Set {
            name,
            value: value.into(),
            sample_rate,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Metric::Counter { name, .. }
            | Metric::Timer { name, .. }
            | Metric::Gauge { name, .. }
            | Metric::GaugeDelta { name, .. }
            | Metric::Set { name, .. } => name,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        match self {
            Metric::Counter { sample_rate, .. }
            | Metric::Timer { sample_rate, .. }
            | Metric::Gauge { sample_rate, .. }
            | Metric::GaugeDelta { sample_rate, .. }
            | Metric::Set { sample_rate, .. } => *sample_rate,
        }
    }

    /// Encode this metric to its wire-format payload, e.g. `event:1|c`.
    pub fn encode(&self) -> String {
        let (value, kind) = match self {
            Metric::Counter { count, .. } => (count.to_string(), "c"),
            Metric::Timer { milliseconds, .. } => (format_real(*milliseconds), "ms"),
            Metric::Gauge { value, .. } => (format_real(*value), "g"),
            Metric::GaugeDelta { delta, .. } => (format_signed(*delta), "g"),
            Metric::Set { value, .. } => (value.clone(), "s"),
        };
        let mut out = format!("{}:{}|{}", self.name(), value, kind);
        let rate = self.sample_rate();
        if rate != 1.0 {
            out.push_str("|@");
            out.push_str(&format_real(rate));
        }
        out
    }
}

/// Render a real number in locale-independent minimal form: integers with
/// no decimal point, otherwise up to 4 significant fraction digits with no
/// trailing zeros.
fn format_real(v: f64) -> String {
    if v.is_finite() && v == v.trunc() && v.abs() < 1e15 {
        return format!("{}", v as i64);
    }
    let s = format!("{:.4}", v);
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

/// Like `format_real`, but always emits an explicit leading sign, used for
/// gauge-delta values.
fn format_signed(v: f64) -> String {
    let sign = if v >= 0.0 { "+" } else { "-" };
    format!("{}{}", sign, format_real(v.abs()))
}

/// Normalize a metric name for the wire, applied once at submission time:
/// whitespace runs collapse to `_`, `/` and `\` become `-`, and every
/// remaining character outside `[A-Za-z0-9_.-]` is dropped.
pub fn normalize_metric_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_space = false;
    for ch in name.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push('_');
            }
            last_was_space = true;
            continue;
        }
        last_was_space = false;
        if ch == '/' || ch == '\\' {
            out.push('-');
        } else {
            out.push(ch);
        }
    }
    out.retain(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-');
    out
}

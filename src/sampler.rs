//! Sample-rate gating. The random source is a single process-wide generator
//! whose state is opaque to callers; `rand::thread_rng` is thread-safe, so
//! no additional locking is required around it.

/// `should_send = (rate >= 1) OR (uniform_random_in_[0,1) <= rate)`.
/// Fails closed (no send) for any non-positive rate, matching the helper
/// semantics adopted for the gate (§9 open question): `rate <= 0` always
/// suppresses, even though bare `Metric` construction stays strict about
/// requiring a positive rate.
pub(crate) fn should_send(rate: f64) -> bool {
    should_send_with(rate, rand::random::<f64>)
}

/// Same gate, but with the draw supplied by the caller instead of the
/// process-wide generator, so tests can pin the "random" outcome.
pub(crate) fn should_send_with(rate: f64, draw: impl FnOnce() -> f64) -> bool {
    if rate <= 0.0 {
        return false;
    }
    if rate >= 1.0 {
        return true;
    }
    draw() <= rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_at_least_one_always_sends() {
        assert!(should_send(1.0));
        assert!(should_send(2.0));
    }

    #[test]
    fn non_positive_rate_never_sends() {
        assert!(!should_send(0.0));
        assert!(!should_send(-1.0));
    }

    #[test]
    fn scenario_e_sample_rate_gate_with_fixed_draw() {
        assert!(!should_send_with(0.1, || 0.3));
        assert!(should_send_with(0.5, || 0.3));
    }
}

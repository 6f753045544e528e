use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter, capped by `cap` (spec.md §4.7: save
/// retries "use exponential backoff with jitter, capped at 30 s").
pub(crate) fn backoff(attempt: u32, cap: Duration) -> Duration {
    let base_delay_ms = 200u64 * (1u64 << attempt.min(20));
    let jitter = rand::rng().random_range(0.8..1.2);
    let delay_ms = (base_delay_ms as f64 * jitter) as u64;
    Duration::from_millis(delay_ms).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        for attempt in 0..10 {
            let d = backoff(attempt, Duration::from_secs(30));
            assert!(d <= Duration::from_secs(30));
        }
    }

    #[test]
    fn backoff_grows_with_attempt() {
        let low = backoff(0, Duration::from_secs(600));
        let high = backoff(5, Duration::from_secs(600));
        assert!(high > low);
    }
}

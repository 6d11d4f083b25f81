use std::time::Duration;

/// Delay before retry number `attempt` (1-based): `min(base * 2^(attempt-1), max)`.
pub(crate) fn reconnect_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let delay = base_ms.saturating_mul(2u64.saturating_pow(exponent));
    Duration::from_millis(delay.min(max_ms))
}

/// Whether `attempts` consecutive failures exhaust the retry budget.
pub(crate) fn attempts_exhausted(attempts: u32, max_attempts: Option<u32>) -> bool {
    max_attempts.is_some_and(|max| attempts >= max)
}

//! Sizing of the delay applied to failed messages before they are retried.
use lapin::BasicProperties;
use rand::Rng;

use crate::amqp::convenience::BasicPropertiesExt;

/// Header telling the delayed exchange how long to hold a message, in milliseconds.
pub const X_DELAY: &str = "x-delay";
/// Header counting how many times a message has been attempted.
pub const X_ATTEMPTS: &str = "x-attempts";
/// Upper bound of the retry delay: 30 minutes.
pub const MAX_DELAY_SECONDS: u64 = 30 * 60;

/// The delay, in milliseconds, to wait before retrying a message with the given `properties`.
///
/// It grows with the `x-attempts` header (1 if missing).
pub fn calculate_requeue_backoff(properties: &BasicProperties) -> u64 {
    backoff_for_attempts(properties.get_header_i64(X_ATTEMPTS).unwrap_or(1))
}

/// A random delay, in milliseconds, between 1 second and `2^(3 + attempts)` seconds,
/// capped at [`MAX_DELAY_SECONDS`].
///
/// `attempts` lower than 1 are treated as 1.
pub fn backoff_for_attempts(attempts: i64) -> u64 {
    let exponent = 3u32.saturating_add(u32::try_from(attempts.max(1)).unwrap_or(u32::MAX));
    let upper_bound = 2u64.checked_pow(exponent).unwrap_or(u64::MAX);
    let delay_seconds = rand::thread_rng().gen_range(1..=upper_bound);
    delay_seconds.min(MAX_DELAY_SECONDS) * 1000
}

//! # Jitter and Backoff
//!
//! Randomised requeue delays so that many `Repository` resources created at the
//! same time do not hit the GitHub API in lockstep.
//!
//! All results are truncated to whole seconds.
//!
//! ## Usage
//!
//! ```rust
//! use release_pipeline_controller::requeue::jitter;
//! use std::time::Duration;
//!
//! let hour = Duration::from_secs(3600);
//! let next = jitter::percentage_additive(hour, 10.0);
//! assert!(next >= hour && next <= Duration::from_secs(3960));
//! ```

use rand::Rng;
use std::time::Duration;

/// Base delay of the exponential backoff
pub const BASE_BACKOFF: Duration = Duration::from_secs(2 * 60);

/// Fixed jitter bound used when a non-positive bound is requested (minutes)
pub const DEFAULT_FIX_JITTER_MINUTES: u64 = 5;

/// Add a random share of `[0, percentage)` percent of `duration`
///
/// # Example
///
/// ```
/// use release_pipeline_controller::requeue::jitter;
/// use std::time::Duration;
///
/// let next = jitter::percentage_additive(Duration::from_secs(100), 10.0);
/// assert!(next >= Duration::from_secs(100) && next <= Duration::from_secs(110));
/// ```
#[must_use]
pub fn percentage_additive(duration: Duration, percentage: f64) -> Duration {
    if !is_valid_percentage(percentage) {
        return duration;
    }
    let jitter_percent = rand::thread_rng().gen::<f64>() * percentage;
    apply_percent(duration, jitter_percent)
}

/// Add or subtract a random share of `[-percentage, percentage)` percent of `duration`
///
/// # Example
///
/// ```
/// use release_pipeline_controller::requeue::jitter;
/// use std::time::Duration;
///
/// let next = jitter::percentage_distributed(Duration::from_secs(100), 10.0);
/// assert!(next >= Duration::from_secs(90) && next <= Duration::from_secs(110));
/// ```
#[must_use]
pub fn percentage_distributed(duration: Duration, percentage: f64) -> Duration {
    if !is_valid_percentage(percentage) {
        return duration;
    }
    let jitter_percent = rand::thread_rng().gen::<f64>() * 2.0 * percentage - percentage;
    apply_percent(duration, jitter_percent)
}

/// Round `duration` up to whole minutes and add `[0, max_minutes)` random minutes
///
/// A `max_minutes` of zero falls back to [`DEFAULT_FIX_JITTER_MINUTES`].
/// Rounding up keeps the result at or after `duration`, so a requeue computed
/// from a rate limit reset never fires before the reset.
///
/// # Example
///
/// ```
/// use release_pipeline_controller::requeue::jitter;
/// use std::time::Duration;
///
/// let next = jitter::fix_additive(Duration::from_secs(30 * 60), 5);
/// assert!(next >= Duration::from_secs(30 * 60) && next < Duration::from_secs(35 * 60));
/// ```
#[must_use]
pub fn fix_additive(duration: Duration, max_minutes: u64) -> Duration {
    let max_minutes = if max_minutes == 0 {
        DEFAULT_FIX_JITTER_MINUTES
    } else {
        max_minutes
    };
    let base_minutes = duration.as_secs().div_ceil(60);
    let jitter_minutes = rand::thread_rng().gen_range(0..max_minutes);
    Duration::from_secs(base_minutes.saturating_add(jitter_minutes).saturating_mul(60))
}

/// Exponential backoff of `2min * 2^retries`, never below `min_minutes`
///
/// # Example
///
/// ```
/// use release_pipeline_controller::requeue::jitter;
/// use std::time::Duration;
///
/// assert_eq!(jitter::exponential_backoff(0, 5), Duration::from_secs(5 * 60));
/// assert_eq!(jitter::exponential_backoff(2, 5), Duration::from_secs(8 * 60));
/// ```
#[must_use]
pub fn exponential_backoff(retries: u32, min_minutes: u64) -> Duration {
    let backoff_secs = 2u64
        .checked_pow(retries)
        .and_then(|factor| factor.checked_mul(BASE_BACKOFF.as_secs()))
        .unwrap_or(u64::MAX);
    let min_secs = min_minutes.saturating_mul(60);
    Duration::from_secs(backoff_secs.max(min_secs))
}

/// Whether `percentage` can be used as a jitter share: finite and not negative
#[must_use]
pub fn is_valid_percentage(percentage: f64) -> bool {
    percentage.is_finite() && percentage >= 0.0
}

fn apply_percent(duration: Duration, jitter_percent: f64) -> Duration {
    let secs = duration.as_secs_f64();
    let total = (secs + secs * jitter_percent / 100.0).max(0.0);
    let total = Duration::try_from_secs_f64(total).unwrap_or(Duration::MAX);
    Duration::from_secs(total.as_secs())
}

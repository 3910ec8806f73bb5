//! # On-Hours Requeue
//!
//! Moves requeues that would land outside a daily UTC window to the next
//! opening of that window.

use crate::clock::{Clock, SystemClock};
use crate::requeue::RequeuePolicy;
use chrono::{Duration as ChronoDuration, NaiveDate, Timelike};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OnHoursError {
    #[error("only values [0, 23] are allowed, got {0}")]
    HourOutOfRange(u32),
    #[error("from ({from}) must be < to ({to})")]
    EmptyWindow { from: u32, to: u32 },
    #[error("both bounds of the requeue window must be set, got only {0}")]
    Incomplete(u32),
}

/// Requeue policy restricted to the UTC hours `[from, to)`
#[derive(Debug, Clone)]
pub struct OnHoursRequeue {
    from_hour: u32,
    to_hour: u32,
    clock: Arc<dyn Clock>,
}

impl OnHoursRequeue {
    /// Create a window using the wall clock
    ///
    /// # Errors
    ///
    /// Returns an error if an hour is outside `0..=23` or `from >= to`.
    pub fn new(from_hour: u32, to_hour: u32) -> Result<Self, OnHoursError> {
        Self::with_clock(from_hour, to_hour, Arc::new(SystemClock))
    }

    /// Create a window reading the time from `clock`
    ///
    /// # Errors
    ///
    /// Returns an error if an hour is outside `0..=23` or `from >= to`.
    pub fn with_clock(
        from_hour: u32,
        to_hour: u32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, OnHoursError> {
        for hour in [from_hour, to_hour] {
            if hour > 23 {
                return Err(OnHoursError::HourOutOfRange(hour));
            }
        }
        if from_hour >= to_hour {
            return Err(OnHoursError::EmptyWindow {
                from: from_hour,
                to: to_hour,
            });
        }
        Ok(Self {
            from_hour,
            to_hour,
            clock,
        })
    }

    fn window_opening(&self, date: NaiveDate) -> Option<chrono::DateTime<chrono::Utc>> {
        Some(date.and_hms_opt(self.from_hour, 0, 0)?.and_utc())
    }
}

impl RequeuePolicy for OnHoursRequeue {
    fn requeue(&self, duration: Duration) -> Duration {
        let now = self.clock.now();
        let Some(target) = ChronoDuration::from_std(duration)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
        else {
            return duration;
        };

        let hour = target.hour();
        if (self.from_hour..self.to_hour).contains(&hour) {
            return duration;
        }

        let opening_date = if hour < self.from_hour {
            Some(target.date_naive())
        } else {
            target.date_naive().succ_opt()
        };

        opening_date
            .and_then(|date| self.window_opening(date))
            .and_then(|opening| (opening - now).to_std().ok())
            .unwrap_or(duration)
    }
}

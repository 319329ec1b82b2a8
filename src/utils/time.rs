use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// UTCTimestamp layout used for SendingTime (52) and TransactTime (60)
pub const FIX_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H:%M:%S%.3f";

pub fn fix_timestamp(at: DateTime<Utc>) -> String {
    at.format(FIX_TIMESTAMP_FORMAT).to_string()
}

/// Timer for measuring round trips (order placed -> fill observed)
#[derive(Debug, Clone, Copy)]
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

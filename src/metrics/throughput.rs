use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Sliding-window rate counter for received updates
///
/// Buckets hits per second over a fixed window so the health endpoint can
/// report an approximate updates-per-second figure without sampling threads.
pub struct UpdateRateCounter {
    window_secs: i64,
    buckets: Mutex<VecDeque<(i64, u64)>>,
}

impl UpdateRateCounter {
    /// Window of 60 seconds
    pub fn new() -> Self {
        Self::with_window(60)
    }

    pub fn with_window(window_secs: i64) -> Self {
        Self {
            window_secs,
            buckets: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self) {
        let second = Utc::now().timestamp();
        let mut buckets = self.buckets.lock();
        match buckets.back_mut() {
            Some((bucket_second, count)) if *bucket_second == second => *count += 1,
            _ => buckets.push_back((second, 1)),
        }
        let cutoff = second - self.window_secs;
        while matches!(buckets.front(), Some((front, _)) if *front < cutoff) {
            buckets.pop_front();
        }
    }

    /// Average hits per second over the window
    pub fn per_second(&self) -> f64 {
        let cutoff = Utc::now().timestamp() - self.window_secs;
        let buckets = self.buckets.lock();
        let total: u64 = buckets
            .iter()
            .filter(|(second, _)| *second >= cutoff)
            .map(|(_, count)| count)
            .sum();
        total as f64 / self.window_secs as f64
    }
}

impl Default for UpdateRateCounter {
    fn default() -> Self {
        Self::new()
    }
}

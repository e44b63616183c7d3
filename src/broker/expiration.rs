//! Expiry sweep scheduling
//!
//! Runs [`LiveDataBroker::expire_subscriptions`] on a fixed period. The
//! sweep itself owns the cascade rule (distributor removal possibly tearing
//! down its subscription), so this task is pure scheduling: start/stop
//! around a stored join handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::server::LiveDataBroker;

pub struct ExpirationManager {
    period: Duration,
    running: Arc<AtomicBool>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExpirationManager {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            running: Arc::new(AtomicBool::new(false)),
            task_handle: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Starts the periodic sweep. A second start while running is a no-op.
    pub fn start(&self, broker: Arc<LiveDataBroker>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("expiration manager already running");
            return;
        }

        let running = Arc::clone(&self.running);
        let period = self.period;
        let handle = tokio::spawn(async move {
            tracing::info!("expiration manager started, sweep period {:?}", period);
            let mut ticker = tokio::time::interval(period);
            // the first tick fires immediately; skip it so a fresh start
            // does not sweep distributors created moments ago
            ticker.tick().await;

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let expired = broker.expire_subscriptions().await;
                if expired > 0 {
                    tracing::debug!("sweep pass expired {} distributors", expired);
                }
            }
            tracing::info!("expiration manager stopped");
        });

        *self.task_handle.lock() = Some(handle);
    }

    /// Stops the sweep
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task_handle.lock().take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

//! Feed event dispatch loop
//!
//! A cancellable background task that pulls event batches off the feed
//! adapter and routes them into the broker. One bad poll never kills the
//! loop: an unavailable connection backs off for a fixed retry period, any
//! other failure is logged and the loop continues. A disconnect signal from
//! the feed flips the broker to NotConnected and ends the loop; whoever owns
//! the loop decides whether to start a new one after reconnecting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::feed::{FeedError, FeedPoll};

use super::server::{ConnectionStatus, LiveDataBroker};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound one poll call may wait for events
    pub max_wait: Duration,
    /// Sleep before retrying after the feed reports no connection.
    /// Deliberately fixed, not exponential.
    pub retry_period: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(1),
            retry_period: Duration::from_secs(30),
        }
    }
}

pub struct EventDispatchLoop {
    running: Arc<AtomicBool>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatchLoop {
    /// Spawns the loop against a broker
    pub fn spawn(broker: Arc<LiveDataBroker>, config: DispatchConfig) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let loop_flag = Arc::clone(&running);

        let handle = tokio::spawn(async move {
            tracing::info!("event dispatch loop started");

            // cancellation is cooperative: the flag is checked once per
            // iteration, an in-flight poll is never preempted
            while loop_flag.load(Ordering::SeqCst) {
                match broker.adapter().poll_events(config.max_wait).await {
                    Ok(FeedPoll::Updates(updates)) => {
                        for update in updates {
                            broker.live_data_received(&update.unique_id, update.fields);
                        }
                    }
                    Ok(FeedPoll::Idle) => {}
                    Ok(FeedPoll::Disconnected) => {
                        tracing::warn!("feed signalled disconnect, terminating dispatch loop");
                        broker.set_connection_status(ConnectionStatus::NotConnected);
                        break;
                    }
                    Err(FeedError::ConnectionUnavailable(reason)) => {
                        tracing::warn!(
                            "no connection to the feed ({}), retrying in {:?}",
                            reason,
                            config.retry_period
                        );
                        tokio::time::sleep(config.retry_period).await;
                    }
                    Err(e) => {
                        // a single bad poll must not end the loop
                        tracing::error!("failed to dispatch feed events: {}", e);
                    }
                }
            }

            tracing::info!("event dispatch loop stopped");
        });

        Self {
            running,
            task_handle: Mutex::new(Some(handle)),
        }
    }

    /// Requests termination; the loop exits after its current iteration
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::server::{BrokerConfig, LiveDataBroker};
    use crate::broker::testing::MockFeedAdapter;
    use crate::feed::MarketDataUpdate;
    use crate::models::fields::FieldMap;
    use crate::resolver::NaiveResolver;

    fn broker_for(adapter: Arc<MockFeedAdapter>) -> Arc<LiveDataBroker> {
        Arc::new(LiveDataBroker::new(
            adapter,
            Arc::new(NaiveResolver::new("SIM")),
            BrokerConfig::default(),
        ))
    }

    fn fast_config() -> DispatchConfig {
        DispatchConfig {
            max_wait: Duration::from_millis(5),
            retry_period: Duration::from_millis(10),
        }
    }

    fn update(unique_id: &str) -> MarketDataUpdate {
        MarketDataUpdate {
            unique_id: unique_id.to_string(),
            fields: FieldMap::new(),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met within the wait budget");
    }

    #[tokio::test]
    async fn test_updates_are_routed_into_the_broker() {
        let adapter = Arc::new(MockFeedAdapter::new(false));
        adapter.script_poll(Ok(FeedPoll::Updates(vec![update("1"), update("2")])));
        let broker = broker_for(adapter);

        let dispatch = EventDispatchLoop::spawn(Arc::clone(&broker), fast_config());
        wait_until(|| broker.updates_received() >= 2).await;
        dispatch.stop();
    }

    #[tokio::test]
    async fn test_disconnect_signal_flips_status_and_ends_loop() {
        let adapter = Arc::new(MockFeedAdapter::new(false));
        adapter.script_poll(Ok(FeedPoll::Disconnected));
        let broker = broker_for(adapter);
        broker.connect().await.unwrap();

        let dispatch = EventDispatchLoop::spawn(Arc::clone(&broker), fast_config());
        wait_until(|| !dispatch.is_running()).await;

        // the loop does not restart itself; it just marks the status
        assert_eq!(broker.connection_status(), ConnectionStatus::NotConnected);
    }

    #[tokio::test]
    async fn test_unavailable_connection_backs_off_and_retries() {
        let adapter = Arc::new(MockFeedAdapter::new(false));
        adapter.script_poll(Err(FeedError::ConnectionUnavailable("session down".to_string())));
        adapter.script_poll(Ok(FeedPoll::Updates(vec![update("1")])));
        let broker = broker_for(adapter);

        let dispatch = EventDispatchLoop::spawn(Arc::clone(&broker), fast_config());
        // the loop survived the unavailable poll and dispatched afterwards
        wait_until(|| broker.updates_received() >= 1).await;
        assert!(dispatch.is_running());
        dispatch.stop();
    }

    #[tokio::test]
    async fn test_unexpected_poll_errors_are_swallowed() {
        let adapter = Arc::new(MockFeedAdapter::new(false));
        adapter.script_poll(Err(FeedError::Transport("malformed event".to_string())));
        adapter.script_poll(Ok(FeedPoll::Updates(vec![update("1")])));
        let broker = broker_for(adapter);

        let dispatch = EventDispatchLoop::spawn(Arc::clone(&broker), fast_config());
        wait_until(|| broker.updates_received() >= 1).await;
        dispatch.stop();
    }

    #[tokio::test]
    async fn test_stop_is_cooperative() {
        let adapter = Arc::new(MockFeedAdapter::new(false));
        let broker = broker_for(adapter);

        let dispatch = EventDispatchLoop::spawn(broker, fast_config());
        assert!(dispatch.is_running());

        dispatch.stop();
        wait_until(|| !dispatch.is_running()).await;
    }
}

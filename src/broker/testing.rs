//! Programmable feed adapter for broker tests
//!
//! Records every call, hands out canned images, and can be told to fail
//! subscribes, withhold handles for specific ids, or feed the dispatch loop
//! a scripted sequence of poll outcomes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::feed::{FeedAdapter, FeedError, FeedHandle, FeedPoll};
use crate::models::fields::{FieldMap, FieldValue};

pub struct MockFeedAdapter {
    connected: AtomicBool,
    next_handle: AtomicU64,
    pub snapshot_on_subscribe: bool,

    pub subscribe_calls: Mutex<Vec<Vec<String>>>,
    pub snapshot_calls: Mutex<Vec<Vec<String>>>,
    pub unsubscribe_calls: Mutex<Vec<Vec<FeedHandle>>>,

    fail_subscribe: AtomicBool,
    /// Ids silently left out of subscribe results, for partial-recovery tests
    omit_handles_for: Mutex<HashSet<String>>,
    /// Canned snapshot payloads; ids without an entry get a default image
    canned_images: Mutex<HashMap<String, Option<FieldMap>>>,
    /// Scripted poll outcomes for dispatch loop tests
    scripted_polls: Mutex<VecDeque<Result<FeedPoll, FeedError>>>,
}

impl MockFeedAdapter {
    pub fn new(snapshot_on_subscribe: bool) -> Self {
        Self {
            connected: AtomicBool::new(false),
            next_handle: AtomicU64::new(1),
            snapshot_on_subscribe,
            subscribe_calls: Mutex::new(Vec::new()),
            snapshot_calls: Mutex::new(Vec::new()),
            unsubscribe_calls: Mutex::new(Vec::new()),
            fail_subscribe: AtomicBool::new(false),
            omit_handles_for: Mutex::new(HashSet::new()),
            canned_images: Mutex::new(HashMap::new()),
            scripted_polls: Mutex::new(VecDeque::new()),
        }
    }

    pub fn default_image(unique_id: &str) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("bid".to_string(), FieldValue::Integer(100));
        fields.insert(
            "instrument".to_string(),
            FieldValue::Text(unique_id.to_string()),
        );
        fields
    }

    pub fn fail_next_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn omit_handle_for(&self, unique_id: &str) {
        self.omit_handles_for.lock().insert(unique_id.to_string());
    }

    pub fn set_image(&self, unique_id: &str, image: Option<FieldMap>) {
        self.canned_images.lock().insert(unique_id.to_string(), image);
    }

    pub fn script_poll(&self, outcome: Result<FeedPoll, FeedError>) {
        self.scripted_polls.lock().push_back(outcome);
    }

    pub fn subscribe_call_count(&self) -> usize {
        self.subscribe_calls.lock().len()
    }

    pub fn snapshot_call_count(&self) -> usize {
        self.snapshot_calls.lock().len()
    }
}

#[async_trait]
impl FeedAdapter for MockFeedAdapter {
    async fn connect(&self) -> Result<(), FeedError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), FeedError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(
        &self,
        unique_ids: &[String],
    ) -> Result<HashMap<String, FeedHandle>, FeedError> {
        self.subscribe_calls.lock().push(unique_ids.to_vec());
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(FeedError::Transport("injected subscribe failure".to_string()));
        }
        let omitted = self.omit_handles_for.lock().clone();
        let mut handles = HashMap::new();
        for unique_id in unique_ids {
            if omitted.contains(unique_id) {
                continue;
            }
            let handle = FeedHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
            handles.insert(unique_id.clone(), handle);
        }
        Ok(handles)
    }

    async fn unsubscribe(&self, handles: &[FeedHandle]) -> Result<(), FeedError> {
        self.unsubscribe_calls.lock().push(handles.to_vec());
        Ok(())
    }

    async fn snapshot(
        &self,
        unique_ids: &[String],
    ) -> Result<HashMap<String, Option<FieldMap>>, FeedError> {
        self.snapshot_calls.lock().push(unique_ids.to_vec());
        let canned = self.canned_images.lock();
        let mut images = HashMap::new();
        for unique_id in unique_ids {
            let image = canned
                .get(unique_id)
                .cloned()
                .unwrap_or_else(|| Some(Self::default_image(unique_id)));
            images.insert(unique_id.clone(), image);
        }
        Ok(images)
    }

    async fn poll_events(&self, max_wait: Duration) -> Result<FeedPoll, FeedError> {
        if let Some(outcome) = self.scripted_polls.lock().pop_front() {
            return outcome;
        }
        tokio::time::sleep(max_wait.min(Duration::from_millis(5))).await;
        Ok(FeedPoll::Idle)
    }

    fn snapshot_on_subscribe_required(&self, _unique_id: &str) -> bool {
        self.snapshot_on_subscribe
    }

    fn unique_id_scheme(&self) -> &str {
        "SIM"
    }
}

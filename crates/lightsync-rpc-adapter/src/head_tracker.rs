//! Head pointer derived from chain client notifications.
//!
//! `latest` is authoritative: it moves the pointer and is re-emitted. `sync`
//! is informational: it is re-emitted with both sides as hex numbers but never
//! touches the pointer. Subscribers are called in subscription order, on the
//! task that delivered the event.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwapOption;
use lightsync_client::{ChainClient, ClientError};
use lightsync_core::{Block, ChainEvent, EventKind, HeadEvent, SyncEvent};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type HeadHandler = Arc<dyn Fn(&HeadEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub struct HeadTracker {
    client: Arc<dyn ChainClient>,
    current: ArcSwapOption<String>,
    subscribers: Mutex<BTreeMap<SubscriptionId, (EventKind, HeadHandler)>>,
    next_id: AtomicU64,
}

impl HeadTracker {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self {
            client,
            current: ArcSwapOption::empty(),
            subscribers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&HeadEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.table().insert(id, (kind, Arc::new(handler)));
        id
    }

    /// Returns false if `id` was not (or no longer) subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.table().remove(&id).is_some()
    }

    pub fn on_latest(&self, block: &Block) {
        let head = block.number_hex();
        if self.current.load().as_deref() == Some(&head) {
            debug!(%head, "Duplicate latest notification ignored");
            return;
        }
        self.current.store(Some(Arc::new(head.clone())));
        debug!(%head, "Head advanced");
        self.emit(&HeadEvent::Latest(head));
    }

    pub fn on_sync(&self, new_block: Option<&Block>, old_block: Option<&Block>) {
        let event = SyncEvent::from_blocks(new_block, old_block);
        debug!(new = %event.new_block, old = %event.old_block, "Sync notification");
        self.emit(&HeadEvent::Sync(event));
    }

    /// Head number as reported by the chain client right now. Does not move
    /// the cached pointer.
    pub async fn get_latest_block(&self) -> Result<String, ClientError> {
        self.client
            .get_latest_block()
            .await?
            .map(|block| block.number_hex())
            .ok_or(ClientError::HeadUnavailable)
    }

    /// Last head seen through `latest`, `None` until the first one arrives.
    pub fn get_current_block(&self) -> Option<String> {
        self.current.load_full().map(|head| head.as_ref().clone())
    }

    /// Feed chain client events into the tracker, in delivery order, until
    /// the client's channel closes.
    pub fn follow(self: &Arc<Self>, mut events: broadcast::Receiver<ChainEvent>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => tracker.apply(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Head tracker lagged behind chain client events");
                    }
                    Err(RecvError::Closed) => {
                        info!("Chain client event stream closed");
                        break;
                    }
                }
            }
        })
    }

    pub fn apply(&self, event: &ChainEvent) {
        match event {
            ChainEvent::Latest(block) => self.on_latest(block),
            ChainEvent::Sync {
                new_block,
                old_block,
            } => self.on_sync(new_block.as_deref(), old_block.as_deref()),
        }
    }

    fn table(&self) -> MutexGuard<'_, BTreeMap<SubscriptionId, (EventKind, HeadHandler)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: &HeadEvent) {
        let kind = event.kind();
        // Handlers may subscribe or unsubscribe, so call them outside the lock.
        let handlers: Vec<HeadHandler> = self
            .table()
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightsync_client::memory::{synthetic_block, MemoryChainClient, Operation};
    use std::time::Duration;

    fn tracker() -> (Arc<MemoryChainClient>, Arc<HeadTracker>) {
        let client = Arc::new(MemoryChainClient::new());
        let tracker = Arc::new(HeadTracker::new(client.clone()));
        (client, tracker)
    }

    fn record(tracker: &HeadTracker, kind: EventKind) -> Arc<Mutex<Vec<HeadEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tracker.subscribe(kind, move |event| sink.lock().unwrap().push(event.clone()));
        seen
    }

    #[test]
    fn current_block_is_unknown_before_first_latest() {
        let (_, tracker) = tracker();
        assert_eq!(tracker.get_current_block(), None);
    }

    #[test]
    fn latest_sets_pointer_and_emits_hex_number() {
        let (_, tracker) = tracker();
        let seen = record(&tracker, EventKind::Latest);

        tracker.on_latest(&synthetic_block(0x64));

        assert_eq!(tracker.get_current_block().as_deref(), Some("0x64"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![HeadEvent::Latest("0x64".into())]
        );
    }

    #[test]
    fn repeated_latest_is_not_re_emitted() {
        let (_, tracker) = tracker();
        let seen = record(&tracker, EventKind::Latest);

        tracker.on_latest(&synthetic_block(7));
        tracker.on_latest(&synthetic_block(7));

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn latest_may_move_pointer_backwards() {
        let (_, tracker) = tracker();
        tracker.on_latest(&synthetic_block(10));
        tracker.on_latest(&synthetic_block(9));
        assert_eq!(tracker.get_current_block().as_deref(), Some("0x9"));
    }

    #[test]
    fn sync_is_re_emitted_but_does_not_move_pointer() {
        let (_, tracker) = tracker();
        let seen = record(&tracker, EventKind::Sync);
        tracker.on_latest(&synthetic_block(0x64));

        tracker.on_sync(Some(&synthetic_block(0x65)), Some(&synthetic_block(0x64)));

        assert_eq!(tracker.get_current_block().as_deref(), Some("0x64"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![HeadEvent::Sync(SyncEvent {
                new_block: "0x65".into(),
                old_block: "0x64".into(),
            })]
        );
    }

    #[test]
    fn sync_with_missing_sides_reports_zero() {
        let (_, tracker) = tracker();
        let seen = record(&tracker, EventKind::Sync);

        tracker.on_sync(Some(&synthetic_block(3)), None);
        tracker.on_sync(None, Some(&synthetic_block(3)));

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0],
            HeadEvent::Sync(SyncEvent {
                new_block: "0x3".into(),
                old_block: "0x0".into(),
            })
        );
        assert_eq!(
            seen[1],
            HeadEvent::Sync(SyncEvent {
                new_block: "0x0".into(),
                old_block: "0x3".into(),
            })
        );
    }

    #[test]
    fn handlers_run_in_subscription_order_and_only_for_their_kind() {
        let (_, tracker) = tracker();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            tracker.subscribe(EventKind::Latest, move |_| order.lock().unwrap().push(name));
        }
        let sync_calls = record(&tracker, EventKind::Sync);

        tracker.on_latest(&synthetic_block(1));

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
        assert!(sync_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn unsubscribed_handler_is_not_called() {
        let (_, tracker) = tracker();
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let id = tracker.subscribe(EventKind::Latest, move |_| *counter.lock().unwrap() += 1);

        tracker.on_latest(&synthetic_block(1));
        assert!(tracker.unsubscribe(id));
        assert!(!tracker.unsubscribe(id));
        tracker.on_latest(&synthetic_block(2));

        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let (_, tracker) = tracker();
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0));
        let weak = Arc::downgrade(&tracker);
        let (slot_in, calls_in) = (Arc::clone(&slot), Arc::clone(&calls));
        let id = tracker.subscribe(EventKind::Latest, move |_| {
            *calls_in.lock().unwrap() += 1;
            if let (Some(tracker), Some(id)) = (weak.upgrade(), *slot_in.lock().unwrap()) {
                tracker.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        tracker.on_latest(&synthetic_block(1));
        tracker.on_latest(&synthetic_block(2));

        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn get_latest_block_queries_client_without_moving_pointer() {
        let (client, tracker) = tracker();
        client.set_head(synthetic_block(0x2a));

        assert_eq!(tracker.get_latest_block().await.unwrap(), "0x2a");
        assert_eq!(tracker.get_current_block(), None);
        assert_eq!(client.call_count(Operation::GetLatestBlock), 1);
    }

    #[tokio::test]
    async fn get_latest_block_propagates_client_failure() {
        let (client, tracker) = tracker();
        client.fail(
            Operation::GetLatestBlock,
            ClientError::Transport("peer gone".into()),
        );

        let err = tracker.get_latest_block().await.unwrap_err();
        assert_eq!(err, ClientError::Transport("peer gone".into()));
    }

    #[tokio::test]
    async fn get_latest_block_without_head_is_unavailable() {
        let (_, tracker) = tracker();
        assert_eq!(
            tracker.get_latest_block().await.unwrap_err(),
            ClientError::HeadUnavailable
        );
    }

    #[tokio::test]
    async fn follow_applies_client_events_in_order() {
        let (client, tracker) = tracker();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [EventKind::Latest, EventKind::Sync] {
            let sink = Arc::clone(&seen);
            tracker.subscribe(kind, move |event| sink.lock().unwrap().push(event.clone()));
        }
        let task = tracker.follow(client.subscribe());

        client.set_head(synthetic_block(0x64));
        client.reorg(synthetic_block(0x65));

        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().unwrap().len() < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("events delivered");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                HeadEvent::Latest("0x64".into()),
                HeadEvent::Sync(SyncEvent {
                    new_block: "0x65".into(),
                    old_block: "0x64".into(),
                }),
                HeadEvent::Latest("0x65".into()),
            ]
        );
        assert_eq!(tracker.get_current_block().as_deref(), Some("0x65"));
        task.abort();
    }
}

//! Bounded event pipeline (spec.md §3, §4.4).
//!
//! Two queue families: one `local_outbound` queue per controller,
//! feeding the broker, and one queue per local store process. Chunking
//! exists only to bound broker message size; consumers treat chunks as
//! opaque batches and must preserve a node's intra-batch order.
use serde_json::Value;
use tokio::sync::mpsc;

/// A sequence of events produced by one `register_events` call.
pub type EventBatch = Vec<Value>;

/// Split a batch into fixed-size chunks, preserving order.
pub fn chunk_events(events: EventBatch, chunk_size: usize) -> Vec<EventBatch> {
    if events.is_empty() {
        return Vec::new();
    }
    events
        .chunks(chunk_size.max(1))
        .map(|c| c.to_vec())
        .collect()
}

/// One item on a per-store queue: a strictly alternating pattern of
/// zero-or-more `Events`, then exactly one `Flush` per round, with an
/// optional trailing `SimEnd` on the terminal round (spec.md §3).
#[derive(Debug, Clone)]
pub enum PerStoreItem {
    Events(EventBatch),
    Flush,
    SimEnd,
}

/// One item on the `local_outbound` queue.
enum LocalOutboundMsg {
    Batch(EventBatch),
    /// Barrier: the sender is notified once every `Batch` enqueued
    /// before this marker has been drained and published, letting
    /// `can_we_start_yet`'s `PublishFinished` effect wait for its own
    /// events to reach the broker before announcing
    /// `controller_finished` (spec.md §4.5's causal-order requirement).
    Flush(tokio::sync::oneshot::Sender<()>),
    Terminate,
}

/// The `local_outbound` queue: chunked batches bound for the broker,
/// terminated by a `Terminate` sentinel at SIMEND.
pub fn local_outbound_channel() -> (LocalOutboundSender, LocalOutboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LocalOutboundSender { tx }, LocalOutboundReceiver { rx })
}

#[derive(Clone)]
pub struct LocalOutboundSender {
    tx: mpsc::UnboundedSender<LocalOutboundMsg>,
}

impl LocalOutboundSender {
    pub fn push(&self, batch: EventBatch) {
        let _ = self.tx.send(LocalOutboundMsg::Batch(batch));
    }

    /// Enqueue a flush barrier and wait for the drainer to reach it.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        if self.tx.send(LocalOutboundMsg::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Terminates the draining share-events task (spec.md §4.4).
    pub fn terminate(&self) {
        let _ = self.tx.send(LocalOutboundMsg::Terminate);
    }
}

pub struct LocalOutboundReceiver {
    rx: mpsc::UnboundedReceiver<LocalOutboundMsg>,
}

impl LocalOutboundReceiver {
    /// Yields each batch in order; internally absorbs `Flush` barriers
    /// (acking them in place) and returns `None` once `Terminate` is
    /// consumed.
    pub async fn recv(&mut self) -> Option<EventBatch> {
        loop {
            match self.rx.recv().await? {
                LocalOutboundMsg::Batch(batch) => return Some(batch),
                LocalOutboundMsg::Flush(done_tx) => {
                    let _ = done_tx.send(());
                }
                LocalOutboundMsg::Terminate => return None,
            }
        }
    }
}

/// One queue per local store process.
fn per_store_queue_channel() -> (PerStoreQueueSender, PerStoreQueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PerStoreQueueSender { tx }, PerStoreQueueReceiver { rx })
}

#[derive(Clone)]
pub struct PerStoreQueueSender {
    tx: mpsc::UnboundedSender<PerStoreItem>,
}

impl PerStoreQueueSender {
    pub fn push(&self, item: PerStoreItem) {
        let _ = self.tx.send(item);
    }
}

pub struct PerStoreQueueReceiver {
    rx: mpsc::UnboundedReceiver<PerStoreItem>,
}

impl PerStoreQueueReceiver {
    /// `get_events`'s sole blocking point: suspends on an empty queue
    /// (spec.md §4.6, §5).
    pub async fn recv(&mut self) -> Option<PerStoreItem> {
        self.rx.recv().await
    }
}

/// The set of per-store queues for one node's local store processes.
pub struct PerStoreQueues {
    senders: Vec<PerStoreQueueSender>,
}

impl PerStoreQueues {
    pub fn new(count: usize) -> (Self, Vec<PerStoreQueueReceiver>) {
        let mut senders = Vec::with_capacity(count);
        let mut receivers = Vec::with_capacity(count);
        for _ in 0..count {
            let (tx, rx) = per_store_queue_channel();
            senders.push(tx);
            receivers.push(rx);
        }
        (PerStoreQueues { senders }, receivers)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Post a copy of `events` to every local store queue (spec.md §4.4:
    /// "a copy of the events is enqueued on *every* per-store queue").
    pub fn broadcast_events(&self, events: EventBatch) {
        for sender in &self.senders {
            sender.push(PerStoreItem::Events(events.clone()));
        }
    }

    pub fn broadcast_flush(&self) {
        for sender in &self.senders {
            sender.push(PerStoreItem::Flush);
        }
    }

    pub fn broadcast_simend(&self) {
        for sender in &self.senders {
            sender.push(PerStoreItem::SimEnd);
        }
    }

    pub fn get(&self, storeproc_id: usize) -> Option<&PerStoreQueueSender> {
        self.senders.get(storeproc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_preserve_order_and_size() {
        let events: EventBatch = (0..2500).map(Value::from).collect();
        let chunks = chunk_events(events, 1000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[2].len(), 500);
        assert_eq!(chunks[0][0], Value::from(0));
        assert_eq!(chunks[2][499], Value::from(2499));
    }

    #[test]
    fn empty_batch_chunks_to_nothing() {
        assert!(chunk_events(vec![], 1000).is_empty());
    }

    #[tokio::test]
    async fn local_outbound_sentinel_terminates() {
        let (tx, mut rx) = local_outbound_channel();
        tx.push(vec![Value::from(1)]);
        tx.terminate();
        assert_eq!(rx.recv().await, Some(vec![Value::from(1)]));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn flush_barrier_acks_after_preceding_batches_are_drained() {
        let (tx, mut rx) = local_outbound_channel();
        tx.push(vec![Value::from(1)]);
        tx.push(vec![Value::from(2)]);

        let flushed = tokio::spawn(async move {
            tx.flush().await;
        });

        // flush() must not resolve until the drainer has pulled both
        // batches that were enqueued ahead of the barrier.
        assert_eq!(rx.recv().await, Some(vec![Value::from(1)]));
        assert!(!flushed.is_finished());
        assert_eq!(rx.recv().await, Some(vec![Value::from(2)]));
        flushed.await.unwrap();
    }

    #[tokio::test]
    async fn per_store_queues_broadcast_to_all() {
        let (queues, mut receivers) = PerStoreQueues::new(3);
        queues.broadcast_events(vec![Value::from("a")]);
        queues.broadcast_flush();
        for rx in &mut receivers {
            assert!(matches!(rx.recv().await, Some(PerStoreItem::Events(_))));
            assert!(matches!(rx.recv().await, Some(PerStoreItem::Flush)));
        }
    }
}

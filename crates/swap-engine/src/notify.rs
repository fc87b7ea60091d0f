//! Notification dispatcher.
//!
//! Holds one FIFO registry of [`Watcher`]s per wallet event stream. Each
//! received event drains the whole registry once: every watcher is offered
//! the event, and the ones still pending go back to the front of the queue
//! ahead of watchers registered while the drain ran.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use lwk_wollet::elements::OutPoint;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::wallet::{TxEvent, UtxoEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// Resolve the trade to Settled or Expired from utxo events.
    Settlement,
    /// Record the transaction that spends the trade's inputs.
    Broadcast,
}

/// A registered interest of one trade in a set of outpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watcher {
    pub trade_id: String,
    pub kind: WatchKind,
    pub keys: HashSet<OutPoint>,
}

impl Watcher {
    pub fn new(trade_id: &str, kind: WatchKind, keys: impl IntoIterator<Item = OutPoint>) -> Self {
        Self {
            trade_id: trade_id.to_string(),
            kind,
            keys: keys.into_iter().collect(),
        }
    }

    pub fn matches_any<'a>(&self, outpoints: impl IntoIterator<Item = &'a OutPoint>) -> bool {
        outpoints.into_iter().any(|o| self.keys.contains(o))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The watcher is done and is dropped from the registry.
    Consumed,
    /// Keep the watcher for the next event.
    Pending,
}

/// Resolution callback invoked for each watcher on each event.
pub trait EventHandler<E>: Send + Sync {
    fn handle(&self, watcher: &Watcher, event: &E) -> Resolution;
}

/// Mutex-guarded FIFO of watchers.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    inner: Mutex<VecDeque<Watcher>>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, watcher: Watcher) {
        self.lock().push_back(watcher);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the registered watchers, in order.
    pub fn snapshot(&self) -> Vec<Watcher> {
        self.lock().iter().cloned().collect()
    }

    /// Offer `event` to every watcher currently queued, in registration
    /// order. The lock is not held while handlers run.
    pub fn drain<E>(&self, event: &E, handler: &dyn EventHandler<E>) -> usize {
        let current = std::mem::take(&mut *self.lock());
        let mut pending = VecDeque::with_capacity(current.len());
        let mut consumed = 0;
        for watcher in current {
            match handler.handle(&watcher, event) {
                Resolution::Consumed => consumed += 1,
                Resolution::Pending => pending.push_back(watcher),
            }
        }

        let mut queue = self.lock();
        // Registrations made during the drain go after the survivors.
        pending.extend(queue.drain(..));
        *queue = pending;
        consumed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Watcher>> {
        // A panicking handler never runs under this lock, so a poisoned
        // queue still holds consistent data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One registry per event kind, owned by a single settlement tracker.
#[derive(Debug, Default)]
pub struct Dispatcher {
    tx_queue: NotificationQueue,
    utxo_queue: NotificationQueue,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_tx(&self, watcher: Watcher) {
        self.tx_queue.push(watcher);
    }

    pub fn on_utxo(&self, watcher: Watcher) {
        self.utxo_queue.push(watcher);
    }

    pub fn tx_queue(&self) -> &NotificationQueue {
        &self.tx_queue
    }

    pub fn utxo_queue(&self) -> &NotificationQueue {
        &self.utxo_queue
    }

    pub fn dispatch_tx(&self, event: &TxEvent, handler: &dyn EventHandler<TxEvent>) -> usize {
        self.tx_queue.drain(event, handler)
    }

    pub fn dispatch_utxo(&self, event: &UtxoEvent, handler: &dyn EventHandler<UtxoEvent>) -> usize {
        self.utxo_queue.drain(event, handler)
    }
}

/// Spawn the two perpetual listeners. Each ends when its stream closes.
pub fn spawn_listeners(
    dispatcher: Arc<Dispatcher>,
    mut tx_events: UnboundedReceiver<TxEvent>,
    mut utxo_events: UnboundedReceiver<UtxoEvent>,
    tx_handler: Arc<dyn EventHandler<TxEvent>>,
    utxo_handler: Arc<dyn EventHandler<UtxoEvent>>,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let tx_dispatcher = Arc::clone(&dispatcher);
    let tx_task = tokio::spawn(async move {
        while let Some(event) = tx_events.recv().await {
            let consumed = tx_dispatcher.dispatch_tx(&event, tx_handler.as_ref());
            if consumed > 0 {
                log::debug!("notify: tx {} resolved {consumed} watcher(s)", event.txid);
            }
        }
        log::info!("notify: tx notification stream closed");
    });

    let utxo_task = tokio::spawn(async move {
        while let Some(event) = utxo_events.recv().await {
            let consumed = dispatcher.dispatch_utxo(&event, utxo_handler.as_ref());
            if consumed > 0 {
                log::debug!("notify: {:?} event resolved {consumed} watcher(s)", event.kind);
            }
        }
        log::info!("notify: utxo notification stream closed");
    });

    (tx_task, utxo_task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::UtxoEventKind;
    use lwk_wollet::elements::Txid;
    use lwk_wollet::elements::hashes::Hash;

    fn op(vout: u32) -> OutPoint {
        OutPoint::new(Txid::all_zeros(), vout)
    }

    fn spent(vouts: &[u32]) -> UtxoEvent {
        UtxoEvent {
            kind: UtxoEventKind::Spent,
            account_name: "market".into(),
            utxos: vouts.iter().map(|&v| op(v)).collect(),
            block: None,
        }
    }

    /// Consumes watchers whose keys intersect the event, recording order.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl EventHandler<UtxoEvent> for Recorder {
        fn handle(&self, watcher: &Watcher, event: &UtxoEvent) -> Resolution {
            self.seen.lock().unwrap().push(watcher.trade_id.clone());
            if watcher.matches_any(&event.utxos) {
                Resolution::Consumed
            } else {
                Resolution::Pending
            }
        }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let queue = NotificationQueue::new();
        queue.push(Watcher::new("a", WatchKind::Settlement, [op(1)]));
        queue.push(Watcher::new("b", WatchKind::Settlement, [op(2)]));
        queue.push(Watcher::new("c", WatchKind::Settlement, [op(3)]));

        let recorder = Recorder::default();
        let consumed = queue.drain(&spent(&[2]), &recorder);
        assert_eq!(consumed, 1);
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["a", "b", "c"]);

        let left: Vec<String> = queue.snapshot().into_iter().map(|w| w.trade_id).collect();
        assert_eq!(left, vec!["a", "c"]);
    }

    #[test]
    fn consumed_watcher_is_not_offered_again() {
        let queue = NotificationQueue::new();
        queue.push(Watcher::new("a", WatchKind::Settlement, [op(1)]));
        let recorder = Recorder::default();
        assert_eq!(queue.drain(&spent(&[1]), &recorder), 1);
        assert_eq!(queue.drain(&spent(&[1]), &recorder), 0);
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
        assert!(queue.is_empty());
    }

    /// Registers a new watcher from inside the drain.
    struct Reentrant<'a> {
        queue: &'a NotificationQueue,
    }

    impl EventHandler<UtxoEvent> for Reentrant<'_> {
        fn handle(&self, watcher: &Watcher, _: &UtxoEvent) -> Resolution {
            if watcher.trade_id == "a" {
                self.queue
                    .push(Watcher::new("late", WatchKind::Settlement, [op(9)]));
            }
            Resolution::Pending
        }
    }

    #[test]
    fn registrations_during_drain_queue_behind_survivors() {
        let queue = NotificationQueue::new();
        queue.push(Watcher::new("a", WatchKind::Settlement, [op(1)]));
        queue.push(Watcher::new("b", WatchKind::Settlement, [op(2)]));
        queue.drain(&spent(&[7]), &Reentrant { queue: &queue });

        let order: Vec<String> = queue.snapshot().into_iter().map(|w| w.trade_id).collect();
        assert_eq!(order, vec!["a", "b", "late"]);
    }

    #[tokio::test]
    async fn listener_drains_on_each_event() {
        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher.on_utxo(Watcher::new("a", WatchKind::Settlement, [op(1)]));
        dispatcher.on_utxo(Watcher::new("b", WatchKind::Settlement, [op(2)]));

        let (tx_sender, tx_rx) = tokio::sync::mpsc::unbounded_channel::<TxEvent>();
        let (utxo_sender, utxo_rx) = tokio::sync::mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder::default());
        let (tx_task, utxo_task) = spawn_listeners(
            Arc::clone(&dispatcher),
            tx_rx,
            utxo_rx,
            Arc::new(Recorder::default()) as Arc<dyn EventHandler<TxEvent>>,
            recorder.clone(),
        );

        utxo_sender.send(spent(&[1])).unwrap();
        utxo_sender.send(spent(&[2])).unwrap();
        drop(utxo_sender);
        drop(tx_sender);
        utxo_task.await.unwrap();
        tx_task.await.unwrap();

        assert!(dispatcher.utxo_queue().is_empty());
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["a", "b", "b"]);
    }

    impl EventHandler<TxEvent> for Recorder {
        fn handle(&self, _: &Watcher, _: &TxEvent) -> Resolution {
            Resolution::Pending
        }
    }
}

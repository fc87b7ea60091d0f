//! Settlement tracking.
//!
//! Accepted trades are watched through their spent outpoints. A utxo
//! "spent" event settles the trade, an "unlocked" event (the selection lock
//! lapsed unspent) expires it. Errors past the state transition are logged
//! and dropped; the next startup reconciliation repairs missed writes.

use std::collections::HashMap;
use std::sync::Arc;

use lwk_wollet::elements::OutPoint;
use tokio::task::JoinHandle;

use crate::error::{Error, Result, TradeError};
use crate::notify::{Dispatcher, EventHandler, Resolution, WatchKind, Watcher, spawn_listeners};
use crate::pset::decode_tx_hex;
use crate::repository::{TradePublisher, TradeRepository};
use crate::trade::{StatusCode, Trade};
use crate::wallet::{TxEvent, UtxoEvent, UtxoEventKind, Wallet};

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Outcome of a startup reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub expired: usize,
    pub rewatched: usize,
}

pub struct SettlementTracker {
    dispatcher: Arc<Dispatcher>,
    handler: Arc<SettlementHandler>,
}

impl SettlementTracker {
    pub fn new(
        trades: Arc<dyn TradeRepository>,
        wallet: Arc<dyn Wallet>,
        publisher: Arc<dyn TradePublisher>,
    ) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new()),
            handler: Arc::new(SettlementHandler {
                trades,
                wallet,
                publisher,
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Resolve `trade_id` when any of `keys` is spent or unlocked.
    pub fn watch(&self, trade_id: &str, keys: impl IntoIterator<Item = OutPoint>) {
        self.dispatcher
            .on_utxo(Watcher::new(trade_id, WatchKind::Settlement, keys));
    }

    /// Record the transaction that spends any of `keys` on the trade.
    pub fn watch_broadcast(&self, trade_id: &str, keys: impl IntoIterator<Item = OutPoint>) {
        self.dispatcher
            .on_tx(Watcher::new(trade_id, WatchKind::Broadcast, keys));
    }

    /// Take the wallet's notification streams and spawn both listeners.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(JoinHandle<()>, JoinHandle<()>)> {
        let tx_events = self.handler.wallet.tx_notifications()?;
        let utxo_events = self.handler.wallet.utxo_notifications()?;
        log::info!("settlement: listening for wallet notifications");
        Ok(spawn_listeners(
            Arc::clone(&self.dispatcher),
            tx_events,
            utxo_events,
            self.handler.clone(),
            self.handler.clone(),
        ))
    }

    /// Expire Accepted trades whose expiry has passed and re-register
    /// watchers for the rest, rebuilding the key set from the accepted
    /// transaction's inputs. Accepted trades get their utxos locked again
    /// until expiry.
    pub fn reconcile(&self, now: i64) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let trades = self.handler.trades.get_all_trades()?;
        for trade in trades {
            if !matches!(
                trade.status.code,
                StatusCode::Accepted | StatusCode::Completed
            ) {
                continue;
            }

            if trade.status.code == StatusCode::Accepted && trade.is_expired(now) {
                match self
                    .handler
                    .trades
                    .update_trade(&trade.id, &mut |t| Ok(t.expire(now)?))
                {
                    Ok(_) => {
                        log::info!("settlement: trade {} expired during reconciliation", trade.id);
                        report.expired += 1;
                    }
                    Err(e) => log::error!("settlement: failed to expire trade {}: {e}", trade.id),
                }
                continue;
            }

            match trade.accepted_outpoints() {
                Ok(keys) => {
                    if trade.status.code == StatusCode::Accepted {
                        if let Err(e) = self.handler.wallet.lock_utxos(
                            &trade.market.account_name,
                            &keys,
                            trade.expiry_time,
                        ) {
                            log::error!("settlement: cannot re-lock utxos of trade {}: {e}", trade.id);
                        }
                    }
                    if trade.tx_id.is_empty() {
                        self.watch_broadcast(&trade.id, keys.iter().copied());
                    }
                    self.watch(&trade.id, keys);
                    report.rewatched += 1;
                }
                Err(e) => {
                    log::warn!("settlement: cannot rebuild watch set for trade {}: {e}", trade.id)
                }
            }
        }
        log::info!(
            "settlement: reconciliation expired {} and re-watched {} trade(s)",
            report.expired,
            report.rewatched
        );
        Ok(report)
    }
}

struct SettlementHandler {
    trades: Arc<dyn TradeRepository>,
    wallet: Arc<dyn Wallet>,
    publisher: Arc<dyn TradePublisher>,
}

impl SettlementHandler {
    fn settle(&self, trade_id: &str, event: &UtxoEvent) {
        // Block time when known, otherwise the time the spend was seen.
        let timestamp = event
            .block
            .as_ref()
            .map(|b| b.timestamp)
            .filter(|&t| t > 0)
            .unwrap_or_else(now);

        match self
            .trades
            .update_trade(trade_id, &mut |t| Ok(t.settle(timestamp)?))
        {
            Ok(trade) => {
                log::info!("settlement: trade {trade_id} settled at {timestamp}");
                self.publish(trade);
            }
            Err(Error::Trade(e)) => log::warn!("settlement: trade {trade_id} not settled: {e}"),
            Err(e) => log::error!("settlement: failed to persist settled trade {trade_id}: {e}"),
        }
    }

    fn expire(&self, trade_id: &str) -> Resolution {
        let now = now();
        let mut awaiting_spend = false;
        let result = self.trades.update_trade(trade_id, &mut |t| {
            if t.status.code == StatusCode::Completed {
                awaiting_spend = true;
                return Ok(());
            }
            Ok(t.expire(now)?)
        });
        if awaiting_spend {
            log::debug!("settlement: trade {trade_id} completed, waiting for spend");
            return Resolution::Pending;
        }
        match result {
            Ok(_) => log::info!("settlement: trade {trade_id} expired"),
            Err(Error::Trade(TradeError::NotExpired { expiry_time, .. })) => {
                log::warn!(
                    "settlement: lock lapsed for trade {trade_id} before its expiry {expiry_time}"
                );
                return Resolution::Pending;
            }
            Err(Error::Trade(e)) => log::warn!("settlement: trade {trade_id} not expired: {e}"),
            Err(e) => log::error!("settlement: failed to persist expired trade {trade_id}: {e}"),
        }
        Resolution::Consumed
    }

    /// Hand the trade to the publisher off the listener task.
    fn publish(&self, trade: Trade) {
        let publisher = Arc::clone(&self.publisher);
        let wallet = Arc::clone(&self.wallet);
        let job = move || {
            let account = trade.market.account_name.clone();
            let balance = wallet.get_balance(&account).unwrap_or_else(|e| {
                log::warn!("settlement: balance of {account} unavailable: {e}");
                HashMap::new()
            });
            if let Err(e) = publisher.publish_trade_settled(&account, &balance, &trade) {
                log::warn!("settlement: publish for trade {} failed: {e}", trade.id);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => {
                std::thread::spawn(job);
            }
        }
    }
}

impl EventHandler<UtxoEvent> for SettlementHandler {
    fn handle(&self, watcher: &Watcher, event: &UtxoEvent) -> Resolution {
        if watcher.kind != WatchKind::Settlement || !watcher.matches_any(&event.utxos) {
            return Resolution::Pending;
        }
        match event.kind {
            UtxoEventKind::Spent => {
                self.settle(&watcher.trade_id, event);
                Resolution::Consumed
            }
            UtxoEventKind::Unlocked => self.expire(&watcher.trade_id),
            _ => Resolution::Pending,
        }
    }
}

impl EventHandler<TxEvent> for SettlementHandler {
    fn handle(&self, watcher: &Watcher, event: &TxEvent) -> Resolution {
        if watcher.kind != WatchKind::Broadcast {
            return Resolution::Pending;
        }
        let Some(tx_hex) = event.tx_hex.as_deref() else {
            return Resolution::Pending;
        };
        let tx = match decode_tx_hex(tx_hex) {
            Ok(tx) => tx,
            Err(e) => {
                log::warn!("settlement: undecodable tx {} in notification: {e}", event.txid);
                return Resolution::Pending;
            }
        };
        if !watcher.matches_any(tx.input.iter().map(|i| &i.previous_output)) {
            return Resolution::Pending;
        }

        let txid = event.txid.to_string();
        let result = self.trades.update_trade(&watcher.trade_id, &mut |t| {
            if t.tx_id.is_empty() {
                t.tx_id = txid.clone();
                t.tx_hex = tx_hex.to_string();
            }
            Ok(())
        });
        match result {
            Ok(_) => log::info!("settlement: trade {} broadcast as {txid}", watcher.trade_id),
            Err(e) => log::error!(
                "settlement: failed to record tx {txid} for trade {}: {e}",
                watcher.trade_id
            ),
        }
        Resolution::Consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryTradeRepository, InMemoryWallet, RecordingPublisher, accepted_trade};
    use crate::trade::TradeStatus;
    use crate::wallet::BlockDetails;

    struct Fixture {
        trades: Arc<InMemoryTradeRepository>,
        publisher: Arc<RecordingPublisher>,
        tracker: SettlementTracker,
    }

    fn fixture() -> Fixture {
        let trades = Arc::new(InMemoryTradeRepository::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let tracker = SettlementTracker::new(
            trades.clone(),
            Arc::new(InMemoryWallet::new()),
            publisher.clone(),
        );
        Fixture {
            trades,
            publisher,
            tracker,
        }
    }

    fn utxo_event(kind: UtxoEventKind, keys: &[OutPoint], timestamp: Option<i64>) -> UtxoEvent {
        UtxoEvent {
            kind,
            account_name: "market".into(),
            utxos: keys.to_vec(),
            block: timestamp.map(|timestamp| BlockDetails {
                hash: None,
                height: 100,
                timestamp,
            }),
        }
    }

    fn dispatch(f: &Fixture, event: &UtxoEvent) -> usize {
        f.tracker
            .dispatcher()
            .dispatch_utxo(event, f.tracker.handler.as_ref())
    }

    #[tokio::test]
    async fn spent_event_settles_with_block_time() {
        let f = fixture();
        let trade = accepted_trade(now() + 600);
        let keys = trade.accepted_outpoints().unwrap();
        f.trades.add_trade(&trade).unwrap();
        f.tracker.watch(&trade.id, keys.clone());

        assert_eq!(dispatch(&f, &utxo_event(UtxoEventKind::Spent, &keys, Some(1_700_000_000))), 1);
        let stored = f.trades.get(&trade.id).unwrap();
        assert_eq!(stored.status, TradeStatus::SETTLED);
        assert_eq!(stored.settlement_time, 1_700_000_000);
        assert!(f.publisher.wait_for(1).await);
    }

    #[tokio::test]
    async fn missing_block_time_falls_back_to_now() {
        let f = fixture();
        let trade = accepted_trade(now() + 600);
        let keys = trade.accepted_outpoints().unwrap();
        f.trades.add_trade(&trade).unwrap();
        f.tracker.watch(&trade.id, keys.clone());

        let before = now();
        dispatch(&f, &utxo_event(UtxoEventKind::Spent, &keys, Some(0)));
        let stored = f.trades.get(&trade.id).unwrap();
        assert!(stored.settlement_time >= before);
    }

    #[test]
    fn unrelated_events_keep_the_watcher() {
        let f = fixture();
        let trade = accepted_trade(now() + 600);
        let keys = trade.accepted_outpoints().unwrap();
        f.trades.add_trade(&trade).unwrap();
        f.tracker.watch(&trade.id, keys.clone());

        assert_eq!(dispatch(&f, &utxo_event(UtxoEventKind::Confirmed, &keys, Some(5))), 0);
        assert_eq!(dispatch(&f, &utxo_event(UtxoEventKind::Spent, &[], Some(5))), 0);
        assert_eq!(f.tracker.dispatcher().utxo_queue().len(), 1);
        assert_eq!(f.trades.get(&trade.id).unwrap().status, TradeStatus::ACCEPTED);
    }

    #[test]
    fn unlocked_event_expires() {
        let f = fixture();
        let trade = accepted_trade(now() - 1);
        let keys = trade.accepted_outpoints().unwrap();
        f.trades.add_trade(&trade).unwrap();
        f.tracker.watch(&trade.id, keys.clone());

        assert_eq!(dispatch(&f, &utxo_event(UtxoEventKind::Unlocked, &keys, None)), 1);
        assert_eq!(f.trades.get(&trade.id).unwrap().status, TradeStatus::EXPIRED);
    }

    #[tokio::test]
    async fn early_unlock_keeps_watching_for_spend() {
        let f = fixture();
        let trade = accepted_trade(now() + 600);
        let keys = trade.accepted_outpoints().unwrap();
        f.trades.add_trade(&trade).unwrap();
        f.tracker.watch(&trade.id, keys.clone());

        assert_eq!(dispatch(&f, &utxo_event(UtxoEventKind::Unlocked, &keys, None)), 0);
        assert_eq!(f.tracker.dispatcher().utxo_queue().len(), 1);
        assert_eq!(f.trades.get(&trade.id).unwrap().status, TradeStatus::ACCEPTED);

        assert_eq!(dispatch(&f, &utxo_event(UtxoEventKind::Spent, &keys, Some(42))), 1);
        assert_eq!(f.trades.get(&trade.id).unwrap().status, TradeStatus::SETTLED);
    }

    #[tokio::test]
    async fn completed_trade_ignores_unlock_until_spent() {
        let f = fixture();
        let mut trade = accepted_trade(now() - 1);
        trade.status = TradeStatus::COMPLETED;
        let keys = trade.accepted_outpoints().unwrap();
        f.trades.add_trade(&trade).unwrap();
        f.tracker.watch(&trade.id, keys.clone());

        assert_eq!(dispatch(&f, &utxo_event(UtxoEventKind::Unlocked, &keys, None)), 0);
        assert_eq!(f.tracker.dispatcher().utxo_queue().len(), 1);
        assert_eq!(f.trades.get(&trade.id).unwrap().status, TradeStatus::COMPLETED);

        assert_eq!(dispatch(&f, &utxo_event(UtxoEventKind::Spent, &keys, Some(77))), 1);
        let stored = f.trades.get(&trade.id).unwrap();
        assert_eq!(stored.status, TradeStatus::SETTLED);
        assert_eq!(stored.settlement_time, 77);
    }

    #[test]
    fn persistence_failure_is_swallowed() {
        let f = fixture();
        let trade = accepted_trade(now() + 600);
        let keys = trade.accepted_outpoints().unwrap();
        f.trades.add_trade(&trade).unwrap();
        f.tracker.watch(&trade.id, keys.clone());
        f.trades.set_unavailable(true);

        assert_eq!(dispatch(&f, &utxo_event(UtxoEventKind::Spent, &keys, Some(9))), 1);
        f.trades.set_unavailable(false);
        assert_eq!(f.trades.get(&trade.id).unwrap().status, TradeStatus::ACCEPTED);
    }

    #[test]
    fn reconcile_expires_and_rewatches() {
        let f = fixture();
        let stale = accepted_trade(now() - 10);
        let live = accepted_trade(now() + 600);
        f.trades.add_trade(&stale).unwrap();
        f.trades.add_trade(&live).unwrap();

        let report = f.tracker.reconcile(now()).unwrap();
        assert_eq!(report, ReconcileReport { expired: 1, rewatched: 1 });
        assert_eq!(f.trades.get(&stale.id).unwrap().status, TradeStatus::EXPIRED);

        let watched = f.tracker.dispatcher().utxo_queue().snapshot();
        assert_eq!(watched.len(), 1);
        assert_eq!(watched[0].trade_id, live.id);
        let keys = live.accepted_outpoints().unwrap();
        assert!(keys.iter().all(|k| watched[0].keys.contains(k)));
        assert_eq!(f.tracker.dispatcher().tx_queue().len(), 1);
    }

    #[test]
    fn reconcile_restores_utxo_locks() {
        let trades = Arc::new(InMemoryTradeRepository::new());
        let wallet = Arc::new(InMemoryWallet::new());
        let tracker = SettlementTracker::new(
            trades.clone(),
            wallet.clone(),
            Arc::new(RecordingPublisher::new()),
        );
        let live = accepted_trade(now() + 600);
        let stale = accepted_trade(now() - 10);
        trades.add_trade(&live).unwrap();
        trades.add_trade(&stale).unwrap();

        tracker.reconcile(now()).unwrap();
        for key in live.accepted_outpoints().unwrap() {
            assert_eq!(wallet.unlock_time_of(&key), Some(live.expiry_time));
        }
        for key in stale.accepted_outpoints().unwrap() {
            assert!(!wallet.is_locked(&key));
        }
    }

    #[test]
    fn tx_event_records_broadcast() {
        let f = fixture();
        let trade = accepted_trade(now() + 600);
        let keys = trade.accepted_outpoints().unwrap();
        f.trades.add_trade(&trade).unwrap();
        f.tracker.watch_broadcast(&trade.id, keys.clone());

        let (txid, tx_hex) = crate::testing::spending_tx(&keys);
        let event = TxEvent {
            kind: crate::wallet::TxEventKind::Unconfirmed,
            account_names: vec!["market".into()],
            txid,
            tx_hex: Some(tx_hex.clone()),
            block: None,
        };
        let consumed = f
            .tracker
            .dispatcher()
            .dispatch_tx(&event, f.tracker.handler.as_ref());
        assert_eq!(consumed, 1);
        let stored = f.trades.get(&trade.id).unwrap();
        assert_eq!(stored.tx_id, txid.to_string());
        assert_eq!(stored.tx_hex, tx_hex);
    }
}

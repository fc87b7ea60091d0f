//! Wallet poller: a dedicated OS thread that syncs every account against
//! Electrum and turns the differences between consecutive scans into
//! wallet notifications.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use swap_engine::elements::{OutPoint, Txid};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use super::LwkWallet;

// ── Snapshots ───────────────────────────────────────────────────────

/// Unspent outputs and known transactions of one account, with their
/// confirmation heights.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub utxos: HashMap<OutPoint, Option<u32>>,
    pub txs: HashMap<Txid, Option<u32>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    UtxoNew(OutPoint, Option<u32>),
    UtxoConfirmed(OutPoint, u32),
    UtxoSpent(OutPoint),
    TxSeen(Txid, Option<u32>),
    TxConfirmed(Txid, u32),
}

/// What happened between two scans of the same account.
pub fn diff(prev: &AccountSnapshot, next: &AccountSnapshot) -> Vec<Change> {
    let mut changes = Vec::new();

    for (txid, height) in &next.txs {
        match (prev.txs.get(txid), height) {
            (None, _) => changes.push(Change::TxSeen(*txid, *height)),
            (Some(None), Some(h)) => changes.push(Change::TxConfirmed(*txid, *h)),
            _ => {}
        }
    }
    for (outpoint, height) in &next.utxos {
        match (prev.utxos.get(outpoint), height) {
            (None, _) => changes.push(Change::UtxoNew(*outpoint, *height)),
            (Some(None), Some(h)) => changes.push(Change::UtxoConfirmed(*outpoint, *h)),
            _ => {}
        }
    }
    for outpoint in prev.utxos.keys() {
        if !next.utxos.contains_key(outpoint) {
            changes.push(Change::UtxoSpent(*outpoint));
        }
    }
    changes
}

/// Changes to report after a scan. Without a previous scan (first sync
/// after startup) nothing is known to have changed, except that the
/// outpoints in `history_spent` were spent by wallet transactions and may
/// belong to trades still waiting for settlement.
pub fn scan_changes(
    prev: Option<&AccountSnapshot>,
    next: &AccountSnapshot,
    history_spent: impl IntoIterator<Item = OutPoint>,
) -> Vec<Change> {
    match prev {
        Some(prev) => diff(prev, next),
        None => history_spent
            .into_iter()
            .filter(|outpoint| !next.utxos.contains_key(outpoint))
            .map(Change::UtxoSpent)
            .collect(),
    }
}

// ── Thread ──────────────────────────────────────────────────────────

#[derive(Debug)]
enum PollCmd {
    Shutdown,
}

/// Handle for stopping a running poller thread.
#[derive(Clone)]
pub struct PollerHandle {
    cmd_tx: UnboundedSender<PollCmd>,
}

impl PollerHandle {
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(PollCmd::Shutdown);
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// Maximum reconnection backoff.
    pub max_backoff: Duration,
}

impl PollerConfig {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Spawn the poller on a dedicated OS thread.
pub fn spawn_poller(wallet: Arc<LwkWallet>, config: PollerConfig) -> std::io::Result<PollerHandle> {
    let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("wallet-poller".into())
        .spawn(move || poller_thread_main(wallet, config, cmd_rx))?;
    Ok(PollerHandle { cmd_tx })
}

/// Drain pending commands. Returns true on shutdown.
fn should_stop(cmd_rx: &mut UnboundedReceiver<PollCmd>) -> bool {
    loop {
        match cmd_rx.try_recv() {
            Ok(PollCmd::Shutdown) => return true,
            Err(tokio::sync::mpsc::error::TryRecvError::Empty) => return false,
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => return true,
        }
    }
}

fn poller_thread_main(
    wallet: Arc<LwkWallet>,
    config: PollerConfig,
    mut cmd_rx: UnboundedReceiver<PollCmd>,
) {
    let mut backoff = config.poll_interval;
    log::info!("wallet_poller: started, interval {:?}", config.poll_interval);

    loop {
        if should_stop(&mut cmd_rx) {
            log::info!("wallet_poller: shutting down");
            return;
        }

        let now = chrono::Utc::now().timestamp();
        wallet.release_expired_locks(now);

        match wallet.sync_accounts() {
            Ok(()) => {
                backoff = config.poll_interval;
                std::thread::sleep(config.poll_interval);
            }
            Err(e) => {
                log::warn!("wallet_poller: sync failed ({e}), retrying in {backoff:?}");
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(config.max_backoff);
            }
        }
    }
}

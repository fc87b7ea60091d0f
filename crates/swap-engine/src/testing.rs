//! In-memory collaborators and fixtures for exercising the engine without
//! a wallet backend or a database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use lwk_wollet::elements::hashes::Hash;
use lwk_wollet::elements::pset::PartiallySignedTransaction;
use lwk_wollet::elements::secp256k1_zkp::{PublicKey, Secp256k1, SecretKey};
use lwk_wollet::elements::{
    Address, AddressParams, AssetId, LockTime, OutPoint, Script, Sequence, Transaction, TxIn,
    TxOut, Txid,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::coinselect;
use crate::error::{Error, Result, WalletError, WalletResult};
use crate::fee::{self, FeeInput, FeeOutput};
use crate::market::{FixedFee, Market, MarketPrice, StrategyKind};
use crate::pset::{add_pset_input, add_pset_output, encode_pset, encode_tx_hex, explicit_txout, new_pset};
use crate::repository::{MarketRepository, TradePublisher, TradeRepository};
use crate::trade::{SwapAccept, SwapRequest, Trade, TradeType, UnblindedInput};
use crate::wallet::{
    AccountInfo, AccountService, AddressInfo, NotificationService, TransactionService, TxEvent,
    TxOutput, Utxo, UtxoEvent, UtxoEventKind, UtxoSelection,
};

// ── Fixtures ────────────────────────────────────────────────────────

pub fn base_asset() -> AssetId {
    AssetId::from_slice(&[0xba; 32]).expect("valid asset id")
}

pub fn quote_asset() -> AssetId {
    AssetId::from_slice(&[0xc0; 32]).expect("valid asset id")
}

pub fn native_asset() -> AssetId {
    AssetId::from_slice(&[0x6f; 32]).expect("valid asset id")
}

/// Market quoting 1 base = 50 quote, 25 bps plus a 100 quote fixed fee.
pub fn test_market() -> Market {
    Market {
        account_name: "market".into(),
        base_asset: base_asset().to_string(),
        quote_asset: quote_asset().to_string(),
        percentage_fee: 25,
        fixed_fee: FixedFee {
            base_fee: 0,
            quote_fee: 100,
        },
        tradable: true,
        price: MarketPrice {
            base_price: "0.02".into(),
            quote_price: "50".into(),
        },
        strategy: StrategyKind::Pluggable,
    }
}

static COUNTER: AtomicU64 = AtomicU64::new(1);

/// A txid that no other fixture in the process uses.
pub fn unique_txid() -> Txid {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&n.to_le_bytes());
    bytes[31] = 0x5a;
    Txid::from_byte_array(bytes)
}

fn key_pair(seed: u64) -> PublicKey {
    let secp = Secp256k1::new();
    let mut bytes = [0x11u8; 32];
    bytes[..8].copy_from_slice(&seed.to_le_bytes());
    let secret = SecretKey::from_slice(&bytes).expect("valid secret key");
    PublicKey::from_secret_key(&secp, &secret)
}

/// A confidential segwit address derived from `seed`.
pub fn test_address(seed: u64) -> Address {
    let pubkey = lwk_wollet::elements::bitcoin::PublicKey::new(key_pair(seed));
    let blinder = key_pair(seed.wrapping_add(1_000_000));
    Address::p2wpkh(&pubkey, Some(blinder), &AddressParams::ELEMENTS)
}

pub fn explicit_utxo(account: &str, asset: AssetId, value: u64) -> Utxo {
    let address = test_address(COUNTER.load(Ordering::Relaxed));
    Utxo {
        outpoint: OutPoint::new(unique_txid(), 0),
        txout: explicit_txout(asset, value, &address.script_pubkey()),
        asset,
        value,
        asset_blinder: [0u8; 32],
        value_blinder: [0u8; 32],
        redeem_script: None,
        account: account.to_string(),
    }
}

/// A counterparty proposal against [`test_market`]. The counterparty's
/// single input carries 500 units more than it sends and takes them back
/// as change.
pub fn counterparty_request(trade_type: TradeType, base_amount: u64, quote_amount: u64) -> SwapRequest {
    let (asset_p, amount_p, asset_r, amount_r) = match trade_type {
        TradeType::Sell => (base_asset(), base_amount, quote_asset(), quote_amount),
        TradeType::Buy => (quote_asset(), quote_amount, base_asset(), base_amount),
    };
    let input = explicit_utxo("counterparty", asset_p, amount_p + 500);
    let receive = test_address(7);
    let change = test_address(8);

    let mut pset = new_pset();
    add_pset_input(&mut pset, &input);
    add_pset_output(&mut pset, &TxOutput::to_address(&receive, asset_r, amount_r), 0);
    add_pset_output(&mut pset, &TxOutput::to_address(&change, asset_p, 500), 0);

    SwapRequest {
        id: uuid::Uuid::new_v4().to_string(),
        amount_p,
        asset_p: asset_p.to_string(),
        amount_r,
        asset_r: asset_r.to_string(),
        transaction: encode_pset(&pset),
        unblinded_inputs: vec![UnblindedInput {
            index: 0,
            asset: asset_p.to_string(),
            amount: amount_p + 500,
            asset_blinder: hex::encode([0u8; 32]),
            amount_blinder: hex::encode([0u8; 32]),
        }],
        fee_amount: 0,
        fee_asset: String::new(),
    }
}

/// An Accepted sell trade whose accept transaction is the counterparty's
/// request PSET.
pub fn accepted_trade(expiry_time: i64) -> Trade {
    let now = chrono::Utc::now().timestamp();
    let request = counterparty_request(TradeType::Sell, 1_000, 50_000);
    let mut trade = Trade::new();
    trade
        .propose(request.clone(), &test_market(), TradeType::Sell, 120, now)
        .expect("valid fixture proposal");
    let accept = SwapAccept {
        id: uuid::Uuid::new_v4().to_string(),
        request_id: request.id,
        transaction: request.transaction,
        unblinded_inputs: vec![],
    };
    trade
        .accept(accept, expiry_time, now)
        .expect("fixture trade is in proposal");
    trade
}

/// Unsigned transaction with the PSET's inputs and explicit outputs.
pub fn unsigned_tx(pset: &PartiallySignedTransaction) -> Transaction {
    Transaction {
        version: 2,
        lock_time: LockTime::ZERO,
        input: pset
            .inputs()
            .iter()
            .map(|i| TxIn {
                previous_output: OutPoint::new(i.previous_txid, i.previous_output_index),
                is_pegin: false,
                script_sig: Script::new(),
                sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
                asset_issuance: Default::default(),
                witness: Default::default(),
            })
            .collect(),
        output: pset
            .outputs()
            .iter()
            .map(|o| {
                explicit_txout(
                    o.asset.unwrap_or_else(native_asset),
                    o.amount.unwrap_or(0),
                    &o.script_pubkey,
                )
            })
            .collect::<Vec<TxOut>>(),
    }
}

/// A transaction spending `keys`, as `(txid, hex)`.
pub fn spending_tx(keys: &[OutPoint]) -> (Txid, String) {
    let mut pset = new_pset();
    for key in keys {
        let mut utxo = explicit_utxo("market", native_asset(), 1_000);
        utxo.outpoint = *key;
        add_pset_input(&mut pset, &utxo);
    }
    add_pset_output(
        &mut pset,
        &TxOutput::to_address(&test_address(3), native_asset(), 900),
        0,
    );
    let tx = unsigned_tx(&pset);
    (tx.txid(), encode_tx_hex(&tx))
}

pub fn dummy_tx_hex() -> String {
    spending_tx(&[OutPoint::new(unique_txid(), 0)]).1
}

// ── Wallet ──────────────────────────────────────────────────────────

#[derive(Default)]
struct WalletState {
    utxos: HashMap<String, Vec<Utxo>>,
    locks: HashMap<OutPoint, i64>,
    last_unlock: HashMap<String, i64>,
    accounts: HashSet<String>,
    next_address: u64,
    signed: bool,
    blinded_with: Vec<UnblindedInput>,
    broadcast: Vec<Transaction>,
    fail_broadcast: bool,
    flat_fee: Option<u64>,
}

/// A wallet engine holding explicit utxos in memory. Blinding is a no-op
/// that records the extra inputs it was given.
pub struct InMemoryWallet {
    state: Mutex<WalletState>,
    lock_secs: i64,
    tx_sender: UnboundedSender<TxEvent>,
    utxo_sender: UnboundedSender<UtxoEvent>,
    tx_receiver: Mutex<Option<UnboundedReceiver<TxEvent>>>,
    utxo_receiver: Mutex<Option<UnboundedReceiver<UtxoEvent>>>,
}

impl Default for InMemoryWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWallet {
    pub fn new() -> Self {
        Self::with_lock_secs(120)
    }

    pub fn with_lock_secs(lock_secs: i64) -> Self {
        let (tx_sender, tx_receiver) = unbounded_channel();
        let (utxo_sender, utxo_receiver) = unbounded_channel();
        Self {
            state: Mutex::new(WalletState::default()),
            lock_secs,
            tx_sender,
            utxo_sender,
            tx_receiver: Mutex::new(Some(tx_receiver)),
            utxo_receiver: Mutex::new(Some(utxo_receiver)),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, WalletState> {
        self.state.lock().expect("wallet state poisoned")
    }

    /// Credit `account` with one explicit utxo per value.
    pub fn fund(&self, account: &str, asset: AssetId, values: &[u64]) -> Vec<Utxo> {
        let created: Vec<Utxo> = values
            .iter()
            .map(|&v| explicit_utxo(account, asset, v))
            .collect();
        let mut state = self.state();
        state.accounts.insert(account.to_string());
        state
            .utxos
            .entry(account.to_string())
            .or_default()
            .extend(created.iter().cloned());
        created
    }

    pub fn is_locked(&self, outpoint: &OutPoint) -> bool {
        self.state().locks.contains_key(outpoint)
    }

    pub fn last_unlock_time(&self, account: &str) -> Option<i64> {
        self.state().last_unlock.get(account).copied()
    }

    /// Unlock time of `outpoint`, if it is locked.
    pub fn unlock_time_of(&self, outpoint: &OutPoint) -> Option<i64> {
        self.state().locks.get(outpoint).copied()
    }

    /// Quote every fee estimate as `fee`, whatever the transaction shape.
    pub fn set_flat_fee(&self, fee: u64) {
        self.state().flat_fee = Some(fee);
    }

    pub fn was_signed(&self) -> bool {
        self.state().signed
    }

    pub fn blinded_with(&self) -> Vec<UnblindedInput> {
        self.state().blinded_with.clone()
    }

    pub fn broadcasted(&self) -> Vec<Transaction> {
        self.state().broadcast.clone()
    }

    pub fn fail_broadcasts(&self, fail: bool) {
        self.state().fail_broadcast = fail;
    }

    pub fn emit_utxo_event(&self, event: UtxoEvent) {
        let _ = self.utxo_sender.send(event);
    }

    pub fn emit_tx_event(&self, event: TxEvent) {
        let _ = self.tx_sender.send(event);
    }
}

impl AccountService for InMemoryWallet {
    fn create_account(&self, name: &str) -> WalletResult<AccountInfo> {
        let mut state = self.state();
        state.accounts.insert(name.to_string());
        Ok(AccountInfo {
            name: name.to_string(),
            index: state.accounts.len() as u32 - 1,
            xpub: String::new(),
        })
    }

    fn derive_addresses(&self, account: &str, count: usize) -> WalletResult<Vec<AddressInfo>> {
        let mut state = self.state();
        state.accounts.insert(account.to_string());
        let start = state.next_address;
        state.next_address += count as u64;
        Ok((start..start + count as u64)
            .map(|i| AddressInfo {
                address: test_address(10_000 + i),
                account: account.to_string(),
            })
            .collect())
    }

    fn derive_change_addresses(
        &self,
        account: &str,
        count: usize,
    ) -> WalletResult<Vec<AddressInfo>> {
        self.derive_addresses(account, count)
    }

    fn get_balance(&self, account: &str) -> WalletResult<HashMap<AssetId, u64>> {
        let state = self.state();
        let mut balance = HashMap::new();
        for utxo in state.utxos.get(account).into_iter().flatten() {
            *balance.entry(utxo.asset).or_insert(0) += utxo.value;
        }
        Ok(balance)
    }

    fn list_utxos(&self, account: &str) -> WalletResult<Vec<Utxo>> {
        Ok(self.state().utxos.get(account).cloned().unwrap_or_default())
    }
}

impl TransactionService for InMemoryWallet {
    fn native_asset(&self) -> AssetId {
        native_asset()
    }

    fn select_utxos(
        &self,
        account: &str,
        asset: AssetId,
        amount: u64,
    ) -> WalletResult<UtxoSelection> {
        let mut state = self.state();
        let free: Vec<Utxo> = state
            .utxos
            .get(account)
            .into_iter()
            .flatten()
            .filter(|u| !state.locks.contains_key(&u.outpoint))
            .cloned()
            .collect();
        let selection = coinselect::select(&free, amount, asset)
            .map_err(|e| WalletError::Selection(e.to_string()))?;

        let unlock_time = chrono::Utc::now().timestamp() + self.lock_secs;
        for utxo in &selection.utxos {
            state.locks.insert(utxo.outpoint, unlock_time);
        }
        state.last_unlock.insert(account.to_string(), unlock_time);
        drop(state);

        self.emit_utxo_event(UtxoEvent {
            kind: UtxoEventKind::Locked,
            account_name: account.to_string(),
            utxos: selection.utxos.iter().map(|u| u.outpoint).collect(),
            block: None,
        });
        Ok(UtxoSelection {
            utxos: selection.utxos,
            change: selection.change,
            unlock_time,
        })
    }

    fn lock_utxos(
        &self,
        _account: &str,
        outpoints: &[OutPoint],
        unlock_time: i64,
    ) -> WalletResult<()> {
        let mut state = self.state();
        for outpoint in outpoints {
            state.locks.insert(*outpoint, unlock_time);
        }
        Ok(())
    }

    fn estimate_fees(&self, inputs: &[FeeInput], outputs: &[FeeOutput]) -> WalletResult<u64> {
        if let Some(flat) = self.state().flat_fee {
            return Ok(flat);
        }
        Ok(fee::estimate_fee(inputs, outputs, fee::DEFAULT_SAT_PER_KVB))
    }

    fn blind_pset(
        &self,
        _pset: &mut PartiallySignedTransaction,
        extra_inputs: &[UnblindedInput],
    ) -> WalletResult<()> {
        self.state().blinded_with = extra_inputs.to_vec();
        Ok(())
    }

    fn sign_pset(&self, _pset: &mut PartiallySignedTransaction) -> WalletResult<()> {
        self.state().signed = true;
        Ok(())
    }

    fn finalize_pset(&self, pset: &PartiallySignedTransaction) -> WalletResult<Transaction> {
        if pset.n_inputs() == 0 {
            return Err(WalletError::Finalize("no inputs".into()));
        }
        Ok(unsigned_tx(pset))
    }

    fn broadcast_transaction(&self, tx: &Transaction) -> WalletResult<Txid> {
        let mut state = self.state();
        if state.fail_broadcast {
            return Err(WalletError::Broadcast("connection refused".into()));
        }
        state.broadcast.push(tx.clone());
        Ok(tx.txid())
    }
}

impl NotificationService for InMemoryWallet {
    fn tx_notifications(&self) -> WalletResult<UnboundedReceiver<TxEvent>> {
        self.tx_receiver
            .lock()
            .expect("receiver slot poisoned")
            .take()
            .ok_or_else(|| WalletError::Notifications("tx stream already taken".into()))
    }

    fn utxo_notifications(&self) -> WalletResult<UnboundedReceiver<UtxoEvent>> {
        self.utxo_receiver
            .lock()
            .expect("receiver slot poisoned")
            .take()
            .ok_or_else(|| WalletError::Notifications("utxo stream already taken".into()))
    }
}

// ── Repositories ────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryTradeRepository {
    trades: Mutex<Vec<Trade>>,
    unavailable: Mutex<bool>,
}

impl InMemoryTradeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every repository call fail with `ServiceUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().expect("flag poisoned") = unavailable;
    }

    /// Direct read, bypassing the unavailable flag.
    pub fn get(&self, id: &str) -> Option<Trade> {
        self.trades
            .lock()
            .expect("trades poisoned")
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    fn check(&self) -> Result<()> {
        if *self.unavailable.lock().expect("flag poisoned") {
            Err(Error::ServiceUnavailable("trade repository offline".into()))
        } else {
            Ok(())
        }
    }
}

impl TradeRepository for InMemoryTradeRepository {
    fn get_all_trades(&self) -> Result<Vec<Trade>> {
        self.check()?;
        Ok(self.trades.lock().expect("trades poisoned").clone())
    }

    fn add_trade(&self, trade: &Trade) -> Result<()> {
        self.check()?;
        self.trades
            .lock()
            .expect("trades poisoned")
            .push(trade.clone());
        Ok(())
    }

    fn update_trade(
        &self,
        trade_id: &str,
        mutator: &mut dyn FnMut(&mut Trade) -> Result<()>,
    ) -> Result<Trade> {
        self.check()?;
        let mut trades = self.trades.lock().expect("trades poisoned");
        let stored = trades
            .iter_mut()
            .find(|t| t.id == trade_id)
            .ok_or_else(|| Error::TradeNotFound(trade_id.to_string()))?;
        let mut updated = stored.clone();
        mutator(&mut updated)?;
        *stored = updated.clone();
        Ok(updated)
    }

    fn get_trade_by_swap_accept_id(&self, accept_id: &str) -> Result<Option<Trade>> {
        self.check()?;
        Ok(self
            .trades
            .lock()
            .expect("trades poisoned")
            .iter()
            .find(|t| t.swap_accept.as_ref().is_some_and(|a| a.id == accept_id))
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryMarketRepository {
    markets: Mutex<Vec<Market>>,
}

impl InMemoryMarketRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_market(&self, market: Market) {
        self.markets.lock().expect("markets poisoned").push(market);
    }
}

impl MarketRepository for InMemoryMarketRepository {
    fn get_market_by_assets(&self, base_asset: &str, quote_asset: &str) -> Result<Option<Market>> {
        Ok(self
            .markets
            .lock()
            .expect("markets poisoned")
            .iter()
            .find(|m| m.base_asset == base_asset && m.quote_asset == quote_asset)
            .cloned())
    }
}

/// Records every settled-trade publication.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Trade)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, Trade)> {
        self.published.lock().expect("publisher poisoned").clone()
    }

    /// Wait up to two seconds for at least `count` publications.
    pub async fn wait_for(&self, count: usize) -> bool {
        for _ in 0..200 {
            if self.published().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl TradePublisher for RecordingPublisher {
    fn publish_trade_settled(
        &self,
        account_name: &str,
        _balance: &HashMap<AssetId, u64>,
        trade: &Trade,
    ) -> Result<()> {
        self.published
            .lock()
            .expect("publisher poisoned")
            .push((account_name.to_string(), trade.clone()));
        Ok(())
    }
}

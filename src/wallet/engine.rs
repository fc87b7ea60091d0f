use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use lwk_common::Signer;
use lwk_signer::SwSigner;
use lwk_wollet::bitcoin::bip32::{DerivationPath, Xpub};
use lwk_wollet::blocking::BlockchainBackend;
use lwk_wollet::elements::confidential::{AssetBlindingFactor, ValueBlindingFactor};
use lwk_wollet::elements::pset::PartiallySignedTransaction;
use lwk_wollet::elements::{AssetId, OutPoint, Transaction, TxOutSecrets, Txid};
use lwk_wollet::{ElectrumClient, ElectrumUrl, WalletTx, Wollet, WolletDescriptor};
use swap_engine::fee::{self, FeeInput, FeeOutput};
use swap_engine::pset::encode_tx_hex;
use swap_engine::{
    coinselect, AccountInfo, AccountService, AddressInfo, BlockDetails, NotificationService,
    TransactionService, TxEvent, TxEventKind, UnblindedInput, Utxo, UtxoEvent, UtxoEventKind,
    UtxoSelection, WalletError, WalletResult,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::locks::LockTable;
use super::poller::{scan_changes, AccountSnapshot, Change};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::network::Network;

const ACCOUNTS_FILE: &str = "accounts.json";
const SELECTION_ATTEMPTS: usize = 3;

struct Account {
    name: String,
    index: u32,
    xpub: String,
    wollet: Wollet,
    next_external: u32,
    next_internal: u32,
    /// Last scan; `None` until the first sync.
    snapshot: Option<AccountSnapshot>,
}

/// Wallet engine over one `Wollet` per account, all derived from a single
/// mnemonic at `m/84'/{coin}'/{account}'`.
pub struct LwkWallet {
    network: Network,
    electrum_url: String,
    signer: SwSigner,
    dir: PathBuf,
    lock_secs: i64,
    accounts: RwLock<BTreeMap<String, Arc<Mutex<Account>>>>,
    locks: Mutex<LockTable>,
    tx_sender: UnboundedSender<TxEvent>,
    utxo_sender: UnboundedSender<UtxoEvent>,
    tx_receiver: Mutex<Option<UnboundedReceiver<TxEvent>>>,
    utxo_receiver: Mutex<Option<UnboundedReceiver<UtxoEvent>>>,
}

fn backend(e: impl std::fmt::Display) -> WalletError {
    WalletError::Backend(e.to_string())
}

fn poisoned<T>(_: T) -> WalletError {
    WalletError::Backend("wallet lock poisoned".into())
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn to_bytes(slice: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(slice);
    out
}

impl LwkWallet {
    /// Open the wallet and every account registered in the data directory.
    pub fn open(config: &Config) -> Result<Self> {
        let signer = SwSigner::new(&config.mnemonic, config.network.is_mainnet())
            .map_err(|e| Error::Wallet(format!("signer: {e}")))?;
        let dir = config.network_dir();
        fs::create_dir_all(&dir)?;

        let (tx_sender, tx_receiver) = unbounded_channel();
        let (utxo_sender, utxo_receiver) = unbounded_channel();
        let wallet = Self {
            network: config.network,
            electrum_url: config.electrum_url().to_string(),
            signer,
            dir,
            lock_secs: config.utxo_lock_secs,
            accounts: RwLock::new(BTreeMap::new()),
            locks: Mutex::new(LockTable::default()),
            tx_sender,
            utxo_sender,
            tx_receiver: Mutex::new(Some(tx_receiver)),
            utxo_receiver: Mutex::new(Some(utxo_receiver)),
        };

        for (name, index) in load_registry(&wallet.dir)? {
            let account = wallet
                .open_account(&name, index)
                .map_err(|e| Error::Wallet(e.to_string()))?;
            wallet
                .accounts
                .write()
                .map_err(|_| Error::Wallet("wallet lock poisoned".into()))?
                .insert(name, Arc::new(Mutex::new(account)));
        }
        Ok(wallet)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn open_account(&self, name: &str, index: u32) -> WalletResult<Account> {
        let coin = self.network.coin_type();
        let secp = lwk_wollet::bitcoin::secp256k1::Secp256k1::new();

        let master = self
            .signer
            .derive_xprv(&DerivationPath::master())
            .map_err(|e| WalletError::Account(format!("{e:?}")))?;
        let path: DerivationPath = format!("m/84'/{coin}'/{index}'")
            .parse()
            .map_err(|e| WalletError::Account(format!("{e}")))?;
        let xprv = self
            .signer
            .derive_xprv(&path)
            .map_err(|e| WalletError::Account(format!("{e:?}")))?;
        let xpub = Xpub::from_priv(&secp, &xprv);
        let slip77_key = self
            .signer
            .slip77_master_blinding_key()
            .map_err(|e| WalletError::Account(format!("slip77 key: {e}")))?;

        let descriptor_str = format!(
            "ct(slip77({}),elwpkh([{}/84'/{coin}'/{index}']{}/<0;1>/*))",
            slip77_key,
            master.fingerprint(&secp),
            xpub
        );
        let descriptor: WolletDescriptor = descriptor_str
            .parse()
            .map_err(|e: lwk_wollet::Error| WalletError::Account(e.to_string()))?;

        let persist_dir = self.dir.join("wallet_db").join(name);
        let wollet = Wollet::with_fs_persist(self.network.into_lwk(), descriptor, &persist_dir)
            .map_err(|e| WalletError::Account(e.to_string()))?;

        let next_external = wollet.address(None).map_err(backend)?.index();
        let next_internal = wollet.change(None).map_err(backend)?.index();
        Ok(Account {
            name: name.to_string(),
            index,
            xpub: xpub.to_string(),
            wollet,
            next_external,
            next_internal,
            snapshot: None,
        })
    }

    fn account(&self, name: &str) -> WalletResult<Arc<Mutex<Account>>> {
        self.accounts
            .read()
            .map_err(poisoned)?
            .get(name)
            .cloned()
            .ok_or_else(|| WalletError::Account(format!("unknown account {name}")))
    }

    fn all_accounts(&self) -> WalletResult<Vec<Arc<Mutex<Account>>>> {
        Ok(self.accounts.read().map_err(poisoned)?.values().cloned().collect())
    }

    fn lock_table(&self) -> WalletResult<MutexGuard<'_, LockTable>> {
        self.locks.lock().map_err(poisoned)
    }

    fn client(&self) -> WalletResult<ElectrumClient> {
        let url: ElectrumUrl = self
            .electrum_url
            .parse()
            .map_err(|e| WalletError::Backend(format!("electrum url: {e:?}")))?;
        ElectrumClient::new(&url).map_err(backend)
    }

    // ── Sync ─────────────────────────────────────────────────────────

    /// Full-scan every account and emit notifications for what changed
    /// since the previous scan. The first scan of an account reports every
    /// wallet outpoint spent in its history, so trades whose utxos were
    /// spent while the daemon was down still settle.
    pub fn sync_accounts(&self) -> WalletResult<()> {
        let mut client = self.client()?;
        for account in self.all_accounts()? {
            let mut account = account.lock().map_err(poisoned)?;
            lwk_wollet::full_scan_with_electrum_client(&mut account.wollet, &mut client)
                .map_err(backend)?;

            let txs = account.wollet.transactions().map_err(backend)?;
            let next = AccountSnapshot {
                utxos: account
                    .wollet
                    .utxos()
                    .map_err(backend)?
                    .iter()
                    .map(|u| (u.outpoint, u.height))
                    .collect(),
                txs: txs.iter().map(|tx| (tx.txid, tx.height)).collect(),
            };

            let history_spent = txs
                .iter()
                .flat_map(|tx| tx.inputs.iter().flatten())
                .map(|txout| txout.outpoint);
            let changes = scan_changes(account.snapshot.as_ref(), &next, history_spent);
            if !changes.is_empty() {
                log::debug!(
                    "wallet: {} changes on account {}",
                    changes.len(),
                    account.name
                );
            }
            self.emit_changes(&account.name, &txs, changes)?;
            account.snapshot = Some(next);
        }
        Ok(())
    }

    fn emit_changes(&self, account: &str, txs: &[WalletTx], changes: Vec<Change>) -> WalletResult<()> {
        let block_of = |tx: &WalletTx| {
            tx.height.map(|height| BlockDetails {
                hash: None,
                height,
                timestamp: tx.timestamp.map(i64::from).unwrap_or(0),
            })
        };
        let utxo_event = |kind, outpoint, block| UtxoEvent {
            kind,
            account_name: account.to_string(),
            utxos: vec![outpoint],
            block,
        };

        for change in changes {
            match change {
                Change::UtxoNew(outpoint, _) => {
                    let block = txs.iter().find(|t| t.txid == outpoint.txid).and_then(block_of);
                    let _ = self.utxo_sender.send(utxo_event(UtxoEventKind::New, outpoint, block));
                }
                Change::UtxoConfirmed(outpoint, _) => {
                    let block = txs.iter().find(|t| t.txid == outpoint.txid).and_then(block_of);
                    let _ = self
                        .utxo_sender
                        .send(utxo_event(UtxoEventKind::Confirmed, outpoint, block));
                }
                Change::UtxoSpent(outpoint) => {
                    self.lock_table()?.release(&outpoint);
                    let block = txs
                        .iter()
                        .find(|t| t.tx.input.iter().any(|i| i.previous_output == outpoint))
                        .and_then(block_of);
                    let _ = self
                        .utxo_sender
                        .send(utxo_event(UtxoEventKind::Spent, outpoint, block));
                }
                Change::TxSeen(txid, _) | Change::TxConfirmed(txid, _) => {
                    let Some(tx) = txs.iter().find(|t| t.txid == txid) else {
                        continue;
                    };
                    let kind = if tx.height.is_some() {
                        TxEventKind::Confirmed
                    } else {
                        TxEventKind::Unconfirmed
                    };
                    let _ = self.tx_sender.send(TxEvent {
                        kind,
                        account_names: vec![account.to_string()],
                        txid,
                        tx_hex: Some(encode_tx_hex(&tx.tx)),
                        block: block_of(tx),
                    });
                }
            }
        }
        Ok(())
    }

    /// Release lapsed utxo locks and report the still-unspent ones as
    /// unlocked.
    pub fn release_expired_locks(&self, now: i64) {
        let released = match self.lock_table() {
            Ok(mut table) => table.release_expired(now),
            Err(e) => {
                log::error!("wallet: {e}");
                return;
            }
        };
        for (account, outpoints) in released {
            log::debug!("wallet: {} utxo locks lapsed on {account}", outpoints.len());
            let _ = self.utxo_sender.send(UtxoEvent {
                kind: UtxoEventKind::Unlocked,
                account_name: account,
                utxos: outpoints,
                block: None,
            });
        }
    }

    fn account_utxos(&self, account: &Account) -> WalletResult<Vec<Utxo>> {
        let txs: HashMap<Txid, Transaction> = account
            .wollet
            .transactions()
            .map_err(backend)?
            .into_iter()
            .map(|t| (t.txid, t.tx))
            .collect();
        let mut utxos = Vec::new();
        for u in account.wollet.utxos().map_err(backend)? {
            let Some(txout) = txs
                .get(&u.outpoint.txid)
                .and_then(|tx| tx.output.get(u.outpoint.vout as usize))
            else {
                log::warn!("wallet: no transaction for utxo {}", u.outpoint);
                continue;
            };
            utxos.push(Utxo {
                outpoint: u.outpoint,
                txout: txout.clone(),
                asset: u.unblinded.asset,
                value: u.unblinded.value,
                asset_blinder: to_bytes(u.unblinded.asset_bf.into_inner().as_ref()),
                value_blinder: to_bytes(u.unblinded.value_bf.into_inner().as_ref()),
                redeem_script: None,
                account: account.name.clone(),
            });
        }
        Ok(utxos)
    }

    fn all_utxos(&self) -> WalletResult<HashMap<OutPoint, Utxo>> {
        let mut all = HashMap::new();
        for account in self.all_accounts()? {
            let account = account.lock().map_err(poisoned)?;
            for utxo in self.account_utxos(&account)? {
                all.insert(utxo.outpoint, utxo);
            }
        }
        Ok(all)
    }
}

// ── Account registry ─────────────────────────────────────────────────

fn load_registry(dir: &Path) -> Result<BTreeMap<String, u32>> {
    match fs::read_to_string(dir.join(ACCOUNTS_FILE)) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}

fn save_registry(dir: &Path, registry: &BTreeMap<String, u32>) -> WalletResult<()> {
    let json = serde_json::to_string_pretty(registry).map_err(backend)?;
    fs::write(dir.join(ACCOUNTS_FILE), json).map_err(backend)
}

// ── Capabilities ─────────────────────────────────────────────────────

impl AccountService for LwkWallet {
    fn create_account(&self, name: &str) -> WalletResult<AccountInfo> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        if let Some(existing) = accounts.get(name) {
            let existing = existing.lock().map_err(poisoned)?;
            return Ok(AccountInfo {
                name: existing.name.clone(),
                index: existing.index,
                xpub: existing.xpub.clone(),
            });
        }

        let mut registry: BTreeMap<String, u32> = BTreeMap::new();
        for (n, a) in accounts.iter() {
            registry.insert(n.clone(), a.lock().map_err(poisoned)?.index);
        }
        let index = registry.values().max().map_or(0, |i| i + 1);
        let account = self.open_account(name, index)?;
        registry.insert(name.to_string(), index);
        save_registry(&self.dir, &registry)?;

        let info = AccountInfo {
            name: name.to_string(),
            index,
            xpub: account.xpub.clone(),
        };
        accounts.insert(name.to_string(), Arc::new(Mutex::new(account)));
        log::info!("wallet: created account {name} at index {index}");
        Ok(info)
    }

    fn derive_addresses(&self, account: &str, count: usize) -> WalletResult<Vec<AddressInfo>> {
        let account = self.account(account)?;
        let mut account = account.lock().map_err(poisoned)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let index = account.next_external;
            let address = account.wollet.address(Some(index)).map_err(backend)?;
            account.next_external += 1;
            out.push(AddressInfo {
                address: address.address().clone(),
                account: account.name.clone(),
            });
        }
        Ok(out)
    }

    fn derive_change_addresses(&self, account: &str, count: usize) -> WalletResult<Vec<AddressInfo>> {
        let account = self.account(account)?;
        let mut account = account.lock().map_err(poisoned)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let index = account.next_internal;
            let address = account.wollet.change(Some(index)).map_err(backend)?;
            account.next_internal += 1;
            out.push(AddressInfo {
                address: address.address().clone(),
                account: account.name.clone(),
            });
        }
        Ok(out)
    }

    fn get_balance(&self, account: &str) -> WalletResult<HashMap<AssetId, u64>> {
        let account = self.account(account)?;
        let account = account.lock().map_err(poisoned)?;
        let balance = account.wollet.balance().map_err(backend)?;
        Ok(balance.iter().map(|(k, v)| (*k, *v)).collect())
    }

    fn list_utxos(&self, account: &str) -> WalletResult<Vec<Utxo>> {
        let account = self.account(account)?;
        let account = account.lock().map_err(poisoned)?;
        self.account_utxos(&account)
    }
}

impl TransactionService for LwkWallet {
    fn native_asset(&self) -> AssetId {
        self.network.policy_asset()
    }

    fn select_utxos(&self, account: &str, asset: AssetId, amount: u64) -> WalletResult<UtxoSelection> {
        let utxos = self.list_utxos(account)?;
        // The search runs without the lock table held; a utxo locked by a
        // concurrent selection in the meantime forces another round.
        for _ in 0..SELECTION_ATTEMPTS {
            let now = now();
            let free: Vec<Utxo> = {
                let locks = self.lock_table()?;
                utxos
                    .iter()
                    .filter(|u| !locks.is_locked(&u.outpoint, now))
                    .cloned()
                    .collect()
            };
            let selection = coinselect::select(&free, amount, asset)
                .map_err(|e| WalletError::Selection(e.to_string()))?;

            let outpoints: Vec<OutPoint> = selection.utxos.iter().map(|u| u.outpoint).collect();
            let mut locks = self.lock_table()?;
            if outpoints.iter().any(|op| locks.is_locked(op, now)) {
                log::debug!("wallet: selection on {account} raced another lock, retrying");
                continue;
            }
            let unlock_time = locks.lock(account, outpoints.iter().copied(), now, self.lock_secs);
            drop(locks);

            let _ = self.utxo_sender.send(UtxoEvent {
                kind: UtxoEventKind::Locked,
                account_name: account.to_string(),
                utxos: outpoints,
                block: None,
            });
            return Ok(UtxoSelection {
                utxos: selection.utxos,
                change: selection.change,
                unlock_time,
            });
        }
        Err(WalletError::Selection(format!(
            "utxos of {account} kept changing during selection"
        )))
    }

    fn lock_utxos(&self, account: &str, outpoints: &[OutPoint], unlock_time: i64) -> WalletResult<()> {
        self.lock_table()?
            .lock_until(account, outpoints.iter().copied(), unlock_time);
        log::debug!(
            "wallet: {} utxos of {account} locked until {unlock_time}",
            outpoints.len()
        );
        Ok(())
    }

    fn estimate_fees(&self, inputs: &[FeeInput], outputs: &[FeeOutput]) -> WalletResult<u64> {
        Ok(fee::estimate_fee(inputs, outputs, fee::DEFAULT_SAT_PER_KVB))
    }

    fn blind_pset(
        &self,
        pset: &mut PartiallySignedTransaction,
        extra_inputs: &[UnblindedInput],
    ) -> WalletResult<()> {
        let ours = self.all_utxos()?;
        let mut secrets: HashMap<usize, TxOutSecrets> = HashMap::new();

        for (index, input) in pset.inputs().iter().enumerate() {
            let outpoint = OutPoint::new(input.previous_txid, input.previous_output_index);
            let secret = if let Some(utxo) = ours.get(&outpoint) {
                txout_secrets(utxo.asset, utxo.value, &utxo.asset_blinder, &utxo.value_blinder)?
            } else if let Some(extra) = extra_inputs.iter().find(|e| e.index as usize == index) {
                let asset = extra
                    .asset_id()
                    .map_err(|e| WalletError::Blinding(e.to_string()))?;
                let abf = extra
                    .asset_blinder_bytes()
                    .map_err(|e| WalletError::Blinding(e.to_string()))?;
                let vbf = extra
                    .amount_blinder_bytes()
                    .map_err(|e| WalletError::Blinding(e.to_string()))?;
                txout_secrets(asset, extra.amount, &abf, &vbf)?
            } else {
                let prevout = input.witness_utxo.as_ref();
                match prevout.and_then(|o| Some((o.asset.explicit()?, o.value.explicit()?))) {
                    Some((asset, value)) => txout_secrets(asset, value, &[0; 32], &[0; 32])?,
                    None => {
                        return Err(WalletError::Blinding(format!(
                            "no secrets for confidential input {index}"
                        )))
                    }
                }
            };
            secrets.insert(index, secret);
        }

        let secp = lwk_wollet::elements::secp256k1_zkp::Secp256k1::new();
        let mut rng = rand::thread_rng();
        pset.blind_last(&mut rng, &secp, &secrets)
            .map_err(|e| WalletError::Blinding(format!("{e:?}")))?;
        Ok(())
    }

    fn sign_pset(&self, pset: &mut PartiallySignedTransaction) -> WalletResult<()> {
        for account in self.all_accounts()? {
            let account = account.lock().map_err(poisoned)?;
            account
                .wollet
                .add_details(pset)
                .map_err(|e| WalletError::Signing(format!("add_details: {e}")))?;
        }
        let signed = self
            .signer
            .sign(pset)
            .map_err(|e| WalletError::Signing(format!("{e:?}")))?;
        log::debug!("wallet: signed {signed} inputs");
        Ok(())
    }

    fn finalize_pset(&self, pset: &PartiallySignedTransaction) -> WalletResult<Transaction> {
        let mut last_err = WalletError::Finalize("wallet has no accounts".into());
        for account in self.all_accounts()? {
            let account = account.lock().map_err(poisoned)?;
            let mut candidate = pset.clone();
            match account.wollet.finalize(&mut candidate) {
                Ok(tx) => return Ok(tx),
                Err(e) => last_err = WalletError::Finalize(e.to_string()),
            }
        }
        Err(last_err)
    }

    fn broadcast_transaction(&self, tx: &Transaction) -> WalletResult<Txid> {
        let client = self.client()?;
        let txid = client
            .broadcast(tx)
            .map_err(|e| WalletError::Broadcast(e.to_string()))?;
        log::info!("wallet: broadcast {txid}");
        let _ = self.tx_sender.send(TxEvent {
            kind: TxEventKind::Broadcasted,
            account_names: vec![],
            txid,
            tx_hex: Some(encode_tx_hex(tx)),
            block: None,
        });
        Ok(txid)
    }
}

fn txout_secrets(
    asset: AssetId,
    value: u64,
    asset_blinder: &[u8; 32],
    value_blinder: &[u8; 32],
) -> WalletResult<TxOutSecrets> {
    let abf = AssetBlindingFactor::from_slice(asset_blinder)
        .map_err(|e| WalletError::Blinding(e.to_string()))?;
    let vbf = ValueBlindingFactor::from_slice(value_blinder)
        .map_err(|e| WalletError::Blinding(e.to_string()))?;
    Ok(TxOutSecrets::new(asset, abf, value, vbf))
}

impl NotificationService for LwkWallet {
    fn tx_notifications(&self) -> WalletResult<UnboundedReceiver<TxEvent>> {
        self.tx_receiver
            .lock()
            .map_err(poisoned)?
            .take()
            .ok_or_else(|| WalletError::Notifications("tx stream already taken".into()))
    }

    fn utxo_notifications(&self) -> WalletResult<UnboundedReceiver<UtxoEvent>> {
        self.utxo_receiver
            .lock()
            .map_err(poisoned)?
            .take()
            .ok_or_else(|| WalletError::Notifications("utxo stream already taken".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroize::Zeroizing;

    const MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn open(dir: &Path) -> LwkWallet {
        let config = Config {
            network: Network::LiquidRegtest,
            datadir: dir.to_path_buf(),
            mnemonic: Zeroizing::new(MNEMONIC.into()),
            ..Config::default()
        };
        LwkWallet::open(&config).unwrap()
    }

    #[test]
    fn accounts_get_sequential_indexes_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        {
            let wallet = open(dir.path());
            assert_eq!(wallet.create_account("fee_account").unwrap().index, 0);
            assert_eq!(wallet.create_account("market").unwrap().index, 1);
            assert_eq!(wallet.create_account("market").unwrap().index, 1);
        }
        let wallet = open(dir.path());
        let info = wallet.create_account("market").unwrap();
        assert_eq!(info.index, 1);
        assert_eq!(wallet.create_account("other").unwrap().index, 2);
    }

    #[test]
    fn accounts_derive_distinct_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = open(dir.path());
        wallet.create_account("a").unwrap();
        wallet.create_account("b").unwrap();

        let a = wallet.derive_addresses("a", 2).unwrap();
        let b = wallet.derive_addresses("b", 1).unwrap();
        let change = wallet.derive_change_addresses("a", 1).unwrap();
        assert_ne!(a[0].address, a[1].address);
        assert_ne!(a[0].address, b[0].address);
        assert_ne!(a[0].address, change[0].address);
        assert!(a[0].address.is_blinded());
    }

    #[test]
    fn unknown_account_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = open(dir.path());
        assert!(matches!(
            wallet.derive_addresses("missing", 1),
            Err(WalletError::Account(_))
        ));
    }

    #[test]
    fn notification_streams_are_taken_once() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = open(dir.path());
        assert!(wallet.utxo_notifications().is_ok());
        assert!(wallet.utxo_notifications().is_err());
        assert!(wallet.tx_notifications().is_ok());
    }

    #[test]
    fn restored_locks_lapse_at_trade_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = open(dir.path());
        let mut rx = wallet.utxo_notifications().unwrap();
        let outpoint = OutPoint::new(swap_engine::testing::unique_txid(), 1);
        wallet.lock_utxos("market", &[outpoint], 500).unwrap();
        assert!(wallet.lock_table().unwrap().is_locked(&outpoint, 499));

        wallet.release_expired_locks(499);
        assert!(rx.try_recv().is_err());
        wallet.release_expired_locks(500);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, UtxoEventKind::Unlocked);
        assert_eq!(event.account_name, "market");
    }

    #[test]
    fn lapsed_locks_emit_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = open(dir.path());
        let mut rx = wallet.utxo_notifications().unwrap();
        let outpoint = OutPoint::new(swap_engine::testing::unique_txid(), 0);
        wallet
            .lock_table()
            .unwrap()
            .lock("market", [outpoint], 0, 10);

        wallet.release_expired_locks(5);
        assert!(rx.try_recv().is_err());
        wallet.release_expired_locks(10);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, UtxoEventKind::Unlocked);
        assert_eq!(event.utxos, vec![outpoint]);
    }
}

//! Capability surface of the external wallet engine.
//!
//! The engine is reached only through these traits. It owns keys, address
//! derivation, chain access and utxo locking; the swap engine never touches
//! any of that directly. Calls are synchronous and may block.

use std::collections::HashMap;

use lwk_wollet::elements::pset::PartiallySignedTransaction;
use lwk_wollet::elements::secp256k1_zkp::PublicKey;
use lwk_wollet::elements::{Address, AssetId, OutPoint, Script, Transaction, TxOut, Txid};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::WalletResult;
use crate::fee::{FeeInput, FeeOutput};
use crate::pset::{add_pset_input, add_pset_output, new_pset};
use crate::trade::UnblindedInput;

/// A spendable output owned by one wallet account, already unblinded.
#[derive(Debug, Clone, PartialEq)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub txout: TxOut,
    pub asset: AssetId,
    pub value: u64,
    pub asset_blinder: [u8; 32],
    pub value_blinder: [u8; 32],
    /// Present for script-locked outputs; grows the witness.
    pub redeem_script: Option<Script>,
    pub account: String,
}

/// An output to append to a transaction under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct TxOutput {
    pub asset: AssetId,
    pub amount: u64,
    pub script_pubkey: Script,
    /// When set, the output is blinded to this key.
    pub blinding_pubkey: Option<PublicKey>,
}

impl TxOutput {
    /// Pay `amount` of `asset` to a (possibly confidential) address.
    pub fn to_address(address: &Address, asset: AssetId, amount: u64) -> Self {
        Self {
            asset,
            amount,
            script_pubkey: address.script_pubkey(),
            blinding_pubkey: address.blinding_pubkey,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub name: String,
    pub index: u32,
    pub xpub: String,
}

#[derive(Debug, Clone)]
pub struct AddressInfo {
    pub address: Address,
    pub account: String,
}

/// Result of a successful `select_utxos` call. The chosen utxos are locked
/// by the engine until `unlock_time` (unix seconds).
#[derive(Debug, Clone)]
pub struct UtxoSelection {
    pub utxos: Vec<Utxo>,
    pub change: u64,
    pub unlock_time: i64,
}

// ── Notifications ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDetails {
    pub hash: Option<String>,
    pub height: u32,
    /// Unix seconds; 0 when the engine does not know it.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEventKind {
    Unconfirmed,
    Confirmed,
    Broadcasted,
}

#[derive(Debug, Clone)]
pub struct TxEvent {
    pub kind: TxEventKind,
    pub account_names: Vec<String>,
    pub txid: Txid,
    pub tx_hex: Option<String>,
    pub block: Option<BlockDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtxoEventKind {
    New,
    Confirmed,
    Locked,
    Unlocked,
    Spent,
}

#[derive(Debug, Clone)]
pub struct UtxoEvent {
    pub kind: UtxoEventKind,
    pub account_name: String,
    pub utxos: Vec<OutPoint>,
    pub block: Option<BlockDetails>,
}

// ── Capabilities ────────────────────────────────────────────────────

pub trait AccountService: Send + Sync {
    fn create_account(&self, name: &str) -> WalletResult<AccountInfo>;

    fn derive_addresses(&self, account: &str, count: usize) -> WalletResult<Vec<AddressInfo>>;

    fn derive_change_addresses(
        &self,
        account: &str,
        count: usize,
    ) -> WalletResult<Vec<AddressInfo>>;

    fn get_balance(&self, account: &str) -> WalletResult<HashMap<AssetId, u64>>;

    fn list_utxos(&self, account: &str) -> WalletResult<Vec<Utxo>>;
}

pub trait TransactionService: Send + Sync {
    /// The network's native asset, used for fees.
    fn native_asset(&self) -> AssetId;

    /// Choose and lock utxos of `asset` covering `amount` on `account`.
    fn select_utxos(&self, account: &str, asset: AssetId, amount: u64)
    -> WalletResult<UtxoSelection>;

    /// Reserve `outpoints` on `account` until `unlock_time`. Used to
    /// restore the locks of in-flight trades after a restart.
    fn lock_utxos(&self, account: &str, outpoints: &[OutPoint], unlock_time: i64)
    -> WalletResult<()>;

    fn estimate_fees(&self, inputs: &[FeeInput], outputs: &[FeeOutput]) -> WalletResult<u64>;

    fn create_pset(
        &self,
        inputs: &[Utxo],
        outputs: &[TxOutput],
    ) -> WalletResult<PartiallySignedTransaction> {
        let mut pset = new_pset();
        self.update_pset(&mut pset, inputs, outputs)?;
        Ok(pset)
    }

    /// Append inputs then outputs. New outputs name the first appended input
    /// (or input 0 when none are appended) as their blinder.
    fn update_pset(
        &self,
        pset: &mut PartiallySignedTransaction,
        inputs: &[Utxo],
        outputs: &[TxOutput],
    ) -> WalletResult<()> {
        let blinder_index = if inputs.is_empty() {
            0
        } else {
            pset.n_inputs() as u32
        };
        for utxo in inputs {
            add_pset_input(pset, utxo);
        }
        for output in outputs {
            add_pset_output(pset, output, blinder_index);
        }
        Ok(())
    }

    /// Blind every confidential output in one pass. `extra_inputs` carries
    /// secrets for inputs the engine does not own.
    fn blind_pset(
        &self,
        pset: &mut PartiallySignedTransaction,
        extra_inputs: &[UnblindedInput],
    ) -> WalletResult<()>;

    /// Sign every input owned by the engine.
    fn sign_pset(&self, pset: &mut PartiallySignedTransaction) -> WalletResult<()>;

    fn finalize_pset(&self, pset: &PartiallySignedTransaction) -> WalletResult<Transaction>;

    fn broadcast_transaction(&self, tx: &Transaction) -> WalletResult<Txid>;
}

pub trait NotificationService: Send + Sync {
    /// Hand out the transaction event stream. Only one consumer may hold it.
    fn tx_notifications(&self) -> WalletResult<UnboundedReceiver<TxEvent>>;

    /// Hand out the utxo event stream. Only one consumer may hold it.
    fn utxo_notifications(&self) -> WalletResult<UnboundedReceiver<UtxoEvent>>;
}

/// The full wallet engine surface.
pub trait Wallet: AccountService + TransactionService + NotificationService {}

impl<T: AccountService + TransactionService + NotificationService> Wallet for T {}

//! Swap transaction builder.
//!
//! Both call shapes share one pipeline: add this side's inputs and outputs,
//! pay the network fee from the fee account, blind every confidential
//! output in a single pass, then sign the inputs the wallet owns.

use lwk_wollet::elements::AssetId;
use lwk_wollet::elements::pset::PartiallySignedTransaction;

use crate::error::{Error, Result, WalletError};
use crate::fee::{FeeOutput, pset_fee_shape};
use crate::pset::add_fee_output;
use crate::trade::UnblindedInput;
use crate::wallet::{TxOutput, Utxo, Wallet};

/// A signed transaction plus everything needed to track it.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub pset: PartiallySignedTransaction,
    /// Market-side and fee-side utxos spent by the transaction.
    pub selected_utxos: Vec<Utxo>,
    /// Secrets of the inputs added by this side, at their PSET indices.
    pub unblinded_inputs: Vec<UnblindedInput>,
    /// Lock expiry of the primary asset selection.
    pub unlock_time: i64,
    pub fee: u64,
}

/// Counterparty swap to complete on `account`.
#[derive(Debug, Clone)]
pub struct SwapCompletion<'a> {
    /// The counterparty's partial transaction.
    pub pset: PartiallySignedTransaction,
    pub account: &'a str,
    /// What the market pays out.
    pub send_asset: AssetId,
    pub send_amount: u64,
    /// What the market receives.
    pub receive_asset: AssetId,
    pub receive_amount: u64,
    /// Secrets of the counterparty's own inputs.
    pub counterparty_inputs: &'a [UnblindedInput],
}

pub struct SwapBuilder<'a> {
    wallet: &'a dyn Wallet,
    fee_account: &'a str,
}

impl<'a> SwapBuilder<'a> {
    pub fn new(wallet: &'a dyn Wallet, fee_account: &'a str) -> Self {
        Self {
            wallet,
            fee_account,
        }
    }

    /// Extend the counterparty's PSET with the market's payout inputs, its
    /// change and receive outputs, and the network fee.
    pub fn build_swap_completion(&self, swap: SwapCompletion<'_>) -> Result<BuildResult> {
        let mut pset = swap.pset;
        let mut added = Added::default();

        let selection = self
            .wallet
            .select_utxos(swap.account, swap.send_asset, swap.send_amount)?;
        let mut outputs = Vec::with_capacity(2);
        let receive = self.fresh_address(swap.account, false)?;
        outputs.push(TxOutput::to_address(
            &receive,
            swap.receive_asset,
            swap.receive_amount,
        ));
        if selection.change > 0 {
            let change = self.fresh_address(swap.account, true)?;
            outputs.push(TxOutput::to_address(
                &change,
                swap.send_asset,
                selection.change,
            ));
        }
        self.append(&mut pset, &selection.utxos, &outputs, &mut added)?;

        let fee = self.pay_network_fee(&mut pset, &mut added)?;
        self.finish(
            pset,
            swap.counterparty_inputs,
            added,
            selection.unlock_time,
            fee,
        )
    }

    /// A new transaction from `account` paying every output in `outputs`.
    /// The unlock time is that of the first output's asset.
    pub fn build_disbursement(&self, account: &str, outputs: &[TxOutput]) -> Result<BuildResult> {
        if outputs.is_empty() {
            return Err(Error::Pset("disbursement needs at least one output".into()));
        }

        let mut totals: Vec<(AssetId, u64)> = Vec::new();
        for out in outputs {
            match totals.iter_mut().find(|(asset, _)| *asset == out.asset) {
                Some((_, total)) => {
                    *total = total
                        .checked_add(out.amount)
                        .ok_or_else(|| Error::Pset("output total overflows".into()))?
                }
                None => totals.push((out.asset, out.amount)),
            }
        }

        let mut pset = crate::pset::new_pset();
        let mut added = Added::default();
        let mut inputs = Vec::new();
        let mut all_outputs = outputs.to_vec();
        let mut unlock_time = None;
        for (asset, total) in totals {
            let selection = self.wallet.select_utxos(account, asset, total)?;
            unlock_time.get_or_insert(selection.unlock_time);
            if selection.change > 0 {
                let change = self.fresh_address(account, true)?;
                all_outputs.push(TxOutput::to_address(&change, asset, selection.change));
            }
            inputs.extend(selection.utxos);
        }
        self.append(&mut pset, &inputs, &all_outputs, &mut added)?;

        let fee = self.pay_network_fee(&mut pset, &mut added)?;
        self.finish(pset, &[], added, unlock_time.unwrap_or_default(), fee)
    }

    /// Fund the fee from the fee account. The provisional target carries a
    /// margin of one confidential output; once the fee change output is in
    /// place the fee is re-estimated and the change absorbs the difference.
    fn pay_network_fee(
        &self,
        pset: &mut PartiallySignedTransaction,
        added: &mut Added,
    ) -> Result<u64> {
        let native = self.wallet.native_asset();
        let estimate = self.estimate(pset, &[FeeOutput::fee()])?;
        let with_extra = self.estimate(
            pset,
            &[FeeOutput::fee(), FeeOutput::confidential_p2wpkh()],
        )?;
        let margin = with_extra.saturating_sub(estimate);
        let provisional = estimate + margin;

        let selection = self
            .wallet
            .select_utxos(self.fee_account, native, provisional)?;
        let mut fee = provisional;
        if selection.change > 0 {
            let change = self.fresh_address(self.fee_account, true)?;
            let output = TxOutput::to_address(&change, native, selection.change);
            self.append(pset, &selection.utxos, &[output], added)?;

            let final_fee = self.estimate(pset, &[FeeOutput::fee()])?;
            let adjusted = (selection.change as i128) + (provisional as i128) - (final_fee as i128);
            if adjusted < 0 {
                return Err(Error::FeeEstimation(format!(
                    "fee change {} cannot absorb final fee {final_fee}",
                    selection.change
                )));
            }
            let last = pset.n_outputs() - 1;
            pset.outputs_mut()[last].amount = Some(adjusted as u64);
            fee = final_fee;
        } else {
            self.append(pset, &selection.utxos, &[], added)?;
        }

        add_fee_output(pset, native, fee);
        log::debug!(
            "builder: fee {fee} sat (provisional {provisional}) over {} inputs",
            pset.n_inputs()
        );
        Ok(fee)
    }

    fn estimate(&self, pset: &PartiallySignedTransaction, extra: &[FeeOutput]) -> Result<u64> {
        let (inputs, mut outputs) = pset_fee_shape(pset);
        outputs.extend_from_slice(extra);
        Ok(self.wallet.estimate_fees(&inputs, &outputs)?)
    }

    fn fresh_address(
        &self,
        account: &str,
        change: bool,
    ) -> Result<lwk_wollet::elements::Address> {
        let derived = if change {
            self.wallet.derive_change_addresses(account, 1)?
        } else {
            self.wallet.derive_addresses(account, 1)?
        };
        derived
            .into_iter()
            .next()
            .map(|info| info.address)
            .ok_or_else(|| WalletError::Account(format!("no address derived for {account}")).into())
    }

    fn append(
        &self,
        pset: &mut PartiallySignedTransaction,
        inputs: &[Utxo],
        outputs: &[TxOutput],
        added: &mut Added,
    ) -> Result<()> {
        let first = pset.n_inputs() as u32;
        self.wallet.update_pset(pset, inputs, outputs)?;
        for (offset, utxo) in inputs.iter().enumerate() {
            added.unblinded.push(UnblindedInput {
                index: first + offset as u32,
                asset: utxo.asset.to_string(),
                amount: utxo.value,
                asset_blinder: hex::encode(utxo.asset_blinder),
                amount_blinder: hex::encode(utxo.value_blinder),
            });
            added.utxos.push(utxo.clone());
        }
        Ok(())
    }

    fn finish(
        &self,
        mut pset: PartiallySignedTransaction,
        extra_inputs: &[UnblindedInput],
        added: Added,
        unlock_time: i64,
        fee: u64,
    ) -> Result<BuildResult> {
        self.wallet.blind_pset(&mut pset, extra_inputs)?;
        self.wallet.sign_pset(&mut pset)?;
        Ok(BuildResult {
            pset,
            selected_utxos: added.utxos,
            unblinded_inputs: added.unblinded,
            unlock_time,
            fee,
        })
    }
}

#[derive(Default)]
struct Added {
    utxos: Vec<Utxo>,
    unblinded: Vec<UnblindedInput>,
}

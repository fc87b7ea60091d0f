use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use lwk_wollet::elements::confidential::{Asset, Nonce, Value as ConfValue};
use lwk_wollet::elements::encode::{deserialize, serialize};
use lwk_wollet::elements::pset::PartiallySignedTransaction;
use lwk_wollet::elements::{AssetId, OutPoint, Script, Sequence, Transaction, TxOut, TxOutWitness};

use crate::error::{Error, Result};
use crate::wallet::{TxOutput, Utxo};

/// Create a new empty PSET v2.
pub fn new_pset() -> PartiallySignedTransaction {
    PartiallySignedTransaction::new_v2()
}

/// Build an explicit (non-confidential) TxOut.
pub fn explicit_txout(asset: AssetId, amount: u64, script_pubkey: &Script) -> TxOut {
    TxOut {
        asset: Asset::Explicit(asset),
        value: ConfValue::Explicit(amount),
        nonce: Nonce::Null,
        script_pubkey: script_pubkey.clone(),
        witness: TxOutWitness::default(),
    }
}

/// Add a wallet utxo as a PSET input.
pub fn add_pset_input(pset: &mut PartiallySignedTransaction, utxo: &Utxo) {
    let input = lwk_wollet::elements::pset::Input {
        previous_txid: utxo.outpoint.txid,
        previous_output_index: utxo.outpoint.vout,
        witness_utxo: Some(utxo.txout.clone()),
        sequence: Some(Sequence::ENABLE_LOCKTIME_NO_RBF),
        redeem_script: utxo.redeem_script.clone(),
        ..Default::default()
    };
    pset.add_input(input);
}

/// Add an output to a PSET. Outputs with a blinding key are left unblinded
/// with `blinder_index` pointing at the input whose owner will blind them.
pub fn add_pset_output(
    pset: &mut PartiallySignedTransaction,
    output: &TxOutput,
    blinder_index: u32,
) {
    let blinding_key = output
        .blinding_pubkey
        .map(|inner| lwk_wollet::elements::bitcoin::PublicKey {
            inner,
            compressed: true,
        });
    let out = lwk_wollet::elements::pset::Output {
        amount: Some(output.amount),
        asset: Some(output.asset),
        script_pubkey: output.script_pubkey.clone(),
        blinder_index: blinding_key.map(|_| blinder_index),
        blinding_key,
        ..Default::default()
    };
    pset.add_output(out);
}

/// Append the explicit network fee output (empty script).
pub fn add_fee_output(pset: &mut PartiallySignedTransaction, native_asset: AssetId, amount: u64) {
    let out = lwk_wollet::elements::pset::Output {
        amount: Some(amount),
        asset: Some(native_asset),
        script_pubkey: Script::new(),
        ..Default::default()
    };
    pset.add_output(out);
}

/// Outpoints consumed by every input of the PSET, in input order.
pub fn input_outpoints(pset: &PartiallySignedTransaction) -> Vec<OutPoint> {
    pset.inputs()
        .iter()
        .map(|i| OutPoint::new(i.previous_txid, i.previous_output_index))
        .collect()
}

// ── Encoding ────────────────────────────────────────────────────────

pub fn encode_pset(pset: &PartiallySignedTransaction) -> String {
    BASE64.encode(serialize(pset))
}

pub fn decode_pset(encoded: &str) -> Result<PartiallySignedTransaction> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| Error::Pset(format!("base64: {e}")))?;
    deserialize(&bytes).map_err(|e| Error::Pset(format!("decode: {e}")))
}

pub fn encode_tx_hex(tx: &Transaction) -> String {
    hex::encode(serialize(tx))
}

pub fn decode_tx_hex(tx_hex: &str) -> Result<Transaction> {
    let bytes = hex::decode(tx_hex.trim()).map_err(|e| Error::Pset(format!("tx hex: {e}")))?;
    deserialize(&bytes).map_err(|e| Error::Pset(format!("tx decode: {e}")))
}

pub fn parse_asset(asset: &str) -> Result<AssetId> {
    asset
        .parse()
        .map_err(|e| Error::InvalidSwapMessage(format!("bad asset id {asset}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lwk_wollet::elements::Txid;
    use lwk_wollet::elements::hashes::Hash;

    fn asset(byte: u8) -> AssetId {
        AssetId::from_slice(&[byte; 32]).unwrap()
    }

    fn utxo(vout: u32, value: u64) -> Utxo {
        let spk = Script::from(vec![0x00, 0x14, 0xaa]);
        Utxo {
            outpoint: OutPoint::new(Txid::all_zeros(), vout),
            txout: explicit_txout(asset(0x01), value, &spk),
            asset: asset(0x01),
            value,
            asset_blinder: [0u8; 32],
            value_blinder: [0u8; 32],
            redeem_script: None,
            account: "market".into(),
        }
    }

    #[test]
    fn pset_survives_base64_encoding() {
        let mut pset = new_pset();
        add_pset_input(&mut pset, &utxo(0, 5_000));
        add_pset_input(&mut pset, &utxo(1, 7_000));
        add_fee_output(&mut pset, asset(0x02), 250);

        let decoded = decode_pset(&encode_pset(&pset)).unwrap();
        assert_eq!(decoded.n_inputs(), 2);
        assert_eq!(decoded.n_outputs(), 1);
        assert_eq!(input_outpoints(&decoded), input_outpoints(&pset));
        assert_eq!(decoded.outputs()[0].amount, Some(250));
        assert!(decoded.outputs()[0].script_pubkey.is_empty());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode_pset("not-a-pset"), Err(Error::Pset(_))));
        assert!(matches!(decode_tx_hex("zz"), Err(Error::Pset(_))));
    }

    #[test]
    fn unblinded_output_keeps_amount_and_asset() {
        let mut pset = new_pset();
        let output = TxOutput {
            asset: asset(0x03),
            amount: 42,
            script_pubkey: Script::from(vec![0x51]),
            blinding_pubkey: None,
        };
        add_pset_output(&mut pset, &output, 0);
        let out = &pset.outputs()[0];
        assert_eq!(out.amount, Some(42));
        assert_eq!(out.asset, Some(asset(0x03)));
        assert!(out.blinding_key.is_none());
        assert!(out.blinder_index.is_none());
    }

    #[test]
    fn parse_asset_rejects_short_hex() {
        assert!(parse_asset("abcd").is_err());
        let id = asset(0x07);
        assert_eq!(parse_asset(&id.to_string()).unwrap(), id);
    }
}

//! Virtual-size fee model for confidential transactions.

use lwk_wollet::elements::Script;
use lwk_wollet::elements::pset::PartiallySignedTransaction;

/// Default network fee rate in satoshi per 1000 virtual bytes.
pub const DEFAULT_SAT_PER_KVB: u64 = 100;

// version + locktime + segwit flag + in/out counts
const TX_OVERHEAD_VBYTES: usize = 11;
// outpoint + empty script_sig + sequence
const INPUT_BASE_BYTES: usize = 41;
// item count + signature + pubkey, with length prefixes
const P2WPKH_WITNESS_BYTES: usize = 1 + 1 + 72 + 1 + 33;
// issuance/pegin witness placeholders carried by every elements input
const INPUT_EMPTY_WITNESS_BYTES: usize = 4;
const EXPLICIT_ASSET_BYTES: usize = 33;
const EXPLICIT_VALUE_BYTES: usize = 9;
const NULL_NONCE_BYTES: usize = 1;
const COMMITMENT_BYTES: usize = 33;
const RANGE_PROOF_BYTES: usize = 2893;
const SURJECTION_PROOF_BYTES: usize = 131;

#[derive(Debug, Clone, PartialEq)]
pub struct FeeInput {
    pub script_pubkey: Script,
    pub redeem_script: Option<Script>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeeOutput {
    pub script_pubkey: Script,
    pub confidential: bool,
}

impl FeeOutput {
    /// A confidential output with a standard segwit v0 script.
    pub fn confidential_p2wpkh() -> Self {
        Self {
            script_pubkey: Script::from(vec![0u8; 22]),
            confidential: true,
        }
    }

    pub fn fee() -> Self {
        Self {
            script_pubkey: Script::new(),
            confidential: false,
        }
    }
}

fn var_int_len(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x10000..=0xffff_ffff => 5,
        _ => 9,
    }
}

fn input_weight(input: &FeeInput) -> usize {
    let witness = match &input.redeem_script {
        Some(script) => {
            let len = script.len();
            // signature + script + control prefix
            1 + 1 + 72 + var_int_len(len) + len
        }
        None => P2WPKH_WITNESS_BYTES,
    };
    INPUT_BASE_BYTES * 4 + witness + INPUT_EMPTY_WITNESS_BYTES
}

fn output_weight(output: &FeeOutput) -> usize {
    let spk = output.script_pubkey.len();
    let spk_bytes = var_int_len(spk) + spk;
    if output.confidential {
        let base = COMMITMENT_BYTES * 3 + spk_bytes;
        let witness = var_int_len(SURJECTION_PROOF_BYTES)
            + SURJECTION_PROOF_BYTES
            + var_int_len(RANGE_PROOF_BYTES)
            + RANGE_PROOF_BYTES;
        base * 4 + witness
    } else {
        let base = EXPLICIT_ASSET_BYTES + EXPLICIT_VALUE_BYTES + NULL_NONCE_BYTES + spk_bytes;
        // two empty proof length prefixes
        base * 4 + 2
    }
}

/// Estimated virtual size of a transaction with the given inputs and outputs.
pub fn estimate_vsize(inputs: &[FeeInput], outputs: &[FeeOutput]) -> usize {
    let weight = TX_OVERHEAD_VBYTES * 4
        + inputs.iter().map(input_weight).sum::<usize>()
        + outputs.iter().map(output_weight).sum::<usize>();
    weight.div_ceil(4)
}

/// Fee for `vsize` at `sat_per_kvb`, rounded up.
pub fn fee_for_vsize(vsize: usize, sat_per_kvb: u64) -> u64 {
    (vsize as u64 * sat_per_kvb).div_ceil(1000)
}

pub fn estimate_fee(inputs: &[FeeInput], outputs: &[FeeOutput], sat_per_kvb: u64) -> u64 {
    fee_for_vsize(estimate_vsize(inputs, outputs), sat_per_kvb)
}

/// Fee-model view of a PSET's current inputs and outputs. Outputs with a
/// blinding key count as confidential.
pub fn pset_fee_shape(pset: &PartiallySignedTransaction) -> (Vec<FeeInput>, Vec<FeeOutput>) {
    let inputs = pset
        .inputs()
        .iter()
        .map(|i| FeeInput {
            script_pubkey: i
                .witness_utxo
                .as_ref()
                .map(|u| u.script_pubkey.clone())
                .unwrap_or_default(),
            redeem_script: i.redeem_script.clone().or_else(|| i.witness_script.clone()),
        })
        .collect();
    let outputs = pset
        .outputs()
        .iter()
        .map(|o| FeeOutput {
            script_pubkey: o.script_pubkey.clone(),
            confidential: o.blinding_key.is_some(),
        })
        .collect();
    (inputs, outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p2wpkh_input() -> FeeInput {
        FeeInput {
            script_pubkey: Script::from(vec![0u8; 22]),
            redeem_script: None,
        }
    }

    #[test]
    fn confidential_outputs_dominate_size() {
        let explicit = estimate_vsize(
            &[p2wpkh_input()],
            &[FeeOutput {
                script_pubkey: Script::from(vec![0u8; 22]),
                confidential: false,
            }],
        );
        let confidential = estimate_vsize(&[p2wpkh_input()], &[FeeOutput::confidential_p2wpkh()]);
        assert!(confidential > explicit + 700);
    }

    #[test]
    fn redeem_script_increases_input_cost() {
        let plain = estimate_vsize(&[p2wpkh_input()], &[FeeOutput::fee()]);
        let scripted = estimate_vsize(
            &[FeeInput {
                script_pubkey: Script::from(vec![0u8; 34]),
                redeem_script: Some(Script::from(vec![0x51; 120])),
            }],
            &[FeeOutput::fee()],
        );
        assert!(scripted > plain);
    }

    #[test]
    fn fee_rounds_up() {
        assert_eq!(fee_for_vsize(1, DEFAULT_SAT_PER_KVB), 1);
        assert_eq!(fee_for_vsize(1000, DEFAULT_SAT_PER_KVB), 100);
        assert_eq!(fee_for_vsize(1001, DEFAULT_SAT_PER_KVB), 101);
        assert_eq!(fee_for_vsize(0, DEFAULT_SAT_PER_KVB), 0);
    }

    #[test]
    fn fee_grows_with_each_input() {
        let outs = [FeeOutput::confidential_p2wpkh(), FeeOutput::fee()];
        let one = estimate_fee(&[p2wpkh_input()], &outs, 1000);
        let two = estimate_fee(&[p2wpkh_input(), p2wpkh_input()], &outs, 1000);
        assert!(two > one);
    }
}

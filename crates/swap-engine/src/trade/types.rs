use std::collections::HashMap;
use std::fmt;

use lwk_wollet::elements::AssetId;
use lwk_wollet::elements::pset::PartiallySignedTransaction;
use serde::{Deserialize, Serialize};

use crate::pset::{decode_pset, parse_asset};

/// Direction of a trade from the counterparty's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    /// Counterparty receives the base asset.
    Buy,
    /// Counterparty sends the base asset.
    Sell,
}

// ── Status ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Empty = 0,
    Proposal = 1,
    Accepted = 2,
    Completed = 3,
    Settled = 4,
    Expired = 5,
}

/// Status code plus the orthogonal failed flag. `Proposal` + failed is
/// ProposalRejected, `Accepted` + failed is FailedToComplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeStatus {
    pub code: StatusCode,
    pub failed: bool,
}

impl TradeStatus {
    pub const EMPTY: Self = Self::ok(StatusCode::Empty);
    pub const PROPOSAL: Self = Self::ok(StatusCode::Proposal);
    pub const PROPOSAL_REJECTED: Self = Self::failed(StatusCode::Proposal);
    pub const ACCEPTED: Self = Self::ok(StatusCode::Accepted);
    pub const FAILED_TO_COMPLETE: Self = Self::failed(StatusCode::Accepted);
    pub const COMPLETED: Self = Self::ok(StatusCode::Completed);
    pub const SETTLED: Self = Self::ok(StatusCode::Settled);
    pub const EXPIRED: Self = Self::ok(StatusCode::Expired);

    const fn ok(code: StatusCode) -> Self {
        Self {
            code,
            failed: false,
        }
    }

    const fn failed(code: StatusCode) -> Self {
        Self { code, failed: true }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.code, StatusCode::Settled | StatusCode::Expired)
    }

    pub fn name(&self) -> &'static str {
        match (self.code, self.failed) {
            (StatusCode::Empty, _) => "Empty",
            (StatusCode::Proposal, false) => "Proposal",
            (StatusCode::Proposal, true) => "ProposalRejected",
            (StatusCode::Accepted, false) => "Accepted",
            (StatusCode::Accepted, true) => "FailedToComplete",
            (StatusCode::Completed, _) => "Completed",
            (StatusCode::Settled, _) => "Settled",
            (StatusCode::Expired, _) => "Expired",
        }
    }
}

impl Default for TradeStatus {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Swap messages ───────────────────────────────────────────────────

/// Clear-text secrets of one transaction input, shared so the other party
/// can verify confidential amounts without unblinding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnblindedInput {
    pub index: u32,
    pub asset: String,
    pub amount: u64,
    /// Hex-encoded 32-byte asset blinding factor.
    pub asset_blinder: String,
    /// Hex-encoded 32-byte value blinding factor.
    pub amount_blinder: String,
}

impl UnblindedInput {
    pub fn asset_id(&self) -> crate::Result<AssetId> {
        parse_asset(&self.asset)
    }

    pub fn asset_blinder_bytes(&self) -> crate::Result<[u8; 32]> {
        blinder_bytes(&self.asset_blinder)
    }

    pub fn amount_blinder_bytes(&self) -> crate::Result<[u8; 32]> {
        blinder_bytes(&self.amount_blinder)
    }
}

fn blinder_bytes(encoded: &str) -> crate::Result<[u8; 32]> {
    let bytes = hex::decode(encoded)
        .map_err(|e| crate::Error::InvalidSwapMessage(format!("blinder hex: {e}")))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| crate::Error::InvalidSwapMessage("blinder must be 32 bytes".into()))
}

/// Counterparty proposal: send `amount_p` of `asset_p`, receive `amount_r`
/// of `asset_r`. The transaction is a base64 PSET holding the
/// counterparty's inputs and receive output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub id: String,
    pub amount_p: u64,
    pub asset_p: String,
    pub amount_r: u64,
    pub asset_r: String,
    pub transaction: String,
    #[serde(default)]
    pub unblinded_inputs: Vec<UnblindedInput>,
    #[serde(default)]
    pub fee_amount: u64,
    #[serde(default)]
    pub fee_asset: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapAccept {
    pub id: String,
    pub request_id: String,
    pub transaction: String,
    #[serde(default)]
    pub unblinded_inputs: Vec<UnblindedInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapComplete {
    pub id: String,
    pub accept_id: String,
    pub transaction: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapFailCode {
    InvalidSwapRequest,
    BadPricingSwapRequest,
    InvalidTransaction,
    AbortedByMarket,
    AbortedByCounterparty,
    TradeExpired,
    FailedToBroadcast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapFail {
    pub id: String,
    pub message_id: String,
    pub failure_code: SwapFailCode,
    pub failure_message: String,
}

impl SwapFail {
    pub fn new(message_id: &str, code: SwapFailCode, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_id: message_id.to_string(),
            failure_code: code,
            failure_message: message.into(),
        }
    }
}

impl SwapRequest {
    pub fn asset_p_id(&self) -> crate::Result<AssetId> {
        parse_asset(&self.asset_p)
    }

    pub fn asset_r_id(&self) -> crate::Result<AssetId> {
        parse_asset(&self.asset_r)
    }

    /// Structural check of the proposal. Returns the decoded PSET, or a
    /// human-readable reason for rejection.
    pub fn validate(&self) -> std::result::Result<PartiallySignedTransaction, String> {
        if self.id.is_empty() {
            return Err("missing swap request id".into());
        }
        if self.amount_p == 0 || self.amount_r == 0 {
            return Err("swap amounts must be non-zero".into());
        }
        let asset_p = self.asset_p_id().map_err(|e| e.to_string())?;
        let asset_r = self.asset_r_id().map_err(|e| e.to_string())?;
        if asset_p == asset_r {
            return Err("swap assets must differ".into());
        }
        if !self.fee_asset.is_empty() {
            parse_asset(&self.fee_asset).map_err(|e| e.to_string())?;
        }

        let pset = decode_pset(&self.transaction).map_err(|e| e.to_string())?;
        if pset.n_inputs() == 0 {
            return Err("transaction has no inputs".into());
        }

        let mut unblinded: HashMap<u32, &UnblindedInput> = HashMap::new();
        for input in &self.unblinded_inputs {
            if input.index as usize >= pset.n_inputs() {
                return Err(format!("unblinded input index {} out of range", input.index));
            }
            unblinded.insert(input.index, input);
        }

        let mut sent: u64 = 0;
        for (i, input) in pset.inputs().iter().enumerate() {
            let prevout = input
                .witness_utxo
                .as_ref()
                .ok_or_else(|| format!("input {i} has no witness utxo"))?;
            let (asset, value) = match (prevout.asset.explicit(), prevout.value.explicit()) {
                (Some(asset), Some(value)) => (asset, value),
                _ => {
                    let secrets = unblinded
                        .get(&(i as u32))
                        .ok_or_else(|| format!("confidential input {i} is not unblinded"))?;
                    (secrets.asset_id().map_err(|e| e.to_string())?, secrets.amount)
                }
            };
            if asset == asset_p {
                sent = sent.saturating_add(value);
            }
        }
        if sent < self.amount_p {
            return Err(format!(
                "inputs carry {sent} of the proposed asset, need {}",
                self.amount_p
            ));
        }

        let pays_receive = pset
            .outputs()
            .iter()
            .any(|o| o.asset == Some(asset_r) && o.amount == Some(self.amount_r));
        if !pays_receive {
            return Err("no output receives the requested amount".into());
        }

        Ok(pset)
    }
}

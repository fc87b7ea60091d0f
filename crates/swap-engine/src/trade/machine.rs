use lwk_wollet::elements::OutPoint;
use serde::{Deserialize, Serialize};

use super::types::{
    StatusCode, SwapAccept, SwapComplete, SwapFail, SwapFailCode, SwapRequest, TradeStatus,
    TradeType,
};
use crate::error::TradeError;
use crate::market::{FixedFee, Market, MarketPrice};
use crate::pset::{decode_pset, decode_tx_hex, input_outpoints};

type TradeResult<T> = std::result::Result<T, TradeError>;

/// Market terms frozen at proposal time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub account_name: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub percentage_fee: u32,
    pub fixed_fee: FixedFee,
}

impl From<&Market> for MarketSnapshot {
    fn from(m: &Market) -> Self {
        Self {
            account_name: m.account_name.clone(),
            base_asset: m.base_asset.clone(),
            quote_asset: m.quote_asset.clone(),
            percentage_fee: m.percentage_fee,
            fixed_fee: m.fixed_fee,
        }
    }
}

/// One negotiation between a market and a counterparty.
///
/// Every transition checks its precondition first and leaves the trade
/// untouched when it fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub trade_type: TradeType,
    pub market: MarketSnapshot,
    pub price: MarketPrice,
    pub status: TradeStatus,
    pub swap_request: Option<SwapRequest>,
    pub swap_accept: Option<SwapAccept>,
    pub swap_complete: Option<SwapComplete>,
    pub swap_fail: Option<SwapFail>,
    pub request_time: i64,
    pub accept_time: i64,
    pub complete_time: i64,
    pub settlement_time: i64,
    pub expiry_time: i64,
    pub tx_id: String,
    pub tx_hex: String,
}

impl Default for Trade {
    fn default() -> Self {
        Self::new()
    }
}

impl Trade {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            trade_type: TradeType::Buy,
            market: MarketSnapshot::default(),
            price: MarketPrice::default(),
            status: TradeStatus::EMPTY,
            swap_request: None,
            swap_accept: None,
            swap_complete: None,
            swap_fail: None,
            request_time: 0,
            accept_time: 0,
            complete_time: 0,
            settlement_time: 0,
            expiry_time: 0,
            tx_id: String::new(),
            tx_hex: String::new(),
        }
    }

    fn guard(&self, op: &'static str, allowed: &[StatusCode]) -> TradeResult<()> {
        if allowed.contains(&self.status.code) {
            Ok(())
        } else {
            Err(TradeError::InvalidStatus {
                op,
                status: self.status,
            })
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry_time > 0 && now >= self.expiry_time
    }

    /// Record the proposal. A structurally invalid request moves the trade
    /// to ProposalRejected and is returned as [`TradeError::Rejected`].
    pub fn propose(
        &mut self,
        request: SwapRequest,
        market: &Market,
        trade_type: TradeType,
        expiry_window_secs: i64,
        now: i64,
    ) -> TradeResult<()> {
        self.guard("propose", &[StatusCode::Empty])?;

        let verdict = request
            .validate()
            .and_then(|_| check_pair(&request, market, trade_type));

        self.market = MarketSnapshot::from(market);
        self.price = market.price.clone();
        self.trade_type = trade_type;
        self.request_time = now;
        self.expiry_time = now + expiry_window_secs;

        match verdict {
            Ok(()) => {
                self.swap_request = Some(request);
                self.status = TradeStatus::PROPOSAL;
                Ok(())
            }
            Err(reason) => {
                let fail = SwapFail::new(&request.id, SwapFailCode::InvalidSwapRequest, reason);
                self.swap_request = Some(request);
                self.swap_fail = Some(fail.clone());
                self.status = TradeStatus::PROPOSAL_REJECTED;
                Err(TradeError::Rejected(fail))
            }
        }
    }

    /// Accept the proposal with the market-signed transaction. `expiry_time`
    /// replaces the proposal window with the lock time of the selected utxos.
    pub fn accept(&mut self, accept: SwapAccept, expiry_time: i64, now: i64) -> TradeResult<()> {
        if self.status != TradeStatus::PROPOSAL {
            return Err(TradeError::InvalidStatus {
                op: "accept",
                status: self.status,
            });
        }
        self.swap_accept = Some(accept);
        self.accept_time = now;
        self.expiry_time = expiry_time;
        self.status = TradeStatus::ACCEPTED;
        Ok(())
    }

    /// Record the final transaction. Also the retry path out of
    /// FailedToComplete.
    pub fn complete(&mut self, complete: SwapComplete, tx_hex: String, now: i64) -> TradeResult<()> {
        self.guard("complete", &[StatusCode::Accepted])?;
        let tx = decode_tx_hex(&tx_hex).map_err(|e| TradeError::InvalidTransaction(e.to_string()))?;

        self.swap_complete = Some(complete);
        self.tx_id = tx.txid().to_string();
        self.tx_hex = tx_hex;
        self.complete_time = now;
        self.status = TradeStatus::COMPLETED;
        Ok(())
    }

    pub fn settle(&mut self, timestamp: i64) -> TradeResult<()> {
        self.guard("settle", &[StatusCode::Accepted, StatusCode::Completed])?;
        self.settlement_time = timestamp;
        self.status = TradeStatus::SETTLED;
        Ok(())
    }

    /// Expire an open trade whose expiry has passed. Idempotent on an
    /// already expired trade. A completed trade is waiting for its
    /// broadcast transaction to confirm and cannot expire.
    pub fn expire(&mut self, now: i64) -> TradeResult<()> {
        if self.status == TradeStatus::EXPIRED {
            return Ok(());
        }
        self.guard("expire", &[StatusCode::Proposal, StatusCode::Accepted])?;
        if !self.is_expired(now) {
            return Err(TradeError::NotExpired {
                expiry_time: self.expiry_time,
                now,
            });
        }
        self.status = TradeStatus::EXPIRED;
        Ok(())
    }

    /// Produce a SwapFail for the counterparty and flag the current status
    /// as failed.
    pub fn fail(
        &mut self,
        message_id: &str,
        code: SwapFailCode,
        message: impl Into<String>,
    ) -> TradeResult<SwapFail> {
        self.guard("fail", &[StatusCode::Proposal, StatusCode::Accepted])?;
        let fail = SwapFail::new(message_id, code, message);
        self.swap_fail = Some(fail.clone());
        self.status.failed = true;
        Ok(fail)
    }

    /// Outpoints spent by the accepted swap transaction.
    pub fn accepted_outpoints(&self) -> crate::Result<Vec<OutPoint>> {
        let accept = self
            .swap_accept
            .as_ref()
            .ok_or_else(|| crate::Error::InvalidSwapMessage("trade has no swap accept".into()))?;
        let pset = decode_pset(&accept.transaction)?;
        Ok(input_outpoints(&pset))
    }
}

fn check_pair(
    request: &SwapRequest,
    market: &Market,
    trade_type: TradeType,
) -> std::result::Result<(), String> {
    if !market.has_asset(&request.asset_p) || !market.has_asset(&request.asset_r) {
        return Err("swap assets do not match the market pair".into());
    }
    let base_leg = match trade_type {
        TradeType::Buy => &request.asset_r,
        TradeType::Sell => &request.asset_p,
    };
    if *base_leg != market.base_asset {
        return Err(format!("swap direction does not match a {trade_type:?} trade"));
    }
    Ok(())
}

//! Trade operations exposed to the transport layer: preview, propose and
//! complete.
//!
//! All calls block on the wallet engine; async callers should run them on
//! a blocking thread.

use std::sync::Arc;

use lwk_wollet::elements::OutPoint;
use rust_decimal::Decimal;

use crate::builder::{SwapBuilder, SwapCompletion};
use crate::error::{Error, Result, TradeError};
use crate::market::Market;
use crate::pricing::{PluggableStrategy, PriceStrategy, TradePreview, is_valid_price, preview_trade};
use crate::pset::{decode_pset, encode_pset, encode_tx_hex};
use crate::repository::{MarketRepository, TradeRepository};
use crate::settlement::SettlementTracker;
use crate::trade::{
    StatusCode, SwapAccept, SwapComplete, SwapFail, SwapFailCode, SwapRequest, Trade, TradeType,
};
use crate::wallet::Wallet;

/// Tunables of the negotiation pipeline.
#[derive(Debug, Clone)]
pub struct TradeConfig {
    /// Seconds between proposal and expiry, before accept replaces it with
    /// the utxo lock time.
    pub trade_expiry_secs: i64,
    /// Fractional tolerance, e.g. 0.05.
    pub price_slippage: Decimal,
    /// Account that pays network fees.
    pub fee_account: String,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            trade_expiry_secs: 120,
            price_slippage: Decimal::new(5, 2),
            fee_account: "fee_account".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ProposeOutcome {
    Accepted { trade: Trade, swap_accept: SwapAccept },
    Rejected { trade: Trade, swap_fail: SwapFail },
}

/// Message closing a negotiation from the counterparty side.
#[derive(Debug, Clone)]
pub enum CompleteMessage {
    Complete(SwapComplete),
    Fail(SwapFail),
}

#[derive(Debug, Clone)]
pub enum CompleteOutcome {
    Completed { trade: Trade, txid: String },
    Failed { trade: Trade, swap_fail: SwapFail },
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct TradeService {
    config: TradeConfig,
    wallet: Arc<dyn Wallet>,
    markets: Arc<dyn MarketRepository>,
    trades: Arc<dyn TradeRepository>,
    strategy: Arc<dyn PriceStrategy>,
    tracker: Arc<SettlementTracker>,
}

impl TradeService {
    pub fn new(
        config: TradeConfig,
        wallet: Arc<dyn Wallet>,
        markets: Arc<dyn MarketRepository>,
        trades: Arc<dyn TradeRepository>,
        tracker: Arc<SettlementTracker>,
    ) -> Self {
        Self {
            config,
            wallet,
            markets,
            trades,
            strategy: Arc::new(PluggableStrategy),
            tracker,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn PriceStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &TradeConfig {
        &self.config
    }

    fn open_market(&self, base_asset: &str, quote_asset: &str) -> Result<Market> {
        let market = self
            .markets
            .get_market_by_assets(base_asset, quote_asset)?
            .ok_or(Error::MarketUnavailable)?;
        if !market.tradable {
            return Err(Error::MarketUnavailable);
        }
        Ok(market)
    }

    fn market_balance(
        &self,
        market: &Market,
    ) -> Result<std::collections::HashMap<lwk_wollet::elements::AssetId, u64>> {
        self.wallet
            .get_balance(&market.account_name)
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))
    }

    /// Quote `amount` of `asset` on the market, fees charged in `fee_asset`.
    pub fn preview(
        &self,
        base_asset: &str,
        quote_asset: &str,
        trade_type: TradeType,
        amount: u64,
        asset: &str,
        fee_asset: &str,
    ) -> Result<TradePreview> {
        let market = self.open_market(base_asset, quote_asset)?;
        let balance = self.market_balance(&market)?;
        preview_trade(
            self.strategy.as_ref(),
            &market,
            &balance,
            trade_type,
            amount,
            asset,
            fee_asset,
        )
        .ok_or(Error::MarketUnavailable)
    }

    /// Negotiate a counterparty proposal. Rejections are returned as
    /// [`ProposeOutcome::Rejected`] and persisted; unavailability and build
    /// failures are errors.
    pub fn propose(
        &self,
        base_asset: &str,
        quote_asset: &str,
        trade_type: TradeType,
        request: SwapRequest,
    ) -> Result<ProposeOutcome> {
        let market = self.open_market(base_asset, quote_asset)?;
        let mut trade = Trade::new();

        match trade.propose(
            request.clone(),
            &market,
            trade_type,
            self.config.trade_expiry_secs,
            now(),
        ) {
            Ok(()) => {}
            Err(TradeError::Rejected(swap_fail)) => {
                log::info!(
                    "trade: proposal {} rejected: {}",
                    request.id,
                    swap_fail.failure_message
                );
                self.trades.add_trade(&trade)?;
                return Ok(ProposeOutcome::Rejected { trade, swap_fail });
            }
            Err(e) => return Err(e.into()),
        }

        let balance = self.market_balance(&market)?;
        if !is_valid_price(
            self.strategy.as_ref(),
            &market,
            &balance,
            &request,
            trade_type,
            self.config.price_slippage,
        ) {
            let swap_fail = trade.fail(
                &request.id,
                SwapFailCode::BadPricingSwapRequest,
                "proposed amounts are outside the price slippage",
            )?;
            log::info!("trade: proposal {} rejected on price", request.id);
            self.trades.add_trade(&trade)?;
            return Ok(ProposeOutcome::Rejected { trade, swap_fail });
        }

        let built = SwapBuilder::new(self.wallet.as_ref(), &self.config.fee_account)
            .build_swap_completion(SwapCompletion {
                pset: decode_pset(&request.transaction)?,
                account: &market.account_name,
                send_asset: request.asset_r_id()?,
                send_amount: request.amount_r,
                receive_asset: request.asset_p_id()?,
                receive_amount: request.amount_p,
                counterparty_inputs: &request.unblinded_inputs,
            });
        let built = match built {
            Ok(built) => built,
            Err(e) => {
                log::warn!("trade: failed to build swap for proposal {}: {e}", request.id);
                if trade
                    .fail(&request.id, SwapFailCode::AbortedByMarket, e.to_string())
                    .is_ok()
                {
                    if let Err(pe) = self.trades.add_trade(&trade) {
                        log::error!("trade: failed to persist aborted trade {}: {pe}", trade.id);
                    }
                }
                return Err(e);
            }
        };

        let swap_accept = SwapAccept {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            transaction: encode_pset(&built.pset),
            unblinded_inputs: built.unblinded_inputs,
        };
        trade.accept(swap_accept.clone(), built.unlock_time, now())?;
        self.trades.add_trade(&trade)?;

        let keys: Vec<OutPoint> = built.selected_utxos.iter().map(|u| u.outpoint).collect();
        self.tracker.watch_broadcast(&trade.id, keys.iter().copied());
        self.tracker.watch(&trade.id, keys);
        log::info!(
            "trade: {} accepted, fee {} sat, expires at {}",
            trade.id,
            built.fee,
            trade.expiry_time
        );

        Ok(ProposeOutcome::Accepted { trade, swap_accept })
    }

    /// Finish a negotiation: either the counterparty aborts, or it returns
    /// the fully signed transaction, which is finalized and broadcast.
    pub fn complete(&self, message: CompleteMessage) -> Result<CompleteOutcome> {
        match message {
            CompleteMessage::Fail(fail) => self.abort(fail),
            CompleteMessage::Complete(complete) => self.finish(complete),
        }
    }

    fn trade_by_accept(&self, accept_id: &str) -> Result<Trade> {
        self.trades
            .get_trade_by_swap_accept_id(accept_id)?
            .ok_or_else(|| Error::TradeNotFound(accept_id.to_string()))
    }

    fn abort(&self, fail: SwapFail) -> Result<CompleteOutcome> {
        let trade = self.trade_by_accept(&fail.message_id)?;
        let mut recorded = None;
        let trade = self.trades.update_trade(&trade.id, &mut |t| {
            recorded = Some(t.fail(
                &fail.message_id,
                SwapFailCode::AbortedByCounterparty,
                fail.failure_message.clone(),
            )?);
            Ok(())
        })?;
        log::info!("trade: {} aborted by counterparty", trade.id);
        Ok(CompleteOutcome::Failed {
            swap_fail: recorded.unwrap_or(fail),
            trade,
        })
    }

    fn finish(&self, complete: SwapComplete) -> Result<CompleteOutcome> {
        let trade = self.trade_by_accept(&complete.accept_id)?;
        if trade.status.code != StatusCode::Accepted {
            return Err(TradeError::InvalidStatus {
                op: "complete",
                status: trade.status,
            }
            .into());
        }
        let now = now();
        if trade.is_expired(now) {
            log::info!("trade: completion for expired trade {} refused", trade.id);
            return Ok(CompleteOutcome::Failed {
                swap_fail: SwapFail::new(&complete.id, SwapFailCode::TradeExpired, "trade expired"),
                trade,
            });
        }

        let pset = decode_pset(&complete.transaction)?;
        let tx = self.wallet.finalize_pset(&pset)?;
        let tx_hex = encode_tx_hex(&tx);

        if let Err(e) = self.wallet.broadcast_transaction(&tx) {
            log::warn!("trade: broadcast of trade {} failed: {e}", trade.id);
            let mut recorded = None;
            let trade = self.trades.update_trade(&trade.id, &mut |t| {
                recorded = Some(t.fail(
                    &complete.id,
                    SwapFailCode::FailedToBroadcast,
                    e.to_string(),
                )?);
                Ok(())
            })?;
            let swap_fail = recorded.ok_or_else(|| Error::TradeNotFound(trade.id.clone()))?;
            return Ok(CompleteOutcome::Failed { trade, swap_fail });
        }

        let trade = self.trades.update_trade(&trade.id, &mut |t| {
            Ok(t.complete(complete.clone(), tx_hex.clone(), now)?)
        })?;
        log::info!("trade: {} completed with tx {}", trade.id, trade.tx_id);
        Ok(CompleteOutcome::Completed {
            txid: trade.tx_id.clone(),
            trade,
        })
    }
}

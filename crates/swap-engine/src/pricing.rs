//! Market previews and swap price validation.

use std::collections::HashMap;
use std::str::FromStr;

use lwk_wollet::elements::AssetId;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::market::{Market, MarketPrice};
use crate::pset::parse_asset;
use crate::trade::{SwapRequest, TradeType};

/// Quotes one side of a market given the other.
pub trait PriceStrategy: Send + Sync {
    /// Amount of the market's other asset equivalent to `amount` of `asset`.
    /// `None` when the market cannot quote it, e.g. the market balance does
    /// not cover the amount it would have to send.
    fn preview(
        &self,
        market: &Market,
        balance: &HashMap<AssetId, u64>,
        amount: u64,
        asset: AssetId,
        trade_type: TradeType,
    ) -> Option<u64>;
}

/// Quotes at the price stored on the market.
#[derive(Debug, Clone, Copy, Default)]
pub struct PluggableStrategy;

impl PriceStrategy for PluggableStrategy {
    fn preview(
        &self,
        market: &Market,
        balance: &HashMap<AssetId, u64>,
        amount: u64,
        asset: AssetId,
        trade_type: TradeType,
    ) -> Option<u64> {
        let base = parse_asset(&market.base_asset).ok()?;
        let quote = parse_asset(&market.quote_asset).ok()?;
        let (price, out_asset) = if asset == base {
            (&market.price.quote_price, quote)
        } else if asset == quote {
            (&market.price.base_price, base)
        } else {
            return None;
        };
        let price = Decimal::from_str(price).ok()?;
        if price <= Decimal::ZERO {
            return None;
        }
        let out = (Decimal::from(amount) * price).floor().to_u64()?;

        let market_sends = match trade_type {
            TradeType::Buy => base,
            TradeType::Sell => quote,
        };
        if out_asset == market_sends && out > balance.get(&out_asset).copied().unwrap_or(0) {
            return None;
        }
        Some(out)
    }
}

/// How the declared fee relates to the leg that carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeAdjustment {
    /// Fee was paid on top of the sent amount: subtract it back out.
    Subtract,
    /// Fee was netted from the received amount: add it back in.
    Add,
    None,
}

impl FeeAdjustment {
    /// The single place that decides the fee direction for a swap.
    pub fn for_swap(request: &SwapRequest) -> Self {
        if request.fee_amount == 0 || request.fee_asset.is_empty() {
            FeeAdjustment::None
        } else if request.fee_asset == request.asset_p {
            FeeAdjustment::Subtract
        } else if request.fee_asset == request.asset_r {
            FeeAdjustment::Add
        } else {
            FeeAdjustment::None
        }
    }

    pub fn apply(self, amount: u64, fee: u64) -> Option<u64> {
        match self {
            FeeAdjustment::Subtract => amount.checked_sub(fee),
            FeeAdjustment::Add => amount.checked_add(fee),
            FeeAdjustment::None => Some(amount),
        }
    }
}

/// `expected * (1 - slippage) <= actual <= expected * (1 + slippage)`.
pub fn within_slippage(expected: u64, actual: u64, slippage: Decimal) -> bool {
    let expected = Decimal::from(expected);
    let actual = Decimal::from(actual);
    let lower = expected * (Decimal::ONE - slippage);
    let upper = expected * (Decimal::ONE + slippage);
    lower <= actual && actual <= upper
}

/// Check the counterparty's amounts against the market price. Never fails;
/// anything that cannot be quoted is reported as invalid.
pub fn is_valid_price(
    strategy: &dyn PriceStrategy,
    market: &Market,
    balance: &HashMap<AssetId, u64>,
    request: &SwapRequest,
    trade_type: TradeType,
    slippage: Decimal,
) -> bool {
    let (Ok(asset_p), Ok(asset_r)) = (request.asset_p_id(), request.asset_r_id()) else {
        return false;
    };
    let adjustment = FeeAdjustment::for_swap(request);

    // The fee leg is priced with its fee-adjusted amount.
    let ((fee_asset, fee_leg), (other_asset, other_leg)) = if request.fee_asset == request.asset_r
    {
        ((asset_r, request.amount_r), (asset_p, request.amount_p))
    } else {
        ((asset_p, request.amount_p), (asset_r, request.amount_r))
    };
    let Some(adjusted) = adjustment.apply(fee_leg, request.fee_amount) else {
        return false;
    };

    if let Some(expected) = strategy.preview(market, balance, adjusted, fee_asset, trade_type) {
        return within_slippage(expected, other_leg, slippage);
    }
    match strategy.preview(market, balance, other_leg, other_asset, trade_type) {
        Some(expected) => within_slippage(expected, adjusted, slippage),
        None => {
            log::debug!("pricing: market {} cannot quote swap {}", market.account_name, request.id);
            false
        }
    }
}

/// Result of a trade preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradePreview {
    pub amount: u64,
    pub asset: String,
    pub fee_amount: u64,
    pub fee_asset: String,
    pub price: MarketPrice,
}

/// Counter-amount for `amount` of `asset`, with the market's percentage and
/// fixed fee charged in `fee_asset`.
pub fn preview_trade(
    strategy: &dyn PriceStrategy,
    market: &Market,
    balance: &HashMap<AssetId, u64>,
    trade_type: TradeType,
    amount: u64,
    asset: &str,
    fee_asset: &str,
) -> Option<TradePreview> {
    if !market.has_asset(asset) || !market.has_asset(fee_asset) {
        return None;
    }
    let asset_id = parse_asset(asset).ok()?;
    let counter = strategy.preview(market, balance, amount, asset_id, trade_type)?;
    let counter_asset = if asset == market.base_asset {
        &market.quote_asset
    } else {
        &market.base_asset
    };

    let charged_on = if fee_asset == asset { amount } else { counter };
    let percentage = (charged_on as u128 * market.percentage_fee as u128 / 10_000) as u64;
    let fee_amount = percentage.checked_add(market.fixed_fee_for(fee_asset))?;

    Some(TradePreview {
        amount: counter,
        asset: counter_asset.clone(),
        fee_amount,
        fee_asset: fee_asset.to_string(),
        price: market.price.clone(),
    })
}

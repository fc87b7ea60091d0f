//! Persistence and publication collaborators.
//!
//! Implementations live outside this crate. A backend that cannot be
//! reached should report [`Error::ServiceUnavailable`](crate::Error).

use std::collections::HashMap;

use lwk_wollet::elements::AssetId;

use crate::error::Result;
use crate::market::Market;
use crate::trade::Trade;

pub trait MarketRepository: Send + Sync {
    fn get_market_by_assets(&self, base_asset: &str, quote_asset: &str) -> Result<Option<Market>>;
}

pub trait TradeRepository: Send + Sync {
    fn get_all_trades(&self) -> Result<Vec<Trade>>;

    fn add_trade(&self, trade: &Trade) -> Result<()>;

    /// Apply `mutator` to the stored trade and persist the result. Nothing
    /// is written when the mutator fails. Returns the updated trade.
    fn update_trade(
        &self,
        trade_id: &str,
        mutator: &mut dyn FnMut(&mut Trade) -> Result<()>,
    ) -> Result<Trade>;

    fn get_trade_by_swap_accept_id(&self, accept_id: &str) -> Result<Option<Trade>>;
}

/// Receives a notification after a trade settles. Called off the
/// settlement path; may block.
pub trait TradePublisher: Send + Sync {
    fn publish_trade_settled(
        &self,
        account_name: &str,
        balance: &HashMap<AssetId, u64>,
        trade: &Trade,
    ) -> Result<()>;
}

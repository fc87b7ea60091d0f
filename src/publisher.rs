use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::Serialize;
use swap_engine::elements::AssetId;
use swap_engine::{Trade, TradePublisher};

/// Topic body published when a trade settles.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeSettledTopic<'a> {
    pub account_name: &'a str,
    pub trade_id: &'a str,
    pub tx_id: &'a str,
    pub settlement_time: i64,
    pub base_asset: &'a str,
    pub quote_asset: &'a str,
    pub balance: BTreeMap<String, u64>,
}

impl<'a> TradeSettledTopic<'a> {
    pub fn new(account_name: &'a str, balance: &HashMap<AssetId, u64>, trade: &'a Trade) -> Self {
        Self {
            account_name,
            trade_id: &trade.id,
            tx_id: &trade.tx_id,
            settlement_time: trade.settlement_time,
            base_asset: &trade.market.base_asset,
            quote_asset: &trade.market.quote_asset,
            balance: balance
                .iter()
                .map(|(asset, amount)| (asset.to_string(), *amount))
                .collect(),
        }
    }
}

/// Publishes settled trades to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

impl TradePublisher for LogPublisher {
    fn publish_trade_settled(
        &self,
        account_name: &str,
        balance: &HashMap<AssetId, u64>,
        trade: &Trade,
    ) -> swap_engine::Result<()> {
        let topic = TradeSettledTopic::new(account_name, balance, trade);
        let json = serde_json::to_string(&topic)
            .map_err(|e| swap_engine::Error::ServiceUnavailable(format!("publisher: {e}")))?;
        log::info!("publisher: trade_settled {json}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swap_engine::testing::{accepted_trade, quote_asset};

    #[test]
    fn topic_lists_balance_by_asset_hex() {
        let mut trade = accepted_trade(0);
        trade.settle(42).unwrap();
        let balance = HashMap::from([(quote_asset(), 7u64)]);

        let topic = TradeSettledTopic::new("market", &balance, &trade);
        let json = serde_json::to_value(&topic).unwrap();
        assert_eq!(json["settlementTime"], 42);
        assert_eq!(json["balance"][quote_asset().to_string()], 7);
        assert_eq!(json["accountName"], "market");

        LogPublisher
            .publish_trade_settled("market", &balance, &trade)
            .unwrap();
    }
}

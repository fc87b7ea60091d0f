use serde::{Deserialize, Serialize};

/// Fixed fee charged per trade, per side of the pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedFee {
    pub base_fee: u64,
    pub quote_fee: u64,
}

/// Decimal price strings. `base_price` is base units per one quote unit,
/// `quote_price` is quote units per one base unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPrice {
    pub base_price: String,
    pub quote_price: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Pluggable,
}

/// A liquidity-providing market as stored by the market repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub account_name: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Basis points.
    pub percentage_fee: u32,
    pub fixed_fee: FixedFee,
    pub tradable: bool,
    pub price: MarketPrice,
    #[serde(default)]
    pub strategy: StrategyKind,
}

impl Market {
    pub fn fixed_fee_for(&self, asset: &str) -> u64 {
        if asset == self.base_asset {
            self.fixed_fee.base_fee
        } else if asset == self.quote_asset {
            self.fixed_fee.quote_fee
        } else {
            0
        }
    }

    pub fn has_asset(&self, asset: &str) -> bool {
        asset == self.base_asset || asset == self.quote_asset
    }
}

use lwk_wollet::elements::AssetId;
use lwk_wollet::ElementsNetwork;
use serde::{Deserialize, Serialize};

/// Liquid network the daemon trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    Liquid,
    LiquidTestnet,
    LiquidRegtest,
}

impl Network {
    pub fn into_lwk(self) -> ElementsNetwork {
        match self {
            Network::Liquid => ElementsNetwork::Liquid,
            Network::LiquidTestnet => ElementsNetwork::LiquidTestnet,
            Network::LiquidRegtest => ElementsNetwork::default_regtest(),
        }
    }

    pub fn is_mainnet(self) -> bool {
        matches!(self, Network::Liquid)
    }

    /// BIP44 coin type used in account derivation paths.
    pub fn coin_type(self) -> u32 {
        if self.is_mainnet() {
            1776
        } else {
            1
        }
    }

    /// The network's native asset, which pays transaction fees.
    pub fn policy_asset(self) -> AssetId {
        self.into_lwk().policy_asset()
    }

    pub fn default_electrum_url(self) -> &'static str {
        match self {
            Network::Liquid => "ssl://blockstream.info:995",
            Network::LiquidTestnet => "ssl://blockstream.info:465",
            Network::LiquidRegtest => "tcp://localhost:50001",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Liquid => "mainnet",
            Network::LiquidTestnet => "testnet",
            Network::LiquidRegtest => "regtest",
        }
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "liquid" => Ok(Network::Liquid),
            "testnet" | "liquid-testnet" | "liquidtestnet" => Ok(Network::LiquidTestnet),
            "regtest" | "liquid-regtest" | "liquidregtest" => Ok(Network::LiquidRegtest),
            _ => Err(format!("invalid network: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases() {
        assert_eq!("Liquid".parse::<Network>().unwrap(), Network::Liquid);
        assert_eq!("testnet".parse::<Network>().unwrap(), Network::LiquidTestnet);
        assert_eq!(
            "liquid-regtest".parse::<Network>().unwrap(),
            Network::LiquidRegtest
        );
        assert!("signet".parse::<Network>().is_err());
    }

    #[test]
    fn coin_type_follows_mainnet() {
        assert_eq!(Network::Liquid.coin_type(), 1776);
        assert_eq!(Network::LiquidTestnet.coin_type(), 1);
    }

    #[test]
    fn deserializes_kebab_case() {
        let n: Network = serde_json::from_str("\"liquid-testnet\"").unwrap();
        assert_eq!(n, Network::LiquidTestnet);
    }
}

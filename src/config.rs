//! Daemon configuration: a JSON file overridden by `SWAPD_*` environment
//! variables (a `.env` file is honoured).

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use swap_engine::TradeConfig;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::network::Network;

pub const CONFIG_FILE: &str = "swapd.json";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: Network,
    /// Network default when unset.
    pub electrum_url: Option<String>,
    pub datadir: PathBuf,
    #[serde(skip_serializing, deserialize_with = "zeroizing")]
    pub mnemonic: Zeroizing<String>,
    pub fee_account: String,
    pub trade_expiry_secs: i64,
    /// How long selected utxos stay reserved for a pending swap.
    pub utxo_lock_secs: i64,
    pub price_slippage: Decimal,
    pub poll_interval_secs: u64,
    pub log_level: String,
}

fn zeroizing<'de, D>(deserializer: D) -> std::result::Result<Zeroizing<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    String::deserialize(deserializer).map(Zeroizing::new)
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("network", &self.network)
            .field("electrum_url", &self.electrum_url())
            .field("datadir", &self.datadir)
            .field("mnemonic", &"<redacted>")
            .field("fee_account", &self.fee_account)
            .field("trade_expiry_secs", &self.trade_expiry_secs)
            .field("utxo_lock_secs", &self.utxo_lock_secs)
            .field("price_slippage", &self.price_slippage)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::LiquidTestnet,
            electrum_url: None,
            datadir: PathBuf::from("swapd-data"),
            mnemonic: Zeroizing::new(String::new()),
            fee_account: "fee_account".to_string(),
            trade_expiry_secs: 120,
            utxo_lock_secs: 120,
            price_slippage: Decimal::new(5, 2),
            poll_interval_secs: 5,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load `path` (or `swapd.json` in the data directory) if present,
    /// then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let datadir_env = env::var("SWAPD_DATADIR").ok().map(PathBuf::from);
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => datadir_env
                .as_ref()
                .map(|d| d.join(CONFIG_FILE))
                .filter(|p| p.exists()),
        };

        let mut config = match file {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Override fields from `SWAPD_*` variables resolved through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("SWAPD_NETWORK") {
            self.network = v.parse().map_err(Error::Config)?;
        }
        if let Some(v) = lookup("SWAPD_ELECTRUM_URL") {
            self.electrum_url = Some(v);
        }
        if let Some(v) = lookup("SWAPD_DATADIR") {
            self.datadir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SWAPD_MNEMONIC") {
            self.mnemonic = Zeroizing::new(v);
        }
        if let Some(v) = lookup("SWAPD_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("SWAPD_TRADE_EXPIRY_SECS") {
            self.trade_expiry_secs = v
                .parse()
                .map_err(|e| Error::Config(format!("SWAPD_TRADE_EXPIRY_SECS: {e}")))?;
        }
        if let Some(v) = lookup("SWAPD_PRICE_SLIPPAGE") {
            self.price_slippage = v
                .parse()
                .map_err(|e| Error::Config(format!("SWAPD_PRICE_SLIPPAGE: {e}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.mnemonic.trim().is_empty() {
            return Err(Error::Config("mnemonic is required".into()));
        }
        let _mnemonic: bip39::Mnemonic = self
            .mnemonic
            .parse()
            .map_err(|_| Error::Config("invalid mnemonic".into()))?;
        if self.trade_expiry_secs <= 0 || self.utxo_lock_secs <= 0 {
            return Err(Error::Config("expiry and lock durations must be positive".into()));
        }
        if self.price_slippage < Decimal::ZERO || self.price_slippage >= Decimal::ONE {
            return Err(Error::Config(format!(
                "price slippage {} must be in [0, 1)",
                self.price_slippage
            )));
        }
        if self.fee_account.is_empty() {
            return Err(Error::Config("fee account name is empty".into()));
        }
        Ok(())
    }

    pub fn electrum_url(&self) -> &str {
        self.electrum_url
            .as_deref()
            .unwrap_or_else(|| self.network.default_electrum_url())
    }

    /// Per-network data directory.
    pub fn network_dir(&self) -> PathBuf {
        self.datadir.join(self.network.as_str())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn trade_config(&self) -> TradeConfig {
        TradeConfig {
            trade_expiry_secs: self.trade_expiry_secs,
            price_slippage: self.price_slippage,
            fee_account: self.fee_account.clone(),
        }
    }

    pub fn log_filter(&self) -> log::LevelFilter {
        match self.log_level.to_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            "off" => log::LevelFilter::Off,
            _ => log::LevelFilter::Info,
        }
    }
}

//! JSON-file persistence for trades and markets.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use swap_engine::{Market, MarketRepository, Trade, TradeRepository};

use crate::error::Result;

const STATE_FILE: &str = "swapd_state.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreState {
    #[serde(default)]
    markets: Vec<Market>,
    #[serde(default)]
    trades: Vec<Trade>,
}

/// Every mutation rewrites the whole file under the store lock.
pub struct JsonStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

fn unavailable(e: impl std::fmt::Display) -> swap_engine::Error {
    swap_engine::Error::ServiceUnavailable(format!("store: {e}"))
}

impl JsonStore {
    /// Open the store in `dir`, starting empty when no file exists yet.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(STATE_FILE);
        let state = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> swap_engine::Result<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| unavailable("lock poisoned"))
    }

    fn save(&self, state: &StoreState) -> swap_engine::Result<()> {
        let json = serde_json::to_string_pretty(state).map_err(unavailable)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(unavailable)?;
        fs::rename(&tmp, &self.path).map_err(unavailable)
    }

    /// Insert or replace the market for the same asset pair.
    pub fn upsert_market(&self, market: Market) -> swap_engine::Result<()> {
        let mut state = self.lock()?;
        match state
            .markets
            .iter_mut()
            .find(|m| m.base_asset == market.base_asset && m.quote_asset == market.quote_asset)
        {
            Some(existing) => *existing = market,
            None => state.markets.push(market),
        }
        self.save(&state)
    }

    pub fn markets(&self) -> swap_engine::Result<Vec<Market>> {
        Ok(self.lock()?.markets.clone())
    }
}

impl MarketRepository for JsonStore {
    fn get_market_by_assets(
        &self,
        base_asset: &str,
        quote_asset: &str,
    ) -> swap_engine::Result<Option<Market>> {
        Ok(self
            .lock()?
            .markets
            .iter()
            .find(|m| m.base_asset == base_asset && m.quote_asset == quote_asset)
            .cloned())
    }
}

impl TradeRepository for JsonStore {
    fn get_all_trades(&self) -> swap_engine::Result<Vec<Trade>> {
        Ok(self.lock()?.trades.clone())
    }

    fn add_trade(&self, trade: &Trade) -> swap_engine::Result<()> {
        let mut state = self.lock()?;
        state.trades.push(trade.clone());
        if let Err(e) = self.save(&state) {
            state.trades.pop();
            return Err(e);
        }
        Ok(())
    }

    fn update_trade(
        &self,
        trade_id: &str,
        mutator: &mut dyn FnMut(&mut Trade) -> swap_engine::Result<()>,
    ) -> swap_engine::Result<Trade> {
        let mut state = self.lock()?;
        let pos = state
            .trades
            .iter()
            .position(|t| t.id == trade_id)
            .ok_or_else(|| swap_engine::Error::TradeNotFound(trade_id.to_string()))?;

        let mut updated = state.trades[pos].clone();
        mutator(&mut updated)?;
        let previous = std::mem::replace(&mut state.trades[pos], updated.clone());
        if let Err(e) = self.save(&state) {
            state.trades[pos] = previous;
            return Err(e);
        }
        Ok(updated)
    }

    fn get_trade_by_swap_accept_id(&self, accept_id: &str) -> swap_engine::Result<Option<Trade>> {
        Ok(self
            .lock()?
            .trades
            .iter()
            .find(|t| t.swap_accept.as_ref().is_some_and(|a| a.id == accept_id))
            .cloned())
    }
}

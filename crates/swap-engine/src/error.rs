use thiserror::Error;

use crate::trade::{SwapFail, TradeStatus};

#[derive(Debug, Error)]
pub enum Error {
    /// A backend (wallet engine, repository) could not be reached. Retryable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The market is closed or unknown. Not retryable for this market.
    #[error("market unavailable")]
    MarketUnavailable,

    #[error("insufficient funds: need {target} of asset {asset}")]
    InsufficientFunds { asset: String, target: u64 },

    #[error("PSET construction error: {0}")]
    Pset(String),

    #[error("invalid swap message: {0}")]
    InvalidSwapMessage(String),

    #[error("fee estimation error: {0}")]
    FeeEstimation(String),

    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("trade error: {0}")]
    Trade(#[from] TradeError),

    #[error("trade not found: {0}")]
    TradeNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by a wallet engine capability call.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("account error: {0}")]
    Account(String),

    #[error("utxo selection error: {0}")]
    Selection(String),

    #[error("fee estimation error: {0}")]
    Estimation(String),

    #[error("blinding error: {0}")]
    Blinding(String),

    #[error("signer error: {0}")]
    Signing(String),

    #[error("finalize error: {0}")]
    Finalize(String),

    #[error("broadcast error: {0}")]
    Broadcast(String),

    #[error("notification stream error: {0}")]
    Notifications(String),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type WalletResult<T> = std::result::Result<T, WalletError>;

/// Guard violations and rejections raised by [`Trade`](crate::trade::Trade)
/// transitions.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error("cannot {op} trade in status {status}")]
    InvalidStatus { op: &'static str, status: TradeStatus },

    #[error("trade expires at {expiry_time}, now is {now}")]
    NotExpired { expiry_time: i64, now: i64 },

    #[error("swap rejected: {}", .0.failure_message)]
    Rejected(SwapFail),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
}

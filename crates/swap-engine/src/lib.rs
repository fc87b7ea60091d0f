pub use lwk_wollet::elements;

pub mod builder;
pub mod coinselect;
pub mod error;
pub mod fee;
pub mod market;
pub mod notify;
pub mod pricing;
pub mod pset;
pub mod repository;
pub mod service;
pub mod settlement;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod trade;
pub mod wallet;

// Core types
pub use error::{Error, Result, TradeError, WalletError, WalletResult};
pub use market::{FixedFee, Market, MarketPrice, StrategyKind};
pub use trade::{
    MarketSnapshot, StatusCode, SwapAccept, SwapComplete, SwapFail, SwapFailCode, SwapRequest,
    Trade, TradeStatus, TradeType, UnblindedInput,
};

// Trade operations
pub use service::{CompleteMessage, CompleteOutcome, ProposeOutcome, TradeConfig, TradeService};
pub use settlement::{ReconcileReport, SettlementTracker};

// Pricing and transaction assembly
pub use builder::{BuildResult, SwapBuilder, SwapCompletion};
pub use coinselect::CoinSelection;
pub use pricing::{FeeAdjustment, PluggableStrategy, PriceStrategy, TradePreview};

// Collaborator interfaces
pub use notify::{Dispatcher, EventHandler, Resolution, WatchKind, Watcher};
pub use repository::{MarketRepository, TradePublisher, TradeRepository};
pub use wallet::{
    AccountInfo, AccountService, AddressInfo, BlockDetails, NotificationService,
    TransactionService, TxEvent, TxEventKind, TxOutput, Utxo, UtxoEvent, UtxoEventKind,
    UtxoSelection, Wallet,
};

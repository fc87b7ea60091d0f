mod machine;
mod types;

pub use machine::{MarketSnapshot, Trade};
pub use types::{
    StatusCode, SwapAccept, SwapComplete, SwapFail, SwapFailCode, SwapRequest, TradeStatus,
    TradeType, UnblindedInput,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("engine error: {0}")]
    Engine(#[from] swap_engine::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

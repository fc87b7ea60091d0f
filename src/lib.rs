pub mod config;
pub mod error;
pub mod network;
pub mod publisher;
pub mod store;
pub mod wallet;

pub use config::Config;
pub use error::{Error, Result};
pub use network::Network;

//! Wallet engine backed by LWK: one watch-only `Wollet` per account plus a
//! software signer, synced by a background poller.

mod engine;
mod locks;
mod poller;

pub use engine::LwkWallet;
pub use locks::LockTable;
pub use poller::{spawn_poller, PollerConfig, PollerHandle};

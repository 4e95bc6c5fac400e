//! Configuration and wiring for the `ledger` operator binary.

pub mod config;
pub mod node;

pub use config::{FileConfig, RemoteConfig, RemoteTarget, Settings};
pub use node::{LedgerNode, StatusReport};

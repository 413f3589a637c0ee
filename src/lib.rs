//! Incentive and credit management ledger.
//!
//! Users earn credits through policy or freelancer requests that pass through
//! signature and HOD approval, and redeem them through the accounts team.
//! Every balance change is an entry in an append-only wallet ledger.

pub mod access;
pub mod amount;
pub mod config;
pub mod csv;
pub mod currency;
pub mod engine;
pub mod model;
pub mod replay;
pub mod signature;
pub mod sink;
pub mod store;

pub use amount::Amount;
pub use config::Config;
pub use currency::Currency;
pub use engine::{Engine, EngineError, EngineResult, ErrorKind};
pub use replay::{Operation, Replay, WalletRow};
pub use store::{InMemoryStore, LedgerStore, StoreError};

//! Brokerage holdings with FIFO tax lots.
//!
//! - `fifo::Processor` rebuilds lots and dispositions for an account from its
//!   full transaction history
//! - `fifo::Analyzer` replays the same history in memory and reports sells that
//!   have no matching acquisition, classified by ownership era
//! - `db` owns the SQLite schema and every query the engine issues
//! - `reports` and `opening` cover the operator workflow around the engine
//!
//! Quantities and amounts are integers scaled by 10^6 ("micros") everywhere.

pub mod config;
pub mod db;
mod error;
pub mod fifo;
pub mod micros;
pub mod models;
pub mod opening;
pub mod reports;

pub use error::{Error, Result};

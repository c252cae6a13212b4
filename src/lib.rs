//! Client-side real-time synchronization layer for the Alpha Arena trading
//! terminal: three independently reconnecting stream channels, a
//! publish/subscribe fan-out with last-value replay, and pure reconciliation
//! of out-of-order push data into chart-ready view models.

pub mod cache;
pub mod catalog;
pub mod client;
pub mod db;
pub mod error;
pub mod stream;

pub use client::TerminalClient;
pub use error::TerminalError;
pub use stream::manager::OverallStatus;
pub use stream::types::TerminalConfig;

pub mod concurrency;
pub mod wal;

pub use concurrency::{IsolationLevel, Transaction, TransactionError, TransactionState};

// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use storage::buffer::{BufferPool, BufferPoolError, BufferPoolInstance, ParallelBufferPool};
pub use storage::disk::DiskManager;
pub use index::hash::ExtendibleHashTable;
pub use transaction::concurrency::{LockManager, TransactionManager};

use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum HashTableError {
    #[error("Entry already exists")]
    DuplicateEntry,

    #[error("Hash directory is at its maximum depth")]
    CapacityReached,

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}

use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;
use crate::transaction::wal::LogManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("Page {0} is not resident in the buffer pool")]
    PageNotResident(PageId),

    #[error("Page {0} is not pinned")]
    PageNotPinned(PageId),

    #[error("Page {0} is pinned")]
    PagePinned(PageId),

    #[error("No frame available: every frame is pinned")]
    NoFrameAvailable,

    #[error("Invalid page ID")]
    InvalidPageId,

    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),

    #[error("WAL error: {0}")]
    WalError(#[from] LogManagerError),
}

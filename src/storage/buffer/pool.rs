use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;

/// Common surface of a buffer pool, implemented by a single
/// `BufferPoolInstance` and by the sharded `ParallelBufferPool`. Callers that
/// page through the pool (indexes, table heaps) depend on this trait only.
pub trait BufferPool: Send + Sync {
    /// Fetch a page, pinned. The caller must unpin it.
    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError>;

    /// Allocate a fresh zeroed page, pinned. The caller must unpin it.
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError>;

    /// Drop one pin, optionally marking the page dirty
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError>;

    /// Write a resident page to disk and clear its dirty flag
    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError>;

    /// Remove an unpinned page from the pool and release it on disk
    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError>;

    /// Flush every dirty page
    fn flush_all_pages(&self) -> Result<(), BufferPoolError>;

    /// Total number of frames managed by this pool
    fn pool_size(&self) -> usize;
}

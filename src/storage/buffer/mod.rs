pub mod error;
pub mod instance;
pub mod parallel;
pub mod pool;
pub mod replacer;

pub use error::BufferPoolError;
pub use instance::BufferPoolInstance;
pub use parallel::ParallelBufferPool;
pub use pool::BufferPool;

use crate::common::types::{PageId, PagePtr};

impl BufferPool for BufferPoolInstance {
    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        BufferPoolInstance::fetch_page(self, page_id)
    }

    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        BufferPoolInstance::new_page(self)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        BufferPoolInstance::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        BufferPoolInstance::flush_page(self, page_id)
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        BufferPoolInstance::delete_page(self, page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        BufferPoolInstance::flush_all_pages(self)
    }

    fn pool_size(&self) -> usize {
        BufferPoolInstance::pool_size(self)
    }
}

impl BufferPool for ParallelBufferPool {
    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        ParallelBufferPool::fetch_page(self, page_id)
    }

    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        ParallelBufferPool::new_page(self)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        ParallelBufferPool::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        ParallelBufferPool::flush_page(self, page_id)
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        ParallelBufferPool::delete_page(self, page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        ParallelBufferPool::flush_all_pages(self)
    }

    fn pool_size(&self) -> usize {
        ParallelBufferPool::pool_size(self)
    }
}

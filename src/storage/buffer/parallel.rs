use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::instance::BufferPoolInstance;
use crate::storage::disk::DiskManager;
use crate::transaction::wal::LogManager;

/// A stateless router over `num_instances` buffer-pool shards. Page ids are
/// dispatched by `page_id % num_instances`; allocation rotates across the
/// shards so new pages spread evenly.
pub struct ParallelBufferPool {
    instances: Vec<Arc<BufferPoolInstance>>,
    start_index: Mutex<usize>,
    pool_size: usize,
}

impl ParallelBufferPool {
    pub fn new(
        num_instances: usize,
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");

        let instances = (0..num_instances)
            .map(|i| {
                Arc::new(BufferPoolInstance::new_for_pool(
                    pool_size,
                    num_instances as u32,
                    i as u32,
                    disk_manager.clone(),
                    log_manager.clone(),
                ))
            })
            .collect();

        Self {
            instances,
            start_index: Mutex::new(0),
            pool_size,
        }
    }

    /// The shard responsible for a page id
    fn instance_for(&self, page_id: PageId) -> &BufferPoolInstance {
        &self.instances[page_id as usize % self.instances.len()]
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size * self.instances.len()
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    /// Try each shard in round-robin order until one can host a new page. The
    /// cursor advances after every attempt, success or failure, so future
    /// allocations start elsewhere.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut start_index = self.start_index.lock();

        for _ in 0..self.instances.len() {
            let index = *start_index;
            *start_index = (*start_index + 1) % self.instances.len();

            match self.instances[index].new_page() {
                Ok(result) => return Ok(result),
                Err(BufferPoolError::NoFrameAvailable) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BufferPoolError::NoFrameAvailable)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).delete_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{Frame, FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;
use crate::transaction::wal::LogManager;

/// Bookkeeping guarded by the instance mutex. Every operation below holds
/// this lock for its full duration, which makes per-page operations within
/// one instance linearizable.
struct PoolState {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// One shard of the buffer pool: a fixed arena of frames, a page table, a
/// free list and an LRU replacer. Page ids are allocated with a stride of
/// `num_instances` starting at `instance_index`, so the owning shard of any
/// page is derivable from the id alone.
pub struct BufferPoolInstance {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    state: Mutex<PoolState>,
    replacer: LruReplacer,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolInstance {
    /// Create a stand-alone instance (a one-shard pool)
    pub fn new(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        Self::new_for_pool(pool_size, 1, 0, disk_manager, log_manager)
    }

    /// Create one shard of a parallel pool
    pub fn new_for_pool(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = i as FrameId;
            frames.push(Frame::new(
                frame_id,
                Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            ));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::new(),
                free_list,
                next_page_id: instance_index,
            }),
            replacer: LruReplacer::new(pool_size),
            disk_manager,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Fetch a page from the buffer pool or disk. The page comes back pinned;
    /// the caller must `unpin_page` it.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId);
        }

        let mut state = self.state.lock();

        // Already resident: pin it and hand out the frame's page
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &mut state.frames[frame_id as usize];
            if frame.pin_count == 0 {
                self.replacer.pin(frame_id);
            }
            frame.pin_count += 1;
            return Ok(frame.page.clone());
        }

        let frame_id = self.take_victim_frame(&mut state)?;
        let frame = &mut state.frames[frame_id as usize];
        {
            let mut page = frame.page.write();
            self.disk_manager.read_page(page_id, &mut page.data)?;
            page.page_id = page_id;
            page.lsn = 0;
        }
        frame.pin_count = 1;
        frame.is_dirty = false;
        state.page_table.insert(page_id, frame_id);

        Ok(state.frames[frame_id as usize].page.clone())
    }

    /// Allocate a fresh page. The zeroed page is written through to disk so a
    /// later fetch succeeds even if the page is evicted before any user write.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();

        if state.free_list.is_empty() && self.replacer.size() == 0 {
            return Err(BufferPoolError::NoFrameAvailable);
        }

        let frame_id = self.take_victim_frame(&mut state)?;
        let page_id = self.allocate_page(&mut state);

        let frame = &mut state.frames[frame_id as usize];
        {
            let mut page = frame.page.write();
            page.data.fill(0);
            page.page_id = page_id;
            page.lsn = 0;
            self.disk_manager.write_page(page_id, &page.data)?;
        }
        frame.pin_count = 1;
        frame.is_dirty = false;
        state.page_table.insert(page_id, frame_id);

        Ok((state.frames[frame_id as usize].page.clone(), page_id))
    }

    /// Drop one pin on a page, optionally marking it dirty. The dirty flag is
    /// only ever set here, never cleared.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotResident(page_id)),
        };

        let frame = &mut state.frames[frame_id as usize];
        if frame.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        if is_dirty {
            frame.is_dirty = true;
        }
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page to disk and clear its dirty flag. Pin state is
    /// untouched.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId);
        }

        let mut state = self.state.lock();
        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotResident(page_id)),
        };

        let frame = &mut state.frames[frame_id as usize];
        self.write_back(frame)
    }

    /// Flush every dirty page in this instance
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_ids: Vec<FrameId> = state.page_table.values().copied().collect();

        for frame_id in frame_ids {
            let frame = &mut state.frames[frame_id as usize];
            if frame.is_dirty {
                self.write_back(frame)?;
            }
        }

        Ok(())
    }

    /// Remove a page from the pool and release it on disk. Deleting a page
    /// that is not resident succeeds; deleting a pinned page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(()),
        };

        let frame = &mut state.frames[frame_id as usize];
        if frame.pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }
        if frame.is_dirty {
            self.write_back(frame)?;
        }

        {
            let mut page = frame.page.write();
            page.data.fill(0);
            page.page_id = INVALID_PAGE_ID;
            page.lsn = 0;
        }
        frame.pin_count = 0;
        frame.is_dirty = false;

        state.page_table.remove(&page_id);
        // An unpinned frame is enrolled in the replacer; the free list and the
        // replacer must stay disjoint.
        self.replacer.pin(frame_id);
        state.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);

        Ok(())
    }

    /// Pick a frame to (re)use: free list first, then the replacer. An evicted
    /// dirty page is written back and its mapping removed.
    fn take_victim_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.victim().ok_or(BufferPoolError::NoFrameAvailable)?;
        let frame = &mut state.frames[frame_id as usize];
        let old_page_id = frame.page.read().page_id;

        if frame.is_dirty {
            debug!("evicting dirty page {} from frame {}", old_page_id, frame_id);
            self.write_back(frame)?;
        }
        if old_page_id != INVALID_PAGE_ID {
            state.page_table.remove(&old_page_id);
        }

        Ok(frame_id)
    }

    /// Write a frame's page to disk, honoring write-ahead logging: the log is
    /// flushed up to the page's LSN before the page itself goes out.
    fn write_back(&self, frame: &mut Frame) -> Result<(), BufferPoolError> {
        {
            let page = frame.page.read();
            if let Some(log_manager) = &self.log_manager {
                log_manager.flush_to_lsn(page.lsn)?;
            }
            self.disk_manager.write_page(page.page_id, &page.data)?;
        }
        frame.is_dirty = false;
        Ok(())
    }

    /// Hand out the next page id owned by this instance. The stride keeps
    /// `page_id % num_instances == instance_index`.
    fn allocate_page(&self, state: &mut PoolState) -> PageId {
        let page_id = state.next_page_id;
        state.next_page_id += self.num_instances;
        debug_assert_eq!(page_id % self.num_instances, self.instance_index);
        page_id
    }
}

use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (8KB)
pub const PAGE_SIZE: usize = 8192;

/// Page ID type
pub type PageId = u32;

/// Sentinel for "no page"; real ids start at 0 so the shard assignment
/// `page_id % num_instances` holds for every allocated id.
pub const INVALID_PAGE_ID: PageId = u32::MAX;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// Transaction ID type
pub type TxnId = u32;

/// Sentinel for "no transaction"
pub const INVALID_TXN_ID: TxnId = u32::MAX;

/// Record ID type
pub type Rid = u32;

/// LSN (Log Sequence Number) type
pub type Lsn = u64;

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }
}

/// Smart pointer to a page; the RwLock doubles as the page latch.
pub type PagePtr = Arc<RwLock<Page>>;

/// Buffer pool frame structure. The metadata fields are guarded by the
/// owning buffer-pool instance's mutex, not by the page latch.
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            page,
            frame_id,
            is_dirty: false,
            pin_count: 0,
        }
    }
}

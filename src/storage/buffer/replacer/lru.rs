use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU (Least Recently Used) page replacement policy.
///
/// Frames enter on the pin-count 0 transition and leave either when they are
/// re-pinned or when they are chosen as a victim. The linked hash map keeps
/// recency order while giving O(1) membership checks and removals.
pub struct LruReplacer {
    lru_list: Mutex<LinkedHashMap<FrameId, ()>>,
}

impl LruReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            lru_list: Mutex::new(LinkedHashMap::with_capacity(pool_size)),
        }
    }

    /// Victim selection: remove and return the least recently unpinned frame
    pub fn victim(&self) -> Option<FrameId> {
        self.lru_list.lock().pop_front().map(|(frame_id, ())| frame_id)
    }

    /// Remove a frame from the replacer. Called when its pin count leaves 0.
    pub fn pin(&self, frame_id: FrameId) {
        self.lru_list.lock().remove(&frame_id);
    }

    /// Insert a frame as most recently used. Called when its pin count
    /// returns to 0. A frame already present keeps its position.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut list = self.lru_list.lock();
        if !list.contains_key(&frame_id) {
            list.insert(frame_id, ());
        }
    }

    /// Number of frames currently eligible for eviction
    pub fn size(&self) -> usize {
        self.lru_list.lock().len()
    }
}

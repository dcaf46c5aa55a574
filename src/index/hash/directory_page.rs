use std::collections::HashMap;
use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::PageId;

/// Hard cap on both global and local depth
pub const MAX_DEPTH: u32 = 9;

/// Fixed slot capacity of the directory (`1 << MAX_DEPTH`)
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_DEPTH;

// On-page layout: page_id (u32), global_depth (u32), bucket_page_ids
// (u32 x 512), local_depths (u8 x 512).
const PAGE_ID_OFFSET: usize = 0;
const GLOBAL_DEPTH_OFFSET: usize = 4;
const BUCKET_PAGE_IDS_OFFSET: usize = 8;
const LOCAL_DEPTHS_OFFSET: usize = BUCKET_PAGE_IDS_OFFSET + 4 * DIRECTORY_ARRAY_SIZE;

/// Read-only view over a directory page's bytes. Re-derived on every access;
/// never outlives the pin on the underlying page.
pub struct DirectoryPage<'a> {
    data: &'a [u8],
}

impl<'a> DirectoryPage<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn page_id(&self) -> PageId {
        LittleEndian::read_u32(&self.data[PAGE_ID_OFFSET..])
    }

    pub fn global_depth(&self) -> u32 {
        LittleEndian::read_u32(&self.data[GLOBAL_DEPTH_OFFSET..])
    }

    pub fn global_depth_mask(&self) -> u32 {
        (1 << self.global_depth()) - 1
    }

    /// Number of directory slots currently in use
    pub fn size(&self) -> u32 {
        1 << self.global_depth()
    }

    pub fn bucket_page_id(&self, idx: u32) -> PageId {
        debug_assert!((idx as usize) < DIRECTORY_ARRAY_SIZE);
        LittleEndian::read_u32(&self.data[BUCKET_PAGE_IDS_OFFSET + 4 * idx as usize..])
    }

    pub fn local_depth(&self, idx: u32) -> u32 {
        debug_assert!((idx as usize) < DIRECTORY_ARRAY_SIZE);
        self.data[LOCAL_DEPTHS_OFFSET + idx as usize] as u32
    }

    /// True when every slot's local depth is strictly below the global depth,
    /// i.e. halving the directory loses nothing
    pub fn can_shrink(&self) -> bool {
        (0..self.size()).all(|i| self.local_depth(i) < self.global_depth())
    }

    /// Check the structural invariants: local depths never exceed the global
    /// depth, slots sharing a bucket share its local depth, and each bucket
    /// is referenced by exactly `2^(global_depth - local_depth)` slots.
    pub fn verify_integrity(&self) {
        let mut slot_counts: HashMap<PageId, u32> = HashMap::new();
        let mut depths: HashMap<PageId, u32> = HashMap::new();

        for i in 0..self.size() {
            let page_id = self.bucket_page_id(i);
            let local_depth = self.local_depth(i);
            assert!(
                local_depth <= self.global_depth(),
                "local depth {} of slot {} exceeds global depth {}",
                local_depth,
                i,
                self.global_depth()
            );

            *slot_counts.entry(page_id).or_insert(0) += 1;
            match depths.get(&page_id) {
                Some(&depth) => assert_eq!(
                    depth, local_depth,
                    "slots sharing bucket {} disagree on local depth",
                    page_id
                ),
                None => {
                    depths.insert(page_id, local_depth);
                }
            }
        }

        for (page_id, count) in slot_counts {
            let expected = 1 << (self.global_depth() - depths[&page_id]);
            assert_eq!(
                count, expected,
                "bucket {} is referenced by {} slots, expected {}",
                page_id, count, expected
            );
        }
    }
}

/// Mutable view over a directory page's bytes
pub struct DirectoryPageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> DirectoryPageMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    fn view(&self) -> DirectoryPage<'_> {
        DirectoryPage { data: &*self.data }
    }

    pub fn page_id(&self) -> PageId {
        self.view().page_id()
    }

    pub fn global_depth(&self) -> u32 {
        self.view().global_depth()
    }

    pub fn global_depth_mask(&self) -> u32 {
        self.view().global_depth_mask()
    }

    pub fn size(&self) -> u32 {
        self.view().size()
    }

    pub fn bucket_page_id(&self, idx: u32) -> PageId {
        self.view().bucket_page_id(idx)
    }

    pub fn local_depth(&self, idx: u32) -> u32 {
        self.view().local_depth(idx)
    }

    pub fn can_shrink(&self) -> bool {
        self.view().can_shrink()
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        LittleEndian::write_u32(&mut self.data[PAGE_ID_OFFSET..], page_id);
    }

    pub fn set_bucket_page_id(&mut self, idx: u32, page_id: PageId) {
        debug_assert!((idx as usize) < DIRECTORY_ARRAY_SIZE);
        LittleEndian::write_u32(
            &mut self.data[BUCKET_PAGE_IDS_OFFSET + 4 * idx as usize..],
            page_id,
        );
    }

    pub fn set_local_depth(&mut self, idx: u32, depth: u32) {
        debug_assert!((idx as usize) < DIRECTORY_ARRAY_SIZE);
        debug_assert!(depth <= MAX_DEPTH);
        self.data[LOCAL_DEPTHS_OFFSET + idx as usize] = depth as u8;
    }

    pub fn incr_local_depth(&mut self, idx: u32) {
        let depth = self.local_depth(idx);
        self.set_local_depth(idx, depth + 1);
    }

    pub fn decr_local_depth(&mut self, idx: u32) {
        let depth = self.local_depth(idx);
        debug_assert!(depth > 0);
        self.set_local_depth(idx, depth - 1);
    }

    /// Double the directory. Each new slot mirrors its counterpart in the
    /// lower half, so the depth invariants hold immediately afterwards.
    pub fn incr_global_depth(&mut self) {
        let old_size = self.size();
        assert!(self.global_depth() < MAX_DEPTH, "directory is at maximum depth");

        for i in 0..old_size {
            let page_id = self.bucket_page_id(i);
            let depth = self.local_depth(i);
            self.set_bucket_page_id(old_size + i, page_id);
            self.set_local_depth(old_size + i, depth);
        }

        let depth = self.global_depth();
        LittleEndian::write_u32(&mut self.data[GLOBAL_DEPTH_OFFSET..], depth + 1);
    }

    /// Halve the directory. Only legal when `can_shrink` holds.
    pub fn decr_global_depth(&mut self) {
        let depth = self.global_depth();
        debug_assert!(depth > 0);
        LittleEndian::write_u32(&mut self.data[GLOBAL_DEPTH_OFFSET..], depth - 1);
    }

    pub fn verify_integrity(&self) {
        self.view().verify_integrity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::PAGE_SIZE;

    #[test]
    fn test_layout_fits_in_a_page() {
        assert!(LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE <= PAGE_SIZE);
    }

    #[test]
    fn test_grow_mirrors_lower_half() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut directory = DirectoryPageMut::new(&mut data);
        directory.set_page_id(7);
        directory.set_bucket_page_id(0, 42);
        assert_eq!(directory.size(), 1);

        directory.incr_global_depth();
        assert_eq!(directory.global_depth(), 1);
        assert_eq!(directory.size(), 2);
        assert_eq!(directory.bucket_page_id(0), 42);
        assert_eq!(directory.bucket_page_id(1), 42);
        assert_eq!(directory.local_depth(1), 0);
        directory.verify_integrity();
    }

    #[test]
    fn test_can_shrink_tracks_local_depths() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut directory = DirectoryPageMut::new(&mut data);
        directory.set_bucket_page_id(0, 1);

        // depth 0 directories never shrink
        assert!(!directory.can_shrink());

        directory.incr_global_depth();
        assert!(directory.can_shrink());

        directory.set_bucket_page_id(1, 2);
        directory.set_local_depth(0, 1);
        directory.set_local_depth(1, 1);
        assert!(!directory.can_shrink());

        directory.set_local_depth(0, 0);
        directory.set_local_depth(1, 0);
        directory.set_bucket_page_id(1, 1);
        assert!(directory.can_shrink());
        directory.decr_global_depth();
        assert_eq!(directory.global_depth(), 0);
        directory.verify_integrity();
    }

    #[test]
    #[should_panic(expected = "disagree on local depth")]
    fn test_verify_integrity_rejects_mismatched_siblings() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut directory = DirectoryPageMut::new(&mut data);
        directory.set_bucket_page_id(0, 5);
        directory.incr_global_depth();
        // both slots point at bucket 5 but now disagree on depth
        directory.set_local_depth(1, 1);
        directory.verify_integrity();
    }
}

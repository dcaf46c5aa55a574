use std::marker::PhantomData;
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{PageId, PagePtr, INVALID_PAGE_ID};
use crate::index::hash::bucket_page::{BucketPage, BucketPageMut};
use crate::index::hash::codec::{KeyHasher, Storable};
use crate::index::hash::directory_page::{DirectoryPage, DirectoryPageMut, MAX_DEPTH};
use crate::index::hash::error::HashTableError;
use crate::storage::buffer::BufferPool;

/// Disk-resident extendible hash table. The directory and the buckets live
/// in buffer-pool pages and are addressed by page id only; typed views over
/// the page bytes are re-derived on each access and never outlive the pin.
///
/// Latch order is table latch, then page latch, then the pool's own mutex
/// inside fetch/unpin. Point operations run under the table read latch and a
/// per-bucket page latch; structural changes (split, merge, grow, shrink)
/// serialize on the table write latch.
pub struct ExtendibleHashTable<K, V, H> {
    buffer_pool: Arc<dyn BufferPool>,
    directory_page_id: Mutex<PageId>,
    table_latch: RwLock<()>,
    hasher: H,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, H> ExtendibleHashTable<K, V, H>
where
    K: Storable,
    V: Storable,
    H: KeyHasher<K>,
{
    /// Create a hash table over the given buffer pool. Pages are allocated
    /// lazily on first use.
    pub fn new(buffer_pool: Arc<dyn BufferPool>, hasher: H) -> Self {
        Self {
            buffer_pool,
            directory_page_id: Mutex::new(INVALID_PAGE_ID),
            table_latch: RwLock::new(()),
            hasher,
            _marker: PhantomData,
        }
    }

    /// Fetch the directory page, creating it together with bucket 0 on the
    /// first call. Returned pinned.
    fn fetch_directory(&self) -> Result<PagePtr, HashTableError> {
        let directory_page_id = {
            let mut directory_page_id = self.directory_page_id.lock();
            if *directory_page_id == INVALID_PAGE_ID {
                let (directory_ptr, new_directory_id) = self.buffer_pool.new_page()?;
                let (_, bucket_page_id) = self.buffer_pool.new_page()?;
                {
                    let mut page = directory_ptr.write();
                    let mut directory = DirectoryPageMut::new(&mut page.data);
                    directory.set_page_id(new_directory_id);
                    directory.set_bucket_page_id(0, bucket_page_id);
                }
                self.buffer_pool.unpin_page(new_directory_id, true)?;
                self.buffer_pool.unpin_page(bucket_page_id, true)?;
                *directory_page_id = new_directory_id;
            }
            *directory_page_id
        };
        Ok(self.buffer_pool.fetch_page(directory_page_id)?)
    }

    /// Look up every value stored under this key
    pub fn get_value(&self, key: &K) -> Result<Vec<V>, HashTableError> {
        let _table = self.table_latch.read();

        let directory_ptr = self.fetch_directory()?;
        let (directory_page_id, bucket_page_id) = {
            let page = directory_ptr.read();
            let directory = DirectoryPage::new(&page.data);
            let idx = self.hasher.hash_key(key) & directory.global_depth_mask();
            (page.page_id, directory.bucket_page_id(idx))
        };

        let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;
        let mut values = Vec::new();
        {
            let page = bucket_ptr.read();
            BucketPage::<K, V>::new(&page.data).get_value(key, &mut values);
        }

        self.buffer_pool.unpin_page(directory_page_id, false)?;
        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        Ok(values)
    }

    /// Insert a (key, value) pair. An exact duplicate pair is rejected; a
    /// full bucket triggers a split.
    pub fn insert(&self, key: &K, value: &V) -> Result<(), HashTableError> {
        {
            let _table = self.table_latch.read();

            let directory_ptr = self.fetch_directory()?;
            let (directory_page_id, bucket_page_id) = {
                let page = directory_ptr.read();
                let directory = DirectoryPage::new(&page.data);
                let idx = self.hasher.hash_key(key) & directory.global_depth_mask();
                (page.page_id, directory.bucket_page_id(idx))
            };

            let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;
            {
                let mut page = bucket_ptr.write();
                let mut bucket = BucketPageMut::<K, V>::new(&mut page.data);
                if !bucket.is_full() {
                    let inserted = bucket.insert(key, value);
                    drop(page);
                    self.buffer_pool.unpin_page(directory_page_id, false)?;
                    self.buffer_pool.unpin_page(bucket_page_id, true)?;
                    return if inserted {
                        Ok(())
                    } else {
                        Err(HashTableError::DuplicateEntry)
                    };
                }
            }

            self.buffer_pool.unpin_page(directory_page_id, false)?;
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
        }

        self.split_insert(key, value)
    }

    /// Slow insert path: split the overflowing bucket, growing the directory
    /// when its depth is exhausted, then retry the insert.
    fn split_insert(&self, key: &K, value: &V) -> Result<(), HashTableError> {
        let table = self.table_latch.write();

        let directory_ptr = self.fetch_directory()?;
        let mut directory_page = directory_ptr.write();
        let directory_page_id = directory_page.page_id;
        let mut directory = DirectoryPageMut::new(&mut directory_page.data);

        let target_idx = self.hasher.hash_key(key) & directory.global_depth_mask();
        let target_page_id = directory.bucket_page_id(target_idx);

        let bucket_ptr = self.buffer_pool.fetch_page(target_page_id)?;
        let mut bucket_page = bucket_ptr.write();

        // another thread may have resolved the overflow in the meantime
        {
            let mut bucket = BucketPageMut::<K, V>::new(&mut bucket_page.data);
            if !bucket.is_full() {
                let inserted = bucket.insert(key, value);
                drop(bucket_page);
                drop(directory_page);
                self.buffer_pool.unpin_page(directory_page_id, false)?;
                self.buffer_pool.unpin_page(target_page_id, true)?;
                return if inserted {
                    Ok(())
                } else {
                    Err(HashTableError::DuplicateEntry)
                };
            }
        }

        let local_depth = directory.local_depth(target_idx);
        if local_depth >= MAX_DEPTH {
            drop(bucket_page);
            drop(directory_page);
            self.buffer_pool.unpin_page(directory_page_id, false)?;
            self.buffer_pool.unpin_page(target_page_id, false)?;
            return Err(HashTableError::CapacityReached);
        }

        debug!(
            "splitting bucket {} (local depth {}, global depth {})",
            target_page_id,
            local_depth,
            directory.global_depth()
        );

        let (image_ptr, image_page_id) = self.buffer_pool.new_page()?;

        if local_depth == directory.global_depth() {
            directory.incr_global_depth();
        }
        directory.incr_local_depth(target_idx);
        let new_local = directory.local_depth(target_idx);
        let local_mask = (1u32 << new_local) - 1;

        // every former sibling takes the new depth; those that diverge in the
        // new distinguishing bit re-route to the split image
        for i in 0..directory.size() {
            if i == target_idx {
                continue;
            }
            if directory.bucket_page_id(i) == target_page_id {
                directory.set_local_depth(i, new_local);
                if (i & local_mask) != (target_idx & local_mask) {
                    directory.set_bucket_page_id(i, image_page_id);
                }
            }
        }

        // rehash the overflowing bucket across itself and the image
        let mut pairs: Vec<(K, V)> = Vec::new();
        {
            let bucket = BucketPage::<K, V>::new(&bucket_page.data);
            for idx in 0..bucket.capacity() {
                if bucket.is_readable(idx) {
                    pairs.push((bucket.key_at(idx), bucket.value_at(idx)));
                }
            }
        }

        let mut bucket = BucketPageMut::<K, V>::new(&mut bucket_page.data);
        bucket.reset();
        let mut image_page = image_ptr.write();
        let mut image = BucketPageMut::<K, V>::new(&mut image_page.data);
        for (k, v) in pairs {
            let hash = self.hasher.hash_key(&k);
            if (hash & local_mask) == (target_idx & local_mask) {
                bucket.insert(&k, &v);
            } else {
                image.insert(&k, &v);
            }
        }

        drop(image_page);
        drop(bucket_page);
        drop(directory_page);
        self.buffer_pool.unpin_page(target_page_id, true)?;
        self.buffer_pool.unpin_page(image_page_id, true)?;
        self.buffer_pool.unpin_page(directory_page_id, true)?;
        drop(table);

        // one split may not be enough when every key shares the new bit
        self.insert(key, value)
    }

    /// Remove the pair matching both key and value. Emptying a bucket
    /// triggers a merge with its split image.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        let removed;
        let now_empty;
        {
            let _table = self.table_latch.read();

            let directory_ptr = self.fetch_directory()?;
            let (directory_page_id, bucket_page_id) = {
                let page = directory_ptr.read();
                let directory = DirectoryPage::new(&page.data);
                let idx = self.hasher.hash_key(key) & directory.global_depth_mask();
                (page.page_id, directory.bucket_page_id(idx))
            };

            let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;
            {
                let mut page = bucket_ptr.write();
                let mut bucket = BucketPageMut::<K, V>::new(&mut page.data);
                removed = bucket.remove(key, value);
                now_empty = bucket.is_empty();
            }

            self.buffer_pool.unpin_page(directory_page_id, false)?;
            self.buffer_pool.unpin_page(bucket_page_id, removed)?;
        }

        if now_empty {
            self.merge(key)?;
        }
        Ok(removed)
    }

    /// Fold an empty bucket back into its split image and shrink the
    /// directory while every slot permits it. Skipped when the bucket has
    /// refilled, sits at depth 0, or disagrees with its image on depth.
    fn merge(&self, key: &K) -> Result<(), HashTableError> {
        let _table = self.table_latch.write();

        let directory_ptr = self.fetch_directory()?;
        let mut directory_page = directory_ptr.write();
        let directory_page_id = directory_page.page_id;
        let mut directory = DirectoryPageMut::new(&mut directory_page.data);

        let target_idx = self.hasher.hash_key(key) & directory.global_depth_mask();
        let target_page_id = directory.bucket_page_id(target_idx);

        let bucket_ptr = self.buffer_pool.fetch_page(target_page_id)?;
        let is_empty = {
            let page = bucket_ptr.read();
            BucketPage::<K, V>::new(&page.data).is_empty()
        };

        if !is_empty {
            drop(directory_page);
            self.buffer_pool.unpin_page(target_page_id, false)?;
            self.buffer_pool.unpin_page(directory_page_id, false)?;
            return Ok(());
        }

        let local_depth = directory.local_depth(target_idx);
        if local_depth == 0 {
            drop(directory_page);
            self.buffer_pool.unpin_page(target_page_id, false)?;
            self.buffer_pool.unpin_page(directory_page_id, false)?;
            return Ok(());
        }

        let image_idx = target_idx ^ (1u32 << (local_depth - 1));
        let image_page_id = directory.bucket_page_id(image_idx);
        if directory.local_depth(image_idx) != local_depth || image_page_id == target_page_id {
            drop(directory_page);
            self.buffer_pool.unpin_page(target_page_id, false)?;
            self.buffer_pool.unpin_page(directory_page_id, false)?;
            return Ok(());
        }

        debug!("merging bucket {} into its image {}", target_page_id, image_page_id);

        self.buffer_pool.unpin_page(target_page_id, false)?;
        self.buffer_pool.delete_page(target_page_id)?;

        directory.decr_local_depth(target_idx);
        directory.decr_local_depth(image_idx);
        directory.set_bucket_page_id(target_idx, image_page_id);
        let merged_depth = directory.local_depth(image_idx);
        for i in 0..directory.size() {
            let page_id = directory.bucket_page_id(i);
            if page_id == target_page_id || page_id == image_page_id {
                directory.set_bucket_page_id(i, image_page_id);
                directory.set_local_depth(i, merged_depth);
            }
        }

        while directory.can_shrink() {
            directory.decr_global_depth();
        }

        drop(directory_page);
        self.buffer_pool.unpin_page(directory_page_id, true)?;
        Ok(())
    }

    /// Current number of hash-prefix bits consulted by the directory
    pub fn global_depth(&self) -> Result<u32, HashTableError> {
        let _table = self.table_latch.read();

        let directory_ptr = self.fetch_directory()?;
        let (directory_page_id, depth) = {
            let page = directory_ptr.read();
            (page.page_id, DirectoryPage::new(&page.data).global_depth())
        };
        self.buffer_pool.unpin_page(directory_page_id, false)?;
        Ok(depth)
    }

    /// Assert the directory's structural invariants
    pub fn verify_integrity(&self) -> Result<(), HashTableError> {
        let _table = self.table_latch.read();

        let directory_ptr = self.fetch_directory()?;
        let directory_page_id = {
            let page = directory_ptr.read();
            DirectoryPage::new(&page.data).verify_integrity();
            page.page_id
        };
        self.buffer_pool.unpin_page(directory_page_id, false)?;
        Ok(())
    }
}

use std::marker::PhantomData;

use crate::common::types::PAGE_SIZE;
use crate::index::hash::codec::Storable;

/// Slot capacity of a bucket page: each slot costs `K::SIZE + V::SIZE` bytes
/// plus one occupied bit and one readable bit.
pub fn bucket_array_size<K: Storable, V: Storable>() -> usize {
    (4 * PAGE_SIZE) / (4 * (K::SIZE + V::SIZE) + 1)
}

fn bitmap_bytes<K: Storable, V: Storable>() -> usize {
    (bucket_array_size::<K, V>() + 7) / 8
}

// On-page layout: occupied bitmap, readable bitmap, then the packed
// (key, value) array. Bit i of byte b addresses slot 8b + i.
fn readable_offset<K: Storable, V: Storable>() -> usize {
    bitmap_bytes::<K, V>()
}

fn array_offset<K: Storable, V: Storable>() -> usize {
    2 * bitmap_bytes::<K, V>()
}

fn slot_offset<K: Storable, V: Storable>(idx: usize) -> usize {
    array_offset::<K, V>() + idx * (K::SIZE + V::SIZE)
}

/// Read-only view over a bucket page's bytes. A slot is live ("readable")
/// while it holds a pair; removal clears the readable bit and leaves the
/// occupied bit as a tombstone.
pub struct BucketPage<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: Storable, V: Storable> BucketPage<'a, K, V> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        bucket_array_size::<K, V>()
    }

    pub fn is_occupied(&self, idx: usize) -> bool {
        self.data[idx / 8] >> (idx % 8) & 1 != 0
    }

    pub fn is_readable(&self, idx: usize) -> bool {
        self.data[readable_offset::<K, V>() + idx / 8] >> (idx % 8) & 1 != 0
    }

    pub fn key_at(&self, idx: usize) -> K {
        K::decode(&self.data[slot_offset::<K, V>(idx)..])
    }

    pub fn value_at(&self, idx: usize) -> V {
        V::decode(&self.data[slot_offset::<K, V>(idx) + K::SIZE..])
    }

    /// Collect the values of every live pair with this key; returns whether
    /// anything matched
    pub fn get_value(&self, key: &K, result: &mut Vec<V>) -> bool {
        let mut found = false;
        for idx in 0..self.capacity() {
            if self.is_readable(idx) && self.key_at(idx) == *key {
                result.push(self.value_at(idx));
                found = true;
            }
        }
        found
    }

    pub fn is_full(&self) -> bool {
        (0..self.capacity()).all(|idx| self.is_readable(idx))
    }

    pub fn is_empty(&self) -> bool {
        !(0..self.capacity()).any(|idx| self.is_readable(idx))
    }

    pub fn num_readable(&self) -> usize {
        (0..self.capacity()).filter(|&idx| self.is_readable(idx)).count()
    }
}

/// Mutable view over a bucket page's bytes
pub struct BucketPageMut<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: Storable, V: Storable> BucketPageMut<'a, K, V> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    fn view(&self) -> BucketPage<'_, K, V> {
        BucketPage {
            data: &*self.data,
            _marker: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        bucket_array_size::<K, V>()
    }

    pub fn is_readable(&self, idx: usize) -> bool {
        self.view().is_readable(idx)
    }

    pub fn key_at(&self, idx: usize) -> K {
        self.view().key_at(idx)
    }

    pub fn value_at(&self, idx: usize) -> V {
        self.view().value_at(idx)
    }

    pub fn is_full(&self) -> bool {
        self.view().is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.view().is_empty()
    }

    pub fn set_occupied(&mut self, idx: usize) {
        self.data[idx / 8] |= 1 << (idx % 8);
    }

    pub fn set_readable(&mut self, idx: usize) {
        self.data[readable_offset::<K, V>() + idx / 8] |= 1 << (idx % 8);
    }

    fn clear_readable(&mut self, idx: usize) {
        self.data[readable_offset::<K, V>() + idx / 8] &= !(1 << (idx % 8));
    }

    /// Insert a pair into the first free slot. Duplicate (key, value) pairs
    /// are rejected; a full bucket rejects everything.
    pub fn insert(&mut self, key: &K, value: &V) -> bool {
        let mut free_slot = None;
        for idx in 0..self.capacity() {
            if self.is_readable(idx) {
                if self.key_at(idx) == *key && self.value_at(idx) == *value {
                    return false;
                }
            } else if free_slot.is_none() {
                free_slot = Some(idx);
            }
        }

        let idx = match free_slot {
            Some(idx) => idx,
            None => return false,
        };
        self.set_occupied(idx);
        self.set_readable(idx);
        let offset = slot_offset::<K, V>(idx);
        key.encode(&mut self.data[offset..]);
        value.encode(&mut self.data[offset + K::SIZE..]);
        true
    }

    /// Remove the live pair matching both key and value, if present
    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        for idx in 0..self.capacity() {
            if self.is_readable(idx) && self.key_at(idx) == *key && self.value_at(idx) == *value {
                self.clear_readable(idx);
                return true;
            }
        }
        false
    }

    /// Clear the readable bit of a slot, leaving the occupied tombstone
    pub fn remove_at(&mut self, idx: usize) {
        self.clear_readable(idx);
    }

    /// Zero both bitmaps, emptying the bucket
    pub fn reset(&mut self) {
        let end = array_offset::<K, V>();
        self.data[..end].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn test_bit_packing_is_lsb_first() {
        let mut data = empty_page();
        let mut bucket = BucketPageMut::<u32, u32>::new(&mut data);
        bucket.set_occupied(0);
        bucket.set_occupied(9);
        bucket.set_readable(9);
        drop(bucket);

        // slot 0 -> byte 0 bit 0, slot 9 -> byte 1 bit 1
        assert_eq!(data[0], 0b0000_0001);
        assert_eq!(data[1], 0b0000_0010);
        let readable_start = readable_offset::<u32, u32>();
        assert_eq!(data[readable_start], 0);
        assert_eq!(data[readable_start + 1], 0b0000_0010);
    }

    #[test]
    fn test_insert_rejects_duplicate_pair() {
        let mut data = empty_page();
        let mut bucket = BucketPageMut::<u32, u32>::new(&mut data);

        assert!(bucket.insert(&1, &10));
        assert!(bucket.insert(&1, &11)); // same key, different value
        assert!(!bucket.insert(&1, &10)); // exact duplicate

        let mut values = Vec::new();
        assert!(bucket.view().get_value(&1, &mut values));
        values.sort_unstable();
        assert_eq!(values, vec![10, 11]);
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let mut data = empty_page();
        let mut bucket = BucketPageMut::<u32, u32>::new(&mut data);

        assert!(bucket.insert(&3, &30));
        assert!(bucket.remove(&3, &30));
        assert!(!bucket.remove(&3, &30));
        assert!(bucket.is_empty());
        assert!(bucket.view().is_occupied(0));
        assert!(!bucket.is_readable(0));

        // the freed slot is reused
        assert!(bucket.insert(&4, &40));
        assert!(bucket.is_readable(0));
        assert_eq!(bucket.key_at(0), 4);
    }

    #[test]
    fn test_fills_to_capacity() {
        let mut data = empty_page();
        let mut bucket = BucketPageMut::<u32, u32>::new(&mut data);
        let capacity = bucket.capacity();

        for i in 0..capacity {
            assert!(bucket.insert(&(i as u32), &(i as u32)));
        }
        assert!(bucket.is_full());
        assert!(!bucket.insert(&u32::MAX, &0));

        bucket.reset();
        assert!(bucket.is_empty());
        assert!(bucket.insert(&1, &1));
    }

    #[test]
    fn test_layout_fits_in_a_page() {
        let capacity = bucket_array_size::<u64, u64>();
        assert!(slot_offset::<u64, u64>(capacity) <= PAGE_SIZE);
        let capacity = bucket_array_size::<u32, u32>();
        assert!(slot_offset::<u32, u32>(capacity) <= PAGE_SIZE);
    }
}

use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use burrowdb::index::hash::{ExtendibleHashTable, IdentityHasher};
use burrowdb::storage::buffer::{BufferPool, BufferPoolInstance, ParallelBufferPool};
use burrowdb::storage::disk::DiskManager;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, Arc<DiskManager>)> {
    let file = NamedTempFile::new()?;
    let disk_manager = Arc::new(DiskManager::new(file.path())?);
    Ok((file, disk_manager))
}

// Create a single buffer-pool instance over a temporary database
#[allow(dead_code)]
pub fn create_test_pool(pool_size: usize) -> Result<(Arc<BufferPoolInstance>, NamedTempFile)> {
    let (file, disk_manager) = create_temp_db_file()?;
    let pool = Arc::new(BufferPoolInstance::new(pool_size, disk_manager, None));
    Ok((pool, file))
}

// Create a sharded buffer pool over a temporary database
#[allow(dead_code)]
pub fn create_parallel_pool(
    num_instances: usize,
    pool_size: usize,
) -> Result<(Arc<ParallelBufferPool>, NamedTempFile)> {
    let (file, disk_manager) = create_temp_db_file()?;
    let pool = Arc::new(ParallelBufferPool::new(num_instances, pool_size, disk_manager, None));
    Ok((pool, file))
}

// Create an integer hash table with predictable (identity) bucket placement
#[allow(dead_code)]
pub fn create_test_hash_table(
    pool_size: usize,
) -> Result<(ExtendibleHashTable<i32, i32, IdentityHasher>, NamedTempFile)> {
    let (pool, file) = create_test_pool(pool_size)?;
    let pool: Arc<dyn BufferPool> = pool;
    Ok((ExtendibleHashTable::new(pool, IdentityHasher), file))
}

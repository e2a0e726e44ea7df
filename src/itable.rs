//! The open-inode table: one live [`Inode`] handle per sector that is
//! currently open anywhere in the system, shared by every caller that has
//! it open.
//!
//! Concurrent opens of the same sector dedupe onto one shared entry and
//! bump its open count; closing drops the count and, once it reaches zero
//! for an inode that has been unlinked, frees the inode's sectors and
//! drops it from the table. A plain `Vec<Arc<Inode>>` behind a `Mutex` is
//! enough to serve that contract.

use std::sync::{Arc, Mutex};

use crate::alloc::SectorAllocator;
use crate::block::BlockDevice;
use crate::cache::BufferCache;
use crate::error::FsResult;
use crate::inode::{self, Inode};

/// The set of inodes currently open anywhere, keyed by sector.
pub struct InodeTable {
    open: Mutex<Vec<Arc<Inode>>>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(Vec::new()),
        }
    }

    /// Returns the shared handle for `sector`, loading it from disk on
    /// first open and bumping its open count on every subsequent one.
    pub fn open<D: BlockDevice>(&self, cache: &BufferCache<D>, sector: u32) -> FsResult<Arc<Inode>> {
        let mut open = self.open.lock().unwrap();
        if let Some(existing) = open.iter().find(|i| i.sector == sector) {
            existing.bump_open();
            return Ok(Arc::clone(existing));
        }
        let loaded = Arc::new(inode::load_inode(cache, sector)?);
        open.push(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Registers a freshly created inode (from [`inode::create_inode`]) in
    /// the table as already open with count 1.
    pub fn track_new(&self, inode: Inode) -> Arc<Inode> {
        let handle = Arc::new(inode);
        self.open.lock().unwrap().push(Arc::clone(&handle));
        handle
    }

    /// Drops one reference to `inode`. If this was the last open reference
    /// and the inode had been unlinked, its sectors are released and the
    /// entry is dropped from the table.
    pub fn close<D: BlockDevice, A: SectorAllocator>(
        &self,
        cache: &BufferCache<D>,
        allocator: &A,
        inode: Arc<Inode>,
    ) -> FsResult<()> {
        let remaining = inode.drop_open();
        if remaining == 0 {
            if inode.is_removed() {
                inode.free_inode_sectors(cache, allocator)?;
                allocator.release(inode.sector, 1);
            }
            let mut open = self.open.lock().unwrap();
            open.retain(|i| !Arc::ptr_eq(i, &inode));
        }
        Ok(())
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::BitmapAllocator;
    use crate::block::MemBlockDevice;

    #[test]
    fn reopening_same_sector_shares_one_handle() {
        let cache = BufferCache::with_capacity(MemBlockDevice::new(16), 8).unwrap();
        let allocator = BitmapAllocator::new(16, 2);
        let table = InodeTable::new();

        let made = inode::create_inode(&cache, &allocator, false).unwrap();
        let sector = made.sector;
        let a = table.track_new(made);
        let b = table.open(&cache, sector).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.open_count(), 2);
    }

    #[test]
    fn close_of_removed_last_reference_frees_sectors() {
        let cache = BufferCache::with_capacity(MemBlockDevice::new(16), 8).unwrap();
        let allocator = BitmapAllocator::new(16, 2);
        let table = InodeTable::new();

        let made = inode::create_inode(&cache, &allocator, false).unwrap();
        let before = allocator.free_count();
        let handle = table.track_new(made);
        handle.mark_removed();
        table.close(&cache, &allocator, handle).unwrap();
        assert_eq!(allocator.free_count(), before + 1);
    }
}

//! The indexed inode layer: on-disk layout, offset-to-sector translation,
//! grow-on-write extension, and the in-memory handle (open count,
//! deny-write count, removed flag, per-inode extend lock) wrapped around
//! it.

use std::sync::Mutex;

use scopeguard::guard;
use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes};

use crate::alloc::SectorAllocator;
use crate::block::BlockDevice;
use crate::cache::BufferCache;
use crate::error::{FsError, FsResult};
use crate::lock::Spinlock;
use crate::param::{DIRECT_COUNT, INDIRECT_COUNT, INODE_MAGIC, SECTOR_SIZE};

/// On-disk inode. Occupies exactly one sector.
#[derive(Clone, Copy, AsBytes, FromBytes)]
#[repr(C)]
pub struct InodeDisk {
    magic: u32,
    is_dir: u32,
    length: u32,
    direct: [u32; DIRECT_COUNT],
    indirect: u32,
    double_indirect: u32,
}

const_assert_eq!(core::mem::size_of::<InodeDisk>(), SECTOR_SIZE);

impl InodeDisk {
    fn empty(is_dir: bool) -> Self {
        Self {
            magic: INODE_MAGIC,
            is_dir: is_dir as u32,
            length: 0,
            direct: [0; DIRECT_COUNT],
            indirect: 0,
            double_indirect: 0,
        }
    }
}

/// Where a byte offset lands in an inode's sector index, as a tagged sum
/// rather than an in-band sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectorLoc {
    Direct { index: usize },
    Indirect { index: usize },
    DoubleIndirect { outer: usize, inner: usize },
    OutOfRange,
}

fn locate(sector_index: usize) -> SectorLoc {
    if sector_index < DIRECT_COUNT {
        return SectorLoc::Direct { index: sector_index };
    }
    let i = sector_index - DIRECT_COUNT;
    if i < INDIRECT_COUNT {
        return SectorLoc::Indirect { index: i };
    }
    let i = i - INDIRECT_COUNT;
    if i < INDIRECT_COUNT * INDIRECT_COUNT {
        return SectorLoc::DoubleIndirect {
            outer: i / INDIRECT_COUNT,
            inner: i % INDIRECT_COUNT,
        };
    }
    SectorLoc::OutOfRange
}

/// One sector's worth of `u32` sector numbers, the layout of an indirect
/// block.
#[derive(Clone, Copy, AsBytes, FromBytes)]
#[repr(C)]
struct IndirectBlock {
    entries: [u32; INDIRECT_COUNT],
}

const_assert_eq!(core::mem::size_of::<IndirectBlock>(), SECTOR_SIZE);

/// The mutable, frequently-changing part of an inode handle: everything an
/// extending write or a deletion touches.
struct InodeState {
    disk: InodeDisk,
    open_count: u32,
    removed: bool,
    deny_write_count: u32,
}

/// An open, reference-counted inode handle.
pub struct Inode {
    pub sector: u32,
    state: Mutex<InodeState>,
    /// Serializes length-extending writes so two writers racing past the
    /// current EOF cannot each allocate sectors for the same new offset.
    /// Distinct from the `state` mutex so readers are never blocked behind
    /// an in-flight extension of a region they are not reading.
    extend_lock: Mutex<()>,
}

impl Inode {
    fn from_disk(sector: u32, disk: InodeDisk) -> Self {
        Self {
            sector,
            state: Mutex::new(InodeState {
                disk,
                open_count: 1,
                removed: false,
                deny_write_count: 0,
            }),
            extend_lock: Mutex::new(()),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.state.lock().unwrap().disk.is_dir != 0
    }

    pub fn len(&self) -> u32 {
        self.state.lock().unwrap().disk.length
    }

    pub fn open_count(&self) -> u32 {
        self.state.lock().unwrap().open_count
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().unwrap().removed
    }

    pub(crate) fn bump_open(&self) {
        self.state.lock().unwrap().open_count += 1;
    }

    pub(crate) fn drop_open(&self) -> u32 {
        let mut s = self.state.lock().unwrap();
        s.open_count -= 1;
        s.open_count
    }

    pub(crate) fn mark_removed(&self) {
        self.state.lock().unwrap().removed = true;
    }

    /// Increments the deny-write counter; while nonzero, `write_at` fails
    /// with [`FsError::Busy`]. Used to protect a file's contents while it
    /// is in active use, e.g. as a running executable.
    pub fn deny_write(&self) {
        self.state.lock().unwrap().deny_write_count += 1;
    }

    /// Decrements the deny-write counter.
    pub fn allow_write(&self) {
        let mut s = self.state.lock().unwrap();
        debug_assert!(s.deny_write_count > 0);
        s.deny_write_count -= 1;
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, stopping at EOF.
    /// Returns the number of bytes actually read.
    pub fn read_at<D: BlockDevice>(
        &self,
        cache: &BufferCache<D>,
        buf: &mut [u8],
        offset: u32,
    ) -> FsResult<usize> {
        let disk = self.state.lock().unwrap().disk;
        let length = disk.length;
        if offset >= length {
            return Ok(0);
        }
        let to_read = (length - offset) as usize;
        let n = buf.len().min(to_read);
        let mut done = 0;
        while done < n {
            let cur = offset as usize + done;
            let sector_index = cur / SECTOR_SIZE;
            let sector_off = cur % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - sector_off).min(n - done);
            let sector = self
                .sector_at(cache, &disk, sector_index)?
                .expect("sector within length must already be allocated");
            cache.read(sector, buf, done, chunk, sector_off)?;
            done += chunk;
        }
        Ok(done)
    }

    /// Writes `buf` at `offset`, growing the file (and allocating new
    /// sectors, zero-filling any gap) if the write extends past the
    /// current length.
    pub fn write_at<D: BlockDevice, A: SectorAllocator>(
        &self,
        cache: &BufferCache<D>,
        allocator: &A,
        buf: &[u8],
        offset: u32,
    ) -> FsResult<usize> {
        {
            let s = self.state.lock().unwrap();
            if s.deny_write_count > 0 {
                return Err(FsError::Busy);
            }
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(buf.len() as u32)
            .ok_or(FsError::OutOfSpace)?;

        let _extend = self.extend_lock.lock().unwrap();
        let current_length = self.state.lock().unwrap().disk.length;
        if end > current_length {
            self.grow_to(cache, allocator, end)?;
        }

        let disk = self.state.lock().unwrap().disk;
        let mut done = 0;
        while done < buf.len() {
            let cur = offset as usize + done;
            let sector_index = cur / SECTOR_SIZE;
            let sector_off = cur % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - sector_off).min(buf.len() - done);
            let sector = self
                .sector_at(cache, &disk, sector_index)?
                .expect("sector within grown length must already be allocated");
            cache.write(sector, buf, done, chunk, sector_off)?;
            done += chunk;
        }
        flush_inode(cache, self)?;
        Ok(done)
    }

    /// Extends the file to `new_length` if it is currently shorter,
    /// allocating and zero-filling sectors as needed. A no-op if the file
    /// is already at least that long (shrinking is not supported: there is
    /// no truncate operation in this layer).
    pub fn set_length<D: BlockDevice, A: SectorAllocator>(
        &self,
        cache: &BufferCache<D>,
        allocator: &A,
        new_length: u32,
    ) -> FsResult<()> {
        let _extend = self.extend_lock.lock().unwrap();
        if new_length <= self.state.lock().unwrap().disk.length {
            return Ok(());
        }
        self.grow_to(cache, allocator, new_length)
    }

    /// Grows the file to `new_length`, allocating sectors as needed and
    /// zero-filling any sector that lies entirely within the gap between
    /// the old and new length.
    ///
    /// On allocation failure partway through, every sector claimed during
    /// this call is released and the on-disk length is left untouched: the
    /// visible length only advances once the whole extension has
    /// succeeded, so a reader can never observe a length that promises
    /// sectors which were never actually allocated.
    fn grow_to<D: BlockDevice, A: SectorAllocator>(
        &self,
        cache: &BufferCache<D>,
        allocator: &A,
        new_length: u32,
    ) -> FsResult<()> {
        let old_length = self.state.lock().unwrap().disk.length;
        let old_sectors = sectors_spanned(old_length);
        let new_sectors = sectors_spanned(new_length);

        let mut claimed: Vec<u32> = Vec::new();
        let result = (|| -> FsResult<()> {
            for sector_index in old_sectors..new_sectors {
                let mut disk = self.state.lock().unwrap().disk;
                if self.sector_at(cache, &disk, sector_index)?.is_some() {
                    continue;
                }
                let sector = allocator.allocate(1).ok_or(FsError::OutOfSpace)?;
                claimed.push(sector);
                cache.zero_sector(sector)?;
                self.install_sector_with(cache, allocator, &mut disk, sector_index, sector)?;
                self.state.lock().unwrap().disk = disk;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.state.lock().unwrap().disk.length = new_length;
                Ok(())
            }
            Err(e) => {
                // Roll back every sector this call claimed; the inode's
                // on-disk slot tree already points at them, so detach those
                // links too before releasing the numbers back.
                let claimed = guard(claimed, |claimed| {
                    for sector in claimed {
                        allocator.release(sector, 1);
                    }
                });
                let mut disk = self.state.lock().unwrap().disk;
                for sector_index in old_sectors..new_sectors {
                    let _ = self.uninstall_sector(cache, &mut disk, sector_index);
                }
                self.state.lock().unwrap().disk = disk;
                drop(claimed);
                Err(e)
            }
        }
    }

    /// Looks up the sector allocated for `sector_index`, if any.
    fn sector_at<D: BlockDevice>(
        &self,
        cache: &BufferCache<D>,
        disk: &InodeDisk,
        sector_index: usize,
    ) -> FsResult<Option<u32>> {
        match locate(sector_index) {
            SectorLoc::Direct { index } => Ok(nonzero(disk.direct[index])),
            SectorLoc::Indirect { index } => {
                if disk.indirect == 0 {
                    return Ok(None);
                }
                let block = self.read_indirect(cache, disk.indirect)?;
                Ok(nonzero(block.entries[index]))
            }
            SectorLoc::DoubleIndirect { outer, inner } => {
                if disk.double_indirect == 0 {
                    return Ok(None);
                }
                let outer_block = self.read_indirect(cache, disk.double_indirect)?;
                let Some(inner_sector) = nonzero(outer_block.entries[outer]) else {
                    return Ok(None);
                };
                let inner_block = self.read_indirect(cache, inner_sector)?;
                Ok(nonzero(inner_block.entries[inner]))
            }
            SectorLoc::OutOfRange => Err(FsError::OutOfSpace),
        }
    }

    /// Records that `sector` now holds `sector_index`'s data, allocating
    /// any indirect block levels needed along the way.
    fn install_sector_with<D: BlockDevice, A: SectorAllocator>(
        &self,
        cache: &BufferCache<D>,
        allocator: &A,
        disk: &mut InodeDisk,
        sector_index: usize,
        sector: u32,
    ) -> FsResult<()> {
        match locate(sector_index) {
            SectorLoc::Direct { index } => {
                disk.direct[index] = sector;
                Ok(())
            }
            SectorLoc::Indirect { index } => {
                if disk.indirect == 0 {
                    let block_sector = allocator.allocate(1).ok_or(FsError::OutOfSpace)?;
                    cache.zero_sector(block_sector)?;
                    disk.indirect = block_sector;
                }
                let mut block = self.read_indirect(cache, disk.indirect)?;
                block.entries[index] = sector;
                cache.write(disk.indirect, block.as_bytes(), 0, SECTOR_SIZE, 0)?;
                Ok(())
            }
            SectorLoc::DoubleIndirect { outer, inner } => {
                if disk.double_indirect == 0 {
                    let block_sector = allocator.allocate(1).ok_or(FsError::OutOfSpace)?;
                    cache.zero_sector(block_sector)?;
                    disk.double_indirect = block_sector;
                }
                let mut outer_block = self.read_indirect(cache, disk.double_indirect)?;
                if outer_block.entries[outer] == 0 {
                    let inner_sector = allocator.allocate(1).ok_or(FsError::OutOfSpace)?;
                    cache.zero_sector(inner_sector)?;
                    outer_block.entries[outer] = inner_sector;
                    cache.write(disk.double_indirect, outer_block.as_bytes(), 0, SECTOR_SIZE, 0)?;
                }
                let inner_sector = outer_block.entries[outer];
                let mut inner_block = self.read_indirect(cache, inner_sector)?;
                inner_block.entries[inner] = sector;
                cache.write(inner_sector, inner_block.as_bytes(), 0, SECTOR_SIZE, 0)?;
                Ok(())
            }
            SectorLoc::OutOfRange => Err(FsError::OutOfSpace),
        }
    }

    /// Clears whatever slot `sector_index` occupies, without releasing the
    /// indirect blocks themselves (used only for rollback during a failed
    /// grow, where the indirect blocks may still be needed by sectors
    /// installed earlier in the same call).
    fn uninstall_sector<D: BlockDevice>(
        &self,
        cache: &BufferCache<D>,
        disk: &mut InodeDisk,
        sector_index: usize,
    ) -> FsResult<()> {
        match locate(sector_index) {
            SectorLoc::Direct { index } => {
                disk.direct[index] = 0;
                Ok(())
            }
            SectorLoc::Indirect { index } => {
                if disk.indirect != 0 {
                    let mut block = self.read_indirect(cache, disk.indirect)?;
                    block.entries[index] = 0;
                    cache.write(disk.indirect, block.as_bytes(), 0, SECTOR_SIZE, 0)?;
                }
                Ok(())
            }
            SectorLoc::DoubleIndirect { outer, inner } => {
                if disk.double_indirect != 0 {
                    let outer_block = self.read_indirect(cache, disk.double_indirect)?;
                    let inner_sector = outer_block.entries[outer];
                    if inner_sector != 0 {
                        let mut inner_block = self.read_indirect(cache, inner_sector)?;
                        inner_block.entries[inner] = 0;
                        cache.write(inner_sector, inner_block.as_bytes(), 0, SECTOR_SIZE, 0)?;
                    }
                }
                Ok(())
            }
            SectorLoc::OutOfRange => Ok(()),
        }
    }

    fn read_indirect<D: BlockDevice>(&self, cache: &BufferCache<D>, sector: u32) -> FsResult<IndirectBlock> {
        let mut block = IndirectBlock { entries: [0; INDIRECT_COUNT] };
        cache.read(sector, block.as_bytes_mut(), 0, SECTOR_SIZE, 0)?;
        Ok(block)
    }

    /// Releases every data and indirect-block sector owned by this inode.
    /// Each level — direct, indirect, double-indirect — is read from its
    /// own field, so a live double-indirect block can never be skipped by
    /// reading from the wrong field.
    pub fn free_inode_sectors<D: BlockDevice, A: SectorAllocator>(
        &self,
        cache: &BufferCache<D>,
        allocator: &A,
    ) -> FsResult<()> {
        let disk = self.state.lock().unwrap().disk;

        for &sector in disk.direct.iter() {
            if sector != 0 {
                allocator.release(sector, 1);
            }
        }

        if disk.indirect != 0 {
            let block = self.read_indirect(cache, disk.indirect)?;
            for &sector in block.entries.iter() {
                if sector != 0 {
                    allocator.release(sector, 1);
                }
            }
            allocator.release(disk.indirect, 1);
        }

        if disk.double_indirect != 0 {
            let outer_block = self.read_indirect(cache, disk.double_indirect)?;
            for &inner_sector in outer_block.entries.iter() {
                if inner_sector == 0 {
                    continue;
                }
                let inner_block = self.read_indirect(cache, inner_sector)?;
                for &sector in inner_block.entries.iter() {
                    if sector != 0 {
                        allocator.release(sector, 1);
                    }
                }
                allocator.release(inner_sector, 1);
            }
            allocator.release(disk.double_indirect, 1);
        }

        Ok(())
    }
}

fn nonzero(v: u32) -> Option<u32> {
    if v == 0 {
        None
    } else {
        Some(v)
    }
}

fn sectors_spanned(length: u32) -> usize {
    (length as usize).div_ceil(SECTOR_SIZE)
}

/// Allocates a fresh sector and initializes it as an empty inode of the
/// given kind, returning the handle.
pub fn create_inode<D: BlockDevice, A: SectorAllocator>(
    cache: &BufferCache<D>,
    allocator: &A,
    is_dir: bool,
) -> FsResult<Inode> {
    let sector = allocator.allocate(1).ok_or(FsError::OutOfSpace)?;
    init_inode_at(cache, sector, is_dir)
}

/// Initializes a fresh, empty inode at an already-allocated `sector`.
pub(crate) fn init_inode_at<D: BlockDevice>(
    cache: &BufferCache<D>,
    sector: u32,
    is_dir: bool,
) -> FsResult<Inode> {
    let disk = InodeDisk::empty(is_dir);
    cache.write(sector, disk.as_bytes(), 0, SECTOR_SIZE, 0)?;
    Ok(Inode::from_disk(sector, disk))
}

/// Loads the inode stored at `sector` from disk.
pub fn load_inode<D: BlockDevice>(cache: &BufferCache<D>, sector: u32) -> FsResult<Inode> {
    let mut disk = InodeDisk::empty(false);
    cache.read(sector, disk.as_bytes_mut(), 0, SECTOR_SIZE, 0)?;
    if disk.magic != INODE_MAGIC {
        return Err(FsError::Fatal("inode sector failed magic check"));
    }
    Ok(Inode::from_disk(sector, disk))
}

/// Persists an inode's current on-disk fields back to its sector.
pub fn flush_inode<D: BlockDevice>(cache: &BufferCache<D>, inode: &Inode) -> FsResult<()> {
    let disk = inode.state.lock().unwrap().disk;
    cache.write(inode.sector, disk.as_bytes(), 0, SECTOR_SIZE, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::BitmapAllocator;
    use crate::block::MemBlockDevice;

    fn setup(total_sectors: u32) -> (BufferCache<MemBlockDevice>, BitmapAllocator) {
        let cache = BufferCache::with_capacity(MemBlockDevice::new(total_sectors), 16).unwrap();
        let allocator = BitmapAllocator::new(total_sectors, 2);
        (cache, allocator)
    }

    #[test]
    fn write_then_read_small_file() {
        let (cache, allocator) = setup(64);
        let inode = create_inode(&cache, &allocator, false).unwrap();
        let payload = b"hello, inode";
        let n = inode.write_at(&cache, &allocator, payload, 0).unwrap();
        assert_eq!(n, payload.len());
        assert_eq!(inode.len() as usize, payload.len());

        let mut buf = [0u8; 32];
        let n = inode.read_at(&cache, &mut buf, 0).unwrap();
        assert_eq!(&buf[..n], payload);
    }

    #[test]
    fn write_past_eof_zero_fills_gap() {
        let (cache, allocator) = setup(64);
        let inode = create_inode(&cache, &allocator, false).unwrap();
        inode.write_at(&cache, &allocator, b"A", 0).unwrap();
        inode.write_at(&cache, &allocator, b"B", 1000).unwrap();

        let mut buf = [0xffu8; 1001];
        let n = inode.read_at(&cache, &mut buf, 0).unwrap();
        assert_eq!(n, 1001);
        assert_eq!(buf[0], b'A');
        assert_eq!(buf[1000], b'B');
        assert!(buf[1..1000].iter().all(|&b| b == 0));
    }

    #[test]
    fn spans_indirect_block() {
        let (cache, allocator) = setup(4096);
        let inode = create_inode(&cache, &allocator, false).unwrap();
        let offset = (DIRECT_COUNT as u32 + 1) * SECTOR_SIZE as u32;
        inode.write_at(&cache, &allocator, b"indirect", offset).unwrap();
        let mut buf = [0u8; 8];
        inode.read_at(&cache, &mut buf, offset).unwrap();
        assert_eq!(&buf, b"indirect");
    }

    #[test]
    fn out_of_space_leaves_length_unchanged() {
        let (cache, allocator) = setup(6); // tiny: 2 reserved, 4 free
        let inode = create_inode(&cache, &allocator, false).unwrap();
        let big = vec![1u8; SECTOR_SIZE * 10];
        let err = inode.write_at(&cache, &allocator, &big, 0).unwrap_err();
        assert_eq!(err, FsError::OutOfSpace);
        assert_eq!(inode.len(), 0);
    }

    #[test]
    fn deny_write_blocks_write_at() {
        let (cache, allocator) = setup(64);
        let inode = create_inode(&cache, &allocator, false).unwrap();
        inode.deny_write();
        let err = inode.write_at(&cache, &allocator, b"x", 0).unwrap_err();
        assert_eq!(err, FsError::Busy);
        inode.allow_write();
        inode.write_at(&cache, &allocator, b"x", 0).unwrap();
    }

    #[test]
    fn free_inode_sectors_returns_all_levels() {
        let (cache, allocator) = setup(4096);
        let inode = create_inode(&cache, &allocator, false).unwrap();
        let offset = (DIRECT_COUNT as u32 + INDIRECT_COUNT as u32 + 1) * SECTOR_SIZE as u32;
        inode.write_at(&cache, &allocator, b"x", offset).unwrap();
        let before_free = allocator.free_count();
        inode.free_inode_sectors(&cache, &allocator).unwrap();
        assert!(allocator.free_count() > before_free);
    }
}

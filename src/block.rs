//! The block device interface. External collaborator: the core never ships
//! a real driver, only the trait the buffer cache is written against, plus
//! an in-memory stand-in useful for tests and for embedders without a real
//! disk yet.

use crate::error::{FsError, FsResult};
use crate::param::SECTOR_SIZE;
use std::sync::Mutex;

/// One on-disk sector's worth of bytes.
pub type SectorData = [u8; SECTOR_SIZE];

/// A fixed-size-sector block device.
///
/// Implementations must be safe to call from multiple threads concurrently;
/// the buffer cache is the only thing that serializes access to a given
/// sector, not this trait. Both methods block the calling thread until the
/// I/O completes.
pub trait BlockDevice: Send + Sync {
    /// Reads sector `sector` in full into `buf`.
    fn read(&self, sector: u32, buf: &mut SectorData) -> FsResult<()>;

    /// Writes `buf` in full to sector `sector`.
    fn write(&self, sector: u32, buf: &SectorData) -> FsResult<()>;

    /// Total number of addressable sectors, if known. Used only for
    /// diagnostics/bounds-checking by default allocators; the core itself
    /// never needs it.
    fn sector_count(&self) -> Option<u32> {
        None
    }
}

/// An in-memory block device backed by a `Vec` of sectors, useful for
/// tests and for embedders without a real disk yet.
pub struct MemBlockDevice {
    sectors: Mutex<Vec<SectorData>>,
}

impl MemBlockDevice {
    /// Creates a zero-filled device with `count` sectors.
    pub fn new(count: u32) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECTOR_SIZE]; count as usize]),
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn read(&self, sector: u32, buf: &mut SectorData) -> FsResult<()> {
        let sectors = self.sectors.lock().unwrap();
        let src = sectors
            .get(sector as usize)
            .ok_or(FsError::Fatal("read of out-of-range sector"))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&self, sector: u32, buf: &SectorData) -> FsResult<()> {
        let mut sectors = self.sectors.lock().unwrap();
        let dst = sectors
            .get_mut(sector as usize)
            .ok_or(FsError::Fatal("write of out-of-range sector"))?;
        dst.copy_from_slice(buf);
        Ok(())
    }

    fn sector_count(&self) -> Option<u32> {
        Some(self.sectors.lock().unwrap().len() as u32)
    }
}

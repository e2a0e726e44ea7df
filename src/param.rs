//! Compile-time tunables: every magic number the rest of the crate depends
//! on lives here, not scattered as literals.

use static_assertions::const_assert_eq;

cfg_if::cfg_if! {
    if #[cfg(feature = "small-sectors")] {
        /// Sector size in bytes. Shrunk under `small-sectors` so unit tests
        /// can reach indirect and double-indirect growth without allocating
        /// thousands of sectors.
        pub const SECTOR_SIZE: usize = 64;
    } else {
        /// Sector size in bytes.
        pub const SECTOR_SIZE: usize = 512;
    }
}

/// Bytes used by a single on-disk sector number.
pub const SECTOR_NUMBER_SIZE: usize = core::mem::size_of::<u32>();

/// Number of direct sector numbers stored inline in the inode record.
///
/// Chosen so that `InodeDisk` (direct table + indirect + double_indirect +
/// length + magic + is_dir) totals exactly `SECTOR_SIZE` bytes.
pub const DIRECT_COUNT: usize =
    SECTOR_SIZE / SECTOR_NUMBER_SIZE - 5 /* indirect, double_indirect, length, magic, is_dir */;

/// Number of sector numbers held in one single-level index sector.
pub const INDIRECT_COUNT: usize = SECTOR_SIZE / SECTOR_NUMBER_SIZE;

/// Maximum file size in sectors: direct + single-indirect + double-indirect.
pub const MAX_FILE_SECTORS: usize =
    DIRECT_COUNT + INDIRECT_COUNT + INDIRECT_COUNT * INDIRECT_COUNT;

/// Maximum filename length.
pub const MAX_NAME: usize = 14;

/// Fixed capacity of the buffer cache, in number of entries.
pub const CACHE_CAPACITY: usize = 64;

/// Sector 0 is reserved; 0 always means "not allocated".
pub const NULL_SECTOR: u32 = 0;

/// Compile-time-fixed sector of the root directory inode.
pub const ROOT_DIR_SECTOR: u32 = 1;

/// Sanity-check constant stored in every on-disk inode.
pub const INODE_MAGIC: u32 = 0x424c_4b46; // "BLKF"

#[cfg(not(feature = "small-sectors"))]
const_assert_eq!(DIRECT_COUNT, 123);
#[cfg(not(feature = "small-sectors"))]
const_assert_eq!(INDIRECT_COUNT, 128);

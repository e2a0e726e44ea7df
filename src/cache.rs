//! The write-back buffer cache.
//!
//! A fixed table of entries, each behind its own lock, with a clock hand
//! swept to pick a victim on a miss.
//!
//! A free slot is `sector: None`; there is no signed sentinel value that
//! could alias against a real sector number.

use bitflags::bitflags;

use crate::block::{BlockDevice, SectorData};
use crate::error::{FsError, FsResult};
use crate::lock::Spinlock;
use crate::param::{CACHE_CAPACITY, SECTOR_SIZE};
use std::sync::Mutex;

bitflags! {
    /// Per-entry state bits. Packed into one byte rather than three separate
    /// `bool`s.
    struct EntryFlags: u8 {
        /// Entry holds a full copy of its sector's current contents.
        const VALID = 0b001;
        /// Entry's contents are newer than the disk at `sector`.
        const DIRTY = 0b010;
        /// Clock (second-chance) reference bit.
        const CLOCK = 0b100;
    }
}

struct EntryData {
    flags: EntryFlags,
    sector: Option<u32>,
    data: Box<SectorData>,
}

impl EntryData {
    fn empty() -> Self {
        Self {
            flags: EntryFlags::empty(),
            sector: None,
            data: Box::new([0u8; SECTOR_SIZE]),
        }
    }
}

/// A fixed-capacity, write-back cache of disk sectors, evicted via a clock
/// (second-chance) policy.
///
/// # Invariant
///
/// At most one entry references a given sector at any time. This is upheld
/// by serializing "find a matching entry, or claim a victim for this
/// sector" as one critical region under `claim`, released before the disk
/// read that fills a freshly claimed entry.
pub struct BufferCache<D: BlockDevice> {
    device: D,
    entries: Vec<Spinlock<EntryData>>,
    /// Cache-wide mutex protecting lookup-plus-victim-claim, and doubling as
    /// storage for the clock hand.
    claim: Mutex<usize>,
}

impl<D: BlockDevice> BufferCache<D> {
    /// Creates a cache with the default capacity (`CACHE_CAPACITY`).
    pub fn new(device: D) -> FsResult<Self> {
        Self::with_capacity(device, CACHE_CAPACITY)
    }

    /// Creates a cache with `capacity` entries.
    pub fn with_capacity(device: D, capacity: usize) -> FsResult<Self> {
        if capacity == 0 {
            return Err(FsError::Fatal("buffer cache must have nonzero capacity"));
        }
        let entries = (0..capacity)
            .map(|_| Spinlock::new("buffer_cache_entry", EntryData::empty()))
            .collect();
        Ok(Self {
            device,
            entries,
            claim: Mutex::new(0),
        })
    }

    /// Number of entries in the cache.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Returns the index of the entry currently holding `sector`, if any.
    ///
    /// Matches purely on the sector field: an entry reserved for `sector`
    /// but not yet filled from disk still counts, so a second concurrent
    /// miss on the same sector joins the in-flight load instead of claiming
    /// a second entry for it.
    pub fn lookup(&self, sector: u32) -> Option<usize> {
        let _claim = self.claim.lock().unwrap();
        self.lookup_locked(sector)
    }

    fn lookup_locked(&self, sector: u32) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.lock().sector == Some(sector))
    }

    /// Finds or loads the entry for `sector`, returning its index.
    ///
    /// The victim's own lock is taken while the cache-wide mutex is still
    /// held, and kept across the disk read after the cache-wide mutex is
    /// released: a concurrent caller that joins an in-flight load via
    /// `lookup_locked` then blocks on that same per-entry lock, so it can
    /// never observe the entry before `VALID` is set. Releasing the
    /// per-entry lock first (the bug this guards against) would let a
    /// joiner see a reserved-but-still-empty buffer as ready.
    fn get_or_load(&self, sector: u32) -> FsResult<usize> {
        let mut hand = self.claim.lock().unwrap();

        if let Some(found) = self.lookup_locked(sector) {
            drop(hand);
            let mut entry = self.entries[found].lock();
            entry.flags.insert(EntryFlags::CLOCK);
            return Ok(found);
        }

        let victim = self.select_victim_locked(&mut hand)?;
        let mut entry = self.entries[victim].lock();
        entry.sector = Some(sector);
        entry.flags.remove(EntryFlags::VALID);
        drop(hand);

        self.device.read(sector, &mut entry.data)?;
        entry.flags.remove(EntryFlags::DIRTY);
        entry.flags.insert(EntryFlags::VALID | EntryFlags::CLOCK);
        drop(entry);

        Ok(victim)
    }

    /// Runs the clock algorithm to pick a free entry, flushing it first if
    /// dirty. Must be called while holding `claim`.
    fn select_victim_locked(&self, hand: &mut usize) -> FsResult<usize> {
        let n = self.entries.len();
        loop {
            let idx = *hand;
            *hand = (*hand + 1) % n;

            let mut entry = self.entries[idx].lock();
            if entry.flags.contains(EntryFlags::CLOCK) {
                entry.flags.remove(EntryFlags::CLOCK);
                continue;
            }
            entry.flags.insert(EntryFlags::CLOCK);
            let dirty = entry.flags.contains(EntryFlags::DIRTY);
            drop(entry);

            if dirty {
                self.flush_entry(idx)?;
            }

            let mut entry = self.entries[idx].lock();
            entry.flags.remove(EntryFlags::VALID | EntryFlags::DIRTY);
            entry.sector = None;
            return Ok(idx);
        }
    }

    /// Fills `dst[dst_off..dst_off+n)` with `n` bytes from `sector` starting
    /// at `sec_off` within the sector.
    pub fn read(&self, sector: u32, dst: &mut [u8], dst_off: usize, n: usize, sec_off: usize) -> FsResult<()> {
        assert!(sec_off + n <= SECTOR_SIZE, "read past end of sector");
        let idx = self.get_or_load(sector)?;
        let entry = self.entries[idx].lock();
        dst[dst_off..dst_off + n].copy_from_slice(&entry.data[sec_off..sec_off + n]);
        Ok(())
    }

    /// Copies `n` bytes from `src[src_off..src_off+n)` into `sector` at
    /// `sec_off`, marking the entry dirty.
    pub fn write(&self, sector: u32, src: &[u8], src_off: usize, n: usize, sec_off: usize) -> FsResult<()> {
        assert!(sec_off + n <= SECTOR_SIZE, "write past end of sector");
        let idx = self.get_or_load(sector)?;
        let mut entry = self.entries[idx].lock();
        entry.data[sec_off..sec_off + n].copy_from_slice(&src[src_off..src_off + n]);
        entry.flags.insert(EntryFlags::DIRTY);
        Ok(())
    }

    /// Zeroes an entire sector through the cache, leaving it dirty.
    pub fn zero_sector(&self, sector: u32) -> FsResult<()> {
        let idx = self.get_or_load(sector)?;
        let mut entry = self.entries[idx].lock();
        entry.data.fill(0);
        entry.flags.insert(EntryFlags::DIRTY);
        Ok(())
    }

    fn flush_entry(&self, idx: usize) -> FsResult<()> {
        let mut entry = self.entries[idx].lock();
        if let Some(sector) = entry.sector {
            self.device.write(sector, &entry.data)?;
            log::trace!("cache: flushed sector {sector} from entry {idx}");
        }
        entry.flags.remove(EntryFlags::DIRTY);
        Ok(())
    }

    /// Writes every dirty entry back to disk.
    pub fn flush_all(&self) -> FsResult<()> {
        for idx in 0..self.entries.len() {
            let dirty = self.entries[idx].lock().flags.contains(EntryFlags::DIRTY);
            if dirty {
                self.flush_entry(idx)?;
            }
        }
        Ok(())
    }

    /// Flushes all dirty entries. Call before dropping the cache at
    /// filesystem shutdown.
    pub fn term(&self) -> FsResult<()> {
        self.flush_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;

    fn cache(capacity: usize, sectors: u32) -> BufferCache<MemBlockDevice> {
        BufferCache::with_capacity(MemBlockDevice::new(sectors), capacity).unwrap()
    }

    #[test]
    fn read_after_write_round_trips() {
        let c = cache(4, 8);
        let payload = [7u8; SECTOR_SIZE];
        c.write(2, &payload, 0, SECTOR_SIZE, 0).unwrap();
        let mut out = [0u8; SECTOR_SIZE];
        c.read(2, &mut out, 0, SECTOR_SIZE, 0).unwrap();
        assert_eq!(&out[..], &payload[..]);
    }

    #[test]
    fn at_most_one_entry_per_sector() {
        let c = cache(2, 8);
        c.read(1, &mut [0u8; SECTOR_SIZE], 0, SECTOR_SIZE, 0).unwrap();
        let idx_a = c.lookup(1).unwrap();
        c.read(1, &mut [0u8; SECTOR_SIZE], 0, SECTOR_SIZE, 0).unwrap();
        let idx_b = c.lookup(1).unwrap();
        assert_eq!(idx_a, idx_b);
    }

    #[test]
    fn eviction_flushes_dirty_entries() {
        let c = cache(1, 8);
        c.write(1, &[9u8; SECTOR_SIZE], 0, SECTOR_SIZE, 0).unwrap();
        // Only one entry; reading a different sector forces eviction of #1.
        c.read(2, &mut [0u8; SECTOR_SIZE], 0, SECTOR_SIZE, 0).unwrap();
        let mut back = [0u8; SECTOR_SIZE];
        c.read(1, &mut back, 0, SECTOR_SIZE, 0).unwrap();
        assert_eq!(back, [9u8; SECTOR_SIZE]);
    }

    #[test]
    fn partial_sector_offsets() {
        let c = cache(2, 4);
        c.write(0, b"hello", 0, 5, 10).unwrap();
        let mut out = [0u8; 5];
        c.read(0, &mut out, 0, 5, 10).unwrap();
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn flush_all_clears_dirty_bits() {
        let c = cache(2, 4);
        c.write(0, &[1u8; SECTOR_SIZE], 0, SECTOR_SIZE, 0).unwrap();
        c.flush_all().unwrap();
        let idx = c.lookup(0).unwrap();
        assert!(!c.entries[idx].lock().flags.contains(EntryFlags::DIRTY));
    }
}

//! The filesystem façade: the one entry point embedders actually call.
//! Ties the buffer cache, allocator, open-inode table, directory ops, and
//! path resolver together behind `create`/`open`/`remove`/`mkdir`/`chdir`
//! and an `OpenFile` handle, serialized by one coarse namespace lock.

use std::io::SeekFrom;
use std::sync::{Arc, Mutex};

use crate::alloc::SectorAllocator;
use crate::block::BlockDevice;
use crate::cache::BufferCache;
use crate::dir;
use crate::error::{FsError, FsResult};
use crate::inode::{self, Inode};
use crate::param::ROOT_DIR_SECTOR;
use crate::path::ParsedPath;
use crate::stat::{FileType, Stat};

struct FsCore<D: BlockDevice, A: SectorAllocator> {
    cache: BufferCache<D>,
    allocator: A,
    itable: crate::itable::InodeTable,
    namespace_lock: Mutex<()>,
    root_sector: u32,
}

/// A caller's current working directory. Deliberately just a bare sector
/// number rather than a pinned open handle: this crate tracks no process
/// table, so nothing stops a concurrent `remove` from unlinking a
/// directory that is somebody's cwd (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cwd {
    sector: u32,
}

impl Cwd {
    pub fn sector(&self) -> u32 {
        self.sector
    }
}

/// The filesystem core, generic over the block device and allocator it was
/// built with. Cheaply `Clone`: every clone shares the same cache,
/// allocator, and open-inode table.
pub struct FileSystem<D: BlockDevice, A: SectorAllocator> {
    core: Arc<FsCore<D, A>>,
}

impl<D: BlockDevice, A: SectorAllocator> Clone for FileSystem<D, A> {
    fn clone(&self) -> Self {
        Self { core: Arc::clone(&self.core) }
    }
}

impl<D: BlockDevice, A: SectorAllocator> FileSystem<D, A> {
    /// Formats a fresh filesystem image on `device` using `allocator`,
    /// creating an empty root directory at the fixed root sector. There is
    /// no separate "mount an existing image" path in this crate: recovering
    /// an existing image across a restart would need a superblock, which
    /// this crate does not implement (see DESIGN.md).
    pub fn format(device: D, allocator: A) -> FsResult<Self> {
        let cache = BufferCache::new(device)?;
        let itable = crate::itable::InodeTable::new();

        let root_sector = Self::reserve_root_sector(&allocator)?;
        let root_inode = inode::init_inode_at(&cache, root_sector, true)?;
        dir::init_dir(&cache, &allocator, &root_inode, root_sector)?;
        inode::flush_inode(&cache, &root_inode)?;
        let root_handle = itable.track_new(root_inode);
        itable.close(&cache, &allocator, root_handle)?;

        log::debug!("formatted filesystem, root at sector {root_sector}");
        Ok(Self {
            core: Arc::new(FsCore {
                cache,
                allocator,
                itable,
                namespace_lock: Mutex::new(()),
                root_sector,
            }),
        })
    }

    /// A `Cwd` pointing at the root directory.
    pub fn root(&self) -> Cwd {
        Cwd { sector: self.core.root_sector }
    }

    /// Drains allocator-returned sectors until the fixed root sector is
    /// reached, so the root inode lands at `ROOT_DIR_SECTOR` regardless of
    /// how many sectors the allocator's own construction reserved up front.
    fn reserve_root_sector(allocator: &A) -> FsResult<u32> {
        loop {
            let sector = allocator.allocate(1).ok_or(FsError::OutOfSpace)?;
            if sector == ROOT_DIR_SECTOR {
                return Ok(sector);
            }
            if sector > ROOT_DIR_SECTOR {
                return Err(FsError::Fatal("allocator skipped past the fixed root sector"));
            }
        }
    }

    fn close(&self, inode: Arc<Inode>) -> FsResult<()> {
        self.core.itable.close(&self.core.cache, &self.core.allocator, inode)
    }

    fn start_sector(&self, cwd: &Cwd, parsed: &ParsedPath) -> u32 {
        if parsed.absolute {
            self.core.root_sector
        } else {
            cwd.sector
        }
    }

    /// Walks `components` starting from `start_sector`, opening and closing
    /// each intermediate directory in turn, and returns the final inode.
    fn resolve(&self, start_sector: u32, components: &[String]) -> FsResult<Arc<Inode>> {
        let mut current = self.core.itable.open(&self.core.cache, start_sector)?;
        for name in components {
            if !current.is_dir() {
                self.close(current)?;
                return Err(FsError::NotADirectory);
            }
            if current.is_removed() {
                self.close(current)?;
                return Err(FsError::RemovedParent);
            }
            let next_sector = match dir::lookup(&self.core.cache, &current, name) {
                Ok(Some(sector)) => sector,
                Ok(None) => {
                    self.close(current)?;
                    return Err(FsError::NotFound);
                }
                Err(e) => {
                    self.close(current)?;
                    return Err(e);
                }
            };
            let next = match self.core.itable.open(&self.core.cache, next_sector) {
                Ok(n) => n,
                Err(e) => {
                    self.close(current)?;
                    return Err(e);
                }
            };
            self.close(current)?;
            current = next;
        }
        Ok(current)
    }

    /// Creates a regular file of `size` bytes (zero-filled) at `path`.
    pub fn create(&self, cwd: &Cwd, path: &str, size: u32) -> FsResult<()> {
        let parsed = ParsedPath::parse(path)?;
        let leaf = parsed.leaf().ok_or(FsError::Exists)?.to_string();
        let start = self.start_sector(cwd, &parsed);

        let _guard = self.core.namespace_lock.lock().unwrap();
        let parent = self.resolve(start, parsed.parent_components())?;
        let result = (|| -> FsResult<()> {
            if !parent.is_dir() {
                return Err(FsError::NotADirectory);
            }
            if parent.is_removed() {
                return Err(FsError::RemovedParent);
            }
            let new_inode = inode::create_inode(&self.core.cache, &self.core.allocator, false)?;
            if size > 0 {
                if let Err(e) = new_inode.set_length(&self.core.cache, &self.core.allocator, size) {
                    self.core.allocator.release(new_inode.sector, 1);
                    return Err(e);
                }
            }
            inode::flush_inode(&self.core.cache, &new_inode)?;
            if let Err(e) = dir::add(&self.core.cache, &self.core.allocator, &parent, &leaf, new_inode.sector) {
                let _ = new_inode.free_inode_sectors(&self.core.cache, &self.core.allocator);
                self.core.allocator.release(new_inode.sector, 1);
                return Err(e);
            }
            Ok(())
        })();
        self.close(parent)?;
        result
    }

    /// Creates a directory at `path`, pre-populated with `.` and `..`.
    pub fn mkdir(&self, cwd: &Cwd, path: &str) -> FsResult<()> {
        let parsed = ParsedPath::parse(path)?;
        let leaf = parsed.leaf().ok_or(FsError::Exists)?.to_string();
        let start = self.start_sector(cwd, &parsed);

        let _guard = self.core.namespace_lock.lock().unwrap();
        let parent = self.resolve(start, parsed.parent_components())?;
        let result = (|| -> FsResult<()> {
            if !parent.is_dir() {
                return Err(FsError::NotADirectory);
            }
            if parent.is_removed() {
                return Err(FsError::RemovedParent);
            }
            let new_dir = inode::create_inode(&self.core.cache, &self.core.allocator, true)?;
            dir::init_dir(&self.core.cache, &self.core.allocator, &new_dir, parent.sector)?;
            inode::flush_inode(&self.core.cache, &new_dir)?;
            if let Err(e) = dir::add(&self.core.cache, &self.core.allocator, &parent, &leaf, new_dir.sector) {
                let _ = new_dir.free_inode_sectors(&self.core.cache, &self.core.allocator);
                self.core.allocator.release(new_dir.sector, 1);
                return Err(e);
            }
            Ok(())
        })();
        self.close(parent)?;
        result
    }

    /// Opens `path`, returning a handle for reading/writing/iterating it.
    pub fn open(&self, cwd: &Cwd, path: &str) -> FsResult<OpenFile<D, A>> {
        let parsed = ParsedPath::parse(path)?;
        let start = self.start_sector(cwd, &parsed);
        let inode = self.resolve(start, &parsed.components)?;
        Ok(OpenFile {
            core: Arc::clone(&self.core),
            inode,
            position: 0,
            readdir_cursor: 0,
        })
    }

    /// Unlinks `path`. A directory may only be removed while empty
    /// (besides `.`/`..`); the inode itself is freed once its last open
    /// handle closes.
    pub fn remove(&self, cwd: &Cwd, path: &str) -> FsResult<()> {
        let parsed = ParsedPath::parse(path)?;
        let leaf = parsed.leaf().ok_or(FsError::NotFound)?.to_string();
        if leaf == "." || leaf == ".." {
            return Err(FsError::InvalidName);
        }
        let start = self.start_sector(cwd, &parsed);

        let _guard = self.core.namespace_lock.lock().unwrap();
        let parent = self.resolve(start, parsed.parent_components())?;
        let result = (|| -> FsResult<()> {
            let target_sector = dir::lookup(&self.core.cache, &parent, &leaf)?.ok_or(FsError::NotFound)?;
            let target = self.core.itable.open(&self.core.cache, target_sector)?;
            if target.is_dir() && !dir::is_empty(&self.core.cache, &target)? {
                self.close(target)?;
                return Err(FsError::NotEmpty);
            }
            dir::remove(&self.core.cache, &self.core.allocator, &parent, &leaf)?;
            target.mark_removed();
            self.close(target)?;
            Ok(())
        })();
        self.close(parent)?;
        result
    }

    /// Resolves `path` and, if it names a directory, updates `cwd` to it.
    pub fn chdir(&self, cwd: &mut Cwd, path: &str) -> FsResult<()> {
        let parsed = ParsedPath::parse(path)?;
        let start = self.start_sector(cwd, &parsed);
        let target = self.resolve(start, &parsed.components)?;
        if !target.is_dir() {
            self.close(target)?;
            return Err(FsError::NotADirectory);
        }
        cwd.sector = target.sector;
        self.close(target)
    }

    /// Flushes every dirty buffer cache entry to the underlying device.
    pub fn sync(&self) -> FsResult<()> {
        self.core.cache.flush_all()
    }
}

/// An open file or directory handle, positioned independently of any other
/// handle on the same inode.
pub struct OpenFile<D: BlockDevice, A: SectorAllocator> {
    core: Arc<FsCore<D, A>>,
    inode: Arc<Inode>,
    position: u64,
    readdir_cursor: usize,
}

impl<D: BlockDevice, A: SectorAllocator> OpenFile<D, A> {
    /// Reads into `buf` starting at the current position, advancing it by
    /// the number of bytes actually read.
    pub fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let n = self.inode.read_at(&self.core.cache, buf, self.position as u32)?;
        self.position += n as u64;
        Ok(n)
    }

    /// Writes `buf` at the current position, growing the file if needed,
    /// and advances the position by the number of bytes written.
    pub fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        let n = self.inode.write_at(&self.core.cache, &self.core.allocator, buf, self.position as u32)?;
        self.position += n as u64;
        Ok(n)
    }

    /// Repositions the handle, clamped to never go negative.
    pub fn seek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(delta) => self.position as i64 + delta,
            SeekFrom::End(delta) => self.inode.len() as i64 + delta,
        }
        .max(0) as u64;
        self.position = new_pos;
        Ok(new_pos)
    }

    /// The current position.
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// `true` if this handle was opened on a directory.
    pub fn isdir(&self) -> bool {
        self.inode.is_dir()
    }

    /// The sector backing this handle's inode, usable as a stable id.
    pub fn inumber(&self) -> u32 {
        self.inode.sector
    }

    /// A snapshot of this handle's inode metadata.
    pub fn stat(&self) -> Stat {
        Stat {
            inode_sector: self.inode.sector,
            file_type: if self.inode.is_dir() { FileType::Directory } else { FileType::Regular },
            size: self.inode.len(),
        }
    }

    /// Returns the next directory entry name, or `None` once exhausted.
    /// Only meaningful when [`isdir`](Self::isdir) is `true`.
    pub fn readdir(&mut self) -> FsResult<Option<String>> {
        let listing = dir::read_dir(&self.core.cache, &self.inode)?;
        let entry = listing.into_iter().nth(self.readdir_cursor);
        self.readdir_cursor += 1;
        Ok(entry.map(|e| e.name))
    }

    /// Temporarily prevents writes to this inode, e.g. while it backs a
    /// running executable.
    pub fn deny_write(&self) {
        self.inode.deny_write();
    }

    /// Reverses a prior [`deny_write`](Self::deny_write).
    pub fn allow_write(&self) {
        self.inode.allow_write();
    }
}

impl<D: BlockDevice, A: SectorAllocator> Drop for OpenFile<D, A> {
    fn drop(&mut self) {
        let inode = Arc::clone(&self.inode);
        if let Err(e) = self.core.itable.close(&self.core.cache, &self.core.allocator, inode) {
            log::debug!("error closing inode {} on drop: {e}", self.inode.sector);
        }
    }
}

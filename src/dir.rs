//! Directory entries. A directory is an ordinary file (an [`Inode`] with
//! its `is_dir` flag set) whose bytes are a dense array of fixed-size
//! entry records; this module only knows how to read and rewrite those
//! records through the inode's own `read_at`/`write_at`, via a linear scan
//! of the directory's contents. Name staging uses `arrayvec::ArrayVec` for
//! a small fixed-capacity buffer without heap allocation.

use arrayvec::ArrayVec;
use zerocopy::{AsBytes, FromBytes};

use crate::alloc::SectorAllocator;
use crate::block::BlockDevice;
use crate::cache::BufferCache;
use crate::error::{FsError, FsResult};
use crate::inode::Inode;
use crate::param::MAX_NAME;

/// One fixed-size directory record.
#[derive(Clone, Copy, AsBytes, FromBytes)]
#[repr(C)]
struct DirEntry {
    in_use: u32,
    name: [u8; MAX_NAME],
    inode_sector: u32,
}

const ENTRY_SIZE: usize = core::mem::size_of::<DirEntry>();

impl DirEntry {
    fn free() -> Self {
        Self {
            in_use: 0,
            name: [0; MAX_NAME],
            inode_sector: 0,
        }
    }

    fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}

fn staged_name(name: &str) -> FsResult<[u8; MAX_NAME]> {
    if name.is_empty() || name.len() > MAX_NAME {
        return Err(FsError::NameTooLong);
    }
    let mut staged: ArrayVec<u8, MAX_NAME> = ArrayVec::new();
    staged.try_extend_from_slice(name.as_bytes()).map_err(|_| FsError::NameTooLong)?;
    while staged.len() < MAX_NAME {
        staged.push(0);
    }
    let mut out = [0u8; MAX_NAME];
    out.copy_from_slice(&staged);
    Ok(out)
}

fn entry_count(dir: &Inode) -> usize {
    dir.len() as usize / ENTRY_SIZE
}

fn read_entry<D: BlockDevice>(cache: &BufferCache<D>, dir: &Inode, index: usize) -> FsResult<DirEntry> {
    let mut entry = DirEntry::free();
    let n = dir.read_at(cache, entry.as_bytes_mut(), (index * ENTRY_SIZE) as u32)?;
    if n < ENTRY_SIZE {
        return Ok(DirEntry::free());
    }
    Ok(entry)
}

fn write_entry<D: BlockDevice, A: SectorAllocator>(
    cache: &BufferCache<D>,
    allocator: &A,
    dir: &Inode,
    index: usize,
    entry: &DirEntry,
) -> FsResult<()> {
    dir.write_at(cache, allocator, entry.as_bytes(), (index * ENTRY_SIZE) as u32)?;
    Ok(())
}

/// Looks up `name` in `dir`, returning its inode sector if present.
pub fn lookup<D: BlockDevice>(cache: &BufferCache<D>, dir: &Inode, name: &str) -> FsResult<Option<u32>> {
    Ok(find_slot(cache, dir, name)?.map(|(_, entry)| entry.inode_sector))
}

fn find_slot<D: BlockDevice>(cache: &BufferCache<D>, dir: &Inode, name: &str) -> FsResult<Option<(usize, DirEntry)>> {
    for idx in 0..entry_count(dir) {
        let entry = read_entry(cache, dir, idx)?;
        if entry.in_use != 0 && entry.name_str() == name {
            return Ok(Some((idx, entry)));
        }
    }
    Ok(None)
}

/// Adds a `name -> inode_sector` entry to `dir`. Fails with
/// [`FsError::Exists`] if `name` is already present.
pub fn add<D: BlockDevice, A: SectorAllocator>(
    cache: &BufferCache<D>,
    allocator: &A,
    dir: &Inode,
    name: &str,
    inode_sector: u32,
) -> FsResult<()> {
    let staged = staged_name(name)?;
    if find_slot(cache, dir, name)?.is_some() {
        return Err(FsError::Exists);
    }

    let count = entry_count(dir);
    for idx in 0..count {
        let entry = read_entry(cache, dir, idx)?;
        if entry.in_use == 0 {
            let new_entry = DirEntry {
                in_use: 1,
                name: staged,
                inode_sector,
            };
            return write_entry(cache, allocator, dir, idx, &new_entry);
        }
    }

    let new_entry = DirEntry {
        in_use: 1,
        name: staged,
        inode_sector,
    };
    write_entry(cache, allocator, dir, count, &new_entry)
}

/// Removes `name` from `dir`. Fails with [`FsError::NotFound`] if absent.
pub fn remove<D: BlockDevice, A: SectorAllocator>(
    cache: &BufferCache<D>,
    allocator: &A,
    dir: &Inode,
    name: &str,
) -> FsResult<()> {
    if name == "." || name == ".." {
        return Err(FsError::InvalidName);
    }
    let (idx, _) = find_slot(cache, dir, name)?.ok_or(FsError::NotFound)?;
    write_entry(cache, allocator, dir, idx, &DirEntry::free())
}

/// Returns `true` if `dir` has no entries besides `.` and `..`.
pub fn is_empty<D: BlockDevice>(cache: &BufferCache<D>, dir: &Inode) -> FsResult<bool> {
    for idx in 0..entry_count(dir) {
        let entry = read_entry(cache, dir, idx)?;
        if entry.in_use != 0 && entry.name_str() != "." && entry.name_str() != ".." {
            return Ok(false);
        }
    }
    Ok(true)
}

/// One directory entry as seen by a caller walking the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListing {
    pub name: String,
    pub inode_sector: u32,
}

/// Lists every in-use entry in `dir`, `.` and `..` included.
pub fn read_dir<D: BlockDevice>(cache: &BufferCache<D>, dir: &Inode) -> FsResult<Vec<DirListing>> {
    let mut out = Vec::new();
    for idx in 0..entry_count(dir) {
        let entry = read_entry(cache, dir, idx)?;
        if entry.in_use != 0 {
            out.push(DirListing {
                name: entry.name_str().to_string(),
                inode_sector: entry.inode_sector,
            });
        }
    }
    Ok(out)
}

/// Installs the `.` and `..` entries a freshly created directory needs,
/// pointing at itself and at `parent_sector` respectively.
pub fn init_dir<D: BlockDevice, A: SectorAllocator>(
    cache: &BufferCache<D>,
    allocator: &A,
    dir: &Inode,
    parent_sector: u32,
) -> FsResult<()> {
    add(cache, allocator, dir, ".", dir.sector)?;
    add(cache, allocator, dir, "..", parent_sector)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::BitmapAllocator;
    use crate::block::MemBlockDevice;
    use crate::cache::BufferCache;
    use crate::inode::create_inode;

    fn setup() -> (BufferCache<MemBlockDevice>, BitmapAllocator) {
        (
            BufferCache::with_capacity(MemBlockDevice::new(64), 16).unwrap(),
            BitmapAllocator::new(64, 2),
        )
    }

    #[test]
    fn add_then_lookup() {
        let (cache, allocator) = setup();
        let dir = create_inode(&cache, &allocator, true).unwrap();
        let file = create_inode(&cache, &allocator, false).unwrap();
        add(&cache, &allocator, &dir, "a.txt", file.sector).unwrap();
        assert_eq!(lookup(&cache, &dir, "a.txt").unwrap(), Some(file.sector));
        assert_eq!(lookup(&cache, &dir, "missing").unwrap(), None);
    }

    #[test]
    fn add_duplicate_fails() {
        let (cache, allocator) = setup();
        let dir = create_inode(&cache, &allocator, true).unwrap();
        let file = create_inode(&cache, &allocator, false).unwrap();
        add(&cache, &allocator, &dir, "a.txt", file.sector).unwrap();
        let err = add(&cache, &allocator, &dir, "a.txt", file.sector).unwrap_err();
        assert_eq!(err, FsError::Exists);
    }

    #[test]
    fn remove_then_reuses_slot() {
        let (cache, allocator) = setup();
        let dir = create_inode(&cache, &allocator, true).unwrap();
        let a = create_inode(&cache, &allocator, false).unwrap();
        let b = create_inode(&cache, &allocator, false).unwrap();
        add(&cache, &allocator, &dir, "a", a.sector).unwrap();
        remove(&cache, &allocator, &dir, "a").unwrap();
        add(&cache, &allocator, &dir, "b", b.sector).unwrap();
        assert_eq!(entry_count(&dir), 1);
    }

    #[test]
    fn name_too_long_rejected() {
        let (cache, allocator) = setup();
        let dir = create_inode(&cache, &allocator, true).unwrap();
        let file = create_inode(&cache, &allocator, false).unwrap();
        let long_name = "x".repeat(MAX_NAME + 1);
        let err = add(&cache, &allocator, &dir, &long_name, file.sector).unwrap_err();
        assert_eq!(err, FsError::NameTooLong);
    }

    #[test]
    fn init_dir_installs_dot_and_dotdot() {
        let (cache, allocator) = setup();
        let parent = create_inode(&cache, &allocator, true).unwrap();
        let child = create_inode(&cache, &allocator, true).unwrap();
        init_dir(&cache, &allocator, &child, parent.sector).unwrap();
        assert_eq!(lookup(&cache, &child, ".").unwrap(), Some(child.sector));
        assert_eq!(lookup(&cache, &child, "..").unwrap(), Some(parent.sector));
        assert!(is_empty(&cache, &child).unwrap());
    }
}

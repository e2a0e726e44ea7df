//! File metadata returned to callers: only what the inode layer knows
//! about itself, with no device table or link count.

/// The kind of file an inode represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
}

/// A snapshot of an inode's metadata at the moment it was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// The sector the inode itself lives at; doubles as its unique id.
    pub inode_sector: u32,
    pub file_type: FileType,
    pub size: u32,
}

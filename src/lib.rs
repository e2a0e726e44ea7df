//! A write-back buffer cache, indexed-inode file layer, and hierarchical
//! path resolver, layered over an externally supplied block device and
//! free-sector allocator.
//!
//! The crate is organized bottom-up:
//!
//! - [`block`] / [`alloc`] — the external collaborators: traits only, plus
//!   one default in-memory implementation of each so the crate is runnable
//!   without an embedder's own disk and allocator.
//! - [`cache`] — the write-back, clock-evicted buffer cache.
//! - [`inode`] — the on-disk inode format and indexed sector addressing,
//!   including grow-on-write extension.
//! - [`itable`] — the table of currently-open inodes.
//! - [`dir`] — directory entries, implemented as ordinary files.
//! - [`path`] — path tokenization.
//! - [`fs`] — the [`fs::FileSystem`] façade and [`fs::OpenFile`] handles,
//!   the crate's actual entry point.
//!
//! ```
//! use blockfs::alloc::BitmapAllocator;
//! use blockfs::block::MemBlockDevice;
//! use blockfs::fs::FileSystem;
//!
//! let fs = FileSystem::format(MemBlockDevice::new(256), BitmapAllocator::new(256, 1)).unwrap();
//! let root = fs.root();
//! fs.create(&root, "greeting.txt", 0).unwrap();
//! let mut f = fs.open(&root, "greeting.txt").unwrap();
//! f.write(b"hello").unwrap();
//! ```

pub mod alloc;
pub mod block;
pub mod cache;
pub mod dir;
pub mod error;
pub mod fs;
pub mod inode;
pub mod itable;
pub mod lock;
pub mod param;
pub mod path;
pub mod stat;

pub use error::{FsError, FsResult};

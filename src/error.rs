//! The single error enum returned by every fallible operation in this
//! crate.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type FsResult<T> = Result<T, FsError>;

/// Recoverable and fatal error kinds surfaced by the filesystem core.
///
/// Recoverable variants propagate to the façade and become the caller's
/// return value. `Fatal` represents a device I/O failure or an invariant
/// violation; callers are not expected to recover from it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    /// A path segment does not name an existing directory entry.
    #[error("no such file or directory")]
    NotFound,

    /// An intermediate path component names a regular file, not a directory.
    #[error("not a directory")]
    NotADirectory,

    /// `create`/`mkdir` target a name that is already present.
    #[error("file exists")]
    Exists,

    /// `remove` targeted a directory that still has entries besides `.`/`..`.
    #[error("directory not empty")]
    NotEmpty,

    /// The free-sector allocator rejected a request; the inode cannot extend.
    #[error("no space left on device")]
    OutOfSpace,

    /// A scratch allocation (e.g. for a zero-fill buffer) failed.
    #[error("out of memory")]
    OutOfMemory,

    /// `write` was attempted while `deny_write` was in force.
    #[error("resource busy")]
    Busy,

    /// The parent directory was marked removed after the path was resolved.
    #[error("parent directory was removed")]
    RemovedParent,

    /// A leaf name exceeded `MAX_NAME` bytes.
    #[error("file name too long")]
    NameTooLong,

    /// `remove` targeted `.` or `..`, which are not unlinkable in their own
    /// right.
    #[error("cannot remove . or ..")]
    InvalidName,

    /// A device I/O failure or invariant violation. Not meant to be handled;
    /// the condition it names should never occur in a correct embedding.
    #[error("fatal filesystem error: {0}")]
    Fatal(&'static str),
}

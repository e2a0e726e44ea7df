//! The hierarchical path resolver. Pure tokenization here; walking the
//! tokens through directory lookups is the façade's job, since that part
//! needs the cache, the inode table, and the namespace lock.

use itertools::{Itertools, Position};

use crate::error::{FsError, FsResult};
use crate::param::MAX_NAME;

/// A path split into its components, with a flag for whether it started
/// with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    pub absolute: bool,
    pub components: Vec<String>,
}

impl ParsedPath {
    /// Splits `raw` on `/`, dropping empty components (so `a//b` and
    /// `a/b` parse identically) and `.` components (a no-op in any path).
    /// Fails with [`FsError::NameTooLong`] if any component exceeds
    /// `MAX_NAME` bytes.
    pub fn parse(raw: &str) -> FsResult<Self> {
        let absolute = raw.starts_with('/');
        let parts: Vec<&str> = raw.split('/').filter(|s| !s.is_empty() && *s != ".").collect();

        let mut components = Vec::with_capacity(parts.len());
        for step in parts.into_iter().with_position() {
            let part = match step {
                Position::First(p) | Position::Middle(p) | Position::Last(p) | Position::Only(p) => p,
            };
            if part.len() > MAX_NAME {
                return Err(FsError::NameTooLong);
            }
            components.push(part.to_string());
        }
        Ok(Self { absolute, components })
    }

    /// The last component, i.e. the name being created/looked up/removed,
    /// or `None` for a path with no components (`""`, `/`, `.`).
    pub fn leaf(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// Every component except the last: the directories that must be
    /// walked to reach the parent of [`leaf`](Self::leaf).
    pub fn parent_components(&self) -> &[String] {
        if self.components.is_empty() {
            &[]
        } else {
            &self.components[..self.components.len() - 1]
        }
    }
}

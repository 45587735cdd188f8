use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identity of one on-disk index (its directory path).
///
/// Compared by value and never canonicalized, so `/data/a` and `/data/./a`
/// are two different handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexHandle(Arc<PathBuf>);

impl IndexHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(Arc::new(path.into()))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<PathBuf> for IndexHandle {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<&Path> for IndexHandle {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

impl From<&str> for IndexHandle {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl AsRef<Path> for IndexHandle {
    fn as_ref(&self) -> &Path {
        self.path()
    }
}

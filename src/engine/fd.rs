//! A path together with a lazily-computed `stat`, backing the out-of-scope `ls`/`find`-
//! style operators.
//!
//! Constructing a [`FileEntry`] is cheap and does no I/O; the stat syscall runs at most
//! once, on first query, and is cached thereafter (mirroring the source's `os.lstat`,
//! which does not follow a trailing symlink).

use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

/// A filesystem path plus its lazily-fetched [`Metadata`].
pub struct FileEntry {
    path: PathBuf,
    stat: OnceLock<io::Result<Metadata>>,
}

impl FileEntry {
    /// Wrap `path`. No syscall happens until a stat-backed accessor is first called.
    pub fn new(path: impl Into<PathBuf>) -> FileEntry {
        FileEntry { path: path.into(), stat: OnceLock::new() }
    }

    /// The wrapped path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn metadata(&self) -> Result<&Metadata, io::Error> {
        match self.stat.get_or_init(|| std::fs::symlink_metadata(&self.path)) {
            Ok(m) => Ok(m),
            Err(e) => Err(clone_io_error(e)),
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> io::Result<u64> {
        self.metadata().map(Metadata::len)
    }

    /// True if the path is a directory.
    pub fn is_dir(&self) -> io::Result<bool> {
        self.metadata().map(Metadata::is_dir)
    }

    /// True if the path is a regular file.
    pub fn is_file(&self) -> io::Result<bool> {
        self.metadata().map(Metadata::is_file)
    }

    /// True if the path itself (not its target) is a symlink.
    pub fn is_symlink(&self) -> io::Result<bool> {
        self.metadata().map(|m| m.file_type().is_symlink())
    }

    /// Last modification time.
    pub fn modified(&self) -> io::Result<SystemTime> {
        self.metadata().and_then(Metadata::modified)
    }

    /// Last access time.
    pub fn accessed(&self) -> io::Result<SystemTime> {
        self.metadata().and_then(Metadata::accessed)
    }
}

#[cfg(unix)]
impl FileEntry {
    /// Unix file mode bits.
    pub fn mode(&self) -> io::Result<u32> {
        use std::os::unix::fs::MetadataExt;
        self.metadata().map(MetadataExt::mode)
    }

    /// Owning uid.
    pub fn uid(&self) -> io::Result<u32> {
        use std::os::unix::fs::MetadataExt;
        self.metadata().map(MetadataExt::uid)
    }

    /// Owning gid.
    pub fn gid(&self) -> io::Result<u32> {
        use std::os::unix::fs::MetadataExt;
        self.metadata().map(MetadataExt::gid)
    }
}

fn clone_io_error(e: &io::Error) -> io::Error {
    io::Error::new(e.kind(), e.to_string())
}

impl Clone for FileEntry {
    /// Clones carry no cached stat of their own; the next accessor call on the clone
    /// re-stats the path independently.
    fn clone(&self) -> Self {
        FileEntry::new(self.path.clone())
    }
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry").field("path", &self.path).finish()
    }
}

impl fmt::Display for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl PartialEq for FileEntry {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_is_cached_after_first_query() {
        let dir = tempfile::tempdir().unwrap();
        let entry = FileEntry::new(dir.path());
        assert!(entry.is_dir().unwrap());
        assert!(entry.stat.get().is_some());
        // Second call reuses the cached result rather than re-statting.
        assert!(entry.is_dir().unwrap());
    }

    #[test]
    fn missing_path_reports_not_found() {
        let entry = FileEntry::new("/does/not/exist/hopefully");
        let err = entry.size().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn clone_does_not_carry_the_cached_stat() {
        let dir = tempfile::tempdir().unwrap();
        let entry = FileEntry::new(dir.path());
        entry.is_dir().unwrap();
        let cloned = entry.clone();
        assert!(cloned.stat.get().is_none());
    }
}

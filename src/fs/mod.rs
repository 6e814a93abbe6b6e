//! Filesystem Interface
//!
//! The process core does not implement a filesystem. It consumes one
//! through [`FileSystem`] and [`Node`], and writes console output through
//! [`Console`]. Open files wrapping either live in [`file`].

pub mod file;

pub use file::{FileError, OpenFile};

use alloc::sync::Arc;
use alloc::vec;

/// A file, directory or symbolic link.
pub trait Node: Send + Sync {
    /// Copy bytes starting at `offset` into `buf`; returns bytes copied
    /// (short at end of file).
    fn read_all(&self, offset: u32, buf: &mut [u8]) -> usize;

    /// Size in bytes (for a symlink, the length of its target).
    fn size_in_bytes(&self) -> u32;

    /// Regular file?
    fn is_file(&self) -> bool;

    /// Directory?
    fn is_dir(&self) -> bool;

    /// Symbolic link?
    fn is_symlink(&self) -> bool;

    /// Copy a symlink's target into `buf`; returns bytes copied.
    fn get_symbol(&self, buf: &mut [u8]) -> usize;
}

/// Path lookup from the root directory.
pub trait FileSystem: Send + Sync {
    /// Find the node at `path`, without following a final symlink.
    fn find(&self, path: &str) -> Option<Arc<dyn Node>>;
}

/// The serial console.
pub trait Console: Send + Sync {
    /// Write `bytes` to the device.
    fn write_bytes(&self, bytes: &[u8]);
}

/// Look up `path`, following symbolic links for at most `max_hops` hops.
pub fn resolve(
    fs: &dyn FileSystem,
    path: &str,
    max_hops: usize,
) -> Result<Arc<dyn Node>, FileError> {
    let mut node = fs.find(path).ok_or(FileError::NotFound)?;
    let mut hops = 0;
    while node.is_symlink() {
        if hops == max_hops {
            log::debug!("fs: too many links resolving {:?}", path);
            return Err(FileError::TooManyLinks);
        }
        hops += 1;

        let mut target = vec![0u8; node.size_in_bytes() as usize];
        let len = node.get_symbol(&mut target);
        target.truncate(len);
        let target = core::str::from_utf8(&target).map_err(|_| FileError::BadLink)?;
        log::trace!("fs: {:?} -> {:?}", path, target);

        // A dangling link fails the whole lookup.
        node = fs.find(target).ok_or(FileError::NotFound)?;
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemFs;

    #[test]
    fn test_resolve_plain_file() {
        let fs = MemFs::new();
        fs.add_file("/data/hello.txt", b"hi");
        let node = resolve(&fs, "/data/hello.txt", 32).unwrap();
        assert!(node.is_file());
        assert_eq!(node.size_in_bytes(), 2);
    }

    #[test]
    fn test_resolve_follows_chain() {
        let fs = MemFs::new();
        fs.add_file("/real", b"payload");
        fs.add_symlink("/a", "/b");
        fs.add_symlink("/b", "/real");
        let node = resolve(&fs, "/a", 32).unwrap();
        assert!(node.is_file());
        assert_eq!(node.size_in_bytes(), 7);
    }

    #[test]
    fn test_resolve_failures() {
        let fs = MemFs::new();
        fs.add_symlink("/dangling", "/nowhere");
        fs.add_symlink("/loop", "/loop");
        assert_eq!(resolve(&fs, "/missing", 32).err(), Some(FileError::NotFound));
        assert_eq!(resolve(&fs, "/dangling", 32).err(), Some(FileError::NotFound));
        assert_eq!(resolve(&fs, "/loop", 32).err(), Some(FileError::TooManyLinks));
    }
}

//! Open Files
//!
//! An [`OpenFile`] is what a file-table slot holds: either the console
//! device or a regular filesystem node with a read cursor. Open files are
//! shared by `Arc` across fork, so parent and child move the same cursor.
//!
//! # Design
//! - Regular files are read-only; console files are write-only
//! - The cursor is a single atomic word: concurrent readers of one open
//!   file may observe each other's progress but never a torn offset

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use super::{Console, Node};

/// File-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    /// Path does not exist (or a symlink on it dangles).
    NotFound,
    /// Symlink chain too long.
    TooManyLinks,
    /// Symlink target is not valid UTF-8.
    BadLink,
    /// Operation not supported by this kind of file.
    NotSupported,
    /// Seek outside `0..=size`.
    InvalidOffset,
}

impl core::fmt::Display for FileError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such file"),
            Self::TooManyLinks => write!(f, "too many levels of symbolic links"),
            Self::BadLink => write!(f, "malformed symbolic link"),
            Self::NotSupported => write!(f, "operation not supported"),
            Self::InvalidOffset => write!(f, "offset out of range"),
        }
    }
}

/// An open file.
pub enum OpenFile {
    /// The serial console.
    Console(Arc<dyn Console>),
    /// A filesystem node and the current read offset.
    Regular {
        node: Arc<dyn Node>,
        cursor: AtomicU32,
    },
}

impl OpenFile {
    /// Open the console.
    pub fn console(console: Arc<dyn Console>) -> Self {
        Self::Console(console)
    }

    /// Open `node` with the cursor at 0.
    pub fn regular(node: Arc<dyn Node>) -> Self {
        Self::Regular {
            node,
            cursor: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn is_console(&self) -> bool {
        matches!(self, Self::Console(_))
    }

    /// Current read offset (`None` for the console).
    pub fn offset(&self) -> Option<u32> {
        match self {
            Self::Console(_) => None,
            Self::Regular { cursor, .. } => Some(cursor.load(Ordering::Acquire)),
        }
    }

    /// Read at the cursor into `buf`, advancing by the bytes transferred.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, FileError> {
        match self {
            Self::Console(_) => Err(FileError::NotSupported),
            Self::Regular { node, cursor } => {
                if buf.is_empty() {
                    return Ok(0);
                }
                let n = node.read_all(cursor.load(Ordering::Acquire), buf);
                cursor.fetch_add(n as u32, Ordering::AcqRel);
                Ok(n)
            }
        }
    }

    /// Write `data`; only the console accepts writes.
    pub fn write(&self, data: &[u8]) -> Result<usize, FileError> {
        match self {
            Self::Console(console) => {
                console.write_bytes(data);
                Ok(data.len())
            }
            Self::Regular { .. } => {
                log::debug!("file: write to regular file refused");
                Err(FileError::NotSupported)
            }
        }
    }

    /// Move the cursor to `offset`, which must lie in `0..=size`.
    pub fn seek(&self, offset: i32) -> Result<u32, FileError> {
        match self {
            Self::Console(_) => Err(FileError::NotSupported),
            Self::Regular { node, cursor } => {
                let offset = u32::try_from(offset).map_err(|_| FileError::InvalidOffset)?;
                if offset > node.size_in_bytes() {
                    return Err(FileError::InvalidOffset);
                }
                cursor.store(offset, Ordering::Release);
                Ok(offset)
            }
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> Result<u32, FileError> {
        match self {
            Self::Console(_) => Err(FileError::NotSupported),
            Self::Regular { node, .. } => Ok(node.size_in_bytes()),
        }
    }
}

impl core::fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Console(_) => write!(f, "OpenFile::Console"),
            Self::Regular { cursor, .. } => {
                write!(f, "OpenFile::Regular(@{})", cursor.load(Ordering::Relaxed))
            }
        }
    }
}

//! Resource Handles
//!
//! A handle is the opaque 32-bit value user space holds for a kernel
//! resource. The encoding is:
//!
//! ```text
//! ┌──────┬──────────────────────────────┐
//! │ 31-28│ 27-0                         │
//! │ kind │ table index                  │
//! └──────┴──────────────────────────────┘
//! ```
//!
//! Kind tags: file = 0x0, child process = 0x1, semaphore = 0x2.
//! `-1` is the universal failure value and never decodes.
//!
//! Decoding is a total match on the tag, so a wrong kind and an
//! out-of-range index are distinct errors.

/// Slots in the file table.
pub const NFILE: usize = 10;
/// Slots in the semaphore table.
pub const NSEM: usize = 10;
/// Slots in the child table.
pub const NCHILD: usize = 10;

const KIND_SHIFT: u32 = 28;
const INDEX_MASK: u32 = 0x0FFF_FFFF;

/// What a handle refers to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum HandleKind {
    /// Open file (console or regular file).
    File = 0x0,
    /// Exit status of a forked child.
    Child = 0x1,
    /// Counting semaphore.
    Semaphore = 0x2,
}

impl HandleKind {
    /// Decode a 4-bit kind tag.
    #[inline]
    pub const fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0x0 => Some(Self::File),
            0x1 => Some(Self::Child),
            0x2 => Some(Self::Semaphore),
            _ => None,
        }
    }

    /// Number of slots in the table for this kind.
    #[inline]
    pub const fn capacity(self) -> usize {
        match self {
            Self::File => NFILE,
            Self::Child => NCHILD,
            Self::Semaphore => NSEM,
        }
    }
}

/// Error type for handle and table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    /// The tag bits name no known kind (this covers `-1`).
    UnknownKind(u32),
    /// The handle is of a different kind than the operation needs.
    WrongKind {
        /// Kind the operation needs.
        expected: HandleKind,
        /// Kind the handle carries.
        found: HandleKind,
    },
    /// The index is past the end of the kind's table.
    OutOfRange(HandleKind, usize),
    /// The slot is empty.
    EmptySlot,
    /// Every slot of the table is occupied.
    TableFull(HandleKind),
}

impl core::fmt::Display for HandleError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnknownKind(tag) => write!(f, "unknown handle kind {:#x}", tag),
            Self::WrongKind { expected, found } => {
                write!(f, "expected {:?} handle, found {:?}", expected, found)
            }
            Self::OutOfRange(kind, index) => {
                write!(f, "{:?} index {} out of range", kind, index)
            }
            Self::EmptySlot => write!(f, "slot is empty"),
            Self::TableFull(kind) => write!(f, "{:?} table full", kind),
        }
    }
}

/// A decoded resource handle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Handle {
    /// File table slot (also the plain file descriptor number).
    File(usize),
    /// Child table slot.
    Child(usize),
    /// Semaphore table slot.
    Semaphore(usize),
}

impl Handle {
    /// Build a handle of `kind` for slot `index`.
    #[inline]
    pub const fn new(kind: HandleKind, index: usize) -> Self {
        match kind {
            HandleKind::File => Self::File(index),
            HandleKind::Child => Self::Child(index),
            HandleKind::Semaphore => Self::Semaphore(index),
        }
    }

    /// The handle's kind.
    #[inline]
    pub const fn kind(self) -> HandleKind {
        match self {
            Self::File(_) => HandleKind::File,
            Self::Child(_) => HandleKind::Child,
            Self::Semaphore(_) => HandleKind::Semaphore,
        }
    }

    /// The table index.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::File(i) | Self::Child(i) | Self::Semaphore(i) => i,
        }
    }

    /// Encode into the raw value handed to user space.
    #[inline]
    pub const fn encode(self) -> i32 {
        (((self.kind() as u32) << KIND_SHIFT) | (self.index() as u32 & INDEX_MASK)) as i32
    }

    /// Decode a raw value, checking the tag and the index range.
    pub const fn decode(raw: i32) -> Result<Self, HandleError> {
        let raw = raw as u32;
        let tag = raw >> KIND_SHIFT;
        let index = (raw & INDEX_MASK) as usize;
        let kind = match HandleKind::from_tag(tag) {
            Some(kind) => kind,
            None => return Err(HandleError::UnknownKind(tag)),
        };
        if index >= kind.capacity() {
            return Err(HandleError::OutOfRange(kind, index));
        }
        Ok(Self::new(kind, index))
    }

    /// Decode a raw value that must be of `expected` kind; yields the index.
    pub fn decode_as(raw: i32, expected: HandleKind) -> Result<usize, HandleError> {
        let handle = Self::decode(raw)?;
        if handle.kind() != expected {
            return Err(HandleError::WrongKind {
                expected,
                found: handle.kind(),
            });
        }
        Ok(handle.index())
    }
}

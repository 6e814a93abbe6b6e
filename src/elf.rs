//! ELF32 Image Loader
//!
//! Loads statically linked, little-endian ELF32 executables into a
//! process address space. There is no relocation and no dynamic linking:
//! every `PT_LOAD` segment is copied to its link address and the header's
//! entry point is returned.
//!
//! # Security Properties
//! - The header is fully validated before anything is written
//! - Segments may only target the private (user) region
//! - Segments that would wrap the address space or cover an interrupt
//!   controller page are rejected as fatal: such an image can only come
//!   from a broken build and the kernel refuses to keep running it
//!
//! # Header checks (in order)
//! 1. magic `7F 'E' 'L' 'F'`
//! 2. class 32-bit, little-endian, Unix ABI 0, header version 1
//! 3. ELF version 1, type `ET_EXEC`
//! 4. program header offset is non-zero

use alloc::vec;

use crate::config::KernelConfig;
use crate::fs::Node;
use crate::mm::{AddressSpace, MapError, VirtAddr, PAGE_SIZE};

/// Size of an ELF32 file header.
pub const ELF_HEADER_SIZE: usize = 52;
/// Size of an ELF32 program header.
pub const PROGRAM_HEADER_SIZE: usize = 32;

/// Loadable segment.
pub const PT_LOAD: u32 = 1;
/// Executable file.
pub const ET_EXEC: u16 = 2;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const ELFOSABI_SYSV: u8 = 0;
const EV_CURRENT: u8 = 1;

/// Image loading error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// File is shorter than an ELF header.
    Truncated,
    /// Magic bytes do not match.
    BadMagic,
    /// Not a 32-bit little-endian System V image with header version 1.
    Unsupported,
    /// Wrong ELF version or not an executable.
    NotExecutable,
    /// Program header offset is zero.
    NoProgramHeaders,
    /// Program header table or a segment is internally inconsistent.
    Malformed,
    /// Segment starts below the user region.
    SegmentOutsideUser(u32),
    /// Segment end wraps the 32-bit address space.
    SegmentOverflow(u32),
    /// Segment covers an interrupt-controller page.
    SegmentOverApic(u32),
    /// Mapping the segment failed.
    Map(MapError),
}

impl LoadError {
    /// Whether this error must halt the kernel instead of failing the call.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SegmentOutsideUser(_) | Self::SegmentOverflow(_) | Self::SegmentOverApic(_)
        )
    }
}

impl From<MapError> for LoadError {
    fn from(e: MapError) -> Self {
        Self::Map(e)
    }
}

impl core::fmt::Display for LoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Truncated => write!(f, "file too short for an ELF header"),
            Self::BadMagic => write!(f, "not an ELF file"),
            Self::Unsupported => write!(f, "not a 32-bit little-endian System V image"),
            Self::NotExecutable => write!(f, "not an executable image"),
            Self::NoProgramHeaders => write!(f, "no program headers"),
            Self::Malformed => write!(f, "malformed program headers"),
            Self::SegmentOutsideUser(va) => write!(f, "segment at {:#010x} outside user region", va),
            Self::SegmentOverflow(va) => write!(f, "segment at {:#010x} wraps address space", va),
            Self::SegmentOverApic(va) => write!(f, "segment at {:#010x} covers APIC page", va),
            Self::Map(e) => write!(f, "segment mapping failed: {}", e),
        }
    }
}

#[inline]
fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

#[inline]
fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// A validated ELF32 file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Header {
    pub class: u8,
    pub encoding: u8,
    pub header_version: u8,
    pub abi: u8,
    pub elf_type: u16,
    pub version: u32,
    pub entry: u32,
    pub phoff: u32,
    pub phentsize: u16,
    pub phnum: u16,
}

impl Elf32Header {
    /// Decode and validate the header at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        if bytes.len() < ELF_HEADER_SIZE {
            return Err(LoadError::Truncated);
        }
        if bytes[..4] != ELF_MAGIC {
            return Err(LoadError::BadMagic);
        }
        let header = Self {
            class: bytes[4],
            encoding: bytes[5],
            header_version: bytes[6],
            abi: bytes[7],
            elf_type: u16_at(bytes, 16),
            version: u32_at(bytes, 20),
            entry: u32_at(bytes, 24),
            phoff: u32_at(bytes, 28),
            phentsize: u16_at(bytes, 42),
            phnum: u16_at(bytes, 44),
        };
        if header.encoding != ELFDATA2LSB
            || header.class != ELFCLASS32
            || header.abi != ELFOSABI_SYSV
            || header.header_version != EV_CURRENT
        {
            return Err(LoadError::Unsupported);
        }
        if header.version != u32::from(EV_CURRENT) || header.elf_type != ET_EXEC {
            return Err(LoadError::NotExecutable);
        }
        if header.phoff == 0 {
            return Err(LoadError::NoProgramHeaders);
        }
        Ok(header)
    }

    /// Read and validate the header of `node`.
    pub fn read_from(node: &dyn Node) -> Result<Self, LoadError> {
        let mut raw = [0u8; ELF_HEADER_SIZE];
        let n = node.read_all(0, &mut raw);
        Self::parse(&raw[..n])
    }

    /// File offset of program header `index`.
    fn program_header_offset(&self, index: u16) -> Result<u32, LoadError> {
        if usize::from(self.phentsize) < PROGRAM_HEADER_SIZE {
            return Err(LoadError::Malformed);
        }
        let off = u64::from(self.phoff) + u64::from(index) * u64::from(self.phentsize);
        u32::try_from(off).map_err(|_| LoadError::Malformed)
    }
}

/// An ELF32 program header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub offset: u32,
    pub vaddr: u32,
    pub filesz: u32,
    pub memsz: u32,
}

impl ProgramHeader {
    /// Decode a program header.
    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        if bytes.len() < PROGRAM_HEADER_SIZE {
            return Err(LoadError::Malformed);
        }
        Ok(Self {
            p_type: u32_at(bytes, 0),
            offset: u32_at(bytes, 4),
            vaddr: u32_at(bytes, 8),
            filesz: u32_at(bytes, 16),
            memsz: u32_at(bytes, 20),
        })
    }

    /// Check where a loadable segment would land.
    pub fn validate(&self, config: &KernelConfig) -> Result<(), LoadError> {
        if self.vaddr < config.user_base {
            return Err(LoadError::SegmentOutsideUser(self.vaddr));
        }
        let end = self
            .vaddr
            .checked_add(self.memsz)
            .ok_or(LoadError::SegmentOverflow(self.vaddr))?;
        if config.overlaps_apic(self.vaddr, u64::from(end)) {
            return Err(LoadError::SegmentOverApic(self.vaddr));
        }
        if self.filesz > self.memsz {
            return Err(LoadError::Malformed);
        }
        Ok(())
    }
}

/// Read and decode program header `index` of `node`.
fn read_program_header(
    node: &dyn Node,
    header: &Elf32Header,
    index: u16,
) -> Result<ProgramHeader, LoadError> {
    let off = header.program_header_offset(index)?;
    let mut raw = [0u8; PROGRAM_HEADER_SIZE];
    if node.read_all(off, &mut raw) < PROGRAM_HEADER_SIZE {
        return Err(LoadError::Malformed);
    }
    ProgramHeader::parse(&raw)
}

/// Check a loadable segment, logging the ones that must halt the kernel.
fn validate_segment(ph: &ProgramHeader, config: &KernelConfig) -> Result<(), LoadError> {
    let result = ph.validate(config);
    if let Err(e) = result {
        if e.is_fatal() {
            log::error!("elf: invalid segment: {}", e);
        }
    }
    result
}

/// Validate the header and every program header of `node` without
/// touching any address space.
pub fn check(node: &dyn Node, config: &KernelConfig) -> Result<Elf32Header, LoadError> {
    let header = Elf32Header::read_from(node)?;
    for index in 0..header.phnum {
        let ph = read_program_header(node, &header, index)?;
        if ph.p_type == PT_LOAD {
            validate_segment(&ph, config)?;
        }
    }
    Ok(header)
}

/// Copy one validated segment into `space`.
fn load_segment(
    node: &dyn Node,
    space: &mut AddressSpace,
    ph: &ProgramHeader,
) -> Result<(), LoadError> {
    let mut chunk = vec![0u8; PAGE_SIZE];
    let mut copied = 0u32;
    while copied < ph.filesz {
        let want = ((ph.filesz - copied) as usize).min(PAGE_SIZE);
        let got = node.read_all(ph.offset.saturating_add(copied), &mut chunk[..want]);
        if got == 0 {
            log::warn!("elf: segment at {:#010x} short by {} bytes", ph.vaddr, ph.filesz - copied);
            break;
        }
        space.write(VirtAddr::new(ph.vaddr + copied), &chunk[..got])?;
        copied += got as u32;
    }
    space.zero(VirtAddr::new(ph.vaddr + copied), (ph.memsz - copied) as usize)?;
    Ok(())
}

/// Load the executable in `node` into `space` and return its entry point.
pub fn load(
    node: &dyn Node,
    space: &mut AddressSpace,
    config: &KernelConfig,
) -> Result<u32, LoadError> {
    let header = Elf32Header::read_from(node)?;

    for index in 0..header.phnum {
        let ph = read_program_header(node, &header, index)?;
        if ph.p_type != PT_LOAD {
            continue;
        }
        validate_segment(&ph, config)?;
        log::debug!(
            "elf: load vaddr={:#010x} filesz={:#x} memsz={:#x} off={:#x}",
            ph.vaddr,
            ph.filesz,
            ph.memsz,
            ph.offset
        );
        load_segment(node, space, &ph)?;
    }

    log::info!("elf: loaded image, entry={:#010x}", header.entry);
    Ok(header.entry)
}

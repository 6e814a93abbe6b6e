//! Kernel Configuration
//!
//! Machine addresses and limits the process core consults at run time.
//! The defaults describe a standard PC; the boot loader may override the
//! interrupt-controller bases through the kernel command line.

use crate::mm::USER_BASE;

/// Default I/O APIC base.
pub const DEFAULT_IO_APIC: u32 = 0xFEC0_0000;
/// Default local APIC base.
pub const DEFAULT_LOCAL_APIC: u32 = 0xFEE0_0000;
/// Initial user stack pointer for a freshly exec'd image.
pub const USER_STACK_TOP: u32 = 0xEFFF_E000;
/// `execl` argument vector limit; reaching it halts the kernel.
pub const MAX_EXEC_ARGS: usize = 99;
/// Longest user string (path or argument) the kernel copies in.
pub const MAX_USER_STRING: usize = 4096;
/// Symlink chain length at which `open` gives up.
pub const MAX_SYMLINK_HOPS: usize = 32;

/// Configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Token is not of the form `key=value`.
    MissingValue,
    /// Key is not recognised.
    UnknownKey,
    /// Value is not a number.
    BadNumber,
    /// Value is not a page-aligned address.
    Unaligned,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MissingValue => write!(f, "expected key=value"),
            Self::UnknownKey => write!(f, "unknown configuration key"),
            Self::BadNumber => write!(f, "malformed number"),
            Self::Unaligned => write!(f, "address not page aligned"),
        }
    }
}

/// Run-time kernel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// I/O APIC MMIO page.
    pub io_apic: u32,
    /// Local APIC MMIO page.
    pub local_apic: u32,
    /// First address of the private (user) region.
    pub user_base: u32,
    /// Initial stack pointer for exec.
    pub user_stack_top: u32,
    /// `execl` argument limit.
    pub max_exec_args: usize,
    /// Longest user string accepted.
    pub max_user_string: usize,
    /// Longest symlink chain followed by `open`.
    pub max_symlink_hops: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            io_apic: DEFAULT_IO_APIC,
            local_apic: DEFAULT_LOCAL_APIC,
            user_base: USER_BASE,
            user_stack_top: USER_STACK_TOP,
            max_exec_args: MAX_EXEC_ARGS,
            max_user_string: MAX_USER_STRING,
            max_symlink_hops: MAX_SYMLINK_HOPS,
        }
    }
}

impl KernelConfig {
    /// Defaults with the interrupt controllers at the given bases.
    pub fn with_apics(io_apic: u32, local_apic: u32) -> Self {
        Self {
            io_apic,
            local_apic,
            ..Self::default()
        }
    }

    /// Whether `addr` is one of the interrupt-controller bases.
    #[inline]
    pub fn is_apic(&self, addr: u32) -> bool {
        addr == self.io_apic || addr == self.local_apic
    }

    /// Whether `[start, end)` touches an interrupt-controller page.
    pub fn overlaps_apic(&self, start: u32, end: u64) -> bool {
        [self.io_apic, self.local_apic].iter().any(|&base| {
            let base = u64::from(base);
            u64::from(start) < base + crate::mm::PAGE_SIZE as u64 && base < end
        })
    }

    /// Parse a whitespace-separated kernel command line.
    ///
    /// Recognised keys are `ioapic` and `lapic`; values are decimal or
    /// `0x`-prefixed hex and must be page aligned.
    pub fn parse(cmdline: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for token in cmdline.split_whitespace() {
            let (key, value) = token.split_once('=').ok_or(ConfigError::MissingValue)?;
            let addr = parse_addr(value)?;
            match key {
                "ioapic" => config.io_apic = addr,
                "lapic" => config.local_apic = addr,
                _ => {
                    log::warn!("config: unknown key {:?}", key);
                    return Err(ConfigError::UnknownKey);
                }
            }
        }
        log::debug!(
            "config: ioapic={:#010x} lapic={:#010x}",
            config.io_apic,
            config.local_apic
        );
        Ok(config)
    }
}

fn parse_addr(value: &str) -> Result<u32, ConfigError> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    let addr = parsed.map_err(|_| ConfigError::BadNumber)?;
    if addr as usize % crate::mm::PAGE_SIZE != 0 {
        return Err(ConfigError::Unaligned);
    }
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KernelConfig::default();
        assert!(config.is_apic(0xFEC0_0000));
        assert!(config.is_apic(0xFEE0_0000));
        assert!(!config.is_apic(0xFEC0_0004));
        assert_eq!(config.user_stack_top, 0xEFFF_E000);
        assert_eq!(config.max_exec_args, 99);
    }

    #[test]
    fn test_parse_overrides() {
        let config = KernelConfig::parse("ioapic=0x90000000 lapic=4096").unwrap();
        assert_eq!(config.io_apic, 0x9000_0000);
        assert_eq!(config.local_apic, 0x1000);
        assert_eq!(KernelConfig::parse("").unwrap(), KernelConfig::default());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(KernelConfig::parse("ioapic"), Err(ConfigError::MissingValue));
        assert_eq!(KernelConfig::parse("hpet=0x1000"), Err(ConfigError::UnknownKey));
        assert_eq!(KernelConfig::parse("lapic=0xZZ"), Err(ConfigError::BadNumber));
        assert_eq!(KernelConfig::parse("lapic=0x1004"), Err(ConfigError::Unaligned));
    }

    #[test]
    fn test_overlaps_apic() {
        let config = KernelConfig::default();
        assert!(config.overlaps_apic(0xFEBF_F000, 0xFEC0_0001));
        assert!(config.overlaps_apic(0xFEE0_0FFF, 0xFEE0_1000));
        assert!(!config.overlaps_apic(0xFEBF_F000, 0xFEC0_0000));
        assert!(!config.overlaps_apic(0xFEC0_1000, 0xFEC0_2000));
    }
}

//! Handle-based Resource Tables
//!
//! Every resource a process can name from user space (open files,
//! semaphores, forked children) lives in a fixed-size per-process table
//! and is reached through a tagged 32-bit handle.
//!
//! # Security Properties
//! - Handles are validated (kind and range) before any slot is touched
//! - A slot is either empty or holds exactly one capability
//! - Releasing an empty slot fails instead of silently succeeding

pub mod handle;
pub mod table;

pub use handle::{Handle, HandleError, HandleKind, NCHILD, NFILE, NSEM};
pub use table::ResourceTable;

//! Kernel Context
//!
//! Everything the process core needs from the rest of the kernel, passed
//! around explicitly instead of living in globals: configuration, the
//! frame allocator, the shared kernel mapping, the root filesystem, the
//! scheduler and the console.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::config::KernelConfig;
use crate::fs::{Console, FileSystem};
use crate::mm::{FrameAllocator, SharedRegion};
use crate::process::Process;
use crate::sched::Scheduler;
use crate::syscall::{self, ExecError};

/// Kernel-wide collaborators.
pub struct Kernel {
    pub config: KernelConfig,
    pub frames: Arc<dyn FrameAllocator>,
    pub shared: SharedRegion,
    pub fs: Arc<dyn FileSystem>,
    pub sched: Arc<dyn Scheduler>,
    pub console: Arc<dyn Console>,
}

impl Kernel {
    pub fn new(
        config: KernelConfig,
        frames: Arc<dyn FrameAllocator>,
        shared: SharedRegion,
        fs: Arc<dyn FileSystem>,
        sched: Arc<dyn Scheduler>,
        console: Arc<dyn Console>,
    ) -> Self {
        Self {
            config,
            frames,
            shared,
            fs,
            sched,
            console,
        }
    }

    /// Create the initial process, load `path` into it and hand it to the
    /// scheduler. `argv[0]` is conventionally the program name.
    pub fn start_init(&self, path: &str, argv: &[&str]) -> Result<Arc<Process>, ExecError> {
        let init = Process::new_init(self)?;
        let argv: Vec<Vec<u8>> = argv.iter().map(|a| a.as_bytes().to_vec()).collect();
        let context = syscall::exec(self, &init, path, &argv)?;
        log::info!(
            "kernel: init {:?} (process {}) entry={:#010x}",
            path,
            init.pid(),
            context.pc
        );
        self.sched.spawn_user(init.clone(), context);
        Ok(init)
    }
}

impl core::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

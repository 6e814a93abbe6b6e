//! Processes
//!
//! A [`Process`] owns one address space and three resource tables (open
//! files, semaphores, forked children), all behind a single blocking lock,
//! plus the one-shot future its exit status is published through.
//!
//! # Design
//! - Every table mutation, the whole fork copy and `clear_private` run
//!   with the process lock held
//! - `wait` never holds the lock while blocked on a child
//! - Files and semaphores are shared with forked children by `Arc`;
//!   private memory is copied eagerly
//! - Dropping the last reference releases the private region and the
//!   page directory

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::cap::{Handle, HandleError, HandleKind, ResourceTable, NCHILD, NFILE, NSEM};
use crate::fs::OpenFile;
use crate::kernel::Kernel;
use crate::mm::{AddressSpace, MapError, VirtAddr, PAGE_SIZE};
use crate::sched::Scheduler;
use crate::sync::{BlockingLock, Future, Semaphore};

static NEXT_PID: AtomicU32 = AtomicU32::new(1);

/// Process-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// Handle was invalid or its table was full.
    Handle(HandleError),
    /// User memory access or page allocation failed.
    Map(MapError),
    /// The exit status was already published.
    AlreadyExited,
    /// User string had no terminator within the limit.
    StringTooLong,
}

impl From<HandleError> for ProcessError {
    fn from(e: HandleError) -> Self {
        Self::Handle(e)
    }
}

impl From<MapError> for ProcessError {
    fn from(e: MapError) -> Self {
        Self::Map(e)
    }
}

impl core::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Handle(e) => write!(f, "{}", e),
            Self::Map(e) => write!(f, "{}", e),
            Self::AlreadyExited => write!(f, "process already exited"),
            Self::StringTooLong => write!(f, "user string too long"),
        }
    }
}

/// State guarded by the process lock.
struct ProcessInner {
    space: AddressSpace,
    files: ResourceTable<Arc<OpenFile>, NFILE>,
    sems: ResourceTable<Arc<Semaphore>, NSEM>,
    children: ResourceTable<Arc<Future<u32>>, NCHILD>,
}

/// A user process.
pub struct Process {
    pid: u32,
    inner: BlockingLock<ProcessInner>,
    exit: Arc<Future<u32>>,
    sched: Arc<dyn Scheduler>,
}

impl Process {
    /// Create a process with an empty private region and empty tables.
    pub fn new(kernel: &Kernel) -> Result<Arc<Self>, ProcessError> {
        let space = AddressSpace::new(kernel.frames.clone(), &kernel.shared)?;
        let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
        log::debug!("process {}: created", pid);
        Ok(Arc::new(Self {
            pid,
            inner: BlockingLock::new(
                ProcessInner {
                    space,
                    files: ResourceTable::new(HandleKind::File),
                    sems: ResourceTable::new(HandleKind::Semaphore),
                    children: ResourceTable::new(HandleKind::Child),
                },
                kernel.sched.clone(),
            ),
            exit: Arc::new(Future::new(kernel.sched.clone())),
            sched: kernel.sched.clone(),
        }))
    }

    /// Create the initial process: stdin, stdout and stderr are the console.
    pub fn new_init(kernel: &Kernel) -> Result<Arc<Self>, ProcessError> {
        let process = Self::new(kernel)?;
        {
            let console = Arc::new(OpenFile::console(kernel.console.clone()));
            let mut inner = process.inner.lock();
            for fd in 0..3 {
                inner.files.install(fd, console.clone())?;
            }
        }
        Ok(process)
    }

    /// Kernel-internal process id, used for logging.
    #[inline]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Clone this process.
    ///
    /// The child gets a private copy of every resident private page and
    /// shares every open file and semaphore at the same slot. Its exit
    /// future is installed in the first free child slot, whose handle is
    /// returned alongside the child.
    pub fn fork(&self, kernel: &Kernel) -> Result<(Arc<Process>, Handle), ProcessError> {
        let mut inner = self.inner.lock();
        let slot = inner
            .children
            .find_free()
            .ok_or(HandleError::TableFull(HandleKind::Child))?;

        let child = Self::new(kernel)?;
        {
            let mut child_inner = child.inner.lock();
            let pages = inner.space.copy_private_into(&mut child_inner.space)?;
            inner.sems.share_into(&mut child_inner.sems);
            inner.files.share_into(&mut child_inner.files);
            log::info!("process {}: fork -> {} ({} pages copied)", self.pid, child.pid, pages);
        }

        let handle = inner.children.install(slot, child.exit.clone())?;
        Ok((child, handle))
    }

    /// Release every private page and page table. Returns frames freed.
    pub fn clear_private(&self) -> usize {
        let freed = self.inner.lock().space.clear_private();
        log::debug!("process {}: cleared private region ({} frames)", self.pid, freed);
        freed
    }

    /// Run `f` on the address space with the process lock held.
    pub fn with_space<R>(&self, f: impl FnOnce(&mut AddressSpace) -> R) -> R {
        f(&mut self.inner.lock().space)
    }

    /// Create a semaphore with `initial` permits in the first free slot.
    pub fn new_semaphore(&self, initial: u32) -> Result<Handle, ProcessError> {
        let sem = Arc::new(Semaphore::new(initial, self.sched.clone()));
        Ok(self.inner.lock().sems.allocate(sem)?)
    }

    /// Look up a semaphore handle.
    pub fn get_semaphore(&self, raw: i32) -> Result<Arc<Semaphore>, ProcessError> {
        Ok(self.inner.lock().sems.lookup(raw)?.clone())
    }

    /// Look up a file descriptor.
    pub fn get_file(&self, fd: i32) -> Result<Arc<OpenFile>, ProcessError> {
        Ok(self.inner.lock().files.lookup(fd)?.clone())
    }

    /// Install `file` in the first free descriptor.
    pub fn set_file(&self, file: Arc<OpenFile>) -> Result<Handle, ProcessError> {
        Ok(self.inner.lock().files.allocate(file)?)
    }

    /// Close a handle of any kind.
    pub fn close(&self, raw: i32) -> Result<(), ProcessError> {
        let handle = Handle::decode(raw)?;
        let mut inner = self.inner.lock();
        match handle {
            Handle::File(_) => inner.files.release(handle).map(drop)?,
            Handle::Semaphore(_) => inner.sems.release(handle).map(drop)?,
            Handle::Child(_) => inner.children.release(handle).map(drop)?,
        }
        log::trace!("process {}: closed {:?}", self.pid, handle);
        Ok(())
    }

    /// Publish the exit status. Only the first call succeeds.
    pub fn exit(&self, status: u32) -> Result<(), ProcessError> {
        match self.exit.set(status) {
            Ok(()) => {
                log::info!("process {}: exit({})", self.pid, status);
                Ok(())
            }
            Err(_) => {
                log::warn!("process {}: second exit({}) ignored", self.pid, status);
                Err(ProcessError::AlreadyExited)
            }
        }
    }

    /// Exit status, if published.
    pub fn exit_status(&self) -> Option<u32> {
        self.exit.try_get()
    }

    /// Block until the child named by `raw` exits, then free its slot.
    pub fn wait(&self, raw: i32) -> Result<u32, ProcessError> {
        let handle = Handle::Child(Handle::decode_as(raw, HandleKind::Child)?);
        let future = self.inner.lock().children.get(handle)?.clone();

        let status = future.get();

        let mut inner = self.inner.lock();
        // Someone may have closed and reused the slot while we slept.
        if matches!(inner.children.get(handle), Ok(cur) if Arc::ptr_eq(cur, &future)) {
            inner.children.release(handle)?;
        }
        log::debug!("process {}: wait({:?}) -> {}", self.pid, handle, status);
        Ok(status)
    }

    /// Copy user memory at `va` into `buf`.
    pub fn read_user(&self, va: u32, buf: &mut [u8]) -> Result<(), ProcessError> {
        Ok(self.inner.lock().space.read(VirtAddr::new(va), buf)?)
    }

    /// Copy `data` into user memory at `va`.
    pub fn write_user(&self, va: u32, data: &[u8]) -> Result<(), ProcessError> {
        Ok(self.inner.lock().space.write(VirtAddr::new(va), data)?)
    }

    /// Read a user word.
    pub fn read_user_u32(&self, va: u32) -> Result<u32, ProcessError> {
        Ok(self.inner.lock().space.read_u32(VirtAddr::new(va))?)
    }

    /// Write a user word.
    pub fn write_user_u32(&self, va: u32, value: u32) -> Result<(), ProcessError> {
        Ok(self.inner.lock().space.write_u32(VirtAddr::new(va), value)?)
    }

    /// Copy a NUL-terminated user string of at most `max` bytes (without
    /// the terminator).
    pub fn read_user_cstr(&self, va: u32, max: usize) -> Result<Vec<u8>, ProcessError> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        let mut chunk = vec![0u8; PAGE_SIZE];
        let mut cur = va;
        loop {
            let room = PAGE_SIZE - VirtAddr::new(cur).page_offset();
            let want = room.min(max + 1 - out.len());
            inner.space.read(VirtAddr::new(cur), &mut chunk[..want])?;
            if let Some(nul) = chunk[..want].iter().position(|&b| b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..want]);
            if out.len() > max {
                return Err(ProcessError::StringTooLong);
            }
            cur = cur.checked_add(want as u32).ok_or(MapError::Overflow)?;
        }
    }

    /// Number of resident private pages.
    pub fn private_pages(&self) -> usize {
        self.inner.lock().space.private_pages()
    }

    /// Number of open file descriptors.
    pub fn open_files(&self) -> usize {
        self.inner.lock().files.occupied()
    }

    /// Number of live semaphore handles.
    pub fn semaphores(&self) -> usize {
        self.inner.lock().sems.occupied()
    }

    /// Number of unwaited children.
    pub fn children(&self) -> usize {
        self.inner.lock().children.occupied()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        log::debug!("process {}: released", self.pid);
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Process({})", self.pid)
    }
}

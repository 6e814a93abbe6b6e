//! Host-side test doubles for the kernel collaborators.

use std::collections::BTreeMap;
use std::string::String;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::Thread;
use std::vec::Vec;

use crate::config::KernelConfig;
use crate::fs::{Console, FileSystem, Node};
use crate::kernel::Kernel;
use crate::mm::{FramePool, SharedRegion};
use crate::process::Process;
use crate::sched::{Scheduler, ThreadId, UserContext};
use crate::syscall::{dispatch, SyscallOutcome, TrapFrame};

static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

std::thread_local! {
    static THREAD_ID: ThreadId = ThreadId(NEXT_THREAD.fetch_add(1, Ordering::Relaxed));
}

/// Scheduler that runs on host threads and records spawned user threads.
///
/// Blocking parks the host thread; every block and wake is counted.
#[derive(Default)]
pub struct HostScheduler {
    spawned: Mutex<Vec<(Arc<Process>, UserContext)>>,
    threads: Mutex<BTreeMap<ThreadId, Thread>>,
    blocks: AtomicUsize,
    woken: Mutex<Vec<ThreadId>>,
}

impl HostScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spawned(&self) -> Vec<(Arc<Process>, UserContext)> {
        self.spawned.lock().unwrap().clone()
    }

    /// Number of times any thread blocked.
    pub fn blocks(&self) -> usize {
        self.blocks.load(Ordering::SeqCst)
    }

    /// Every thread woken so far, in order.
    pub fn woken(&self) -> Vec<ThreadId> {
        self.woken.lock().unwrap().clone()
    }
}

impl Scheduler for HostScheduler {
    fn current(&self) -> ThreadId {
        let id = THREAD_ID.with(|id| *id);
        self.threads
            .lock()
            .unwrap()
            .entry(id)
            .or_insert_with(std::thread::current);
        id
    }

    fn block_current(&self) {
        self.blocks.fetch_add(1, Ordering::SeqCst);
        std::thread::park();
    }

    fn wake(&self, thread: ThreadId) {
        self.woken.lock().unwrap().push(thread);
        if let Some(handle) = self.threads.lock().unwrap().get(&thread) {
            handle.unpark();
        }
    }

    fn spawn_user(&self, process: Arc<Process>, context: UserContext) {
        self.spawned.lock().unwrap().push((process, context));
    }

    fn switch_to_user(&self, context: UserContext) -> ! {
        panic!("switch_to_user({:?})", context)
    }

    fn stop(&self) -> ! {
        panic!("stop")
    }

    fn shutdown(&self) -> ! {
        panic!("shutdown")
    }

    fn halt(&self, reason: &str) -> ! {
        panic!("halt: {}", reason)
    }
}

/// Console that keeps everything written to it.
#[derive(Default)]
pub struct CaptureConsole {
    buf: Mutex<Vec<u8>>,
}

impl CaptureConsole {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().unwrap().clone()
    }
}

impl Console for CaptureConsole {
    fn write_bytes(&self, bytes: &[u8]) {
        self.buf.lock().unwrap().extend_from_slice(bytes);
    }
}

enum MemKind {
    File,
    Dir,
    Symlink,
}

struct MemNode {
    kind: MemKind,
    data: Vec<u8>,
}

impl Node for MemNode {
    fn read_all(&self, offset: u32, buf: &mut [u8]) -> usize {
        let start = (offset as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        n
    }

    fn size_in_bytes(&self) -> u32 {
        self.data.len() as u32
    }

    fn is_file(&self) -> bool {
        matches!(self.kind, MemKind::File)
    }

    fn is_dir(&self) -> bool {
        matches!(self.kind, MemKind::Dir)
    }

    fn is_symlink(&self) -> bool {
        matches!(self.kind, MemKind::Symlink)
    }

    fn get_symbol(&self, buf: &mut [u8]) -> usize {
        self.read_all(0, buf)
    }
}

/// Flat in-memory filesystem keyed by absolute path.
#[derive(Default)]
pub struct MemFs {
    nodes: Mutex<BTreeMap<String, Arc<MemNode>>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, path: &str, kind: MemKind, data: &[u8]) {
        let node = Arc::new(MemNode {
            kind,
            data: data.to_vec(),
        });
        self.nodes.lock().unwrap().insert(path.into(), node);
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        self.add(path, MemKind::File, data);
    }

    pub fn add_dir(&self, path: &str) {
        self.add(path, MemKind::Dir, &[]);
    }

    pub fn add_symlink(&self, path: &str, target: &str) {
        self.add(path, MemKind::Symlink, target.as_bytes());
    }
}

impl FileSystem for MemFs {
    fn find(&self, path: &str) -> Option<Arc<dyn Node>> {
        let node: Arc<dyn Node> = self.nodes.lock().unwrap().get(path)?.clone();
        Some(node)
    }
}

/// Builds minimal ELF32 executables.
pub struct ElfBuilder {
    entry: u32,
    // (type, vaddr, data, memsz)
    segments: Vec<(u32, u32, Vec<u8>, u32)>,
}

impl ElfBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    /// Add a `PT_LOAD` segment.
    pub fn segment(mut self, vaddr: u32, data: &[u8], memsz: u32) -> Self {
        self.segments.push((1, vaddr, data.to_vec(), memsz));
        self
    }

    /// Add a `PT_NOTE` segment, which the loader must skip.
    pub fn note(mut self, vaddr: u32) -> Self {
        self.segments.push((4, vaddr, b"note".to_vec(), 4));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phoff = 52u32;
        let data_start = phoff + 32 * self.segments.len() as u32;

        let mut out = Vec::new();
        out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1, 0]);
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&2u16.to_le_bytes()); // e_type
        out.extend_from_slice(&3u16.to_le_bytes()); // e_machine
        out.extend_from_slice(&1u32.to_le_bytes()); // e_version
        out.extend_from_slice(&self.entry.to_le_bytes());
        out.extend_from_slice(&phoff.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&52u16.to_le_bytes()); // e_ehsize
        out.extend_from_slice(&32u16.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&(self.segments.len() as u16).to_le_bytes());
        out.extend_from_slice(&[0; 6]); // e_shentsize, e_shnum, e_shstrndx
        assert_eq!(out.len(), 52);

        let mut offset = data_start;
        for (p_type, vaddr, data, memsz) in &self.segments {
            for word in [*p_type, offset, *vaddr, *vaddr, data.len() as u32, *memsz, 7, 0x1000] {
                out.extend_from_slice(&word.to_le_bytes());
            }
            offset += data.len() as u32;
        }
        for (_, _, data, _) in &self.segments {
            out.extend_from_slice(data);
        }
        out
    }
}

/// A kernel wired to host doubles.
pub struct Fixture {
    pub kernel: Kernel,
    pub frames: Arc<FramePool>,
    pub sched: Arc<HostScheduler>,
    pub console: Arc<CaptureConsole>,
    pub fs: Arc<MemFs>,
}

impl Fixture {
    /// Where `syscall` pretends the trap came from.
    pub const USER_PC: u32 = 0x8000_1000;
    /// User stack pointer used by `syscall`.
    pub const USER_ESP: u32 = 0xE000_0000;

    pub fn new() -> Self {
        let frames = Arc::new(FramePool::with_capacity(1024).unwrap());
        let shared = SharedRegion::identity_map(&*frames, 0x0040_0000).unwrap();
        let sched = HostScheduler::new();
        let console = CaptureConsole::new();
        let fs = Arc::new(MemFs::new());
        let kernel = Kernel::new(
            KernelConfig::default(),
            frames.clone(),
            shared,
            fs.clone(),
            sched.clone(),
            console.clone(),
        );
        Self {
            kernel,
            frames,
            sched,
            console,
            fs,
        }
    }

    pub fn node(&self, path: &str) -> Arc<dyn Node> {
        self.fs.find(path).unwrap()
    }

    pub fn init_process(&self) -> Arc<Process> {
        Process::new_init(&self.kernel).unwrap()
    }

    /// Lay out `args` as words 1.. on `process`'s stack and build the frame.
    pub fn frame(&self, process: &Process, nr: u32, args: &[u32]) -> TrapFrame {
        process.write_user_u32(Self::USER_ESP, 0).unwrap();
        for (i, &arg) in args.iter().enumerate() {
            process
                .write_user_u32(Self::USER_ESP + 4 * (i as u32 + 1), arg)
                .unwrap();
        }
        TrapFrame {
            eax: nr,
            user_pc: Self::USER_PC,
            user_esp: Self::USER_ESP,
        }
    }

    /// Issue system call `nr` from `process`.
    pub fn syscall(&self, process: &Arc<Process>, nr: u32, args: &[u32]) -> SyscallOutcome {
        let frame = self.frame(process, nr, args);
        dispatch(&self.kernel, process, &frame)
    }
}

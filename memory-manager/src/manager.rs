use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    thread::JoinHandle,
    time::Duration,
};

use backing_store::{spill_name, BackingStore};
use log::{error, info, warn};
use physical_memory::PhysicalMemory;

use crate::{
    frame_table::FrameTable,
    page_table::PageTableEntry,
    process::{Mailbox, Process, ProcessCommand},
    runtime::{self, RunMode},
    tlb::Tlb,
    MemoryManagerError,
};

/// How long a dispatched command may take before the caller gives up and
/// force-terminates the target process.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// The outcome of one successful address translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Translation {
    pub value: u8,
    pub frame_number: usize,
    pub tlb_hit: bool,
    pub faulted: bool,
}

#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: usize,
    pub memory_size: usize,
    pub pages: usize,
}

#[derive(Debug, Clone)]
pub struct PageInfo {
    pub page_number: usize,
    pub valid: bool,
    pub resident: bool,
    pub frame_number: usize,
    pub backing_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub frame_number: usize,
    pub allocated: bool,
    pub owner: Option<(usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct TlbInfo {
    pub slot: usize,
    pub pid: usize,
    pub page_number: usize,
    pub frame_number: usize,
}

#[derive(Debug, Clone)]
pub struct SpillInfo {
    pub pid: usize,
    pub page_number: usize,
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct MemoryStatus {
    pub frames: Vec<FrameInfo>,
    pub tlb: Vec<TlbInfo>,
    pub spilled: Vec<SpillInfo>,
    pub swap_dir: PathBuf,
    pub swap_files: usize,
    pub swap_bytes: u64,
}

/// Everything the memory lock guards: the frame bank, the frame table, the
/// TLB, every process's page table, and the swap area bookkeeping.
struct MemoryState<const NUM_FRAMES: usize, const PAGE_SIZE: usize, const TLB_SIZE: usize> {
    memory: PhysicalMemory<NUM_FRAMES, PAGE_SIZE>,
    frames: FrameTable<NUM_FRAMES>,
    tlb: Tlb<TLB_SIZE>,
    processes: Vec<Process>,
    backing: BackingStore,
    next_spill: u64,
}

/// Orchestrates process creation, growth, address translation, page-fault
/// handling, and teardown over a shared bank of physical frames.
///
/// All mutating operations serialize on one memory lock; translation holds
/// it for the whole lookup-and-fault path. Process threads are registered
/// here and joined at shutdown.
pub struct MemoryManager<const NUM_FRAMES: usize, const PAGE_SIZE: usize, const TLB_SIZE: usize> {
    state: Mutex<MemoryState<NUM_FRAMES, PAGE_SIZE, TLB_SIZE>>,
    threads: Mutex<HashMap<usize, JoinHandle<()>>>,
    stop: AtomicBool,
    mode: RunMode,
    // handle on ourselves so process threads can be given the manager
    weak: Weak<Self>,
}

impl<const NUM_FRAMES: usize, const PAGE_SIZE: usize, const TLB_SIZE: usize>
    MemoryState<NUM_FRAMES, PAGE_SIZE, TLB_SIZE>
{
    /// Finds a frame for a faulting or freshly allocated page: a free frame
    /// if one exists, otherwise the next FIFO victim after spilling it.
    fn acquire_frame(&mut self) -> Result<usize, MemoryManagerError> {
        if let Some(frame_number) = self.frames.find_free() {
            return Ok(frame_number);
        }
        if NUM_FRAMES == 0 {
            return Err(MemoryManagerError::OutOfMemory);
        }
        Ok(self.evict_victim())
    }

    /// FIFO page replacement: the next frame in rotation is spilled to the
    /// backing store regardless of which process owns it.
    fn evict_victim(&mut self) -> usize {
        let frame_number = self.frames.next_victim();
        match self.frames.owner_of(frame_number) {
            Some((pid, page_number)) => {
                let filename = spill_name(pid, page_number, self.next_spill);
                self.next_spill += 1;
                info!(
                    "Swapping out: process {}, page {} from frame {} to {}",
                    pid, page_number, frame_number, filename
                );
                match self.memory.frame(frame_number) {
                    Ok(frame) => {
                        if let Err(e) = self.backing.spill(&filename, frame) {
                            error!("Failed to spill frame {} to {}: {}", frame_number, filename, e);
                        }
                    }
                    Err(e) => error!("Cannot read frame {} for spilling: {:?}", frame_number, e),
                }
                self.processes[pid].page_table[page_number].spill_to(filename);
                self.tlb.invalidate_frame(frame_number);
            }
            None => {
                warn!(
                    "Frame {} is marked allocated but no page table claims it; reclaiming",
                    frame_number
                );
            }
        }
        self.frames.release(frame_number);
        frame_number
    }

    /// Makes `page_number` of `pid` resident in `frame_number`: restores the
    /// page's spill file if it has one (deleting it afterwards), otherwise
    /// hands the page a zeroed frame. Installs the TLB entry.
    fn place_page(&mut self, pid: usize, page_number: usize, frame_number: usize) {
        let entry = &mut self.processes[pid].page_table[page_number];
        entry.valid = true;
        match entry.swap_in(frame_number) {
            Some(filename) => {
                info!(
                    "Swapping in: process {}, page {} from {} to frame {}",
                    pid, page_number, filename, frame_number
                );
                match self.memory.frame_mut(frame_number) {
                    Ok(frame) => {
                        if let Err(e) = self.backing.restore(&filename, frame) {
                            error!("Failed to restore {}: {}; zero-filling page", filename, e);
                            frame.fill(0);
                        }
                    }
                    Err(e) => error!("Cannot write frame {} for restore: {:?}", frame_number, e),
                }
                if let Err(e) = self.backing.remove(&filename) {
                    warn!("Failed to remove spill file {}: {}", filename, e);
                }
            }
            None => {
                if let Err(e) = self.memory.zero_frame(frame_number) {
                    error!("Failed to zero frame {}: {:?}", frame_number, e);
                }
            }
        }
        self.frames.claim(frame_number, pid, page_number);
        self.tlb.insert(pid, page_number, frame_number);
    }

    /// Returns every frame and spill file a process holds; shared by
    /// termination and allocation rollback.
    fn release_process(&mut self, pid: usize) {
        for page_number in 0..self.processes[pid].page_table.len() {
            let entry = &mut self.processes[pid].page_table[page_number];
            if !entry.valid {
                continue;
            }
            if entry.resident {
                let frame_number = entry.frame_number;
                entry.resident = false;
                self.frames.release(frame_number);
            }
            if let Some(filename) = entry.backing_file.take() {
                if let Err(e) = self.backing.remove(&filename) {
                    warn!("Failed to remove spill file {}: {}", filename, e);
                }
            }
        }
        self.tlb.invalidate_process(pid);
    }
}

impl<const NUM_FRAMES: usize, const PAGE_SIZE: usize, const TLB_SIZE: usize>
    MemoryManager<NUM_FRAMES, PAGE_SIZE, TLB_SIZE>
{
    pub fn init(swap_dir: impl Into<PathBuf>, mode: RunMode) -> Result<Arc<Self>, std::io::Error> {
        let backing = BackingStore::init(swap_dir)?;
        info!(
            "Memory manager ready: {} frames of {} bytes, {}-entry TLB",
            NUM_FRAMES, PAGE_SIZE, TLB_SIZE
        );
        Ok(Arc::new_cyclic(|weak| Self {
            state: Mutex::new(MemoryState {
                memory: PhysicalMemory::init(),
                frames: FrameTable::init(),
                tlb: Tlb::init(),
                processes: Vec::new(),
                backing,
                next_spill: 0,
            }),
            threads: Mutex::new(HashMap::new()),
            stop: AtomicBool::new(false),
            mode,
            weak: weak.clone(),
        }))
    }

    /// Smallest allocation that creates a process: two pages.
    pub fn min_process_mem() -> usize {
        2 * PAGE_SIZE
    }

    /// Smallest growth request: one page.
    pub fn min_request_mem() -> usize {
        PAGE_SIZE
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn stop_flag(&self) -> &AtomicBool {
        &self.stop
    }

    fn page_count(requested_bytes: usize) -> usize {
        requested_bytes / PAGE_SIZE
            + if requested_bytes % PAGE_SIZE == 0 {
                0
            } else {
                1
            }
    }

    /// Creates a process and makes all of its pages resident, evicting
    /// other pages if the frame bank is full. Returns the new pid.
    pub fn allocate(&self, requested_bytes: usize) -> Result<usize, MemoryManagerError> {
        if requested_bytes < Self::min_process_mem() {
            return Err(MemoryManagerError::InvalidSize);
        }
        let pages = Self::page_count(requested_bytes);
        let mut state = self.state.lock().unwrap();
        let pid = state.processes.len();
        let mut process = Process::init(pid, requested_bytes);
        process
            .page_table
            .resize_with(pages, PageTableEntry::default);
        state.processes.push(process);

        for page_number in 0..pages {
            let frame_number = match state.acquire_frame() {
                Ok(frame_number) => frame_number,
                Err(e) => {
                    state.release_process(pid);
                    state.processes.pop();
                    return Err(e);
                }
            };
            state.place_page(pid, page_number, frame_number);
        }
        info!(
            "Created process {} with {} bytes over {} pages",
            pid, requested_bytes, pages
        );
        Ok(pid)
    }

    /// Appends pages to an existing process, allocating a frame per page
    /// exactly as `allocate` does.
    pub fn grow(&self, pid: usize, requested_bytes: usize) -> Result<(), MemoryManagerError> {
        if requested_bytes < Self::min_request_mem() {
            return Err(MemoryManagerError::InvalidSize);
        }
        let mut state = self.state.lock().unwrap();
        if pid >= state.processes.len() || !state.processes[pid].is_running() {
            return Err(MemoryManagerError::UnknownProcess);
        }
        let new_pages = Self::page_count(requested_bytes);
        let first = state.processes[pid].page_table.len();
        state.processes[pid]
            .page_table
            .resize_with(first + new_pages, PageTableEntry::default);
        state.processes[pid].memory_size += requested_bytes;

        for page_number in first..first + new_pages {
            let frame_number = state.acquire_frame()?;
            state.place_page(pid, page_number, frame_number);
        }
        Ok(())
    }

    /// Resolves a logical address to the byte it designates, faulting the
    /// page in if it is not resident. The memory lock is held for the whole
    /// lookup-and-fault path.
    pub fn translate(
        &self,
        pid: usize,
        logical_address: usize,
    ) -> Result<Translation, MemoryManagerError> {
        let mut state = self.state.lock().unwrap();
        if pid >= state.processes.len() || !state.processes[pid].is_running() {
            return Err(MemoryManagerError::UnknownProcess);
        }
        let page_number = logical_address / PAGE_SIZE;
        let offset = logical_address % PAGE_SIZE;

        if let Some(frame_number) = state.tlb.lookup(pid, page_number) {
            let value = state
                .memory
                .read_byte(frame_number, offset)
                .map_err(|_| MemoryManagerError::OutOfRangePage)?;
            return Ok(Translation {
                value,
                frame_number,
                tlb_hit: true,
                faulted: false,
            });
        }

        let (valid, resident, resident_frame) =
            match state.processes[pid].page_table.get(page_number) {
                Some(entry) => (entry.valid, entry.resident, entry.frame_number),
                None => return Err(MemoryManagerError::OutOfRangePage),
            };
        if !valid {
            return Err(MemoryManagerError::OutOfRangePage);
        }

        let (frame_number, faulted) = if resident {
            state.tlb.insert(pid, page_number, resident_frame);
            (resident_frame, false)
        } else {
            let frame_number = state.acquire_frame()?;
            state.place_page(pid, page_number, frame_number);
            (frame_number, true)
        };
        let value = state
            .memory
            .read_byte(frame_number, offset)
            .map_err(|_| MemoryManagerError::OutOfRangePage)?;
        Ok(Translation {
            value,
            frame_number,
            tlb_hit: false,
            faulted,
        })
    }

    /// Frees every frame the process holds, deletes its pending spill files,
    /// and marks it terminated. Idempotent: unknown or already-terminated
    /// pids are a no-op.
    pub fn terminate(&self, pid: usize) {
        let mut state = self.state.lock().unwrap();
        if pid >= state.processes.len() || !state.processes[pid].is_running() {
            return;
        }
        state.release_process(pid);
        state.processes[pid].mailbox.shut_down();
        info!("Process {} terminated", pid);
    }

    fn mailbox_of(&self, pid: usize) -> Result<Arc<Mailbox>, MemoryManagerError> {
        let state = self.state.lock().unwrap();
        match state.processes.get(pid) {
            Some(process) if process.is_running() => Ok(Arc::clone(&process.mailbox)),
            _ => Err(MemoryManagerError::UnknownProcess),
        }
    }

    /// Queues a command on the process's mailbox in FIFO order.
    pub fn dispatch(&self, pid: usize, command: ProcessCommand) -> Result<(), MemoryManagerError> {
        let mailbox = self.mailbox_of(pid)?;
        mailbox.push(command);
        Ok(())
    }

    /// Queues a command and waits for its completion signal. A process that
    /// does not respond within `timeout` is force-terminated and Ok(false)
    /// is returned, so a dead thread cannot hang the caller.
    pub fn dispatch_and_wait(
        &self,
        pid: usize,
        command: ProcessCommand,
        timeout: Duration,
    ) -> Result<bool, MemoryManagerError> {
        let mailbox = self.mailbox_of(pid)?;
        mailbox.begin_command();
        mailbox.push(command);
        if mailbox.wait_completion(timeout) {
            Ok(true)
        } else {
            warn!(
                "Process {} did not respond within {:?}; forcing termination",
                pid, timeout
            );
            self.terminate(pid);
            Ok(false)
        }
    }

    /// Allocates a process and starts its thread.
    pub fn spawn_process(&self, requested_bytes: usize) -> Result<usize, MemoryManagerError> {
        let pid = self.allocate(requested_bytes)?;
        self.spawn_thread(pid);
        Ok(pid)
    }

    /// Starts the runtime thread for an existing process and registers its
    /// join handle.
    pub fn spawn_thread(&self, pid: usize) {
        if self.stopping() {
            return;
        }
        let mailbox = match self.mailbox_of(pid) {
            Ok(mailbox) => mailbox,
            Err(_) => return,
        };
        let manager = match self.weak.upgrade() {
            Some(manager) => manager,
            None => return,
        };
        let handle = std::thread::spawn(move || runtime::process_loop(manager, pid, mailbox));
        self.threads.lock().unwrap().insert(pid, handle);
    }

    /// Seeds `count` processes with threads; the initial load of autonomous
    /// mode.
    pub fn start_activity(&self, count: usize) {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..count {
            let bytes = Self::min_process_mem() + rng.gen_range(0..4) * PAGE_SIZE;
            match self.spawn_process(bytes) {
                Ok(pid) => info!("Started initial process {} with {} bytes", pid, bytes),
                Err(e) => warn!("Failed to start initial process: {:?}", e),
            }
        }
    }

    /// Stops every process runtime, terminates all remaining processes, and
    /// removes the swap directory. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping all processes");
        let mailboxes: Vec<Arc<Mailbox>> = {
            let state = self.state.lock().unwrap();
            state
                .processes
                .iter()
                .map(|process| Arc::clone(&process.mailbox))
                .collect()
        };
        for mailbox in &mailboxes {
            mailbox.wake();
        }
        self.join_threads();

        let pids: Vec<usize> = {
            let state = self.state.lock().unwrap();
            state
                .processes
                .iter()
                .filter(|process| process.is_running())
                .map(|process| process.pid)
                .collect()
        };
        for pid in pids {
            self.terminate(pid);
        }
        // threads spawned while the stop flag was being raised
        self.join_threads();

        let state = self.state.lock().unwrap();
        if let Err(e) = state.backing.purge() {
            warn!("Failed to remove swap directory: {}", e);
        }
        info!("All processes stopped");
    }

    fn join_threads(&self) {
        let handles: Vec<(usize, JoinHandle<()>)> =
            self.threads.lock().unwrap().drain().collect();
        let current = std::thread::current().id();
        for (pid, handle) in handles {
            // a process thread ending itself cannot join itself
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("Thread for process {} panicked", pid);
            }
        }
    }

    pub fn is_running(&self, pid: usize) -> bool {
        let state = self.state.lock().unwrap();
        state
            .processes
            .get(pid)
            .map(|process| process.is_running())
            .unwrap_or(false)
    }

    pub fn memory_size_of(&self, pid: usize) -> Option<usize> {
        let state = self.state.lock().unwrap();
        state
            .processes
            .get(pid)
            .filter(|process| process.is_running())
            .map(|process| process.memory_size)
    }

    pub fn list_processes(&self) -> Vec<ProcessInfo> {
        let state = self.state.lock().unwrap();
        state
            .processes
            .iter()
            .filter(|process| process.is_running())
            .map(|process| ProcessInfo {
                pid: process.pid,
                memory_size: process.memory_size,
                pages: process.page_table.len(),
            })
            .collect()
    }

    /// The page table of one running process, page by page.
    pub fn process_pages(&self, pid: usize) -> Option<Vec<PageInfo>> {
        let state = self.state.lock().unwrap();
        let process = state.processes.get(pid).filter(|p| p.is_running())?;
        Some(
            process
                .page_table
                .iter()
                .enumerate()
                .map(|(page_number, entry)| PageInfo {
                    page_number,
                    valid: entry.valid,
                    resident: entry.resident,
                    frame_number: entry.frame_number,
                    backing_file: entry.backing_file.clone(),
                })
                .collect(),
        )
    }

    /// A consistent snapshot of the frame table, the TLB, and the swap area.
    pub fn memory_status(&self) -> MemoryStatus {
        let state = self.state.lock().unwrap();
        let frames = (0..NUM_FRAMES)
            .map(|frame_number| FrameInfo {
                frame_number,
                allocated: state.frames.is_allocated(frame_number),
                owner: state.frames.owner_of(frame_number),
            })
            .collect();
        let tlb = state
            .tlb
            .entries()
            .map(|(slot, entry)| TlbInfo {
                slot,
                pid: entry.pid,
                page_number: entry.page_number,
                frame_number: entry.frame_number,
            })
            .collect();
        let mut spilled = Vec::new();
        for process in state.processes.iter().filter(|p| p.is_running()) {
            for (page_number, entry) in process.page_table.iter().enumerate() {
                if let Some(filename) = &entry.backing_file {
                    spilled.push(SpillInfo {
                        pid: process.pid,
                        page_number,
                        filename: filename.clone(),
                    });
                }
            }
        }
        let (swap_files, swap_bytes) = match state.backing.files() {
            Ok(files) => (files.len(), files.iter().map(|(_, size)| size).sum()),
            Err(e) => {
                warn!("Cannot inspect swap directory: {}", e);
                (0, 0)
            }
        };
        MemoryStatus {
            frames,
            tlb,
            spilled,
            swap_dir: state.backing.dir().to_path_buf(),
            swap_files,
            swap_bytes,
        }
    }
}

impl<const NUM_FRAMES: usize, const PAGE_SIZE: usize, const TLB_SIZE: usize> Drop
    for MemoryManager<NUM_FRAMES, PAGE_SIZE, TLB_SIZE>
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

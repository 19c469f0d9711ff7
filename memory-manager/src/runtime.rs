use std::{sync::Arc, time::Duration};

use log::{info, warn};
use rand::Rng;

use crate::{
    manager::MemoryManager,
    process::{Mailbox, ProcessCommand},
};

/// How process threads behave between submitted commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunMode {
    /// Block on the command queue and execute only what is submitted.
    Driven,
    /// Poll the queue briefly, otherwise generate weighted-random load.
    Autonomous,
}

/// Bounded wait autonomous threads spend on their queue between actions;
/// also the upper bound on how long they take to notice the stop flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The body of one process thread. Runs until the process ends itself, is
/// terminated, or the manager shuts down.
pub(crate) fn process_loop<const NUM_FRAMES: usize, const PAGE_SIZE: usize, const TLB_SIZE: usize>(
    manager: Arc<MemoryManager<NUM_FRAMES, PAGE_SIZE, TLB_SIZE>>,
    pid: usize,
    mailbox: Arc<Mailbox>,
) {
    match manager.mode() {
        RunMode::Driven => run_driven(&manager, pid, &mailbox),
        RunMode::Autonomous => run_autonomous(&manager, pid, &mailbox),
    }
}

fn run_driven<const NUM_FRAMES: usize, const PAGE_SIZE: usize, const TLB_SIZE: usize>(
    manager: &MemoryManager<NUM_FRAMES, PAGE_SIZE, TLB_SIZE>,
    pid: usize,
    mailbox: &Mailbox,
) {
    while let Some(command) = mailbox.pop_blocking(manager.stop_flag()) {
        let ended = execute(manager, pid, command);
        mailbox.finish_command();
        if ended {
            return;
        }
    }
}

fn run_autonomous<const NUM_FRAMES: usize, const PAGE_SIZE: usize, const TLB_SIZE: usize>(
    manager: &MemoryManager<NUM_FRAMES, PAGE_SIZE, TLB_SIZE>,
    pid: usize,
    mailbox: &Mailbox,
) {
    let mut rng = rand::thread_rng();
    loop {
        if manager.stopping() || !mailbox.is_running() {
            return;
        }
        if let Some(command) = mailbox.pop_timeout(POLL_INTERVAL) {
            let ended = execute(manager, pid, command);
            mailbox.finish_command();
            if ended {
                return;
            }
            continue;
        }
        if manager.stopping() || !mailbox.is_running() {
            return;
        }

        match rng.gen_range(0..100) {
            // request additional memory (20%)
            0..=19 => {
                let bytes = MemoryManager::<NUM_FRAMES, PAGE_SIZE, TLB_SIZE>::min_request_mem()
                    + rng.gen_range(0..4) * PAGE_SIZE;
                match manager.grow(pid, bytes) {
                    Ok(()) => info!("Process {} requested {} bytes of memory", pid, bytes),
                    Err(e) => warn!("Process {} failed to grow by {} bytes: {:?}", pid, bytes, e),
                }
            }
            // access a random valid address (60%)
            20..=79 => {
                if let Some(size) = manager.memory_size_of(pid).filter(|size| *size > 0) {
                    let address = rng.gen_range(0..size);
                    match manager.translate(pid, address) {
                        Ok(translation) => info!(
                            "Process {} accessed address {}, value: {}",
                            pid, address, translation.value
                        ),
                        Err(e) => warn!(
                            "Process {} failed to access address {}: {:?}",
                            pid, address, e
                        ),
                    }
                }
            }
            // end itself (10%)
            80..=89 => {
                info!("Process {} ending itself", pid);
                manager.terminate(pid);
                return;
            }
            // spawn a brand-new process with its own thread (10%)
            _ => {
                let bytes = MemoryManager::<NUM_FRAMES, PAGE_SIZE, TLB_SIZE>::min_process_mem()
                    + rng.gen_range(0..4) * PAGE_SIZE;
                match manager.spawn_process(bytes) {
                    Ok(new_pid) => info!(
                        "Process {} started new process {} with {} bytes",
                        pid, new_pid, bytes
                    ),
                    Err(e) => warn!("Process {} failed to spawn a process: {:?}", pid, e),
                }
            }
        }
    }
}

/// Executes one command against the manager. Returns true when the command
/// ends the process and the thread must exit.
fn execute<const NUM_FRAMES: usize, const PAGE_SIZE: usize, const TLB_SIZE: usize>(
    manager: &MemoryManager<NUM_FRAMES, PAGE_SIZE, TLB_SIZE>,
    pid: usize,
    command: ProcessCommand,
) -> bool {
    match command {
        ProcessCommand::RequestMemory(bytes) => {
            match manager.grow(pid, bytes) {
                Ok(()) => info!(
                    "Process {} requested {} bytes of memory, result: success",
                    pid, bytes
                ),
                Err(e) => warn!(
                    "Process {} requested {} bytes of memory, result: failure ({:?})",
                    pid, bytes, e
                ),
            }
            false
        }
        ProcessCommand::AccessMemory(address) => {
            match manager.translate(pid, address) {
                Ok(translation) => info!(
                    "Process {} accessed address {}, value: {}",
                    pid, address, translation.value
                ),
                Err(e) => warn!(
                    "Process {} failed to access address {}: {:?}",
                    pid, address, e
                ),
            }
            false
        }
        ProcessCommand::EndProcess => {
            info!("Process {} ending itself", pid);
            manager.terminate(pid);
            true
        }
    }
}

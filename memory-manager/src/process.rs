use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    time::Duration,
};

use crate::page_table::PageTableEntry;

/// A unit of work submitted to a process's command queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProcessCommand {
    RequestMemory(usize),
    AccessMemory(usize),
    EndProcess,
}

/// The channel between the manager (or CLI) and one process thread: the
/// inbound command queue, the completion signal for waiting submitters, and
/// the running flag.
///
/// Queue and completion state have their own locks; neither is ever held
/// while the manager's memory lock is taken.
pub struct Mailbox {
    queue: Mutex<VecDeque<ProcessCommand>>,
    available: Condvar,
    completed: Mutex<bool>,
    completion: Condvar,
    running: AtomicBool,
}

impl Mailbox {
    pub fn init() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            completed: Mutex::new(false),
            completion: Condvar::new(),
            running: AtomicBool::new(true),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Marks the process terminated and wakes its thread and any waiter.
    pub fn shut_down(&self) {
        {
            let _queue = self.queue.lock().unwrap();
            self.running.store(false, Ordering::SeqCst);
            self.available.notify_all();
        }
        let _completed = self.completed.lock().unwrap();
        self.completion.notify_all();
    }

    /// Wakes the thread without changing any state, so it can observe a
    /// risen stop flag.
    pub fn wake(&self) {
        let _queue = self.queue.lock().unwrap();
        self.available.notify_all();
    }

    pub fn push(&self, command: ProcessCommand) {
        let mut queue = self.queue.lock().unwrap();
        queue.push_back(command);
        self.available.notify_one();
    }

    /// Blocks until a command arrives, the stop flag rises, or the process
    /// stops running. Driven-mode threads live here between commands.
    pub fn pop_blocking(&self, stop: &AtomicBool) -> Option<ProcessCommand> {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if stop.load(Ordering::SeqCst) || !self.is_running() {
                return None;
            }
            if let Some(command) = queue.pop_front() {
                return Some(command);
            }
            queue = self.available.wait(queue).unwrap();
        }
    }

    /// Waits up to `timeout` for a command; the bounded poll of autonomous
    /// threads.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<ProcessCommand> {
        let queue = self.queue.lock().unwrap();
        let (mut queue, _) = self
            .available
            .wait_timeout_while(queue, timeout, |queue| {
                queue.is_empty() && self.is_running()
            })
            .unwrap();
        queue.pop_front()
    }

    /// Clears the completion flag before a command is submitted.
    pub fn begin_command(&self) {
        *self.completed.lock().unwrap() = false;
    }

    /// Raises the completion signal for any waiting submitter.
    pub fn finish_command(&self) {
        let mut completed = self.completed.lock().unwrap();
        *completed = true;
        self.completion.notify_all();
    }

    /// Waits for the completion signal. Returns false if the process neither
    /// completed the command nor terminated within `timeout`.
    pub fn wait_completion(&self, timeout: Duration) -> bool {
        let completed = self.completed.lock().unwrap();
        let (completed, _) = self
            .completion
            .wait_timeout_while(completed, timeout, |completed| {
                !*completed && self.is_running()
            })
            .unwrap();
        *completed || !self.is_running()
    }
}

/// One simulated process: its identity, its page table (indexed by page
/// number, grow-only), the logical memory size backing random access
/// generation, and the mailbox shared with its thread.
pub struct Process {
    pub pid: usize,
    pub memory_size: usize,
    pub page_table: Vec<PageTableEntry>,
    pub mailbox: Arc<Mailbox>,
}

impl Process {
    pub fn init(pid: usize, memory_size: usize) -> Self {
        Self {
            pid,
            memory_size,
            page_table: Vec::new(),
            mailbox: Arc::new(Mailbox::init()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.mailbox.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn commands_pop_in_submission_order() {
        let mailbox = Mailbox::init();
        let stop = AtomicBool::new(false);
        mailbox.push(ProcessCommand::RequestMemory(4096));
        mailbox.push(ProcessCommand::AccessMemory(17));
        mailbox.push(ProcessCommand::EndProcess);
        assert_eq!(
            mailbox.pop_blocking(&stop),
            Some(ProcessCommand::RequestMemory(4096))
        );
        assert_eq!(
            mailbox.pop_blocking(&stop),
            Some(ProcessCommand::AccessMemory(17))
        );
        assert_eq!(mailbox.pop_blocking(&stop), Some(ProcessCommand::EndProcess));
    }

    #[test]
    fn pop_blocking_returns_none_after_shut_down() {
        let mailbox = Arc::new(Mailbox::init());
        let stop = Arc::new(AtomicBool::new(false));
        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            let stop = Arc::clone(&stop);
            thread::spawn(move || mailbox.pop_blocking(&stop))
        };
        thread::sleep(Duration::from_millis(50));
        mailbox.shut_down();
        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn pop_timeout_expires_on_empty_queue() {
        let mailbox = Mailbox::init();
        assert_eq!(mailbox.pop_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn completion_signal_reaches_waiter() {
        let mailbox = Arc::new(Mailbox::init());
        mailbox.begin_command();
        let signaller = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                mailbox.finish_command();
            })
        };
        assert!(mailbox.wait_completion(Duration::from_secs(2)));
        signaller.join().unwrap();
    }

    #[test]
    fn wait_completion_times_out_without_signal() {
        let mailbox = Mailbox::init();
        mailbox.begin_command();
        assert!(!mailbox.wait_completion(Duration::from_millis(30)));
    }
}

/// One cached translation: a (process, page) pair resolved to a frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlbEntry {
    pub pid: usize,
    pub page_number: usize,
    pub frame_number: usize,
    pub valid: bool,
}

/// A fixed-size, flat translation-lookaside buffer shared by all processes.
///
/// Replacement is round-robin: a single write cursor advances on every
/// insertion and wraps, irrespective of how recently an entry was used.
/// Entries are keyed by process and page together; page numbers are only
/// unique within a process, so equal page numbers from different processes
/// must never alias.
pub struct Tlb<const TLB_SIZE: usize> {
    entries: [TlbEntry; TLB_SIZE],
    cursor: usize,
}

impl<const TLB_SIZE: usize> Tlb<TLB_SIZE> {
    pub fn init() -> Self {
        Self {
            entries: [TlbEntry::default(); TLB_SIZE],
            cursor: 0,
        }
    }

    pub fn lookup(&self, pid: usize, page_number: usize) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| e.valid && e.pid == pid && e.page_number == page_number)
            .map(|e| e.frame_number)
    }

    /// Installs a mapping in the next slot in rotation, evicting whatever
    /// was there.
    pub fn insert(&mut self, pid: usize, page_number: usize, frame_number: usize) {
        self.entries[self.cursor] = TlbEntry {
            pid,
            page_number,
            frame_number,
            valid: true,
        };
        self.cursor = (self.cursor + 1) % TLB_SIZE;
    }

    /// Drops any entry referencing `frame_number`; called when the frame is
    /// about to be repurposed by eviction.
    pub fn invalidate_frame(&mut self, frame_number: usize) {
        for entry in self.entries.iter_mut() {
            if entry.valid && entry.frame_number == frame_number {
                entry.valid = false;
            }
        }
    }

    /// Drops every entry belonging to `pid`; called on process termination.
    pub fn invalidate_process(&mut self, pid: usize) {
        for entry in self.entries.iter_mut() {
            if entry.valid && entry.pid == pid {
                entry.valid = false;
            }
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, &TlbEntry)> {
        self.entries.iter().enumerate().filter(|(_, e)| e.valid)
    }
}

/// Tracks which physical frames are allocated, which (process, page) pair
/// owns each one, and the FIFO rotation used to pick eviction victims.
///
/// The owner index is the reverse of the page tables: it is updated on every
/// residency change so victim selection never has to scan process state.
pub struct FrameTable<const NUM_FRAMES: usize> {
    allocated: [bool; NUM_FRAMES],
    owner: [Option<(usize, usize)>; NUM_FRAMES],
    victim_cursor: usize,
}

impl<const NUM_FRAMES: usize> FrameTable<NUM_FRAMES> {
    pub fn init() -> Self {
        Self {
            allocated: [false; NUM_FRAMES],
            owner: [None; NUM_FRAMES],
            victim_cursor: 0,
        }
    }

    pub fn find_free(&self) -> Option<usize> {
        let free = self.allocated.iter().position(|allocated| !allocated);
        if free.is_none() {
            log::debug!("No free frames");
        }
        free
    }

    /// The next frame in the FIFO rotation, advancing the cursor. The
    /// rotation runs over all frames regardless of which process owns them.
    pub fn next_victim(&mut self) -> usize {
        let frame_number = self.victim_cursor;
        self.victim_cursor = (self.victim_cursor + 1) % NUM_FRAMES;
        frame_number
    }

    pub fn claim(&mut self, frame_number: usize, pid: usize, page_number: usize) {
        self.allocated[frame_number] = true;
        self.owner[frame_number] = Some((pid, page_number));
    }

    pub fn release(&mut self, frame_number: usize) {
        self.allocated[frame_number] = false;
        self.owner[frame_number] = None;
    }

    pub fn owner_of(&self, frame_number: usize) -> Option<(usize, usize)> {
        self.owner[frame_number]
    }

    pub fn is_allocated(&self, frame_number: usize) -> bool {
        self.allocated[frame_number]
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated.iter().filter(|allocated| **allocated).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_and_release() {
        let mut frames = FrameTable::<4>::init();
        assert_eq!(frames.find_free(), Some(0));
        frames.claim(0, 0, 0);
        assert!(frames.is_allocated(0));
        assert_eq!(frames.owner_of(0), Some((0, 0)));
        assert_eq!(frames.find_free(), Some(1));

        frames.release(0);
        assert!(!frames.is_allocated(0));
        assert_eq!(frames.owner_of(0), None);
        assert_eq!(frames.find_free(), Some(0));
    }

    #[test]
    fn find_free_when_full() {
        let mut frames = FrameTable::<2>::init();
        frames.claim(0, 0, 0);
        frames.claim(1, 0, 1);
        assert_eq!(frames.find_free(), None);
        assert_eq!(frames.allocated_count(), 2);
    }

    #[test]
    fn victim_rotation_wraps() {
        let mut frames = FrameTable::<3>::init();
        assert_eq!(frames.next_victim(), 0);
        assert_eq!(frames.next_victim(), 1);
        assert_eq!(frames.next_victim(), 2);
        assert_eq!(frames.next_victim(), 0);
    }

    #[test]
    fn victim_rotation_ignores_claims() {
        let mut frames = FrameTable::<3>::init();
        frames.claim(1, 0, 0);
        assert_eq!(frames.next_victim(), 0);
        assert_eq!(frames.next_victim(), 1);
    }
}

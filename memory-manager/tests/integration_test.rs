use std::{collections::HashSet, path::Path, sync::Arc, thread, time::Duration};

use backing_store::BackingStore;
use memory_manager::{
    manager::MemoryManager, MemoryManagerError, ProcessCommand, RunMode,
};
use physical_memory::PhysicalMemory;
use rand::Rng;
use serial_test::serial;

// Four 64-byte frames and a two-entry TLB keep eviction easy to provoke.
type SmallManager = MemoryManager<4, 64, 2>;
const PAGE: usize = 64;

fn manager(dir: &str, mode: RunMode) -> Arc<SmallManager> {
    let _ = std::fs::remove_dir_all(dir);
    let _ = env_logger::builder().is_test(true).try_init();
    SmallManager::init(dir, mode).unwrap()
}

/// The set of frames marked allocated must be exactly the union of resident
/// pages across every process's page table, with no frame owned twice.
fn assert_frame_consistency<
    const NUM_FRAMES: usize,
    const PAGE_SIZE: usize,
    const TLB_SIZE: usize,
>(
    manager: &MemoryManager<NUM_FRAMES, PAGE_SIZE, TLB_SIZE>,
) {
    let status = manager.memory_status();
    let mut owned = HashSet::new();
    for info in manager.list_processes() {
        for page in manager.process_pages(info.pid).unwrap() {
            if page.resident {
                assert!(
                    owned.insert(page.frame_number),
                    "frame {} owned twice",
                    page.frame_number
                );
                assert!(status.frames[page.frame_number].allocated);
                assert_eq!(
                    status.frames[page.frame_number].owner,
                    Some((info.pid, page.page_number))
                );
            }
        }
    }
    for frame in &status.frames {
        assert_eq!(
            frame.allocated,
            owned.contains(&frame.frame_number),
            "frame {} allocation flag does not match page tables",
            frame.frame_number
        );
    }
}

#[test]
fn fresh_page_reads_zero() {
    let manager = manager("swap_it_fresh_zero", RunMode::Driven);
    let pid = manager.allocate(2 * PAGE).unwrap();
    let translation = manager.translate(pid, 0).unwrap();
    assert_eq!(translation.value, 0);
    // allocation installed the mapping, so the first access hits the TLB
    assert!(translation.tlb_hit);
    assert!(!translation.faulted);
    assert_frame_consistency(&manager);
}

#[test]
fn allocation_below_minimum_is_rejected() {
    let manager = manager("swap_it_alloc_min", RunMode::Driven);
    assert_eq!(manager.allocate(0), Err(MemoryManagerError::InvalidSize));
    assert_eq!(
        manager.allocate(PAGE),
        Err(MemoryManagerError::InvalidSize)
    );
    assert!(manager.list_processes().is_empty());
}

#[test]
fn growth_below_minimum_leaves_page_count_unchanged() {
    let manager = manager("swap_it_grow_min", RunMode::Driven);
    let pid = manager.allocate(2 * PAGE).unwrap();
    assert_eq!(
        manager.grow(pid, PAGE - 1),
        Err(MemoryManagerError::InvalidSize)
    );
    assert_eq!(manager.process_pages(pid).unwrap().len(), 2);
    assert_eq!(manager.memory_size_of(pid), Some(2 * PAGE));
}

#[test]
fn operations_on_unknown_process_fail() {
    let manager = manager("swap_it_unknown", RunMode::Driven);
    assert_eq!(
        manager.grow(7, PAGE),
        Err(MemoryManagerError::UnknownProcess)
    );
    assert_eq!(
        manager.translate(7, 0).unwrap_err(),
        MemoryManagerError::UnknownProcess
    );
    assert_eq!(
        manager.dispatch(7, ProcessCommand::AccessMemory(0)),
        Err(MemoryManagerError::UnknownProcess)
    );
}

#[test]
fn access_beyond_page_table_is_out_of_range() {
    let manager = manager("swap_it_out_of_range", RunMode::Driven);
    let pid = manager.allocate(2 * PAGE).unwrap();
    assert_eq!(
        manager.translate(pid, 2 * PAGE).unwrap_err(),
        MemoryManagerError::OutOfRangePage
    );
    assert_eq!(
        manager.translate(pid, 100 * PAGE).unwrap_err(),
        MemoryManagerError::OutOfRangePage
    );
}

#[test]
fn fifo_eviction_picks_frame_zero_first() {
    let manager = manager("swap_it_fifo", RunMode::Driven);
    let first = manager.allocate(2 * PAGE).unwrap();
    let second = manager.allocate(2 * PAGE).unwrap();
    assert_frame_consistency(&manager);

    // all four frames are full; one more page must evict exactly one frame,
    // and the FIFO rotation starts at frame 0
    manager.grow(first, PAGE).unwrap();
    let status = manager.memory_status();
    assert_eq!(status.spilled.len(), 1);
    assert_eq!(status.swap_files, 1);
    assert_eq!(status.spilled[0].pid, first);
    assert_eq!(status.spilled[0].page_number, 0);

    let pages = manager.process_pages(first).unwrap();
    assert!(!pages[0].resident);
    assert!(pages[0].backing_file.is_some());
    assert!(pages[2].resident);
    assert_eq!(pages[2].frame_number, 0);

    let _ = second;
    assert_frame_consistency(&manager);
}

#[test]
fn tlb_holds_no_reference_to_evicted_frame() {
    let manager = manager("swap_it_tlb_invalidate", RunMode::Driven);
    let first = manager.allocate(2 * PAGE).unwrap();
    let second = manager.allocate(2 * PAGE).unwrap();
    manager.grow(first, PAGE).unwrap();

    // frame 0 was evicted and reassigned to (first, 2); any TLB entry still
    // referencing it must be that new mapping, and the victim page must be
    // gone from the TLB entirely
    let status = manager.memory_status();
    for entry in &status.tlb {
        if entry.frame_number == 0 {
            assert_eq!((entry.pid, entry.page_number), (first, 2));
        }
        assert_ne!((entry.pid, entry.page_number), (first, 0));
    }
    let _ = second;
}

#[test]
fn fault_restores_page_and_deletes_spill_file() {
    let manager = manager("swap_it_swap_in", RunMode::Driven);
    let first = manager.allocate(2 * PAGE).unwrap();
    let second = manager.allocate(2 * PAGE).unwrap();
    manager.grow(first, PAGE).unwrap();
    assert_eq!(manager.memory_status().swap_files, 1);

    // page 0 of the first process is swapped out; touching it faults it back
    let translation = manager.translate(first, 0).unwrap();
    assert!(translation.faulted);
    assert!(!translation.tlb_hit);
    assert_eq!(translation.value, 0);

    let pages = manager.process_pages(first).unwrap();
    assert!(pages[0].resident);
    assert!(pages[0].backing_file.is_none());

    // the restored page's file is gone; the newly evicted page owns the only
    // remaining spill file
    let status = manager.memory_status();
    assert_eq!(status.swap_files, 1);
    assert_eq!(status.spilled.len(), 1);
    assert_eq!(status.spilled[0].pid, first);
    assert_eq!(status.spilled[0].page_number, 1);
    let _ = second;
    assert_frame_consistency(&manager);
}

#[test]
fn terminate_is_idempotent() {
    let manager = manager("swap_it_idempotent", RunMode::Driven);
    let pid = manager.allocate(2 * PAGE).unwrap();
    manager.terminate(pid);
    assert!(!manager.is_running(pid));
    // again, and on pids that never existed
    manager.terminate(pid);
    manager.terminate(999);
    assert!(manager.list_processes().is_empty());
}

#[test]
fn terminate_frees_frames_and_spill_files() {
    let manager = manager("swap_it_terminate_frees", RunMode::Driven);
    let first = manager.allocate(2 * PAGE).unwrap();
    let second = manager.allocate(2 * PAGE).unwrap();
    manager.grow(first, PAGE).unwrap();
    assert_eq!(manager.memory_status().swap_files, 1);

    manager.terminate(first);
    let status = manager.memory_status();
    assert_eq!(status.swap_files, 0);
    assert!(status.spilled.is_empty());
    assert!(status.tlb.iter().all(|entry| entry.pid != first));
    assert_eq!(
        status.frames.iter().filter(|frame| frame.allocated).count(),
        2
    );
    let _ = second;
    assert_frame_consistency(&manager);

    // freed frames are reusable without eviction
    manager.allocate(2 * PAGE).unwrap();
    assert_eq!(manager.memory_status().swap_files, 0);
    assert_frame_consistency(&manager);
}

#[test]
fn spill_and_restore_are_byte_identical() {
    let _ = std::fs::remove_dir_all("swap_it_roundtrip");
    let store = BackingStore::init("swap_it_roundtrip").unwrap();
    let mut memory = PhysicalMemory::<2, 64>::init();
    let mut rng = rand::thread_rng();
    let data: Vec<u8> = (0..64).map(|_| rng.gen()).collect();

    memory.load_frame(0, &data).unwrap();
    store.spill("page_0_0_0", memory.frame(0).unwrap()).unwrap();
    memory.zero_frame(0).unwrap();
    store
        .restore("page_0_0_0", memory.frame_mut(0).unwrap())
        .unwrap();
    assert_eq!(memory.frame(0).unwrap().as_slice(), data.as_slice());
}

#[test]
#[serial]
fn concurrent_growth_never_loses_or_duplicates_frames() {
    let _ = std::fs::remove_dir_all("swap_it_race");
    let manager: Arc<MemoryManager<6, 64, 2>> =
        MemoryManager::init("swap_it_race", RunMode::Driven).unwrap();
    let first = manager.allocate(2 * PAGE).unwrap();
    let second = manager.allocate(2 * PAGE).unwrap();
    let third = manager.allocate(2 * PAGE).unwrap();
    manager.terminate(third);

    // two free frames left; both processes race to claim one each
    let racers: Vec<_> = [first, second]
        .into_iter()
        .map(|pid| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.grow(pid, PAGE).unwrap())
        })
        .collect();
    for racer in racers {
        racer.join().unwrap();
    }

    let status = manager.memory_status();
    assert_eq!(
        status.frames.iter().filter(|frame| frame.allocated).count(),
        6
    );
    assert_eq!(status.swap_files, 0, "no eviction should have happened");
    assert_eq!(manager.process_pages(first).unwrap().len(), 3);
    assert_eq!(manager.process_pages(second).unwrap().len(), 3);
    assert_frame_consistency(&manager);
}

#[test]
#[serial]
fn driven_commands_execute_in_order_and_signal_completion() {
    let manager = manager("swap_it_driven", RunMode::Driven);
    let pid = manager.spawn_process(2 * PAGE).unwrap();

    assert_eq!(
        manager.dispatch_and_wait(pid, ProcessCommand::AccessMemory(0), Duration::from_secs(2)),
        Ok(true)
    );
    assert_eq!(
        manager.dispatch_and_wait(
            pid,
            ProcessCommand::RequestMemory(PAGE),
            Duration::from_secs(2)
        ),
        Ok(true)
    );
    assert_eq!(manager.process_pages(pid).unwrap().len(), 3);

    assert_eq!(
        manager.dispatch_and_wait(pid, ProcessCommand::EndProcess, Duration::from_secs(2)),
        Ok(true)
    );
    assert!(!manager.is_running(pid));
    assert_eq!(
        manager.dispatch(pid, ProcessCommand::AccessMemory(0)),
        Err(MemoryManagerError::UnknownProcess)
    );
    manager.shutdown();
}

#[test]
#[serial]
fn unresponsive_process_is_force_terminated() {
    let manager = manager("swap_it_timeout", RunMode::Driven);
    // allocate without spawning a thread: nothing will ever drain the queue
    let pid = manager.allocate(2 * PAGE).unwrap();
    assert_eq!(
        manager.dispatch_and_wait(
            pid,
            ProcessCommand::AccessMemory(0),
            Duration::from_millis(100)
        ),
        Ok(false)
    );
    assert!(!manager.is_running(pid));
}

#[test]
#[serial]
fn autonomous_load_runs_and_shuts_down_cleanly() {
    let _ = std::fs::remove_dir_all("swap_it_autonomous");
    let manager: Arc<MemoryManager<8, 64, 4>> =
        MemoryManager::init("swap_it_autonomous", RunMode::Autonomous).unwrap();
    manager.start_activity(3);
    assert!(!manager.list_processes().is_empty());

    thread::sleep(Duration::from_millis(600));
    manager.shutdown();

    assert!(manager.list_processes().is_empty());
    assert!(!Path::new("swap_it_autonomous").exists());
}

#[test]
#[serial]
fn shutdown_removes_swap_directory_after_teardown() {
    let manager = manager("swap_it_shutdown", RunMode::Driven);
    let first = manager.allocate(2 * PAGE).unwrap();
    manager.allocate(2 * PAGE).unwrap();
    manager.grow(first, PAGE).unwrap();
    assert_eq!(manager.memory_status().swap_files, 1);

    manager.shutdown();
    assert!(manager.list_processes().is_empty());
    assert!(!Path::new("swap_it_shutdown").exists());
    // shutting down twice is a no-op
    manager.shutdown();
}

/*
 * Host test doubles
 *
 * Fakes for every opaque hardware trait, plus `with_test_executive`,
 * which brings up a fresh `Executive` and interrupt controller for the
 * duration of one test body. All of kernel-core's global state is
 * process-wide singletons, so tests that touch it are serialized
 * behind `TEST_LOCK` rather than running on cargo test's default
 * parallel-thread runner.
 */

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::hw::{AddressSpaceId, BlockDevice, ContextSwitch, FileHandle, FrameId, FrameSource, Mmu};
use crate::irq::InterruptController;
use crate::sched::{Sched, ThreadId};

static TEST_LOCK: spin::Mutex<()> = spin::Mutex::new(());

/// A no-op controller that starts enabled, matching a freshly booted
/// CPU before the idle thread's first `sti`.
pub struct TestInterruptController {
    enabled: AtomicBool,
}

impl TestInterruptController {
    const fn new() -> Self {
        Self { enabled: AtomicBool::new(true) }
    }
}

impl InterruptController for TestInterruptController {
    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }
    fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }
    fn are_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

static TEST_CONTROLLER: TestInterruptController = TestInterruptController::new();

/// A `launch` that just records the handoff. Scheduler bookkeeping
/// (ready list order, who's current, priorities) is fully exercised
/// this way; actually resuming a blocked call's stack is not, which is
/// why scenario tests drive state transitions directly rather than
/// relying on a blocking call to return once woken. A process-wide
/// singleton like the real switch implementations, so its own state
/// lives behind its own lock rather than needing `&mut self`.
pub struct FakeContextSwitch {
    launches: spin::Mutex<Vec<ThreadId>>,
}

impl FakeContextSwitch {
    const fn new() -> Self {
        Self { launches: spin::Mutex::new(Vec::new()) }
    }

    pub fn launches(&self) -> Vec<ThreadId> {
        self.launches.lock().clone()
    }
}

impl ContextSwitch for FakeContextSwitch {
    fn launch(&self, next: ThreadId) {
        self.launches.lock().push(next);
    }
}

static FAKE_SWITCH: FakeContextSwitch = FakeContextSwitch::new();

/// Runs `body` with a fresh executive and interrupt controller,
/// serialized against every other caller via `TEST_LOCK` since both
/// live in process-wide statics.
pub fn with_test_executive(body: impl FnOnce()) {
    let _guard = TEST_LOCK.lock();
    crate::irq::register_controller(&TEST_CONTROLLER);
    // Scenario and unit tests call scheduler/sync primitives directly
    // rather than always wrapping them in `without_interrupts`; running
    // the whole body with interrupts off mirrors the single synchronous
    // call chain a host test actually drives.
    TEST_CONTROLLER.disable();
    crate::sched::register_switch(&FAKE_SWITCH);
    Sched::start();
    body();
    Sched::shutdown_for_test();
}

#[derive(Default)]
pub struct FakeMmu {
    mapped: BTreeMap<(AddressSpaceId, usize), FrameId>,
    writable: BTreeMap<(AddressSpaceId, usize), bool>,
    dirty: BTreeMap<(AddressSpaceId, usize), bool>,
    accessed: BTreeMap<(AddressSpaceId, usize), bool>,
    pub activations: Vec<AddressSpaceId>,
}

impl FakeMmu {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mmu for FakeMmu {
    fn map(&mut self, space: AddressSpaceId, vaddr: usize, paddr: FrameId, writable: bool) {
        self.mapped.insert((space, vaddr), paddr);
        self.writable.insert((space, vaddr), writable);
        self.accessed.insert((space, vaddr), false);
        self.dirty.insert((space, vaddr), false);
    }

    fn unmap(&mut self, space: AddressSpaceId, vaddr: usize) {
        self.mapped.remove(&(space, vaddr));
        self.writable.remove(&(space, vaddr));
        self.accessed.remove(&(space, vaddr));
        self.dirty.remove(&(space, vaddr));
    }

    fn is_dirty(&self, space: AddressSpaceId, vaddr: usize) -> bool {
        self.dirty.get(&(space, vaddr)).copied().unwrap_or(false)
    }

    fn set_dirty(&mut self, space: AddressSpaceId, vaddr: usize, dirty: bool) {
        self.dirty.insert((space, vaddr), dirty);
    }

    fn is_accessed(&self, space: AddressSpaceId, vaddr: usize) -> bool {
        self.accessed.get(&(space, vaddr)).copied().unwrap_or(false)
    }

    fn set_accessed(&mut self, space: AddressSpaceId, vaddr: usize, accessed: bool) {
        self.accessed.insert((space, vaddr), accessed);
    }

    fn activate(&mut self, space: AddressSpaceId) {
        self.activations.push(space);
    }
}

pub struct FakeFrameSource {
    bytes: Vec<[u8; crate::constants::PAGE_SIZE]>,
    free_list: Vec<FrameId>,
}

impl FakeFrameSource {
    pub fn new(frame_count: u64) -> Self {
        let bytes = vec![[0u8; crate::constants::PAGE_SIZE]; frame_count as usize];
        let free_list = (0..frame_count).rev().collect();
        Self { bytes, free_list }
    }
}

impl FrameSource for FakeFrameSource {
    fn alloc(&mut self) -> Option<FrameId> {
        self.free_list.pop()
    }

    fn free(&mut self, frame: FrameId) {
        self.free_list.push(frame);
    }

    fn bytes_mut(&mut self, frame: FrameId) -> &mut [u8] {
        &mut self.bytes[frame as usize]
    }
}

pub struct FakeBlockDevice {
    sectors: Vec<[u8; 512]>,
}

impl FakeBlockDevice {
    pub fn new(sector_count: usize) -> Self {
        Self { sectors: vec![[0u8; 512]; sector_count] }
    }
}

impl BlockDevice for FakeBlockDevice {
    fn sector_size(&self) -> usize {
        512
    }

    fn sector_count(&self) -> u64 {
        self.sectors.len() as u64
    }

    fn read(&mut self, sector: u64, buf: &mut [u8]) {
        let len = buf.len();
        buf.copy_from_slice(&self.sectors[sector as usize][..len]);
    }

    fn write(&mut self, sector: u64, buf: &[u8]) {
        self.sectors[sector as usize][..buf.len()].copy_from_slice(buf);
    }
}

#[derive(Clone)]
pub struct FakeFile {
    data: alloc::sync::Arc<spin::Mutex<Vec<u8>>>,
    cursor: u64,
}

impl FakeFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: alloc::sync::Arc::new(spin::Mutex::new(data)),
            cursor: 0,
        }
    }
}

impl FileHandle for FakeFile {
    fn reopen(&self) -> Box<dyn FileHandle> {
        Box::new(self.clone())
    }

    fn seek(&mut self, offset: u64) {
        self.cursor = offset;
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let data = self.data.lock();
        let start = self.cursor as usize;
        if start >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.cursor += n as u64;
        n
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let mut data = self.data.lock();
        let start = self.cursor as usize;
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        self.cursor += buf.len() as u64;
        buf.len()
    }

    fn close(&mut self) {}
}

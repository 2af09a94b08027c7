/*
 * Supplemental page table and fault routing
 *
 * A `Spt` is one address space's page-aligned `vaddr -> Spte` map.
 * Frame allocation, eviction, and the swap device are kernel-wide
 * singletons registered once at boot via `init`, mirroring the
 * executive/interrupt-controller singleton pattern used elsewhere in
 * this crate - real page tables are a single per-machine resource,
 * not one per address space.
 */

mod frame;
mod swap;

pub use frame::FrameTable;
pub use swap::SwapSpace;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use crate::constants::PAGE_SIZE;
use crate::error::{KernelError, Result};
use crate::hw::{AddressSpaceId, BlockDevice, FileHandle, FrameId, FrameSource, Mmu};

/// What an SPTE is backed by. `Uninit` holds a closure standing in for
/// the C-style "initializer function + opaque aux" pair: the aux
/// payload is simply captured by the closure instead of threaded
/// through as a `void *`.
pub enum SpteKind {
    Uninit {
        initializer: Option<Box<dyn FnOnce(&mut [u8]) -> bool + Send>>,
        target: UninitTarget,
    },
    Anon {
        slot: Option<usize>,
    },
    File {
        file: Box<dyn FileHandle>,
        offset: u64,
        valid_bytes: usize,
    },
}

/// What an `Uninit` SPTE becomes once its initializer has run.
/// `alloc_with_initializer` only ever builds the `Anon` case today (every
/// lazy allocation in this kernel is anonymous memory); the `File`
/// variant exists so the type itself states the full UNINIT -> ANON|FILE
/// upgrade the fault path is specified to support.
pub enum UninitTarget {
    Anon,
    File {
        file: Box<dyn FileHandle>,
        offset: u64,
        valid_bytes: usize,
    },
}

impl SpteKind {
    fn type_name(&self) -> &'static str {
        match self {
            SpteKind::Uninit { .. } => "UNINIT",
            SpteKind::Anon { .. } => "ANON",
            SpteKind::File { .. } => "FILE",
        }
    }
}

pub struct Spte {
    pub vaddr: usize,
    pub writable: bool,
    pub frame: Option<FrameId>,
    pub kind: SpteKind,
}

/// Tag identifying one mmap call, so `munmap` can find every page it
/// installed even though they live as separate SPTEs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MmapId(pub u64);

struct MmapRecord {
    addr: usize,
    page_count: usize,
}

/// One address space's supplemental page table.
pub struct Spt {
    entries: BTreeMap<usize, Spte>,
    mmaps: BTreeMap<MmapId, MmapRecord>,
    next_mmap_id: u64,
}

impl Spt {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            mmaps: BTreeMap::new(),
            next_mmap_id: 1,
        }
    }

    pub fn find(&self, vaddr: usize) -> Option<&Spte> {
        self.entries.get(&page_floor(vaddr))
    }

    pub fn find_mut(&mut self, vaddr: usize) -> Option<&mut Spte> {
        self.entries.get_mut(&page_floor(vaddr))
    }

    pub fn alloc_with_initializer(
        &mut self,
        vaddr: usize,
        writable: bool,
        initializer: Box<dyn FnOnce(&mut [u8]) -> bool + Send>,
    ) -> Result<()> {
        if vaddr % PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument);
        }
        if self.entries.contains_key(&vaddr) {
            return Err(KernelError::AlreadyMapped);
        }
        self.entries.insert(
            vaddr,
            Spte {
                vaddr,
                writable,
                frame: None,
                kind: SpteKind::Uninit {
                    initializer: Some(initializer),
                    target: UninitTarget::Anon,
                },
            },
        );
        Ok(())
    }

    fn insert_anon(&mut self, vaddr: usize, writable: bool) -> Result<()> {
        if vaddr % PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument);
        }
        if self.entries.contains_key(&vaddr) {
            return Err(KernelError::AlreadyMapped);
        }
        self.entries.insert(
            vaddr,
            Spte {
                vaddr,
                writable,
                frame: None,
                kind: SpteKind::Anon { slot: None },
            },
        );
        Ok(())
    }

    fn insert_file(
        &mut self,
        vaddr: usize,
        writable: bool,
        file: Box<dyn FileHandle>,
        offset: u64,
        valid_bytes: usize,
    ) -> Result<()> {
        if vaddr % PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument);
        }
        if self.entries.contains_key(&vaddr) {
            return Err(KernelError::AlreadyMapped);
        }
        self.entries.insert(
            vaddr,
            Spte {
                vaddr,
                writable,
                frame: None,
                kind: SpteKind::File {
                    file,
                    offset,
                    valid_bytes,
                },
            },
        );
        Ok(())
    }
}

impl Default for Spt {
    fn default() -> Self {
        Self::new()
    }
}

fn page_floor(vaddr: usize) -> usize {
    vaddr - (vaddr % PAGE_SIZE)
}

static MMU: spin::Mutex<Option<Box<dyn Mmu>>> = spin::Mutex::new(None);
static FRAMES: spin::Mutex<Option<Box<dyn FrameSource>>> = spin::Mutex::new(None);
static DEVICE: spin::Mutex<Option<Box<dyn BlockDevice>>> = spin::Mutex::new(None);
static SWAP: spin::Mutex<Option<SwapSpace>> = spin::Mutex::new(None);
static FRAME_TABLE: spin::Mutex<FrameTable> = spin::Mutex::new(FrameTable::new());

/// Registers the page subsystem's hardware collaborators. Must be
/// called once during boot before any fault can occur.
pub fn init(mmu: Box<dyn Mmu>, frames: Box<dyn FrameSource>, device: Box<dyn BlockDevice>) {
    let swap = SwapSpace::new(device.as_ref());
    *MMU.lock() = Some(mmu);
    *FRAMES.lock() = Some(frames);
    *SWAP.lock() = Some(swap);
    *DEVICE.lock() = Some(device);
}

fn alloc_frame() -> Result<FrameId> {
    let mut frames = FRAMES.lock();
    let frames = frames.as_mut().expect("vm subsystem not initialized");
    if let Some(frame) = frames.alloc() {
        return Ok(frame);
    }
    evict_one()?;
    frames.alloc().ok_or(KernelError::AllocationFailure)
}

/// Runs one second-chance eviction pass and writes the victim back to
/// its backing store, freeing its frame.
fn evict_one() -> Result<()> {
    let victim = {
        let mut mmu = MMU.lock();
        let mmu = mmu.as_deref_mut().expect("vm subsystem not initialized");
        let mut table = FRAME_TABLE.lock();
        table.select_victim(mmu).ok_or(KernelError::AllocationFailure)?
    };
    {
        let mut frames = FRAMES.lock();
        let frames = frames.as_mut().expect("vm subsystem not initialized");
        let bytes = frames.bytes_mut(victim.frame);
        // The victim SPTE lives in the owning thread's Spt; `sched`
        // owns the address-space -> thread lookup kernel-core's frame
        // table doesn't track.
        crate::sched::Sched::swap_out_owned_frame(victim.space, victim.vaddr, &*bytes)?;
    }
    MMU.lock()
        .as_deref_mut()
        .expect("vm subsystem not initialized")
        .unmap(victim.space, victim.vaddr);
    FRAME_TABLE.lock().remove(victim.frame);
    FRAMES
        .lock()
        .as_mut()
        .expect("vm subsystem not initialized")
        .free(victim.frame);
    Ok(())
}

impl Spte {
    /// Writes this SPTE's contents into `frame`'s bytes and marks it
    /// resident. Used by both first-touch (UNINIT) and restore
    /// (ANON/FILE) paths.
    fn swap_in(&mut self, frame: FrameId, frame_bytes: &mut [u8], device: &mut dyn BlockDevice, swap: &mut SwapSpace) -> Result<()> {
        // First touch: run the initializer, then rewrite this SPTE to the
        // concrete kind its target names, so a later eviction of this same
        // page dispatches to the real ANON/FILE backing instead of the
        // no-longer-applicable UNINIT case.
        if matches!(self.kind, SpteKind::Uninit { .. }) {
            let (initializer, target) = match &mut self.kind {
                SpteKind::Uninit { initializer, target } => (
                    initializer.take().expect("UNINIT SPTE initialized twice"),
                    core::mem::replace(target, UninitTarget::Anon),
                ),
                _ => unreachable!(),
            };
            if !initializer(frame_bytes) {
                return Err(KernelError::AllocationFailure);
            }
            self.kind = match target {
                UninitTarget::Anon => SpteKind::Anon { slot: None },
                UninitTarget::File { file, offset, valid_bytes } => {
                    SpteKind::File { file, offset, valid_bytes }
                }
            };
            self.frame = Some(frame);
            return Ok(());
        }

        match &mut self.kind {
            SpteKind::Uninit { .. } => unreachable!(),
            SpteKind::Anon { slot } => {
                if let Some(s) = slot.take() {
                    swap.read_in(device, s, frame_bytes);
                } else {
                    frame_bytes.fill(0);
                }
            }
            SpteKind::File { file, offset, valid_bytes } => {
                frame_bytes.fill(0);
                file.seek(*offset);
                let n = file.read(&mut frame_bytes[..*valid_bytes]);
                if n < *valid_bytes {
                    frame_bytes[n..*valid_bytes].fill(0);
                }
            }
        }
        self.frame = Some(frame);
        Ok(())
    }

    /// Writes this SPTE's resident page back to its backing store and
    /// clears residency. `dirty` reflects the hardware dirty bit at the
    /// time of eviction. `Uninit` never reaches here: it never has a
    /// frame (never resident) until `swap_in` upgrades it to ANON or FILE.
    fn swap_out(&mut self, frame_bytes: &[u8], dirty: bool, device: &mut dyn BlockDevice, swap: &mut SwapSpace) -> Result<()> {
        match &mut self.kind {
            SpteKind::Uninit { .. } => unreachable!("UNINIT SPTE is never resident"),
            SpteKind::Anon { slot } => {
                *slot = Some(swap.write_out(device, frame_bytes)?);
            }
            SpteKind::File { file, offset, valid_bytes } => {
                if dirty {
                    file.seek(*offset);
                    file.write(&frame_bytes[..*valid_bytes]);
                }
            }
        }
        self.frame = None;
        Ok(())
    }

    fn destroy(&mut self, swap: &mut SwapSpace) {
        match &mut self.kind {
            SpteKind::Uninit { .. } => {}
            SpteKind::Anon { slot } => {
                if let Some(s) = slot.take() {
                    swap.discard(s);
                }
            }
            SpteKind::File { file, .. } => {
                file.close();
            }
        }
    }
}

/// `claim(vaddr)`: obtains a frame for the SPTE at `vaddr` in `space`,
/// populates it, and installs the hardware mapping.
pub fn claim(space: AddressSpaceId, spt: &mut Spt, vaddr: usize) -> Result<()> {
    let vaddr = page_floor(vaddr);
    let writable = {
        let spte = spt.entries.get(&vaddr).ok_or(KernelError::NotMapped)?;
        spte.writable
    };
    let frame = alloc_frame()?;
    {
        let mut frames = FRAMES.lock();
        let frames = frames.as_mut().expect("vm subsystem not initialized");
        let mut device = DEVICE.lock();
        let device = device.as_deref_mut().expect("vm subsystem not initialized");
        let mut swap = SWAP.lock();
        let swap = swap.as_mut().expect("vm subsystem not initialized");
        let spte = spt.entries.get_mut(&vaddr).expect("checked above");
        let bytes = frames.bytes_mut(frame);
        spte.swap_in(frame, bytes, device, swap)?;
    }
    FRAME_TABLE.lock().insert(frame, space, vaddr);
    let mut mmu = MMU.lock();
    mmu.as_deref_mut()
        .expect("vm subsystem not initialized")
        .map(space, vaddr, frame, writable);
    Ok(())
}

/// Test-only access to a resident page's physical bytes, by vaddr rather
/// than `FrameId` since that's all a scenario test has in hand. Used to
/// drive eviction/restore round-trips without a real MMU to read through.
#[cfg(test)]
pub(crate) fn write_resident_bytes(spt: &Spt, vaddr: usize, bytes: &[u8]) {
    let vaddr = page_floor(vaddr);
    let frame = spt.entries[&vaddr].frame.expect("page not resident");
    let mut frames = FRAMES.lock();
    let frames = frames.as_mut().expect("vm subsystem not initialized");
    frames.bytes_mut(frame)[..bytes.len()].copy_from_slice(bytes);
}

#[cfg(test)]
pub(crate) fn read_resident_bytes(spt: &Spt, vaddr: usize, out: &mut [u8]) {
    let vaddr = page_floor(vaddr);
    let frame = spt.entries[&vaddr].frame.expect("page not resident");
    let mut frames = FRAMES.lock();
    let frames = frames.as_mut().expect("vm subsystem not initialized");
    out.copy_from_slice(&frames.bytes_mut(frame)[..out.len()]);
}

/// `remove(vaddr)`: unmaps, frees the frame if resident, runs the
/// type-specific destroy, and drops the SPTE.
pub fn remove(space: AddressSpaceId, spt: &mut Spt, vaddr: usize) -> Result<()> {
    let vaddr = page_floor(vaddr);
    let mut spte = spt.entries.remove(&vaddr).ok_or(KernelError::NotMapped)?;
    if let Some(frame) = spte.frame {
        MMU.lock()
            .as_deref_mut()
            .expect("vm subsystem not initialized")
            .unmap(space, vaddr);
        FRAME_TABLE.lock().remove(frame);
        FRAMES
            .lock()
            .as_mut()
            .expect("vm subsystem not initialized")
            .free(frame);
    }
    let mut swap = SWAP.lock();
    spte.destroy(swap.as_mut().expect("vm subsystem not initialized"));
    Ok(())
}

/// Called by eviction once it has selected a victim frame, to write it
/// back before the frame is recycled. Kept free of thread lookup: the
/// caller (`sched`) owns the mapping from (space, vaddr) back to the
/// Spt that contains the SPTE.
pub(crate) fn swap_out_spte(space: AddressSpaceId, spt: &mut Spt, vaddr: usize, frame_bytes: &[u8]) -> Result<()> {
    let spte = spt.entries.get_mut(&vaddr).ok_or(KernelError::NotMapped)?;
    let dirty = MMU
        .lock()
        .as_ref()
        .expect("vm subsystem not initialized")
        .is_dirty(space, vaddr);
    let mut device = DEVICE.lock();
    let mut swap = SWAP.lock();
    spte.swap_out(
        frame_bytes,
        dirty,
        device.as_deref_mut().expect("vm subsystem not initialized"),
        swap.as_mut().expect("vm subsystem not initialized"),
    )
}

/// `mmap`: installs one FILE SPTE per page of `length` starting at
/// `addr`, each with its own reopened file handle.
pub fn mmap(
    spt: &mut Spt,
    addr: usize,
    length: usize,
    file: &dyn FileHandle,
    offset: u64,
    writable: bool,
) -> Result<MmapId> {
    if addr % PAGE_SIZE != 0 {
        return Err(KernelError::InvalidArgument);
    }
    let page_count = length.div_ceil(PAGE_SIZE);
    for k in 0..page_count {
        if spt.entries.contains_key(&(addr + k * PAGE_SIZE)) {
            return Err(KernelError::AlreadyMapped);
        }
    }
    for k in 0..page_count {
        let vaddr = addr + k * PAGE_SIZE;
        let valid_bytes = PAGE_SIZE.min(length - k * PAGE_SIZE);
        spt.insert_file(vaddr, writable, file.reopen(), offset + (k * PAGE_SIZE) as u64, valid_bytes)?;
    }
    let id = MmapId(spt.next_mmap_id);
    spt.next_mmap_id += 1;
    spt.mmaps.insert(id, MmapRecord { addr, page_count });
    Ok(id)
}

/// `munmap`: removes every page installed by the mmap at `addr`,
/// writing back dirty FILE pages along the way.
pub fn munmap(space: AddressSpaceId, spt: &mut Spt, addr: usize) -> Result<()> {
    let id = spt
        .mmaps
        .iter()
        .find(|(_, rec)| rec.addr == addr)
        .map(|(id, _)| *id)
        .ok_or(KernelError::NotMapped)?;
    let record = spt.mmaps.remove(&id).expect("found above");
    for k in 0..record.page_count {
        let vaddr = record.addr + k * PAGE_SIZE;
        remove(space, spt, vaddr)?;
    }
    Ok(())
}

/// Processes every outstanding mmap as if `munmap` had been called,
/// used on thread exit.
pub fn munmap_all(space: AddressSpaceId, spt: &mut Spt) {
    let addrs: alloc::vec::Vec<usize> = spt.mmaps.values().map(|r| r.addr).collect();
    for addr in addrs {
        let _ = munmap(space, spt, addr);
    }
}

/// Outcome of the page-fault fault path, §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    Resolved,
    StackGrowth,
}

/// Routes a page fault at `fa` for the thread owning `spt`/`space`.
/// `user_rsp` is the user stack pointer at fault time, needed for the
/// stack-growth heuristic.
pub fn handle_fault(
    space: AddressSpaceId,
    spt: &mut Spt,
    fa: usize,
    user_rsp: u64,
    is_user_address: bool,
) -> Result<FaultOutcome> {
    if !is_user_address {
        return Err(KernelError::InvalidArgument);
    }
    let vaddr = page_floor(fa);
    if spt.find(vaddr).is_some() {
        claim(space, spt, vaddr)?;
        return Ok(FaultOutcome::Resolved);
    }
    let window = crate::constants::STACK_GROWTH_WINDOW as u64;
    let limit = crate::constants::USER_STACK_LIMIT;
    if (fa as u64) + window >= user_rsp && (fa as u64) <= user_rsp {
        let stack_bytes_used = current_stack_span(spt, vaddr);
        if stack_bytes_used < limit {
            spt.insert_anon(vaddr, true)?;
            claim(space, spt, vaddr)?;
            return Ok(FaultOutcome::StackGrowth);
        }
    }
    Err(KernelError::InvalidArgument)
}

fn current_stack_span(spt: &Spt, new_bottom: usize) -> u64 {
    let highest = spt.entries.keys().copied().max().unwrap_or(new_bottom);
    (highest - new_bottom + PAGE_SIZE) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeBlockDevice, FakeFrameSource, FakeMmu};
    use alloc::boxed::Box;
    use alloc::vec;

    fn setup() {
        init(
            Box::new(FakeMmu::new()),
            Box::new(FakeFrameSource::new(16)),
            Box::new(FakeBlockDevice::new(crate::constants::SECTORS_PER_PAGE * 8)),
        );
        FRAME_TABLE.lock().clear_for_test();
    }

    #[test]
    fn uninit_claim_invokes_initializer_once() {
        setup();
        let mut spt = Spt::new();
        spt.alloc_with_initializer(
            0x4000,
            true,
            Box::new(|bytes| {
                bytes.fill(0x42);
                true
            }),
        )
        .unwrap();
        claim(1, &mut spt, 0x4000).unwrap();
        assert!(spt.find(0x4000).unwrap().frame.is_some());
    }

    #[test]
    fn double_alloc_same_vaddr_fails() {
        setup();
        let mut spt = Spt::new();
        spt.insert_anon(0x4000, true).unwrap();
        assert_eq!(spt.insert_anon(0x4000, true), Err(KernelError::AlreadyMapped));
    }

    #[test]
    fn misaligned_alloc_rejected() {
        setup();
        let mut spt = Spt::new();
        assert_eq!(spt.insert_anon(0x4001, true), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn remove_frees_frame_and_spte() {
        setup();
        let mut spt = Spt::new();
        spt.insert_anon(0x4000, true).unwrap();
        claim(1, &mut spt, 0x4000).unwrap();
        remove(1, &mut spt, 0x4000).unwrap();
        assert!(spt.find(0x4000).is_none());
    }

    #[test]
    fn mmap_rejects_overlap_atomically() {
        setup();
        let mut spt = Spt::new();
        spt.insert_anon(PAGE_SIZE, true).unwrap();
        let file = crate::test_support::FakeFile::new(vec![0u8; PAGE_SIZE * 3]);
        let res = mmap(&mut spt, 0, PAGE_SIZE * 3, &file, 0, true);
        assert_eq!(res.err(), Some(KernelError::AlreadyMapped));
        // the non-overlapping first page must not have been installed
        assert!(spt.find(0).is_none());
    }
}

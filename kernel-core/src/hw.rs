/*
 * Opaque hardware interfaces
 *
 * Everything in this module is a collaborator the host environment must
 * supply: real page-table writes, a real disk, a real file, and the
 * trap-frame / iretq context switch. kernel-core never reaches past
 * these traits into concrete hardware, which is what keeps the
 * scheduler and VM logic testable on a plain host target.
 */

use alloc::boxed::Box;

use crate::sched::ThreadId;

/// Opaque handle to a per-address-space page table root (e.g. a PML4
/// physical address). kernel-core never interprets the value; it only
/// threads it through to the `Mmu` implementation.
pub type AddressSpaceId = u64;

/// Opaque handle to one physical page frame.
pub type FrameId = u64;

/// The host's page-table manipulation surface.
///
/// map / unmap / query-dirty / query-accessed / activate, each scoped
/// to an address space. Page-table hardware manipulation itself is
/// explicitly out of scope for this crate.
pub trait Mmu: Send {
    fn map(&mut self, space: AddressSpaceId, vaddr: usize, paddr: FrameId, writable: bool);
    fn unmap(&mut self, space: AddressSpaceId, vaddr: usize);
    fn is_dirty(&self, space: AddressSpaceId, vaddr: usize) -> bool;
    fn set_dirty(&mut self, space: AddressSpaceId, vaddr: usize, dirty: bool);
    fn is_accessed(&self, space: AddressSpaceId, vaddr: usize) -> bool;
    fn set_accessed(&mut self, space: AddressSpaceId, vaddr: usize, accessed: bool);
    fn activate(&mut self, space: AddressSpaceId);
}

/// The host's physical frame allocator, plus a way to get at a frame's
/// bytes from kernel-virtual space. Real implementations back this with
/// a bitmap over usable RAM (see `memory::phys` in the `kernel` crate);
/// the page subsystem only ever sees `FrameId`s.
pub trait FrameSource: Send {
    fn alloc(&mut self) -> Option<FrameId>;
    fn free(&mut self, frame: FrameId);
    fn bytes_mut(&mut self, frame: FrameId) -> &mut [u8];
}

/// The opaque block device swap lives on: fixed-size sectors, nothing
/// more. `SECTOR_SIZE` is reported by the device rather than assumed,
/// since real disks vary.
pub trait BlockDevice: Send {
    fn sector_size(&self) -> usize;
    fn sector_count(&self) -> u64;
    fn read(&mut self, sector: u64, buf: &mut [u8]);
    fn write(&mut self, sector: u64, buf: &[u8]);
}

/// The opaque file interface FILE-backed mmap pages read and write
/// through. `reopen` exists because each page of an mmap gets its own
/// handle so close-on-destroy never fights another page's cursor.
pub trait FileHandle: Send {
    fn reopen(&self) -> Box<dyn FileHandle>;
    fn seek(&mut self, offset: u64);
    fn read(&mut self, buf: &mut [u8]) -> usize;
    fn write(&mut self, buf: &[u8]) -> usize;
    fn close(&mut self);
}

/// The opaque context switch. In a real kernel `launch` never returns to
/// its caller - the trap frame for `next` is restored and the CPU
/// resumes in userspace/kernel-space wherever `next` left off via
/// `iretq`. A cooperative test double may instead return normally to
/// simulate `next` immediately yielding back, which is what lets
/// `schedule()` be exercised from ordinary unit tests.
///
/// Takes `&self` rather than `&mut self`: the registered implementation
/// is a single process-wide singleton (see `sched::register_switch`),
/// not a resource `schedule()` checks out and returns, so any state it
/// needs (saved stacks, a currently-running marker) must use its own
/// interior mutability, the same way `irq::InterruptController` does.
pub trait ContextSwitch: Send + Sync {
    fn launch(&self, next: ThreadId);
}

/*
 * Paging
 *
 * Thin wrapper around `x86_64::structures::paging::OffsetPageTable`. The
 * bootloader maps all of physical memory at a fixed offset before handing
 * control to us, which is what lets `OffsetPageTable` walk and edit the
 * active page tables without a hand-rolled direct map.
 *
 * This kernel runs everything - including the demo threads kernel-core's
 * VM subsystem exercises - in the one address space the bootloader set
 * up; there is no per-process PML4 here. `AddressSpaceId` is accepted and
 * ignored accordingly (see DESIGN.md).
 */

use spin::Mutex;
use x86_64::registers::control::Cr3;
use x86_64::structures::paging::{
    FrameAllocator, Mapper, OffsetPageTable, Page, PageTable, PageTableFlags, PhysFrame, Size4KiB,
    Translate,
};
use x86_64::{PhysAddr, VirtAddr};

use kernel_core::hw::{AddressSpaceId, FrameId, Mmu};

use crate::memory::phys::BitmapFrameSource;

static PHYS_OFFSET: Mutex<u64> = Mutex::new(0);

pub fn init(physical_memory_offset: u64) {
    *PHYS_OFFSET.lock() = physical_memory_offset;
    log::info!(
        "Paging initialized, physical memory mapped at offset {:#x}",
        physical_memory_offset
    );
}

unsafe fn active_level_4_table(physical_memory_offset: u64) -> &'static mut PageTable {
    let (frame, _) = Cr3::read();
    let phys = frame.start_address().as_u64();
    let virt = VirtAddr::new(phys + physical_memory_offset);
    let ptr: *mut PageTable = virt.as_mut_ptr();
    unsafe { &mut *ptr }
}

fn with_mapper<R>(f: impl FnOnce(&mut OffsetPageTable) -> R) -> R {
    let offset = *PHYS_OFFSET.lock();
    let level_4_table = unsafe { active_level_4_table(offset) };
    let mut mapper = unsafe { OffsetPageTable::new(level_4_table, VirtAddr::new(offset)) };
    f(&mut mapper)
}

struct DelegatingFrameAllocator;

unsafe impl FrameAllocator<Size4KiB> for DelegatingFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        BitmapFrameSource
            .alloc()
            .map(|addr| PhysFrame::containing_address(PhysAddr::new(addr)))
    }
}

/// Maps `size` bytes starting at `start` to freshly allocated physical
/// frames, present and writable. Used once during boot to back the kernel
/// heap; the VM subsystem proper goes through `Mmu::map` instead.
pub fn map_range(start: VirtAddr, size: u64, flags: PageTableFlags) -> Result<(), &'static str> {
    let page_count = size.div_ceil(4096);
    with_mapper(|mapper| {
        for i in 0..page_count {
            let page: Page<Size4KiB> = Page::containing_address(start + i * 4096);
            let frame = DelegatingFrameAllocator
                .allocate_frame()
                .ok_or("out of physical frames while mapping heap")?;
            unsafe {
                mapper
                    .map_to(page, frame, flags, &mut DelegatingFrameAllocator)
                    .map_err(|_| "failed to map heap page")?
                    .flush();
            }
        }
        Ok(())
    })
}

/// `Mmu` implementation backed by the single `OffsetPageTable` this kernel
/// runs in.
pub struct OffsetMmu;

impl Mmu for OffsetMmu {
    fn map(&mut self, _space: AddressSpaceId, vaddr: usize, paddr: FrameId, writable: bool) {
        let page: Page<Size4KiB> = Page::containing_address(VirtAddr::new(vaddr as u64));
        let frame = PhysFrame::containing_address(PhysAddr::new(paddr));
        let mut flags = PageTableFlags::PRESENT;
        if writable {
            flags |= PageTableFlags::WRITABLE;
        }
        with_mapper(|mapper| unsafe {
            mapper
                .map_to(page, frame, flags, &mut DelegatingFrameAllocator)
                .expect("page mapping failed")
                .flush();
        });
    }

    fn unmap(&mut self, _space: AddressSpaceId, vaddr: usize) {
        let page: Page<Size4KiB> = Page::containing_address(VirtAddr::new(vaddr as u64));
        with_mapper(|mapper| {
            if let Ok((_, flush)) = mapper.unmap(page) {
                flush.flush();
            }
        });
    }

    fn is_dirty(&self, space: AddressSpaceId, vaddr: usize) -> bool {
        self.flags_of(space, vaddr)
            .is_some_and(|f| f.contains(PageTableFlags::DIRTY))
    }

    fn set_dirty(&mut self, space: AddressSpaceId, vaddr: usize, dirty: bool) {
        self.update_flag(space, vaddr, PageTableFlags::DIRTY, dirty);
    }

    fn is_accessed(&self, space: AddressSpaceId, vaddr: usize) -> bool {
        self.flags_of(space, vaddr)
            .is_some_and(|f| f.contains(PageTableFlags::ACCESSED))
    }

    fn set_accessed(&mut self, space: AddressSpaceId, vaddr: usize, accessed: bool) {
        self.update_flag(space, vaddr, PageTableFlags::ACCESSED, accessed);
    }

    fn activate(&mut self, _space: AddressSpaceId) {
        // Single address space: nothing to switch to.
    }
}

impl OffsetMmu {
    fn flags_of(&self, _space: AddressSpaceId, vaddr: usize) -> Option<PageTableFlags> {
        with_mapper(|mapper| match mapper.translate(VirtAddr::new(vaddr as u64)) {
            x86_64::structures::paging::mapper::TranslateResult::Mapped { flags, .. } => {
                Some(flags)
            }
            _ => None,
        })
    }

    fn update_flag(
        &mut self,
        space: AddressSpaceId,
        vaddr: usize,
        bit: PageTableFlags,
        set: bool,
    ) {
        let Some(mut flags) = self.flags_of(space, vaddr) else {
            return;
        };
        flags.set(bit, set);
        let page: Page<Size4KiB> = Page::containing_address(VirtAddr::new(vaddr as u64));
        with_mapper(|mapper| unsafe {
            if let Ok(flush) = mapper.update_flags(page, flags) {
                flush.flush();
            }
        });
    }
}

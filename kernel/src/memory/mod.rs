/*
 * Memory Management
 *
 * High-level module that ties together:
 *  - Physical frame allocator (phys)
 *  - Paging / virtual memory manager (paging)
 *  - Kernel heap (heap)
 */

pub mod heap;
pub mod paging;
pub mod phys;
pub mod types;

use bootloader_api::BootInfo;

/// Top-level memory initialization:
///  1. Physical frame allocator from the bootloader's memory map
///  2. Paging mapper, built over the bootloader's physical memory mapping
///  3. Kernel heap
pub fn init(boot_info: &'static mut BootInfo) {
    log::info!("Initializing memory management...");

    let physical_memory_offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not map physical memory");

    phys::init(&boot_info.memory_regions, physical_memory_offset);
    paging::init(physical_memory_offset);
    heap::init().expect("Failed to initialize kernel heap");

    let (used, total) = phys::get_stats();
    log::info!(
        "Physical memory: used frames = {}, total frames = {}",
        used,
        total
    );
}

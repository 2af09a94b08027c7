/*
 * Physical Frame Allocator
 *
 * Bitmap-based allocator for 4 KiB frames, seeded from the memory map
 * `bootloader_api` hands us at boot. Implements `kernel_core::hw::FrameSource`
 * so the page subsystem never has to know how frames are actually tracked.
 */

use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use kernel_core::hw::FrameSource;
use spin::Mutex;

use crate::memory::types::PhysAddr;

/// Maximum number of frames we can manage (1 GiB / 4 KiB = 262,144 frames).
const MAX_FRAMES: usize = 262_144;
const BITMAP_LEN: usize = MAX_FRAMES / 64;
const FRAME_SIZE: u64 = 4096;

/// Frame bitmap - each bit represents one 4 KiB frame. 0 = free, 1 = used.
///
/// IMPORTANT: we never take & or &mut to this static; we only touch it
/// via raw pointers obtained from `addr_of!` / `addr_of_mut!`.
static mut FRAME_BITMAP: [u64; BITMAP_LEN] = [0; BITMAP_LEN];

static ALLOCATOR_LOCK: Mutex<()> = Mutex::new(());

/// Physical-memory offset the bootloader mapped all of RAM at. Frames are
/// read/written through this offset rather than through a hand-rolled
/// direct map.
static PHYS_OFFSET: Mutex<u64> = Mutex::new(0);

/// Seed the bitmap from the bootloader-reported memory map, marking every
/// non-`Usable` region (including the kernel image itself, which the
/// bootloader already carves out as `Bootloader`/`KernelAndModules`) used.
pub fn init(regions: &MemoryRegions, physical_memory_offset: u64) {
    let _lock = ALLOCATOR_LOCK.lock();
    *PHYS_OFFSET.lock() = physical_memory_offset;

    log::info!("Initializing physical frame allocator...");

    unsafe {
        let ptr = core::ptr::addr_of_mut!(FRAME_BITMAP) as *mut u64;
        for i in 0..BITMAP_LEN {
            *ptr.add(i) = u64::MAX;
        }
    }

    for region in regions.iter() {
        if region.kind != MemoryRegionKind::Usable {
            continue;
        }
        let start_frame = region.start / FRAME_SIZE;
        let end_frame = region.end.saturating_sub(1) / FRAME_SIZE;
        for frame_num in start_frame..=end_frame {
            if (frame_num as usize) < MAX_FRAMES {
                mark_frame_free(frame_num as usize);
            }
        }
    }

    let (used, total) = get_stats();
    log::info!(
        "Physical frame allocator initialized: {} used, {} total",
        used,
        total
    );
}

fn mark_frame_free(frame_num: usize) {
    let word_idx = frame_num / 64;
    let bit_idx = frame_num % 64;
    let mask = 1u64 << bit_idx;
    unsafe {
        let ptr = (core::ptr::addr_of_mut!(FRAME_BITMAP) as *mut u64).add(word_idx);
        *ptr &= !mask;
    }
}

fn mark_frame_used(frame_num: usize) {
    let word_idx = frame_num / 64;
    let bit_idx = frame_num % 64;
    let mask = 1u64 << bit_idx;
    unsafe {
        let ptr = (core::ptr::addr_of_mut!(FRAME_BITMAP) as *mut u64).add(word_idx);
        *ptr |= mask;
    }
}

pub fn get_stats() -> (usize, usize) {
    let _lock = ALLOCATOR_LOCK.lock();
    let mut used_frames = 0;
    unsafe {
        let base = core::ptr::addr_of!(FRAME_BITMAP) as *const u64;
        for i in 0..BITMAP_LEN {
            used_frames += (*base.add(i)).count_ones() as usize;
        }
    }
    (used_frames, MAX_FRAMES)
}

/// Bitmap-backed `FrameSource`. Stateless besides the global bitmap and
/// offset set up in `init`; instantiate freely and hand it to
/// `kernel_core::vm::init`.
pub struct BitmapFrameSource;

impl FrameSource for BitmapFrameSource {
    fn alloc(&mut self) -> Option<u64> {
        let _lock = ALLOCATOR_LOCK.lock();
        unsafe {
            let ptr = core::ptr::addr_of_mut!(FRAME_BITMAP) as *mut u64;
            for word_idx in 0..BITMAP_LEN {
                let word_val = *ptr.add(word_idx);
                if word_val == u64::MAX {
                    continue;
                }
                for bit_idx in 0..64 {
                    let mask = 1u64 << bit_idx;
                    if word_val & mask == 0 {
                        *ptr.add(word_idx) = word_val | mask;
                        let frame_num = word_idx * 64 + bit_idx;
                        if frame_num >= MAX_FRAMES {
                            return None;
                        }
                        return Some((frame_num as u64) * FRAME_SIZE);
                    }
                }
            }
        }
        None
    }

    fn free(&mut self, frame: u64) {
        let _lock = ALLOCATOR_LOCK.lock();
        let frame_num = (frame / FRAME_SIZE) as usize;
        if frame_num < MAX_FRAMES {
            mark_frame_free(frame_num);
        }
    }

    fn bytes_mut(&mut self, frame: u64) -> &mut [u8] {
        let offset = *PHYS_OFFSET.lock();
        let virt = PhysAddr::new(frame).as_u64() + offset;
        unsafe { core::slice::from_raw_parts_mut(virt as *mut u8, FRAME_SIZE as usize) }
    }
}

/*
 * Teaching Kernel - Main Entry Point
 *
 * Bare-metal x86_64 entry point, booted by `bootloader_api`. Brings up
 * the GDT/IDT, physical memory and paging, then hands off scheduling
 * and virtual-memory policy entirely to `kernel_core`: this file wires
 * up the hardware side of kernel_core's traits and spawns the demo
 * threads that exercise them.
 *
 * Why this is important:
 * - Provides the entry point the bootloader calls once it's loaded the
 *   kernel and built an initial page table mapping all of physical
 *   memory at a fixed offset.
 * - Sets up every `kernel_core::hw` implementation (paging, frames,
 *   swap, context switch) before the scheduler runs a single thread.
 * - Implements panic handling for kernel-level errors.
 */

#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]
#![feature(alloc_error_handler)]
#![allow(dead_code)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec;
use core::panic::PanicInfo;

use bootloader_api::{entry_point, BootInfo};

mod arch;
mod devices;
mod drivers;
mod irq;
mod memory;
mod sched;
mod utils;

entry_point!(kernel_main);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    utils::debug::init_debug_infrastructure();
    utils::debug::logger::init(true);
    log::info!("Teaching kernel starting...");

    arch::x86_64::gdt::init();
    arch::x86_64::idt::init();

    memory::init(boot_info);

    {
        let mut test_vec = alloc::vec::Vec::new();
        test_vec.push(42);
        test_vec.push(1337);
        log::info!("Heap test successful: {:?}", test_vec);
    }

    drivers::system::init();
    irq::init();

    kernel_core::vm::init(
        Box::new(memory::paging::OffsetMmu),
        Box::new(memory::phys::BitmapFrameSource),
        Box::new(devices::RamSwap::new(4096)),
    );

    sched::init();
    kernel_core::Sched::start();

    spawn_demo_threads();

    log::info!("Kernel initialization complete, enabling interrupts");
    x86_64::instructions::interrupts::enable();

    loop {
        x86_64::instructions::hlt();
    }
}

/// Spawns a handful of threads that exercise priority preemption,
/// donation, timed sleep, and the page-fault/mmap paths end to end -
/// there is no userspace here, so this is the only thing standing in
/// for the workloads a real kernel would run.
fn spawn_demo_threads() {
    static DONATION_LOCK: spin::Mutex<Option<kernel_core::sync::Lock>> = spin::Mutex::new(None);
    *DONATION_LOCK.lock() = Some(kernel_core::sync::Lock::new());

    sched::spawn("low-priority-holder", 10, || {
        kernel_core::irq::without_interrupts(|| DONATION_LOCK.lock().as_mut().unwrap().acquire());
        log::info!("low-priority-holder: acquired lock, doing slow work");
        for _ in 0..3 {
            kernel_core::Sched::yield_now();
        }
        kernel_core::irq::without_interrupts(|| DONATION_LOCK.lock().as_mut().unwrap().release());
        log::info!("low-priority-holder: released lock, exiting");
    })
    .expect("spawn low-priority-holder");

    sched::spawn("high-priority-waiter", 50, || {
        log::info!("high-priority-waiter: waiting on donated lock");
        kernel_core::irq::without_interrupts(|| DONATION_LOCK.lock().as_mut().unwrap().acquire());
        log::info!("high-priority-waiter: acquired lock after donation, releasing");
        kernel_core::irq::without_interrupts(|| DONATION_LOCK.lock().as_mut().unwrap().release());
    })
    .expect("spawn high-priority-waiter");

    sched::spawn("sleeper", 20, || {
        let wake_at = kernel_core::Sched::current_tick() + 50;
        log::info!("sleeper: sleeping until tick {}", wake_at);
        kernel_core::sleep::sleep_until(wake_at);
        log::info!("sleeper: woke up at tick {}", kernel_core::Sched::current_tick());
    })
    .expect("spawn sleeper");

    sched::spawn("anon-fault", 15, || {
        const VADDR: usize = 0x4000_0000;
        kernel_core::Sched::with_current_mut(|t| {
            t.address_space = Some(1);
            t.spt
                .alloc_with_initializer(
                    VADDR,
                    true,
                    Box::new(|bytes| {
                        bytes.fill(0);
                        true
                    }),
                )
                .expect("alloc anon page");
        });
        unsafe {
            core::ptr::write_volatile(VADDR as *mut u8, 0x42);
        }
        log::info!("anon-fault: touched lazily-mapped page without crashing");
    })
    .expect("spawn anon-fault");

    sched::spawn("mmap-demo", 15, || {
        const VADDR: usize = 0x5000_0000;
        let file = devices::RamFile::new(vec![0u8; kernel_core::PAGE_SIZE]);
        kernel_core::Sched::with_current_mut(|t| {
            t.address_space = Some(1);
            kernel_core::vm::mmap(&mut t.spt, VADDR, kernel_core::PAGE_SIZE, &file, 0, true)
                .expect("mmap demo file");
        });
        unsafe {
            core::ptr::write_volatile(VADDR as *mut u8, 7);
        }
        kernel_core::Sched::with_current_mut(|t| {
            kernel_core::vm::munmap(1, &mut t.spt, VADDR).expect("munmap demo file");
        });
        log::info!("mmap-demo: wrote a FILE-backed page and unmapped it");
    })
    .expect("spawn mmap-demo");
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    x86_64::instructions::interrupts::disable();

    if let Some(location) = info.location() {
        log::error!("PANIC at {}:{}: {}", location.file(), location.line(), info.message());
    } else {
        log::error!("PANIC: {}", info.message());
    }

    loop {
        x86_64::instructions::hlt();
    }
}

/*
 * Interrupt controller
 *
 * Backs kernel-core's `InterruptController` with the real `cli`/`sti`
 * wrapper in `arch::x86_64::interrupts`, so every `without_interrupts`
 * critical section in the scheduler and synchronization primitives
 * masks real hardware interrupts on this CPU.
 */

use kernel_core::irq::InterruptController;

use crate::arch::x86_64::interrupts;

pub struct HardwareInterruptController;

impl InterruptController for HardwareInterruptController {
    fn disable(&self) {
        interrupts::disable();
    }

    fn enable(&self) {
        interrupts::enable();
    }

    fn are_enabled(&self) -> bool {
        interrupts::are_enabled()
    }
}

static CONTROLLER: HardwareInterruptController = HardwareInterruptController;

pub fn init() {
    kernel_core::irq::register_controller(&CONTROLLER);
}

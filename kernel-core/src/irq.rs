/*
 * Interrupt discipline
 *
 * Every ready-queue / sleep-list mutation needs to run with interrupts
 * masked off, the same way `without_interrupts(|| { ... })` gates a
 * critical section on x86. This module puts that behind a trait so
 * kernel-core doesn't depend on the `x86_64` crate directly: the
 * bare-metal `kernel` binary registers a controller that toggles
 * `cli`/`sti`, and the test double in `test_support` registers one
 * that just tracks a flag.
 *
 * Every mutating executive operation is expected to run inside
 * `without_interrupts`. Operations that must not be called with
 * interrupts already disabled (or already enabled) assert it and treat
 * a violation as fatal.
 */

use core::sync::atomic::{AtomicBool, Ordering};

/// A host-supplied way to mask and unmask the single CPU's interrupts.
pub trait InterruptController: Send + Sync {
    fn disable(&self);
    fn enable(&self);
    fn are_enabled(&self) -> bool;
}

struct NullController;

impl InterruptController for NullController {
    fn disable(&self) {}
    fn enable(&self) {}
    fn are_enabled(&self) -> bool {
        true
    }
}

static CONTROLLER: spin::Mutex<&'static dyn InterruptController> =
    spin::Mutex::new(&NullController);
static REGISTERED: AtomicBool = AtomicBool::new(false);

/// Register the host's interrupt controller. Must be called once during
/// boot before any scheduling operation runs.
pub fn register_controller(controller: &'static dyn InterruptController) {
    *CONTROLLER.lock() = controller;
    REGISTERED.store(true, Ordering::SeqCst);
}

/// True once interrupts are masked on the current (single) CPU.
pub fn interrupts_disabled() -> bool {
    !CONTROLLER.lock().are_enabled()
}

/// Run `f` with interrupts disabled, restoring the prior state afterward.
///
/// This is the only sanctioned way to touch the ready list, sleep list,
/// destruction queue, or donor graph - mirrors every `SCHEDULER.lock()`
/// critical section in the original kernel being wrapped in
/// `without_interrupts`.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let controller = *CONTROLLER.lock();
    let was_enabled = controller.are_enabled();
    if was_enabled {
        controller.disable();
    }
    let result = f();
    if was_enabled {
        controller.enable();
    }
    result
}

/// Fatal if interrupts are not currently disabled. Several scheduler
/// entry points (`block`, `sleep_until`) must never be reached with
/// interrupts on, since that would let a timer tick observe half-mutated
/// state.
pub fn assert_disabled() {
    if CONTROLLER.lock().are_enabled() {
        panic!("kernel-core: operation requires interrupts disabled");
    }
}

/// Fatal if called while already inside an interrupt handler context.
/// Interrupt context is tracked by the host via `enter_interrupt_context`
/// / `leave_interrupt_context` around IDT dispatch.
static IN_INTERRUPT_CONTEXT: AtomicBool = AtomicBool::new(false);

pub fn enter_interrupt_context() {
    IN_INTERRUPT_CONTEXT.store(true, Ordering::SeqCst);
}

pub fn leave_interrupt_context() {
    IN_INTERRUPT_CONTEXT.store(false, Ordering::SeqCst);
}

pub fn in_interrupt_context() -> bool {
    IN_INTERRUPT_CONTEXT.load(Ordering::SeqCst)
}

pub fn assert_not_interrupt_context() {
    if in_interrupt_context() {
        panic!("kernel-core: operation forbidden from interrupt context");
    }
}

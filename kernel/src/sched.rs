/*
 * Context switching
 *
 * Supplies kernel-core's `ContextSwitch`: a classic cooperative switch
 * that saves/restores only the callee-saved registers plus the stack
 * pointer, then jumps to the saved return address. Every thread gets
 * its own kernel stack and a `ThreadContext` slot here; kernel-core
 * itself never sees any of this, it only calls `launch(next)`.
 *
 * Brand-new threads never ran, so they have no "return into the call
 * that switched them out" to resume - their saved `rip` instead points
 * straight at `thread_trampoline`, which asks kernel-core who it is
 * and runs the body `spawn` parked for it. kernel-core's own
 * `Thread.entry` is private to kernel-core and never reachable from a
 * host binary, which is why `spawn` keeps its own copy in
 * `PENDING_ENTRIES`.
 */

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::arch::naked_asm;

use kernel_core::hw::ContextSwitch;
use kernel_core::{Result, Sched, ThreadId};
use spin::Mutex;

const STACK_SIZE: usize = 64 * 1024;

#[repr(C)]
#[derive(Clone, Copy)]
struct ThreadContext {
    rbx: u64,
    rbp: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    rsp: u64,
    rip: u64,
}

impl ThreadContext {
    const fn zeroed() -> Self {
        Self { rbx: 0, rbp: 0, r12: 0, r13: 0, r14: 0, r15: 0, rsp: 0, rip: 0 }
    }
}

static CONTEXTS: Mutex<BTreeMap<u64, ThreadContext>> = Mutex::new(BTreeMap::new());
static PENDING_ENTRIES: Mutex<BTreeMap<u64, Box<dyn FnOnce() + Send>>> = Mutex::new(BTreeMap::new());

/// Last thread `launch` switched to. kernel-core's `Thread.current` has
/// already moved to `next` by the time `launch(next)` runs, so this is
/// the only way to recover `prev` - the slot to save the outgoing
/// registers into.
static CURRENT: Mutex<ThreadId> = Mutex::new(ThreadId::IDLE);

/// A leaked, fixed-size stack. This is a teaching kernel: stacks are
/// never reclaimed when a thread exits.
fn alloc_stack_top() -> u64 {
    let stack = Box::leak(Box::new([0u8; STACK_SIZE]));
    stack.as_ptr() as u64 + STACK_SIZE as u64
}

/// Spawns a new thread: parks its entry closure here, builds a
/// bootstrap `ThreadContext` whose `rip` points at `thread_trampoline`,
/// and only then tells kernel-core about it. Order matters - once
/// `Sched::create` returns, the thread may already be on the ready list
/// and the wired-up context must exist before that happens.
pub fn spawn(name: &str, priority: u8, body: impl FnOnce() + Send + 'static) -> Result<ThreadId> {
    let stack_top = alloc_stack_top();

    let mut ctx = ThreadContext::zeroed();
    ctx.rip = thread_trampoline as u64;
    // Lands at stack_top - 8, i.e. 8 mod 16: the alignment a function
    // sees when it's reached via `call` rather than `jmp`, which is
    // what every compiled Rust function assumes at entry.
    ctx.rsp = (stack_top & !0xF) - 8;

    // kernel-core keeps its own copy of the entry closure for
    // bookkeeping but - being `pub(crate)` - never hands it back to us,
    // so the real body only ever runs out of `PENDING_ENTRIES`.
    let id = Sched::create(name, priority, Box::new(|| {}))?;

    PENDING_ENTRIES.lock().insert(id.0, Box::new(body));
    CONTEXTS.lock().insert(id.0, ctx);

    Ok(id)
}

extern "C" fn thread_trampoline() -> ! {
    let tid = Sched::current_id();
    let body = PENDING_ENTRIES.lock().remove(&tid.0);
    if let Some(body) = body {
        body();
    }
    Sched::exit(0);
}

/// Saves the callee-saved registers and `rsp` at `[from]`, loads them
/// from `[to]`, then jumps to the loaded `rip`. Used both to park a
/// thread mid-switch and, via the saved `rip`, to resume it later
/// exactly where it left off.
#[unsafe(naked)]
unsafe extern "C" fn switch_context(_from: *mut ThreadContext, _to: *const ThreadContext) {
    naked_asm!(
        "mov [rdi + 0x00], rbx",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], r12",
        "mov [rdi + 0x18], r13",
        "mov [rdi + 0x20], r14",
        "mov [rdi + 0x28], r15",
        "mov [rdi + 0x30], rsp",
        "lea rax, [rip + 2f]",
        "mov [rdi + 0x38], rax",
        "mov rbx, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov r12, [rsi + 0x10]",
        "mov r13, [rsi + 0x18]",
        "mov r14, [rsi + 0x20]",
        "mov r15, [rsi + 0x28]",
        "mov rsp, [rsi + 0x30]",
        "jmp [rsi + 0x38]",
        "2:",
        "ret",
    );
}

/// `ContextSwitch` backed by `switch_context`. Stateless itself; all
/// real state lives in `CONTEXTS`/`CURRENT` above, each behind its own
/// lock, since `launch` only ever takes `&self`.
pub struct HardwareContextSwitch;

impl ContextSwitch for HardwareContextSwitch {
    fn launch(&self, next: ThreadId) {
        let prev = {
            let mut current = CURRENT.lock();
            let prev = *current;
            *current = next;
            prev
        };
        if prev == next {
            return;
        }
        let (from_ptr, to_ptr) = {
            let mut contexts = CONTEXTS.lock();
            contexts.entry(prev.0).or_insert_with(ThreadContext::zeroed);
            let from_ptr = contexts.get_mut(&prev.0).unwrap() as *mut ThreadContext;
            let to_ptr = contexts
                .get(&next.0)
                .expect("switching to a thread with no saved context") as *const ThreadContext;
            (from_ptr, to_ptr)
        };
        // Lock dropped above: a real switch may park this call for a
        // long time, and any other thread's own `launch` needs to be
        // able to touch `CONTEXTS`/`CURRENT` while this one is parked.
        unsafe { switch_context(from_ptr, to_ptr) };
    }
}

static SWITCH: HardwareContextSwitch = HardwareContextSwitch;

/// Registers the real switch with kernel-core. Must run once during
/// boot, before the first `Sched::create`.
pub fn init() {
    kernel_core::sched::register_switch(&SWITCH);
}

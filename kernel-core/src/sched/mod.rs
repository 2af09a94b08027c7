/*
 * Scheduler core
 *
 * `Executive` is the single process-wide scheduler state - ready list,
 * sleep list, destruction queue, lock-holder registry, tick counters -
 * held behind a global `spin::Mutex` and reached only through `Sched`,
 * a zero-sized handle whose associated functions are the scheduler's
 * entire public surface. Every mutating function here must run with
 * interrupts disabled; see `crate::irq`.
 */

pub mod thread;

pub use thread::{Thread, ThreadId, ThreadState};

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::vec::Vec;

use crate::constants::TIME_SLICE;
use crate::error::{KernelError, Result};
use crate::hw::{AddressSpaceId, ContextSwitch};
use crate::irq;
use crate::sync::LockId;

struct Executive {
    threads: BTreeMap<ThreadId, Thread>,
    ready_list: Vec<ThreadId>,
    sleep_list: Vec<ThreadId>,
    destruction_req: Vec<ThreadId>,
    lock_holders: BTreeMap<LockId, ThreadId>,
    next_thread_id: u64,
    next_lock_id: u64,
    current: ThreadId,
    idle: ThreadId,
    ticks: i64,
    ticks_since_slice_reset: u32,
    next_wakeup_tick: i64,
    state: crate::ExecutiveState,
}

/// A `launch` that does nothing, matching `irq::NullController`: the
/// state before the host registers a real switch during boot.
struct NullSwitch;

impl ContextSwitch for NullSwitch {
    fn launch(&self, _next: ThreadId) {}
}

/// The registered context switch, held outside `Executive` entirely.
/// `schedule()` must drop the `EXECUTIVE` guard before calling
/// `launch` - the raw stack swap a real implementation performs may
/// not return to this call for a long time (possibly never, for a
/// thread that's exiting), and every other scheduling operation needs
/// to be able to lock `EXECUTIVE` in the meantime. A `&'static dyn`
/// behind its own lock, copied out and called after that lock is
/// dropped, is exactly the `irq::CONTROLLER` pattern.
static SWITCH: spin::Mutex<&'static dyn ContextSwitch> = spin::Mutex::new(&NullSwitch);

/// Register the host's context switch. Must be called once during
/// boot, any time before the first `schedule()` that actually needs to
/// hand off to a different thread.
pub fn register_switch(switch: &'static dyn ContextSwitch) {
    *SWITCH.lock() = switch;
}

impl Executive {
    fn thread(&self, id: ThreadId) -> &Thread {
        self.threads.get(&id).expect("unknown thread id")
    }

    fn thread_mut(&mut self, id: ThreadId) -> &mut Thread {
        self.threads.get_mut(&id).expect("unknown thread id")
    }

    fn insert_ready_in_priority_order(&mut self, id: ThreadId) {
        let pri = self.thread(id).effective_priority;
        let pos = self
            .ready_list
            .iter()
            .position(|&other| self.threads[&other].effective_priority < pri)
            .unwrap_or(self.ready_list.len());
        self.ready_list.insert(pos, id);
    }

    fn reap_destroyed(&mut self) {
        for id in core::mem::take(&mut self.destruction_req) {
            self.threads.remove(&id);
        }
    }
}

static EXECUTIVE: spin::Mutex<Option<Executive>> = spin::Mutex::new(None);

fn with_executive<R>(f: impl FnOnce(&Executive) -> R) -> R {
    let guard = EXECUTIVE.lock();
    f(guard.as_ref().expect("scheduler not started"))
}

fn with_executive_mut<R>(f: impl FnOnce(&mut Executive) -> R) -> R {
    let mut guard = EXECUTIVE.lock();
    f(guard.as_mut().expect("scheduler not started"))
}

/// Zero-sized handle onto the scheduler. Every associated function is
/// the public surface of this module; nothing reaches `Executive`
/// directly from outside `sched`.
pub struct Sched;

impl Sched {
    /// `start()`: brings the executive up with a single idle thread
    /// and makes it current. Must run exactly once, before any other
    /// `Sched` call.
    pub fn start() {
        let mut exec = Executive {
            threads: BTreeMap::new(),
            ready_list: Vec::new(),
            sleep_list: Vec::new(),
            destruction_req: Vec::new(),
            lock_holders: BTreeMap::new(),
            next_thread_id: 1,
            next_lock_id: 1,
            current: ThreadId::IDLE,
            idle: ThreadId::IDLE,
            ticks: 0,
            ticks_since_slice_reset: 0,
            next_wakeup_tick: i64::MAX,
            state: crate::ExecutiveState::Running,
        };
        let idle = Thread::new(ThreadId::IDLE, String::from("idle"), crate::constants::PRI_MIN, None);
        exec.threads.insert(ThreadId::IDLE, idle);
        exec.thread_mut(ThreadId::IDLE).state = ThreadState::Running;
        *EXECUTIVE.lock() = Some(exec);
    }

    /// Current lifecycle stage of the executive singleton.
    pub fn state() -> crate::ExecutiveState {
        EXECUTIVE
            .lock()
            .as_ref()
            .map(|e| e.state)
            .unwrap_or(crate::ExecutiveState::Uninitialized)
    }

    /// Marks the executive as shutting down. Existing threads are left
    /// in place; `schedule` keeps running until the caller tears the
    /// singleton down for good (tests do this via `shutdown_for_test`).
    pub fn begin_shutdown() {
        with_executive_mut(|exec| exec.state = crate::ExecutiveState::ShuttingDown);
    }

    /// `create(name, priority, entry) -> tid`: allocates a thread
    /// struct (created `BLOCKED`), enqueues it via `unblock`, then
    /// preempts current if outranked.
    pub fn create(name: &str, priority: u8, entry: Box<dyn FnOnce() + Send>) -> Result<ThreadId> {
        let id = irq::without_interrupts(|| {
            with_executive_mut(|exec| {
                let id = ThreadId(exec.next_thread_id);
                exec.next_thread_id += 1;
                let thread = Thread::new(id, String::from(name), priority, Some(entry));
                exec.threads.insert(id, thread);
                id
            })
        });
        irq::without_interrupts(|| Self::unblock(id));
        Self::preempt_if_outranked();
        Ok(id)
    }

    pub fn current_id() -> ThreadId {
        with_executive(|exec| exec.current)
    }

    pub fn with_thread<R>(id: ThreadId, f: impl FnOnce(&Thread) -> R) -> R {
        with_executive(|exec| f(exec.thread(id)))
    }

    pub fn with_thread_mut<R>(id: ThreadId, f: impl FnOnce(&mut Thread) -> R) -> R {
        with_executive_mut(|exec| f(exec.thread_mut(id)))
    }

    pub fn with_current<R>(f: impl FnOnce(&Thread) -> R) -> R {
        with_executive(|exec| f(exec.thread(exec.current)))
    }

    pub fn with_current_mut<R>(f: impl FnOnce(&mut Thread) -> R) -> R {
        with_executive_mut(|exec| {
            let cur = exec.current;
            f(exec.thread_mut(cur))
        })
    }

    /// `block()`: must run with interrupts disabled, not from
    /// interrupt context. Sets current to `BLOCKED`; does not enqueue
    /// anywhere - the caller is responsible for eventually unblocking.
    pub fn block_current() {
        irq::assert_disabled();
        irq::assert_not_interrupt_context();
        with_executive_mut(|exec| {
            let cur = exec.current;
            exec.thread_mut(cur).state = ThreadState::Blocked;
        });
    }

    /// `unblock(t)`: inserts `t` into the ready list in priority order
    /// and marks it `READY`. Does not itself preempt the caller.
    pub fn unblock(t: ThreadId) {
        irq::assert_disabled();
        with_executive_mut(|exec| {
            debug_assert_eq!(exec.thread(t).state, ThreadState::Blocked);
            exec.thread_mut(t).state = ThreadState::Ready;
            exec.insert_ready_in_priority_order(t);
        });
    }

    /// `yield()`: if current isn't idle, requeues it and reschedules
    /// with status `READY`.
    pub fn yield_now() {
        irq::without_interrupts(|| {
            with_executive_mut(|exec| {
                let cur = exec.current;
                if cur != exec.idle {
                    exec.thread_mut(cur).state = ThreadState::Ready;
                    exec.insert_ready_in_priority_order(cur);
                }
            });
            Self::schedule();
        });
    }

    /// `exit()`: transitions current to `DYING` and reschedules. The
    /// next `schedule` reclaims its thread-struct page.
    pub fn exit(code: i32) -> ! {
        irq::without_interrupts(|| {
            with_executive_mut(|exec| {
                let cur = exec.current;
                exec.thread_mut(cur).exit_code = Some(code);
                exec.thread_mut(cur).state = ThreadState::Dying;
                exec.destruction_req.push(cur);
            });
            Self::schedule();
        });
        unreachable!("schedule() never returns into a DYING thread");
    }

    /// `set_priority(p)`: changes current's base priority and
    /// refreshes its effective priority, then may yield if it no
    /// longer outranks the ready list's head.
    pub fn set_priority(priority: u8) {
        irq::without_interrupts(|| {
            with_executive_mut(|exec| {
                let cur = exec.current;
                let donor_priorities: Vec<u8> = exec
                    .thread(cur)
                    .donors
                    .iter()
                    .map(|&d| exec.thread(d).effective_priority)
                    .collect();
                let t = exec.thread_mut(cur);
                t.base_priority = priority;
                t.refresh_priority(donor_priorities.into_iter());
            });
        });
        Self::preempt_if_outranked();
    }

    /// If the ready list's head strictly outranks current, yields
    /// immediately. Called after `create`, `unblock`, and
    /// `set_priority` so priority changes take effect promptly.
    pub fn preempt_if_outranked() {
        irq::without_interrupts(|| {
            let should_yield = with_executive(|exec| {
                let cur_pri = exec.thread(exec.current).effective_priority;
                exec.ready_list
                    .first()
                    .map(|&head| exec.thread(head).effective_priority > cur_pri)
                    .unwrap_or(false)
            });
            if should_yield {
                Self::yield_now();
            }
        });
    }

    /// Scheduling core: runs with interrupts off and current's status
    /// already set to its outgoing state. Pops the ready list's head
    /// (or idle when empty), marks it running, resets the time-slice
    /// counter, activates its address space if present, and hands off
    /// via `launch` if it differs from current.
    pub fn schedule() {
        irq::assert_disabled();
        let (next, prev) = with_executive_mut(|exec| {
            exec.reap_destroyed();
            let next = if exec.ready_list.is_empty() {
                exec.idle
            } else {
                exec.ready_list.remove(0)
            };
            let prev = exec.current;
            exec.current = next;
            exec.thread_mut(next).state = ThreadState::Running;
            exec.ticks_since_slice_reset = 0;
            (next, prev)
        });
        // `EXECUTIVE` is unlocked by this point. A real `launch` may
        // not return here for a long time - possibly not until some
        // other thread's own `schedule()` switches back to `prev` -
        // so nothing in this module may still be holding the lock
        // when it's called. Address-space activation happens inside
        // the host's `launch` impl, which has the registered `Mmu` in
        // scope; kernel-core only decides *that* a switch is needed.
        if next != prev {
            let switch = *SWITCH.lock();
            switch.launch(next);
        }
    }

    /// Tick handler: advances the tick counter, runs the sleep-wake
    /// sweep, and preempts current if its time slice has run out and
    /// someone of equal-or-higher priority is ready.
    pub fn tick() {
        irq::assert_disabled();
        let expired = with_executive_mut(|exec| {
            exec.ticks += 1;
            exec.ticks_since_slice_reset += 1;
            exec.ticks_since_slice_reset >= TIME_SLICE
        });
        crate::sleep::wake_sweep(Self::current_tick());
        if expired {
            Self::yield_now();
        }
    }

    pub fn current_tick() -> i64 {
        with_executive(|exec| exec.ticks)
    }

    pub(crate) fn next_wakeup_tick() -> i64 {
        with_executive(|exec| exec.next_wakeup_tick)
    }

    pub(crate) fn set_next_wakeup_tick(tick: i64) {
        with_executive_mut(|exec| exec.next_wakeup_tick = tick);
    }

    pub(crate) fn push_sleeping(id: ThreadId, wakeup_tick: i64) {
        with_executive_mut(|exec| {
            exec.thread_mut(id).wakeup_tick = Some(wakeup_tick);
            exec.sleep_list.push(id);
        });
    }

    pub(crate) fn drain_due_sleepers(now: i64) -> Vec<ThreadId> {
        with_executive_mut(|exec| {
            let mut due = Vec::new();
            exec.sleep_list.retain(|&id| {
                let wake = exec.threads[&id].wakeup_tick.expect("sleeping thread without wakeup_tick");
                if wake <= now {
                    due.push(id);
                    false
                } else {
                    true
                }
            });
            due
        })
    }

    pub(crate) fn pending_wakeup_ticks() -> Vec<i64> {
        with_executive(|exec| {
            exec.sleep_list
                .iter()
                .map(|&id| exec.threads[&id].wakeup_tick.expect("sleeping thread without wakeup_tick"))
                .collect()
        })
    }

    pub fn alloc_lock_id() -> LockId {
        with_executive_mut(|exec| {
            let id = LockId(exec.next_lock_id);
            exec.next_lock_id += 1;
            id
        })
    }

    pub(crate) fn lock_holder(id: LockId) -> Option<ThreadId> {
        with_executive(|exec| exec.lock_holders.get(&id).copied())
    }

    pub(crate) fn set_lock_holder(id: LockId, holder: Option<ThreadId>) {
        with_executive_mut(|exec| match holder {
            Some(t) => {
                exec.lock_holders.insert(id, t);
            }
            None => {
                exec.lock_holders.remove(&id);
            }
        });
    }

    /// Reaches into the address space owner's SPT to write a victim
    /// frame back during eviction. `vm` tracks (space, vaddr, frame)
    /// triples but not thread identity, so the lookup lives here.
    pub(crate) fn swap_out_owned_frame(
        space: AddressSpaceId,
        vaddr: usize,
        frame_bytes: &[u8],
    ) -> Result<()> {
        with_executive_mut(|exec| {
            let owner = exec
                .threads
                .values_mut()
                .find(|t| t.address_space == Some(space))
                .ok_or(KernelError::NotMapped)?;
            crate::vm::swap_out_spte(space, &mut owner.spt, vaddr, frame_bytes)
        })
    }

    #[cfg(test)]
    pub fn ready_list_for_test() -> Vec<ThreadId> {
        with_executive(|exec| exec.ready_list.clone())
    }

    #[cfg(test)]
    pub fn donors_for_test(id: ThreadId) -> BTreeSet<ThreadId> {
        with_executive(|exec| exec.thread(id).donors.clone())
    }

    #[cfg(test)]
    pub fn force_current_for_test(id: ThreadId) -> ThreadId {
        with_executive_mut(|exec| {
            let prev = exec.current;
            exec.current = id;
            exec.thread_mut(id).state = ThreadState::Running;
            prev
        })
    }

    #[cfg(test)]
    pub fn run_entry_for_test(id: ThreadId) {
        let entry = with_executive_mut(|exec| exec.thread_mut(id).entry.take());
        if let Some(entry) = entry {
            entry();
        }
    }

    #[cfg(test)]
    pub fn shutdown_for_test() {
        *EXECUTIVE.lock() = None;
    }
}

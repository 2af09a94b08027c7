/*
 * Binary/counting semaphore
 *
 * Blocking wait with a FIFO waiter list, woken in effective-priority
 * order on every `up` rather than strict FIFO - this is what makes a
 * lock built on top of it donation-aware rather than plain mutual
 * exclusion.
 */

use alloc::vec::Vec;

use crate::irq;
use crate::sched::{Sched, ThreadId};

pub struct Semaphore {
    value: u32,
    waiters: Vec<ThreadId>,
}

impl Semaphore {
    pub const fn new(value: u32) -> Self {
        Self {
            value,
            waiters: Vec::new(),
        }
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Appends the current thread as a waiter, then blocks until `value`
    /// is positive, at which point it decrements it and returns. Must be
    /// called with interrupts disabled; never from interrupt context.
    pub fn down(&mut self) {
        irq::assert_disabled();
        irq::assert_not_interrupt_context();
        let cur = Sched::current_id();
        self.waiters.push(cur);
        while self.value == 0 {
            Sched::block_current();
            Sched::schedule();
        }
        self.waiters.retain(|&id| id != cur);
        self.value -= 1;
    }

    /// Non-blocking variant used by the fast (uncontended) acquire path
    /// and by tests that need to drive the waiter list without risking
    /// a `down` that can never be woken on a host test double.
    pub fn try_down(&mut self) -> bool {
        irq::assert_disabled();
        if self.value > 0 {
            self.value -= 1;
            true
        } else {
            false
        }
    }

    /// Increments `value` and, if anyone is waiting, unblocks the waiter
    /// with the highest current effective priority (ties break FIFO).
    /// The waiter only leaves `waiters` once it resumes inside `down`.
    pub fn up(&mut self) {
        irq::assert_disabled();
        self.value += 1;
        if let Some(winner) = self.highest_priority_waiter() {
            Sched::unblock(winner);
        }
    }

    #[cfg(test)]
    pub(crate) fn waiters_for_test(&mut self) -> &mut Vec<ThreadId> {
        &mut self.waiters
    }

    fn highest_priority_waiter(&self) -> Option<ThreadId> {
        let mut best: Option<(u8, usize, ThreadId)> = None;
        for (i, &tid) in self.waiters.iter().enumerate() {
            let pri = Sched::with_thread(tid, |t| t.effective_priority);
            let better = match best {
                None => true,
                Some((best_pri, best_i, _)) => pri > best_pri || (pri == best_pri && i < best_i),
            };
            if better {
                best = Some((pri, i, tid));
            }
        }
        best.map(|(_, _, tid)| tid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::with_test_executive;

    #[test]
    fn try_down_respects_value() {
        with_test_executive(|| {
            let mut sem = Semaphore::new(1);
            assert!(sem.try_down());
            assert!(!sem.try_down());
            sem.up();
            assert!(sem.try_down());
        });
    }

    #[test]
    fn up_wakes_highest_priority_waiter() {
        with_test_executive(|| {
            let mut sem = Semaphore::new(0);
            let low = Sched::create("low", 20, alloc::boxed::Box::new(|| {})).unwrap();
            let high = Sched::create("high", 40, alloc::boxed::Box::new(|| {})).unwrap();
            for id in [low, high] {
                Sched::with_thread_mut(id, |t| t.state = crate::sched::ThreadState::Blocked);
            }
            sem.waiters_for_test().extend([low, high]);
            sem.up();
            assert_eq!(Sched::with_thread(high, |t| t.state), crate::sched::ThreadState::Ready);
            assert_eq!(Sched::with_thread(low, |t| t.state), crate::sched::ThreadState::Blocked);
        });
    }
}

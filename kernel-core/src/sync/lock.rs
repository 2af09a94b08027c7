/*
 * Donation-aware lock
 *
 * A binary semaphore plus a `holder`. Acquiring a held lock registers
 * the caller as a donor and walks the `waiting_on_lock -> holder`
 * chain, lifting each link's effective priority to the chain tip's -
 * this is what turns priority scheduling into priority-inheritance
 * scheduling. The chain is walked through `Sched`'s lock-holder
 * registry rather than raw pointers, since locks here are owned by
 * whatever kernel object embeds them, not by the scheduler.
 */

use crate::constants::DONATE_MAX_DEPTH;
use crate::irq;
use crate::sched::{Sched, ThreadId};
use crate::sync::semaphore::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(pub u64);

pub struct Lock {
    id: LockId,
    holder: Option<ThreadId>,
    sem: Semaphore,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            id: Sched::alloc_lock_id(),
            holder: None,
            sem: Semaphore::new(1),
        }
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    pub fn holder(&self) -> Option<ThreadId> {
        self.holder
    }

    pub fn is_held(&self) -> bool {
        self.holder.is_some()
    }

    /// Registers `waiter` as blocked on this lock and lifts every
    /// thread along the `waiting_on_lock -> holder` chain to
    /// `waiter`'s current effective priority, bounded at
    /// `DONATE_MAX_DEPTH` links. Exposed at crate visibility so tests
    /// can exercise donation without risking a `down` that a host test
    /// double can't actually resume from.
    pub(crate) fn donate_for(&self, waiter: ThreadId) {
        let Some(mut owner) = self.holder else {
            return;
        };
        Sched::with_thread_mut(owner, |t| {
            t.donors.insert(waiter);
        });
        let donor_priority = Sched::with_thread(waiter, |t| t.effective_priority);
        for _ in 0..DONATE_MAX_DEPTH {
            let raised = Sched::with_thread_mut(owner, |t| {
                if donor_priority > t.effective_priority {
                    t.effective_priority = donor_priority;
                    true
                } else {
                    false
                }
            });
            if !raised {
                break;
            }
            let next_lock = Sched::with_thread(owner, |t| t.waiting_on_lock);
            match next_lock.and_then(Sched::lock_holder) {
                Some(next_owner) if next_owner != owner => owner = next_owner,
                _ => break,
            }
        }
    }

    /// `acquire`: if the lock is held, donates then blocks on the
    /// embedded semaphore until woken with it free. On acquisition,
    /// sets `holder` and clears current's `waiting_on_lock`.
    pub fn acquire(&mut self) {
        irq::assert_disabled();
        let cur = Sched::current_id();
        if self.holder.is_some() {
            Sched::with_thread_mut(cur, |t| t.waiting_on_lock = Some(self.id));
            self.donate_for(cur);
        }
        self.sem.down();
        self.holder = Some(cur);
        Sched::set_lock_holder(self.id, Some(cur));
        Sched::with_thread_mut(cur, |t| t.waiting_on_lock = None);
    }

    /// Non-blocking variant of `acquire`, used by tests and by the
    /// uncontended fast path.
    pub fn try_acquire(&mut self) -> bool {
        irq::assert_disabled();
        if self.sem.try_down() {
            let cur = Sched::current_id();
            self.holder = Some(cur);
            Sched::set_lock_holder(self.id, Some(cur));
            true
        } else {
            false
        }
    }

    /// `release`: strips every donor whose `waiting_on_lock` is this
    /// lock, recomputes current's effective priority from its
    /// remaining donors, clears `holder`, and wakes the
    /// highest-priority waiter.
    pub fn release(&mut self) {
        irq::assert_disabled();
        let cur = Sched::current_id();
        debug_assert_eq!(self.holder, Some(cur));
        let id = self.id;
        Sched::with_thread_mut(cur, |t| {
            t.donors.retain(|&d| Sched::with_thread(d, |dt| dt.waiting_on_lock) != Some(id));
        });
        let donor_priorities: alloc::vec::Vec<u8> =
            Sched::with_thread(cur, |t| t.donors.iter().map(|&d| Sched::with_thread(d, |dt| dt.effective_priority)).collect());
        Sched::with_thread_mut(cur, |t| t.refresh_priority(donor_priorities.into_iter()));
        self.holder = None;
        Sched::set_lock_holder(id, None);
        self.sem.up();
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::with_test_executive;
    use alloc::boxed::Box;

    #[test]
    fn uncontended_acquire_release_round_trips() {
        with_test_executive(|| {
            let mut lock = Lock::new();
            assert!(lock.try_acquire());
            assert_eq!(lock.holder(), Some(Sched::current_id()));
            lock.release();
            assert_eq!(lock.holder(), None);
        });
    }

    #[test]
    fn nested_donation_lifts_the_whole_chain() {
        with_test_executive(|| {
            let a = Sched::create("a", 10, Box::new(|| {})).unwrap();
            let b = Sched::create("b", 20, Box::new(|| {})).unwrap();
            let c = Sched::create("c", 30, Box::new(|| {})).unwrap();

            let mut lock_ab = Lock::new();
            let mut lock_bc = Lock::new();

            Sched::force_current_for_test(a);
            assert!(lock_ab.try_acquire());

            Sched::force_current_for_test(b);
            assert!(lock_bc.try_acquire());
            Sched::with_thread_mut(b, |t| t.waiting_on_lock = Some(lock_ab.id()));
            lock_ab.donate_for(b);
            assert_eq!(Sched::with_thread(a, |t| t.effective_priority), 20);

            Sched::with_thread_mut(c, |t| t.waiting_on_lock = Some(lock_bc.id()));
            lock_bc.donate_for(c);
            // b's chain link (waiting_on_lock) points at lock_ab, so c's
            // donation should propagate past b and lift a too.
            assert_eq!(Sched::with_thread(b, |t| t.effective_priority), 30);
            assert_eq!(Sched::with_thread(a, |t| t.effective_priority), 30);

            Sched::force_current_for_test(a);
            lock_ab.release();
            assert_eq!(Sched::with_thread(a, |t| t.effective_priority), 10);
        });
    }
}

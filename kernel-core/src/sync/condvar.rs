/*
 * Mesa-style condition variable
 *
 * Each waiter gets its own one-shot semaphore rather than sharing a
 * single counting semaphore, so `signal` can target the
 * highest-effective-priority waiter specifically instead of whichever
 * happened to be released first.
 */

use alloc::vec::Vec;

use crate::irq;
use crate::sched::{Sched, ThreadId};
use crate::sync::lock::Lock;
use crate::sync::semaphore::Semaphore;

struct Waiter {
    thread: ThreadId,
    ready: Semaphore,
}

pub struct CondVar {
    waiters: Vec<Waiter>,
}

impl CondVar {
    pub const fn new() -> Self {
        Self { waiters: Vec::new() }
    }

    /// Atomically releases `lock` and blocks on a private one-shot
    /// semaphore; reacquires `lock` once woken. Mesa semantics: the
    /// condition must be re-checked by the caller after `wait`
    /// returns, since nothing prevents another thread from observing
    /// it true first.
    pub fn wait(&mut self, lock: &mut Lock) {
        irq::assert_disabled();
        self.waiters.push(Waiter {
            thread: Sched::current_id(),
            ready: Semaphore::new(0),
        });
        lock.release();
        let idx = self.waiters.len() - 1;
        self.waiters[idx].ready.down();
        lock.acquire();
    }

    /// Wakes the waiter with the highest current effective priority
    /// (ties break FIFO), if any.
    pub fn signal(&mut self) {
        irq::assert_disabled();
        if self.waiters.is_empty() {
            return;
        }
        let mut best = 0usize;
        let mut best_pri = Sched::with_thread(self.waiters[0].thread, |t| t.effective_priority);
        for (i, w) in self.waiters.iter().enumerate().skip(1) {
            let pri = Sched::with_thread(w.thread, |t| t.effective_priority);
            if pri > best_pri {
                best = i;
                best_pri = pri;
            }
        }
        let woken = self.waiters.remove(best);
        woken.ready.up();
    }

    /// Wakes every waiter.
    pub fn broadcast(&mut self) {
        irq::assert_disabled();
        for w in self.waiters.drain(..) {
            w.ready.up();
        }
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::with_test_executive;
    use alloc::boxed::Box;

    fn push_blocked_waiter(cv: &mut CondVar, id: ThreadId) {
        Sched::with_thread_mut(id, |t| t.state = crate::sched::ThreadState::Blocked);
        let mut ready = Semaphore::new(0);
        // Mirrors what a real `ready.down()` would have left behind:
        // the waiting thread registered on the one-shot semaphore.
        ready.waiters_for_test().push(id);
        cv.waiters.push(Waiter { thread: id, ready });
    }

    #[test]
    fn signal_wakes_highest_priority_waiter() {
        with_test_executive(|| {
            let mut cv = CondVar::new();
            let low = Sched::create("low", 15, Box::new(|| {})).unwrap();
            let high = Sched::create("high", 45, Box::new(|| {})).unwrap();
            push_blocked_waiter(&mut cv, low);
            push_blocked_waiter(&mut cv, high);
            cv.signal();
            assert_eq!(Sched::with_thread(high, |t| t.state), crate::sched::ThreadState::Ready);
            assert_eq!(Sched::with_thread(low, |t| t.state), crate::sched::ThreadState::Blocked);
            assert_eq!(cv.waiters.len(), 1);
        });
    }

    #[test]
    fn broadcast_wakes_everyone() {
        with_test_executive(|| {
            let mut cv = CondVar::new();
            let a = Sched::create("a", 10, Box::new(|| {})).unwrap();
            let b = Sched::create("b", 10, Box::new(|| {})).unwrap();
            push_blocked_waiter(&mut cv, a);
            push_blocked_waiter(&mut cv, b);
            cv.broadcast();
            assert!(cv.waiters.is_empty());
            assert_eq!(Sched::with_thread(a, |t| t.state), crate::sched::ThreadState::Ready);
            assert_eq!(Sched::with_thread(b, |t| t.state), crate::sched::ThreadState::Ready);
        });
    }
}

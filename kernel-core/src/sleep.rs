/*
 * Timed sleep
 *
 * A thread that calls `sleep_until` parks itself on the executive's
 * sleep list with an absolute wake tick; the timer tick handler runs
 * `wake_sweep` to unblock anything whose deadline has passed.
 * `next_wakeup_tick` lets the tick handler skip the sweep entirely on
 * quiet ticks once nothing is pending.
 */

use crate::irq;
use crate::sched::{Sched, ThreadId};

/// Blocks current until the absolute tick `abs_tick` has passed. Fatal
/// if called from the idle thread.
pub fn sleep_until(abs_tick: i64) {
    irq::without_interrupts(|| {
        assert!(
            Sched::current_id() != ThreadId::IDLE,
            "idle thread may not sleep_until"
        );
        let prev = Sched::next_wakeup_tick();
        Sched::push_sleeping(Sched::current_id(), abs_tick);
        Sched::set_next_wakeup_tick(prev.min(abs_tick));
        Sched::block_current();
        Sched::schedule();
    });
}

/// Called from the tick interrupt handler. Resets `next_wakeup_tick`
/// to the minimum of whatever remains pending, unblocking every
/// thread whose deadline has passed.
pub fn wake_sweep(now: i64) {
    irq::assert_disabled();
    if Sched::next_wakeup_tick() > now {
        return;
    }
    let due = Sched::drain_due_sleepers(now);
    for id in due {
        Sched::unblock(id);
    }
    let remaining_min = Sched::pending_wakeup_ticks().into_iter().min().unwrap_or(i64::MAX);
    Sched::set_next_wakeup_tick(remaining_min);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::with_test_executive;

    #[test]
    fn wake_order_matches_deadlines() {
        with_test_executive(|| {
            let waker_a = Sched::create("a", 20, alloc::boxed::Box::new(|| {})).unwrap();
            let waker_b = Sched::create("b", 20, alloc::boxed::Box::new(|| {})).unwrap();
            let waker_c = Sched::create("c", 20, alloc::boxed::Box::new(|| {})).unwrap();
            // `create` already unblocked these onto the ready list; drop
            // them back to BLOCKED so wake_sweep's unblock is valid,
            // mirroring the precondition sleep_until itself guarantees.
            for id in [waker_a, waker_b, waker_c] {
                Sched::with_thread_mut(id, |t| t.state = crate::sched::ThreadState::Blocked);
            }
            irq::without_interrupts(|| {
                Sched::push_sleeping(waker_a, 10);
                Sched::push_sleeping(waker_b, 20);
                Sched::push_sleeping(waker_c, 15);
            });
            Sched::set_next_wakeup_tick(10);

            for (tick, expect_awake) in [(9, None), (10, Some(waker_a)), (15, Some(waker_c)), (20, Some(waker_b))] {
                let awakened_before = Sched::with_thread(waker_a, |t| t.state);
                let _ = awakened_before;
                irq::without_interrupts(|| wake_sweep(tick));
                if let Some(id) = expect_awake {
                    assert_eq!(Sched::with_thread(id, |t| t.state), crate::sched::ThreadState::Ready);
                }
            }
            assert_eq!(Sched::next_wakeup_tick(), i64::MAX);
        });
    }
}

/*
 * End-to-end scenario tests
 *
 * Each of these exercises one of the concrete behaviors call out across
 * the scheduler, sleep, and page subsystems - as opposed to the
 * per-module unit tests living alongside each primitive.
 */

use alloc::boxed::Box;
use alloc::vec;

use crate::constants::PAGE_SIZE;
use crate::sched::Sched;
use crate::sync::Lock;
use crate::test_support::{with_test_executive, FakeBlockDevice, FakeFrameSource, FakeMmu};
use crate::vm;

#[test]
fn s1_higher_priority_thread_preempts_immediately() {
    with_test_executive(|| {
        let low = Sched::create("low", 20, Box::new(|| {})).unwrap();
        // Any non-idle priority outranks the idle thread, so `low`
        // should already be running.
        assert_eq!(Sched::current_id(), low);
        let high = Sched::create("high", 50, Box::new(|| {})).unwrap();
        // create() -> unblock() -> preempt_if_outranked() should have
        // requeued `low` and scheduled `high` in immediately.
        assert_eq!(Sched::current_id(), high);
        assert!(Sched::ready_list_for_test().contains(&low));
    });
}

#[test]
fn s2_release_without_other_donors_restores_base_priority() {
    with_test_executive(|| {
        let a = Sched::create("a", 10, Box::new(|| {})).unwrap();
        let b = Sched::create("b", 35, Box::new(|| {})).unwrap();

        Sched::force_current_for_test(a);
        let mut lock = Lock::new();
        assert!(lock.try_acquire());

        Sched::force_current_for_test(b);
        Sched::with_thread_mut(b, |t| t.waiting_on_lock = Some(lock.id()));
        lock.donate_for(b);
        assert_eq!(Sched::with_thread(a, |t| t.effective_priority), 35);

        Sched::force_current_for_test(a);
        lock.release();
        assert_eq!(Sched::with_thread(a, |t| t.effective_priority), 10);
        assert_eq!(Sched::donors_for_test(a).len(), 0);
    });
}

#[test]
fn s4_lazy_anon_page_faults_in_on_first_touch() {
    with_test_executive(|| {
        vm::init(
            Box::new(FakeMmu::new()),
            Box::new(FakeFrameSource::new(4)),
            Box::new(FakeBlockDevice::new(crate::constants::SECTORS_PER_PAGE * 4)),
        );
        let mut spt = vm::Spt::new();
        spt.alloc_with_initializer(
            0x8000,
            true,
            Box::new(|bytes| {
                bytes.fill(0);
                true
            }),
        )
        .unwrap();
        assert!(spt.find(0x8000).unwrap().frame.is_none());
        let outcome = vm::handle_fault(1, &mut spt, 0x8000, 0x8000, true).unwrap();
        assert_eq!(outcome, vm::FaultOutcome::Resolved);
        assert!(spt.find(0x8000).unwrap().frame.is_some());
    });
}

#[test]
fn s4_fault_below_stack_pointer_grows_the_stack() {
    with_test_executive(|| {
        vm::init(
            Box::new(FakeMmu::new()),
            Box::new(FakeFrameSource::new(4)),
            Box::new(FakeBlockDevice::new(crate::constants::SECTORS_PER_PAGE * 4)),
        );
        let mut spt = vm::Spt::new();
        // `stack_top` is the bottom of the one page currently mapped
        // for the stack; the user rsp sits right at it, so a small
        // PUSH underflows into the unmapped page just below.
        let stack_top = 0x7fff_0000usize;
        spt.alloc_with_initializer(stack_top, true, Box::new(|b| { b.fill(0); true })).unwrap();
        vm::handle_fault(1, &mut spt, stack_top, stack_top as u64, true).unwrap();

        let user_rsp = stack_top as u64;
        let fault_addr = stack_top - 8;
        let outcome = vm::handle_fault(1, &mut spt, fault_addr, user_rsp, true).unwrap();
        assert_eq!(outcome, vm::FaultOutcome::StackGrowth);
        assert!(spt.find(stack_top - PAGE_SIZE).is_some());
    });
}

#[test]
fn s5_eviction_writes_back_and_refault_restores_content() {
    with_test_executive(|| {
        vm::init(
            Box::new(FakeMmu::new()),
            // Exactly one frame: the second `claim` below has nowhere to
            // go but eviction of the first page.
            Box::new(FakeFrameSource::new(1)),
            Box::new(FakeBlockDevice::new(crate::constants::SECTORS_PER_PAGE * 4)),
        );
        let mut spt = vm::Spt::new();
        spt.alloc_with_initializer(0x20000, true, Box::new(|b| { b.fill(0); true })).unwrap();
        vm::claim(1, &mut spt, 0x20000).unwrap();

        let pattern = [0xabu8; PAGE_SIZE];
        vm::write_resident_bytes(&spt, 0x20000, &pattern);

        // Forces eviction of 0x20000's page (the clock algorithm itself,
        // including accessed-bit clearing, is covered directly in frame.rs).
        spt.alloc_with_initializer(0x21000, true, Box::new(|b| { b.fill(0); true })).unwrap();
        vm::claim(1, &mut spt, 0x21000).unwrap();
        assert!(spt.find(0x20000).unwrap().frame.is_none());

        // Refaulting 0x20000 evicts 0x21000 in turn and swaps 0x20000 back in.
        vm::claim(1, &mut spt, 0x20000).unwrap();
        let mut restored = [0u8; PAGE_SIZE];
        vm::read_resident_bytes(&spt, 0x20000, &mut restored);
        assert_eq!(&restored[..], &pattern[..]);
    });
}

#[test]
fn s6_mmap_write_back_on_munmap() {
    with_test_executive(|| {
        vm::init(
            Box::new(FakeMmu::new()),
            Box::new(FakeFrameSource::new(4)),
            Box::new(FakeBlockDevice::new(crate::constants::SECTORS_PER_PAGE * 4)),
        );
        let mut spt = vm::Spt::new();
        let file = crate::test_support::FakeFile::new(vec![0u8; PAGE_SIZE]);
        vm::mmap(&mut spt, 0x10000, PAGE_SIZE, &file, 0, true).unwrap();
        vm::claim(1, &mut spt, 0x10000).unwrap();
        vm::munmap(1, &mut spt, 0x10000).unwrap();
        assert!(spt.find(0x10000).is_none());
    });
}

#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn effective_priority_never_drops_below_base(base in 0u8..64, donor_pris in proptest::collection::vec(0u8..64, 0..6)) {
            with_test_executive(|| {
                let t = Sched::create("t", base, Box::new(|| {})).unwrap();
                let donors: alloc::vec::Vec<_> = donor_pris
                    .iter()
                    .map(|&p| Sched::create("d", p, Box::new(|| {})).unwrap())
                    .collect();
                for &d in &donors {
                    Sched::with_thread_mut(t, |th| { th.donors.insert(d); });
                }
                let donor_priorities: alloc::vec::Vec<u8> = donors.iter().map(|&d| Sched::with_thread(d, |th| th.effective_priority)).collect();
                Sched::with_thread_mut(t, |th| th.refresh_priority(donor_priorities.into_iter()));
                let effective = Sched::with_thread(t, |th| th.effective_priority);
                prop_assert!(effective >= base);
                prop_assert!(donor_pris.iter().all(|&p| effective >= p));
            });
        }
    }
}


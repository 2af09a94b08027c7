/*
 * Thread representation
 *
 * Carries the fields priority donation and sleep need: base vs.
 * effective priority, the donor set, the lock a thread is blocked on,
 * and wakeup tick.
 */

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::string::String;
use core::fmt;

use crate::hw::AddressSpaceId;
use crate::sync::LockId;
use crate::vm::Spt;

/// Thread identifier, monotonically allocated starting at 1. 0 is
/// reserved for the idle thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId {
    pub const IDLE: ThreadId = ThreadId(0);
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Ready,
    Blocked,
    Dying,
}

/// One thread of execution.
pub struct Thread {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,

    pub base_priority: u8,
    pub effective_priority: u8,

    /// Lock this thread is blocked trying to acquire, if any.
    pub waiting_on_lock: Option<LockId>,
    /// Threads currently donating their effective priority to this one.
    pub donors: BTreeSet<ThreadId>,

    /// Valid only while the thread sits in the sleep list.
    pub wakeup_tick: Option<i64>,

    pub address_space: Option<AddressSpaceId>,
    pub spt: Spt,

    pub exit_code: Option<i32>,

    /// Consumed exactly once, by `launch` the first time this thread is
    /// dispatched. Real hardware bootstraps a trapframe that jumps into
    /// a small trampoline calling this closure then `Sched::exit`; the
    /// host test double may call it directly to simulate one thread
    /// actually running.
    pub(crate) entry: Option<Box<dyn FnOnce() + Send>>,
}

impl Thread {
    pub fn new(
        id: ThreadId,
        name: String,
        priority: u8,
        entry: Option<Box<dyn FnOnce() + Send>>,
    ) -> Self {
        Self {
            id,
            name,
            state: ThreadState::Blocked,
            base_priority: priority,
            effective_priority: priority,
            waiting_on_lock: None,
            donors: BTreeSet::new(),
            wakeup_tick: None,
            address_space: None,
            spt: Spt::new(),
            exit_code: None,
            entry,
        }
    }

    /// Recompute effective priority from base + donor set. Idempotent:
    /// calling this repeatedly with an unchanged donor set never
    /// changes the result.
    pub fn refresh_priority(&mut self, donor_priorities: impl Iterator<Item = u8>) {
        let mut effective = self.base_priority;
        for p in donor_priorities {
            if p > effective {
                effective = p;
            }
        }
        self.effective_priority = effective;
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("base_priority", &self.base_priority)
            .field("effective_priority", &self.effective_priority)
            .finish()
    }
}

/*
 * Kernel-wide constants
 *
 * Exposed verbatim so the host crate and test doubles agree on sizing
 * without duplicating magic numbers.
 */

/// Size of one virtual/physical page, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Timer ticks a thread may run before it is preempted.
pub const TIME_SLICE: u32 = 4;

/// Hard bound on how far a priority-donation walk may chase the
/// `waiting_on_lock -> holder` chain. Defensive only: the one-lock-per-
/// waiter / one-holder-per-lock invariants already make the donor graph
/// acyclic.
pub const DONATE_MAX_DEPTH: u32 = 8;

/// Lowest schedulable priority.
pub const PRI_MIN: u8 = 0;

/// Highest schedulable priority.
pub const PRI_MAX: u8 = 63;

/// Priority newly created threads get unless told otherwise.
pub const PRI_DEFAULT: u8 = 31;

/// Largest a user stack may grow via the lazy stack-growth fault path.
pub const USER_STACK_LIMIT: u64 = 1024 * 1024;

/// How far below the current stack pointer a fault is still considered
/// a plausible `PUSH`/`CALL` stack-growth access rather than a wild
/// pointer dereference.
pub const STACK_GROWTH_WINDOW: u64 = 32;

/// Sector size assumed of the opaque swap block device.
pub const SECTOR_SIZE: usize = 512;

/// Sectors needed to back one page on the swap device.
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE.div_ceil(SECTOR_SIZE);

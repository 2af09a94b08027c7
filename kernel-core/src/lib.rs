/*
 * Kernel Core
 *
 * This crate is the hardware-independent heart of the teaching kernel:
 * the priority scheduler, the timed-sleep facility, the donation-aware
 * synchronization primitives, and the virtual-memory page subsystem.
 *
 * Everything that genuinely needs real silicon - page-table writes, disk
 * I/O, the trap-frame / iretq context switch - is pushed behind the traits
 * in `hw`. The bare-metal `kernel` binary supplies real implementations;
 * `test_support` supplies fake ones so the executive can be driven from
 * ordinary `cargo test` on the host.
 *
 * Why this is important:
 * - The scheduling and VM invariants in this crate are the hardest surface
 *   in the whole kernel; they deserve a test harness that doesn't require
 *   booting a VM for every assertion.
 * - Keeps policy (priority donation, clock eviction) decoupled from
 *   mechanism (MMU writes, disk sectors).
 */

#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]

extern crate alloc;

pub mod constants;
pub mod error;
pub mod hw;
pub mod irq;
pub mod sched;
pub mod sleep;
pub mod sync;
pub mod vm;

#[cfg(test)]
pub mod test_support;

#[cfg(test)]
mod scenarios;

pub use constants::*;
pub use error::{KernelError, Result};
pub use sched::{Sched, Thread, ThreadId, ThreadState};

/// Lifecycle of the global executive singleton: boots uninitialized,
/// moves to running once `Sched::start` installs the idle thread, and
/// moves to shutting-down when the caller tears things down. Fixed to
/// the one priority-donation policy this kernel core implements (no
/// pluggable policies, no SMP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutiveState {
    Uninitialized,
    Running,
    ShuttingDown,
}

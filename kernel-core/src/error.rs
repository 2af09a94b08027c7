/*
 * Kernel error kinds
 *
 * Most failures in this crate are either a returned Result (allocation,
 * argument validation, I/O) or a fatal assertion (invariant violation,
 * stack-guard overflow). See each module for which applies where.
 */

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A frame, thread, or SPTE could not be allocated.
    AllocationFailure,
    /// Misaligned address, out-of-range priority, or similar caller error.
    InvalidArgument,
    /// Insertion into a supplemental page table collided with an existing entry.
    AlreadyMapped,
    /// Operation referenced an address with no supplemental page table entry.
    NotMapped,
    /// Swap device has no free slots. Fatal in this teaching kernel; kept as
    /// a variant so callers can log before the panic.
    SwapExhausted,
    /// Block device or file I/O failed.
    IoFailure,
    /// A thread's kernel-stack guard word was found overwritten.
    StackOverflowDetected,
    /// An operation that requires interrupts disabled (or enabled) was
    /// called from the wrong context.
    WrongInterruptContext,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::AllocationFailure => "allocation failure",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::AlreadyMapped => "address already mapped",
            KernelError::NotMapped => "address not mapped",
            KernelError::SwapExhausted => "swap device exhausted",
            KernelError::IoFailure => "I/O failure",
            KernelError::StackOverflowDetected => "kernel stack overflow detected",
            KernelError::WrongInterruptContext => "wrong interrupt context",
        };
        f.write_str(msg)
    }
}

pub type Result<T> = core::result::Result<T, KernelError>;

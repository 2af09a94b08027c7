/*
 * Synchronization primitives
 *
 * Binary/counting semaphore, a donation-aware lock layered on top,
 * and a Mesa-style condition variable layered on the lock. These are
 * the only blocking primitives outside the scheduler itself; all three
 * are suspension points per the concurrency model.
 */

mod condvar;
mod lock;
mod semaphore;

pub use condvar::CondVar;
pub use lock::{Lock, LockId};
pub use semaphore::Semaphore;

/*
 * Memory Types
 *
 * Re-exports of x86_64 crate types used across the memory subsystem, plus
 * a small wrapper around `PageTableFlags` so callers don't need to depend
 * on the x86_64 crate's flag names directly.
 */

pub use x86_64::structures::paging::PageTableFlags;
pub use x86_64::{PhysAddr, VirtAddr};

/// Page flags wrapper for cleaner API
#[derive(Copy, Clone, Debug)]
pub struct PageFlags(PageTableFlags);

impl PageFlags {
    pub const PRESENT: Self = Self(PageTableFlags::PRESENT);
    pub const WRITABLE: Self = Self(PageTableFlags::WRITABLE);
    pub const USER_ACCESSIBLE: Self = Self(PageTableFlags::USER_ACCESSIBLE);
    pub const NO_EXECUTE: Self = Self(PageTableFlags::NO_EXECUTE);

    pub fn empty() -> Self {
        Self(PageTableFlags::empty())
    }

    pub fn into_inner(self) -> PageTableFlags {
        self.0
    }

    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl core::ops::BitOr for PageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<PageTableFlags> for PageFlags {
    fn from(flags: PageTableFlags) -> Self {
        Self(flags)
    }
}

impl From<PageFlags> for PageTableFlags {
    fn from(flags: PageFlags) -> Self {
        flags.0
    }
}

//! # Virtual Address Type
//!
//! A zero-cost, strongly typed wrapper for kernel virtual addresses.
//! Using a dedicated type instead of bare `u64` keeps stack tops, TSS
//! fields and descriptor bases from being mixed up with lengths or
//! physical frame numbers, at no runtime cost.
//!
//! The type is `#[repr(transparent)]`, `Copy`, ordered and hashable, and
//! all helpers are `const fn`, so it can appear in statics and
//! compile-time asserts.

#![cfg_attr(not(any(test, doctest)), no_std)]

use core::fmt;
use core::ops::{Add, Sub};

/// A 64-bit virtual address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtAddr(u64);

impl VirtAddr {
    /// The null address.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Wrap a raw address value.
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Address of a place in memory.
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as u64)
    }

    /// The raw address value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this is the null address.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Whether the address is aligned to `align` (a power of two).
    #[must_use]
    pub const fn is_aligned(self, align: u64) -> bool {
        debug_assert!(align.is_power_of_two());
        self.0 & (align - 1) == 0
    }

    /// Round the address down to a multiple of `align` (a power of two).
    ///
    /// The x86-64 ABI requires stack pointers to be 16-byte aligned at
    /// entry; stack-top computations use this with `align = 16`.
    #[must_use]
    pub const fn align_down(self, align: u64) -> Self {
        debug_assert!(align.is_power_of_two());
        Self(self.0 & !(align - 1))
    }

    /// Whether the address is canonical (bits 63..48 sign-extend bit 47).
    #[must_use]
    pub const fn is_canonical(self) -> bool {
        let sign = (self.0 >> 47) & 1;
        (self.0 >> 48) == if sign == 0 { 0 } else { 0xFFFF }
    }
}

impl Add<u64> for VirtAddr {
    type Output = Self;

    fn add(self, rhs: u64) -> Self {
        Self(self.0.wrapping_add(rhs))
    }
}

impl Sub<Self> for VirtAddr {
    type Output = u64;

    fn sub(self, rhs: Self) -> u64 {
        self.0.wrapping_sub(rhs.0)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#018x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::VirtAddr;

    #[test]
    fn alignment_helpers() {
        let a = VirtAddr::new(0xffff_ff00_0000_1234);
        assert!(!a.is_aligned(16));
        assert_eq!(a.align_down(16).as_u64(), 0xffff_ff00_0000_1230);
        assert!(a.align_down(16).is_aligned(16));
        assert!(VirtAddr::zero().is_null());
    }

    #[test]
    fn canonical_check() {
        assert!(VirtAddr::new(0xffff_ff00_0000_0000).is_canonical());
        assert!(VirtAddr::new(0x0000_7fff_ffff_f000).is_canonical());
        assert!(!VirtAddr::new(0x0001_0000_0000_0000).is_canonical());
    }

    #[test]
    fn arithmetic() {
        let base = VirtAddr::new(0x1000);
        let top = base + 0x4000;
        assert_eq!(top.as_u64(), 0x5000);
        assert_eq!(top - base, 0x4000);
    }
}

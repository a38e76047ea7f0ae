//! Physical Address Type
//!
//! Capabilities name memory by physical base and a power-of-two size, so
//! besides the plain newtype this module carries the handful of region
//! helpers the capability code needs (alignment to an arbitrary size class,
//! region end, containment).

use core::fmt;

/// Base page size exponent.
pub const BASE_PAGE_BITS: u8 = 12;

/// Physical memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    /// The zero address.
    pub const NULL: Self = Self(0);

    /// Create a new physical address.
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if this address is null (zero).
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check alignment to `2^bits` bytes.
    #[inline]
    #[must_use]
    pub const fn is_aligned(self, bits: u8) -> bool {
        if bits >= 64 {
            return self.0 == 0;
        }
        self.0 & ((1u64 << bits) - 1) == 0
    }

    /// Check if this address is aligned to a base page.
    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.is_aligned(BASE_PAGE_BITS)
    }

    /// Add an offset to this address.
    #[inline]
    #[must_use]
    pub const fn offset(self, offset: u64) -> Self {
        Self(self.0.wrapping_add(offset))
    }

    /// Checked offset, `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_offset(self, offset: u64) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Whether `[self, self + len)` contains `addr`.
    #[inline]
    #[must_use]
    pub const fn region_contains(self, len: u64, addr: PhysAddr) -> bool {
        addr.0 >= self.0 && addr.0 - self.0 < len
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#018x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA:{:#x}", self.0)
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

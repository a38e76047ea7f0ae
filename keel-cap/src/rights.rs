//! Capability access rights
//!
//! Rights are orthogonal bits. Interpretation is object-type specific:
//!
//! - **Read**: read memory, resolve through a CNode, inspect an object
//! - **Write**: write memory, insert into a CNode, modify an object
//! - **Execute**: map memory executable
//! - **Grant**: transfer the capability over IPC
//! - **Identify**: ask the kernel for the capability's identity

use core::fmt;

/// Access rights for capabilities.
///
/// Rights can be attenuated with a mint but never escalated.
///
/// # Layout
///
/// - Bit 0: Read
/// - Bit 1: Write
/// - Bit 2: Execute
/// - Bit 3: Grant
/// - Bit 4: Identify
/// - Bits 5-7: Reserved (must be zero)
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct CapRights(u8);

impl CapRights {
    /// No rights. Lookups that only inspect ownership ask for this.
    pub const NONE: Self = Self(0);

    /// Read permission.
    pub const READ: Self = Self(1 << 0);

    /// Write permission.
    pub const WRITE: Self = Self(1 << 1);

    /// Execute permission.
    pub const EXECUTE: Self = Self(1 << 2);

    /// Grant permission.
    pub const GRANT: Self = Self(1 << 3);

    /// Identify permission.
    pub const IDENTIFY: Self = Self(1 << 4);

    /// All rights.
    pub const ALL: Self = Self(0x1F);

    /// Read and Write rights.
    pub const READ_WRITE: Self = Self(Self::READ.0 | Self::WRITE.0);

    /// Create rights from raw bits, masking reserved bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Create rights from raw bits, rejecting reserved bits.
    #[inline]
    #[must_use]
    pub const fn from_bits_strict(bits: u64) -> Option<Self> {
        if bits & !(Self::ALL.0 as u64) != 0 {
            None
        } else {
            Some(Self(bits as u8))
        }
    }

    /// Get the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Check if these rights contain all the specified rights.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Intersect rights.
    #[inline]
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Check if `self` is a subset of `other`.
    #[inline]
    #[must_use]
    pub const fn is_subset_of(self, other: Self) -> bool {
        other.contains(self)
    }

    /// Check if no rights are present.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for CapRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapRights({self})")
    }
}

impl fmt::Display for CapRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |bit: Self, c: char| if self.contains(bit) { c } else { '-' };
        write!(
            f,
            "{}{}{}{}{}",
            flag(Self::READ, 'R'),
            flag(Self::WRITE, 'W'),
            flag(Self::EXECUTE, 'X'),
            flag(Self::GRANT, 'G'),
            flag(Self::IDENTIFY, 'I'),
        )
    }
}

//! Core and domain identifiers.

use core::fmt;

/// Identifier of a CPU core running its own kernel instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct CoreId(pub u8);

impl CoreId {
    /// The bootstrap core.
    pub const BSP: Self = Self(0);

    /// Raw value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}

/// Protection domain a dispatcher belongs to. Dispatchers of the same
/// domain on different cores share the id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
#[repr(transparent)]
pub struct DomainId(pub u32);

impl DomainId {
    /// Domain id of a dispatcher that has not been assigned one.
    pub const NONE: Self = Self(0);
}

//! Identifier tokens
//!
//! An Id capability names a system-wide unique 64-bit value made of the
//! issuing core and a per-core counter. Holders can prove they hold the
//! same token by asking the kernel to identify it.

use keel_common::CoreId;

/// Value carried by an Id capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdToken {
    /// Core that issued the token.
    pub core: CoreId,
    /// Per-core sequence number.
    pub local_id: u32,
}

impl IdToken {
    /// The 64-bit identity: `core << 32 | local_id`.
    #[inline]
    #[must_use]
    pub const fn identify(self) -> u64 {
        ((self.core.0 as u64) << 32) | self.local_id as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_layout() {
        let token = IdToken { core: CoreId(3), local_id: 7 };
        assert_eq!(token.identify(), (3u64 << 32) | 7);
    }
}

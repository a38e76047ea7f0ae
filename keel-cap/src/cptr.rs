//! Capability addresses
//!
//! A [`CapAddr`] names a slot through a path of CNodes. The address is
//! given together with its number of *valid bits*; resolution consumes the
//! valid bits from the most significant one downward:
//!
//! ```text
//!  vbits                                      0
//!  | guard (g bits) | index (r bits) | rest ... |
//! ```
//!
//! At each CNode the capability's guard is matched, then `radix` bits
//! select a slot. When no valid bits remain the slot is the result;
//! otherwise the slot must hold another CNode and the walk descends.
//!
//! Rights are checked against every CNode capability the walk passes
//! through, never against the capability finally reached.

use core::fmt;

use crate::cap::{CapObject, Capability};
use crate::cnode::CSpace;
use crate::error::{CapError, CapResult};
use crate::rights::CapRights;
use crate::slot::SlotRef;

/// Width of a capability address in bits.
pub const CPTR_BITS: u8 = 32;

/// Capability address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(transparent)]
pub struct CapAddr(pub u32);

impl CapAddr {
    /// The null address, used for "not given".
    pub const NULL: Self = Self(0);

    /// Raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Check if this is the null address.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Extract `width` bits ending `low` bits above bit 0.
    #[inline]
    const fn bits_at(self, low: u8, width: u8) -> u32 {
        if width == 0 {
            return 0;
        }
        let shifted = (self.0 as u64) >> low;
        (shifted & ((1u64 << width) - 1)) as u32
    }
}

impl fmt::Debug for CapAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapAddr({:#x})", self.0)
    }
}

impl From<u32> for CapAddr {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Outcome of resolving one CNode level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelStep {
    /// Slot selected in this CNode.
    pub slot: SlotRef,
    /// Valid bits still to resolve below this slot.
    pub bits_left: u8,
}

/// Resolve one level of `addr` through the CNode named by `cnode`.
///
/// # Errors
///
/// - [`CapError::NotCNode`]: `cnode` is not a CNode capability
/// - [`CapError::InsufficientRights`]: `cnode` lacks `rights`
/// - [`CapError::DepthExceeded`]: fewer than guard + radix valid bits left
/// - [`CapError::GuardMismatch`]: guard bits differ
pub fn resolve_level(
    cnode: &Capability,
    addr: CapAddr,
    vbits: u8,
    rights: CapRights,
) -> CapResult<LevelStep> {
    let CapObject::CNode { radix, guard, guard_size, storage, .. } = cnode.object else {
        return Err(CapError::NotCNode);
    };
    if !cnode.rights.contains(rights) {
        return Err(CapError::InsufficientRights);
    }

    let resolved = radix + guard_size;
    if resolved > vbits {
        return Err(CapError::DepthExceeded);
    }
    if addr.bits_at(vbits - guard_size, guard_size) != guard {
        return Err(CapError::GuardMismatch);
    }

    let bits_left = vbits - resolved;
    let index = addr.bits_at(bits_left, radix);
    Ok(LevelStep {
        slot: SlotRef::new(storage, index),
        bits_left,
    })
}

/// Resolve `addr` with `vbits` valid bits starting at `root` to a slot.
///
/// # Errors
///
/// Any error of [`resolve_level`], plus [`CapError::EmptySlot`] when the
/// path reaches an empty slot and [`CapError::DepthExceeded`] when `vbits`
/// is zero or wider than [`CPTR_BITS`].
pub fn resolve<S: CSpace + ?Sized>(
    space: &S,
    root: &Capability,
    addr: CapAddr,
    vbits: u8,
    rights: CapRights,
) -> CapResult<SlotRef> {
    if vbits == 0 || vbits > CPTR_BITS {
        return Err(CapError::DepthExceeded);
    }

    let mut cnode = *root;
    let mut vbits = vbits;
    loop {
        let step = resolve_level(&cnode, addr, vbits, rights)?;
        let cte = space.slot(step.slot).ok_or(CapError::InvalidIndex)?;
        if cte.is_empty() {
            return Err(CapError::EmptySlot);
        }
        if step.bits_left == 0 {
            return Ok(step.slot);
        }
        if !matches!(cte.cap.object, CapObject::CNode { .. }) {
            return Err(CapError::NotCNode);
        }
        cnode = cte.cap;
        vbits = step.bits_left;
    }
}

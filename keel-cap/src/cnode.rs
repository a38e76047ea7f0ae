//! CNode - Capability Node container
//!
//! A CNode is a table of `2^radix` capability slots. The guard used while
//! resolving addresses through a CNode belongs to the *capability* naming
//! it, so two capabilities to the same CNode may be minted with different
//! guards and resolve differently.
//!
//! # Size
//!
//! A CNode of radix `r` occupies `2^(r + SLOT_BITS)` bytes of RAM.

use crate::cptr::CPTR_BITS;
use crate::error::{CapError, CapResult};
use crate::objects::SLOT_BITS;
use crate::slot::{Cte, SlotRef};

/// CNode radix type.
pub type CNodeRadix = u8;

/// Minimum CNode radix (2^1 = 2 slots).
pub const MIN_CNODE_RADIX: CNodeRadix = 1;

/// Maximum CNode radix (2^12 = 4096 slots).
pub const MAX_CNODE_RADIX: CNodeRadix = 12;

/// Check that a guard of `guard_size` bits fits in front of `radix` index
/// bits within one capability address.
///
/// # Errors
///
/// [`CapError::GuardSizeOverflow`] if `guard_size + radix > CPTR_BITS`.
pub const fn check_guard(radix: CNodeRadix, guard_size: u8) -> CapResult<()> {
    if guard_size as u16 + radix as u16 > CPTR_BITS as u16 {
        return Err(CapError::GuardSizeOverflow);
    }
    Ok(())
}

/// CNode metadata kept next to the slot array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CNodeMeta {
    radix: CNodeRadix,
    used_slots: u32,
}

impl CNodeMeta {
    /// Create metadata for a new CNode.
    ///
    /// # Errors
    ///
    /// [`CapError::InvalidSize`] if radix is out of range.
    pub const fn new(radix: CNodeRadix) -> CapResult<Self> {
        if radix < MIN_CNODE_RADIX || radix > MAX_CNODE_RADIX {
            return Err(CapError::InvalidSize);
        }
        Ok(Self { radix, used_slots: 0 })
    }

    /// Get the radix.
    #[inline]
    #[must_use]
    pub const fn radix(&self) -> CNodeRadix {
        self.radix
    }

    /// Get the number of slots in this CNode.
    #[inline]
    #[must_use]
    pub const fn num_slots(&self) -> usize {
        1 << self.radix
    }

    /// Get the number of used slots.
    #[inline]
    #[must_use]
    pub const fn used_slots(&self) -> u32 {
        self.used_slots
    }

    /// Check if the CNode holds no capabilities.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.used_slots == 0
    }

    /// Size of the CNode in bytes.
    #[inline]
    #[must_use]
    pub const fn size_bytes(&self) -> usize {
        1 << (self.radix + SLOT_BITS)
    }

    fn increment_used(&mut self) {
        self.used_slots = self.used_slots.saturating_add(1);
    }

    fn decrement_used(&mut self) {
        self.used_slots = self.used_slots.saturating_sub(1);
    }
}

/// CNode operations.
///
/// The kernel implements this for its CNode storage; the provided methods
/// keep the used-slot count in step with slot contents.
pub trait CNodeOps {
    /// Get a reference to a slot by index.
    fn get_slot(&self, index: usize) -> Option<&Cte>;

    /// Get a mutable reference to a slot by index.
    fn get_slot_mut(&mut self, index: usize) -> Option<&mut Cte>;

    /// Get the CNode metadata.
    fn meta(&self) -> &CNodeMeta;

    /// Get mutable CNode metadata.
    fn meta_mut(&mut self) -> &mut CNodeMeta;

    /// Store `cte` into an empty slot.
    ///
    /// # Errors
    ///
    /// - [`CapError::InvalidIndex`]: index out of range
    /// - [`CapError::SlotOccupied`]: slot already holds a capability
    fn install(&mut self, index: usize, cte: Cte) -> CapResult<()> {
        let slot = self.get_slot_mut(index).ok_or(CapError::InvalidIndex)?;
        if !slot.is_empty() {
            return Err(CapError::SlotOccupied);
        }
        *slot = cte;
        if !cte.is_empty() {
            self.meta_mut().increment_used();
        }
        Ok(())
    }

    /// Empty a slot, returning what it held.
    fn take(&mut self, index: usize) -> Option<Cte> {
        let slot = self.get_slot_mut(index)?;
        if slot.is_empty() {
            return None;
        }
        let old = *slot;
        slot.clear();
        self.meta_mut().decrement_used();
        Some(old)
    }

    /// Check that `count` slots starting at `first` exist and are empty.
    ///
    /// # Errors
    ///
    /// - [`CapError::SlotsInvalid`]: range leaves the CNode
    /// - [`CapError::SlotOccupied`]: a slot in the range is in use
    fn check_free_range(&self, first: usize, count: usize) -> CapResult<()> {
        let end = first.checked_add(count).ok_or(CapError::SlotsInvalid)?;
        if count == 0 || end > self.meta().num_slots() {
            return Err(CapError::SlotsInvalid);
        }
        for index in first..end {
            if self.get_slot(index).is_some_and(|slot| !slot.is_empty()) {
                return Err(CapError::SlotOccupied);
            }
        }
        Ok(())
    }

    /// Indices of all occupied slots.
    fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.meta().num_slots())
            .filter(move |&index| self.get_slot(index).is_some_and(|slot| !slot.is_empty()))
    }
}

/// Read access to every slot on a core, used by address resolution.
pub trait CSpace {
    /// Look up a slot by location.
    fn slot(&self, at: SlotRef) -> Option<&Cte>;
}

//! CNode kernel storage
//!
//! A CNode's slot array lives on the kernel heap, sized by its radix. The
//! physical region named by the CNode capability is accounted for in the
//! MDB but never dereferenced.

use alloc::vec::Vec;

use keel_cap::{CNodeMeta, CNodeOps, CNodeRadix, CapResult, Cte};

/// Slot array plus metadata of one CNode.
pub struct CNodeStorage {
    meta: CNodeMeta,
    slots: Vec<Cte>,
}

impl CNodeStorage {
    /// Allocate an empty CNode of `2^radix` slots.
    ///
    /// # Errors
    ///
    /// [`CapError::InvalidSize`](keel_cap::CapError::InvalidSize) if the
    /// radix is out of range.
    pub fn new(radix: CNodeRadix) -> CapResult<Self> {
        let meta = CNodeMeta::new(radix)?;
        let mut slots = Vec::new();
        slots.resize(meta.num_slots(), Cte::EMPTY);
        Ok(Self { meta, slots })
    }
}

impl CNodeOps for CNodeStorage {
    fn get_slot(&self, index: usize) -> Option<&Cte> {
        self.slots.get(index)
    }

    fn get_slot_mut(&mut self, index: usize) -> Option<&mut Cte> {
        self.slots.get_mut(index)
    }

    fn meta(&self) -> &CNodeMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut CNodeMeta {
        &mut self.meta
    }
}

#[cfg(test)]
mod tests {
    use keel_cap::{CapError, CapObject, Capability, MdbMeta};
    use keel_common::CoreId;

    use super::*;

    fn id_cte() -> Cte {
        Cte::new(
            Capability::with_all_rights(CapObject::Kernel),
            MdbMeta::owned_by(CoreId::BSP),
        )
    }

    #[test]
    fn test_install_and_take_track_usage() {
        let mut cnode = CNodeStorage::new(2).unwrap();
        assert_eq!(cnode.meta().num_slots(), 4);
        cnode.install(1, id_cte()).unwrap();
        assert_eq!(cnode.meta().used_slots(), 1);
        assert_eq!(cnode.install(1, id_cte()), Err(CapError::SlotOccupied));
        assert_eq!(cnode.occupied().collect::<Vec<_>>(), [1]);
        assert!(cnode.take(1).is_some());
        assert!(cnode.take(1).is_none());
        assert!(cnode.meta().is_empty());
    }

    #[test]
    fn test_free_range() {
        let mut cnode = CNodeStorage::new(2).unwrap();
        cnode.install(2, id_cte()).unwrap();
        assert!(cnode.check_free_range(0, 2).is_ok());
        assert_eq!(cnode.check_free_range(1, 2), Err(CapError::SlotOccupied));
        assert_eq!(cnode.check_free_range(3, 2), Err(CapError::SlotsInvalid));
    }
}

//! VNode kernel storage
//!
//! The kernel's record of what a translation table maps. Writing the
//! hardware entries is the paging layer's job; this table is what copy
//! into a VNode validates against and what last-delete clears.

use alloc::collections::BTreeMap;

use keel_cap::{Arch, CapError, CapResult, Capability, CapRights, Identity, VNodeKind};
use keel_common::addr::BASE_PAGE_BITS;

/// One installed entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mapping {
    /// The capability mapped (frame or next-level table).
    pub cap: Capability,
    /// Byte offset into the mapped object.
    pub offset: u64,
    /// Access granted through the entry.
    pub flags: CapRights,
}

/// Entries of one translation table.
pub struct VNodeStorage {
    kind: VNodeKind,
    entries: BTreeMap<u32, Mapping>,
}

impl VNodeStorage {
    /// An empty table.
    pub const fn new(kind: VNodeKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Table kind.
    pub const fn kind(&self) -> VNodeKind {
        self.kind
    }

    /// Entry at `index`.
    pub fn entry(&self, index: u32) -> Option<&Mapping> {
        self.entries.get(&index)
    }

    /// Number of installed entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Install `cap` at `index`.
    ///
    /// `offset` must be page aligned and inside the object; `flags` are
    /// masked by the capability's rights.
    ///
    /// # Errors
    ///
    /// - [`CapError::InvalidIndex`]: `index` beyond the table on `arch`
    /// - [`CapError::NotMappable`]: this kind cannot hold `cap`'s type
    /// - [`CapError::InvalidMapping`]: offset misaligned or out of range
    /// - [`CapError::SlotOccupied`]: entry already in use
    pub fn map(&mut self, arch: Arch, index: u32, cap: &Capability, flags: u64, offset: u64) -> CapResult<()> {
        if index >= self.kind.entries(arch) {
            return Err(CapError::InvalidIndex);
        }
        if !self.kind.can_map(cap.object_type()) {
            return Err(CapError::NotMappable);
        }
        let (_, bits) = cap.region().ok_or(CapError::NotMappable)?;
        let page_mask = (1u64 << BASE_PAGE_BITS) - 1;
        if offset & page_mask != 0 || offset >= 1u64 << bits {
            return Err(CapError::InvalidMapping);
        }
        if self.entries.contains_key(&index) {
            return Err(CapError::SlotOccupied);
        }
        let flags = CapRights::from_bits(flags as u8).intersect(cap.rights);
        self.entries.insert(index, Mapping { cap: *cap, offset, flags });
        Ok(())
    }

    /// Drop every entry mapping the object with identity `object`.
    /// Returns the number of entries removed.
    pub fn unmap_object(&mut self, object: &Identity) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, mapping| mapping.cap.identity().as_ref() != Some(object));
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use keel_cap::CapObject;
    use keel_common::PhysAddr;

    use super::*;

    fn frame(base: u64, bits: u8, rights: CapRights) -> Capability {
        Capability::new(CapObject::Frame { base: PhysAddr::new(base), bits }, rights)
    }

    #[test]
    fn test_map_validates() {
        let mut table = VNodeStorage::new(VNodeKind::X86_64Ptable);
        let f = frame(0x20000, 13, CapRights::ALL);
        table.map(Arch::X86_64, 3, &f, CapRights::READ.bits() as u64, 0x1000).unwrap();
        assert_eq!(table.entry(3).map(|m| m.offset), Some(0x1000));

        assert_eq!(table.map(Arch::X86_64, 3, &f, 0, 0), Err(CapError::SlotOccupied));
        assert_eq!(table.map(Arch::X86_64, 512, &f, 0, 0), Err(CapError::InvalidIndex));
        assert_eq!(table.map(Arch::X86_64, 4, &f, 0, 0x800), Err(CapError::InvalidMapping));
        assert_eq!(table.map(Arch::X86_64, 4, &f, 0, 0x2000), Err(CapError::InvalidMapping));

        let pml4 = Capability::with_all_rights(CapObject::VNode {
            kind: VNodeKind::X86_64Pml4,
            base: PhysAddr::new(0x40000),
            storage: keel_cap::ObjectRef::from_index(9),
        });
        assert_eq!(table.map(Arch::X86_64, 5, &pml4, 0, 0), Err(CapError::NotMappable));
    }

    #[test]
    fn test_flags_masked_by_rights() {
        let mut table = VNodeStorage::new(VNodeKind::ArmL2);
        let f = frame(0x1000, 12, CapRights::READ);
        table.map(Arch::Arm, 0, &f, CapRights::ALL.bits() as u64, 0).unwrap();
        assert_eq!(table.entry(0).map(|m| m.flags), Some(CapRights::READ));
    }

    #[test]
    fn test_unmap_object() {
        let mut table = VNodeStorage::new(VNodeKind::X86_64Ptable);
        let a = frame(0x1000, 12, CapRights::ALL);
        let b = frame(0x2000, 12, CapRights::ALL);
        table.map(Arch::X86_64, 0, &a, 0, 0).unwrap();
        table.map(Arch::X86_64, 1, &a, 0, 0).unwrap();
        table.map(Arch::X86_64, 2, &b, 0, 0).unwrap();
        let id = a.identity().unwrap();
        assert_eq!(table.unmap_object(&id), 2);
        assert_eq!(table.len(), 1);
    }
}

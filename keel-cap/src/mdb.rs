//! Mapping database (MDB)
//!
//! The MDB is an ordered index over every non-empty slot on a core. Keys
//! are ordered by
//!
//! ```text
//! (type root, base, size descending, type rank, slot)
//! ```
//!
//! which gives the two properties revocation depends on:
//!
//! - all copies of one object (same root/base/size/rank) are contiguous;
//! - every descendant of an object sorts after the object and its copies
//!   and before anything outside the object's region.
//!
//! The second property holds because derived regions are laminar: retype
//! only ever carves children out of their parent's region, and children of
//! one retype are disjoint. Copy, descendant and ancestor queries are
//! therefore bounded walks from a key instead of table scans.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::cmp::Reverse;
use core::ops::Bound::{Excluded, Unbounded};

use crate::cap::{Capability, TypeRoot};
use crate::slot::SlotRef;

/// Ordering key of one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MdbKey {
    root: TypeRoot,
    base: u64,
    size: Reverse<u64>,
    rank: u8,
    slot: SlotRef,
}

impl MdbKey {
    /// Key for `cap` held at `slot`; `None` for the empty capability.
    #[must_use]
    pub fn new(cap: &Capability, slot: SlotRef) -> Option<Self> {
        let id = cap.identity()?;
        Some(Self {
            root: id.root,
            base: id.base,
            size: Reverse(id.size.max(1)),
            rank: id.rank,
            slot,
        })
    }

    /// Slot this key indexes.
    #[inline]
    #[must_use]
    pub const fn slot(&self) -> SlotRef {
        self.slot
    }

    /// First address of the object's region.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Region size.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size.0
    }

    /// One past the last address of the region.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.size.0)
    }

    /// Same object, possibly in a different slot.
    #[inline]
    #[must_use]
    pub fn is_copy(&self, other: &Self) -> bool {
        self.root == other.root
            && self.base == other.base
            && self.size == other.size
            && self.rank == other.rank
    }

    /// `self` names an object `other` was derived from.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.root == other.root
            && self.base <= other.base
            && other.end() <= self.end()
            && (self.size() > other.size() || self.rank < other.rank)
    }
}

/// The mapping database of one core.
#[derive(Debug, Default)]
pub struct Mdb {
    keys: BTreeSet<MdbKey>,
    by_slot: BTreeMap<SlotRef, MdbKey>,
}

impl Mdb {
    /// Create an empty database.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            keys: BTreeSet::new(),
            by_slot: BTreeMap::new(),
        }
    }

    /// Number of indexed slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Index `cap` held at `slot`. Empty capabilities are not indexed.
    /// Re-inserting a slot replaces its previous key.
    pub fn insert(&mut self, cap: &Capability, slot: SlotRef) -> bool {
        self.remove(slot);
        let Some(key) = MdbKey::new(cap, slot) else {
            return false;
        };
        self.keys.insert(key);
        self.by_slot.insert(slot, key);
        true
    }

    /// Drop `slot` from the index.
    pub fn remove(&mut self, slot: SlotRef) -> Option<MdbKey> {
        let key = self.by_slot.remove(&slot)?;
        self.keys.remove(&key);
        Some(key)
    }

    /// Key of an indexed slot.
    #[must_use]
    pub fn key_of(&self, slot: SlotRef) -> Option<MdbKey> {
        self.by_slot.get(&slot).copied()
    }

    /// Check if `slot` is indexed.
    #[must_use]
    pub fn contains(&self, slot: SlotRef) -> bool {
        self.by_slot.contains_key(&slot)
    }

    /// All indexed slots in database order.
    pub fn iter(&self) -> impl Iterator<Item = SlotRef> + '_ {
        self.keys.iter().map(MdbKey::slot)
    }

    fn before(&self, key: MdbKey) -> impl Iterator<Item = &MdbKey> + '_ {
        self.keys.range(..key).rev()
    }

    fn after(&self, key: MdbKey) -> impl Iterator<Item = &MdbKey> + '_ {
        self.keys.range((Excluded(key), Unbounded))
    }

    /// Slot immediately before `slot` in database order.
    #[must_use]
    pub fn predecessor(&self, slot: SlotRef) -> Option<SlotRef> {
        let key = self.key_of(slot)?;
        self.before(key).next().map(MdbKey::slot)
    }

    /// Slot immediately after `slot` in database order.
    #[must_use]
    pub fn successor(&self, slot: SlotRef) -> Option<SlotRef> {
        let key = self.key_of(slot)?;
        self.after(key).next().map(MdbKey::slot)
    }

    /// Both slots are indexed and hold copies of the same object.
    #[must_use]
    pub fn is_copy(&self, a: SlotRef, b: SlotRef) -> bool {
        match (self.key_of(a), self.key_of(b)) {
            (Some(a), Some(b)) => a.is_copy(&b),
            _ => false,
        }
    }

    /// `anc` holds an object `desc` was derived from.
    #[must_use]
    pub fn is_ancestor(&self, anc: SlotRef, desc: SlotRef) -> bool {
        match (self.key_of(anc), self.key_of(desc)) {
            (Some(a), Some(d)) => a.is_ancestor_of(&d),
            _ => false,
        }
    }

    /// The copy class of `slot`, including `slot` itself, in database
    /// order. Empty if `slot` is not indexed.
    #[must_use]
    pub fn copies_of(&self, slot: SlotRef) -> Vec<SlotRef> {
        let Some(key) = self.key_of(slot) else {
            return Vec::new();
        };
        let mut class: Vec<SlotRef> = self
            .before(key)
            .take_while(|k| k.is_copy(&key))
            .map(MdbKey::slot)
            .collect();
        class.reverse();
        class.push(slot);
        class.extend(self.after(key).take_while(|k| k.is_copy(&key)).map(MdbKey::slot));
        class
    }

    /// Check if `slot` has another copy on this core.
    #[must_use]
    pub fn has_copies(&self, slot: SlotRef) -> bool {
        let Some(key) = self.key_of(slot) else {
            return false;
        };
        self.before(key).next().is_some_and(|k| k.is_copy(&key))
            || self.after(key).next().is_some_and(|k| k.is_copy(&key))
    }

    fn descendant_keys(&self, key: MdbKey) -> impl Iterator<Item = &MdbKey> + '_ {
        self.after(key)
            .skip_while(move |k| k.is_copy(&key))
            .take_while(move |k| k.root == key.root && k.base < key.end())
            .filter(move |k| key.is_ancestor_of(k))
    }

    /// Every slot holding an object derived from `slot`'s object, in
    /// database order.
    #[must_use]
    pub fn descendants_of(&self, slot: SlotRef) -> Vec<SlotRef> {
        match self.key_of(slot) {
            Some(key) => self.descendant_keys(key).map(MdbKey::slot).collect(),
            None => Vec::new(),
        }
    }

    /// Check if anything was derived from `slot`'s object.
    #[must_use]
    pub fn has_descendants(&self, slot: SlotRef) -> bool {
        self.key_of(slot)
            .is_some_and(|key| self.descendant_keys(key).next().is_some())
    }

    /// Nearest slot holding an object `slot`'s object was derived from.
    #[must_use]
    pub fn find_ancestor(&self, slot: SlotRef) -> Option<SlotRef> {
        let key = self.key_of(slot)?;
        self.before(key)
            .take_while(|k| k.root == key.root)
            .find(|k| k.is_ancestor_of(&key))
            .map(MdbKey::slot)
    }

    /// Check if `slot`'s object was derived from anything on this core.
    #[must_use]
    pub fn has_ancestors(&self, slot: SlotRef) -> bool {
        self.find_ancestor(slot).is_some()
    }

    /// Slots whose objects overlap the memory region `[base, base + size)`.
    #[must_use]
    pub fn entries_in(&self, base: u64, size: u64) -> Vec<SlotRef> {
        let end = base.saturating_add(size);
        self.keys
            .iter()
            .filter(|k| k.root == TypeRoot::Memory && k.base < end && base < k.end())
            .map(MdbKey::slot)
            .collect()
    }

    /// Verify the ordering invariants: the slot index matches the key set
    /// and overlapping regions within one root are nested.
    ///
    /// # Errors
    ///
    /// A description of the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        if self.keys.len() != self.by_slot.len() {
            return Err("slot index out of sync with key set");
        }
        for (slot, key) in &self.by_slot {
            if key.slot != *slot || !self.keys.contains(key) {
                return Err("slot index entry does not match key set");
            }
        }

        let mut open: Vec<MdbKey> = Vec::new();
        for key in &self.keys {
            while let Some(top) = open.last()
                && (top.root != key.root || top.end() <= key.base)
            {
                open.pop();
            }
            if let Some(top) = open.last()
                && key.end() > top.end()
            {
                return Err("overlapping regions are not nested");
            }
            open.push(*key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use keel_common::PhysAddr;

    use super::*;
    use crate::cap::CapObject;
    use crate::slot::ObjectRef;

    fn at(index: u32) -> SlotRef {
        SlotRef::new(ObjectRef::from_index(1), index)
    }

    fn ram(base: u64, bits: u8) -> Capability {
        Capability::with_all_rights(CapObject::Ram { base: PhysAddr::new(base), bits })
    }

    fn frame(base: u64, bits: u8) -> Capability {
        Capability::with_all_rights(CapObject::Frame { base: PhysAddr::new(base), bits })
    }

    /// Ram 0x0/16 at slot 0 with a copy at slot 9, retyped into frames
    /// 0x0/12 (slot 1, copy at slot 5) and 0x1000/12 (slot 2). A second,
    /// unrelated Ram region at slot 3.
    fn populated() -> Mdb {
        let mut mdb = Mdb::new();
        mdb.insert(&ram(0, 16), at(0));
        mdb.insert(&ram(0, 16), at(9));
        mdb.insert(&frame(0, 12), at(1));
        mdb.insert(&frame(0, 12), at(5));
        mdb.insert(&frame(0x1000, 12), at(2));
        mdb.insert(&ram(0x10000, 16), at(3));
        mdb
    }

    #[test]
    fn test_copies_are_contiguous() {
        let mdb = populated();
        assert_eq!(mdb.copies_of(at(9)), [at(0), at(9)]);
        assert_eq!(mdb.copies_of(at(1)), [at(1), at(5)]);
        assert_eq!(mdb.copies_of(at(2)), [at(2)]);
        assert!(mdb.is_copy(at(1), at(5)));
        assert!(!mdb.is_copy(at(1), at(2)));
        assert!(mdb.has_copies(at(0)));
        assert!(!mdb.has_copies(at(3)));
    }

    #[test]
    fn test_descendants() {
        let mdb = populated();
        assert_eq!(mdb.descendants_of(at(0)), [at(1), at(5), at(2)]);
        assert_eq!(mdb.descendants_of(at(9)), mdb.descendants_of(at(0)));
        assert!(mdb.descendants_of(at(1)).is_empty());
        assert!(!mdb.has_descendants(at(3)));
        assert!(mdb.is_ancestor(at(9), at(2)));
        assert!(!mdb.is_ancestor(at(2), at(9)));
    }

    #[test]
    fn test_ancestors() {
        let mdb = populated();
        assert!(mdb.has_ancestors(at(2)));
        assert!(!mdb.has_ancestors(at(0)));
        assert!(!mdb.has_ancestors(at(3)));
        let anc = mdb.find_ancestor(at(5)).unwrap();
        assert!(anc == at(0) || anc == at(9));
    }

    #[test]
    fn test_same_region_rank_ordering() {
        let mut mdb = Mdb::new();
        mdb.insert(&frame(0, 12), at(1));
        mdb.insert(&ram(0, 12), at(0));
        assert_eq!(mdb.successor(at(0)), Some(at(1)));
        assert_eq!(mdb.predecessor(at(1)), Some(at(0)));
        assert_eq!(mdb.descendants_of(at(0)), [at(1)]);
    }

    #[test]
    fn test_remove_and_reinsert() {
        let mut mdb = populated();
        assert!(mdb.remove(at(5)).is_some());
        assert!(!mdb.contains(at(5)));
        assert!(!mdb.has_copies(at(1)));
        assert!(!mdb.insert(&Capability::NULL, at(5)));
        assert_eq!(mdb.len(), 5);
        mdb.check_invariants().unwrap();
    }

    #[test]
    fn test_entries_in_region() {
        let mdb = populated();
        let mut hits = mdb.entries_in(0x1000, 0x1000);
        hits.sort();
        assert_eq!(hits, [at(0), at(2), at(9)]);
    }

    #[test]
    fn test_invariants_detect_partial_overlap() {
        let mut mdb = Mdb::new();
        mdb.insert(&ram(0, 13), at(0));
        mdb.insert(&frame(0x1000, 13), at(1));
        assert!(mdb.check_invariants().is_err());
        populated().check_invariants().unwrap();
    }
}

//! Kernel object table
//!
//! Stores every object that needs kernel-side storage (CNode slot arrays,
//! VNode entries and DCBs), indexed by [`ObjectRef`]. Capabilities carry
//! the reference; the table owns the storage.
//!
//! # Design
//!
//! - Index 0 is reserved (NULL reference)
//! - Objects are stored in a growable array with a free list
//! - Generation counters let weak handles detect reuse

use alloc::boxed::Box;
use alloc::vec::Vec;

use keel_cap::{CNodeOps, CSpace, CapError, CapResult, Cte, Identity, ObjectRef, SlotRef};

use super::cnode_storage::CNodeStorage;
use super::vnode_storage::VNodeStorage;
use crate::dispatch::dcb::Dcb;

/// Contents of one table entry.
pub enum KernelObject {
    /// In the free list.
    Free {
        /// Next free index, zero at the end of the list.
        next: u32,
    },
    /// CNode slot array.
    CNode(CNodeStorage),
    /// Translation table entries.
    VNode(VNodeStorage),
    /// Dispatcher control block.
    Dispatcher(Box<Dcb>),
}

impl KernelObject {
    /// Check if this entry is free.
    #[inline]
    pub const fn is_free(&self) -> bool {
        matches!(self, Self::Free { .. })
    }
}

struct Entry {
    generation: u16,
    object: KernelObject,
}

/// Object table storage.
pub struct ObjectTable {
    entries: Vec<Entry>,
    /// Head of the free list, zero if empty.
    free_head: u32,
    /// Largest number of live objects.
    limit: usize,
    allocated: usize,
}

impl ObjectTable {
    /// An empty table holding at most `limit` objects.
    pub fn new(limit: usize) -> Self {
        let mut entries = Vec::new();
        entries.push(Entry {
            generation: 0,
            object: KernelObject::Free { next: 0 },
        });
        Self {
            entries,
            free_head: 0,
            limit,
            allocated: 0,
        }
    }

    /// Store `object`, returning its reference.
    ///
    /// # Errors
    ///
    /// [`CapError::OutOfObjects`] when the table is at its limit.
    pub fn alloc(&mut self, object: KernelObject) -> CapResult<ObjectRef> {
        if self.allocated >= self.limit {
            return Err(CapError::OutOfObjects);
        }

        let index = if self.free_head != 0 {
            let index = self.free_head;
            let entry = &mut self.entries[index as usize];
            if let KernelObject::Free { next } = entry.object {
                self.free_head = next;
            }
            entry.generation = entry.generation.wrapping_add(1);
            entry.object = object;
            index
        } else {
            let index = u32::try_from(self.entries.len()).map_err(|_| CapError::OutOfObjects)?;
            self.entries.push(Entry { generation: 1, object });
            index
        };

        self.allocated += 1;
        Ok(ObjectRef::from_index(index))
    }

    /// Release the entry behind `obj_ref`, returning what it held.
    pub fn free(&mut self, obj_ref: ObjectRef) -> Option<KernelObject> {
        let index = obj_ref.index();
        if index == 0 {
            return None;
        }
        let entry = self.entries.get_mut(index as usize)?;
        if entry.object.is_free() {
            return None;
        }

        let old = core::mem::replace(&mut entry.object, KernelObject::Free { next: self.free_head });
        self.free_head = index;
        self.allocated -= 1;
        Some(old)
    }

    /// Get an object.
    #[inline]
    pub fn get(&self, obj_ref: ObjectRef) -> Option<&KernelObject> {
        if obj_ref.is_null() {
            return None;
        }
        let entry = self.entries.get(obj_ref.index() as usize)?;
        (!entry.object.is_free()).then_some(&entry.object)
    }

    /// Get an object mutably.
    #[inline]
    pub fn get_mut(&mut self, obj_ref: ObjectRef) -> Option<&mut KernelObject> {
        if obj_ref.is_null() {
            return None;
        }
        let entry = self.entries.get_mut(obj_ref.index() as usize)?;
        (!entry.object.is_free()).then_some(&mut entry.object)
    }

    /// Generation of the entry behind `obj_ref`.
    pub fn generation(&self, obj_ref: ObjectRef) -> Option<u16> {
        self.get(obj_ref)?;
        self.entries.get(obj_ref.index() as usize).map(|entry| entry.generation)
    }

    pub fn cnode(&self, obj_ref: ObjectRef) -> Option<&CNodeStorage> {
        match self.get(obj_ref)? {
            KernelObject::CNode(cnode) => Some(cnode),
            _ => None,
        }
    }

    pub fn cnode_mut(&mut self, obj_ref: ObjectRef) -> Option<&mut CNodeStorage> {
        match self.get_mut(obj_ref)? {
            KernelObject::CNode(cnode) => Some(cnode),
            _ => None,
        }
    }

    pub fn vnode(&self, obj_ref: ObjectRef) -> Option<&VNodeStorage> {
        match self.get(obj_ref)? {
            KernelObject::VNode(vnode) => Some(vnode),
            _ => None,
        }
    }

    pub fn vnode_mut(&mut self, obj_ref: ObjectRef) -> Option<&mut VNodeStorage> {
        match self.get_mut(obj_ref)? {
            KernelObject::VNode(vnode) => Some(vnode),
            _ => None,
        }
    }

    pub fn dcb(&self, obj_ref: ObjectRef) -> Option<&Dcb> {
        match self.get(obj_ref)? {
            KernelObject::Dispatcher(dcb) => Some(dcb),
            _ => None,
        }
    }

    pub fn dcb_mut(&mut self, obj_ref: ObjectRef) -> Option<&mut Dcb> {
        match self.get_mut(obj_ref)? {
            KernelObject::Dispatcher(dcb) => Some(dcb),
            _ => None,
        }
    }

    /// Number of live objects.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Number of objects that can still be allocated.
    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.limit.saturating_sub(self.allocated)
    }

    /// The slot at `at`, in a CNode or a DCB.
    pub fn cte(&self, at: SlotRef) -> Option<&Cte> {
        match self.get(at.container)? {
            KernelObject::CNode(cnode) => cnode.get_slot(at.index as usize),
            KernelObject::Dispatcher(dcb) => dcb.slot(at.index),
            _ => None,
        }
    }

    /// The slot at `at`, mutably.
    ///
    /// Changing a CNode slot between empty and occupied through this
    /// reference bypasses the used-slot count; use [`Self::install`] and
    /// [`Self::take`] for that.
    pub fn cte_mut(&mut self, at: SlotRef) -> Option<&mut Cte> {
        match self.get_mut(at.container)? {
            KernelObject::CNode(cnode) => cnode.get_slot_mut(at.index as usize),
            KernelObject::Dispatcher(dcb) => dcb.slot_mut(at.index),
            _ => None,
        }
    }

    /// Store `cte` into the empty slot `at`.
    ///
    /// # Errors
    ///
    /// - [`CapError::InvalidIndex`]: no such slot
    /// - [`CapError::SlotOccupied`]: slot in use
    pub fn install(&mut self, at: SlotRef, cte: Cte) -> CapResult<()> {
        match self.get_mut(at.container) {
            Some(KernelObject::CNode(cnode)) => cnode.install(at.index as usize, cte),
            Some(KernelObject::Dispatcher(dcb)) => {
                let slot = dcb.slot_mut(at.index).ok_or(CapError::InvalidIndex)?;
                if !slot.is_empty() {
                    return Err(CapError::SlotOccupied);
                }
                *slot = cte;
                Ok(())
            }
            _ => Err(CapError::InvalidIndex),
        }
    }

    /// Empty the slot `at`, returning what it held.
    pub fn take(&mut self, at: SlotRef) -> Option<Cte> {
        match self.get_mut(at.container)? {
            KernelObject::CNode(cnode) => cnode.take(at.index as usize),
            KernelObject::Dispatcher(dcb) => {
                let slot = dcb.slot_mut(at.index)?;
                if slot.is_empty() {
                    return None;
                }
                let old = *slot;
                slot.clear();
                Some(old)
            }
            _ => None,
        }
    }

    /// Remove every VNode entry mapping `object`. Returns the number of
    /// entries removed.
    pub fn unmap_all(&mut self, object: &Identity) -> usize {
        self.entries
            .iter_mut()
            .map(|entry| match &mut entry.object {
                KernelObject::VNode(vnode) => vnode.unmap_object(object),
                _ => 0,
            })
            .sum()
    }
}

impl CSpace for ObjectTable {
    fn slot(&self, at: SlotRef) -> Option<&Cte> {
        self.cte(at)
    }
}

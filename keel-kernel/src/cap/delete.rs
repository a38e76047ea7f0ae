//! Delete, revoke and the deletion queues
//!
//! Deleting a capability that is not the last copy of its object only
//! empties the slot. Deleting the last copy tears the object down and may
//! return its memory (*last delete*). CNodes and dispatchers hold further
//! capabilities, so their last delete is split in two: their contents are
//! marked for deletion and queued, and the object itself waits on the
//! clear queue until those are gone.
//!
//! # Queues
//!
//! ```text
//! mark ──► delete queue ──delete_step──► cleanup_copy / cleanup_last
//!                              │
//!                              └─ CNode / Dispatcher ──► clear queue ──clear_step──► cleanup_last
//! ```
//!
//! A local [`Kernel::revoke`] drains both queues within one call. When
//! other cores are involved the monitor drives the same queues one step
//! at a time through its privileged operations.

use alloc::collections::BTreeSet;
use alloc::vec::Vec;

use keel_cap::{
    CNodeOps, CapAddr, CapError, CapObject, CapResult, CapRights, Capability, Cte, DistcapState, MdbMeta,
    ObjectRef, RemoteRelations, SlotRef,
};

use super::cspace::CapPath;
use crate::dispatch::dcb::DCB_SLOTS;
use crate::kernel::Kernel;
use crate::platform::Platform;
use crate::syscall::error::{Stage, StageExt, SyscallResult};

/// Outcome of one delete step.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevokeStep {
    /// One queued slot was processed.
    Progress = 0,
    /// A last owned copy with remote copies was moved to the trash slot;
    /// the monitor must hand ownership to another core.
    LastOwnedMoved = 1,
    /// Nothing left in the delete queue.
    DeleteQueueEmpty = 2,
}

/// Outcome of one clear step.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClearStep {
    /// One queued object was advanced or finished.
    Progress = 0,
    /// Nothing left in the clear queue.
    Done = 1,
}

impl<P: Platform> Kernel<P> {
    /// Delete the capability at `path` below `root`.
    ///
    /// # Errors
    ///
    /// - root and target lookup errors
    /// - [`CapError::Locked`] / [`CapError::InDelete`]: capability busy
    /// - [`CapError::DeleteLastOwned`]: last copy of an object with remote
    ///   copies or contents; the monitor must run the delete-last protocol
    pub fn delete(&mut self, root: CapAddr, path: CapPath) -> SyscallResult<()> {
        let root = self.resolve_root(root)?;
        let target = self
            .lookup_in(&root, path, CapRights::READ_WRITE)
            .stage(Stage::IdentifyLookup)?;
        let cte = self.cte_at(target.slot)?;
        if cte.mdb.locked {
            return Err(CapError::Locked.into());
        }
        if cte.mdb.in_delete {
            return Err(CapError::InDelete.into());
        }

        if cte.mdb.owner != self.config.core_id || self.mdb.has_copies(target.slot) {
            self.cleanup_copy(target.slot);
            return Ok(());
        }
        let has_contents = matches!(cte.cap.object, CapObject::CNode { .. } | CapObject::Dispatcher { .. });
        if cte.mdb.remote.contains(RemoteRelations::COPIES) || has_contents {
            return Err(CapError::DeleteLastOwned.into());
        }
        self.cleanup_last(target.slot, None);
        Ok(())
    }

    /// Delete the capability at `path`, every copy of it and everything
    /// derived from it.
    ///
    /// # Errors
    ///
    /// - root and target lookup errors
    /// - [`CapError::Locked`]: target class, a descendant, or a capability
    ///   held in a CNode or dispatcher being torn down is locked
    /// - [`CapError::InDelete`]: target already being deleted
    /// - [`CapError::RetryThroughMonitor`]: another core is involved, or a
    ///   monitor-driven deletion is in progress
    ///
    /// Nothing is marked unless the whole revoke can finish in this call.
    pub fn revoke(&mut self, root: CapAddr, path: CapPath) -> SyscallResult<()> {
        let root = self.resolve_root(root)?;
        let target = self
            .lookup_in(&root, path, CapRights::READ_WRITE)
            .stage(Stage::IdentifyLookup)?;
        let cte = self.cte_at(target.slot)?;
        if cte.mdb.locked {
            return Err(CapError::Locked.into());
        }
        if cte.mdb.in_delete {
            return Err(CapError::InDelete.into());
        }

        let victims = self.revoke_set(target.slot);
        let local = self.config.core_id;
        let distributed = victims.iter().any(|&slot| {
            self.objects
                .cte(slot)
                .is_some_and(|cte| cte.mdb.owner != local || !cte.mdb.remote.is_empty())
        });
        if distributed || !self.delete_queue.is_empty() || !self.clear_queue.is_empty() {
            return Err(CapError::RetryThroughMonitor.into());
        }
        if victims
            .iter()
            .any(|&slot| self.objects.cte(slot).is_some_and(|cte| cte.mdb.locked))
        {
            return Err(CapError::Locked.into());
        }
        self.check_torn_down_contents(&victims)?;

        let count = victims.len();
        for slot in victims {
            self.mark(slot);
        }
        self.drain_local().map_err(|err| match err {
            CapError::Locked | CapError::RetryThroughMonitor => CapError::RetryThroughMonitor,
            other => other,
        })?;
        log::debug!("revoke {} removed {} capabilities", target.cap, count);
        Ok(())
    }

    /// Distributed-capability state of the capability at `path`.
    ///
    /// # Errors
    ///
    /// Root and target lookup errors.
    pub fn get_state(&self, root: CapAddr, path: CapPath) -> SyscallResult<DistcapState> {
        let root = self.resolve_root(root)?;
        let target = self
            .lookup_in(&root, path, CapRights::READ)
            .stage(Stage::IdentifyLookup)?;
        let cte = self.cte_at(target.slot)?;
        Ok(DistcapState::of(&cte.mdb, self.config.core_id))
    }

    /// Everything a revoke of `slot` removes: descendants first, then the
    /// copy class, so each object is torn down after what was derived
    /// from it.
    pub(crate) fn revoke_set(&self, slot: SlotRef) -> Vec<SlotRef> {
        let mut set = self.mdb.descendants_of(slot);
        set.extend(self.mdb.copies_of(slot));
        set
    }

    /// Check that the capabilities held by CNodes and dispatchers a local
    /// revoke of `victims` tears down can all be deleted without the
    /// monitor, following nested containers.
    ///
    /// A container is torn down once every copy of it is going away and it
    /// is owned here; its contents then go too.
    fn check_torn_down_contents(&self, victims: &[SlotRef]) -> CapResult<()> {
        let local = self.config.core_id;
        let mut doomed: BTreeSet<SlotRef> = victims.iter().copied().collect();
        let mut emptied: BTreeSet<ObjectRef> = BTreeSet::new();
        loop {
            let ready: Vec<(SlotRef, ObjectRef)> = doomed
                .iter()
                .filter_map(|&slot| {
                    let cte = self.objects.cte(slot).filter(|cte| !cte.is_empty())?;
                    let container = match cte.cap.object {
                        CapObject::CNode { storage, .. } => storage,
                        CapObject::Dispatcher { dcb, .. } => dcb,
                        _ => return None,
                    };
                    let torn_down = cte.mdb.owner == local
                        && !emptied.contains(&container)
                        && self.mdb.copies_of(slot).iter().all(|copy| doomed.contains(copy));
                    torn_down.then_some((slot, container))
                })
                .collect();
            if ready.is_empty() {
                return Ok(());
            }
            for (slot, container) in ready {
                if !emptied.insert(container) {
                    continue;
                }
                for inner in self.contents(container, slot) {
                    if !doomed.insert(inner) {
                        continue;
                    }
                    let Some(cte) = self.objects.cte(inner) else {
                        continue;
                    };
                    if cte.mdb.locked {
                        return Err(CapError::Locked);
                    }
                    if cte.mdb.owner == local && cte.mdb.remote.contains(RemoteRelations::COPIES) {
                        return Err(CapError::RetryThroughMonitor);
                    }
                }
            }
        }
    }

    fn cte_at(&self, slot: SlotRef) -> CapResult<Cte> {
        match self.objects.cte(slot) {
            Some(cte) if !cte.is_empty() => Ok(*cte),
            _ => Err(CapError::EmptySlot),
        }
    }

    /// Run delete and clear steps until both queues are empty.
    fn drain_local(&mut self) -> CapResult<()> {
        loop {
            match self.delete_step(None)? {
                RevokeStep::DeleteQueueEmpty => {
                    if self.clear_step(None)? == ClearStep::Done {
                        return Ok(());
                    }
                }
                RevokeStep::Progress | RevokeStep::LastOwnedMoved => {}
            }
        }
    }

    /// Mark `slot` for deletion and queue it.
    ///
    /// Slots already marked and still queued are left alone.
    pub(crate) fn mark(&mut self, slot: SlotRef) -> bool {
        let queued = self.delete_queue.contains(&slot) || self.clear_queue.contains(&slot);
        let Some(cte) = self.objects.cte_mut(slot) else {
            return false;
        };
        if cte.is_empty() || (cte.mdb.in_delete && queued) {
            return false;
        }
        cte.mdb.in_delete = true;
        if !self.delete_queue.contains(&slot) {
            self.delete_queue.push_back(slot);
        }
        true
    }

    /// Occupied slots of a CNode or DCB, other than `except`.
    fn contents(&self, container: ObjectRef, except: SlotRef) -> Vec<SlotRef> {
        let slots: Vec<SlotRef> = if let Some(cnode) = self.objects.cnode(container) {
            cnode
                .occupied()
                .map(|index| SlotRef::new(container, index as u32))
                .collect()
        } else {
            (0..DCB_SLOTS)
                .map(|index| SlotRef::new(container, index))
                .filter(|&slot| self.objects.cte(slot).is_some_and(|cte| !cte.is_empty()))
                .collect()
        };
        slots.into_iter().filter(|&slot| slot != except).collect()
    }

    /// Remove one copy of an object. Nothing is torn down.
    pub(crate) fn cleanup_copy(&mut self, slot: SlotRef) {
        if let Some(cte) = self.remove_cte(slot) {
            log::trace!("removed copy {} at {:?}", cte.cap, slot);
        }
    }

    /// Remove the last copy of an object and tear the object down.
    ///
    /// RAM-backed memory with neither ancestors nor descendants anywhere is
    /// handed back as a Ram capability: into `ret` when given, otherwise
    /// onto the reclaimed list. Returns whether `ret` was filled.
    pub(crate) fn cleanup_last(&mut self, slot: SlotRef, ret: Option<SlotRef>) -> bool {
        let Some(cte) = self.objects.cte(slot).copied() else {
            return false;
        };
        let remote = cte.mdb.remote;
        let reclaim = cte.cap.object_type().is_ram_backed()
            && !self.mdb.has_ancestors(slot)
            && !self.mdb.has_descendants(slot)
            && !remote.contains(RemoteRelations::ANCESTORS)
            && !remote.contains(RemoteRelations::DESCENDANTS);

        self.cleanup_copy(slot);

        if let Some(identity) = cte.cap.identity() {
            match cte.cap.object {
                CapObject::Frame { .. } | CapObject::DevFrame { .. } => {
                    self.objects.unmap_all(&identity);
                }
                CapObject::VNode { storage, .. } => {
                    self.objects.unmap_all(&identity);
                    self.objects.free(storage);
                }
                CapObject::CNode { storage, .. } => {
                    self.objects.free(storage);
                }
                _ => {}
            }
        }
        log::debug!("last delete of {}", cte.cap);

        if !reclaim {
            return false;
        }
        let Some((base, bits)) = cte.cap.region() else {
            return false;
        };
        let ram = Capability::with_all_rights(CapObject::Ram { base, bits });
        if let Some(ret) = ret {
            let meta = MdbMeta::owned_by(self.config.core_id);
            if self.insert_cte(ret, Cte::new(ram, meta)).is_ok() {
                return true;
            }
        }
        log::debug!("reclaimed {}", ram);
        self.reclaimed.push_back(ram);
        false
    }

    /// Take a dispatcher out of scheduling for good.
    fn retire(&mut self, dcb: ObjectRef) {
        self.platform.scheduler_remove(dcb);
        self.platform.wakeup_remove(dcb);
        if self.current == dcb {
            self.current = ObjectRef::NULL;
        }
        if self.monitor == Some(dcb) {
            log::warn!("monitor dispatcher {} retired", dcb);
            self.monitor = None;
            self.monitor_ep = None;
        }
        if let Some(state) = self.objects.dcb_mut(dcb) {
            state.retired = true;
        }
        log::debug!("retired dispatcher {}", dcb);
    }

    /// Last-delete path for the capability at `slot`.
    ///
    /// CNodes and dispatchers have their contents marked and wait on the
    /// clear queue; everything else is torn down immediately. Returns
    /// whether `ret` was filled with reclaimed memory.
    ///
    /// # Errors
    ///
    /// - [`CapError::EmptySlot`]: nothing at `slot`
    /// - [`CapError::NotLastCopy`]: other local copies exist
    pub(crate) fn delete_last(&mut self, slot: SlotRef, ret: Option<SlotRef>) -> CapResult<bool> {
        let cte = self.cte_at(slot)?;
        if self.mdb.has_copies(slot) {
            return Err(CapError::NotLastCopy);
        }

        let container = match cte.cap.object {
            CapObject::CNode { storage, .. } => storage,
            CapObject::Dispatcher { dcb, .. } => {
                self.retire(dcb);
                dcb
            }
            _ => return Ok(self.cleanup_last(slot, ret)),
        };

        if let Some(cte) = self.objects.cte_mut(slot) {
            cte.mdb.in_delete = true;
        }
        for inner in self.contents(container, slot) {
            self.mark(inner);
        }
        self.delete_queue.retain(|&queued| queued != slot);
        if !self.clear_queue.contains(&slot) {
            self.clear_queue.push_front(slot);
        }
        Ok(false)
    }

    /// Process the head of the delete queue.
    ///
    /// # Errors
    ///
    /// - [`CapError::Locked`]: head is locked; it moves to the back of the
    ///   queue so the entries behind it can proceed
    /// - [`CapError::RetryThroughMonitor`]: head is the last owned copy of
    ///   an object with remote copies and no trash slot was given
    pub(crate) fn delete_step(&mut self, ret: Option<SlotRef>) -> CapResult<RevokeStep> {
        let Some(&slot) = self.delete_queue.front() else {
            return Ok(RevokeStep::DeleteQueueEmpty);
        };
        let cte = match self.objects.cte(slot) {
            Some(cte) if !cte.is_empty() && cte.mdb.in_delete => *cte,
            _ => {
                self.delete_queue.pop_front();
                return Ok(RevokeStep::Progress);
            }
        };
        if cte.mdb.locked {
            self.delete_queue.rotate_left(1);
            return Err(CapError::Locked);
        }

        if cte.mdb.owner != self.config.core_id || self.mdb.has_copies(slot) {
            self.delete_queue.pop_front();
            self.cleanup_copy(slot);
            return Ok(RevokeStep::Progress);
        }

        if cte.mdb.remote.contains(RemoteRelations::COPIES) {
            let Some(ret) = ret else {
                return Err(CapError::RetryThroughMonitor);
            };
            let meta = MdbMeta {
                locked: false,
                in_delete: false,
                ..cte.mdb
            };
            self.insert_cte(ret, Cte::new(cte.cap, meta))?;
            self.delete_queue.pop_front();
            self.cleanup_copy(slot);
            log::debug!("moved last owned copy {} to {:?}", cte.cap, ret);
            return Ok(RevokeStep::LastOwnedMoved);
        }

        self.delete_queue.pop_front();
        self.delete_last(slot, ret)?;
        Ok(RevokeStep::Progress)
    }

    /// Advance the head of the clear queue.
    ///
    /// If the queued object still holds capabilities they are marked and
    /// the object stays at the head; otherwise it gets its last delete.
    ///
    /// # Errors
    ///
    /// [`CapError::DeleteQueueBusy`] while the delete queue is not empty.
    pub(crate) fn clear_step(&mut self, ret: Option<SlotRef>) -> CapResult<ClearStep> {
        if !self.delete_queue.is_empty() {
            return Err(CapError::DeleteQueueBusy);
        }
        let Some(slot) = self.clear_queue.pop_front() else {
            return Ok(ClearStep::Done);
        };
        let Ok(cte) = self.cte_at(slot) else {
            return Ok(ClearStep::Progress);
        };
        let container = match cte.cap.object {
            CapObject::CNode { storage, .. } => storage,
            CapObject::Dispatcher { dcb, .. } => dcb,
            _ => {
                self.cleanup_last(slot, ret);
                return Ok(ClearStep::Progress);
            }
        };

        let remaining = self.contents(container, slot);
        if !remaining.is_empty() {
            let marked = remaining.into_iter().filter(|&inner| self.mark(inner)).count();
            if marked > 0 {
                self.clear_queue.push_front(slot);
            } else {
                self.clear_queue.push_back(slot);
            }
            return Ok(ClearStep::Progress);
        }

        self.cleanup_last(slot, ret);
        Ok(ClearStep::Progress)
    }

    /// Mark the target of a monitor revoke, unless an earlier step already
    /// did. The monitor's lock on the target class is consumed.
    pub(crate) fn mark_revoke(&mut self, target: SlotRef) {
        if self.objects.cte(target).is_none_or(|cte| cte.is_empty() || cte.mdb.in_delete) {
            return;
        }
        for copy in self.mdb.copies_of(target) {
            if let Some(cte) = self.objects.cte_mut(copy) {
                cte.mdb.locked = false;
            }
        }
        for slot in self.revoke_set(target) {
            self.mark(slot);
        }
    }
}

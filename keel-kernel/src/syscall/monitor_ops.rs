//! Monitor-only operations
//!
//! The per-core monitor coordinates capabilities across cores. These
//! operations let it inspect and install capabilities on behalf of other
//! domains and drive deletion one bounded step at a time. All of them
//! fail with [`CapError::NotMonitor`] for any other caller.

use keel_cap::{CapAddr, CapError, CapObject, CapRepr, CapRights, Cte, MdbMeta, ObjectType};
use keel_common::{CoreId, DomainId};

use super::error::{Stage, StageExt, SyscallResult};
use crate::cap::cspace::{CapPath, SlotDest};
use crate::cap::delete::{ClearStep, RevokeStep};
use crate::kernel::Kernel;
use crate::platform::Platform;

impl<P: Platform> Kernel<P> {
    /// Check the current dispatcher is the monitor.
    ///
    /// # Errors
    ///
    /// [`CapError::NotMonitor`] otherwise.
    pub fn require_monitor(&self) -> SyscallResult<()> {
        let privileged = !self.current.is_null()
            && self.monitor == Some(self.current)
            && self.objects.dcb(self.current).is_some_and(|dcb| dcb.is_monitor);
        if privileged {
            Ok(())
        } else {
            Err(CapError::NotMonitor.into())
        }
    }

    /// Register the endpoint at `ep` as the monitor's endpoint.
    pub fn monitor_register(&mut self, ep: CapAddr) -> SyscallResult<()> {
        self.require_monitor()?;
        let found = self.lookup_typed(ep, ObjectType::EndPoint, CapRights::READ, Stage::InvokedCapLookup)?;
        self.monitor_ep = Some(found.cap);
        log::info!("monitor endpoint registered: {}", found.cap);
        Ok(())
    }

    /// Representation of the capability at `target` below the root CNode
    /// `root`.
    pub fn monitor_identify_cap(&self, root: CapAddr, target: CapPath) -> SyscallResult<CapRepr> {
        self.require_monitor()?;
        let root = self.resolve_root(root)?;
        let found = self
            .lookup_in(&root, target, CapRights::NONE)
            .stage(Stage::IdentifyLookup)?;
        Ok(CapRepr::encode(&found.cap))
    }

    /// Empty the slot at `target` in the caller's CSpace. No copy or last
    /// delete processing happens; the monitor uses this after moving a
    /// capability elsewhere.
    pub fn monitor_nullify_cap(&mut self, target: CapPath) -> SyscallResult<()> {
        self.require_monitor()?;
        let found = self
            .lookup_caller(target, CapRights::NONE)
            .stage(Stage::IdentifyLookup)?;
        self.remove_cte(found.slot);
        log::debug!("nullified {} at {:?}", found.cap, found.slot);
        Ok(())
    }

    /// Set the domain id of the dispatcher at `disp`.
    pub fn monitor_domain_id(&mut self, disp: CapAddr, domain: DomainId) -> SyscallResult<()> {
        self.require_monitor()?;
        let found = self.lookup_typed(disp, ObjectType::Dispatcher, CapRights::READ, Stage::InvokedCapLookup)?;
        let dcb = found
            .cap
            .dispatcher_ref()
            .and_then(|dcb| self.objects.dcb_mut(dcb))
            .ok_or(CapError::TypeMismatch)
            .stage(Stage::InvokedCapLookup)?;
        dcb.domain_id = domain;
        Ok(())
    }

    /// Run the last-delete path for `target`, returning reclaimed memory
    /// into `ret`. Returns whether `ret` was filled.
    ///
    /// # Errors
    ///
    /// - lookup errors; the return slot is reported at the trash stage
    /// - [`CapError::NotLastCopy`]: other local copies exist
    pub fn monitor_delete_last(&mut self, root: CapPath, target: CapPath, ret: SlotDest) -> SyscallResult<bool> {
        self.require_monitor()?;
        let found = self.double_lookup(root, target, CapRights::NONE)?;
        let caller = self.caller_root()?;
        let ret = self.empty_dest_slot(&caller, ret, Stage::TrashSlotLookup)?;
        let filled = self.delete_last(found.slot, Some(ret))?;
        log::debug!("delete last {} (return slot filled: {})", found.cap, filled);
        Ok(filled)
    }

    /// Mark `target` for revocation on the first call, then run one delete
    /// step with `trash` as the trash slot.
    ///
    /// A `target` that no longer resolves is taken as already marked.
    pub fn monitor_revoke_step(&mut self, root: CapPath, target: CapPath, trash: SlotDest) -> SyscallResult<RevokeStep> {
        self.require_monitor()?;
        let caller = self.caller_root()?;
        let trash = self.empty_dest_slot(&caller, trash, Stage::TrashSlotLookup)?;
        match self.double_lookup(root, target, CapRights::NONE) {
            Ok(found) => self.mark_revoke(found.slot),
            Err(err) if err.cause == CapError::EmptySlot => {}
            Err(err) => return Err(err),
        }
        let step = self.delete_step(Some(trash))?;
        log::trace!("revoke step: {:?}", step);
        Ok(step)
    }

    /// Run one clear step, returning reclaimed memory into `ret`.
    ///
    /// # Errors
    ///
    /// [`CapError::DeleteQueueBusy`] while delete steps are pending.
    pub fn monitor_clear_step(&mut self, ret: SlotDest) -> SyscallResult<ClearStep> {
        self.require_monitor()?;
        let caller = self.caller_root()?;
        let ret = self.empty_dest_slot(&caller, ret, Stage::TrashSlotLookup)?;
        let step = self.clear_step(Some(ret))?;
        log::trace!("clear step: {:?}", step);
        Ok(step)
    }

    /// Install the capability described by `repr`, received from another
    /// core, at `dest` with owner `owner`.
    ///
    /// # Errors
    ///
    /// - decode errors, see [`CapRepr::decode_transferable`]
    /// - destination lookup errors
    pub fn monitor_create_cap(&mut self, repr: &CapRepr, dest: SlotDest, owner: CoreId) -> SyscallResult<()> {
        self.require_monitor()?;
        let cap = repr.decode_transferable()?;
        let caller = self.caller_root()?;
        let at = self.empty_dest_slot(&caller, dest, Stage::DestCNodeLookup)?;
        self.insert_cte(at, Cte::new(cap, MdbMeta::owned_by(owner)))?;
        log::debug!("created {} owned by {} at {:?}", cap, owner, at);
        Ok(())
    }

    /// Move one pending reclaimed region into `dest`.
    ///
    /// # Errors
    ///
    /// - destination lookup errors
    /// - [`CapError::NothingReclaimed`]: list empty
    pub fn monitor_get_reclaimed(&mut self, dest: SlotDest) -> SyscallResult<()> {
        self.require_monitor()?;
        let caller = self.caller_root()?;
        let at = self.empty_dest_slot(&caller, dest, Stage::DestCNodeLookup)?;
        let Some(ram) = self.reclaimed.pop_front() else {
            return Err(CapError::NothingReclaimed.into());
        };
        debug_assert!(matches!(ram.object, CapObject::Ram { .. }));
        self.insert_cte(at, Cte::new(ram, MdbMeta::owned_by(self.config.core_id)))?;
        Ok(())
    }

    /// Retype through an in-progress revoke. See [`Kernel::retype`].
    pub fn monitor_retype(
        &mut self,
        root: CapAddr,
        src: CapAddr,
        ty: ObjectType,
        size_bits: u8,
        dest: SlotDest,
    ) -> SyscallResult<()> {
        self.require_monitor()?;
        self.retype(root, src, ty, size_bits, dest, true)
    }
}

#[cfg(test)]
mod tests {
    use keel_cap::{RemoteRelations, SlotRef};
    use keel_common::PhysAddr;

    use super::*;
    use crate::testing::{self, FREE_SLOT, PAGE_RAM, PAGE_SLOT, ROOT, at};

    fn trash(index: u32) -> SlotDest {
        SlotDest::in_root(index)
    }

    #[test]
    fn test_register_endpoint() {
        let mut k = testing::boot();
        k.monitor_register(CapAddr(3)).unwrap();
        assert!(k.monitor_endpoint().is_some_and(|ep| ep.object_type() == ObjectType::EndPoint));

        let err = k.monitor_register(CapAddr(2)).unwrap_err();
        assert_eq!((err.cause, err.stage), (CapError::TypeMismatch, Some(Stage::InvokedCapLookup)));
    }

    #[test]
    fn test_identify_nullify_create() {
        let mut k = testing::boot();
        let original = testing::root_cap(&k, PAGE_SLOT);
        let repr = k.monitor_identify_cap(ROOT, at(PAGE_SLOT)).unwrap();

        k.monitor_nullify_cap(at(PAGE_SLOT)).unwrap();
        assert!(testing::root_cte(&k, PAGE_SLOT).is_none());

        k.monitor_create_cap(&repr, trash(FREE_SLOT), CoreId(2)).unwrap();
        let created = testing::root_cte(&k, FREE_SLOT).unwrap();
        assert_eq!(created.cap, original);
        assert_eq!(created.mdb.owner, CoreId(2));

        let err = k.monitor_create_cap(&repr, trash(FREE_SLOT), CoreId(2)).unwrap_err();
        assert_eq!((err.cause, err.stage), (CapError::SlotOccupied, Some(Stage::DestCNodeLookup)));
    }

    #[test]
    fn test_revoke_step_protocol() {
        let mut k = testing::boot();
        testing::retype(&mut k, PAGE_SLOT, ObjectType::Frame, 12, FREE_SLOT);
        let copies = RemoteRelations::COPIES;
        k.monitor_remote_relations(at(0), at(PAGE_SLOT), copies, copies).unwrap();
        k.lock_cap(at(0), at(PAGE_SLOT)).unwrap();

        let occupied = k.monitor_revoke_step(at(0), at(PAGE_SLOT), trash(FREE_SLOT)).unwrap_err();
        assert_eq!(occupied.stage, Some(Stage::TrashSlotLookup));

        // the frame goes first
        let step = k.monitor_revoke_step(at(0), at(PAGE_SLOT), trash(40)).unwrap();
        assert_eq!(step, RevokeStep::Progress);
        assert!(testing::root_cte(&k, FREE_SLOT).is_none());
        let page = testing::root_cte(&k, PAGE_SLOT).unwrap();
        assert!(page.mdb.in_delete && !page.mdb.locked);

        let step = k.monitor_revoke_step(at(0), at(PAGE_SLOT), trash(40)).unwrap();
        assert_eq!(step, RevokeStep::LastOwnedMoved);
        assert!(testing::root_cte(&k, PAGE_SLOT).is_none());
        let moved = testing::root_cte(&k, 40).unwrap();
        assert_eq!(moved.cap, page.cap);
        assert_eq!(moved.mdb.remote, copies);

        let step = k.monitor_revoke_step(at(0), at(PAGE_SLOT), trash(41)).unwrap();
        assert_eq!(step, RevokeStep::DeleteQueueEmpty);
        assert_eq!(k.monitor_clear_step(trash(41)).unwrap(), ClearStep::Done);
        assert_eq!(k.reclaimed_pending(), 0);
    }

    #[test]
    fn test_delete_last_of_cnode() {
        let mut k = testing::boot();
        testing::retype(&mut k, PAGE_SLOT, ObjectType::CNode, 6, FREE_SLOT);
        k.retype(ROOT, CapAddr(PAGE_SLOT + 1), ObjectType::Frame, 12, SlotDest::new(at(FREE_SLOT), 0), false)
            .unwrap();

        assert!(!k.monitor_delete_last(at(0), at(FREE_SLOT), trash(40)).unwrap());
        assert_eq!((k.delete_queue_len(), k.clear_queue_len()), (1, 1));
        let err = k.monitor_clear_step(trash(41)).unwrap_err();
        assert_eq!(err.cause, CapError::DeleteQueueBusy);

        // the CNode is already marked, so the step only drains the queue
        let step = k.monitor_revoke_step(at(0), at(FREE_SLOT), trash(41)).unwrap();
        assert_eq!(step, RevokeStep::Progress);
        let step = k.monitor_revoke_step(at(0), at(FREE_SLOT), trash(41)).unwrap();
        assert_eq!(step, RevokeStep::DeleteQueueEmpty);

        assert_eq!(k.monitor_clear_step(trash(41)).unwrap(), ClearStep::Progress);
        assert!(testing::root_cte(&k, FREE_SLOT).is_none());
        assert_eq!(k.monitor_clear_step(trash(41)).unwrap(), ClearStep::Done);
        assert!(testing::root_cte(&k, 41).is_none());
        k.mdb().check_invariants().unwrap();
    }

    #[test]
    fn test_delete_last_returns_memory() {
        let mut k = testing::boot();
        assert!(k.monitor_delete_last(at(0), at(PAGE_SLOT), trash(40)).unwrap());
        let ram = testing::root_cte(&k, 40).unwrap();
        let base = PhysAddr::new(PAGE_RAM);
        assert_eq!(ram.cap.object, CapObject::Ram { base, bits: 12 });
        assert_eq!(k.reclaimed_pending(), 0);

        testing::copy(&mut k, PAGE_SLOT + 1, FREE_SLOT);
        let err = k.monitor_delete_last(at(0), at(FREE_SLOT), trash(41)).unwrap_err();
        assert_eq!(err.cause, CapError::NotLastCopy);
    }

    #[test]
    fn test_get_reclaimed() {
        let mut k = testing::boot();
        k.delete(ROOT, at(PAGE_SLOT)).unwrap();
        k.monitor_get_reclaimed(trash(40)).unwrap();
        let ram = testing::root_cap(&k, 40);
        assert_eq!(ram.region(), Some((PhysAddr::new(PAGE_RAM), 12)));

        let err = k.monitor_get_reclaimed(trash(41)).unwrap_err();
        assert_eq!(err.cause, CapError::NothingReclaimed);
    }

    #[test]
    fn test_other_dispatchers_rejected() {
        let mut k = testing::boot();
        testing::retype(&mut k, PAGE_SLOT, ObjectType::Dispatcher, 0, FREE_SLOT);
        let other = testing::root_cap(&k, FREE_SLOT).dispatcher_ref().unwrap();
        k.set_current(other);

        assert_eq!(k.require_monitor().unwrap_err().cause, CapError::NotMonitor);
        assert_eq!(k.monitor_register(CapAddr(3)).unwrap_err().cause, CapError::NotMonitor);
        assert_eq!(k.monitor_clear_step(trash(40)).unwrap_err().cause, CapError::NotMonitor);
        let retype = k.monitor_retype(ROOT, CapAddr(PAGE_SLOT + 1), ObjectType::Frame, 12, trash(40));
        assert_eq!(retype.unwrap_err().cause, CapError::NotMonitor);
    }

    #[test]
    fn test_retype_through_pending_revoke() {
        let mut k = testing::boot();
        testing::retype(&mut k, PAGE_SLOT, ObjectType::Frame, 12, FREE_SLOT);
        let child = testing::root_slot(&k, FREE_SLOT);
        k.mark(child);

        let err = k
            .retype(ROOT, CapAddr(PAGE_SLOT), ObjectType::Frame, 12, trash(FREE_SLOT + 1), false)
            .unwrap_err();
        assert_eq!(err.cause, CapError::RevokeFirst);

        k.monitor_retype(ROOT, CapAddr(PAGE_SLOT), ObjectType::Frame, 12, trash(FREE_SLOT + 1))
            .unwrap();
        let parent = testing::root_slot(&k, PAGE_SLOT);
        let fresh = SlotRef::new(parent.container, FREE_SLOT + 1);
        assert!(k.mdb().is_ancestor(parent, fresh));
    }
}

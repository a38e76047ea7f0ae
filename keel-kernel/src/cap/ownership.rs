//! Ownership, locking and remote relations
//!
//! Owner, lock and remote relations describe an object rather than a
//! slot, so every write walks the target's copy class in the MDB and
//! updates each member.

use keel_cap::{CapError, CapRights, RemoteRelations, SlotRef};
use keel_common::CoreId;

use super::cspace::CapPath;
use crate::kernel::Kernel;
use crate::platform::Platform;
use crate::syscall::error::{Stage, StageExt, SyscallResult};

impl<P: Platform> Kernel<P> {
    /// Core owning the object at `path` in the caller's CSpace.
    ///
    /// # Errors
    ///
    /// Lookup errors.
    pub fn get_cap_owner(&self, path: CapPath) -> SyscallResult<CoreId> {
        let target = self
            .lookup_caller(path, CapRights::NONE)
            .stage(Stage::IdentifyLookup)?;
        let cte = self.objects.cte(target.slot).ok_or(CapError::EmptySlot)?;
        Ok(cte.mdb.owner)
    }

    /// Make `owner` the owner of the object at `path` in the caller's
    /// CSpace, across its whole copy class. Privileged.
    ///
    /// # Errors
    ///
    /// [`CapError::NotMonitor`] or lookup errors.
    pub fn set_cap_owner(&mut self, path: CapPath, owner: CoreId) -> SyscallResult<()> {
        self.require_monitor()?;
        let target = self
            .lookup_caller(path, CapRights::NONE)
            .stage(Stage::IdentifyLookup)?;
        let count = self.update_class(target.slot, |meta| meta.owner = owner);
        log::debug!("owner of {} set to {} ({} copies)", target.cap, owner, count);
        Ok(())
    }

    /// Lock the copy class of `target`. Privileged.
    ///
    /// # Errors
    ///
    /// - [`CapError::NotMonitor`], lookup errors
    /// - [`CapError::Locked`]: already locked
    pub fn lock_cap(&mut self, root: CapPath, target: CapPath) -> SyscallResult<()> {
        self.require_monitor()?;
        let target = self.double_lookup(root, target, CapRights::NONE)?;
        if self.objects.cte(target.slot).is_some_and(|cte| cte.mdb.locked) {
            return Err(CapError::Locked.into());
        }
        self.update_class(target.slot, |meta| meta.locked = true);
        log::debug!("locked {}", target.cap);
        Ok(())
    }

    /// Unlock the copy class of `target`. Privileged.
    ///
    /// # Errors
    ///
    /// - [`CapError::NotMonitor`], lookup errors
    /// - [`CapError::NotLocked`]: not locked
    pub fn unlock_cap(&mut self, root: CapPath, target: CapPath) -> SyscallResult<()> {
        self.require_monitor()?;
        let target = self.double_lookup(root, target, CapRights::NONE)?;
        if !self.objects.cte(target.slot).is_some_and(|cte| cte.mdb.locked) {
            return Err(CapError::NotLocked.into());
        }
        self.update_class(target.slot, |meta| meta.locked = false);
        log::debug!("unlocked {}", target.cap);
        Ok(())
    }

    /// Replace the remote relation bits selected by `mask` with those of
    /// `relations` across the copy class of `target`. An empty mask only
    /// reads. Returns the relations held before. Privileged.
    ///
    /// # Errors
    ///
    /// [`CapError::NotMonitor`] or lookup errors.
    pub fn monitor_remote_relations(
        &mut self,
        root: CapPath,
        target: CapPath,
        relations: RemoteRelations,
        mask: RemoteRelations,
    ) -> SyscallResult<RemoteRelations> {
        self.require_monitor()?;
        let target = self.double_lookup(root, target, CapRights::NONE)?;
        let previous = self
            .objects
            .cte(target.slot)
            .map(|cte| cte.mdb.remote)
            .unwrap_or_default();
        if !mask.is_empty() {
            self.update_class(target.slot, |meta| meta.remote = meta.remote.update(relations, mask));
            log::debug!("remote relations of {} {:?} -> {:?}", target.cap, previous, previous.update(relations, mask));
        }
        Ok(previous)
    }

    /// Apply `f` to the metadata of every copy of the object at `slot`.
    /// Returns the class size.
    fn update_class(&mut self, slot: SlotRef, mut f: impl FnMut(&mut keel_cap::MdbMeta)) -> usize {
        let class = self.mdb.copies_of(slot);
        if class.is_empty() {
            if let Some(cte) = self.objects.cte_mut(slot) {
                f(&mut cte.mdb);
            }
            return 1;
        }
        for &copy in &class {
            if let Some(cte) = self.objects.cte_mut(copy) {
                f(&mut cte.mdb);
            }
        }
        class.len()
    }
}

#[cfg(test)]
mod tests {
    use keel_cap::{CapError, ObjectType};

    use super::*;
    use crate::testing::{self, FREE_SLOT, PAGE_SLOT, at};

    #[test]
    fn test_owner_spans_copy_class() {
        let mut k = testing::boot();
        testing::copy(&mut k, PAGE_SLOT, FREE_SLOT);
        testing::copy(&mut k, PAGE_SLOT, FREE_SLOT + 1);
        assert_eq!(k.get_cap_owner(at(FREE_SLOT)).unwrap(), CoreId::BSP);

        k.set_cap_owner(at(FREE_SLOT + 1), CoreId(3)).unwrap();
        for index in [PAGE_SLOT, FREE_SLOT, FREE_SLOT + 1] {
            assert_eq!(k.get_cap_owner(at(index)).unwrap(), CoreId(3));
        }
        assert_eq!(k.get_cap_owner(at(PAGE_SLOT + 1)).unwrap(), CoreId::BSP);
    }

    #[test]
    fn test_lock_unlock() {
        let mut k = testing::boot();
        testing::copy(&mut k, PAGE_SLOT, FREE_SLOT);

        k.lock_cap(at(0), at(PAGE_SLOT)).unwrap();
        assert!(testing::root_cte(&k, FREE_SLOT).unwrap().mdb.locked);
        let err = k.lock_cap(at(0), at(FREE_SLOT)).unwrap_err();
        assert_eq!(err.cause, CapError::Locked);

        k.unlock_cap(at(0), at(FREE_SLOT)).unwrap();
        assert!(!testing::root_cte(&k, PAGE_SLOT).unwrap().mdb.locked);
        let err = k.unlock_cap(at(0), at(PAGE_SLOT)).unwrap_err();
        assert_eq!(err.cause, CapError::NotLocked);
    }

    #[test]
    fn test_privileged_calls_rejected_for_others() {
        let mut k = testing::boot();
        testing::retype(&mut k, PAGE_SLOT, ObjectType::Dispatcher, 0, FREE_SLOT);
        let other = testing::root_cap(&k, FREE_SLOT).dispatcher_ref().unwrap();
        k.set_current(other);

        let denied = |err: crate::SyscallError| err.cause == CapError::NotMonitor;
        assert!(denied(k.set_cap_owner(at(PAGE_SLOT), CoreId(1)).unwrap_err()));
        assert!(denied(k.lock_cap(at(0), at(PAGE_SLOT)).unwrap_err()));
        assert!(denied(k.unlock_cap(at(0), at(PAGE_SLOT)).unwrap_err()));
        let relations = k.monitor_remote_relations(at(0), at(PAGE_SLOT), RemoteRelations::ALL, RemoteRelations::ALL);
        assert!(denied(relations.unwrap_err()));
    }

    #[test]
    fn test_remote_relations_masked_update() {
        let mut k = testing::boot();
        testing::copy(&mut k, PAGE_SLOT, FREE_SLOT);
        let none = RemoteRelations::NONE;

        let before = k
            .monitor_remote_relations(at(0), at(PAGE_SLOT), RemoteRelations::ALL, RemoteRelations::COPIES)
            .unwrap();
        assert_eq!(before, none);

        let read = k.monitor_remote_relations(at(0), at(FREE_SLOT), none, none).unwrap();
        assert_eq!(read, RemoteRelations::COPIES);

        k.monitor_remote_relations(at(0), at(FREE_SLOT), none, RemoteRelations::COPIES)
            .unwrap();
        let read = k.monitor_remote_relations(at(0), at(PAGE_SLOT), none, none).unwrap();
        assert!(read.is_empty());
    }
}

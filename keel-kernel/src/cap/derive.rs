//! Capability derivation: retype, create, copy and mint
//!
//! - [`Kernel::retype`] carves new objects out of a memory capability
//! - [`Kernel::create`] makes a fresh identifier token
//! - [`Kernel::copy_or_mint`] duplicates a capability into a CNode slot,
//!   or maps it into a VNode
//!
//! Every operation resolves and validates all of its arguments before it
//! touches a slot, so a failed call leaves no trace.

use alloc::boxed::Box;

use keel_cap::objects::IdToken;
use keel_cap::ops::{self, RetypePlan};
use keel_cap::{
    CNodeMeta, CapAddr, CapError, CapObject, CapRights, Capability, Cte, MdbMeta, ObjectRef, ObjectType,
    RemoteRelations, SlotRef,
};

use super::cnode_storage::CNodeStorage;
use super::cspace::{CapPath, Resolved, SlotDest};
use super::object_table::KernelObject;
use super::vnode_storage::VNodeStorage;
use crate::dispatch::dcb::Dcb;
use crate::kernel::Kernel;
use crate::platform::Platform;
use crate::syscall::error::{Stage, StageExt, SyscallError, SyscallResult};

impl<P: Platform> Kernel<P> {
    /// Retype the capability at `src` into `ty` objects of `size_bits`,
    /// placed from `dest.slot` on.
    ///
    /// `from_monitor` lets the monitor retype a source whose revoke is
    /// still being cleaned up; only the privileged entry point sets it.
    ///
    /// # Errors
    ///
    /// Checked in order:
    /// - [`CapError::IllegalDestType`]: `ty` is Null
    /// - root, source and destination CNode lookup errors
    /// - [`CapError::InvalidRetype`] / [`CapError::InvalidSize`]: relation
    ///   or size not allowed
    /// - [`CapError::Locked`] / [`CapError::InDelete`]: source busy
    /// - [`CapError::RevokeFirst`]: source has live descendants
    /// - [`CapError::RetryThroughMonitor`]: source is foreign-owned or has
    ///   remote descendants
    /// - [`CapError::SlotsInvalid`] / [`CapError::SlotOccupied`]:
    ///   destination range unusable
    /// - [`CapError::OutOfObjects`]: no room for the children's storage
    pub fn retype(
        &mut self,
        root: CapAddr,
        src: CapAddr,
        ty: ObjectType,
        size_bits: u8,
        dest: SlotDest,
        from_monitor: bool,
    ) -> SyscallResult<()> {
        if ty == ObjectType::Null {
            return Err(CapError::IllegalDestType.into());
        }

        let root = self.resolve_root(root)?;
        let source = self
            .lookup_in(&root, CapPath::full(src), CapRights::READ)
            .stage(Stage::SourceCapLookup)?;
        let cnode = self.dest_container(&root, dest.cnode, Stage::DestCNodeLookup)?;
        let dest_cnode = match cnode.cap.object {
            CapObject::CNode { storage, .. } => storage,
            _ => return Err(CapError::DestTypeInvalid).stage(Stage::DestCNodeLookup),
        };
        if self.objects.cte(cnode.slot).is_some_and(|cte| cte.mdb.in_delete) {
            return Err(CapError::InDelete).stage(Stage::DestCNodeLookup);
        }

        let plan = ops::plan_retype(&source.cap, ty, size_bits)?;
        self.check_retype_source(&source, &plan, from_monitor)?;

        self.empty_slot_in(&cnode, dest.slot, plan.count)
            .stage(Stage::DestCNodeLookup)?;
        if ty == ObjectType::CNode {
            CNodeMeta::new(size_bits)?;
        }
        if plan.needs_storage() && (self.objects.free_capacity() as u64) < plan.count {
            return Err(CapError::OutOfObjects.into());
        }

        let Some(src_cte) = self.objects.cte(source.slot).copied() else {
            return Err(CapError::EmptySlot).stage(Stage::SourceCapLookup);
        };
        let mut meta = MdbMeta::owned_by(src_cte.mdb.owner);
        if src_cte.mdb.remote.contains(RemoteRelations::COPIES)
            || src_cte.mdb.remote.contains(RemoteRelations::ANCESTORS)
        {
            meta.remote = RemoteRelations::ANCESTORS;
        }

        for index in 0..plan.count {
            let storage = self.alloc_storage(&plan, &source.cap, index)?;
            let child = ops::retyped_child(&source.cap, &plan, index, storage);
            let at = SlotRef::new(dest_cnode, dest.slot + index as u32);
            self.insert_cte(at, Cte::new(child, meta))?;
        }

        log::debug!(
            "retype {} -> {} x {} ({} bits) at {:?}",
            source.cap,
            plan.count,
            ty,
            plan.obj_bits,
            SlotRef::new(dest_cnode, dest.slot)
        );
        Ok(())
    }

    /// Source state, descendant and distribution checks of a retype.
    fn check_retype_source(&self, source: &Resolved, plan: &RetypePlan, from_monitor: bool) -> SyscallResult<()> {
        let cte = self.objects.cte(source.slot).copied().unwrap_or(Cte::EMPTY);
        if !from_monitor {
            if cte.mdb.locked {
                return Err(CapError::Locked.into());
            }
            if cte.mdb.in_delete {
                return Err(CapError::InDelete.into());
            }
        }

        let endpoint = source.cap.object_type() == ObjectType::Dispatcher && plan.dest_type == ObjectType::EndPoint;
        if !endpoint {
            let live = self.mdb.descendants_of(source.slot).into_iter().any(|slot| {
                !from_monitor || !self.objects.cte(slot).is_some_and(|desc| desc.mdb.in_delete)
            });
            if live {
                return Err(CapError::RevokeFirst.into());
            }
        }

        if !from_monitor
            && (cte.mdb.owner != self.config.core_id || cte.mdb.remote.contains(RemoteRelations::DESCENDANTS))
        {
            return Err(CapError::RetryThroughMonitor.into());
        }
        Ok(())
    }

    /// Kernel storage for the `index`-th child of a retype.
    fn alloc_storage(&mut self, plan: &RetypePlan, src: &Capability, index: u64) -> Result<ObjectRef, SyscallError> {
        if !plan.needs_storage() {
            return Ok(ObjectRef::NULL);
        }
        let object = match plan.dest_type {
            ObjectType::CNode => KernelObject::CNode(CNodeStorage::new(plan.size_bits)?),
            ObjectType::Dispatcher => {
                let base = src
                    .region()
                    .map(|(base, _)| base.offset(index << plan.obj_bits))
                    .unwrap_or_default();
                KernelObject::Dispatcher(Box::new(Dcb::new(base)))
            }
            ty => match ty.vnode_kind() {
                Some(kind) => KernelObject::VNode(VNodeStorage::new(kind)),
                None => return Ok(ObjectRef::NULL),
            },
        };
        Ok(self.objects.alloc(object)?)
    }

    /// Create a fresh capability of a runtime-creatable type at `dest`.
    ///
    /// Only identifier tokens can be created; `size_bits` is ignored for
    /// them.
    ///
    /// # Errors
    ///
    /// - [`CapError::IllegalDestType`]: `ty` is Null
    /// - root and destination lookup errors, [`CapError::SlotOccupied`]
    /// - [`CapError::TypeNotCreatable`]: `ty` cannot be created
    /// - [`CapError::IdSpaceExhausted`]: no identifiers left on this core
    pub fn create(&mut self, root: CapAddr, ty: ObjectType, size_bits: u8, dest: SlotDest) -> SyscallResult<()> {
        if ty == ObjectType::Null {
            return Err(CapError::IllegalDestType.into());
        }
        let root = self.resolve_root(root)?;
        let at = self.empty_dest_slot(&root, dest, Stage::DestCNodeLookup)?;
        if !ty.is_creatable() {
            return Err(CapError::TypeNotCreatable.into());
        }

        let local_id = self.next_id;
        self.next_id = local_id.checked_add(1).ok_or(CapError::IdSpaceExhausted)?;
        let token = IdToken {
            core: self.config.core_id,
            local_id,
        };
        let cap = ops::id_cap(token);
        self.insert_cte(at, Cte::new(cap, MdbMeta::owned_by(self.config.core_id)))?;

        log::debug!("create {} ({} bits) at {:?}", cap, size_bits, at);
        Ok(())
    }

    /// Copy the capability at `src` to `dest`, minting it with `param1`
    /// and `param2` when `mint` is set.
    ///
    /// A CNode destination receives a new slot in the source's copy
    /// class. A VNode destination instead gets a mapping entry at index
    /// `dest.slot`, with `param1` as flags and `param2` as offset.
    ///
    /// # Errors
    ///
    /// - root, destination and source lookup errors
    /// - [`CapError::Locked`] / [`CapError::InDelete`]: source busy
    /// - mint errors, see [`ops::mint`]
    /// - [`CapError::DestTypeInvalid`]: destination neither CNode nor VNode
    /// - [`CapError::SlotsInvalid`] / [`CapError::SlotOccupied`]:
    ///   destination slot unusable
    /// - mapping errors, see [`VNodeStorage::map`]
    pub fn copy_or_mint(
        &mut self,
        root: CapAddr,
        dest: SlotDest,
        src: CapPath,
        param1: u64,
        param2: u64,
        mint: bool,
    ) -> SyscallResult<()> {
        let root = self.resolve_root(root)?;
        let target = self.dest_container(&root, dest.cnode, Stage::DestCNodeLookup)?;
        let source = self
            .lookup_in(&root, src, CapRights::READ)
            .stage(Stage::SourceCapLookup)?;
        let src_cte = self.objects.cte(source.slot).copied().unwrap_or(Cte::EMPTY);
        if src_cte.mdb.locked {
            return Err(CapError::Locked.into());
        }
        if src_cte.mdb.in_delete {
            return Err(CapError::InDelete.into());
        }

        match target.cap.object {
            CapObject::CNode { storage, .. } => {
                let cap = if mint {
                    ops::mint(&source.cap, param1, param2)?
                } else {
                    source.cap
                };
                self.empty_slot_in(&target, dest.slot, 1)
                    .stage(Stage::DestCNodeLookup)?;

                let meta = MdbMeta {
                    owner: src_cte.mdb.owner,
                    locked: false,
                    in_delete: false,
                    remote: src_cte.mdb.remote,
                };
                let at = SlotRef::new(storage, dest.slot);
                self.insert_cte(at, Cte::new(cap, meta))?;
                log::debug!("{} {} -> {:?}", if mint { "mint" } else { "copy" }, cap, at);
                Ok(())
            }
            CapObject::VNode { storage, .. } => {
                if self.objects.cte(target.slot).is_some_and(|cte| cte.mdb.in_delete) {
                    return Err(CapError::InDelete).stage(Stage::DestCNodeLookup);
                }
                let arch = self.config.arch;
                let vnode = self
                    .objects
                    .vnode_mut(storage)
                    .ok_or(CapError::DestTypeInvalid)
                    .stage(Stage::DestCNodeLookup)?;
                vnode.map(arch, dest.slot, &source.cap, param1, param2)?;
                log::debug!("map {} at {}[{}] offset {:#x}", source.cap, target.cap, dest.slot, param2);
                Ok(())
            }
            _ => Err(CapError::DestTypeInvalid).stage(Stage::DestCNodeLookup),
        }
    }
}

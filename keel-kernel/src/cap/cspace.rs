//! CSpace lookups on behalf of the current dispatcher
//!
//! Every syscall argument naming a capability is resolved here, relative
//! to the caller's CSpace root or to an explicitly named root CNode. A
//! path of zero bits names the root itself.

use keel_cap::{CPTR_BITS, CapAddr, CapError, CapObject, CapResult, CapRights, Capability, ObjectType, SlotRef, cptr};

use crate::dispatch::dcb::DCB_SLOT_CSPACE;
use crate::kernel::Kernel;
use crate::platform::Platform;
use crate::syscall::error::{Stage, StageExt, SyscallResult};

/// A capability address with its number of valid bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CapPath {
    pub addr: CapAddr,
    pub bits: u8,
}

impl CapPath {
    /// The empty path, naming the root it is resolved against.
    pub const NONE: Self = Self {
        addr: CapAddr::NULL,
        bits: 0,
    };

    #[inline]
    pub const fn new(addr: CapAddr, bits: u8) -> Self {
        Self { addr, bits }
    }

    /// A full-width path.
    #[inline]
    pub const fn full(addr: CapAddr) -> Self {
        Self::new(addr, CPTR_BITS)
    }

    /// Check if this is the empty path.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.bits == 0
    }
}

/// A destination slot: a CNode and an index inside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotDest {
    /// Path to the CNode, relative to the operation's root.
    pub cnode: CapPath,
    /// Slot index in the CNode.
    pub slot: u32,
}

impl SlotDest {
    #[inline]
    pub const fn new(cnode: CapPath, slot: u32) -> Self {
        Self { cnode, slot }
    }

    /// Slot `slot` of the root CNode itself.
    #[inline]
    pub const fn in_root(slot: u32) -> Self {
        Self::new(CapPath::NONE, slot)
    }
}

/// A resolved slot and the capability it held at lookup time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Resolved {
    pub slot: SlotRef,
    pub cap: Capability,
}

impl<P: Platform> Kernel<P> {
    /// The current dispatcher's CSpace root.
    pub(crate) fn caller_root(&self) -> CapResult<Resolved> {
        let slot = SlotRef::new(self.current, DCB_SLOT_CSPACE);
        let cte = self.objects.cte(slot).ok_or(CapError::EmptySlot)?;
        if cte.is_empty() {
            return Err(CapError::EmptySlot);
        }
        Ok(Resolved { slot, cap: cte.cap })
    }

    /// Resolve `path` below `root`, requiring `rights` on every CNode
    /// passed through. The empty path names `root`, which must then carry
    /// `rights` itself.
    pub(crate) fn lookup_in(&self, root: &Resolved, path: CapPath, rights: CapRights) -> CapResult<Resolved> {
        if path.is_none() {
            if !root.cap.rights.contains(rights) {
                return Err(CapError::InsufficientRights);
            }
            return Ok(*root);
        }
        let slot = cptr::resolve(&self.objects, &root.cap, path.addr, path.bits, rights)?;
        let cte = self.objects.cte(slot).ok_or(CapError::EmptySlot)?;
        Ok(Resolved { slot, cap: cte.cap })
    }

    /// Resolve `path` in the caller's CSpace.
    pub(crate) fn lookup_caller(&self, path: CapPath, rights: CapRights) -> CapResult<Resolved> {
        let root = self.caller_root()?;
        self.lookup_in(&root, path, rights)
    }

    /// Resolve a full-width address in the caller's CSpace and check the
    /// capability has type `ty` and carries `rights`.
    pub(crate) fn lookup_typed(
        &self,
        addr: CapAddr,
        ty: ObjectType,
        rights: CapRights,
        stage: Stage,
    ) -> SyscallResult<Resolved> {
        let found = self.lookup_cap(CapPath::full(addr), rights).stage(stage)?;
        if found.cap.object_type() != ty {
            return Err(CapError::TypeMismatch).stage(stage);
        }
        Ok(found)
    }

    /// Resolve `path` in the caller's CSpace and require `rights` on the
    /// capability reached as well as on the CNodes passed through.
    pub(crate) fn lookup_cap(&self, path: CapPath, rights: CapRights) -> CapResult<Resolved> {
        let found = self.lookup_caller(path, rights)?;
        if !found.cap.rights.contains(rights) {
            return Err(CapError::InsufficientRights);
        }
        Ok(found)
    }

    /// Resolve the root CNode named by `root` in the caller's CSpace.
    pub(crate) fn resolve_root(&self, root: CapAddr) -> SyscallResult<Resolved> {
        let found = self
            .lookup_caller(CapPath::full(root), CapRights::READ)
            .stage(Stage::RootCapLookup)?;
        if !matches!(found.cap.object, CapObject::CNode { .. }) {
            return Err(CapError::NotCNode).stage(Stage::RootCapLookup);
        }
        Ok(found)
    }

    /// Resolve `root` in the caller's CSpace, then `target` inside it.
    ///
    /// Used where a privileged caller acts on another domain's CSpace.
    pub(crate) fn double_lookup(&self, root: CapPath, target: CapPath, rights: CapRights) -> SyscallResult<Resolved> {
        let root = self
            .lookup_caller(root, CapRights::READ)
            .stage(Stage::RootCapLookup)?;
        if !matches!(root.cap.object, CapObject::CNode { .. }) {
            return Err(CapError::NotCNode).stage(Stage::RootCapLookup);
        }
        self.lookup_in(&root, target, rights).stage(Stage::IdentifyLookup)
    }

    /// Resolve the CNode of `dest` below `root` and check slot `dest.slot`
    /// exists and is empty.
    ///
    /// # Errors
    ///
    /// Reported at `stage`:
    /// - any lookup error of the CNode path
    /// - [`CapError::InsufficientRights`]: the CNode is not writable
    /// - [`CapError::DestTypeInvalid`]: path does not name a CNode
    /// - [`CapError::InDelete`]: the CNode is being deleted
    /// - [`CapError::SlotsInvalid`]: `slot >= 2^radix`
    /// - [`CapError::SlotOccupied`]: slot in use
    pub(crate) fn empty_dest_slot(&self, root: &Resolved, dest: SlotDest, stage: Stage) -> SyscallResult<SlotRef> {
        let cnode = self.dest_container(root, dest.cnode, stage)?;
        self.empty_slot_in(&cnode, dest.slot, 1).stage(stage)?;
        let CapObject::CNode { storage, .. } = cnode.cap.object else {
            return Err(CapError::DestTypeInvalid).stage(stage);
        };
        Ok(SlotRef::new(storage, dest.slot))
    }

    /// Resolve the container a capability is written into. Both the path
    /// and the container itself need read and write rights.
    pub(crate) fn dest_container(&self, root: &Resolved, path: CapPath, stage: Stage) -> SyscallResult<Resolved> {
        let found = self.lookup_in(root, path, CapRights::READ_WRITE).stage(stage)?;
        if !found.cap.rights.contains(CapRights::READ_WRITE) {
            return Err(CapError::InsufficientRights).stage(stage);
        }
        Ok(found)
    }

    /// Check `count` slots from `first` in the CNode `cnode` exist and are
    /// empty.
    pub(crate) fn empty_slot_in(&self, cnode: &Resolved, first: u32, count: u64) -> CapResult<()> {
        use keel_cap::CNodeOps;

        let CapObject::CNode { storage, .. } = cnode.cap.object else {
            return Err(CapError::DestTypeInvalid);
        };
        if self.objects.cte(cnode.slot).is_some_and(|cte| cte.mdb.in_delete) {
            return Err(CapError::InDelete);
        }
        let storage = self.objects.cnode(storage).ok_or(CapError::DestTypeInvalid)?;
        let count = usize::try_from(count).map_err(|_| CapError::SlotsInvalid)?;
        storage.check_free_range(first as usize, count)
    }

    /// Resolve `path` in the caller's CSpace without requiring rights.
    ///
    /// # Errors
    ///
    /// Any lookup error.
    pub fn lookup(&self, path: CapPath) -> CapResult<SlotRef> {
        self.lookup_caller(path, CapRights::NONE).map(|found| found.slot)
    }
}

//! Boot-time capabilities of the first monitor
//!
//! Boot code hands the kernel a reserved, aligned region of RAM for the
//! monitor's root CNode and DCB plus the list of memory regions it found.
//! [`Kernel::bootstrap_monitor`] builds the root CNode laid out as
//! described in [`keel_cap::root_slots`].

use alloc::boxed::Box;

use keel_cap::objects::SLOT_BITS;
use keel_cap::ops;
use keel_cap::root_slots::Slot;
use keel_cap::{
    CPTR_BITS, CNodeOps, CapError, CapObject, CapResult, Capability, Cte, MdbMeta, ObjectRef, ObjectType,
    SlotRef,
};
use keel_common::PhysAddr;

use super::cnode_storage::CNodeStorage;
use super::object_table::KernelObject;
use crate::config::ROOT_CNODE_RADIX;
use crate::dispatch::dcb::{DCB_SLOT_CSPACE, Dcb};
use crate::dispatch::registry::WeakDcb;
use crate::kernel::Kernel;
use crate::platform::Platform;

/// log2 of the reserved boot region: root CNode followed by the DCB.
pub const BOOT_RESERVED_BITS: u8 = ROOT_CNODE_RADIX + SLOT_BITS + 1;

/// Kind of a boot memory region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootRegionKind {
    /// Physical range that may contain devices.
    PhysAddr,
    /// Usable RAM.
    Ram,
}

/// One memory region reported by boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootRegion {
    pub kind: BootRegionKind,
    pub base: PhysAddr,
    /// log2 region size.
    pub bits: u8,
}

/// What boot code knows about the machine.
#[derive(Clone, Copy, Debug)]
pub struct BootInfo<'a> {
    /// RAM for the root CNode and DCB, aligned to
    /// `2^BOOT_RESERVED_BITS`.
    pub reserved: PhysAddr,
    /// Memory handed to the monitor, in slot order.
    pub regions: &'a [BootRegion],
}

impl<P: Platform> Kernel<P> {
    /// Build the monitor's root CNode and DCB and make it the current and
    /// privileged dispatcher.
    ///
    /// # Errors
    ///
    /// - [`CapError::InvalidArgument`]: reserved region misaligned, or a
    ///   boot region misaligned or of invalid size
    /// - [`CapError::SlotsInvalid`]: more regions than root slots
    /// - [`CapError::OutOfObjects`]: object table too small
    pub fn bootstrap_monitor(&mut self, info: &BootInfo<'_>) -> CapResult<ObjectRef> {
        if !info.reserved.is_aligned(BOOT_RESERVED_BITS) {
            return Err(CapError::InvalidArgument);
        }
        let slots = 1usize << ROOT_CNODE_RADIX;
        if Slot::FirstMemory.index() as usize + info.regions.len() > slots {
            return Err(CapError::SlotsInvalid);
        }
        for region in info.regions {
            let ty = match region.kind {
                BootRegionKind::PhysAddr => ObjectType::PhysAddr,
                BootRegionKind::Ram => ObjectType::Ram,
            };
            keel_cap::objects::object_bits(ty, region.bits).map_err(|_| CapError::InvalidArgument)?;
            if !region.base.is_aligned(region.bits) {
                return Err(CapError::InvalidArgument);
            }
        }
        if self.objects.free_capacity() < 2 {
            return Err(CapError::OutOfObjects);
        }

        let core = self.config.core_id;
        let meta = MdbMeta::owned_by(core);

        let cnode_storage = self.objects.alloc(KernelObject::CNode(CNodeStorage::new(ROOT_CNODE_RADIX)?))?;
        let root_cap = Capability::with_all_rights(CapObject::CNode {
            base: info.reserved,
            radix: ROOT_CNODE_RADIX,
            guard: 0,
            guard_size: CPTR_BITS - ROOT_CNODE_RADIX,
            storage: cnode_storage,
        });
        let slot = |index: u32| SlotRef::new(cnode_storage, index);
        self.insert_cte(slot(Slot::RootCNode.index()), Cte::new(root_cap, meta))?;

        let dcb_base = info.reserved.offset(1 << (ROOT_CNODE_RADIX + SLOT_BITS));
        let dcb = self.objects.alloc(KernelObject::Dispatcher(Box::new(Dcb::new(dcb_base))))?;
        let disp_cap = Capability::with_all_rights(CapObject::Dispatcher { base: dcb_base, dcb });
        self.insert_cte(slot(Slot::Dispatcher.index()), Cte::new(disp_cap, meta))?;
        self.insert_cte(SlotRef::new(dcb, DCB_SLOT_CSPACE), Cte::new(root_cap, meta))?;

        let kernel_cap = Capability::with_all_rights(CapObject::Kernel);
        self.insert_cte(slot(Slot::Kernel.index()), Cte::new(kernel_cap, meta))?;

        let plan = ops::plan_retype(&disp_cap, ObjectType::EndPoint, 0)?;
        let ep_cap = ops::retyped_child(&disp_cap, &plan, 0, ObjectRef::NULL);
        self.insert_cte(slot(Slot::MonitorEp.index()), Cte::new(ep_cap, meta))?;

        for (index, region) in (0u32..).zip(info.regions) {
            let object = match region.kind {
                BootRegionKind::PhysAddr => CapObject::PhysAddr { base: region.base, bits: region.bits },
                BootRegionKind::Ram => CapObject::Ram { base: region.base, bits: region.bits },
            };
            let cap = Capability::with_all_rights(object);
            self.insert_cte(slot(Slot::memory(index)), Cte::new(cap, meta))?;
        }

        if let Some(state) = self.objects.dcb_mut(dcb) {
            state.is_monitor = true;
            state.registered = true;
        }
        if let Some(generation) = self.objects.generation(dcb) {
            self.dcbs.register(WeakDcb { dcb, generation });
        }
        self.monitor = Some(dcb);
        self.current = dcb;

        let used = self.objects.cnode(cnode_storage).map_or(0, |cnode| cnode.meta().used_slots());
        log::info!(
            "monitor bootstrapped on {}: dcb {}, root cnode {} ({} slots used, {} memory regions)",
            core,
            dcb,
            cnode_storage,
            used,
            info.regions.len()
        );
        Ok(dcb)
    }
}

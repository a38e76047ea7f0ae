//! Dispatcher control block
//!
//! The kernel side of a schedulable entity. A DCB owns two capability
//! slots (its CSpace root and a copy of its dispatcher frame) which are
//! ordinary MDB-indexed slots addressed as `SlotRef { dcb, DCB_SLOT_* }`.
//!
//! DCB storage is created by retype into `Dispatcher` and kept for the
//! lifetime of the kernel; deleting the last dispatcher capability only
//! takes the DCB out of scheduling.

use keel_cap::objects::dispatcher::DispatcherShared;
use keel_cap::Cte;
use keel_cap::objects::SchedParams;
use keel_common::{DomainId, PhysAddr};

/// Slot index of the CSpace root inside a DCB.
pub const DCB_SLOT_CSPACE: u32 = 0;

/// Slot index of the dispatcher frame copy inside a DCB.
pub const DCB_SLOT_DISP: u32 = 1;

/// Number of capability slots in a DCB.
pub const DCB_SLOTS: u32 = 2;

/// Dispatcher control block.
#[derive(Debug)]
pub struct Dcb {
    /// Physical base of the DCB object.
    pub base: PhysAddr,
    /// Root of the dispatcher's CSpace.
    pub cspace: Cte,
    /// Copy of the dispatcher frame capability.
    pub disp_cte: Cte,
    /// Physical base of the VSpace root table, once installed.
    pub vspace: Option<PhysAddr>,
    /// Physical base of the dispatcher frame, once installed.
    pub disp: Option<PhysAddr>,
    /// Kernel view of the state shared through the dispatcher frame.
    pub shared: DispatcherShared,
    /// Domain the dispatcher belongs to.
    pub domain_id: DomainId,
    /// Kernel-side disabled flag.
    pub disabled: bool,
    /// Runs as a virtual-machine guest (needs no CSpace or frame).
    pub is_vm_guest: bool,
    /// Scheduling parameters.
    pub sched: SchedParams,
    /// Entered into the DCB registry.
    pub registered: bool,
    /// Holds monitor privilege.
    pub is_monitor: bool,
    /// No longer schedulable; its last capability was deleted.
    pub retired: bool,
}

impl Dcb {
    /// A fresh, unconfigured DCB.
    pub const fn new(base: PhysAddr) -> Self {
        Self {
            base,
            cspace: Cte::EMPTY,
            disp_cte: Cte::EMPTY,
            vspace: None,
            disp: None,
            shared: DispatcherShared {
                disabled: false,
                haswork: false,
                lmp_delivered: 0,
                lmp_seen: 0,
                wakeup: 0,
            },
            domain_id: DomainId::NONE,
            disabled: false,
            is_vm_guest: false,
            sched: SchedParams::DEFAULT,
            registered: false,
            is_monitor: false,
            retired: false,
        }
    }

    /// Slot by DCB-local index.
    pub const fn slot(&self, index: u32) -> Option<&Cte> {
        match index {
            DCB_SLOT_CSPACE => Some(&self.cspace),
            DCB_SLOT_DISP => Some(&self.disp_cte),
            _ => None,
        }
    }

    /// Mutable slot by DCB-local index.
    pub fn slot_mut(&mut self, index: u32) -> Option<&mut Cte> {
        match index {
            DCB_SLOT_CSPACE => Some(&mut self.cspace),
            DCB_SLOT_DISP => Some(&mut self.disp_cte),
            _ => None,
        }
    }

    /// Whether the configured state allows the dispatcher to run.
    pub const fn is_runnable(&self) -> bool {
        self.vspace.is_some()
            && (self.is_vm_guest || (!self.cspace.is_empty() && self.disp.is_some()))
    }
}

#[cfg(test)]
mod tests {
    use keel_cap::{CapObject, Capability, MdbMeta, ObjectRef};
    use keel_common::CoreId;

    use super::*;

    #[test]
    fn test_runnable_requirements() {
        let mut dcb = Dcb::new(PhysAddr::new(0x8000));
        assert!(!dcb.is_runnable());

        dcb.vspace = Some(PhysAddr::new(0x10000));
        assert!(!dcb.is_runnable());
        dcb.is_vm_guest = true;
        assert!(dcb.is_runnable());

        dcb.is_vm_guest = false;
        dcb.disp = Some(PhysAddr::new(0x20000));
        dcb.cspace = Cte::new(
            Capability::with_all_rights(CapObject::CNode {
                base: PhysAddr::new(0x4000),
                radix: 2,
                guard: 0,
                guard_size: 0,
                storage: ObjectRef::from_index(1),
            }),
            MdbMeta::owned_by(CoreId::BSP),
        );
        assert!(dcb.is_runnable());
    }

    #[test]
    fn test_slots() {
        let mut dcb = Dcb::new(PhysAddr::NULL);
        assert!(dcb.slot(DCB_SLOT_CSPACE).is_some());
        assert!(dcb.slot_mut(DCB_SLOT_DISP).is_some());
        assert!(dcb.slot(DCB_SLOTS).is_none());
    }
}

//! Dispatcher configuration
//!
//! A DCB becomes schedulable in steps: its CSpace root, VSpace root and
//! dispatcher frame are installed by one or more setup calls, in any
//! combination. Scheduling parameters may change at any time.

use keel_cap::objects::dispatcher::SchedParams;
use keel_cap::{CapAddr, CapError, CapObject, CapRights, Cte, MdbMeta, ObjectRef, ObjectType, SlotRef};
use keel_common::PhysAddr;

use super::dcb::{DCB_SLOT_CSPACE, DCB_SLOT_DISP};
use super::registry::WeakDcb;
use crate::cap::cspace::{CapPath, Resolved};
use crate::kernel::Kernel;
use crate::platform::Platform;
use crate::syscall::error::{Stage, StageExt, SyscallResult};

/// Validated setup request, applied in one go.
struct SetupPlan {
    cspace: Option<Resolved>,
    vspace: Option<PhysAddr>,
    frame: Option<Resolved>,
    domain: Option<keel_common::DomainId>,
}

impl<P: Platform> Kernel<P> {
    /// Configure the dispatcher at `to`.
    ///
    /// - `cspace`: CNode to install as CSpace root (skipped if empty path)
    /// - `vspace`: VSpace root table (skipped if null)
    /// - `frame`: dispatcher frame (skipped if null)
    /// - `run`: make the dispatcher runnable, starting disabled
    /// - `other`: dispatcher whose domain id is copied (skipped if null)
    ///
    /// Every step is validated before any is applied.
    ///
    /// # Errors
    ///
    /// - lookup errors, reported at the stage of the failing argument
    /// - [`CapError::TypeMismatch`]: argument of the wrong type, or a
    ///   VNode that cannot be a VSpace root on this architecture
    /// - [`CapError::SlotOccupied`]: CSpace or frame already installed
    /// - [`CapError::NotRunnable`]: `run` without the required state, or the
    ///   dispatcher was retired
    pub fn dispatcher_setup(
        &mut self,
        to: CapAddr,
        cspace: CapPath,
        vspace: CapAddr,
        frame: CapAddr,
        run: bool,
        other: CapAddr,
    ) -> SyscallResult<()> {
        let target = self.lookup_typed(to, ObjectType::Dispatcher, CapRights::READ, Stage::InvokedCapLookup)?;
        let Some(dcb_ref) = target.cap.dispatcher_ref() else {
            return Err(CapError::TypeMismatch).stage(Stage::InvokedCapLookup);
        };
        let plan = self.plan_setup(dcb_ref, cspace, vspace, frame, other)?;

        let dcb = self.objects.dcb(dcb_ref).ok_or(CapError::TypeMismatch)?;
        if dcb.retired {
            return Err(CapError::NotRunnable.into());
        }
        if run {
            let vspace_set = plan.vspace.is_some() || dcb.vspace.is_some();
            let cspace_set = plan.cspace.is_some() || !dcb.cspace.is_empty();
            let frame_set = plan.frame.is_some() || dcb.disp.is_some();
            if !vspace_set || !(dcb.is_vm_guest || (cspace_set && frame_set)) {
                return Err(CapError::NotRunnable.into());
            }
        }

        self.apply_setup(dcb_ref, plan)?;

        if let Some(dcb) = self.objects.dcb_mut(dcb_ref) {
            if !dcb.registered {
                dcb.registered = true;
                if let Some(generation) = self.objects.generation(dcb_ref) {
                    self.dcbs.register(WeakDcb { dcb: dcb_ref, generation });
                }
            }
        }
        if run {
            if let Some(dcb) = self.objects.dcb_mut(dcb_ref) {
                dcb.disabled = true;
                dcb.shared.disabled = true;
            }
            self.platform.make_runnable(dcb_ref);
        }
        log::debug!("dispatcher {} set up (run: {})", dcb_ref, run);
        Ok(())
    }

    fn plan_setup(
        &self,
        dcb_ref: ObjectRef,
        cspace: CapPath,
        vspace: CapAddr,
        frame: CapAddr,
        other: CapAddr,
    ) -> SyscallResult<SetupPlan> {
        let dcb = self
            .objects
            .dcb(dcb_ref)
            .ok_or(CapError::TypeMismatch)
            .stage(Stage::InvokedCapLookup)?;

        let cspace = if cspace.is_none() {
            None
        } else {
            let found = self
                .lookup_caller(cspace, CapRights::READ)
                .stage(Stage::DispCSpaceRoot)?;
            if !matches!(found.cap.object, CapObject::CNode { .. }) {
                return Err(CapError::TypeMismatch).stage(Stage::DispCSpaceRoot);
            }
            if !dcb.cspace.is_empty() {
                return Err(CapError::SlotOccupied).stage(Stage::DispCSpaceRoot);
            }
            Some(found)
        };

        let vspace = if vspace.is_null() {
            None
        } else {
            let found = self
                .lookup_cap(CapPath::full(vspace), CapRights::WRITE)
                .stage(Stage::DispVSpaceRoot)?;
            match found.cap.object {
                CapObject::VNode { kind, base, .. } if kind.is_root_for(self.config.arch) => Some(base),
                _ => return Err(CapError::TypeMismatch).stage(Stage::DispVSpaceRoot),
            }
        };

        let frame = if frame.is_null() {
            None
        } else {
            let found = self.lookup_typed(frame, ObjectType::Frame, CapRights::WRITE, Stage::DispFrame)?;
            if !dcb.disp_cte.is_empty() {
                return Err(CapError::SlotOccupied).stage(Stage::DispFrame);
            }
            Some(found)
        };

        let domain = if other.is_null() {
            None
        } else {
            let found = self.lookup_typed(other, ObjectType::Dispatcher, CapRights::READ_WRITE, Stage::DispOtherLookup)?;
            let other_dcb = found
                .cap
                .dispatcher_ref()
                .and_then(|other| self.objects.dcb(other))
                .ok_or(CapError::TypeMismatch)
                .stage(Stage::DispOtherLookup)?;
            Some(other_dcb.domain_id)
        };

        Ok(SetupPlan { cspace, vspace, frame, domain })
    }

    fn apply_setup(&mut self, dcb_ref: ObjectRef, plan: SetupPlan) -> SyscallResult<()> {
        if let Some(cspace) = plan.cspace {
            self.install_copy(cspace, SlotRef::new(dcb_ref, DCB_SLOT_CSPACE))?;
        }
        if let Some(frame) = plan.frame {
            self.install_copy(frame, SlotRef::new(dcb_ref, DCB_SLOT_DISP))?;
        }
        let Some(dcb) = self.objects.dcb_mut(dcb_ref) else {
            return Err(CapError::TypeMismatch.into());
        };
        if let Some(vspace) = plan.vspace {
            dcb.vspace = Some(vspace);
        }
        if let Some(frame) = plan.frame
            && let Some((base, _)) = frame.cap.region()
        {
            dcb.disp = Some(base);
        }
        if let Some(domain) = plan.domain {
            dcb.domain_id = domain;
        }
        Ok(())
    }

    /// Copy `source` into the DCB slot `at`, joining its copy class.
    fn install_copy(&mut self, source: Resolved, at: SlotRef) -> SyscallResult<()> {
        let src_meta = self
            .objects
            .cte(source.slot)
            .map(|cte| cte.mdb)
            .unwrap_or_default();
        let meta = MdbMeta {
            locked: false,
            in_delete: false,
            ..src_meta
        };
        self.insert_cte(at, Cte::new(source.cap, meta))?;
        Ok(())
    }

    /// Replace the scheduling parameters of the dispatcher at `to`.
    ///
    /// A `release` of zero means now. The dispatcher leaves the run queue
    /// while the parameters change and returns to it only if it was queued.
    ///
    /// # Errors
    ///
    /// - lookup errors, [`CapError::TypeMismatch`]
    /// - [`CapError::InvalidSchedParams`]: inconsistent parameters
    pub fn dispatcher_properties(&mut self, to: CapAddr, params: SchedParams) -> SyscallResult<()> {
        let target = self.lookup_typed(to, ObjectType::Dispatcher, CapRights::READ, Stage::InvokedCapLookup)?;
        let Some(dcb_ref) = target.cap.dispatcher_ref() else {
            return Err(CapError::TypeMismatch).stage(Stage::InvokedCapLookup);
        };
        params.validate()?;
        if self.objects.dcb(dcb_ref).is_none() {
            return Err(CapError::TypeMismatch).stage(Stage::InvokedCapLookup);
        }

        let mut params = params;
        if params.release == 0 {
            params.release = self.platform.now();
        }
        let queued = self.platform.scheduler_remove(dcb_ref);
        if let Some(dcb) = self.objects.dcb_mut(dcb_ref) {
            dcb.sched = params;
        }
        if queued {
            self.platform.make_runnable(dcb_ref);
        }
        log::debug!("dispatcher {} properties {:?}", dcb_ref, params);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use keel_cap::objects::dispatcher::TaskType;
    use keel_common::DomainId;

    use super::*;
    use crate::cap::cspace::SlotDest;
    use crate::testing::{self, MockPlatform, PAGE_RAM, PAGE_SLOT, ROOT, at};

    const DISP: u32 = 16;
    const CNODE: u32 = 20;
    const PML4: u32 = 21;
    const FRAME: u32 = 22;

    /// Four dispatchers at 16..20, then a CNode, a PML4 and a frame.
    fn parts() -> (Kernel<MockPlatform>, ObjectRef) {
        let mut k = testing::boot();
        testing::retype(&mut k, PAGE_SLOT, ObjectType::Dispatcher, 0, DISP);
        testing::retype(&mut k, PAGE_SLOT + 1, ObjectType::CNode, 6, CNODE);
        testing::retype(&mut k, PAGE_SLOT + 2, ObjectType::VNodeX86_64Pml4, 0, PML4);
        testing::retype(&mut k, PAGE_SLOT + 3, ObjectType::Frame, 12, FRAME);
        let dcb = testing::root_cap(&k, DISP).dispatcher_ref().unwrap();
        (k, dcb)
    }

    fn setup_all(k: &mut Kernel<MockPlatform>, run: bool) -> SyscallResult<()> {
        k.dispatcher_setup(CapAddr(DISP), at(CNODE), CapAddr(PML4), CapAddr(FRAME), run, CapAddr::NULL)
    }

    #[test]
    fn test_setup_and_run() {
        let (mut k, dcb_ref) = parts();
        setup_all(&mut k, true).unwrap();

        let dcb = k.dcb(dcb_ref).unwrap();
        assert!(dcb.is_runnable());
        assert!(dcb.disabled && dcb.shared.disabled);
        assert!(dcb.registered);
        assert_eq!(dcb.vspace, Some(PhysAddr::new(PAGE_RAM + 0x2000)));
        assert_eq!(dcb.disp, Some(PhysAddr::new(PAGE_RAM + 0x3000)));
        assert_eq!(k.platform().run_queue, [dcb_ref]);

        let cnode = testing::root_slot(&k, CNODE);
        assert!(k.mdb().is_copy(cnode, SlotRef::new(dcb_ref, DCB_SLOT_CSPACE)));
        let frame = testing::root_slot(&k, FRAME);
        assert!(k.mdb().is_copy(frame, SlotRef::new(dcb_ref, DCB_SLOT_DISP)));

        let mut registered = 0;
        k.for_each_dcb(|_, dcb| registered += usize::from(dcb.registered));
        assert_eq!(registered, 2);
    }

    #[test]
    fn test_run_requires_state() {
        let (mut k, dcb_ref) = parts();
        let err = k
            .dispatcher_setup(CapAddr(DISP), at(CNODE), CapAddr::NULL, CapAddr(FRAME), true, CapAddr::NULL)
            .unwrap_err();
        assert_eq!(err.cause, CapError::NotRunnable);

        let dcb = k.dcb(dcb_ref).unwrap();
        assert!(dcb.cspace.is_empty() && dcb.disp.is_none() && !dcb.registered);
        assert!(k.platform().run_queue.is_empty());

        // installed piecewise, then run with nothing new
        k.dispatcher_setup(CapAddr(DISP), at(CNODE), CapAddr::NULL, CapAddr::NULL, false, CapAddr::NULL)
            .unwrap();
        k.dispatcher_setup(CapAddr(DISP), CapPath::NONE, CapAddr(PML4), CapAddr(FRAME), false, CapAddr::NULL)
            .unwrap();
        k.dispatcher_setup(CapAddr(DISP), CapPath::NONE, CapAddr::NULL, CapAddr::NULL, true, CapAddr::NULL)
            .unwrap();
        assert_eq!(k.platform().run_queue, [dcb_ref]);
    }

    #[test]
    fn test_argument_types_checked_per_stage() {
        let (mut k, _) = parts();
        let mut setup = |to: u32, cspace: CapPath, vspace: CapAddr, frame: CapAddr, other: CapAddr| {
            k.dispatcher_setup(CapAddr(to), cspace, vspace, frame, false, other)
                .unwrap_err()
        };
        let none = CapAddr::NULL;

        let err = setup(CNODE, CapPath::NONE, none, none, none);
        assert_eq!((err.cause, err.stage), (CapError::TypeMismatch, Some(Stage::InvokedCapLookup)));
        let err = setup(DISP, at(PML4), none, none, none);
        assert_eq!((err.cause, err.stage), (CapError::TypeMismatch, Some(Stage::DispCSpaceRoot)));
        let err = setup(DISP, CapPath::NONE, CapAddr(CNODE), none, none);
        assert_eq!((err.cause, err.stage), (CapError::TypeMismatch, Some(Stage::DispVSpaceRoot)));
        let err = setup(DISP, CapPath::NONE, none, CapAddr(PML4), none);
        assert_eq!((err.cause, err.stage), (CapError::TypeMismatch, Some(Stage::DispFrame)));
        let err = setup(DISP, CapPath::NONE, none, none, CapAddr(FRAME));
        assert_eq!((err.cause, err.stage), (CapError::TypeMismatch, Some(Stage::DispOtherLookup)));
        let err = setup(DISP, CapPath::NONE, none, none, CapAddr(200));
        assert_eq!((err.cause, err.stage), (CapError::EmptySlot, Some(Stage::DispOtherLookup)));
    }

    #[test]
    fn test_setup_requires_rights_on_arguments() {
        let (mut k, dcb_ref) = parts();
        let read = u64::from(CapRights::READ.bits());
        for (src, dest) in [(FRAME, 30), (PML4, 31), (DISP + 1, 32)] {
            k.copy_or_mint(ROOT, SlotDest::in_root(dest), at(src), read, 0, true)
                .unwrap();
        }
        let none = CapAddr::NULL;

        let err = k
            .dispatcher_setup(CapAddr(DISP), CapPath::NONE, none, CapAddr(30), false, none)
            .unwrap_err();
        assert_eq!((err.cause, err.stage), (CapError::InsufficientRights, Some(Stage::DispFrame)));
        let err = k
            .dispatcher_setup(CapAddr(DISP), CapPath::NONE, CapAddr(31), none, false, none)
            .unwrap_err();
        assert_eq!((err.cause, err.stage), (CapError::InsufficientRights, Some(Stage::DispVSpaceRoot)));
        let err = k
            .dispatcher_setup(CapAddr(DISP), CapPath::NONE, none, none, false, CapAddr(32))
            .unwrap_err();
        assert_eq!((err.cause, err.stage), (CapError::InsufficientRights, Some(Stage::DispOtherLookup)));

        let dcb = k.dcb(dcb_ref).unwrap();
        assert!(dcb.vspace.is_none() && dcb.disp.is_none() && !dcb.registered);
    }

    #[test]
    fn test_pml4_is_not_an_arm_root() {
        let (mut k, _) = parts();
        k.config.arch = keel_cap::Arch::Arm;
        let err = k
            .dispatcher_setup(CapAddr(DISP), CapPath::NONE, CapAddr(PML4), CapAddr::NULL, false, CapAddr::NULL)
            .unwrap_err();
        assert_eq!(err.stage, Some(Stage::DispVSpaceRoot));
    }

    #[test]
    fn test_second_cspace_rejected() {
        let (mut k, _) = parts();
        testing::copy(&mut k, CNODE, 30);
        k.dispatcher_setup(CapAddr(DISP), at(CNODE), CapAddr::NULL, CapAddr::NULL, false, CapAddr::NULL)
            .unwrap();
        let err = k
            .dispatcher_setup(CapAddr(DISP), at(30), CapAddr::NULL, CapAddr::NULL, false, CapAddr::NULL)
            .unwrap_err();
        assert_eq!((err.cause, err.stage), (CapError::SlotOccupied, Some(Stage::DispCSpaceRoot)));
    }

    #[test]
    fn test_domain_copied_from_other() {
        let (mut k, _) = parts();
        k.monitor_domain_id(CapAddr(DISP), DomainId(7)).unwrap();
        k.dispatcher_setup(CapAddr(DISP + 1), CapPath::NONE, CapAddr::NULL, CapAddr::NULL, false, CapAddr(DISP))
            .unwrap();
        let second = testing::root_cap(&k, DISP + 1).dispatcher_ref().unwrap();
        assert_eq!(k.dcb(second).map(|dcb| dcb.domain_id), Some(DomainId(7)));
    }

    #[test]
    fn test_properties() {
        let (mut k, dcb_ref) = parts();
        let bad = SchedParams {
            task_type: TaskType::HardRealTime,
            deadline: 2,
            wcet: 5,
            period: 10,
            release: 0,
            weight: 1,
        };
        let err = k.dispatcher_properties(CapAddr(DISP), bad).unwrap_err();
        assert_eq!(err.cause, CapError::InvalidSchedParams);

        k.platform_mut().now = 50;
        let params = SchedParams { deadline: 8, ..bad };
        k.dispatcher_properties(CapAddr(DISP), params).unwrap();
        assert_eq!(k.dcb(dcb_ref).map(|dcb| dcb.sched.release), Some(50));
        assert!(k.platform().run_queue.is_empty());

        setup_all(&mut k, true).unwrap();
        let later = SchedParams { release: 70, ..params };
        k.dispatcher_properties(CapAddr(DISP), later).unwrap();
        assert_eq!(k.dcb(dcb_ref).map(|dcb| dcb.sched), Some(later));
        assert_eq!(k.platform().run_queue, [dcb_ref]);
    }
}

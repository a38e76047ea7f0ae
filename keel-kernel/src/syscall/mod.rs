//! Syscall interface
//!
//! The trap layer saves the syscall number and up to eight argument words
//! and calls [`KernelCell::syscall`](crate::KernelCell::syscall), which
//! lands in [`Kernel::handle_syscall`]. Arguments are decoded into typed
//! values here and handed to the operation in the `cap` or `dispatch`
//! module that implements the syscall.
//!
//! # Argument layout
//!
//! Capability addresses are 32-bit and resolved with 32 valid bits unless
//! the syscall takes an explicit bit count. Slot indices are 32-bit.
//!
//! | Syscall | a0 | a1 | a2 | a3 | a4 | a5 | a6 | a7 |
//! |---|---|---|---|---|---|---|---|---|
//! | Yield | target | | | | | | | |
//! | Print | buf | len | | | | | | |
//! | IdcapIdentify | cap | | | | | | | |
//! | Retype / MonitorRetype | root | src | type | size bits | dest cnode | dest slot | dest bits | |
//! | Create | root | type | size bits | dest cnode | dest slot | dest bits | | |
//! | Copy / Mint | root | dest cnode | dest slot | src | dest bits | src bits | param1 | param2 |
//! | Delete / Revoke / GetState | root | cap | bits | | | | | |
//! | DispatcherSetup | dispatcher | cspace | cspace bits | vspace | frame | run | other | |
//! | DispatcherProperties | dispatcher | type | deadline | wcet | period | release | weight | |
//! | GetCapOwner / SetCapOwner | cap | bits | owner | | | | | |
//! | LockCap / UnlockCap | root | root bits | cap | cap bits | | | | |
//! | MonitorRegister | endpoint | | | | | | | |
//! | MonitorIdentifyCap | root | cap | bits | buf | buf len | | | |
//! | MonitorNullifyCap | cap | bits | | | | | | |
//! | MonitorDomainId | dispatcher | domain | | | | | | |
//! | MonitorDeleteLast / MonitorRevokeStep | root | root bits | cap | cap bits | ret cnode | ret bits | ret slot | |
//! | MonitorClearStep / MonitorGetReclaimed | ret cnode | ret bits | ret slot | | | | | |
//! | MonitorCreateCap | repr buf | dest cnode | dest bits | dest slot | owner | | | |
//! | MonitorRemoteRelations | root | root bits | cap | cap bits | relations | mask | | |
//!
//! Results come back in [`SysRet`]. Values returned: the identifier for
//! IdcapIdentify, the state bits for GetState, the owning core for
//! GetCapOwner, 1 if the return slot was filled for MonitorDeleteLast,
//! the step result for MonitorRevokeStep and MonitorClearStep, and the
//! previous relation bits for MonitorRemoteRelations. Everything else
//! returns 0.

pub mod error;
mod misc_ops;
mod monitor_ops;
pub mod numbers;

pub use error::{Stage, SysRet, SyscallError, SyscallResult};
pub use numbers::Syscall;

use keel_cap::objects::dispatcher::{SchedParams, TaskType};
use keel_cap::{CapAddr, CapError, CapRepr, ObjectRef, ObjectType, RemoteRelations};
use keel_common::{CoreId, DomainId};

use crate::cap::cspace::{CapPath, SlotDest};
use crate::kernel::Kernel;
use crate::logging;
use crate::platform::Platform;

/// Number of argument words.
pub const SYSCALL_ARGS: usize = 8;

/// Raw syscall argument words as saved by the trap layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyscallArgs(pub [u64; SYSCALL_ARGS]);

impl SyscallArgs {
    #[inline]
    pub const fn new(words: [u64; SYSCALL_ARGS]) -> Self {
        Self(words)
    }

    /// Argument word `index`.
    #[inline]
    pub const fn word(&self, index: usize) -> u64 {
        self.0[index]
    }

    /// Argument `index` as a capability address.
    fn addr(&self, index: usize) -> SyscallResult<CapAddr> {
        u32::try_from(self.0[index])
            .map(CapAddr)
            .map_err(|_| CapError::InvalidArgument.into())
    }

    /// Argument `index` as a bit count.
    fn bits(&self, index: usize) -> SyscallResult<u8> {
        u8::try_from(self.0[index]).map_err(|_| CapError::InvalidArgument.into())
    }

    /// Argument `index` as a slot index.
    fn slot(&self, index: usize) -> SyscallResult<u32> {
        u32::try_from(self.0[index]).map_err(|_| CapError::InvalidArgument.into())
    }

    /// Address at `addr` with the bit count at `bits`.
    fn path(&self, addr: usize, bits: usize) -> SyscallResult<CapPath> {
        Ok(CapPath::new(self.addr(addr)?, self.bits(bits)?))
    }

    /// Destination CNode path and slot index.
    fn dest(&self, cnode: usize, bits: usize, slot: usize) -> SyscallResult<SlotDest> {
        Ok(SlotDest::new(self.path(cnode, bits)?, self.slot(slot)?))
    }

    fn core(&self, index: usize) -> SyscallResult<CoreId> {
        u8::try_from(self.0[index])
            .map(CoreId)
            .map_err(|_| CapError::InvalidArgument.into())
    }

    fn object_type(&self, index: usize) -> SyscallResult<ObjectType> {
        ObjectType::from_raw(self.0[index]).ok_or_else(|| CapError::IllegalDestType.into())
    }

    fn relations(&self, index: usize) -> SyscallResult<RemoteRelations> {
        u8::try_from(self.0[index])
            .ok()
            .filter(|&bits| bits & !RemoteRelations::ALL.bits() == 0)
            .map(RemoteRelations::from_bits)
            .ok_or_else(|| CapError::InvalidArgument.into())
    }
}

/// How a handled syscall leaves the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Return to the caller with this result.
    Return(SysRet),
    /// Switch to this dispatcher; the caller resumes later.
    Dispatch(ObjectRef),
}

impl<P: Platform> Kernel<P> {
    /// Decode and run syscall `num` for the current dispatcher.
    pub fn handle_syscall(&mut self, num: u64, args: &SyscallArgs) -> SyscallOutcome {
        logging::set_time(self.platform.now());

        let Some(syscall) = Syscall::from_number(num) else {
            log::warn!("invalid syscall number: {}", num);
            return SyscallOutcome::Return(SysRet::err(CapError::InvalidArgument.into()));
        };

        log::trace!(
            "syscall: {} (a0={:#x}, a1={:#x}, a2={:#x})",
            syscall.name(),
            args.word(0),
            args.word(1),
            args.word(2)
        );

        if syscall == Syscall::Yield {
            return match args.addr(0).and_then(|target| self.yield_decide(target)) {
                Ok(next) => SyscallOutcome::Dispatch(next),
                Err(err) => {
                    log::debug!("{} failed: {}", syscall.name(), err);
                    SyscallOutcome::Return(SysRet::err(err))
                }
            };
        }

        let result = if syscall.is_privileged() {
            self.require_monitor().and_then(|()| self.dispatch_syscall(syscall, args))
        } else {
            self.dispatch_syscall(syscall, args)
        };
        if let Err(err) = result {
            if err.cause == CapError::NotMonitor {
                log::warn!("{} rejected: caller {} is not the monitor", syscall.name(), self.current);
            } else {
                log::debug!("{} failed: {}", syscall.name(), err);
            }
        }
        SyscallOutcome::Return(result.into())
    }

    fn dispatch_syscall(&mut self, syscall: Syscall, args: &SyscallArgs) -> SyscallResult {
        match syscall {
            // Yield is handled by the caller, it never returns a value
            Syscall::Yield => Err(CapError::InvalidArgument.into()),
            Syscall::Print => {
                let len = usize::try_from(args.word(1)).map_err(|_| CapError::InvalidArgument)?;
                self.print(args.word(0), len)?;
                Ok(0)
            }
            Syscall::IdcapIdentify => self.idcap_identify(args.addr(0)?),

            // Capability management
            Syscall::Retype | Syscall::MonitorRetype => {
                let root = args.addr(0)?;
                let src = args.addr(1)?;
                let ty = args.object_type(2)?;
                let size_bits = args.bits(3)?;
                let dest = args.dest(4, 6, 5)?;
                if syscall == Syscall::MonitorRetype {
                    self.monitor_retype(root, src, ty, size_bits, dest)?;
                } else {
                    self.retype(root, src, ty, size_bits, dest, false)?;
                }
                Ok(0)
            }
            Syscall::Create => {
                let dest = args.dest(3, 5, 4)?;
                self.create(args.addr(0)?, args.object_type(1)?, args.bits(2)?, dest)?;
                Ok(0)
            }
            Syscall::Copy | Syscall::Mint => {
                let dest = args.dest(1, 4, 2)?;
                let src = args.path(3, 5)?;
                let mint = syscall == Syscall::Mint;
                self.copy_or_mint(args.addr(0)?, dest, src, args.word(6), args.word(7), mint)?;
                Ok(0)
            }
            Syscall::Delete => {
                self.delete(args.addr(0)?, args.path(1, 2)?)?;
                Ok(0)
            }
            Syscall::Revoke => {
                self.revoke(args.addr(0)?, args.path(1, 2)?)?;
                Ok(0)
            }
            Syscall::GetState => {
                let state = self.get_state(args.addr(0)?, args.path(1, 2)?)?;
                Ok(u64::from(state.bits()))
            }

            // Dispatchers
            Syscall::DispatcherSetup => {
                let cspace = args.path(1, 2)?;
                let run = args.word(5) != 0;
                self.dispatcher_setup(args.addr(0)?, cspace, args.addr(3)?, args.addr(4)?, run, args.addr(6)?)?;
                Ok(0)
            }
            Syscall::DispatcherProperties => {
                let params = SchedParams {
                    task_type: TaskType::from_raw(args.word(1)).ok_or(CapError::InvalidSchedParams)?,
                    deadline: args.word(2),
                    wcet: args.word(3),
                    period: args.word(4),
                    release: args.word(5),
                    weight: u16::try_from(args.word(6)).map_err(|_| CapError::InvalidSchedParams)?,
                };
                self.dispatcher_properties(args.addr(0)?, params)?;
                Ok(0)
            }

            // Ownership and locking
            Syscall::GetCapOwner => {
                let owner = self.get_cap_owner(args.path(0, 1)?)?;
                Ok(u64::from(owner.as_u8()))
            }
            Syscall::SetCapOwner => {
                self.set_cap_owner(args.path(0, 1)?, args.core(2)?)?;
                Ok(0)
            }
            Syscall::LockCap => {
                self.lock_cap(args.path(0, 1)?, args.path(2, 3)?)?;
                Ok(0)
            }
            Syscall::UnlockCap => {
                self.unlock_cap(args.path(0, 1)?, args.path(2, 3)?)?;
                Ok(0)
            }

            // Monitor
            Syscall::MonitorRegister => {
                self.monitor_register(args.addr(0)?)?;
                Ok(0)
            }
            Syscall::MonitorIdentifyCap => {
                let repr = self.monitor_identify_cap(args.addr(0)?, args.path(1, 2)?)?;
                if args.word(4) < CapRepr::SIZE as u64 {
                    return Err(CapError::BufferTooSmall.into());
                }
                if !self.platform.write_user(args.word(3), &repr.to_bytes()) {
                    return Err(CapError::InvalidArgument.into());
                }
                Ok(0)
            }
            Syscall::MonitorNullifyCap => {
                self.monitor_nullify_cap(args.path(0, 1)?)?;
                Ok(0)
            }
            Syscall::MonitorDomainId => {
                let domain = u32::try_from(args.word(1)).map_err(|_| CapError::InvalidArgument)?;
                self.monitor_domain_id(args.addr(0)?, DomainId(domain))?;
                Ok(0)
            }
            Syscall::MonitorDeleteLast => {
                let filled = self.monitor_delete_last(args.path(0, 1)?, args.path(2, 3)?, args.dest(4, 5, 6)?)?;
                Ok(u64::from(filled))
            }
            Syscall::MonitorRevokeStep => {
                let step = self.monitor_revoke_step(args.path(0, 1)?, args.path(2, 3)?, args.dest(4, 5, 6)?)?;
                Ok(step as u64)
            }
            Syscall::MonitorClearStep => {
                let step = self.monitor_clear_step(args.dest(0, 1, 2)?)?;
                Ok(step as u64)
            }
            Syscall::MonitorCreateCap => {
                let mut bytes = [0u8; CapRepr::SIZE];
                if !self.platform.read_user(args.word(0), &mut bytes) {
                    return Err(CapError::InvalidArgument.into());
                }
                let repr = CapRepr::from_bytes(&bytes);
                self.monitor_create_cap(&repr, args.dest(1, 2, 3)?, args.core(4)?)?;
                Ok(0)
            }
            Syscall::MonitorRemoteRelations => {
                let previous = self.monitor_remote_relations(
                    args.path(0, 1)?,
                    args.path(2, 3)?,
                    args.relations(4)?,
                    args.relations(5)?,
                )?;
                Ok(u64::from(previous.bits()))
            }
            Syscall::MonitorGetReclaimed => {
                self.monitor_get_reclaimed(args.dest(0, 1, 2)?)?;
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use keel_cap::ObjectType;

    use super::*;
    use crate::testing::{self, FREE_SLOT, MockPlatform, PAGE_SLOT, USER_BASE};

    fn call(k: &mut Kernel<MockPlatform>, syscall: Syscall, words: &[u64]) -> SysRet {
        let mut args = SyscallArgs::default();
        args.0[..words.len()].copy_from_slice(words);
        match k.handle_syscall(syscall as u64, &args) {
            SyscallOutcome::Return(ret) => ret,
            SyscallOutcome::Dispatch(dcb) => panic!("{} dispatched to {dcb}", syscall.name()),
        }
    }

    fn failed_with(ret: SysRet, cause: CapError) -> bool {
        !ret.is_ok() && ret.code_bits() == cause.code()
    }

    #[test]
    fn test_invalid_number() {
        let mut k = testing::boot();
        let outcome = k.handle_syscall(3, &SyscallArgs::default());
        let SyscallOutcome::Return(ret) = outcome else {
            panic!("unexpected dispatch");
        };
        assert!(failed_with(ret, CapError::InvalidArgument));
    }

    #[test]
    fn test_oversized_words_rejected() {
        let mut k = testing::boot();
        let ret = call(&mut k, Syscall::Delete, &[0, 1 << 40, 32]);
        assert!(failed_with(ret, CapError::InvalidArgument));
        let ret = call(&mut k, Syscall::Delete, &[0, PAGE_SLOT as u64, 300]);
        assert!(failed_with(ret, CapError::InvalidArgument));
        let ret = call(&mut k, Syscall::Retype, &[0, PAGE_SLOT as u64, 99, 12, 0, 16, 0]);
        assert!(failed_with(ret, CapError::IllegalDestType));
        assert!(testing::root_cte(&k, PAGE_SLOT).is_some());
    }

    #[test]
    fn test_create_and_identify() {
        let mut k = testing::boot();
        let free = FREE_SLOT as u64;
        let ret = call(&mut k, Syscall::Create, &[0, ObjectType::Id as u64, 0, 0, free, 0]);
        assert_eq!(ret, SysRet::ok(0));
        let ret = call(&mut k, Syscall::IdcapIdentify, &[free]);
        assert_eq!(ret, SysRet::ok(1));

        let ret = call(&mut k, Syscall::IdcapIdentify, &[PAGE_SLOT as u64]);
        assert!(failed_with(ret, CapError::TypeMismatch));
        assert_eq!(ret.stage_bits(), Stage::InvokedCapLookup as u16);
    }

    #[test]
    fn test_retype_copy_and_state() {
        let mut k = testing::boot();
        let frame = ObjectType::Frame as u64;
        let ret = call(&mut k, Syscall::Retype, &[0, PAGE_SLOT as u64, frame, 12, 0, 16, 0]);
        assert!(ret.is_ok());
        let ret = call(&mut k, Syscall::Mint, &[0, 0, 17, 16, 0, 32, 1, 0]);
        assert!(ret.is_ok());
        assert_eq!(testing::root_cap(&k, 17).rights, keel_cap::CapRights::READ);

        let ret = call(&mut k, Syscall::GetState, &[0, 17, 32]);
        assert_eq!(ret, SysRet::ok(0));
        let ret = call(&mut k, Syscall::GetCapOwner, &[17, 32]);
        assert_eq!(ret, SysRet::ok(0));
        let ret = call(&mut k, Syscall::Revoke, &[0, PAGE_SLOT as u64, 32]);
        assert!(ret.is_ok());
        assert!(testing::root_cte(&k, 16).is_none() && testing::root_cte(&k, 17).is_none());
    }

    #[test]
    fn test_privileged_from_other_dispatcher() {
        let mut k = testing::boot();
        testing::retype(&mut k, PAGE_SLOT, ObjectType::Dispatcher, 0, FREE_SLOT);
        let other = testing::root_cap(&k, FREE_SLOT).dispatcher_ref().unwrap();
        k.set_current(other);

        for syscall in [Syscall::SetCapOwner, Syscall::MonitorClearStep, Syscall::MonitorRetype] {
            let ret = call(&mut k, syscall, &[]);
            assert!(failed_with(ret, CapError::NotMonitor), "{}", syscall.name());
        }
    }

    #[test]
    fn test_yield() {
        let mut k = testing::boot();
        let ret = call(&mut k, Syscall::Yield, &[]);
        assert!(failed_with(ret, CapError::CallerEnabled));

        let monitor = k.monitor().unwrap();
        if let Some(dcb) = k.dcb_mut(monitor) {
            dcb.shared.disabled = true;
            dcb.shared.haswork = true;
        }
        k.platform_mut().run_queue.push(monitor);
        let outcome = k.handle_syscall(Syscall::Yield as u64, &SyscallArgs::default());
        assert_eq!(outcome, SyscallOutcome::Dispatch(monitor));
    }

    #[test]
    fn test_identify_into_user_buffer() {
        let mut k = testing::boot();
        let expected = CapRepr::encode(&testing::root_cap(&k, PAGE_SLOT)).to_bytes();

        let ret = call(&mut k, Syscall::MonitorIdentifyCap, &[0, PAGE_SLOT as u64, 32, USER_BASE, 32]);
        assert!(ret.is_ok());
        assert_eq!(k.platform().user[..CapRepr::SIZE], expected);

        let ret = call(&mut k, Syscall::MonitorIdentifyCap, &[0, PAGE_SLOT as u64, 32, USER_BASE, 16]);
        assert!(failed_with(ret, CapError::BufferTooSmall));
        let ret = call(&mut k, Syscall::MonitorIdentifyCap, &[0, PAGE_SLOT as u64, 32, 0x10, 32]);
        assert!(failed_with(ret, CapError::InvalidArgument));

        // hand the image back as a capability received from core 2
        let ret = call(&mut k, Syscall::MonitorCreateCap, &[USER_BASE, 0, 0, FREE_SLOT as u64, 2]);
        assert!(ret.is_ok());
        let created = testing::root_cte(&k, FREE_SLOT).unwrap();
        assert_eq!(created.mdb.owner, CoreId(2));
        assert!(k.mdb().is_copy(testing::root_slot(&k, PAGE_SLOT), testing::root_slot(&k, FREE_SLOT)));
    }

    #[test]
    fn test_remote_relations_word_checked() {
        let mut k = testing::boot();
        let page = PAGE_SLOT as u64;
        let ret = call(&mut k, Syscall::MonitorRemoteRelations, &[0, 32, page, 32, 0x8, 0x8]);
        assert!(failed_with(ret, CapError::InvalidArgument));

        let ret = call(&mut k, Syscall::MonitorRemoteRelations, &[0, 32, page, 32, 0x1, 0x1]);
        assert_eq!(ret, SysRet::ok(0));
        let ret = call(&mut k, Syscall::MonitorRemoteRelations, &[0, 32, page, 32, 0, 0]);
        assert_eq!(ret, SysRet::ok(1));
    }

    #[test]
    fn test_print() {
        let mut k = testing::boot();
        k.platform_mut().user[..11].copy_from_slice(b"hello keel\n");
        let ret = call(&mut k, Syscall::Print, &[USER_BASE, 11]);
        assert!(ret.is_ok());
        assert_eq!(k.platform().console, b"hello keel\n");

        let ret = call(&mut k, Syscall::Print, &[USER_BASE, 5000]);
        assert!(failed_with(ret, CapError::InvalidArgument));
        let ret = call(&mut k, Syscall::Print, &[USER_BASE + 4090, 10]);
        assert!(failed_with(ret, CapError::InvalidArgument));
    }
}

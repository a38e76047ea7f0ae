//! Yield
//!
//! Yielding is split into a decision, made under the kernel lock, and the
//! switch itself, which never returns. [`Kernel::yield_decide`] does all
//! validation and bookkeeping and names the DCB to run;
//! [`KernelCell::syscall`](crate::KernelCell::syscall) releases the lock
//! and dispatches it.

use keel_cap::{CapAddr, CapError, CapObject, CapRights, ObjectRef};

use crate::cap::cspace::CapPath;
use crate::kernel::Kernel;
use crate::platform::Platform;
use crate::syscall::error::{Stage, StageExt, SyscallResult};

impl<P: Platform> Kernel<P> {
    /// Give up the processor, optionally to the dispatcher behind `target`
    /// (an endpoint or dispatcher capability; null for none).
    ///
    /// The caller must be disabled. It is re-enabled, then either leaves
    /// the run queue (nothing to do and no wakeup due, in which case its
    /// wakeup is armed) or yields its timeslice. Returns the DCB to switch
    /// to, which becomes current.
    ///
    /// # Errors
    ///
    /// - [`CapError::CallerEnabled`]: caller not disabled
    /// - target lookup errors
    /// - [`CapError::InvalidYieldTarget`]: target of another type
    /// - [`CapError::NotRunnable`]: target dispatcher is retired or not
    ///   fully set up
    ///
    /// A directed target is put on the run queue if it is not there yet.
    pub fn yield_decide(&mut self, target: CapAddr) -> SyscallResult<ObjectRef> {
        let caller = self.current;
        let Some(dcb) = self.objects.dcb(caller) else {
            return Err(CapError::NotRunnable.into());
        };
        if !dcb.shared.disabled {
            return Err(CapError::CallerEnabled.into());
        }

        let directed = if target.is_null() {
            None
        } else {
            let found = self
                .lookup_cap(CapPath::full(target), CapRights::READ)
                .stage(Stage::YieldTargetLookup)?;
            let next = match found.cap.object {
                CapObject::EndPoint { listener, .. } => listener,
                CapObject::Dispatcher { dcb, .. } => dcb,
                _ => return Err(CapError::InvalidYieldTarget).stage(Stage::YieldTargetLookup),
            };
            let runnable = self
                .objects
                .dcb(next)
                .is_some_and(|dcb| dcb.is_runnable() && !dcb.retired);
            if !runnable {
                return Err(CapError::NotRunnable).stage(Stage::YieldTargetLookup);
            }
            Some(next)
        };

        let now = self.platform.now();
        let mut wakeup = None;
        let mut idle = false;
        if let Some(dcb) = self.objects.dcb_mut(caller) {
            dcb.shared.disabled = false;
            dcb.disabled = false;
            idle = dcb.shared.is_idle_at(now);
            if idle && dcb.shared.wakeup != 0 {
                wakeup = Some(dcb.shared.wakeup);
            }
        }
        if idle {
            self.platform.scheduler_remove(caller);
            if let Some(at) = wakeup {
                self.platform.wakeup_set(caller, at);
            }
        } else {
            self.platform.scheduler_yield(caller);
        }

        let next = match directed {
            Some(next) => {
                self.platform.make_runnable(next);
                next
            }
            None => self.platform.schedule(),
        };
        log::trace!("yield {} -> {}", caller, next);
        self.current = next;
        Ok(next)
    }
}

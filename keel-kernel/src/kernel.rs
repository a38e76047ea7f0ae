//! Per-core kernel state
//!
//! [`Kernel`] owns everything the capability core mutates: the object
//! table, the MDB, the delete and clear queues of the revoke protocol and
//! the dispatcher bookkeeping. Operations are spread over `impl` blocks in
//! the `cap`, `dispatch` and `syscall` modules.
//!
//! [`KernelCell`] is the global home of a core's kernel. Syscalls run to
//! completion under its lock; a syscall that ends in a dispatcher switch
//! releases the lock before calling [`Platform::dispatch`].

use alloc::collections::VecDeque;

use keel_cap::{Capability, Cte, Mdb, ObjectRef, SlotRef};
use keel_common::CoreId;
use spin::{Mutex, Once};

use crate::cap::object_table::ObjectTable;
use crate::config::{FIRST_LOCAL_ID, KernelConfig};
use crate::dispatch::dcb::Dcb;
use crate::dispatch::registry::DcbRegistry;
use crate::logging::{self, ConsoleHook};
use crate::platform::Platform;
use crate::syscall::{SysRet, SyscallArgs, SyscallOutcome};

/// Capability core of one kernel instance.
pub struct Kernel<P: Platform> {
    pub(crate) config: KernelConfig,
    pub(crate) platform: P,
    pub(crate) objects: ObjectTable,
    pub(crate) mdb: Mdb,
    /// Slots marked for deletion, processed front first.
    pub(crate) delete_queue: VecDeque<SlotRef>,
    /// CNodes and dispatchers whose contents are being cleared, innermost
    /// first.
    pub(crate) clear_queue: VecDeque<SlotRef>,
    pub(crate) dcbs: DcbRegistry,
    /// Dispatcher whose syscall is being handled.
    pub(crate) current: ObjectRef,
    pub(crate) monitor: Option<ObjectRef>,
    /// Endpoint registered by the monitor.
    pub(crate) monitor_ep: Option<Capability>,
    /// Ram regions freed by last deletes, awaiting the monitor.
    pub(crate) reclaimed: VecDeque<Capability>,
    pub(crate) next_id: u32,
}

impl<P: Platform> Kernel<P> {
    /// A kernel with no objects, no capabilities and no current dispatcher.
    pub fn new(config: KernelConfig, platform: P) -> Self {
        Self {
            config,
            platform,
            objects: ObjectTable::new(config.max_objects),
            mdb: Mdb::new(),
            delete_queue: VecDeque::new(),
            clear_queue: VecDeque::new(),
            dcbs: DcbRegistry::new(),
            current: ObjectRef::NULL,
            monitor: None,
            monitor_ep: None,
            reclaimed: VecDeque::new(),
            next_id: FIRST_LOCAL_ID,
        }
    }

    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Core this kernel runs on.
    #[inline]
    pub fn core_id(&self) -> CoreId {
        self.config.core_id
    }

    #[inline]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    #[inline]
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// The dispatcher on whose behalf syscalls run.
    #[inline]
    pub fn current(&self) -> ObjectRef {
        self.current
    }

    /// Switch the current dispatcher. Used by the trap path after a
    /// scheduler decision made outside the capability core.
    pub fn set_current(&mut self, dcb: ObjectRef) {
        self.current = dcb;
    }

    /// The monitor's DCB, if one is installed.
    #[inline]
    pub fn monitor(&self) -> Option<ObjectRef> {
        self.monitor
    }

    /// The endpoint the monitor registered.
    #[inline]
    pub fn monitor_endpoint(&self) -> Option<&Capability> {
        self.monitor_ep.as_ref()
    }

    pub fn dcb(&self, dcb: ObjectRef) -> Option<&Dcb> {
        self.objects.dcb(dcb)
    }

    pub fn dcb_mut(&mut self, dcb: ObjectRef) -> Option<&mut Dcb> {
        self.objects.dcb_mut(dcb)
    }

    /// Contents of a slot.
    pub fn cte(&self, slot: SlotRef) -> Option<&Cte> {
        self.objects.cte(slot)
    }

    /// The mapping database.
    #[inline]
    pub fn mdb(&self) -> &Mdb {
        &self.mdb
    }

    /// The kernel object table.
    #[inline]
    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    /// Number of reclaimed regions not yet collected by the monitor.
    pub fn reclaimed_pending(&self) -> usize {
        self.reclaimed.len()
    }

    /// Number of slots waiting in the delete queue.
    pub fn delete_queue_len(&self) -> usize {
        self.delete_queue.len()
    }

    /// Number of objects waiting in the clear queue.
    pub fn clear_queue_len(&self) -> usize {
        self.clear_queue.len()
    }

    /// Call `f` for every registered DCB that still exists.
    pub fn for_each_dcb(&self, mut f: impl FnMut(ObjectRef, &Dcb)) {
        for handle in self.dcbs.iter() {
            if self.objects.generation(handle.dcb) != Some(handle.generation) {
                continue;
            }
            if let Some(dcb) = self.objects.dcb(handle.dcb) {
                f(handle.dcb, dcb);
            }
        }
    }

    /// Store `cte` into the empty slot `at` and index it in the MDB.
    pub(crate) fn insert_cte(&mut self, at: SlotRef, cte: Cte) -> keel_cap::CapResult<()> {
        self.objects.install(at, cte)?;
        self.mdb.insert(&cte.cap, at);
        Ok(())
    }

    /// Drop the slot `at` from the MDB and empty it.
    pub(crate) fn remove_cte(&mut self, at: SlotRef) -> Option<Cte> {
        self.mdb.remove(at);
        self.objects.take(at)
    }
}

/// Global home of a core's [`Kernel`].
///
/// ```ignore
/// static KERNEL: KernelCell<BoardPlatform> = KernelCell::new();
///
/// KERNEL.init(KernelConfig::default(), BoardPlatform::new(), Some(uart_puts));
/// let ret = KERNEL.syscall(num, &args);
/// ```
pub struct KernelCell<P: Platform> {
    inner: Once<Mutex<Kernel<P>>>,
}

impl<P: Platform> KernelCell<P> {
    /// An uninitialised cell.
    pub const fn new() -> Self {
        Self { inner: Once::new() }
    }

    /// Create the kernel and install the logger. Returns `false` if the
    /// cell was already initialised, in which case nothing changes.
    pub fn init(&self, config: KernelConfig, platform: P, console: Option<ConsoleHook>) -> bool {
        let mut created = false;
        self.inner.call_once(|| {
            created = true;
            Mutex::new(Kernel::new(config, platform))
        });
        if created {
            logging::init(config.log_level, console);
            log::info!(
                "kernel initialised on {} ({} objects max)",
                config.core_id,
                config.max_objects
            );
        }
        created
    }

    /// Check if [`Self::init`] has run.
    pub fn is_initialised(&self) -> bool {
        self.inner.is_completed()
    }

    /// Run `f` with exclusive access to the kernel.
    pub fn with<R>(&self, f: impl FnOnce(&mut Kernel<P>) -> R) -> Option<R> {
        self.inner.get().map(|kernel| f(&mut kernel.lock()))
    }

    /// Handle syscall `num`.
    ///
    /// A syscall that switches dispatchers does not return: the lock is
    /// dropped, then [`Platform::dispatch`] runs the chosen DCB.
    ///
    /// # Panics
    ///
    /// If called before [`Self::init`].
    pub fn syscall(&self, num: u64, args: &SyscallArgs) -> SysRet {
        let Some(outcome) = self.with(|kernel| kernel.handle_syscall(num, args)) else {
            panic!("syscall {num} before kernel initialisation");
        };
        match outcome {
            SyscallOutcome::Return(ret) => ret,
            SyscallOutcome::Dispatch(dcb) => P::dispatch(dcb),
        }
    }
}

impl<P: Platform> Default for KernelCell<P> {
    fn default() -> Self {
        Self::new()
    }
}

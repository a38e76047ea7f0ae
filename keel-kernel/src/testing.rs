//! Test support: a recording platform and a bootstrapped kernel.
//!
//! Root slot layout after [`boot`]:
//!
//! | slot | contents |
//! |---|---|
//! | 0..=3 | root CNode, monitor dispatcher, kernel, monitor endpoint |
//! | 8 | Ram, 1 MiB at [`BIG_RAM`] |
//! | 9..=14 | Ram, one page each from [`PAGE_RAM`] |
//! | 15 | PhysAddr, 16 MiB at [`PHYS`] |
//! | 16.. | free |

use alloc::vec::Vec;

use keel_cap::objects::dispatcher::Ticks;
use keel_cap::{CapAddr, Capability, Cte, ObjectRef, ObjectType, SlotRef};
use keel_common::PhysAddr;

use crate::cap::bootstrap::{BootInfo, BootRegion, BootRegionKind};
use crate::cap::cspace::{CapPath, SlotDest};
use crate::config::KernelConfig;
use crate::dispatch::dcb::DCB_SLOT_CSPACE;
use crate::kernel::Kernel;
use crate::platform::Platform;

pub(crate) const RESERVED: u64 = 0x0010_0000;
pub(crate) const BIG_RAM: u64 = 0x0100_0000;
pub(crate) const PAGE_RAM: u64 = 0x0200_0000;
pub(crate) const PHYS: u64 = 0x4000_0000;
pub(crate) const USER_BASE: u64 = 0x8000_0000;

pub(crate) const BIG_RAM_SLOT: u32 = 8;
pub(crate) const PAGE_SLOT: u32 = 9;
pub(crate) const PHYS_SLOT: u32 = 15;
pub(crate) const FREE_SLOT: u32 = 16;

/// The root CNode as an explicit root argument.
pub(crate) const ROOT: CapAddr = CapAddr(0);

const fn page(index: u64) -> BootRegion {
    BootRegion {
        kind: BootRegionKind::Ram,
        base: PhysAddr::new(PAGE_RAM + (index << 12)),
        bits: 12,
    }
}

pub(crate) const REGIONS: [BootRegion; 8] = [
    BootRegion {
        kind: BootRegionKind::Ram,
        base: PhysAddr::new(BIG_RAM),
        bits: 20,
    },
    page(0),
    page(1),
    page(2),
    page(3),
    page(4),
    page(5),
    BootRegion {
        kind: BootRegionKind::PhysAddr,
        base: PhysAddr::new(PHYS),
        bits: 24,
    },
];

/// Platform recording every scheduler call.
#[derive(Default)]
pub(crate) struct MockPlatform {
    pub now: Ticks,
    pub run_queue: Vec<ObjectRef>,
    pub wakeups: Vec<(ObjectRef, Ticks)>,
    pub yielded: Vec<ObjectRef>,
    pub console: Vec<u8>,
    /// User memory mapped at [`USER_BASE`].
    pub user: Vec<u8>,
}

impl MockPlatform {
    fn user_range(&self, addr: u64, len: usize) -> Option<core::ops::Range<usize>> {
        let start = usize::try_from(addr.checked_sub(USER_BASE)?).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.user.len()).then_some(start..end)
    }
}

impl Platform for MockPlatform {
    fn now(&self) -> Ticks {
        self.now
    }

    fn make_runnable(&mut self, dcb: ObjectRef) {
        if !self.run_queue.contains(&dcb) {
            self.run_queue.push(dcb);
        }
    }

    fn scheduler_remove(&mut self, dcb: ObjectRef) -> bool {
        let before = self.run_queue.len();
        self.run_queue.retain(|&queued| queued != dcb);
        before != self.run_queue.len()
    }

    fn scheduler_yield(&mut self, dcb: ObjectRef) {
        self.yielded.push(dcb);
        if let Some(pos) = self.run_queue.iter().position(|&queued| queued == dcb) {
            let dcb = self.run_queue.remove(pos);
            self.run_queue.push(dcb);
        }
    }

    fn schedule(&mut self) -> ObjectRef {
        self.run_queue.first().copied().unwrap_or(ObjectRef::NULL)
    }

    fn wakeup_set(&mut self, dcb: ObjectRef, at: Ticks) {
        self.wakeups.retain(|&(queued, _)| queued != dcb);
        self.wakeups.push((dcb, at));
    }

    fn wakeup_remove(&mut self, dcb: ObjectRef) {
        self.wakeups.retain(|&(queued, _)| queued != dcb);
    }

    fn dispatch(dcb: ObjectRef) -> ! {
        panic!("dispatch to {dcb} in a unit test")
    }

    fn console_write(&mut self, bytes: &[u8]) {
        self.console.extend_from_slice(bytes);
    }

    fn read_user(&self, addr: u64, out: &mut [u8]) -> bool {
        match self.user_range(addr, out.len()) {
            Some(range) => {
                out.copy_from_slice(&self.user[range]);
                true
            }
            None => false,
        }
    }

    fn write_user(&mut self, addr: u64, bytes: &[u8]) -> bool {
        match self.user_range(addr, bytes.len()) {
            Some(range) => {
                self.user[range].copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }
}

/// A kernel with the monitor bootstrapped and current.
pub(crate) fn boot() -> Kernel<MockPlatform> {
    let platform = MockPlatform {
        user: alloc::vec![0; 4096],
        ..MockPlatform::default()
    };
    let mut kernel = Kernel::new(KernelConfig::default().with_max_objects(256), platform);
    let info = BootInfo {
        reserved: PhysAddr::new(RESERVED),
        regions: &REGIONS,
    };
    kernel.bootstrap_monitor(&info).unwrap();
    kernel
}

/// Storage of the monitor's root CNode.
pub(crate) fn root_cnode(kernel: &Kernel<MockPlatform>) -> ObjectRef {
    let monitor = kernel.monitor().unwrap();
    kernel
        .cte(SlotRef::new(monitor, DCB_SLOT_CSPACE))
        .and_then(|cte| cte.cap.cnode_storage())
        .unwrap()
}

/// Slot `index` of the root CNode.
pub(crate) fn root_slot(kernel: &Kernel<MockPlatform>, index: u32) -> SlotRef {
    SlotRef::new(root_cnode(kernel), index)
}

/// Contents of root slot `index`, `None` if empty.
pub(crate) fn root_cte(kernel: &Kernel<MockPlatform>, index: u32) -> Option<Cte> {
    kernel
        .cte(root_slot(kernel, index))
        .copied()
        .filter(|cte| !cte.is_empty())
}

/// Capability in root slot `index`. Panics if empty.
pub(crate) fn root_cap(kernel: &Kernel<MockPlatform>, index: u32) -> Capability {
    root_cte(kernel, index).unwrap().cap
}

/// Full-width path to root slot `index`.
pub(crate) const fn at(index: u32) -> CapPath {
    CapPath::full(CapAddr(index))
}

/// Retype root slot `src` into `ty` objects placed from root slot `dest`.
pub(crate) fn retype(kernel: &mut Kernel<MockPlatform>, src: u32, ty: ObjectType, bits: u8, dest: u32) {
    kernel
        .retype(ROOT, CapAddr(src), ty, bits, SlotDest::in_root(dest), false)
        .unwrap();
}

/// Copy root slot `src` to root slot `dest`.
pub(crate) fn copy(kernel: &mut Kernel<MockPlatform>, src: u32, dest: u32) {
    kernel
        .copy_or_mint(ROOT, SlotDest::in_root(dest), at(src), 0, 0, false)
        .unwrap();
}

use keel_cap::objects::dispatcher::Ticks;
use keel_cap::{CapError, CapObject, Cte, ObjectRef, ObjectType, SlotRef};
use keel_common::{CoreId, PhysAddr};
use keel_kernel::dispatch::dcb::DCB_SLOT_CSPACE;
use keel_kernel::{
    BootInfo, BootRegion, BootRegionKind, Kernel, KernelConfig, Platform, SysRet, Syscall, SyscallArgs,
    SyscallOutcome,
};

const BIG_RAM: u64 = 0x0100_0000;
const PAGE_RAM: u64 = 0x0200_0000;

const BIG_RAM_SLOT: u64 = 8;
const PAGE_SLOT: u64 = 9;

#[derive(Default)]
struct Board {
    run_queue: Vec<ObjectRef>,
}

impl Platform for Board {
    fn now(&self) -> Ticks {
        0
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

    fn scheduler_yield(&mut self, _dcb: ObjectRef) {}

    fn schedule(&mut self) -> ObjectRef {
        self.run_queue.first().copied().unwrap_or(ObjectRef::NULL)
    }

    fn wakeup_set(&mut self, _dcb: ObjectRef, _at: Ticks) {}

    fn wakeup_remove(&mut self, _dcb: ObjectRef) {}

    fn dispatch(dcb: ObjectRef) -> ! {
        panic!("dispatch to {dcb}")
    }

    fn console_write(&mut self, _bytes: &[u8]) {}

    fn read_user(&self, _addr: u64, _out: &mut [u8]) -> bool {
        false
    }

    fn write_user(&mut self, _addr: u64, _bytes: &[u8]) -> bool {
        false
    }
}

fn page(index: u64) -> BootRegion {
    BootRegion {
        kind: BootRegionKind::Ram,
        base: PhysAddr::new(PAGE_RAM + (index << 12)),
        bits: 12,
    }
}

/// Monitor with a 1 MiB Ram at root slot 8 and four pages at 9..13.
fn boot() -> Kernel<Board> {
    let regions = [
        BootRegion {
            kind: BootRegionKind::Ram,
            base: PhysAddr::new(BIG_RAM),
            bits: 20,
        },
        page(0),
        page(1),
        page(2),
        page(3),
    ];
    let mut kernel = Kernel::new(KernelConfig::default().with_max_objects(64), Board::default());
    let info = BootInfo {
        reserved: PhysAddr::new(0x0010_0000),
        regions: &regions,
    };
    kernel.bootstrap_monitor(&info).unwrap();
    kernel
}

fn call(k: &mut Kernel<Board>, syscall: Syscall, words: &[u64]) -> SysRet {
    let mut args = [0; 8];
    args[..words.len()].copy_from_slice(words);
    match k.handle_syscall(syscall as u64, &SyscallArgs::new(args)) {
        SyscallOutcome::Return(ret) => ret,
        SyscallOutcome::Dispatch(dcb) => panic!("unexpected dispatch to {dcb}"),
    }
}

fn ok(k: &mut Kernel<Board>, syscall: Syscall, words: &[u64]) -> u64 {
    let ret = call(k, syscall, words);
    assert!(ret.is_ok(), "{} failed with {:#x}", syscall.name(), ret.error);
    ret.value
}

fn fails(k: &mut Kernel<Board>, syscall: Syscall, words: &[u64], cause: CapError) {
    let ret = call(k, syscall, words);
    assert_eq!(ret.code_bits(), cause.code(), "{} returned {:#x}", syscall.name(), ret.error);
}

/// Storage of the CNode capability held in root slot `index`.
fn cnode_at(k: &Kernel<Board>, index: u32) -> ObjectRef {
    let root = root_storage(k);
    k.cte(SlotRef::new(root, index))
        .and_then(|cte| cte.cap.cnode_storage())
        .unwrap()
}

fn root_storage(k: &Kernel<Board>) -> ObjectRef {
    let monitor = k.monitor().unwrap();
    k.cte(SlotRef::new(monitor, DCB_SLOT_CSPACE))
        .and_then(|cte| cte.cap.cnode_storage())
        .unwrap()
}

fn occupied(k: &Kernel<Board>, container: ObjectRef, index: u32) -> Option<Cte> {
    k.cte(SlotRef::new(container, index)).copied().filter(|cte| !cte.is_empty())
}

#[test]
fn nested_cnode_lifecycle() {
    let mut k = boot();
    let ram = ObjectType::Ram as u64;
    let cnode = ObjectType::CNode as u64;

    // CNode A at root slot 16, then sixteen 64 KiB chunks inside it
    ok(&mut k, Syscall::Retype, &[0, PAGE_SLOT, cnode, 6, 0, 16, 0]);
    ok(&mut k, Syscall::Retype, &[0, BIG_RAM_SLOT, ram, 16, 16, 0, 32]);
    let a = cnode_at(&k, 16);
    for index in 0..16 {
        let cte = occupied(&k, a, index).unwrap();
        assert_eq!(cte.cap.region(), Some((PhysAddr::new(BIG_RAM + (u64::from(index) << 16)), 16)));
    }

    // copy A[0] to A[20], resolving both against A as root
    ok(&mut k, Syscall::Copy, &[16, 0, 20, 0, 0, 6, 0, 0]);
    assert!(k.mdb().is_copy(SlotRef::new(a, 0), SlotRef::new(a, 20)));

    ok(&mut k, Syscall::Revoke, &[16, 0, 6]);
    assert!(occupied(&k, a, 0).is_none() && occupied(&k, a, 20).is_none());
    assert!(occupied(&k, a, 1).is_some());
    fails(&mut k, Syscall::GetState, &[16, 0, 6], CapError::EmptySlot);

    // A still holds fifteen chunks, so its deletion is monitor driven
    fails(&mut k, Syscall::Delete, &[0, 16, 32], CapError::DeleteLastOwned);
    assert_eq!(ok(&mut k, Syscall::MonitorDeleteLast, &[0, 32, 16, 32, 0, 0, 40]), 0);
    assert_eq!(k.delete_queue_len(), 15);

    let mut steps = 0;
    while ok(&mut k, Syscall::MonitorRevokeStep, &[0, 32, 16, 32, 0, 0, 41]) != 2 {
        steps += 1;
    }
    assert_eq!(steps, 15);
    while ok(&mut k, Syscall::MonitorClearStep, &[0, 0, 41]) != 1 {}

    let root = root_storage(&k);
    assert!(occupied(&k, root, 16).is_none());
    assert!(occupied(&k, root, 41).is_none());
    assert_eq!(k.reclaimed_pending(), 0);
    k.mdb().check_invariants().unwrap();

    // nothing is left below the big region, so it retypes again
    ok(&mut k, Syscall::Retype, &[0, BIG_RAM_SLOT, ObjectType::Frame as u64, 20, 0, 17, 0]);
}

#[test]
fn four_slot_cnode_revoke() {
    let mut k = boot();
    let frame = ObjectType::Frame as u64;

    // sixteen 256 byte pieces of the last page, the first becomes a
    // four-slot CNode A at root slot 40
    ok(&mut k, Syscall::Retype, &[0, PAGE_SLOT + 3, ObjectType::Ram as u64, 8, 0, 16, 0]);
    ok(&mut k, Syscall::Retype, &[0, 16, ObjectType::CNode as u64, 2, 0, 40, 0]);
    let a = cnode_at(&k, 40);

    // A[0] a frame of the second page, A[1] a copy of it
    let page_into_a = [0, PAGE_SLOT + 1, frame, 12, 40, 0, 32];
    ok(&mut k, Syscall::Retype, &page_into_a);
    ok(&mut k, Syscall::Copy, &[40, 0, 1, 0, 0, 2, 0, 0]);
    assert!(k.mdb().is_copy(SlotRef::new(a, 0), SlotRef::new(a, 1)));
    let frame_cap = occupied(&k, a, 0).unwrap().cap;
    assert_eq!(occupied(&k, a, 1).map(|cte| cte.cap), Some(frame_cap));

    ok(&mut k, Syscall::Revoke, &[40, 0, 2]);
    assert!(occupied(&k, a, 0).is_none() && occupied(&k, a, 1).is_none());

    // the page has no descendants left and retypes again
    ok(&mut k, Syscall::Retype, &page_into_a);
    ok(&mut k, Syscall::Copy, &[40, 0, 1, 0, 0, 2, 0, 0]);

    // revoking the page from the root reaches into A
    ok(&mut k, Syscall::Revoke, &[0, PAGE_SLOT + 1, 32]);
    assert!(occupied(&k, a, 0).is_none() && occupied(&k, a, 1).is_none());
    let root = root_storage(&k);
    assert!(occupied(&k, root, PAGE_SLOT as u32 + 1).is_none());
    assert!(occupied(&k, root, 40).is_some());
    k.mdb().check_invariants().unwrap();
}

#[test]
fn retype_needs_exclusive_source() {
    let mut k = boot();
    let frame = ObjectType::Frame as u64;
    ok(&mut k, Syscall::Retype, &[0, PAGE_SLOT, frame, 12, 0, 16, 0]);
    fails(&mut k, Syscall::Retype, &[0, PAGE_SLOT, frame, 12, 0, 17, 0], CapError::RevokeFirst);

    // copies do not count as descendants
    ok(&mut k, Syscall::Copy, &[0, 0, 18, PAGE_SLOT, 0, 32, 0, 0]);
    ok(&mut k, Syscall::Delete, &[0, 16, 32]);
    ok(&mut k, Syscall::Retype, &[0, PAGE_SLOT, frame, 12, 0, 17, 0]);
}

#[test]
fn lock_blocks_deletion() {
    let mut k = boot();
    let page = [0, 32, PAGE_SLOT, 32];
    ok(&mut k, Syscall::LockCap, &page);
    fails(&mut k, Syscall::LockCap, &page, CapError::Locked);
    fails(&mut k, Syscall::Delete, &[0, PAGE_SLOT, 32], CapError::Locked);
    assert_eq!(ok(&mut k, Syscall::GetState, &[0, PAGE_SLOT, 32]), 2);

    ok(&mut k, Syscall::UnlockCap, &page);
    fails(&mut k, Syscall::UnlockCap, &page, CapError::NotLocked);
    ok(&mut k, Syscall::Delete, &[0, PAGE_SLOT, 32]);
}

#[test]
fn owner_follows_copy_class() {
    let mut k = boot();
    ok(&mut k, Syscall::Copy, &[0, 0, 16, PAGE_SLOT, 0, 32, 0, 0]);
    ok(&mut k, Syscall::Copy, &[0, 0, 17, 16, 0, 32, 0, 0]);
    ok(&mut k, Syscall::SetCapOwner, &[17, 32, 5]);

    assert_eq!(ok(&mut k, Syscall::GetCapOwner, &[PAGE_SLOT, 32]), 5);
    assert_eq!(ok(&mut k, Syscall::GetState, &[0, 16, 32]), 1);
    assert_eq!(ok(&mut k, Syscall::GetCapOwner, &[PAGE_SLOT + 1, 32]), 0);

    // foreign objects leave this core without a last delete
    fails(&mut k, Syscall::Revoke, &[0, PAGE_SLOT, 32], CapError::RetryThroughMonitor);
    for slot in [16, 17, PAGE_SLOT] {
        ok(&mut k, Syscall::Delete, &[0, slot, 32]);
    }
    assert_eq!(k.reclaimed_pending(), 0);
}

#[test]
fn reclaimed_memory_returns_to_monitor() {
    let mut k = boot();
    ok(&mut k, Syscall::Delete, &[0, PAGE_SLOT + 2, 32]);
    assert_eq!(k.reclaimed_pending(), 1);

    ok(&mut k, Syscall::MonitorGetReclaimed, &[0, 0, 40]);
    let root = root_storage(&k);
    let cte = occupied(&k, root, 40).unwrap();
    assert_eq!(cte.cap.object, CapObject::Ram { base: PhysAddr::new(PAGE_RAM + 0x2000), bits: 12 });
    assert_eq!(cte.mdb.owner, CoreId::BSP);
    fails(&mut k, Syscall::MonitorGetReclaimed, &[0, 0, 41], CapError::NothingReclaimed);
}

#[test]
fn dispatcher_runs_only_when_complete() {
    let mut k = boot();
    ok(&mut k, Syscall::Retype, &[0, PAGE_SLOT, ObjectType::Dispatcher as u64, 0, 0, 16, 0]);
    ok(&mut k, Syscall::Retype, &[0, PAGE_SLOT + 1, ObjectType::CNode as u64, 6, 0, 20, 0]);
    ok(&mut k, Syscall::Retype, &[0, PAGE_SLOT + 2, ObjectType::VNodeX86_64Pml4 as u64, 0, 0, 21, 0]);
    ok(&mut k, Syscall::Retype, &[0, PAGE_SLOT + 3, ObjectType::Frame as u64, 12, 0, 22, 0]);

    fails(&mut k, Syscall::DispatcherSetup, &[16, 20, 32, 0, 22, 1, 0], CapError::NotRunnable);
    assert!(k.platform().run_queue.is_empty());

    ok(&mut k, Syscall::DispatcherSetup, &[16, 20, 32, 21, 22, 1, 0]);
    let root = root_storage(&k);
    let dcb = occupied(&k, root, 16).and_then(|cte| cte.cap.dispatcher_ref()).unwrap();
    assert_eq!(k.platform().run_queue, [dcb]);
    assert!(k.dcb(dcb).is_some_and(|dcb| dcb.disabled && dcb.is_runnable()));

    // best effort, weight 0
    fails(&mut k, Syscall::DispatcherProperties, &[16, 0, 0, 0, 0, 0, 0], CapError::InvalidSchedParams);
    ok(&mut k, Syscall::DispatcherProperties, &[16, 0, 0, 0, 0, 0, 3]);
    assert_eq!(k.dcb(dcb).map(|dcb| dcb.sched.weight), Some(3));
    assert_eq!(k.platform().run_queue, [dcb]);
}

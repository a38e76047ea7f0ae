//! Platform seam
//!
//! Everything the capability core needs from the rest of the kernel: the
//! scheduler, the timer, the console, dispatch, and access to user memory.
//! Arch/board glue implements [`Platform`]; tests use a recording mock.

use keel_cap::ObjectRef;
use keel_cap::objects::dispatcher::Ticks;

pub trait Platform {
    /// Current time.
    fn now(&self) -> Ticks;

    /// Put `dcb` on the run queue. No effect if it is already queued.
    fn make_runnable(&mut self, dcb: ObjectRef);

    /// Take `dcb` off the run queue. Returns whether it was queued.
    fn scheduler_remove(&mut self, dcb: ObjectRef) -> bool;

    /// Give up the rest of `dcb`'s timeslice.
    fn scheduler_yield(&mut self, dcb: ObjectRef);

    /// Pick the next dispatcher to run.
    fn schedule(&mut self) -> ObjectRef;

    /// Arrange for `dcb` to be made runnable at `at`.
    fn wakeup_set(&mut self, dcb: ObjectRef, at: Ticks);

    /// Cancel any pending wakeup of `dcb`.
    fn wakeup_remove(&mut self, dcb: ObjectRef);

    /// Switch to `dcb`. Never returns to the caller.
    ///
    /// Takes no receiver: the switch happens after the kernel state has
    /// been released, see [`KernelCell::syscall`](crate::KernelCell::syscall).
    fn dispatch(dcb: ObjectRef) -> !;

    /// Write raw bytes to the kernel console.
    fn console_write(&mut self, bytes: &[u8]);

    /// Copy user memory at `addr` into `out`. `false` if any byte is not
    /// readable by the current dispatcher.
    fn read_user(&self, addr: u64, out: &mut [u8]) -> bool;

    /// Copy `bytes` into user memory at `addr`. `false` if any byte is not
    /// writable by the current dispatcher.
    fn write_user(&mut self, addr: u64, bytes: &[u8]) -> bool;
}

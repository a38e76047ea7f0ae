//! # keel-kernel
//!
//! The capability core of the keel kernel: per-core object storage, the
//! capability syscalls, the monitor's step protocol for distributed
//! revocation, and dispatcher configuration.
//!
//! The pure capability model (capabilities, address resolution,
//! derivation and the mapping database) lives in `keel-cap`. This crate
//! owns the state that model operates on and the syscall surface over it.
//! Everything architecture specific (scheduler, timer, console, context
//! switch, user memory access) sits behind [`Platform`].
//!
//! # Execution model
//!
//! One [`Kernel`] per core, kept in a [`KernelCell`]. Syscalls run to
//! completion under its lock and never wait on another core. Work that
//! spans cores is split into steps the monitor issues one syscall at a
//! time:
//!
//! ```text
//! delete/revoke ──► RetryThroughMonitor / DeleteLastOwned
//!                        │
//!      monitor: lock ─► remote relations ─► revoke step* ─► clear step*
//!                                          delete last ─► get reclaimed
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod cap;
pub mod config;
pub mod dispatch;
pub mod kernel;
pub mod logging;
pub mod platform;
pub mod syscall;

#[cfg(test)]
mod testing;

pub use cap::{BootInfo, BootRegion, BootRegionKind, CapPath, ClearStep, RevokeStep, SlotDest};
pub use config::KernelConfig;
pub use kernel::{Kernel, KernelCell};
pub use platform::Platform;
pub use syscall::{Stage, SysRet, Syscall, SyscallArgs, SyscallError, SyscallOutcome, SyscallResult};

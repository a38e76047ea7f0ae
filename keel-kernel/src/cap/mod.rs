//! Capability system kernel integration
//!
//! This module integrates the `keel-cap` capability library into the
//! kernel, providing storage for kernel objects and the capability
//! syscalls.
//!
//! # Components
//!
//! - [`object_table`]: Kernel object storage with generation counters
//! - [`cnode_storage`]: CNode heap allocation implementing [`CNodeOps`]
//! - [`vnode_storage`]: Mapping entries of translation tables
//! - [`cspace`]: Lookups relative to the caller's CSpace
//! - [`derive`]: Retype, create, copy and mint
//! - [`delete`]: Delete, revoke and the deletion queues
//! - [`ownership`]: Owner, lock and remote-relation propagation
//! - [`bootstrap`]: Monitor bootstrap
//!
//! [`CNodeOps`]: keel_cap::CNodeOps

pub mod bootstrap;
pub mod cnode_storage;
pub mod cspace;
pub mod delete;
mod derive;
pub mod object_table;
mod ownership;
pub mod vnode_storage;

pub use bootstrap::{BootInfo, BootRegion, BootRegionKind};
pub use cnode_storage::CNodeStorage;
pub use cspace::{CapPath, SlotDest};
pub use delete::{ClearStep, RevokeStep};
pub use object_table::{KernelObject, ObjectTable};
pub use vnode_storage::{Mapping, VNodeStorage};

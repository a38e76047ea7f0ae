//! Keel Capability Model
//!
//! This crate holds the pure capability logic of the keel kernel: what a
//! capability is, how addresses resolve, how objects derive from one
//! another and how the mapping database orders them. It owns no global
//! state and performs no I/O; `keel-kernel` provides storage and the
//! syscall surface.
//!
//! # Core Types
//!
//! - [`Capability`] / [`CapObject`]: closed variant over all object types
//! - [`CapRights`]: access rights, attenuated by mint
//! - [`Cte`] / [`MdbMeta`]: a slot and its distributed-capability metadata
//! - [`CapAddr`]: capability address, resolved with [`cptr::resolve`]
//! - [`Mdb`]: ordered index answering copy / descendant / ancestor queries
//!
//! # Derivation
//!
//! Objects are never created from nothing (identifier tokens aside). Boot
//! hands out physical-range and RAM capabilities; everything else is
//! obtained by *retyping* those ([`ops::plan_retype`]). The mapping database
//! keeps every derived capability adjacent to its parent so that revoking
//! an object can find all of its descendants with a bounded walk.
//!
//! ```text
//! PhysAddr ─► Ram ─┬─► Frame
//!                  ├─► CNode
//!                  ├─► VNode
//!                  └─► Dispatcher ─► EndPoint
//! ```
//!
//! # Kernel Integration
//!
//! The [`CNodeOps`] and [`CSpace`] traits define the interface between
//! `keel-cap` and `keel-kernel`.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

mod cap;
pub mod cnode;
pub mod cptr;
mod error;
pub mod mdb;
pub mod objects;
pub mod ops;
mod rights;
pub mod root_slots;
mod slot;

pub use cap::{CapObject, CapRepr, Capability, Identity, TypeRoot};
pub use cnode::{CNodeMeta, CNodeOps, CNodeRadix, CSpace, MAX_CNODE_RADIX, MIN_CNODE_RADIX};
pub use cptr::{CPTR_BITS, CapAddr};
pub use error::{CapError, CapResult, ErrorKind};
pub use mdb::{Mdb, MdbKey};
pub use objects::{Arch, ObjectType, VNodeKind};
pub use rights::CapRights;
pub use slot::{Cte, DistcapState, MdbMeta, ObjectRef, RemoteRelations, SlotRef};

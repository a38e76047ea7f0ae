//! Dispatchers
//!
//! - [`dcb`]: the dispatcher control block
//! - [`registry`]: weak index of configured DCBs
//! - setup and scheduling parameters, see [`Kernel::dispatcher_setup`]
//! - yield, see [`Kernel::yield_decide`]
//!
//! [`Kernel::dispatcher_setup`]: crate::Kernel::dispatcher_setup
//! [`Kernel::yield_decide`]: crate::Kernel::yield_decide

pub mod dcb;
pub mod registry;
mod setup;
mod switch;

pub use dcb::Dcb;
pub use registry::{DcbRegistry, WeakDcb};

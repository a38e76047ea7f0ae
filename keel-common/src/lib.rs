//! # keel-common
//!
//! Shared types for the keel kernel crates.
//!
//! - [`PhysAddr`]: physical address newtype used by capabilities and DCBs
//! - [`CoreId`] / [`DomainId`]: identifiers carried in capability metadata
//!
//! # no_std
//!
//! This crate is `#![no_std]` and has zero dependencies so that every other
//! keel crate can depend on it.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod addr;
pub mod ids;

pub use addr::PhysAddr;
pub use ids::{CoreId, DomainId};

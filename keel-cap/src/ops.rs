//! Capability derivation rules
//!
//! Pure functions computing what a mint or a retype produces. The kernel
//! performs the slot and MDB bookkeeping around them.
//!
//! # Mint parameters
//!
//! | Source type | `param1` | `param2` |
//! |-------------|----------|----------|
//! | CNode | guard value | guard size |
//! | EndPoint | buffer offset (bytes) | buffer length (words) |
//! | anything else | rights mask | unused |
//!
//! A mint never widens rights, and an endpoint that already names a buffer
//! can only be narrowed to a sub-range of it.

use keel_common::PhysAddr;

use crate::cap::{CapObject, Capability};
use crate::cnode::check_guard;
use crate::cptr::CPTR_BITS;
use crate::error::{CapError, CapResult};
use crate::objects::{self, IdToken, ObjectType, is_well_founded};
use crate::rights::CapRights;
use crate::slot::ObjectRef;

/// Smallest endpoint receive buffer, in words.
pub const LMP_RECV_HEADER_LENGTH: u32 = 1;

/// Bytes per endpoint buffer word.
const EP_WORD_BYTES: u64 = 8;

/// Compute the capability produced by minting `src` with `param1` and
/// `param2`.
///
/// # Errors
///
/// - [`CapError::GuardSizeOverflow`]: CNode guard does not fit the address
/// - [`CapError::InvalidArgument`]: guard value wider than the guard size,
///   or reserved rights bits set
/// - [`CapError::InvalidEndpointBuffer`]: endpoint buffer too short or
///   outside the source buffer
/// - [`CapError::RightsEscalation`]: rights mask not a subset of `src`
pub fn mint(src: &Capability, param1: u64, param2: u64) -> CapResult<Capability> {
    let mut out = *src;
    match &mut out.object {
        CapObject::Null => return Err(CapError::EmptySlot),
        CapObject::CNode { radix, guard, guard_size, .. } => {
            let size = u8::try_from(param2).map_err(|_| CapError::GuardSizeOverflow)?;
            if size > CPTR_BITS {
                return Err(CapError::GuardSizeOverflow);
            }
            check_guard(*radix, size)?;
            if size < 32 && param1 >> size != 0 || param1 > u32::MAX as u64 {
                return Err(CapError::InvalidArgument);
            }
            *guard = param1 as u32;
            *guard_size = size;
        }
        CapObject::EndPoint { epoffset, epbuflen, .. } => {
            let len = u32::try_from(param2).map_err(|_| CapError::InvalidEndpointBuffer)?;
            if len < LMP_RECV_HEADER_LENGTH {
                return Err(CapError::InvalidEndpointBuffer);
            }
            let end = (len as u64)
                .checked_mul(EP_WORD_BYTES)
                .and_then(|bytes| bytes.checked_add(param1))
                .ok_or(CapError::InvalidEndpointBuffer)?;
            if *epbuflen != 0 {
                let src_end = *epoffset + *epbuflen as u64 * EP_WORD_BYTES;
                if param1 < *epoffset || end > src_end {
                    return Err(CapError::InvalidEndpointBuffer);
                }
            }
            *epoffset = param1;
            *epbuflen = len;
        }
        _ => {
            let mask = CapRights::from_bits_strict(param1).ok_or(CapError::InvalidArgument)?;
            if !mask.is_subset_of(src.rights) {
                return Err(CapError::RightsEscalation);
            }
            out.rights = mask;
        }
    }
    Ok(out)
}

/// What a retype will produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetypePlan {
    /// Type of every child.
    pub dest_type: ObjectType,
    /// log2 size of one child.
    pub obj_bits: u8,
    /// Number of children.
    pub count: u64,
    /// The caller's size argument, kept for CNode radix.
    pub size_bits: u8,
}

impl RetypePlan {
    /// Whether each child needs kernel storage (CNode slots, table
    /// entries or a DCB).
    #[must_use]
    pub const fn needs_storage(&self) -> bool {
        matches!(self.dest_type, ObjectType::CNode | ObjectType::Dispatcher)
            || self.dest_type.is_vnode()
    }
}

/// Plan a retype of `src` into `dest_type` objects of `size_bits`.
///
/// # Errors
///
/// - [`CapError::IllegalDestType`]: destination is Null
/// - [`CapError::InvalidRetype`]: relation not allowed, or a same-type
///   retype that does not shrink
/// - [`CapError::InvalidSize`]: size out of range or larger than the source
pub fn plan_retype(src: &Capability, dest_type: ObjectType, size_bits: u8) -> CapResult<RetypePlan> {
    if dest_type == ObjectType::Null {
        return Err(CapError::IllegalDestType);
    }
    let src_type = src.object_type();
    if !is_well_founded(src_type, dest_type) {
        return Err(CapError::InvalidRetype);
    }
    let (_, src_bits) = src.region().ok_or(CapError::InvalidRetype)?;

    if dest_type == ObjectType::EndPoint {
        return Ok(RetypePlan {
            dest_type,
            obj_bits: src_bits,
            count: 1,
            size_bits,
        });
    }

    let obj_bits = objects::object_bits(dest_type, size_bits)?;
    if dest_type == src_type && obj_bits >= src_bits {
        return Err(CapError::InvalidRetype);
    }
    if obj_bits > src_bits {
        return Err(CapError::InvalidSize);
    }
    Ok(RetypePlan {
        dest_type,
        obj_bits,
        count: 1u64 << (src_bits - obj_bits),
        size_bits,
    })
}

/// The `index`-th child of a planned retype. `storage` is the kernel
/// storage allocated for the child when [`RetypePlan::needs_storage`].
#[must_use]
pub fn retyped_child(src: &Capability, plan: &RetypePlan, index: u64, storage: ObjectRef) -> Capability {
    let src_base = src.region().map_or(PhysAddr::NULL, |(base, _)| base);
    let base = src_base.offset(index << plan.obj_bits);
    let bits = plan.obj_bits;
    let object = match plan.dest_type {
        ObjectType::PhysAddr => CapObject::PhysAddr { base, bits },
        ObjectType::Ram => CapObject::Ram { base, bits },
        ObjectType::DevFrame => CapObject::DevFrame { base, bits },
        ObjectType::Frame => CapObject::Frame { base, bits },
        ObjectType::CNode => CapObject::CNode {
            base,
            radix: plan.size_bits,
            guard: 0,
            guard_size: 0,
            storage,
        },
        ObjectType::Dispatcher => CapObject::Dispatcher { base, dcb: storage },
        ObjectType::EndPoint => CapObject::EndPoint {
            base: src_base,
            listener: src.dispatcher_ref().unwrap_or(ObjectRef::NULL),
            epoffset: 0,
            epbuflen: 0,
        },
        ty => match ty.vnode_kind() {
            Some(kind) => CapObject::VNode { kind, base, storage },
            None => CapObject::Null,
        },
    };
    Capability::new(object, src.rights)
}

/// A fresh identifier capability.
#[must_use]
pub const fn id_cap(token: IdToken) -> Capability {
    Capability::with_all_rights(CapObject::Id(token))
}

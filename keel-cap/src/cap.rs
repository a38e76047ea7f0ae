//! Capability values
//!
//! A [`Capability`] is a closed variant over every object type plus the
//! access rights of this reference. Two capabilities are copies of each
//! other when they name the same object, which is decided on
//! [`Capability::identity`] and never on rights or mint parameters.

use core::fmt;

use keel_common::{CoreId, PhysAddr};

use crate::error::{CapError, CapResult};
use crate::objects::{DISPATCHER_BITS, IdToken, ObjectType, SLOT_BITS, VNodeKind};
use crate::rights::CapRights;
use crate::slot::ObjectRef;

/// Type-specific contents of a capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CapObject {
    /// Empty slot.
    #[default]
    Null,
    /// Physical address range.
    PhysAddr {
        /// Region base.
        base: PhysAddr,
        /// log2 region size.
        bits: u8,
    },
    /// Untyped RAM.
    Ram {
        /// Region base.
        base: PhysAddr,
        /// log2 region size.
        bits: u8,
    },
    /// Device frame.
    DevFrame {
        /// Frame base.
        base: PhysAddr,
        /// log2 frame size.
        bits: u8,
    },
    /// RAM frame.
    Frame {
        /// Frame base.
        base: PhysAddr,
        /// log2 frame size.
        bits: u8,
    },
    /// Capability node.
    CNode {
        /// Physical base of the slot array.
        base: PhysAddr,
        /// log2 of the slot count.
        radix: u8,
        /// Guard value matched during resolution.
        guard: u32,
        /// Number of guard bits.
        guard_size: u8,
        /// Kernel storage handle.
        storage: ObjectRef,
    },
    /// Translation table node.
    VNode {
        /// Table kind.
        kind: VNodeKind,
        /// Physical base of the table.
        base: PhysAddr,
        /// Kernel storage handle.
        storage: ObjectRef,
    },
    /// Dispatcher control block.
    Dispatcher {
        /// Physical base of the DCB.
        base: PhysAddr,
        /// Kernel storage handle.
        dcb: ObjectRef,
    },
    /// Endpoint delivering into a dispatcher's buffer.
    EndPoint {
        /// Physical base of the listener's DCB.
        base: PhysAddr,
        /// Listening dispatcher.
        listener: ObjectRef,
        /// Buffer offset inside the listener's dispatcher frame.
        epoffset: u64,
        /// Buffer length in words, zero if not yet minted.
        epbuflen: u32,
    },
    /// Identifier token.
    Id(IdToken),
    /// Kernel authority.
    Kernel,
}

/// Address family an object's identity lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TypeRoot {
    /// Physical memory, including everything carved out of it.
    Memory = 0,
    /// Identifier tokens.
    Id = 1,
    /// The kernel token.
    Kernel = 2,
}

/// Object identity: where the object sits in its address family, how much
/// of it it covers and its rank among types sharing the region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Address family.
    pub root: TypeRoot,
    /// First address of the region.
    pub base: u64,
    /// Region size in address units, at least one.
    pub size: u64,
    /// Type rank, see [`ObjectType::mdb_rank`].
    pub rank: u8,
}

impl Identity {
    /// One past the last address of the region.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }
}

/// A typed, rights-carrying reference to a kernel object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capability {
    /// What the capability names.
    pub object: CapObject,
    /// What the holder may do with it.
    pub rights: CapRights,
}

impl Capability {
    /// The empty capability.
    pub const NULL: Self = Self {
        object: CapObject::Null,
        rights: CapRights::NONE,
    };

    /// Create a capability with the given rights.
    #[inline]
    #[must_use]
    pub const fn new(object: CapObject, rights: CapRights) -> Self {
        Self { object, rights }
    }

    /// Create a capability with all rights.
    #[inline]
    #[must_use]
    pub const fn with_all_rights(object: CapObject) -> Self {
        Self::new(object, CapRights::ALL)
    }

    /// Check if this is the empty capability.
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self.object, CapObject::Null)
    }

    /// Object type tag.
    #[must_use]
    pub const fn object_type(&self) -> ObjectType {
        match self.object {
            CapObject::Null => ObjectType::Null,
            CapObject::PhysAddr { .. } => ObjectType::PhysAddr,
            CapObject::Ram { .. } => ObjectType::Ram,
            CapObject::DevFrame { .. } => ObjectType::DevFrame,
            CapObject::Frame { .. } => ObjectType::Frame,
            CapObject::CNode { .. } => ObjectType::CNode,
            CapObject::VNode { kind, .. } => kind.object_type(),
            CapObject::Dispatcher { .. } => ObjectType::Dispatcher,
            CapObject::EndPoint { .. } => ObjectType::EndPoint,
            CapObject::Id(_) => ObjectType::Id,
            CapObject::Kernel => ObjectType::Kernel,
        }
    }

    /// Physical base and log2 size of the memory the object occupies, for
    /// types backed by memory.
    #[must_use]
    pub const fn region(&self) -> Option<(PhysAddr, u8)> {
        match self.object {
            CapObject::PhysAddr { base, bits }
            | CapObject::Ram { base, bits }
            | CapObject::DevFrame { base, bits }
            | CapObject::Frame { base, bits } => Some((base, bits)),
            CapObject::CNode { base, radix, .. } => Some((base, radix + SLOT_BITS)),
            CapObject::VNode { kind, base, .. } => Some((base, kind.object_bits())),
            CapObject::Dispatcher { base, .. } | CapObject::EndPoint { base, .. } => {
                Some((base, DISPATCHER_BITS))
            }
            CapObject::Null | CapObject::Id(_) | CapObject::Kernel => None,
        }
    }

    /// Identity used to order the capability in the mapping database.
    /// `None` for the empty capability.
    #[must_use]
    pub const fn identity(&self) -> Option<Identity> {
        let rank = self.object_type().mdb_rank();
        match self.object {
            CapObject::Null => None,
            CapObject::Id(token) => Some(Identity {
                root: TypeRoot::Id,
                base: token.identify(),
                size: 1,
                rank,
            }),
            CapObject::Kernel => Some(Identity {
                root: TypeRoot::Kernel,
                base: 0,
                size: 1,
                rank,
            }),
            _ => match self.region() {
                Some((base, bits)) => Some(Identity {
                    root: TypeRoot::Memory,
                    base: base.as_u64(),
                    size: 1u64 << bits,
                    rank,
                }),
                None => None,
            },
        }
    }

    /// CNode storage handle, if this is a CNode capability.
    #[inline]
    #[must_use]
    pub const fn cnode_storage(&self) -> Option<ObjectRef> {
        match self.object {
            CapObject::CNode { storage, .. } => Some(storage),
            _ => None,
        }
    }

    /// The dispatcher a capability refers to: the DCB for a dispatcher
    /// capability, the listener for an endpoint.
    #[inline]
    #[must_use]
    pub const fn dispatcher_ref(&self) -> Option<ObjectRef> {
        match self.object {
            CapObject::Dispatcher { dcb, .. } => Some(dcb),
            CapObject::EndPoint { listener, .. } => Some(listener),
            _ => None,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability({self})")
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.object {
            CapObject::Null => write!(f, "Null"),
            CapObject::CNode { base, radix, guard, guard_size, .. } => write!(
                f,
                "CNode({base}, radix {radix}, guard {guard:#x}/{guard_size}) {}",
                self.rights
            ),
            CapObject::Id(token) => write!(f, "ID({}, {}) {}", token.core, token.local_id, self.rights),
            CapObject::Kernel => write!(f, "Kernel"),
            _ => match self.region() {
                Some((base, bits)) => write!(
                    f,
                    "{}({base}, 2^{bits}) {}",
                    self.object_type(),
                    self.rights
                ),
                None => write!(f, "{}", self.object_type()),
            },
        }
    }
}

/// Fixed-size wire image of a capability, handed to the monitor when it
/// moves capabilities between cores.
///
/// ```text
/// word 0: type | rights << 8 | size << 16 | guard size << 24 | ep buffer length << 32
/// word 1: base
/// word 2: guard, endpoint offset or identifier
/// word 3: kernel storage handle
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(C)]
pub struct CapRepr(pub [u64; 4]);

impl CapRepr {
    /// Size in bytes.
    pub const SIZE: usize = 32;

    /// Encode a capability.
    #[must_use]
    pub fn encode(cap: &Capability) -> Self {
        let mut words = [0u64; 4];
        words[0] = cap.object_type() as u64 | (cap.rights.bits() as u64) << 8;
        match cap.object {
            CapObject::Null | CapObject::Kernel => {}
            CapObject::PhysAddr { base, bits }
            | CapObject::Ram { base, bits }
            | CapObject::DevFrame { base, bits }
            | CapObject::Frame { base, bits } => {
                words[0] |= (bits as u64) << 16;
                words[1] = base.as_u64();
            }
            CapObject::CNode { base, radix, guard, guard_size, storage } => {
                words[0] |= (radix as u64) << 16 | (guard_size as u64) << 24;
                words[1] = base.as_u64();
                words[2] = guard as u64;
                words[3] = storage.index() as u64;
            }
            CapObject::VNode { base, storage, .. } => {
                words[1] = base.as_u64();
                words[3] = storage.index() as u64;
            }
            CapObject::Dispatcher { base, dcb } => {
                words[1] = base.as_u64();
                words[3] = dcb.index() as u64;
            }
            CapObject::EndPoint { base, listener, epoffset, epbuflen } => {
                words[0] |= (epbuflen as u64) << 32;
                words[1] = base.as_u64();
                words[2] = epoffset;
                words[3] = listener.index() as u64;
            }
            CapObject::Id(token) => words[2] = token.identify(),
        }
        Self(words)
    }

    /// Decode a capability that can be re-created on another core: memory
    /// ranges and identifier tokens. Types backed by kernel storage on the
    /// issuing core cannot be transferred this way.
    ///
    /// # Errors
    ///
    /// - [`CapError::IllegalDestType`]: unknown or Null type tag
    /// - [`CapError::TypeNotCreatable`]: type cannot cross cores
    /// - [`CapError::InvalidSize`]: size out of range or base misaligned
    pub fn decode_transferable(&self) -> CapResult<Capability> {
        let words = self.0;
        let ty = ObjectType::from_raw(words[0] & 0xFF).ok_or(CapError::IllegalDestType)?;
        let rights = CapRights::from_bits((words[0] >> 8) as u8);
        let bits = (words[0] >> 16) as u8;
        let base = PhysAddr::new(words[1]);
        let object = match ty {
            ObjectType::Null => return Err(CapError::IllegalDestType),
            ObjectType::PhysAddr | ObjectType::Ram | ObjectType::DevFrame | ObjectType::Frame => {
                crate::objects::object_bits(ty, bits)?;
                if !base.is_aligned(bits) {
                    return Err(CapError::InvalidSize);
                }
                match ty {
                    ObjectType::PhysAddr => CapObject::PhysAddr { base, bits },
                    ObjectType::Ram => CapObject::Ram { base, bits },
                    ObjectType::DevFrame => CapObject::DevFrame { base, bits },
                    _ => CapObject::Frame { base, bits },
                }
            }
            ObjectType::Id => CapObject::Id(IdToken {
                core: CoreId((words[2] >> 32) as u8),
                local_id: words[2] as u32,
            }),
            _ => return Err(CapError::TypeNotCreatable),
        };
        Ok(Capability::new(object, rights))
    }

    /// Little-endian byte image.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        for (chunk, word) in out.chunks_exact_mut(8).zip(self.0) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Parse a little-endian byte image.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut words = [0u64; 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *word = u64::from_le_bytes(raw);
        }
        Self(words)
    }
}

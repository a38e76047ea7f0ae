//! Kernel object types
//!
//! The closed set of object types a capability can name, their sizes, and
//! the retype relation between them.
//!
//! | Category | Types |
//! |----------|-------|
//! | Memory | `PhysAddr`, `Ram`, `DevFrame`, `Frame` |
//! | Translation | `VNode*` (see [`VNodeKind`]) |
//! | Capability storage | `CNode` |
//! | Execution | `Dispatcher`, `EndPoint` |
//! | Tokens | `Id`, `Kernel` |
//!
//! # Retype relation
//!
//! ```text
//! PhysAddr ──► PhysAddr (smaller), Ram, DevFrame
//! Ram      ──► Ram (smaller), Frame, CNode, VNode*, Dispatcher
//! Frame    ──► Frame (smaller)
//! DevFrame ──► DevFrame (smaller)
//! Dispatcher ► EndPoint
//! ```

use core::fmt;

use keel_common::addr::BASE_PAGE_BITS;

use crate::cnode::{MAX_CNODE_RADIX, MIN_CNODE_RADIX};
use crate::error::{CapError, CapResult};

pub mod dispatcher;
pub mod id;
pub mod vnode;

pub use dispatcher::{SchedParams, TaskType};
pub use id::IdToken;
pub use vnode::{Arch, VNodeKind};

/// log2 of the size of one capability table entry.
pub const SLOT_BITS: u8 = 6;

/// log2 of the size of a dispatcher control block.
pub const DISPATCHER_BITS: u8 = 10;

/// Largest object size exponent accepted anywhere.
pub const MAX_OBJ_BITS: u8 = 48;

/// Smallest Ram/PhysAddr region: one slot.
pub const MIN_MEMORY_BITS: u8 = SLOT_BITS;

/// Object type discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(u8)]
pub enum ObjectType {
    /// Empty slot.
    #[default]
    Null = 0,
    /// Physical address range, may contain devices.
    PhysAddr = 1,
    /// Untyped RAM.
    Ram = 2,
    /// Device memory frame.
    DevFrame = 3,
    /// Mappable RAM frame.
    Frame = 4,
    /// Capability node.
    CNode = 5,
    /// x86-64 PML4.
    VNodeX86_64Pml4 = 6,
    /// x86-64 PDPT.
    VNodeX86_64Pdpt = 7,
    /// x86-64 page directory.
    VNodeX86_64Pdir = 8,
    /// x86-64 page table.
    VNodeX86_64Ptable = 9,
    /// x86-32 PAE PDPT.
    VNodeX86_32Pdpt = 10,
    /// x86-32 page directory.
    VNodeX86_32Pdir = 11,
    /// x86-32 page table.
    VNodeX86_32Ptable = 12,
    /// ARM L1 table.
    VNodeArmL1 = 13,
    /// ARM L2 table.
    VNodeArmL2 = 14,
    /// Dispatcher control block.
    Dispatcher = 15,
    /// Message endpoint into a dispatcher.
    EndPoint = 16,
    /// Unforgeable identifier token.
    Id = 17,
    /// Kernel authority token held by the monitor.
    Kernel = 18,
}

impl ObjectType {
    /// Number of type tags, including Null.
    pub const COUNT: u8 = 19;

    /// Decode a raw type number, `None` if unknown.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            0 => Self::Null,
            1 => Self::PhysAddr,
            2 => Self::Ram,
            3 => Self::DevFrame,
            4 => Self::Frame,
            5 => Self::CNode,
            6 => Self::VNodeX86_64Pml4,
            7 => Self::VNodeX86_64Pdpt,
            8 => Self::VNodeX86_64Pdir,
            9 => Self::VNodeX86_64Ptable,
            10 => Self::VNodeX86_32Pdpt,
            11 => Self::VNodeX86_32Pdir,
            12 => Self::VNodeX86_32Ptable,
            13 => Self::VNodeArmL1,
            14 => Self::VNodeArmL2,
            15 => Self::Dispatcher,
            16 => Self::EndPoint,
            17 => Self::Id,
            18 => Self::Kernel,
            _ => return None,
        })
    }

    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::PhysAddr => "PhysAddr",
            Self::Ram => "RAM",
            Self::DevFrame => "DevFrame",
            Self::Frame => "Frame",
            Self::CNode => "CNode",
            Self::VNodeX86_64Pml4 => "VNode_x86_64_pml4",
            Self::VNodeX86_64Pdpt => "VNode_x86_64_pdpt",
            Self::VNodeX86_64Pdir => "VNode_x86_64_pdir",
            Self::VNodeX86_64Ptable => "VNode_x86_64_ptable",
            Self::VNodeX86_32Pdpt => "VNode_x86_32_pdpt",
            Self::VNodeX86_32Pdir => "VNode_x86_32_pdir",
            Self::VNodeX86_32Ptable => "VNode_x86_32_ptable",
            Self::VNodeArmL1 => "VNode_ARM_l1",
            Self::VNodeArmL2 => "VNode_ARM_l2",
            Self::Dispatcher => "Dispatcher",
            Self::EndPoint => "EndPoint",
            Self::Id => "ID",
            Self::Kernel => "Kernel",
        }
    }

    /// The VNode kind for VNode types.
    #[must_use]
    pub const fn vnode_kind(self) -> Option<VNodeKind> {
        Some(match self {
            Self::VNodeX86_64Pml4 => VNodeKind::X86_64Pml4,
            Self::VNodeX86_64Pdpt => VNodeKind::X86_64Pdpt,
            Self::VNodeX86_64Pdir => VNodeKind::X86_64Pdir,
            Self::VNodeX86_64Ptable => VNodeKind::X86_64Ptable,
            Self::VNodeX86_32Pdpt => VNodeKind::X86_32Pdpt,
            Self::VNodeX86_32Pdir => VNodeKind::X86_32Pdir,
            Self::VNodeX86_32Ptable => VNodeKind::X86_32Ptable,
            Self::VNodeArmL1 => VNodeKind::ArmL1,
            Self::VNodeArmL2 => VNodeKind::ArmL2,
            _ => return None,
        })
    }

    /// Check if this is a VNode type.
    #[inline]
    #[must_use]
    pub const fn is_vnode(self) -> bool {
        self.vnode_kind().is_some()
    }

    /// Check if this names plain memory (no kernel storage behind it).
    #[inline]
    #[must_use]
    pub const fn is_memory(self) -> bool {
        matches!(self, Self::PhysAddr | Self::Ram | Self::DevFrame | Self::Frame)
    }

    /// Check if the object's region was carved out of RAM and returns to
    /// RAM when its last capability goes away.
    #[inline]
    #[must_use]
    pub const fn is_ram_backed(self) -> bool {
        matches!(self, Self::Ram | Self::Frame | Self::CNode | Self::Dispatcher) || self.is_vnode()
    }

    /// Check if the type may be created without a parent at runtime.
    #[inline]
    #[must_use]
    pub const fn is_creatable(self) -> bool {
        matches!(self, Self::Id)
    }

    /// Position among types sharing a region in the mapping database.
    /// Parents always rank below the types they can be retyped into.
    #[must_use]
    pub const fn mdb_rank(self) -> u8 {
        match self {
            Self::Null => 0,
            Self::PhysAddr => 1,
            Self::Ram => 2,
            Self::DevFrame => 3,
            Self::Frame => 4,
            Self::CNode => 5,
            Self::Dispatcher => 7,
            Self::EndPoint => 8,
            Self::Id => 9,
            Self::Kernel => 10,
            _ => 6,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Whether `src` may be retyped into `dst` at all.
#[must_use]
pub const fn is_well_founded(src: ObjectType, dst: ObjectType) -> bool {
    match src {
        ObjectType::PhysAddr => {
            matches!(dst, ObjectType::PhysAddr | ObjectType::Ram | ObjectType::DevFrame)
        }
        ObjectType::Ram => {
            matches!(
                dst,
                ObjectType::Ram | ObjectType::Frame | ObjectType::CNode | ObjectType::Dispatcher
            ) || dst.is_vnode()
        }
        ObjectType::Frame => matches!(dst, ObjectType::Frame),
        ObjectType::DevFrame => matches!(dst, ObjectType::DevFrame),
        ObjectType::Dispatcher => matches!(dst, ObjectType::EndPoint),
        _ => false,
    }
}

/// log2 of the size of one object of type `ty` given the caller's size
/// argument.
///
/// For memory types `size_bits` is the object size; for CNodes it is the
/// slot radix; fixed-size types ignore it.
///
/// # Errors
///
/// - [`CapError::InvalidSize`]: size argument out of range for the type
/// - [`CapError::InvalidRetype`]: type has no memory-derived size
pub const fn object_bits(ty: ObjectType, size_bits: u8) -> CapResult<u8> {
    match ty {
        ObjectType::PhysAddr | ObjectType::Ram => {
            if size_bits < MIN_MEMORY_BITS || size_bits > MAX_OBJ_BITS {
                return Err(CapError::InvalidSize);
            }
            Ok(size_bits)
        }
        ObjectType::Frame | ObjectType::DevFrame => {
            if size_bits < BASE_PAGE_BITS || size_bits > MAX_OBJ_BITS {
                return Err(CapError::InvalidSize);
            }
            Ok(size_bits)
        }
        ObjectType::CNode => {
            if size_bits < MIN_CNODE_RADIX || size_bits > MAX_CNODE_RADIX {
                return Err(CapError::InvalidSize);
            }
            Ok(size_bits + SLOT_BITS)
        }
        ObjectType::Dispatcher => Ok(DISPATCHER_BITS),
        _ => match ty.vnode_kind() {
            Some(kind) => Ok(kind.object_bits()),
            None => Err(CapError::InvalidRetype),
        },
    }
}

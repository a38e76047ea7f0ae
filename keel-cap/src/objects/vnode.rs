//! VNode (translation table) kinds
//!
//! A VNode is one node of a hardware page-table tree. Each kind knows its
//! entry count, its object size and which capability types may be installed
//! into its entries by a copy. Only some kinds can serve as the root of an
//! address space, and which ones depends on the architecture the kernel was
//! configured for.

use core::fmt;

use super::ObjectType;

/// Architecture the kernel instance manages address spaces for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arch {
    /// 4-level x86-64 paging.
    X86_64,
    /// 32-bit x86 paging, optionally with PAE.
    X86_32 {
        /// Physical address extension (3-level tables).
        pae: bool,
    },
    /// ARMv7 short-descriptor tables.
    Arm,
}

/// Page-table node kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum VNodeKind {
    /// x86-64 level 4 table.
    X86_64Pml4 = 0,
    /// x86-64 page directory pointer table.
    X86_64Pdpt = 1,
    /// x86-64 page directory.
    X86_64Pdir = 2,
    /// x86-64 page table.
    X86_64Ptable = 3,
    /// x86-32 PAE page directory pointer table.
    X86_32Pdpt = 4,
    /// x86-32 page directory.
    X86_32Pdir = 5,
    /// x86-32 page table.
    X86_32Ptable = 6,
    /// ARM first-level table.
    ArmL1 = 7,
    /// ARM second-level table.
    ArmL2 = 8,
}

impl VNodeKind {
    /// Object type tag for this kind.
    #[must_use]
    pub const fn object_type(self) -> ObjectType {
        match self {
            Self::X86_64Pml4 => ObjectType::VNodeX86_64Pml4,
            Self::X86_64Pdpt => ObjectType::VNodeX86_64Pdpt,
            Self::X86_64Pdir => ObjectType::VNodeX86_64Pdir,
            Self::X86_64Ptable => ObjectType::VNodeX86_64Ptable,
            Self::X86_32Pdpt => ObjectType::VNodeX86_32Pdpt,
            Self::X86_32Pdir => ObjectType::VNodeX86_32Pdir,
            Self::X86_32Ptable => ObjectType::VNodeX86_32Ptable,
            Self::ArmL1 => ObjectType::VNodeArmL1,
            Self::ArmL2 => ObjectType::VNodeArmL2,
        }
    }

    /// log2 of the table size in bytes.
    #[must_use]
    pub const fn object_bits(self) -> u8 {
        match self {
            Self::ArmL1 => 14,
            Self::ArmL2 => 10,
            _ => 12,
        }
    }

    /// Number of entries.
    ///
    /// PAE directories and tables hold 512 eight-byte entries; the classic
    /// 32-bit layout holds 1024 four-byte entries. Both fit one page, so
    /// the PAE flag only matters once the kind is bound to an [`Arch`].
    #[must_use]
    pub const fn entries(self, arch: Arch) -> u32 {
        match self {
            Self::X86_64Pml4 | Self::X86_64Pdpt | Self::X86_64Pdir | Self::X86_64Ptable => 512,
            Self::X86_32Pdpt => 4,
            Self::X86_32Pdir | Self::X86_32Ptable => match arch {
                Arch::X86_32 { pae: true } => 512,
                _ => 1024,
            },
            Self::ArmL1 => 4096,
            Self::ArmL2 => 256,
        }
    }

    /// Whether a capability of type `ty` may be installed in an entry.
    #[must_use]
    pub const fn can_map(self, ty: ObjectType) -> bool {
        match self {
            Self::X86_64Pml4 => matches!(ty, ObjectType::VNodeX86_64Pdpt),
            Self::X86_64Pdpt => matches!(ty, ObjectType::VNodeX86_64Pdir),
            Self::X86_64Pdir => matches!(ty, ObjectType::VNodeX86_64Ptable),
            Self::X86_32Pdpt => matches!(ty, ObjectType::VNodeX86_32Pdir),
            Self::X86_32Pdir => matches!(ty, ObjectType::VNodeX86_32Ptable),
            Self::ArmL1 => matches!(ty, ObjectType::VNodeArmL2),
            Self::X86_64Ptable | Self::X86_32Ptable | Self::ArmL2 => {
                matches!(ty, ObjectType::Frame | ObjectType::DevFrame)
            }
        }
    }

    /// Whether this kind can be installed as a dispatcher's VSpace root on
    /// `arch`.
    #[must_use]
    pub const fn is_root_for(self, arch: Arch) -> bool {
        matches!(
            (self, arch),
            (Self::X86_64Pml4, Arch::X86_64)
                | (Self::X86_32Pdpt, Arch::X86_32 { pae: true })
                | (Self::X86_32Pdir, Arch::X86_32 { pae: false })
                | (Self::ArmL1, Arch::Arm)
        )
    }
}

impl fmt::Display for VNodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.object_type().name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roots_per_arch() {
        assert!(VNodeKind::X86_64Pml4.is_root_for(Arch::X86_64));
        assert!(!VNodeKind::X86_64Pdpt.is_root_for(Arch::X86_64));
        assert!(VNodeKind::X86_32Pdpt.is_root_for(Arch::X86_32 { pae: true }));
        assert!(!VNodeKind::X86_32Pdpt.is_root_for(Arch::X86_32 { pae: false }));
        assert!(VNodeKind::ArmL1.is_root_for(Arch::Arm));
        assert!(!VNodeKind::ArmL1.is_root_for(Arch::X86_64));
    }

    #[test]
    fn test_mappable() {
        assert!(VNodeKind::X86_64Ptable.can_map(ObjectType::Frame));
        assert!(VNodeKind::X86_64Ptable.can_map(ObjectType::DevFrame));
        assert!(!VNodeKind::X86_64Ptable.can_map(ObjectType::Ram));
        assert!(VNodeKind::X86_64Pml4.can_map(ObjectType::VNodeX86_64Pdpt));
        assert!(!VNodeKind::X86_64Pml4.can_map(ObjectType::Frame));
    }

    #[test]
    fn test_entries() {
        assert_eq!(VNodeKind::ArmL2.entries(Arch::Arm), 256);
        assert_eq!(VNodeKind::X86_32Pdir.entries(Arch::X86_32 { pae: false }), 1024);
        assert_eq!(VNodeKind::X86_32Pdir.entries(Arch::X86_32 { pae: true }), 512);
    }
}

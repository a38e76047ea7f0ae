//! Capability table entries
//!
//! A [`Cte`] is one slot: a [`Capability`] plus the distributed-capability
//! metadata ([`MdbMeta`]) the kernel and monitor use to coordinate the
//! object across cores. Slots live inside CNodes and inside dispatcher
//! control blocks; a [`SlotRef`] names one by container and index.

use core::fmt;

use keel_common::CoreId;

use crate::cap::Capability;

/// Object reference - kernel-internal index into the object table.
///
/// An `ObjectRef` of zero (`ObjectRef::NULL`) names no object.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjectRef(u32);

impl ObjectRef {
    /// Null reference (no object).
    pub const NULL: Self = Self(0);

    /// Create an object reference from a raw index.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw index value.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Check if this is a null reference.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "ObjectRef::NULL")
        } else {
            write!(f, "ObjectRef({})", self.0)
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Location of one slot: the container object (CNode or DCB) and the
/// index inside it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotRef {
    /// Containing object.
    pub container: ObjectRef,
    /// Index within the container.
    pub index: u32,
}

impl SlotRef {
    /// Create a slot reference.
    #[inline]
    #[must_use]
    pub const fn new(container: ObjectRef, index: u32) -> Self {
        Self { container, index }
    }
}

impl fmt::Debug for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.container, self.index)
    }
}

/// Relations an object has with capabilities held on other cores.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct RemoteRelations(u8);

impl RemoteRelations {
    /// No remote relations.
    pub const NONE: Self = Self(0);
    /// Copies exist on other cores.
    pub const COPIES: Self = Self(1 << 0);
    /// Ancestors exist on other cores.
    pub const ANCESTORS: Self = Self(1 << 1);
    /// Descendants exist on other cores.
    pub const DESCENDANTS: Self = Self(1 << 2);
    /// All relation bits.
    pub const ALL: Self = Self(0x7);

    /// From raw bits, masking unknown bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Check if all of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check if no relation is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Replace the bits selected by `mask` with those in `value`.
    #[inline]
    #[must_use]
    pub const fn update(self, value: Self, mask: Self) -> Self {
        Self((self.0 & !mask.0) | (value.0 & mask.0))
    }
}

impl fmt::Debug for RemoteRelations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Remote({}{}{})",
            if self.contains(Self::COPIES) { 'c' } else { '-' },
            if self.contains(Self::ANCESTORS) { 'a' } else { '-' },
            if self.contains(Self::DESCENDANTS) { 'd' } else { '-' },
        )
    }
}

/// Per-slot distributed-capability metadata.
///
/// `owner`, `locked` and `remote` describe the object and are kept equal
/// across its copy class; `in_delete` is per slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
pub struct MdbMeta {
    /// Core authoritative for the object's lifetime.
    pub owner: CoreId,
    /// Held by the monitor for a multi-step protocol.
    pub locked: bool,
    /// Marked for deletion by a pending revoke or CNode teardown.
    pub in_delete: bool,
    /// Relations with other cores.
    pub remote: RemoteRelations,
}

impl MdbMeta {
    /// Metadata for a fresh capability owned by `owner`.
    #[inline]
    #[must_use]
    pub const fn owned_by(owner: CoreId) -> Self {
        Self {
            owner,
            locked: false,
            in_delete: false,
            remote: RemoteRelations::NONE,
        }
    }
}

/// Distributed-capability state reported by `get_state`.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Hash)]
#[repr(transparent)]
pub struct DistcapState(u8);

impl DistcapState {
    /// Locally owned, unlocked, not being deleted.
    pub const READY: Self = Self(0);
    /// Owned by another core.
    pub const FOREIGN: Self = Self(1 << 0);
    /// Locked by the monitor.
    pub const BUSY: Self = Self(1 << 1);
    /// Marked for deletion.
    pub const DELETED: Self = Self(1 << 2);

    /// State of a slot as seen from core `local`.
    #[must_use]
    pub const fn of(meta: &MdbMeta, local: CoreId) -> Self {
        let mut bits = 0;
        if meta.owner.0 != local.0 {
            bits |= Self::FOREIGN.0;
        }
        if meta.locked {
            bits |= Self::BUSY.0;
        }
        if meta.in_delete {
            bits |= Self::DELETED.0;
        }
        Self(bits)
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Check if all of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Capability table entry.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Cte {
    /// The capability held.
    pub cap: Capability,
    /// Distributed-capability metadata, meaningless while empty.
    pub mdb: MdbMeta,
}

impl Cte {
    /// The empty entry.
    pub const EMPTY: Self = Self {
        cap: Capability::NULL,
        mdb: MdbMeta::owned_by(CoreId(0)),
    };

    /// Create an entry.
    #[inline]
    #[must_use]
    pub const fn new(cap: Capability, mdb: MdbMeta) -> Self {
        Self { cap, mdb }
    }

    /// Check if the slot is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.cap.is_null()
    }

    /// Empty the slot.
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::EMPTY;
    }
}

impl fmt::Debug for Cte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "Cte(empty)");
        }
        write!(f, "Cte({}, owner {}", self.cap, self.mdb.owner)?;
        if self.mdb.locked {
            write!(f, ", locked")?;
        }
        if self.mdb.in_delete {
            write!(f, ", in_delete")?;
        }
        if !self.mdb.remote.is_empty() {
            write!(f, ", {:?}", self.mdb.remote)?;
        }
        write!(f, ")")
    }
}

//! DCB registry
//!
//! An add-only index of every dispatcher that completed setup, used to
//! enumerate dispatchers for diagnostics. Entries are weak: each records
//! the object table generation it was taken at, so an entry whose DCB
//! storage was freed and reused is skipped rather than followed.

use alloc::vec::Vec;

use keel_cap::ObjectRef;

/// Weak handle to a DCB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeakDcb {
    /// Object table entry.
    pub dcb: ObjectRef,
    /// Generation of the entry when registered.
    pub generation: u16,
}

/// Registered DCBs, oldest first.
#[derive(Debug, Default)]
pub struct DcbRegistry {
    entries: Vec<WeakDcb>,
}

impl DcbRegistry {
    /// Empty registry.
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Record `handle`. Registering the same handle twice is a no-op.
    pub fn register(&mut self, handle: WeakDcb) -> bool {
        if self.entries.contains(&handle) {
            return false;
        }
        self.entries.push(handle);
        true
    }

    /// Number of entries, live or stale.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was ever registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = WeakDcb> + '_ {
        self.entries.iter().copied()
    }
}

//! Monitor root CNode layout
//!
//! Well-known slot indices in the root CNode the kernel builds for the
//! first monitor at boot. Kernel bootstrap and the monitor must agree on
//! these values.
//!
//! The root CNode is installed with a guard covering every address bit not
//! used by its radix, so a slot index doubles as a full-width address.

/// Well-known slot indices in the monitor's root CNode.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// Root CNode (self-reference).
    RootCNode = 0,
    /// The monitor's own dispatcher.
    Dispatcher = 1,
    /// Kernel authority token.
    Kernel = 2,
    /// Endpoint to the monitor, retyped from its dispatcher.
    MonitorEp = 3,
    /// First boot memory capability (PhysAddr and Ram regions, in the
    /// order boot reported them).
    FirstMemory = 8,
}

impl Slot {
    /// Slot index as an address value.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self as u32
    }

    /// Slot of the `idx`-th boot memory region.
    #[inline]
    #[must_use]
    pub const fn memory(idx: u32) -> u32 {
        Self::FirstMemory as u32 + idx
    }
}

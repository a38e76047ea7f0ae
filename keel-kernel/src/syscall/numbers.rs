//! Syscall numbers
//!
//! The trap layer passes the syscall number and up to eight argument
//! words; results come back as a [`SysRet`](super::SysRet).
//!
//! Numbers are grouped by subsystem in blocks of 16.

/// Syscall numbers.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syscall {
    // === Dispatcher and debug ===
    /// Give up the processor, optionally to a target dispatcher.
    Yield = 0,
    /// Write a user buffer to the kernel console.
    Print = 1,
    /// Read the 64-bit value of an identifier capability.
    IdcapIdentify = 2,

    // === Capability management ===
    /// Retype a memory capability into new objects.
    Retype = 16,
    /// Create a runtime-creatable capability.
    Create = 17,
    /// Copy a capability.
    Copy = 18,
    /// Copy a capability, adjusting type-specific fields.
    Mint = 19,
    /// Delete one capability.
    Delete = 20,
    /// Delete a capability, its copies and its descendants.
    Revoke = 21,
    /// Read the distributed-capability state.
    GetState = 22,

    // === Dispatcher configuration ===
    /// Install CSpace, VSpace and frame of a dispatcher.
    DispatcherSetup = 32,
    /// Set scheduling parameters.
    DispatcherProperties = 33,

    // === Ownership and locking ===
    /// Read the owning core of an object.
    GetCapOwner = 48,
    /// Change the owning core of an object (monitor only).
    SetCapOwner = 49,
    /// Lock a copy class (monitor only).
    LockCap = 50,
    /// Unlock a copy class (monitor only).
    UnlockCap = 51,

    // === Monitor ===
    /// Register the monitor endpoint.
    MonitorRegister = 64,
    /// Copy a capability's representation to user memory.
    MonitorIdentifyCap = 65,
    /// Empty a slot without deletion side effects.
    MonitorNullifyCap = 66,
    /// Set the domain id of a dispatcher.
    MonitorDomainId = 67,
    /// Run the last-delete path for a capability.
    MonitorDeleteLast = 68,
    /// Mark a revoke target and run one delete step.
    MonitorRevokeStep = 69,
    /// Run one clear step.
    MonitorClearStep = 70,
    /// Install a capability received from another core.
    MonitorCreateCap = 71,
    /// Read or update remote relations of a copy class.
    MonitorRemoteRelations = 72,
    /// Collect one reclaimed memory region.
    MonitorGetReclaimed = 73,
    /// Retype on behalf of an in-progress revoke.
    MonitorRetype = 74,
}

impl Syscall {
    /// Convert a raw syscall number to a Syscall.
    pub const fn from_number(num: u64) -> Option<Self> {
        match num {
            0 => Some(Self::Yield),
            1 => Some(Self::Print),
            2 => Some(Self::IdcapIdentify),
            16 => Some(Self::Retype),
            17 => Some(Self::Create),
            18 => Some(Self::Copy),
            19 => Some(Self::Mint),
            20 => Some(Self::Delete),
            21 => Some(Self::Revoke),
            22 => Some(Self::GetState),
            32 => Some(Self::DispatcherSetup),
            33 => Some(Self::DispatcherProperties),
            48 => Some(Self::GetCapOwner),
            49 => Some(Self::SetCapOwner),
            50 => Some(Self::LockCap),
            51 => Some(Self::UnlockCap),
            64 => Some(Self::MonitorRegister),
            65 => Some(Self::MonitorIdentifyCap),
            66 => Some(Self::MonitorNullifyCap),
            67 => Some(Self::MonitorDomainId),
            68 => Some(Self::MonitorDeleteLast),
            69 => Some(Self::MonitorRevokeStep),
            70 => Some(Self::MonitorClearStep),
            71 => Some(Self::MonitorCreateCap),
            72 => Some(Self::MonitorRemoteRelations),
            73 => Some(Self::MonitorGetReclaimed),
            74 => Some(Self::MonitorRetype),
            _ => None,
        }
    }

    /// Check if this syscall requires monitor privilege.
    pub const fn is_privileged(self) -> bool {
        matches!(
            self,
            Self::SetCapOwner
                | Self::LockCap
                | Self::UnlockCap
                | Self::MonitorRegister
                | Self::MonitorIdentifyCap
                | Self::MonitorNullifyCap
                | Self::MonitorDomainId
                | Self::MonitorDeleteLast
                | Self::MonitorRevokeStep
                | Self::MonitorClearStep
                | Self::MonitorCreateCap
                | Self::MonitorRemoteRelations
                | Self::MonitorGetReclaimed
                | Self::MonitorRetype
        )
    }

    /// Get the syscall name for debugging.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Yield => "Yield",
            Self::Print => "Print",
            Self::IdcapIdentify => "IdcapIdentify",
            Self::Retype => "Retype",
            Self::Create => "Create",
            Self::Copy => "Copy",
            Self::Mint => "Mint",
            Self::Delete => "Delete",
            Self::Revoke => "Revoke",
            Self::GetState => "GetState",
            Self::DispatcherSetup => "DispatcherSetup",
            Self::DispatcherProperties => "DispatcherProperties",
            Self::GetCapOwner => "GetCapOwner",
            Self::SetCapOwner => "SetCapOwner",
            Self::LockCap => "LockCap",
            Self::UnlockCap => "UnlockCap",
            Self::MonitorRegister => "MonitorRegister",
            Self::MonitorIdentifyCap => "MonitorIdentifyCap",
            Self::MonitorNullifyCap => "MonitorNullifyCap",
            Self::MonitorDomainId => "MonitorDomainId",
            Self::MonitorDeleteLast => "MonitorDeleteLast",
            Self::MonitorRevokeStep => "MonitorRevokeStep",
            Self::MonitorClearStep => "MonitorClearStep",
            Self::MonitorCreateCap => "MonitorCreateCap",
            Self::MonitorRemoteRelations => "MonitorRemoteRelations",
            Self::MonitorGetReclaimed => "MonitorGetReclaimed",
            Self::MonitorRetype => "MonitorRetype",
        }
    }
}

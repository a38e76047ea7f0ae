//! Capability error types
//!
//! Every failure a capability operation can report, grouped into the
//! [`ErrorKind`] classes user code switches on. Errors are values; nothing
//! in this crate panics on caller-supplied input.

use core::fmt;

/// Coarse classification of a [`CapError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Address resolution failed.
    Lookup,
    /// Wrong, unsupported or non-creatable object type.
    Type,
    /// Destination slot occupied or out of range, or a table is full.
    Capacity,
    /// Object is in a state that forbids the operation.
    State,
    /// Retype source still has live descendants.
    Derivation,
    /// Malformed numeric argument.
    Argument,
    /// The monitor must take over (cross-core protocol required).
    Protocol,
}

/// Errors that can occur during capability operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[must_use = "capability errors must be handled"]
pub enum CapError {
    // -- Lookup
    /// The addressed slot is empty.
    EmptySlot,
    /// The address has more valid bits than the CSpace can consume, or
    /// stops part-way through a CNode.
    DepthExceeded,
    /// Guard bits of a CNode capability did not match the address.
    GuardMismatch,
    /// Bits remain to be resolved but the slot does not hold a CNode.
    NotCNode,
    /// The capability lacks rights required by the operation.
    InsufficientRights,
    /// Slot index is outside the CNode.
    InvalidIndex,

    // -- Type
    /// Destination type is Null or not a known type.
    IllegalDestType,
    /// Type cannot be created at runtime.
    TypeNotCreatable,
    /// Destination capability is neither a CNode nor a VNode.
    DestTypeInvalid,
    /// Source type cannot be retyped into the destination type.
    InvalidRetype,
    /// Capability has the wrong type for this operation.
    TypeMismatch,
    /// Capability type cannot be mapped into this VNode kind.
    NotMappable,

    // -- Capacity
    /// Destination slot already holds a capability.
    SlotOccupied,
    /// Destination slot range does not fit the CNode.
    SlotsInvalid,
    /// Kernel object table is full.
    OutOfObjects,
    /// Core-local identifier space is used up.
    IdSpaceExhausted,

    // -- State
    /// Copy class is locked by the monitor.
    Locked,
    /// Unlock requested on a class that is not locked.
    NotLocked,
    /// Capability is marked for deletion.
    InDelete,
    /// Dispatcher lacks the state required to run.
    NotRunnable,
    /// Yield called while the caller is enabled.
    CallerEnabled,
    /// Yield target is neither an endpoint nor a dispatcher.
    InvalidYieldTarget,
    /// Delete queue must drain before clear steps may run.
    DeleteQueueBusy,
    /// Caller is not the monitor.
    NotMonitor,
    /// Capability still has local copies.
    NotLastCopy,
    /// No pending reclaimed memory.
    NothingReclaimed,

    // -- Derivation
    /// Retype source has live descendants; revoke it first.
    RevokeFirst,

    // -- Argument
    /// Attempted to widen rights with a mint.
    RightsEscalation,
    /// Guard size plus radix exceeds the address width.
    GuardSizeOverflow,
    /// Object size exponent out of range for the type.
    InvalidSize,
    /// Endpoint buffer parameters are invalid or widen the source buffer.
    InvalidEndpointBuffer,
    /// Scheduling parameters are inconsistent.
    InvalidSchedParams,
    /// Mapping offset or flags are invalid.
    InvalidMapping,
    /// A generic argument is out of range.
    InvalidArgument,
    /// Caller-supplied buffer is too small.
    BufferTooSmall,

    // -- Protocol
    /// Object is shared with other cores; ask the monitor.
    RetryThroughMonitor,
    /// Last locally owned copy of an object with remote copies or
    /// contents; the monitor must run the delete-last protocol.
    DeleteLastOwned,
}

impl CapError {
    /// Get a short description of the error.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmptySlot => "slot is empty",
            Self::DepthExceeded => "address depth exceeded",
            Self::GuardMismatch => "guard mismatch",
            Self::NotCNode => "intermediate capability is not a CNode",
            Self::InsufficientRights => "insufficient rights",
            Self::InvalidIndex => "slot index out of range",
            Self::IllegalDestType => "illegal destination type",
            Self::TypeNotCreatable => "type not creatable",
            Self::DestTypeInvalid => "destination is not a CNode or VNode",
            Self::InvalidRetype => "invalid retype",
            Self::TypeMismatch => "capability type mismatch",
            Self::NotMappable => "capability cannot be mapped here",
            Self::SlotOccupied => "destination slot is occupied",
            Self::SlotsInvalid => "destination slots out of range",
            Self::OutOfObjects => "kernel object table full",
            Self::IdSpaceExhausted => "identifier space exhausted",
            Self::Locked => "capability is locked",
            Self::NotLocked => "capability is not locked",
            Self::InDelete => "capability is being deleted",
            Self::NotRunnable => "dispatcher not runnable",
            Self::CallerEnabled => "caller is enabled",
            Self::InvalidYieldTarget => "invalid yield target",
            Self::DeleteQueueBusy => "delete queue not empty",
            Self::NotMonitor => "caller is not the monitor",
            Self::NotLastCopy => "capability has local copies",
            Self::NothingReclaimed => "no reclaimed memory pending",
            Self::RevokeFirst => "source has live descendants",
            Self::RightsEscalation => "cannot increase capability rights",
            Self::GuardSizeOverflow => "guard size too large",
            Self::InvalidSize => "invalid object size",
            Self::InvalidEndpointBuffer => "invalid endpoint buffer",
            Self::InvalidSchedParams => "invalid scheduling parameters",
            Self::InvalidMapping => "invalid mapping parameters",
            Self::InvalidArgument => "invalid argument",
            Self::BufferTooSmall => "buffer too small",
            Self::RetryThroughMonitor => "retry through monitor",
            Self::DeleteLastOwned => "last owned copy, monitor must delete",
        }
    }

    /// Which class of failure this is.
    #[must_use]
    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::EmptySlot
            | Self::DepthExceeded
            | Self::GuardMismatch
            | Self::NotCNode
            | Self::InsufficientRights
            | Self::InvalidIndex => ErrorKind::Lookup,
            Self::IllegalDestType
            | Self::TypeNotCreatable
            | Self::DestTypeInvalid
            | Self::InvalidRetype
            | Self::TypeMismatch
            | Self::NotMappable => ErrorKind::Type,
            Self::SlotOccupied | Self::SlotsInvalid | Self::OutOfObjects | Self::IdSpaceExhausted => {
                ErrorKind::Capacity
            }
            Self::Locked
            | Self::NotLocked
            | Self::InDelete
            | Self::NotRunnable
            | Self::CallerEnabled
            | Self::InvalidYieldTarget
            | Self::DeleteQueueBusy
            | Self::NotMonitor
            | Self::NotLastCopy
            | Self::NothingReclaimed => ErrorKind::State,
            Self::RevokeFirst => ErrorKind::Derivation,
            Self::RightsEscalation
            | Self::GuardSizeOverflow
            | Self::InvalidSize
            | Self::InvalidEndpointBuffer
            | Self::InvalidSchedParams
            | Self::InvalidMapping
            | Self::InvalidArgument
            | Self::BufferTooSmall => ErrorKind::Argument,
            Self::RetryThroughMonitor | Self::DeleteLastOwned => ErrorKind::Protocol,
        }
    }

    /// Stable numeric code reported to user space. Zero is success.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::EmptySlot => 1,
            Self::DepthExceeded => 2,
            Self::GuardMismatch => 3,
            Self::NotCNode => 4,
            Self::InsufficientRights => 5,
            Self::InvalidIndex => 6,
            Self::IllegalDestType => 16,
            Self::TypeNotCreatable => 17,
            Self::DestTypeInvalid => 18,
            Self::InvalidRetype => 19,
            Self::TypeMismatch => 20,
            Self::NotMappable => 21,
            Self::SlotOccupied => 32,
            Self::SlotsInvalid => 33,
            Self::OutOfObjects => 34,
            Self::IdSpaceExhausted => 35,
            Self::Locked => 48,
            Self::NotLocked => 49,
            Self::InDelete => 50,
            Self::NotRunnable => 51,
            Self::CallerEnabled => 52,
            Self::InvalidYieldTarget => 53,
            Self::DeleteQueueBusy => 54,
            Self::NotMonitor => 55,
            Self::NotLastCopy => 56,
            Self::NothingReclaimed => 57,
            Self::RevokeFirst => 64,
            Self::RightsEscalation => 80,
            Self::GuardSizeOverflow => 81,
            Self::InvalidSize => 82,
            Self::InvalidEndpointBuffer => 83,
            Self::InvalidSchedParams => 84,
            Self::InvalidMapping => 85,
            Self::InvalidArgument => 86,
            Self::BufferTooSmall => 87,
            Self::RetryThroughMonitor => 96,
            Self::DeleteLastOwned => 97,
        }
    }
}

impl fmt::Display for CapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result type for capability operations.
pub type CapResult<T> = Result<T, CapError>;

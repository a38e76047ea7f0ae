//! Syscall error values
//!
//! A failed syscall reports the [`CapError`] that stopped it and, where a
//! capability lookup or validation step failed, which [`Stage`] it was.
//! The trap layer packs both into the error word of a [`SysRet`].

use core::fmt;

use keel_cap::CapError;

/// The step of a syscall that failed.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Resolving the source capability.
    SourceCapLookup = 1,
    /// Resolving the destination CNode.
    DestCNodeLookup = 2,
    /// Resolving an explicit root CNode.
    RootCapLookup = 3,
    /// Resolving the target of an ownership, lock or monitor operation.
    IdentifyLookup = 4,
    /// Resolving the CSpace root given to dispatcher setup.
    DispCSpaceRoot = 5,
    /// Resolving the VSpace root given to dispatcher setup.
    DispVSpaceRoot = 6,
    /// Resolving the dispatcher frame given to dispatcher setup.
    DispFrame = 7,
    /// Resolving the dispatcher whose domain is copied.
    DispOtherLookup = 8,
    /// Resolving the yield target.
    YieldTargetLookup = 9,
    /// Resolving the trash or return slot of a monitor step.
    TrashSlotLookup = 10,
    /// Resolving the invoked capability.
    InvokedCapLookup = 11,
}

impl Stage {
    /// Get the stage name for logging.
    pub const fn name(self) -> &'static str {
        match self {
            Self::SourceCapLookup => "source lookup",
            Self::DestCNodeLookup => "destination CNode lookup",
            Self::RootCapLookup => "root lookup",
            Self::IdentifyLookup => "identify lookup",
            Self::DispCSpaceRoot => "dispatcher cspace root",
            Self::DispVSpaceRoot => "dispatcher vspace root",
            Self::DispFrame => "dispatcher frame",
            Self::DispOtherLookup => "other dispatcher lookup",
            Self::YieldTargetLookup => "yield target lookup",
            Self::TrashSlotLookup => "trash slot lookup",
            Self::InvokedCapLookup => "invoked capability lookup",
        }
    }
}

/// A failed syscall.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "syscall errors must be reported"]
pub struct SyscallError {
    /// What went wrong.
    pub cause: CapError,
    /// Where it went wrong, if the failure belongs to a lookup stage.
    pub stage: Option<Stage>,
}

impl SyscallError {
    /// Error without a stage.
    #[inline]
    pub const fn new(cause: CapError) -> Self {
        Self { cause, stage: None }
    }

    /// Attribute this error to `stage`.
    #[inline]
    pub const fn at(self, stage: Stage) -> Self {
        Self {
            cause: self.cause,
            stage: Some(stage),
        }
    }

    /// Packed error word: stage in bits 16..32, error code below.
    #[inline]
    pub const fn code(self) -> u64 {
        let stage = match self.stage {
            Some(stage) => stage as u64,
            None => 0,
        };
        stage << 16 | self.cause.code() as u64
    }
}

impl From<CapError> for SyscallError {
    fn from(cause: CapError) -> Self {
        Self::new(cause)
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{} ({})", self.cause, stage.name()),
            None => write!(f, "{}", self.cause),
        }
    }
}

/// Attach a [`Stage`] to the error of a capability result.
pub trait StageExt<T> {
    /// Map an `Err` into a [`SyscallError`] attributed to `stage`.
    fn stage(self, stage: Stage) -> Result<T, SyscallError>;
}

impl<T> StageExt<T> for Result<T, CapError> {
    fn stage(self, stage: Stage) -> Result<T, SyscallError> {
        self.map_err(|cause| SyscallError::new(cause).at(stage))
    }
}

/// Result type for syscall handlers.
pub type SyscallResult<T = u64> = Result<T, SyscallError>;

/// What the trap layer hands back to user space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SysRet {
    /// Zero on success, otherwise a packed [`SyscallError::code`].
    pub error: u64,
    /// Result value, zero on error.
    pub value: u64,
}

impl SysRet {
    /// Successful return carrying `value`.
    #[inline]
    pub const fn ok(value: u64) -> Self {
        Self { error: 0, value }
    }

    /// Failed return.
    #[inline]
    pub const fn err(error: SyscallError) -> Self {
        Self {
            error: error.code(),
            value: 0,
        }
    }

    /// Check if this represents success.
    #[inline]
    pub const fn is_ok(&self) -> bool {
        self.error == 0
    }

    /// The stage packed into a failed return.
    #[inline]
    pub const fn stage_bits(&self) -> u16 {
        (self.error >> 16) as u16
    }

    /// The error code packed into a failed return.
    #[inline]
    pub const fn code_bits(&self) -> u16 {
        self.error as u16
    }
}

impl From<SyscallResult> for SysRet {
    fn from(result: SyscallResult) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(error) => Self::err(error),
        }
    }
}

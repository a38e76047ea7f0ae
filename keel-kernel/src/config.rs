//! Kernel configuration
//!
//! Compile-time limits plus the per-core [`KernelConfig`] handed to
//! [`Kernel::new`](crate::Kernel::new) by boot code.

use keel_cap::Arch;
use keel_common::CoreId;
use log::LevelFilter;

/// Default upper bound on live kernel objects (CNodes, VNodes, DCBs).
pub const MAX_OBJECTS: usize = 65536;

/// Radix of the monitor's root CNode built at boot.
pub const ROOT_CNODE_RADIX: u8 = 8;

/// Largest user buffer `print` copies per chunk.
pub const PRINT_CHUNK: usize = 128;

/// Largest `print` request accepted.
pub const PRINT_MAX_LEN: usize = 4096;

/// First core-local identifier handed out by `create(Id)`.
pub const FIRST_LOCAL_ID: u32 = 1;

/// Per-core kernel configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Core this kernel instance runs on.
    pub core_id: CoreId,
    /// Address-space architecture, selects valid VSpace roots.
    pub arch: Arch,
    /// Maximum log level recorded.
    pub log_level: LevelFilter,
    /// Object table capacity.
    pub max_objects: usize,
}

impl KernelConfig {
    /// Configuration for `core_id` with defaults elsewhere.
    #[must_use]
    pub const fn for_core(core_id: CoreId) -> Self {
        Self {
            core_id,
            arch: Arch::X86_64,
            log_level: LevelFilter::Debug,
            max_objects: MAX_OBJECTS,
        }
    }

    /// Set the architecture.
    #[must_use]
    pub const fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = arch;
        self
    }

    /// Set the log level.
    #[must_use]
    pub const fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    /// Set the object table capacity.
    #[must_use]
    pub const fn with_max_objects(mut self, max: usize) -> Self {
        self.max_objects = max;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::for_core(CoreId::BSP)
    }
}

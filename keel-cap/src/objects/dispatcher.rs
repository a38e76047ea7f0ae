//! Dispatcher scheduling parameters and shared state
//!
//! A dispatcher is scheduled according to its task class. Real-time
//! classes carry a deadline/WCET/period triple; best-effort dispatchers
//! share the CPU in proportion to their weight. The scheduler indexes
//! runnable dispatchers by these values, so they may only change while the
//! dispatcher is off the run queue.

use crate::error::{CapError, CapResult};

/// Time in scheduler ticks.
pub type Ticks = u64;

/// Scheduling class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TaskType {
    /// Proportional share.
    #[default]
    BestEffort = 0,
    /// Soft real-time.
    SoftRealTime = 1,
    /// Hard real-time.
    HardRealTime = 2,
}

impl TaskType {
    /// Decode a raw task class.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Self::BestEffort),
            1 => Some(Self::SoftRealTime),
            2 => Some(Self::HardRealTime),
            _ => None,
        }
    }
}

/// Scheduling parameters of one dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SchedParams {
    /// Scheduling class.
    pub task_type: TaskType,
    /// Relative deadline.
    pub deadline: Ticks,
    /// Worst-case execution time per period.
    pub wcet: Ticks,
    /// Period.
    pub period: Ticks,
    /// Release time; zero means "now" when set through a syscall.
    pub release: Ticks,
    /// Best-effort share.
    pub weight: u16,
}

impl SchedParams {
    /// Best-effort weight given to fresh dispatchers.
    pub const DEFAULT_WEIGHT: u16 = 1;

    /// Parameters of a fresh dispatcher.
    pub const DEFAULT: Self = Self {
        task_type: TaskType::BestEffort,
        deadline: 0,
        wcet: 0,
        period: 0,
        release: 0,
        weight: Self::DEFAULT_WEIGHT,
    };

    /// Check the parameter set is consistent.
    ///
    /// # Errors
    ///
    /// [`CapError::InvalidSchedParams`] if `wcet > deadline`, `wcet > period`,
    /// or a best-effort task has zero weight.
    pub const fn validate(&self) -> CapResult<()> {
        if self.wcet > self.deadline || self.wcet > self.period {
            return Err(CapError::InvalidSchedParams);
        }
        if matches!(self.task_type, TaskType::BestEffort) && self.weight == 0 {
            return Err(CapError::InvalidSchedParams);
        }
        Ok(())
    }
}

impl Default for SchedParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Kernel view of the state a dispatcher shares with its user-level
/// runtime through the dispatcher frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct DispatcherShared {
    /// Upcalls disabled; the runtime is in a critical section.
    pub disabled: bool,
    /// The runtime has work queued.
    pub haswork: bool,
    /// Messages delivered by the kernel.
    pub lmp_delivered: u64,
    /// Messages consumed by the runtime.
    pub lmp_seen: u64,
    /// Requested wakeup time, zero for none.
    pub wakeup: Ticks,
}

impl DispatcherShared {
    /// No pending work, no unseen messages and no wakeup due at `now`.
    #[must_use]
    pub const fn is_idle_at(&self, now: Ticks) -> bool {
        !self.haswork
            && self.lmp_delivered == self.lmp_seen
            && (self.wakeup == 0 || self.wakeup > now)
    }
}

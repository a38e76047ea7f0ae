//! Kernel Logging
//!
//! Log output goes to a lock-free ring buffer that the monitor drains, and
//! optionally to a console hook mirrored synchronously during bring-up.

pub mod buffer;
mod logger;

pub use buffer::{LogBufferStats, LogEntry};
pub use logger::{ConsoleHook, init, log_raw, set_time};

/// Pop every buffered entry, oldest first, into `f`.
pub fn drain(mut f: impl FnMut(&LogEntry)) -> usize {
    let mut count = 0;
    while let Some(entry) = buffer::pop() {
        f(&entry);
        count += 1;
    }
    count
}

//! Kernel Log Ring Buffer
//!
//! Log records are kept in a lock-free ring buffer until the monitor (or a
//! test) drains them. A record that arrives while the buffer is full is
//! dropped; older records are never overwritten.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::Level;
use thingbuf::StaticThingBuf;

/// Maximum size of a single entry's content (target + message).
pub const LOG_ENTRY_CONTENT_SIZE: usize = 240;

/// Number of entry slots.
pub const LOG_BUFFER_SLOTS: usize = 256;

/// One buffered log record.
#[derive(Clone)]
pub struct LogEntry {
    /// Kernel time when the record was taken.
    pub timestamp: u64,
    /// Log level (0=Error .. 4=Trace).
    pub level: u8,
    /// Length of the target prefix in `content`.
    pub target_len: u8,
    /// Length of the message following the target.
    pub message_len: u16,
    /// `[target bytes][message bytes]`
    pub content: [u8; LOG_ENTRY_CONTENT_SIZE],
}

impl Default for LogEntry {
    fn default() -> Self {
        Self {
            timestamp: 0,
            level: 0,
            target_len: 0,
            message_len: 0,
            content: [0u8; LOG_ENTRY_CONTENT_SIZE],
        }
    }
}

impl LogEntry {
    /// Build an entry, truncating target and message to fit.
    pub fn new(timestamp: u64, level: Level, target: &str, message: &str) -> Self {
        let mut entry = Self {
            timestamp,
            level: level_to_u8(level),
            ..Self::default()
        };

        let target = truncate(target, u8::MAX as usize);
        entry.content[..target.len()].copy_from_slice(target.as_bytes());
        entry.target_len = target.len() as u8;

        let message = truncate(message, LOG_ENTRY_CONTENT_SIZE - target.len());
        let start = target.len();
        entry.content[start..start + message.len()].copy_from_slice(message.as_bytes());
        entry.message_len = message.len() as u16;

        entry
    }

    /// Log level of the entry.
    pub fn level(&self) -> Level {
        u8_to_level(self.level)
    }

    /// Record target (module path).
    pub fn target(&self) -> &str {
        let len = self.target_len as usize;
        core::str::from_utf8(&self.content[..len]).unwrap_or("<invalid>")
    }

    /// Record message.
    pub fn message(&self) -> &str {
        let start = self.target_len as usize;
        let end = start + self.message_len as usize;
        core::str::from_utf8(&self.content[start..end]).unwrap_or("<invalid>")
    }
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char
/// boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn level_to_u8(level: Level) -> u8 {
    match level {
        Level::Error => 0,
        Level::Warn => 1,
        Level::Info => 2,
        Level::Debug => 3,
        Level::Trace => 4,
    }
}

/// Convert a stored level back.
pub fn u8_to_level(val: u8) -> Level {
    match val {
        0 => Level::Error,
        1 => Level::Warn,
        2 => Level::Info,
        3 => Level::Debug,
        _ => Level::Trace,
    }
}

static LOG_BUFFER: StaticThingBuf<LogEntry, LOG_BUFFER_SLOTS> = StaticThingBuf::new();

static BUFFER_ENABLED: AtomicBool = AtomicBool::new(false);
static DROPPED: AtomicU64 = AtomicU64::new(0);

/// Enable the buffer.
pub fn enable() {
    BUFFER_ENABLED.store(true, Ordering::Release);
}

/// Push an entry. Returns false if the buffer is disabled or full.
pub fn push(entry: LogEntry) -> bool {
    if !BUFFER_ENABLED.load(Ordering::Acquire) {
        return false;
    }
    let queued = LOG_BUFFER.push(entry).is_ok();
    if !queued {
        DROPPED.fetch_add(1, Ordering::Relaxed);
    }
    queued
}

/// Pop the oldest entry.
pub fn pop() -> Option<LogEntry> {
    if !BUFFER_ENABLED.load(Ordering::Acquire) {
        return None;
    }
    LOG_BUFFER.pop()
}

/// Number of entries waiting.
pub fn available() -> usize {
    if !BUFFER_ENABLED.load(Ordering::Acquire) {
        return 0;
    }
    LOG_BUFFER.len()
}

/// Format as many entries as fit into `out`, one `[LEVEL] target: message`
/// line each. Returns the number of bytes written.
///
/// An entry that does not fit stays in the buffer.
pub fn drain_into(out: &mut [u8]) -> usize {
    let mut written = 0;
    while available() > 0 {
        let Some(entry) = LOG_BUFFER.pop() else {
            break;
        };
        let tag = level_tag(entry.level());
        let (target, message) = (entry.target(), entry.message());
        let needed = tag.len() + 1 + target.len() + 2 + message.len() + 1;
        if written + needed > out.len() {
            // the ring has no push-front; re-queue at the tail
            let _ = LOG_BUFFER.push(entry);
            break;
        }
        for part in [tag.as_bytes(), b" ", target.as_bytes(), b": ", message.as_bytes(), b"\n"] {
            out[written..written + part.len()].copy_from_slice(part);
            written += part.len();
        }
    }
    written
}

/// Fixed-width level tag used by drained output.
pub const fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "[ERROR]",
        Level::Warn => "[WARN ]",
        Level::Info => "[INFO ]",
        Level::Debug => "[DEBUG]",
        Level::Trace => "[TRACE]",
    }
}

/// Buffer statistics.
#[derive(Debug, Clone, Copy)]
pub struct LogBufferStats {
    /// Entries currently queued.
    pub entries: usize,
    /// Total capacity.
    pub capacity: usize,
    /// Records dropped because the buffer was full.
    pub dropped: u64,
}

/// Get buffer statistics.
pub fn stats() -> LogBufferStats {
    LogBufferStats {
        entries: LOG_BUFFER.len(),
        capacity: LOG_BUFFER.capacity(),
        dropped: DROPPED.load(Ordering::Relaxed),
    }
}

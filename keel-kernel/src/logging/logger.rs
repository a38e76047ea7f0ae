//! Kernel logger
//!
//! Implements [`log::Log`] on top of the ring buffer. Records are
//! formatted into a stack buffer, so logging never allocates and is safe
//! from any context that may call the kernel.

use core::fmt::Write;
use core::sync::atomic::{AtomicU64, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Once;

use super::buffer::{self, LogEntry};

/// Console hook mirroring records synchronously.
pub type ConsoleHook = fn(&str);

/// Stack buffer for formatting one record.
struct MessageBuffer {
    data: [u8; buffer::LOG_ENTRY_CONTENT_SIZE],
    len: usize,
}

impl MessageBuffer {
    const fn new() -> Self {
        Self {
            data: [0u8; buffer::LOG_ENTRY_CONTENT_SIZE],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        match core::str::from_utf8(&self.data[..self.len]) {
            Ok(s) => s,
            // truncated mid-character
            Err(e) => core::str::from_utf8(&self.data[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

impl Write for MessageBuffer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let to_copy = bytes.len().min(self.data.len() - self.len);
        self.data[self.len..self.len + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.len += to_copy;
        Ok(())
    }
}

struct KernelLogger {
    level: LevelFilter,
    console: Option<ConsoleHook>,
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = CLOCK.load(Ordering::Relaxed);

        let mut msg = MessageBuffer::new();
        let _ = write!(msg, "{}", record.args());
        buffer::push(LogEntry::new(now, record.level(), record.target(), msg.as_str()));

        if let Some(console) = self.console {
            let mut line = MessageBuffer::new();
            let _ = write!(
                line,
                "[{now:>10}] {} {}: {}",
                buffer::level_tag(record.level()),
                record.target(),
                msg.as_str()
            );
            console(line.as_str());
        }
    }

    fn flush(&self) {}
}

static LOGGER: Once<KernelLogger> = Once::new();
static CLOCK: AtomicU64 = AtomicU64::new(0);

/// Install the kernel logger. Only the first call has any effect.
pub fn init(level: LevelFilter, console: Option<ConsoleHook>) {
    let mut installed = false;
    let logger = LOGGER.call_once(|| {
        installed = true;
        KernelLogger { level, console }
    });
    if installed {
        buffer::enable();
        log::set_logger(logger)
            .map(|()| log::set_max_level(level))
            .ok();
    }
}

/// Record the kernel time stamped onto subsequent records.
pub fn set_time(now: u64) {
    CLOCK.store(now, Ordering::Relaxed);
}

/// Log bypassing the `log` facade, for use before [`init`].
pub fn log_raw(console: ConsoleHook, level: Level, message: &str) {
    let mut line = MessageBuffer::new();
    let _ = write!(line, "{} {message}", buffer::level_tag(level));
    console(line.as_str());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_buffer_truncates() {
        let mut buf = MessageBuffer::new();
        for _ in 0..100 {
            let _ = buf.write_str("abcd");
        }
        assert_eq!(buf.as_str().len(), buffer::LOG_ENTRY_CONTENT_SIZE);
    }

    #[test]
    fn test_message_buffer_partial_char() {
        let mut buf = MessageBuffer::new();
        let _ = buf.write_str(&"a".repeat(buffer::LOG_ENTRY_CONTENT_SIZE - 1));
        let _ = buf.write_str("é");
        assert_eq!(buf.as_str().len(), buffer::LOG_ENTRY_CONTENT_SIZE - 1);
    }
}

//! Log buffer service
//!
//! Thread-safe buffer for the log lines of one running job. Steps write to
//! it while they run; the progress reporter drains it into status reports.

use keel_core::domain::log::LogEntry;
use std::sync::{Arc, Mutex};

/// Service for managing log buffers
pub trait LogBufferService: Send + Sync {
    /// Adds a log entry to the buffer
    fn add_entry(&self, entry: LogEntry);

    /// Returns all buffered entries and clears the buffer
    fn drain(&self) -> Vec<LogEntry>;

    /// Puts back entries that could not be delivered, ahead of newer ones
    fn restore(&self, entries: Vec<LogEntry>);
}

/// In-memory implementation of LogBufferService
///
/// Uses Arc<Mutex<Vec<LogEntry>>> for thread-safe access across tasks.
#[derive(Clone, Default)]
pub struct InMemoryLogBuffer {
    buffer: Arc<Mutex<Vec<LogEntry>>>,
}

impl InMemoryLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogBufferService for InMemoryLogBuffer {
    fn add_entry(&self, entry: LogEntry) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push(entry);
    }

    fn drain(&self) -> Vec<LogEntry> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *buffer)
    }

    fn restore(&self, entries: Vec<LogEntry>) {
        if entries.is_empty() {
            return;
        }
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        let newer = std::mem::replace(&mut *buffer, entries);
        buffer.extend(newer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_empties_buffer() {
        let buffer = InMemoryLogBuffer::new();
        let writer = buffer.clone();

        writer.add_entry(LogEntry::info("one"));
        writer.add_entry(LogEntry::info("two").for_step(1));

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].step, Some(1));
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_restore_keeps_order() {
        let buffer = InMemoryLogBuffer::new();
        buffer.add_entry(LogEntry::info("first"));
        let undelivered = buffer.drain();

        buffer.add_entry(LogEntry::info("second"));
        buffer.restore(undelivered);

        let messages: Vec<_> = buffer.drain().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }
}

//! Event central: buffered mote log output.
//!
//! Motes publish their serial/log lines here; the central keeps a bounded
//! ring of recent entries and notifies observers on every append. The buffer
//! bound round-trips through the `events` config element.

use std::collections::VecDeque;

use motesim_common::{MoteId, Observers, SimTime};

use crate::config::Element;
use crate::error::ConfigError;

/// Default bound on buffered log entries.
pub const DEFAULT_LOG_BUFFER: usize = 40_000;

/// One line of mote log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub time: SimTime,
    pub mote: MoteId,
    pub message: String,
}

pub struct EventCentral {
    buffer_size: usize,
    buffer: VecDeque<LogEntry>,
    observers: Observers<LogEntry>,
}

impl EventCentral {
    pub fn new() -> Self {
        EventCentral {
            buffer_size: DEFAULT_LOG_BUFFER,
            buffer: VecDeque::new(),
            observers: Observers::new(),
        }
    }

    /// Append a log line, evicting the oldest entries past the buffer bound,
    /// and notify observers.
    pub fn log_output(&mut self, time: SimTime, mote: MoteId, message: impl Into<String>) {
        let entry = LogEntry {
            time,
            mote,
            message: message.into(),
        };
        self.buffer.push_back(entry.clone());
        while self.buffer.len() > self.buffer_size {
            self.buffer.pop_front();
        }
        self.observers.notify(&entry);
    }

    /// Buffered entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.buffer.iter()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn set_buffer_size(&mut self, size: usize) {
        self.buffer_size = size;
        while self.buffer.len() > self.buffer_size {
            self.buffer.pop_front();
        }
    }

    /// Observer registry for log output. The registry is shareable across
    /// threads; notifications arrive from the thread appending the entry.
    pub fn observers(&self) -> &Observers<LogEntry> {
        &self.observers
    }

    pub fn config(&self) -> Vec<Element> {
        vec![Element::with_text(
            "logoutput",
            self.buffer_size.to_string(),
        )]
    }

    pub fn set_config(&mut self, children: &[Element]) -> Result<(), ConfigError> {
        for child in children {
            if child.name == "logoutput" {
                let size: usize = child
                    .text
                    .parse()
                    .map_err(|_| ConfigError::invalid_value("logoutput", &child.text))?;
                self.set_buffer_size(size);
            }
        }
        Ok(())
    }
}

impl Default for EventCentral {
    fn default() -> Self {
        Self::new()
    }
}

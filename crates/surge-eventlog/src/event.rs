//! Event kinds, severities, and rendered entries.

use serde::Serialize;

/// Record severity. The on-disk encoding is the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info = 0,
    Warn = 1,
    Error = 2,
}

impl Severity {
    /// Render a stored severity code, tolerating junk from corrupt or
    /// future-format buffers.
    pub fn label_for(code: u16) -> &'static str {
        match code {
            0 => "INFO",
            1 => "WARNING",
            2 => "ERROR",
            _ => "???",
        }
    }
}

/// A declared event kind: a stable name plus a formatter for the two
/// integer arguments every record carries.
#[derive(Clone)]
pub struct EventKind {
    pub name: &'static str,
    pub format: fn(u32, u32) -> String,
}

impl EventKind {
    pub const fn new(name: &'static str, format: fn(u32, u32) -> String) -> Self {
        Self { name, format }
    }
}

impl std::fmt::Debug for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventKind").field("name", &self.name).finish()
    }
}

/// One rendered log entry, ready for an API response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Entry {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub severity: String,
    pub message: String,
}

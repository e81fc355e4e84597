//! surge-eventlog — durable audit trail for scaling decisions.
//!
//! A [`RingLog`] is a fixed-capacity circular buffer of fixed-width
//! binary records. It never grows: once full, each append overwrites
//! the oldest slot. The whole buffer is handed to a [`LogStore`] hook
//! on every append, and on load the write pointer is recovered by
//! scanning for the newest timestamp — no separate pointer field to
//! keep consistent across crashes.
//!
//! Event kinds are declared up front as an ordered list; their type
//! codes are their 1-based registration positions.

pub mod event;
pub mod ring;
pub mod store;

pub use event::{Entry, EventKind, Severity};
pub use ring::{EventLogError, RingLog, RECORD_SIZE};
pub use store::{FileLogStore, LogStore, MemoryLogStore};

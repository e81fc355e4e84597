//! The circular binary log itself.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut};
use thiserror::Error;
use tracing::debug;

use crate::event::{Entry, EventKind, Severity};
use crate::store::LogStore;

/// Fixed record layout, little-endian:
/// f64 timestamp, u16 severity, u16 type code, u32 arg1, u32 arg2.
pub const RECORD_SIZE: usize = 8 + 2 + 2 + 4 + 4;

/// Result alias for ring log operations.
pub type EventLogResult<T> = Result<T, EventLogError>;

/// Ring log failures.
///
/// `CapacityTooSmall` and `UnknownKind` are contract errors and fail
/// fast at the call site; `Store` is whatever the persistence hook
/// reported.
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("log capacity {capacity} is smaller than one {record}-byte record")]
    CapacityTooSmall { capacity: usize, record: usize },

    #[error("event kind {0:?} was never registered")]
    UnknownKind(String),

    #[error("persistence hook failed: {0}")]
    Store(String),
}

struct Inner {
    data: Vec<u8>,
    /// Next slot to write.
    pointer: usize,
}

/// Fixed-capacity circular log of typed events.
///
/// Clone-cheap handle; appends serialize on an internal lock and each
/// append synchronously pushes the whole buffer through the store hook.
#[derive(Clone)]
pub struct RingLog {
    kinds: Arc<Vec<EventKind>>,
    store: Arc<dyn LogStore>,
    capacity: usize,
    slots: usize,
    inner: Arc<Mutex<Inner>>,
}

impl RingLog {
    /// Build a log over `capacity` bytes of buffer, recovering any
    /// previously stored contents.
    pub fn new(
        capacity: usize,
        kinds: Vec<EventKind>,
        store: Arc<dyn LogStore>,
    ) -> EventLogResult<Self> {
        if capacity < RECORD_SIZE {
            return Err(EventLogError::CapacityTooSmall {
                capacity,
                record: RECORD_SIZE,
            });
        }

        let log = Self {
            kinds: Arc::new(kinds),
            store,
            capacity,
            slots: capacity / RECORD_SIZE,
            inner: Arc::new(Mutex::new(Inner {
                data: vec![0; capacity],
                pointer: 0,
            })),
        };
        log.reload()?;
        Ok(log)
    }

    /// Re-read the buffer from the store hook and re-derive the write
    /// pointer from record timestamps.
    pub fn reload(&self) -> EventLogResult<()> {
        let retrieved = self
            .store
            .retrieve()
            .map_err(|e| EventLogError::Store(e.to_string()))?;

        let mut inner = self.lock();
        inner.data = match retrieved {
            Some(data) if data.len() == self.capacity => data,
            // Absent or mismatched buffer: start fresh.
            _ => vec![0; self.capacity],
        };
        inner.pointer = self.find_pointer(&inner.data);
        debug!(slots = self.slots, pointer = inner.pointer, "ring log loaded");
        Ok(())
    }

    /// The slot one past the record with the newest timestamp, or 0
    /// for an all-zero buffer.
    fn find_pointer(&self, data: &[u8]) -> usize {
        let mut max_ts = 0.0_f64;
        let mut max_slot = 0;
        for slot in 0..self.slots {
            let (ts, _, _, _, _) = read_record(data, slot);
            if ts > max_ts {
                max_ts = ts;
                max_slot = slot;
            }
        }
        if max_ts > 0.0 {
            (max_slot + 1) % self.slots
        } else {
            0
        }
    }

    /// Append one record. The kind must have been registered at
    /// construction.
    pub fn append(
        &self,
        severity: Severity,
        kind: &str,
        arg1: u32,
        arg2: u32,
    ) -> EventLogResult<()> {
        self.append_at(now(), severity, kind, arg1, arg2)
    }

    pub fn info(&self, kind: &str, arg1: u32, arg2: u32) -> EventLogResult<()> {
        self.append(Severity::Info, kind, arg1, arg2)
    }

    pub fn warn(&self, kind: &str, arg1: u32, arg2: u32) -> EventLogResult<()> {
        self.append(Severity::Warn, kind, arg1, arg2)
    }

    pub fn error(&self, kind: &str, arg1: u32, arg2: u32) -> EventLogResult<()> {
        self.append(Severity::Error, kind, arg1, arg2)
    }

    fn append_at(
        &self,
        ts: f64,
        severity: Severity,
        kind: &str,
        arg1: u32,
        arg2: u32,
    ) -> EventLogResult<()> {
        // 1-based code by registration order.
        let code = self
            .kinds
            .iter()
            .position(|k| k.name == kind)
            .map(|i| (i + 1) as u16)
            .ok_or_else(|| EventLogError::UnknownKind(kind.to_string()))?;

        let mut inner = self.lock();
        let slot = inner.pointer;
        write_record(&mut inner.data, slot, ts, severity as u16, code, arg1, arg2);
        inner.pointer = (slot + 1) % self.slots;
        self.store
            .store(&inner.data)
            .map_err(|e| EventLogError::Store(e.to_string()))
    }

    /// Entries newer than `since`, oldest first, at most `limit`.
    ///
    /// The walk starts at the write pointer — the oldest slot once the
    /// ring has wrapped — and makes at most one revolution.
    pub fn query(&self, since: Option<f64>, limit: Option<usize>) -> Vec<Entry> {
        let since = since.unwrap_or(0.0);
        let limit = limit.unwrap_or(self.slots);

        let inner = self.lock();
        let mut entries = Vec::new();
        let mut slot = inner.pointer;
        loop {
            if entries.len() >= limit {
                break;
            }
            let (ts, sev, code, arg1, arg2) = read_record(&inner.data, slot);
            if code != 0 && ts > since {
                entries.push(self.render(ts, sev, code, arg1, arg2));
            }
            slot = (slot + 1) % self.slots;
            if slot == inner.pointer {
                break;
            }
        }
        entries
    }

    fn render(&self, ts: f64, sev: u16, code: u16, arg1: u32, arg2: u32) -> Entry {
        let message = self
            .kinds
            .get((code as usize).wrapping_sub(1))
            .map(|k| (k.format)(arg1, arg2))
            .unwrap_or_else(|| format!("Unknown log entry (args {arg1}, {arg2})"));
        Entry {
            timestamp: ts,
            severity: Severity::label_for(sev).to_string(),
            message,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn write_record(
    data: &mut [u8],
    slot: usize,
    ts: f64,
    sev: u16,
    code: u16,
    arg1: u32,
    arg2: u32,
) {
    let mut buf = &mut data[slot * RECORD_SIZE..(slot + 1) * RECORD_SIZE];
    buf.put_f64_le(ts);
    buf.put_u16_le(sev);
    buf.put_u16_le(code);
    buf.put_u32_le(arg1);
    buf.put_u32_le(arg2);
}

fn read_record(data: &[u8], slot: usize) -> (f64, u16, u16, u32, u32) {
    let mut buf = &data[slot * RECORD_SIZE..(slot + 1) * RECORD_SIZE];
    (
        buf.get_f64_le(),
        buf.get_u16_le(),
        buf.get_u16_le(),
        buf.get_u32_le(),
        buf.get_u32_le(),
    )
}

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

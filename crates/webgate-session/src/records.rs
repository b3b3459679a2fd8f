//! Captured records and the bounded buffer they live in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use webgate_driver::{ConsoleLevel, SourceLocation, TraceOptions};

/// Per-session cap on each log buffer.
pub const LOG_CAP: usize = 1_000;

/// One observed network exchange. `status` 0 means the request never got a
/// response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub status: i64,
    pub request_headers: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleRecord {
    pub timestamp: DateTime<Utc>,
    pub level: ConsoleLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

/// Bookkeeping for an in-flight trace. At most one per session.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub options: TraceOptions,
    pub output_path: String,
    pub active: bool,
}

/// Fixed-capacity queue evicting the oldest entry on overflow. Readers
/// always copy.
#[derive(Debug)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Copy of the newest `limit` entries, oldest first.
    pub fn tail(&self, limit: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(limit);
        self.items.iter().skip(skip).cloned().collect()
    }

    /// Copy of everything, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut buf = RingBuffer::new(3);
        for i in 0..3 {
            buf.push(i);
        }
        assert_eq!(buf.snapshot(), vec![0, 1, 2]);
        buf.push(3);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.snapshot(), vec![1, 2, 3]);
    }

    #[test]
    fn thousand_and_first_entry_evicts_the_first() {
        let mut buf = RingBuffer::new(LOG_CAP);
        for i in 0..=LOG_CAP {
            buf.push(i);
        }
        assert_eq!(buf.len(), LOG_CAP);
        let snapshot = buf.snapshot();
        assert_eq!(snapshot[0], 1);
        assert_eq!(*snapshot.last().unwrap(), LOG_CAP);
    }

    #[test]
    fn tail_returns_newest_entries() {
        let mut buf = RingBuffer::new(10);
        for i in 0..5 {
            buf.push(i);
        }
        assert_eq!(buf.tail(2), vec![3, 4]);
        assert_eq!(buf.tail(100), vec![0, 1, 2, 3, 4]);
    }
}

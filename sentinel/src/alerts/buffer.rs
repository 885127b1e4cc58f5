use crate::feed::AlertEvent;

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;
use std::time::SystemTime;

/// Number of alerts kept for display unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 10;

/// An alert as stored in the buffer, stamped on arrival.
#[derive(Debug)]
pub struct AlertRecord {
    /// Arrival order within the session, starting at 0.
    pub seq: u64,
    pub received_at: SystemTime,
    pub alert: AlertEvent,
}

/// Bounded history of received alerts, newest first.
///
/// Inserting into a full buffer evicts the oldest record. Records are
/// shared immutably, so a `Snapshot` stays valid whatever happens to the
/// buffer afterwards.
#[derive(Debug)]
pub struct AlertBuffer {
    records: VecDeque<Arc<AlertRecord>>,
    capacity: usize,
    next_seq: u64,
    evicted: u64,
}

impl Default for AlertBuffer {
    fn default() -> Self {
        AlertBuffer::new(DEFAULT_CAPACITY)
    }
}

impl AlertBuffer {
    /// `capacity` is raised to 1 if zero.
    pub fn new(capacity: usize) -> AlertBuffer {
        let capacity = capacity.max(1);
        AlertBuffer {
            records: VecDeque::with_capacity(capacity + 1),
            capacity,
            next_seq: 0,
            evicted: 0,
        }
    }

    /// Prepends `alert`. Returns the record evicted to make room, if any.
    pub fn insert(&mut self, alert: AlertEvent) -> Option<Arc<AlertRecord>> {
        let record = AlertRecord {
            seq: self.next_seq,
            received_at: SystemTime::now(),
            alert,
        };
        self.next_seq += 1;
        self.records.push_front(Arc::new(record));
        let mut evicted = None;
        while self.records.len() > self.capacity {
            evicted = self.records.pop_back();
            self.evicted += 1;
        }
        evicted
    }

    /// Point-in-time copy of the contents, newest first.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            records: self.records.iter().cloned().collect(),
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Alerts inserted since creation, evicted ones included.
    pub fn total_inserted(&self) -> u64 {
        self.next_seq
    }

    pub fn total_evicted(&self) -> u64 {
        self.evicted
    }
}

/// Immutable, ordered view of an `AlertBuffer`.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    records: Vec<Arc<AlertRecord>>,
}

impl Snapshot {
    pub fn alerts(&self) -> impl Iterator<Item = &AlertEvent> {
        self.records.iter().map(|r| &r.alert)
    }
}

impl Deref for Snapshot {
    type Target = [Arc<AlertRecord>];

    fn deref(&self) -> &Self::Target {
        &self.records
    }
}

//! Bounded request log
//!
//! Oldest entries are evicted first once the capacity is reached.

use std::collections::VecDeque;

use parking_lot::Mutex;

use pt_core::RequestLogEntry;

/// Ring buffer of served requests
#[derive(Debug)]
pub struct RequestLog {
    entries: Mutex<VecDeque<RequestLogEntry>>,
    capacity: usize,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn push(&self, entry: RequestLogEntry) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Entries in arrival order, oldest first
    pub fn snapshot(&self) -> Vec<RequestLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entry(n: usize) -> RequestLogEntry {
        RequestLogEntry {
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            method: "GET".to_string(),
            path: format!("/item/{}", n),
            remote_addr: "127.0.0.1:50000".to_string(),
            user_agent: String::new(),
            content_type: String::new(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: String::new(),
            status_code: 200,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_keeps_most_recent_entries() {
        let log = RequestLog::new(1000);
        for n in 0..1500 {
            log.push(entry(n));
        }

        let entries = log.snapshot();
        assert_eq!(entries.len(), 1000);
        assert_eq!(entries.first().unwrap().path, "/item/500");
        assert_eq!(entries.last().unwrap().path, "/item/1499");
    }

    #[test]
    fn test_clear() {
        let log = RequestLog::new(10);
        log.push(entry(1));
        assert!(!log.is_empty());
        log.clear();
        assert!(log.is_empty());
        assert!(log.snapshot().is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let log = RequestLog::new(0);
        log.push(entry(1));
        log.push(entry(2));
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.snapshot()[0].path, "/item/2");
    }
}

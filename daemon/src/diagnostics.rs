use log::{debug, error, info};
use parking_lot::RwLock;
use shared::{LogCategory, LogEntry};
use std::collections::{BTreeMap, VecDeque};

pub const MAX_LOG_ENTRIES: usize = 100;

/// Bounded newest-first event log shown to clients.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    entries: RwLock<VecDeque<LogEntry>>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, category: LogCategory, message: impl Into<String>) -> LogEntry {
        self.append_with(category, message, BTreeMap::new())
    }

    pub fn append_with(
        &self,
        category: LogCategory,
        message: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> LogEntry {
        let entry = LogEntry::new(category, message.into(), metadata);

        match category {
            LogCategory::Error => error!("[{}] {}", category.label(), entry.message),
            LogCategory::Settings => debug!("[{}] {}", category.label(), entry.message),
            _ => info!("[{}] {}", category.label(), entry.message),
        }

        let mut entries = self.entries.write();
        entries.push_front(entry.clone());
        entries.truncate(MAX_LOG_ENTRIES);
        entry
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Snapshot, newest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Builds a metadata map from key/value pairs.
pub fn metadata<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_entry_is_evicted_past_capacity() {
        let log = DiagnosticLog::new();
        for i in 0..=MAX_LOG_ENTRIES {
            log.append(LogCategory::Status, format!("event {}", i));
        }

        let entries = log.entries();
        assert_eq!(entries.len(), MAX_LOG_ENTRIES);
        assert_eq!(entries[0].message, "event 100");
        assert_eq!(entries[MAX_LOG_ENTRIES - 1].message, "event 1");
        assert!(entries.iter().all(|e| e.message != "event 0"));
    }

    #[test]
    fn entries_get_unique_ids_and_keep_metadata() {
        let log = DiagnosticLog::new();
        let first = log.append(LogCategory::Speech, "hello");
        let second = log.append_with(
            LogCategory::Settings,
            "Target language changed",
            metadata([("target", "fr")]),
        );

        assert_ne!(first.id, second.id);
        let entries = log.entries();
        assert_eq!(entries[0], second);
        assert_eq!(entries[0].metadata.get("target").map(String::as_str), Some("fr"));
        assert_eq!(entries[1], first);
    }

    #[test]
    fn clear_empties_the_buffer() {
        let log = DiagnosticLog::new();
        log.append(LogCategory::Error, "boom");
        assert_eq!(log.len(), 1);
        log.clear();
        assert!(log.is_empty());
    }
}

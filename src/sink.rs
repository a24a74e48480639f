//! Event sink (the data layer)
//!
//! The sink is an ordered, append-only list of [`EventRecord`]s. It is created
//! once per page lifetime and never cleared; past records are never rewritten.
//! Components receive the sink explicitly instead of reaching for global state,
//! so tests can hand them a fresh [`DataLayer`] and inspect what was pushed.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::TrackError;
use crate::types::EventRecord;

/// Anything that accepts records in order.
///
/// `push` cannot fail: a sink is a local in-memory structure and a well-formed
/// append always succeeds.
pub trait EventSink: Send + Sync {
    fn push(&self, record: EventRecord);
}

/// In-memory data layer visible to an external consumer
#[derive(Debug, Default)]
pub struct DataLayer {
    records: Mutex<Vec<EventRecord>>,
}

impl DataLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended so far
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of every record in append order
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    /// Records appended at or after `offset`, for consumers that poll
    pub fn since(&self, offset: usize) -> Vec<EventRecord> {
        let records = self.records.lock();
        records.get(offset..).map(<[_]>::to_vec).unwrap_or_default()
    }

    /// Names of every record in append order
    pub fn event_names(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .map(|r| r.event().to_string())
            .collect()
    }

    /// Records whose name matches `event`
    pub fn filter(&self, event: &str) -> Vec<EventRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.event() == event)
            .cloned()
            .collect()
    }

    /// Serialize the whole layer as a JSON array
    pub fn to_json(&self) -> Result<String, TrackError> {
        Ok(serde_json::to_string(&*self.records.lock())?)
    }

    /// Serialize the whole layer as newline-delimited JSON
    pub fn to_ndjson(&self) -> Result<String, TrackError> {
        let records = self.records.lock();
        let mut out = String::new();
        for record in records.iter() {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl EventSink for DataLayer {
    fn push(&self, record: EventRecord) {
        trace!(event = record.event(), "data layer push");
        self.records.lock().push(record);
    }
}

/// Lazily created, page-scoped slot holding the data layer.
///
/// `ensure` is idempotent: the first call creates the layer, later calls return
/// the same instance with its records intact.
#[derive(Debug, Default)]
pub struct SinkSlot {
    layer: OnceCell<Arc<DataLayer>>,
}

impl SinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the data layer if it does not exist yet and return it
    pub fn ensure(&self) -> Arc<DataLayer> {
        self.layer
            .get_or_init(|| {
                trace!("data layer created");
                Arc::new(DataLayer::new())
            })
            .clone()
    }

    /// The data layer, if one has been created
    pub fn get(&self) -> Option<Arc<DataLayer>> {
        self.layer.get().cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.layer.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attributes;

    fn record(name: &str) -> EventRecord {
        EventRecord::new(name, Attributes::new().into_map())
    }

    #[test]
    fn test_push_preserves_order() {
        let layer = DataLayer::new();
        layer.push(record("a"));
        layer.push(record("b"));
        layer.push(record("c"));

        assert_eq!(layer.event_names(), vec!["a", "b", "c"]);
        assert_eq!(layer.len(), 3);
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let slot = SinkSlot::new();
        assert!(!slot.is_initialized());

        let first = slot.ensure();
        first.push(record("page_view"));

        let second = slot.ensure();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_since_offset() {
        let layer = DataLayer::new();
        layer.push(record("a"));
        layer.push(record("b"));

        assert_eq!(layer.since(1).len(), 1);
        assert!(layer.since(2).is_empty());
        assert!(layer.since(10).is_empty());
    }

    #[test]
    fn test_ndjson_export() {
        let layer = DataLayer::new();
        layer.push(record("a"));
        layer.push(record("b"));

        let out = layer.to_ndjson().unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines, vec![r#"{"event":"a"}"#, r#"{"event":"b"}"#]);
    }
}

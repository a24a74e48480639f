//! Content generation tracking
//!
//! A generation runs from the click on "generate" until the (simulated)
//! backend answers. Each story can have at most one generation in flight;
//! [`GenerationTracker::begin`] hands out a [`GenerationTicket`] that is
//! consumed by exactly one of `succeed` or `fail`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::emitter::Emitter;
use crate::error::TrackError;

/// Error type reported when the generator backend fails without detail
pub const DEFAULT_FAILURE: &str = "MOCK_ERROR";

/// An in-flight generation
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a generation must be completed with succeed or fail"]
pub struct GenerationTicket {
    story_id: String,
    category: String,
    cluster: String,
    started: DateTime<Utc>,
}

impl GenerationTicket {
    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }
}

/// Tracks generate/copy interactions for one page
#[derive(Debug, Clone)]
pub struct GenerationTracker {
    emitter: Emitter,
    pending: HashSet<String>,
}

impl GenerationTracker {
    pub fn new(emitter: Emitter) -> Self {
        Self {
            emitter,
            pending: HashSet::new(),
        }
    }

    pub fn is_pending(&self, story_id: &str) -> bool {
        self.pending.contains(story_id)
    }

    /// Start generating content for a story. Emits `generate_click`.
    ///
    /// Fails without emitting when the same story is already generating.
    pub fn begin(
        &mut self,
        story_id: &str,
        category: &str,
        cluster: &str,
        now: DateTime<Utc>,
    ) -> Result<GenerationTicket, TrackError> {
        if !self.pending.insert(story_id.to_string()) {
            debug!(story_id, "generation already in flight, ignoring click");
            return Err(TrackError::GenerationPending(story_id.to_string()));
        }

        self.emitter.generate_click(category, cluster);
        Ok(GenerationTicket {
            story_id: story_id.to_string(),
            category: category.to_string(),
            cluster: cluster.to_string(),
            started: now,
        })
    }

    /// Finish successfully: `generate_success` with the elapsed time, then
    /// `output_generated`. Returns the elapsed milliseconds.
    pub fn succeed(&mut self, ticket: GenerationTicket, now: DateTime<Utc>) -> u64 {
        self.pending.remove(&ticket.story_id);
        let elapsed_ms = (now - ticket.started).num_milliseconds().max(0) as u64;
        self.emitter.generate_success(elapsed_ms);
        self.emitter.output_generated(&ticket.category, &ticket.cluster);
        elapsed_ms
    }

    /// Finish with an error; `generate_failed` carries `error_type`
    pub fn fail(&mut self, ticket: GenerationTicket, error_type: &str) {
        self.pending.remove(&ticket.story_id);
        self.emitter.generate_failed(error_type);
    }

    /// The user copied generated output
    pub fn copy(&self, category: &str, cluster: &str) {
        self.emitter.copy_to_clipboard(category, cluster);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::DataLayer;
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Arc<DataLayer>, GenerationTracker) {
        let layer = Arc::new(DataLayer::new());
        let tracker = GenerationTracker::new(Emitter::new(layer.clone()));
        (layer, tracker)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_successful_generation() {
        let (layer, mut tracker) = setup();
        let ticket = tracker.begin("story-1", "tech", "AI chips", t0()).unwrap();
        assert!(tracker.is_pending("story-1"));

        let elapsed = tracker.succeed(ticket, t0() + TimeDelta::milliseconds(1234));
        assert_eq!(elapsed, 1234);
        assert!(!tracker.is_pending("story-1"));

        let records: Vec<_> = layer.snapshot().iter().map(|r| r.to_value()).collect();
        assert_eq!(
            records,
            vec![
                json!({"event": "generate_click", "button_name": "generate", "category": "tech", "cluster": "AI chips"}),
                json!({"event": "generate_success", "generation_time_ms": 1234}),
                json!({"event": "output_generated", "category": "tech", "cluster": "AI chips"}),
            ]
        );
    }

    #[test]
    fn test_double_click_rejected_while_pending() {
        let (layer, mut tracker) = setup();
        let ticket = tracker.begin("story-1", "tech", "AI chips", t0()).unwrap();

        let again = tracker.begin("story-1", "tech", "AI chips", t0());
        assert!(matches!(again, Err(TrackError::GenerationPending(id)) if id == "story-1"));

        // other stories are independent
        let other = tracker.begin("story-2", "sports", "Finals", t0()).unwrap();
        assert_eq!(layer.filter("generate_click").len(), 2);

        tracker.fail(ticket, DEFAULT_FAILURE);
        tracker.fail(other, "TIMEOUT");
        assert!(tracker.begin("story-1", "tech", "AI chips", t0()).is_ok());

        let failed = layer.filter("generate_failed");
        assert_eq!(failed[0].get("error_type"), Some(&json!("MOCK_ERROR")));
        assert_eq!(failed[1].get("error_type"), Some(&json!("TIMEOUT")));
    }

    #[test]
    fn test_copy() {
        let (layer, tracker) = setup();
        tracker.copy("tech", "AI chips");
        assert_eq!(layer.event_names(), vec!["copy_to_clipboard".to_string()]);
    }
}

//! Engagement scoring
//!
//! The [`EngagementTracker`] is the state machine: it counts active seconds on a
//! 1 second sample, derives a 0-100 score from active time over elapsed time,
//! snapshots the score at fixed checkpoints and flips between active and idle as
//! interactions arrive or stop. It never reads a clock; every operation takes
//! `now` from the caller.
//!
//! The [`EngagementView`] owns a tracker plus the two periodic timers that drive
//! it, and is what a page holds for its lifetime.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::emitter::Emitter;
use crate::scheduler::{millis_delta, seconds_delta, IntervalTimer, TaskHandle};
use crate::types::{names, ActivityKind, Attributes, EngagementLevel};

/// Elapsed seconds at which engagement snapshots are taken
pub const DEFAULT_CHECKPOINTS: [u64; 4] = [30, 60, 120, 300];

/// Timing parameters for engagement scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    /// Sampling cadence
    pub sample_interval_secs: u64,
    /// Cadence of the idle check
    pub inactivity_check_secs: u64,
    /// Silence longer than this marks the user inactive
    pub inactivity_threshold_secs: u64,
    /// Elapsed seconds at which `user_engagement` snapshots fire
    pub checkpoints: Vec<u64>,
    /// Minimum spacing between two checkpoint snapshots
    pub checkpoint_rearm_ms: u64,
    /// Interactions closer together than this belong to one burst and share a
    /// single `user_activity` record; zero reports every interaction
    pub activity_debounce_ms: u64,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 1,
            inactivity_check_secs: 10,
            inactivity_threshold_secs: 30,
            checkpoints: DEFAULT_CHECKPOINTS.to_vec(),
            checkpoint_rearm_ms: 1000,
            activity_debounce_ms: 1000,
        }
    }
}

/// Observable engagement state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementState {
    pub start_time: DateTime<Utc>,
    pub active_seconds: u64,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
    pub fired_checkpoints: BTreeSet<u64>,
    /// Elapsed seconds at the last sample
    pub elapsed_seconds: u64,
    pub score: u8,
    pub session_count: u32,
}

/// Active/idle engagement state machine for one page view
#[derive(Debug, Clone)]
pub struct EngagementTracker {
    config: EngagementConfig,
    page_path: String,
    state: EngagementState,
    last_checkpoint_at: Option<DateTime<Utc>>,
    last_interaction_at: Option<DateTime<Utc>>,
    exited: bool,
}

impl EngagementTracker {
    /// Start tracking at `now`; the user counts as active from the start
    pub fn new(page_path: impl Into<String>, config: EngagementConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            page_path: page_path.into(),
            state: EngagementState {
                start_time: now,
                active_seconds: 0,
                last_activity: now,
                is_active: true,
                fired_checkpoints: BTreeSet::new(),
                elapsed_seconds: 0,
                score: 0,
                session_count: 1,
            },
            last_checkpoint_at: None,
            last_interaction_at: None,
            exited: false,
        }
    }

    pub fn state(&self) -> &EngagementState {
        &self.state
    }

    pub fn config(&self) -> &EngagementConfig {
        &self.config
    }

    pub fn page_path(&self) -> &str {
        &self.page_path
    }

    pub fn score(&self) -> u8 {
        self.state.score
    }

    pub fn level(&self) -> EngagementLevel {
        EngagementLevel::from_score(self.state.score)
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    /// Whole seconds since tracking started
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        (now - self.state.start_time).num_seconds().max(0) as u64
    }

    /// One sampling tick.
    ///
    /// The active second is counted and the score recomputed before the
    /// checkpoint check, so a snapshot always reports the score as of the
    /// checkpoint boundary.
    pub fn sample(&mut self, now: DateTime<Utc>, emitter: &Emitter) {
        if self.exited {
            return;
        }

        let elapsed = self.elapsed_seconds(now);
        self.state.elapsed_seconds = elapsed;

        if self.state.is_active {
            self.state.active_seconds += 1;
            if elapsed > 0 {
                let ratio = self.state.active_seconds as f64 / elapsed as f64 * 100.0;
                self.state.score = ratio.min(100.0).round() as u8;
            }
        }

        self.check_checkpoints(now, elapsed, emitter);
    }

    fn check_checkpoints(&mut self, now: DateTime<Utc>, elapsed: u64, emitter: &Emitter) {
        if let Some(last) = self.last_checkpoint_at {
            if now - last < millis_delta(self.config.checkpoint_rearm_ms) {
                return;
            }
        }

        // Ticks can arrive late; a checkpoint that was passed without an exact
        // hit is still taken once, and several passed at once share one snapshot.
        let crossed: Vec<u64> = self
            .config
            .checkpoints
            .iter()
            .copied()
            .filter(|c| *c <= elapsed && !self.state.fired_checkpoints.contains(c))
            .collect();
        if crossed.is_empty() {
            return;
        }

        self.state.fired_checkpoints.extend(crossed);
        self.last_checkpoint_at = Some(now);
        debug!(elapsed, score = self.state.score, "engagement checkpoint");
        emitter.user_engagement(elapsed, self.state.score);
    }

    /// A qualifying interaction: the user is active again as of `now`
    pub fn record_activity(&mut self, kind: ActivityKind, now: DateTime<Utc>, emitter: &Emitter) {
        if self.exited {
            return;
        }

        let was_idle = !self.state.is_active;
        if was_idle {
            debug!(page = %self.page_path, "user active again");
        }
        self.state.is_active = true;
        self.state.last_activity = now;

        let debounce = millis_delta(self.config.activity_debounce_ms);
        let new_burst = was_idle
            || self
                .last_interaction_at
                .map_or(true, |last| now - last >= debounce);
        self.last_interaction_at = Some(now);

        if new_burst {
            let attrs = Attributes::new()
                .with("activity_type", "page_interaction")
                .with("interaction", kind.as_str())
                .with("time_on_page", self.elapsed_seconds(now));
            emitter.emit(names::USER_ACTIVITY, attrs.into_map());
        }
    }

    /// Idle check: flips to inactive once the silence exceeds the threshold
    pub fn check_inactivity(&mut self, now: DateTime<Utc>, emitter: &Emitter) {
        if self.exited || !self.state.is_active {
            return;
        }

        let silence = now - self.state.last_activity;
        if silence <= seconds_delta(self.config.inactivity_threshold_secs) {
            return;
        }

        self.state.is_active = false;
        debug!(page = %self.page_path, silence_ms = silence.num_milliseconds(), "user inactive");
        let attrs = Attributes::new().with("inactive_duration", silence.num_milliseconds());
        emitter.emit(names::USER_INACTIVE, attrs.into_map());
    }

    /// Count a new session within this page view
    pub fn increment_session(&mut self, emitter: &Emitter) {
        self.state.session_count += 1;
        let attrs = Attributes::new().with("new_session_count", self.state.session_count);
        emitter.emit(names::SESSION_INCREMENT, attrs.into_map());
    }

    /// Last-chance flush on page leave: a final `user_engagement` snapshot and
    /// a `page_exit`. Runs at most once; returns whether it ran.
    pub fn exit(&mut self, now: DateTime<Utc>, emitter: &Emitter) -> bool {
        if self.exited {
            return false;
        }
        self.exited = true;

        let total = self.elapsed_seconds(now);
        emitter.user_engagement(total, self.state.score);

        let attrs = Attributes::new()
            .with("page_path", self.page_path.as_str())
            .with("time_on_page", total)
            .with("engagement_score", self.state.score)
            .with("session_count", self.state.session_count);
        emitter.emit(names::PAGE_EXIT, attrs.into_map());
        true
    }
}

/// A tracker together with the timers that drive it
#[derive(Debug)]
pub struct EngagementView {
    tracker: EngagementTracker,
    sampler: IntervalTimer,
    idle_check: IntervalTimer,
}

impl EngagementView {
    pub fn start(
        page_path: impl Into<String>,
        config: EngagementConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let sampler = IntervalTimer::start(seconds_delta(config.sample_interval_secs), now);
        let idle_check = IntervalTimer::start(seconds_delta(config.inactivity_check_secs), now);
        Self {
            tracker: EngagementTracker::new(page_path, config, now),
            sampler,
            idle_check,
        }
    }

    pub fn tracker(&self) -> &EngagementTracker {
        &self.tracker
    }

    /// Cancellation handles for both timers
    pub fn handles(&self) -> Vec<TaskHandle> {
        vec![self.sampler.handle(), self.idle_check.handle()]
    }

    /// Run every timer tick due at or before `now`, oldest first. When both
    /// timers are due at the same instant the sample runs first.
    pub fn advance_to(&mut self, now: DateTime<Utc>, emitter: &Emitter) {
        loop {
            let sample_due = self.sampler.next_due().filter(|t| *t <= now);
            let idle_due = self.idle_check.next_due().filter(|t| *t <= now);

            match (sample_due, idle_due) {
                (Some(s), Some(i)) if i < s => {
                    self.idle_check.poll(now);
                    self.tracker.check_inactivity(i, emitter);
                }
                (Some(s), _) => {
                    self.sampler.poll(now);
                    self.tracker.sample(s, emitter);
                }
                (None, Some(i)) => {
                    self.idle_check.poll(now);
                    self.tracker.check_inactivity(i, emitter);
                }
                (None, None) => break,
            }
        }
    }

    /// Interaction at `now`, after catching up on due ticks
    pub fn on_activity(&mut self, kind: ActivityKind, now: DateTime<Utc>, emitter: &Emitter) {
        self.advance_to(now, emitter);
        self.tracker.record_activity(kind, now, emitter);
    }

    pub fn increment_session(&mut self, emitter: &Emitter) {
        self.tracker.increment_session(emitter);
    }

    /// Stop both timers without flushing
    pub fn cancel(&self) {
        self.sampler.cancel();
        self.idle_check.cancel();
    }

    /// Page leave: catch up, stop the timers, flush the exit records.
    /// Safe to call more than once; only the first call emits.
    pub fn teardown(&mut self, now: DateTime<Utc>, emitter: &Emitter) -> bool {
        self.advance_to(now, emitter);
        self.cancel();
        self.tracker.exit(now, emitter)
    }
}

impl Drop for EngagementView {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::DataLayer;
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    fn attached() -> (Arc<DataLayer>, Emitter) {
        let layer = Arc::new(DataLayer::new());
        let emitter = Emitter::new(layer.clone());
        (layer, emitter)
    }

    #[test]
    fn test_always_active_scores_100() {
        let (_layer, emitter) = attached();
        let mut tracker =
            EngagementTracker::new("/user-engagement", EngagementConfig::default(), t0());

        for s in 1..=25 {
            tracker.sample(at(s), &emitter);
            tracker.record_activity(ActivityKind::PointerMove, at(s), &emitter);
            assert_eq!(tracker.score(), 100);
        }
        assert_eq!(tracker.level(), EngagementLevel::High);
    }

    #[test]
    fn test_checkpoint_snapshots_fire_once() {
        let (layer, emitter) = attached();
        let mut view = EngagementView::start("/user-engagement", EngagementConfig::default(), t0());

        // Keep the user busy so the score stays at 100
        for s in (5..=130).step_by(5) {
            view.on_activity(ActivityKind::KeyPress, at(s), &emitter);
        }
        view.advance_to(at(130), &emitter);

        let snapshots: Vec<_> = layer
            .filter("user_engagement")
            .iter()
            .map(|r| r.to_value())
            .collect();
        assert_eq!(
            snapshots,
            vec![
                json!({"event": "user_engagement", "engagement_time_seconds": 30, "engagement_score": 100}),
                json!({"event": "user_engagement", "engagement_time_seconds": 60, "engagement_score": 100}),
                json!({"event": "user_engagement", "engagement_time_seconds": 120, "engagement_score": 100}),
            ]
        );
    }

    #[test]
    fn test_duplicate_sample_within_rearm_guard() {
        let (layer, emitter) = attached();
        let mut tracker = EngagementTracker::new("/", EngagementConfig::default(), t0());
        for s in 1..=30 {
            tracker.sample(at(s), &emitter);
        }
        tracker.sample(at(30) + TimeDelta::milliseconds(200), &emitter);

        assert_eq!(layer.filter("user_engagement").len(), 1);
    }

    #[test]
    fn test_late_tick_still_takes_checkpoint() {
        let (layer, emitter) = attached();
        let mut tracker = EngagementTracker::new("/", EngagementConfig::default(), t0());
        tracker.sample(at(29), &emitter);
        tracker.sample(at(31), &emitter);
        tracker.sample(at(32), &emitter);

        let snapshots = layer.filter("user_engagement");
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].get("engagement_time_seconds"), Some(&json!(31)));
    }

    #[test]
    fn test_goes_inactive_after_silence() {
        let (layer, emitter) = attached();
        let mut view = EngagementView::start("/user-engagement", EngagementConfig::default(), t0());

        view.advance_to(at(60), &emitter);
        assert!(!view.tracker().is_active());

        let inactive = layer.filter("user_inactive");
        assert_eq!(inactive.len(), 1);
        // first idle check past 30s of silence runs at 40s
        assert_eq!(inactive[0].get("inactive_duration"), Some(&json!(40_000)));

        // score holds while idle and is recomputed on the next active sample
        assert_eq!(view.tracker().score(), 100);
        view.on_activity(ActivityKind::Click, at(60), &emitter);
        view.advance_to(at(61), &emitter);
        assert_eq!(view.tracker().state().active_seconds, 41);
        assert_eq!(view.tracker().score(), 67);
    }

    #[test]
    fn test_activity_reactivates_and_debounces_bursts() {
        let (layer, emitter) = attached();
        let mut view = EngagementView::start("/user-engagement", EngagementConfig::default(), t0());
        view.advance_to(at(45), &emitter);
        assert!(!view.tracker().is_active());

        // one burst of pointer movement, then a separate click
        for ms in (0..500).step_by(16) {
            view.on_activity(
                ActivityKind::PointerMove,
                at(45) + TimeDelta::milliseconds(ms),
                &emitter,
            );
        }
        view.on_activity(ActivityKind::Click, at(50), &emitter);

        assert!(view.tracker().is_active());
        let activity = layer.filter("user_activity");
        assert_eq!(activity.len(), 2);
        assert_eq!(activity[0].get("interaction"), Some(&json!("pointer_move")));
        assert_eq!(activity[0].get("time_on_page"), Some(&json!(45)));
        assert_eq!(activity[1].get("interaction"), Some(&json!("click")));
    }

    #[test]
    fn test_zero_debounce_reports_every_interaction() {
        let (layer, emitter) = attached();
        let config = EngagementConfig {
            activity_debounce_ms: 0,
            ..EngagementConfig::default()
        };
        let mut tracker = EngagementTracker::new("/", config, t0());
        for _ in 0..3 {
            tracker.record_activity(ActivityKind::Scroll, at(1), &emitter);
        }
        assert_eq!(layer.filter("user_activity").len(), 3);
    }

    #[test]
    fn test_teardown_flushes_once_and_stops_timers() {
        let (layer, emitter) = attached();
        let mut view = EngagementView::start("/user-engagement", EngagementConfig::default(), t0());
        view.increment_session(&emitter);
        let handles = view.handles();

        assert!(view.teardown(at(12), &emitter));
        assert!(!view.teardown(at(20), &emitter));
        assert!(handles.iter().all(TaskHandle::is_cancelled));

        let before = layer.len();
        view.advance_to(at(400), &emitter);
        assert_eq!(layer.len(), before);

        let exits = layer.filter("page_exit");
        assert_eq!(exits.len(), 1);
        assert_eq!(
            exits[0].to_value(),
            json!({
                "event": "page_exit",
                "page_path": "/user-engagement",
                "time_on_page": 12,
                "engagement_score": 100,
                "session_count": 2
            })
        );
        let names = layer.event_names();
        assert_eq!(&names[names.len() - 2..], ["user_engagement", "page_exit"]);
    }

    #[test]
    fn test_exit_fires_after_sampling_stopped() {
        let (layer, emitter) = attached();
        let mut view = EngagementView::start("/", EngagementConfig::default(), t0());
        view.advance_to(at(5), &emitter);
        view.cancel();

        assert!(view.teardown(at(90), &emitter));
        let final_snapshot = layer.filter("user_engagement");
        assert_eq!(final_snapshot.len(), 1);
        assert_eq!(final_snapshot[0].get("engagement_time_seconds"), Some(&json!(90)));
        assert_eq!(final_snapshot[0].get("engagement_score"), Some(&json!(100)));
    }

    #[test]
    fn test_session_increment_event() {
        let (layer, emitter) = attached();
        let mut tracker = EngagementTracker::new("/", EngagementConfig::default(), t0());
        tracker.increment_session(&emitter);
        tracker.increment_session(&emitter);

        let events = layer.filter("session_increment");
        assert_eq!(events[1].get("new_session_count"), Some(&json!(3)));
        assert_eq!(tracker.state().session_count, 3);
    }
}

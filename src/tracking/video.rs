//! Video engagement tracking
//!
//! Each video element gets its own [`VideoTracker`], owning its own milestone
//! gate. Trackers live in a [`VideoRegistry`] keyed by video id and are disposed
//! explicitly when the video goes away.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::emitter::Emitter;
use crate::tracking::gate::{progress_percent, ThresholdGate, DEFAULT_MILESTONES};
use crate::types::VideoStatus;

/// Playback state as last reported by the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Completed,
}

/// Milestone and lifecycle tracker for one video
#[derive(Debug, Clone)]
pub struct VideoTracker {
    video_id: String,
    title: String,
    gate: ThresholdGate,
    state: PlaybackState,
    current_time: f64,
    duration: Option<f64>,
    progress: u8,
}

impl VideoTracker {
    pub fn new(
        video_id: impl Into<String>,
        title: impl Into<String>,
        milestones: impl IntoIterator<Item = u8>,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            title: title.into(),
            gate: ThresholdGate::new(milestones),
            state: PlaybackState::Idle,
            current_time: 0.0,
            duration: None,
            progress: 0,
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Last computed progress, in percent
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn gate(&self) -> &ThresholdGate {
        &self.gate
    }

    pub fn on_play(&mut self, emitter: &Emitter) {
        self.state = PlaybackState::Playing;
        self.emit(emitter, VideoStatus::Play, None);
    }

    pub fn on_pause(&mut self, emitter: &Emitter) {
        self.state = PlaybackState::Paused;
        self.emit(emitter, VideoStatus::Pause, None);
    }

    pub fn on_ended(&mut self, emitter: &Emitter) {
        self.state = PlaybackState::Completed;
        self.emit(emitter, VideoStatus::Complete, None);
    }

    /// Handle a `timeupdate` tick; returns the milestones fired by it.
    /// Ticks with an unknown or zero duration are skipped.
    pub fn on_time_update(
        &mut self,
        current_time: f64,
        duration: f64,
        emitter: &Emitter,
    ) -> Vec<u8> {
        let Some(progress) = self.measure(current_time, duration) else {
            return Vec::new();
        };
        self.fire_milestones(progress, emitter)
    }

    /// Handle a completed seek. The `seek` record carries the new position;
    /// milestones crossed by seeking forward fire right after it. Seeks with
    /// an unknown or zero duration are skipped.
    pub fn on_seeked(&mut self, current_time: f64, duration: f64, emitter: &Emitter) -> Vec<u8> {
        let Some(progress) = self.measure(current_time, duration) else {
            return Vec::new();
        };
        self.emit(emitter, VideoStatus::Seek, Some(self.progress));
        self.fire_milestones(progress, emitter)
    }

    /// Replay from zero: clear every milestone, then report a fresh `play`
    pub fn restart(&mut self, emitter: &Emitter) {
        self.gate.reset();
        self.current_time = 0.0;
        self.progress = 0;
        debug!(video_id = %self.video_id, "video restarted, milestones cleared");
        self.on_play(emitter);
    }

    fn measure(&mut self, current_time: f64, duration: f64) -> Option<f64> {
        let Some(progress) = progress_percent(current_time, duration) else {
            debug!(
                video_id = %self.video_id,
                duration,
                "video duration unavailable, skipping tick"
            );
            return None;
        };
        self.current_time = current_time;
        self.duration = Some(duration);
        self.progress = progress as u8;
        Some(progress)
    }

    fn fire_milestones(&mut self, progress: f64, emitter: &Emitter) -> Vec<u8> {
        let fired = self.gate.observe(progress);
        for milestone in &fired {
            self.emit(emitter, VideoStatus::Progress, Some(*milestone));
        }
        fired
    }

    fn emit(&self, emitter: &Emitter, status: VideoStatus, progress: Option<u8>) {
        emitter.video_event(&self.video_id, &self.title, status, progress);
    }
}

/// Video trackers keyed by video id
#[derive(Debug, Clone)]
pub struct VideoRegistry {
    milestones: Vec<u8>,
    trackers: HashMap<String, VideoTracker>,
}

impl Default for VideoRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MILESTONES)
    }
}

impl VideoRegistry {
    /// Registry whose trackers all use `milestones`
    pub fn new(milestones: impl IntoIterator<Item = u8>) -> Self {
        Self {
            milestones: milestones.into_iter().collect(),
            trackers: HashMap::new(),
        }
    }

    /// Tracker for `video_id`, created on first use
    pub fn register(&mut self, video_id: &str, title: &str) -> &mut VideoTracker {
        let milestones = &self.milestones;
        self.trackers
            .entry(video_id.to_string())
            .or_insert_with(|| VideoTracker::new(video_id, title, milestones.iter().copied()))
    }

    pub fn get(&self, video_id: &str) -> Option<&VideoTracker> {
        self.trackers.get(video_id)
    }

    pub fn get_mut(&mut self, video_id: &str) -> Option<&mut VideoTracker> {
        self.trackers.get_mut(video_id)
    }

    /// Drop the tracker for a removed video
    pub fn dispose(&mut self, video_id: &str) -> Option<VideoTracker> {
        let removed = self.trackers.remove(video_id);
        if removed.is_some() {
            debug!(video_id, "video tracker disposed");
        }
        removed
    }

    pub fn dispose_all(&mut self) {
        self.trackers.clear();
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

//! Threshold-gated and time-based trackers
//!
//! Source signals (scroll metrics, video time updates, activity, clock ticks)
//! enter here and leave as records on the emitter:
//!
//! - [`gate`]: fire-once milestone engine shared by scroll and video
//! - [`scroll`]: page scroll depth milestones
//! - [`video`]: per-video progress milestones and playback lifecycle
//! - [`engagement`]: active/idle scoring with checkpoint snapshots

pub mod engagement;
pub mod gate;
pub mod scroll;
pub mod video;

pub use engagement::{EngagementConfig, EngagementState, EngagementTracker, EngagementView};
pub use gate::{progress_percent, ThresholdGate, DEFAULT_MILESTONES};
pub use scroll::{ScrollMetrics, ScrollTracker};
pub use video::{PlaybackState, VideoRegistry, VideoTracker};

//! Tagpulse - analytics instrumentation core feeding an ordered data layer
//!
//! Tagpulse turns page-level observations into structured records pushed onto a
//! shared, append-only data layer that downstream tag managers consume:
//! observation → threshold gate / engagement scorer → emitter → data layer.
//!
//! ## Modules
//!
//! - **Sink & Emitter**: The data layer and the category helpers that push to it
//! - **Tracking**: Scroll and video milestone gates, engagement scoring
//! - **Ecommerce**: Product, cart, checkout and purchase records
//! - **Identity**: Referral id resolution against persistent storage
//! - **Page & Replay**: A page's tracking lifecycle, driven by timestamped UI signals

pub mod capture;
pub mod config;
pub mod content;
pub mod ecommerce;
pub mod emitter;
pub mod error;
pub mod identity;
pub mod page;
pub mod replay;
pub mod scheduler;
pub mod schema;
pub mod sink;
pub mod tracking;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::TrackingConfig;
pub use emitter::Emitter;
pub use error::TrackError;
pub use page::PageSession;
pub use sink::{DataLayer, EventSink, SinkSlot};
pub use types::{Attributes, EventRecord};

// Tracker exports
pub use ecommerce::{CartLine, EcommerceTracker, Product, Transaction};
pub use tracking::{EngagementTracker, ScrollTracker, ThresholdGate, VideoTracker};

// Identity and replay exports
pub use identity::{IdentityResolver, IdentityStore};
pub use replay::{replay, Replayer, TimedSignal, UiSignal};

/// Tagpulse version reported by the CLI and FFI
pub const TAGPULSE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported in diagnostics
pub const PRODUCER_NAME: &str = "tagpulse";

//! Page session
//!
//! One [`PageSession`] per page view. It owns every per-page tracker and the
//! emitter they write through, and is the only thing a host needs to keep
//! around between UI callbacks. The data layer itself lives in a [`SinkSlot`]
//! owned by the host, so it survives client-side navigations between pages.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::capture::{CaptureOutcome, ErrorCapture, ErrorReport};
use crate::config::TrackingConfig;
use crate::content::GenerationTracker;
use crate::ecommerce::EcommerceTracker;
use crate::emitter::Emitter;
use crate::error::TrackError;
use crate::identity::{IdentityResolver, IdentityStore, Resolution};
use crate::sink::{DataLayer, EventSink, SinkSlot};
use crate::tracking::{
    EngagementTracker, EngagementView, ScrollMetrics, ScrollTracker, VideoRegistry, VideoTracker,
};
use crate::types::{names, ActivityKind, EventRecord};

/// Base used to resolve relative page URLs such as `/pricing?ref_id=abc`
const RELATIVE_BASE: &str = "http://localhost/";

/// Parse `url`, resolving it against a local origin when it is relative
fn absolute_url(url: &str) -> Option<Url> {
    Url::parse(url)
        .or_else(|_| Url::parse(RELATIVE_BASE).and_then(|base| base.join(url)))
        .ok()
}

/// Tracking state for one page view
#[derive(Debug)]
pub struct PageSession {
    id: Uuid,
    page_path: String,
    layer: Arc<DataLayer>,
    emitter: Emitter,
    identity: Option<Resolution>,
    scroll: ScrollTracker,
    videos: VideoRegistry,
    engagement: EngagementView,
    errors: ErrorCapture,
    content: GenerationTracker,
    closed: bool,
}

impl PageSession {
    /// Open a page view at `url`.
    ///
    /// Creates the data layer on first use (appending the `gtm.js` bootstrap
    /// record when the remote loader is enabled), resolves the referral id,
    /// starts the engagement timers and emits `page_view`.
    pub fn open<S: IdentityStore>(
        config: &TrackingConfig,
        slot: &SinkSlot,
        store: S,
        url: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let fresh = !slot.is_initialized();
        let layer = slot.ensure();
        if fresh && config.loader_enabled() {
            let mut attrs = Map::new();
            attrs.insert("gtm.start".to_string(), Value::from(now.timestamp_millis()));
            layer.push(EventRecord::new(names::GTM_JS, attrs));
        }

        let parsed = absolute_url(url);
        let page_path = parsed
            .as_ref()
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| "/".to_string());

        let resolver = IdentityResolver::with_keys(
            store,
            config.ref_id_storage_key.as_str(),
            config.ref_id_param.as_str(),
        );
        let identity = resolver.resolve(parsed.as_ref().map(Url::as_str));

        let ref_id = identity
            .as_ref()
            .filter(|_| config.attach_ref_id)
            .map(|r| r.ref_id.clone());
        let emitter = Emitter::new(layer.clone()).with_ref_id(ref_id);

        let id = Uuid::new_v4();
        let ref_id_shown = identity.as_ref().map(|r| r.ref_id.as_str());
        info!(%id, page = %page_path, ref_id = ?ref_id_shown, "page opened");

        let session = Self {
            id,
            scroll: ScrollTracker::new(
                page_path.as_str(),
                config.scroll_milestones.iter().copied(),
            ),
            videos: VideoRegistry::new(config.video_milestones.iter().copied()),
            engagement: EngagementView::start(page_path.as_str(), config.engagement.clone(), now),
            errors: ErrorCapture::new(emitter.clone()),
            content: GenerationTracker::new(emitter.clone()),
            page_path,
            layer,
            emitter,
            identity,
            closed: false,
        };
        session.emitter.page_view(&session.page_path, title, None);
        session
    }

    /// Instance id, unique per page view
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn page_path(&self) -> &str {
        &self.page_path
    }

    pub fn data_layer(&self) -> &Arc<DataLayer> {
        &self.layer
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn identity(&self) -> Option<&Resolution> {
        self.identity.as_ref()
    }

    pub fn scroll(&self) -> &ScrollTracker {
        &self.scroll
    }

    pub fn video(&self, video_id: &str) -> Option<&VideoTracker> {
        self.videos.get(video_id)
    }

    pub fn engagement(&self) -> &EngagementTracker {
        self.engagement.tracker()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), TrackError> {
        if self.closed {
            return Err(TrackError::SessionClosed);
        }
        Ok(())
    }

    /// Run every engagement timer due at or before `now`
    pub fn advance_to(&mut self, now: DateTime<Utc>) -> Result<(), TrackError> {
        self.ensure_open()?;
        self.engagement.advance_to(now, &self.emitter);
        Ok(())
    }

    /// Pointer, keyboard or click activity
    pub fn on_activity(
        &mut self,
        kind: ActivityKind,
        now: DateTime<Utc>,
    ) -> Result<(), TrackError> {
        self.ensure_open()?;
        self.engagement.on_activity(kind, now, &self.emitter);
        Ok(())
    }

    /// A scroll event: counts as activity and feeds the depth milestones
    pub fn on_scroll(
        &mut self,
        metrics: ScrollMetrics,
        now: DateTime<Utc>,
    ) -> Result<Vec<u8>, TrackError> {
        self.ensure_open()?;
        self.engagement.on_activity(ActivityKind::Scroll, now, &self.emitter);
        Ok(self.scroll.observe(metrics, &self.emitter))
    }

    /// Tracker for a video on this page, registered on first use
    pub fn video_mut(
        &mut self,
        video_id: &str,
        title: &str,
    ) -> Result<(&mut VideoTracker, &Emitter), TrackError> {
        self.ensure_open()?;
        Ok((self.videos.register(video_id, title), &self.emitter))
    }

    /// The video element was removed from the page
    pub fn remove_video(&mut self, video_id: &str) -> bool {
        self.videos.dispose(video_id).is_some()
    }

    pub fn ecommerce(&self) -> Result<EcommerceTracker<'_>, TrackError> {
        self.ensure_open()?;
        Ok(self.emitter.ecommerce())
    }

    pub fn content(&mut self) -> Result<&mut GenerationTracker, TrackError> {
        self.ensure_open()?;
        Ok(&mut self.content)
    }

    pub fn capture_error(&self, report: &ErrorReport) -> CaptureOutcome {
        self.errors.capture_error(report)
    }

    pub fn capture_rejection(&self, reason: &str, stack: Option<&str>) -> CaptureOutcome {
        self.errors.capture_rejection(reason, stack)
    }

    pub fn increment_session(&mut self) -> Result<(), TrackError> {
        self.ensure_open()?;
        self.engagement.increment_session(&self.emitter);
        Ok(())
    }

    /// Arbitrary event through this page's emitter
    pub fn track_event(
        &self,
        event: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<(), TrackError> {
        self.ensure_open()?;
        self.emitter.track_event(event, params);
        Ok(())
    }

    /// Page leave: stop the timers, flush the engagement exit records and
    /// drop every per-page tracker. Only the first call does anything.
    pub fn teardown(&mut self, now: DateTime<Utc>) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.engagement.teardown(now, &self.emitter);
        self.videos.dispose_all();
        debug!(id = %self.id, page = %self.page_path, "page torn down");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecommerce::{CartLine, Product};
    use crate::identity::{MemoryStore, UnavailableStore, REF_ID_STORAGE_KEY};
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    fn open_default(slot: &SinkSlot, url: &str, title: &str) -> PageSession {
        PageSession::open(&TrackingConfig::default(), slot, MemoryStore::new(), url, title, t0())
    }

    #[test]
    fn test_open_bootstraps_and_tracks_page_view() {
        let config = TrackingConfig::default().with_container_id("GTM-ABC1234");
        let slot = SinkSlot::new();
        let session = PageSession::open(
            &config,
            &slot,
            MemoryStore::new(),
            "https://shop.example.com/products?ref_id=spring",
            "Products",
            t0(),
        );

        let records: Vec<_> = session
            .data_layer()
            .snapshot()
            .iter()
            .map(|r| r.to_value())
            .collect();
        assert_eq!(
            records,
            vec![
                json!({"event": "gtm.js", "gtm.start": t0().timestamp_millis()}),
                json!({"event": "page_view", "page_path": "/products", "page_title": "Products", "ref_id": "spring"}),
            ]
        );
        assert_eq!(session.identity().map(|r| r.ref_id.as_str()), Some("spring"));
    }

    #[test]
    fn test_placeholder_container_skips_bootstrap_only() {
        let config = TrackingConfig::default().with_container_id("GTM-XXXXXXX");
        let slot = SinkSlot::new();
        let session = PageSession::open(&config, &slot, UnavailableStore, "/", "Home", t0());

        assert_eq!(session.data_layer().event_names(), vec!["page_view".to_string()]);
        assert!(session.identity().is_none());
    }

    #[test]
    fn test_navigation_shares_layer_and_identity() {
        let config = TrackingConfig::default().with_container_id("GTM-ABC1234");
        let slot = SinkSlot::new();
        let store = Arc::new(MemoryStore::new());

        let mut first =
            PageSession::open(&config, &slot, store.clone(), "/?ref_id=abc", "Home", t0());
        first.teardown(at(5));
        let second =
            PageSession::open(&config, &slot, store.clone(), "/video-tracking", "Videos", at(5));

        assert!(Arc::ptr_eq(first.data_layer(), second.data_layer()));
        assert_ne!(first.id(), second.id());
        assert_eq!(second.data_layer().filter("gtm.js").len(), 1);
        assert_eq!(second.identity().map(|r| r.ref_id.as_str()), Some("abc"));
        assert_eq!(store.get(REF_ID_STORAGE_KEY).unwrap(), Some("abc".to_string()));

        let last = second.data_layer().snapshot().pop().unwrap();
        assert_eq!(last.get("page_path"), Some(&json!("/video-tracking")));
        assert_eq!(last.get("ref_id"), Some(&json!("abc")));
    }

    #[test]
    fn test_ref_id_attachment_can_be_disabled() {
        let config = TrackingConfig {
            attach_ref_id: false,
            ..TrackingConfig::default()
        };
        let slot = SinkSlot::new();
        let session =
            PageSession::open(&config, &slot, MemoryStore::new(), "/?ref_id=abc", "Home", t0());
        assert!(session.identity().is_some());
        assert!(session.data_layer().snapshot()[0].get("ref_id").is_none());
    }

    #[test]
    fn test_scroll_and_video_through_session() {
        let slot = SinkSlot::new();
        let mut session = open_default(&slot, "/demo", "Demo");

        let metrics = ScrollMetrics {
            scroll_top: 1500.0,
            viewport_height: 1000.0,
            document_height: 3000.0,
        };
        assert_eq!(session.on_scroll(metrics, at(1)).unwrap(), vec![25, 50, 75]);

        let (video, emitter) = session.video_mut("intro_video", "Introduction").unwrap();
        video.on_play(emitter);
        video.on_time_update(30.0, 60.0, emitter);
        assert_eq!(session.video("intro_video").unwrap().gate().fired(), vec![25, 50]);

        assert!(session.remove_video("intro_video"));
        assert!(session.video("intro_video").is_none());
    }

    #[test]
    fn test_oversized_engagement_spans_do_not_overflow() {
        let mut config = TrackingConfig::default();
        config.engagement.sample_interval_secs = 1_000_000_000_000_000;
        config.engagement.inactivity_check_secs = u64::MAX;
        config.engagement.inactivity_threshold_secs = 10_000_000_000_000_000;
        config.engagement.activity_debounce_ms = u64::MAX;
        assert!(matches!(config.validate(), Err(TrackError::InvalidConfig(_))));

        let slot = SinkSlot::new();
        let mut session = PageSession::open(&config, &slot, MemoryStore::new(), "/", "Home", t0());
        session.on_activity(ActivityKind::Click, at(1)).unwrap();
        session.advance_to(at(3600)).unwrap();
        assert!(session.teardown(at(3601)));

        assert_eq!(session.data_layer().filter("user_inactive").len(), 0);
        assert_eq!(session.data_layer().filter("page_exit").len(), 1);
    }

    #[test]
    fn test_teardown_is_final() {
        let slot = SinkSlot::new();
        let mut session = open_default(&slot, "/", "Home");
        session.on_activity(ActivityKind::Click, at(3)).unwrap();

        assert!(session.teardown(at(10)));
        assert!(!session.teardown(at(11)));
        assert!(session.is_closed());

        let before = session.data_layer().len();
        assert!(matches!(session.advance_to(at(600)), Err(TrackError::SessionClosed)));
        assert!(matches!(session.increment_session(), Err(TrackError::SessionClosed)));
        assert!(session.ecommerce().is_err());
        assert_eq!(session.data_layer().len(), before);
        assert_eq!(session.data_layer().filter("page_exit").len(), 1);
    }

    #[test]
    fn test_ecommerce_and_errors_through_session() {
        let slot = SinkSlot::new();
        let session = open_default(&slot, "/ecommerce", "Shop");

        let product = Product::new("SKU_001", "Headphones", "AudioTech", "Electronics", 299.99);
        let line = CartLine::new(product, 1);
        session.ecommerce().unwrap().add_to_cart(&line, None, None);
        let report = ErrorReport::new("boom").at("chrome-extension://x/y.js", 1, 1);
        let outcome = session.capture_error(&report);
        assert_eq!(outcome, CaptureOutcome::Ignored);

        assert_eq!(
            session.data_layer().event_names(),
            vec!["page_view".to_string(), "add_to_cart".to_string()]
        );
    }
}

//! Signal replay
//!
//! A recorded UI session is a sequence of timestamped [`UiSignal`]s. Replaying
//! it drives real [`PageSession`]s against a fresh data layer, which makes the
//! whole tracking surface scriptable from JSON: the CLI, the FFI and
//! integration tests all go through here.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::capture::ErrorReport;
use crate::config::TrackingConfig;
use crate::content::{GenerationTicket, DEFAULT_FAILURE};
use crate::ecommerce::{new_transaction_id, CartLine, Product, Transaction};
use crate::error::TrackError;
use crate::identity::{IdentityStore, MemoryStore};
use crate::page::PageSession;
use crate::sink::{DataLayer, SinkSlot};
use crate::tracking::ScrollMetrics;
use crate::types::ActivityKind;

/// One UI-level source signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiSignal {
    /// Navigate to a page; closes the current one first
    Open { url: String, title: String },
    Scroll(ScrollMetrics),
    VideoPlay { video_id: String, title: String },
    VideoPause { video_id: String, title: String },
    VideoTime {
        video_id: String,
        title: String,
        current_time: f64,
        duration: f64,
    },
    VideoSeeked {
        video_id: String,
        title: String,
        current_time: f64,
        duration: f64,
    },
    VideoEnded { video_id: String, title: String },
    VideoRestart { video_id: String, title: String },
    VideoRemoved { video_id: String },
    Activity { kind: ActivityKind },
    /// Let the clock run without any interaction
    Tick,
    /// Page leave
    Leave,
    SessionIncrement,
    ViewItems { products: Vec<Product> },
    SelectItem {
        product: Product,
        #[serde(default)]
        position: Option<u32>,
    },
    AddToCart {
        line: CartLine,
        #[serde(default)]
        value: Option<f64>,
        #[serde(default)]
        currency: Option<String>,
    },
    RemoveFromCart {
        line: CartLine,
        #[serde(default)]
        value: Option<f64>,
        #[serde(default)]
        currency: Option<String>,
    },
    Checkout {
        step: u32,
        lines: Vec<CartLine>,
        #[serde(default)]
        option: Option<String>,
    },
    /// A completed order. A missing transaction id is generated.
    Purchase {
        #[serde(default)]
        transaction_id: Option<String>,
        lines: Vec<CartLine>,
        value: f64,
        #[serde(default)]
        tax: Option<f64>,
        #[serde(default)]
        shipping: Option<f64>,
        #[serde(default)]
        currency: Option<String>,
    },
    ButtonClick {
        name: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        location: Option<String>,
    },
    LinkClick {
        url: String,
        #[serde(default)]
        text: Option<String>,
    },
    FormInput {
        form_name: String,
        input_name: String,
        interaction_type: String,
    },
    FormSubmit {
        name: String,
        #[serde(default)]
        id: Option<String>,
    },
    FormComplete { form_name: String, fields: usize },
    Error(ErrorReport),
    Rejection {
        reason: String,
        #[serde(default)]
        stack: Option<String>,
    },
    GenerateBegin {
        story_id: String,
        category: String,
        cluster: String,
    },
    GenerateSucceed { story_id: String },
    GenerateFail {
        story_id: String,
        #[serde(default)]
        error_type: Option<String>,
    },
    Copy { category: String, cluster: String },
    SetUserProperties {
        user_id: String,
        #[serde(default)]
        properties: Option<Map<String, Value>>,
    },
    Custom {
        event: String,
        #[serde(default)]
        params: Option<Map<String, Value>>,
    },
}

/// A signal and the instant it happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedSignal {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub signal: UiSignal,
}

/// Parse a script given either as a JSON array or as NDJSON
pub fn parse_script(input: &str) -> Result<Vec<TimedSignal>, TrackError> {
    if input.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(input)?);
    }

    let mut signals = Vec::new();
    for (line_num, line) in input.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<TimedSignal>(trimmed) {
            Ok(signal) => signals.push(signal),
            Err(e) => {
                return Err(TrackError::ParseError(format!(
                    "Failed to parse line {}: {}",
                    line_num + 1,
                    e
                )));
            }
        }
    }
    Ok(signals)
}

/// Drives page sessions from signals, one page at a time
pub struct Replayer {
    config: TrackingConfig,
    store: Arc<dyn IdentityStore>,
    slot: SinkSlot,
    page: Option<PageSession>,
    pending: HashMap<String, GenerationTicket>,
    last_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Replayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replayer")
            .field("config", &self.config)
            .field("page", &self.page)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Replayer {
    /// Replayer with an in-memory identity store
    pub fn new(config: TrackingConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(config: TrackingConfig, store: Arc<dyn IdentityStore>) -> Self {
        Self {
            config,
            store,
            slot: SinkSlot::new(),
            page: None,
            pending: HashMap::new(),
            last_at: None,
        }
    }

    /// The data layer, once a page has been opened
    pub fn data_layer(&self) -> Option<Arc<DataLayer>> {
        self.slot.get()
    }

    pub fn page(&self) -> Option<&PageSession> {
        self.page.as_ref()
    }

    /// Apply one signal. Signals must arrive in time order; a signal older
    /// than its predecessor is rejected.
    pub fn apply(&mut self, timed: &TimedSignal) -> Result<(), TrackError> {
        let now = timed.at;
        if let Some(last) = self.last_at {
            if now < last {
                return Err(TrackError::ParseError(format!(
                    "signal at {now} is earlier than the previous one at {last}"
                )));
            }
        }
        self.last_at = Some(now);

        if let UiSignal::Open { url, title } = &timed.signal {
            if let Some(mut previous) = self.page.take() {
                previous.teardown(now);
            }
            self.pending.clear();
            self.page = Some(PageSession::open(
                &self.config,
                &self.slot,
                self.store.clone(),
                url,
                title,
                now,
            ));
            return Ok(());
        }

        let Some(page) = self.page.as_mut() else {
            return Err(TrackError::NoPage);
        };
        if !matches!(timed.signal, UiSignal::Leave) {
            page.advance_to(now)?;
        }

        match &timed.signal {
            UiSignal::Open { .. } | UiSignal::Tick => {}
            UiSignal::Scroll(metrics) => {
                page.on_scroll(*metrics, now)?;
            }
            UiSignal::VideoPlay { video_id, title } => {
                let (video, emitter) = page.video_mut(video_id, title)?;
                video.on_play(emitter);
            }
            UiSignal::VideoPause { video_id, title } => {
                let (video, emitter) = page.video_mut(video_id, title)?;
                video.on_pause(emitter);
            }
            UiSignal::VideoTime {
                video_id,
                title,
                current_time,
                duration,
            } => {
                let (video, emitter) = page.video_mut(video_id, title)?;
                video.on_time_update(*current_time, *duration, emitter);
            }
            UiSignal::VideoSeeked {
                video_id,
                title,
                current_time,
                duration,
            } => {
                let (video, emitter) = page.video_mut(video_id, title)?;
                video.on_seeked(*current_time, *duration, emitter);
            }
            UiSignal::VideoEnded { video_id, title } => {
                let (video, emitter) = page.video_mut(video_id, title)?;
                video.on_ended(emitter);
            }
            UiSignal::VideoRestart { video_id, title } => {
                let (video, emitter) = page.video_mut(video_id, title)?;
                video.restart(emitter);
            }
            UiSignal::VideoRemoved { video_id } => {
                page.remove_video(video_id);
            }
            UiSignal::Activity { kind } => page.on_activity(*kind, now)?,
            UiSignal::Leave => {
                page.teardown(now);
                self.page = None;
                self.pending.clear();
            }
            UiSignal::SessionIncrement => page.increment_session()?,
            UiSignal::ViewItems { products } => page.ecommerce()?.product_impressions(products),
            UiSignal::SelectItem { product, position } => {
                page.ecommerce()?.product_click(product, *position)
            }
            UiSignal::AddToCart {
                line,
                value,
                currency,
            } => page
                .ecommerce()?
                .add_to_cart(line, *value, currency.as_deref()),
            UiSignal::RemoveFromCart {
                line,
                value,
                currency,
            } => page
                .ecommerce()?
                .remove_from_cart(line, *value, currency.as_deref()),
            UiSignal::Checkout {
                step,
                lines,
                option,
            } => page
                .ecommerce()?
                .checkout_step(*step, lines, option.as_deref()),
            UiSignal::Purchase {
                transaction_id,
                lines,
                value,
                tax,
                shipping,
                currency,
            } => {
                let transaction = Transaction {
                    transaction_id: transaction_id.clone().unwrap_or_else(new_transaction_id),
                    lines: lines.clone(),
                    value: *value,
                    tax: *tax,
                    shipping: *shipping,
                    currency: currency.clone(),
                };
                page.ecommerce()?.purchase(&transaction);
            }
            UiSignal::ButtonClick {
                name,
                text,
                location,
            } => page
                .emitter()
                .button_click(name, text.as_deref(), location.as_deref()),
            UiSignal::LinkClick { url, text } => {
                page.emitter().external_link_click(url, text.as_deref())
            }
            UiSignal::FormInput {
                form_name,
                input_name,
                interaction_type,
            } => page
                .emitter()
                .form_input_interaction(form_name, input_name, interaction_type),
            UiSignal::FormSubmit { name, id } => page.emitter().form_submit(name, id.as_deref()),
            UiSignal::FormComplete { form_name, fields } => {
                page.emitter().form_complete(form_name, *fields)
            }
            UiSignal::Error(report) => {
                page.capture_error(report);
            }
            UiSignal::Rejection { reason, stack } => {
                page.capture_rejection(reason, stack.as_deref());
            }
            UiSignal::GenerateBegin {
                story_id,
                category,
                cluster,
            } => match page.content()?.begin(story_id, category, cluster, now) {
                Ok(ticket) => {
                    self.pending.insert(story_id.clone(), ticket);
                }
                Err(e) => debug!(error = %e, "generate click ignored"),
            },
            UiSignal::GenerateSucceed { story_id } => match self.pending.remove(story_id) {
                Some(ticket) => {
                    page.content()?.succeed(ticket, now);
                }
                None => warn!(story_id = %story_id, "no generation in flight for story"),
            },
            UiSignal::GenerateFail {
                story_id,
                error_type,
            } => match self.pending.remove(story_id) {
                Some(ticket) => {
                    let error_type = error_type.as_deref().unwrap_or(DEFAULT_FAILURE);
                    page.content()?.fail(ticket, error_type);
                }
                None => warn!(story_id = %story_id, "no generation in flight for story"),
            },
            UiSignal::Copy { category, cluster } => page.content()?.copy(category, cluster),
            UiSignal::SetUserProperties {
                user_id,
                properties,
            } => page
                .emitter()
                .set_user_properties(user_id, properties.clone()),
            UiSignal::Custom { event, params } => page.track_event(event, params.clone())?,
        }
        Ok(())
    }

    /// Apply every signal in order
    pub fn apply_all(&mut self, signals: &[TimedSignal]) -> Result<(), TrackError> {
        signals.iter().try_for_each(|signal| self.apply(signal))
    }

    /// Tear down the open page, if any, at `now`
    pub fn close(&mut self, now: DateTime<Utc>) -> bool {
        self.pending.clear();
        self.page.take().is_some_and(|mut page| page.teardown(now))
    }

    /// Finish the replay and hand back the data layer. An open page is left
    /// as is: no exit records are synthesized.
    pub fn finish(self) -> Arc<DataLayer> {
        self.slot.ensure()
    }
}

/// Replay `signals` against a fresh data layer. When `close_open_page` is set,
/// a page still open after the last signal is torn down at that signal's time.
pub fn replay(
    signals: &[TimedSignal],
    config: TrackingConfig,
    store: Arc<dyn IdentityStore>,
    close_open_page: bool,
) -> Result<Arc<DataLayer>, TrackError> {
    let mut replayer = Replayer::with_store(config, store);
    replayer.apply_all(signals)?;
    if close_open_page {
        if let Some(last) = signals.last() {
            replayer.close(last.at);
        }
    }
    Ok(replayer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::validate_all;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn replay_default(
        signals: &[TimedSignal],
        close_open_page: bool,
    ) -> Result<Arc<DataLayer>, TrackError> {
        replay(signals, TrackingConfig::default(), Arc::new(MemoryStore::new()), close_open_page)
    }

    const SESSION: &str = r#"
{"at": "2024-01-15T14:00:00Z", "type": "open", "url": "https://demo.example.com/ecommerce?ref_id=newsletter", "title": "Shop"}
{"at": "2024-01-15T14:00:02Z", "type": "view_items", "products": [{"id": "SKU_001", "name": "Headphones", "brand": "AudioTech", "category": "Electronics", "price": 10.0}]}
{"at": "2024-01-15T14:00:04Z", "type": "add_to_cart", "line": {"id": "SKU_001", "name": "Headphones", "brand": "AudioTech", "category": "Electronics", "price": 10.0, "quantity": 2}}
{"at": "2024-01-15T14:00:06Z", "type": "purchase", "transaction_id": "TXN-1", "value": 20.0, "tax": 1.6, "shipping": 9.99, "lines": [{"id": "SKU_001", "name": "Headphones", "brand": "AudioTech", "category": "Electronics", "price": 10.0, "quantity": 2}]}
{"at": "2024-01-15T14:00:08Z", "type": "leave"}
"#;

    #[test]
    fn test_replay_ndjson_session() {
        let signals = parse_script(SESSION).unwrap();
        assert_eq!(signals.len(), 5);

        let layer = replay_default(&signals, false).unwrap();
        assert_eq!(
            layer.event_names(),
            vec![
                "page_view",
                "view_item_list",
                "add_to_cart",
                "purchase",
                "user_engagement",
                "page_exit",
            ]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
        );
        let purchase = &layer.filter("purchase")[0];
        assert_eq!(purchase.get_path("ecommerce.value"), Some(&json!(20.0)));
        assert_eq!(purchase.get("ref_id"), Some(&json!("newsletter")));
        assert_eq!(validate_all(&layer.snapshot()), vec![]);
    }

    #[test]
    fn test_json_array_script() {
        let script = r#"[
            {"at": "2024-01-15T14:00:00Z", "type": "open", "url": "/video-tracking", "title": "Videos"},
            {"at": "2024-01-15T14:00:01Z", "type": "video_play", "video_id": "intro_video", "title": "Intro"},
            {"at": "2024-01-15T14:00:02Z", "type": "video_seeked", "video_id": "intro_video", "title": "Intro", "current_time": 60.0, "duration": 60.0},
            {"at": "2024-01-15T14:00:03Z", "type": "video_ended", "video_id": "intro_video", "title": "Intro"}
        ]"#;
        let signals = parse_script(script).unwrap();
        let layer = replay_default(&signals, true).unwrap();

        let statuses: Vec<_> = layer
            .filter("video_engagement")
            .iter()
            .map(|r| r.get("video_status").cloned().unwrap())
            .collect();
        assert_eq!(
            statuses,
            vec![
                json!("play"),
                json!("seek"),
                json!("progress"),
                json!("progress"),
                json!("progress"),
                json!("progress"),
                json!("complete"),
            ]
        );
        assert_eq!(layer.filter("page_exit").len(), 1);
    }

    #[test]
    fn test_signal_before_open_rejected() {
        let signals = parse_script(r#"{"at": "2024-01-15T14:00:00Z", "type": "tick"}"#).unwrap();
        let result = replay_default(&signals, false);
        assert!(matches!(result, Err(TrackError::NoPage)));
    }

    #[test]
    fn test_out_of_order_signal_rejected() {
        let script = r#"
{"at": "2024-01-15T14:00:05Z", "type": "open", "url": "/", "title": "Home"}
{"at": "2024-01-15T14:00:01Z", "type": "tick"}
"#;
        let signals = parse_script(script).unwrap();
        let mut replayer = Replayer::new(TrackingConfig::default());
        assert!(replayer.apply(&signals[0]).is_ok());
        assert!(matches!(replayer.apply(&signals[1]), Err(TrackError::ParseError(_))));
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let script =
            "{\"at\": \"2024-01-15T14:00:00Z\", \"type\": \"tick\"}\n\n{\"type\": \"warp\"}\n";
        match parse_script(script) {
            Err(TrackError::ParseError(msg)) => assert!(msg.contains("line 3"), "{msg}"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_generation_flow_and_navigation() {
        let script = r#"
{"at": "2024-01-15T14:00:00Z", "type": "open", "url": "/content-generator", "title": "Generator"}
{"at": "2024-01-15T14:00:01Z", "type": "generate_begin", "story_id": "s1", "category": "tech", "cluster": "AI"}
{"at": "2024-01-15T14:00:01.200Z", "type": "generate_begin", "story_id": "s1", "category": "tech", "cluster": "AI"}
{"at": "2024-01-15T14:00:02.250Z", "type": "generate_succeed", "story_id": "s1"}
{"at": "2024-01-15T14:00:03Z", "type": "copy", "category": "tech", "cluster": "AI"}
{"at": "2024-01-15T14:00:04Z", "type": "open", "url": "/", "title": "Home"}
"#;
        let signals = parse_script(script).unwrap();
        let layer = replay_default(&signals, false).unwrap();

        assert_eq!(layer.filter("generate_click").len(), 1);
        assert_eq!(
            layer.filter("generate_success")[0].get("generation_time_ms"),
            Some(&json!(1250))
        );
        assert_eq!(layer.filter("copy_to_clipboard").len(), 1);
        // navigating away closes the first page before the second opens
        assert_eq!(layer.filter("page_exit").len(), 1);
        assert_eq!(layer.filter("page_view").len(), 2);
    }
}

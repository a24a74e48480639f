//! Event emitter
//!
//! Builds typed records for each event category and appends them to the sink.
//! Every category helper guarantees its required attribute set (see
//! [`crate::schema::contract`]); optional attributes are omitted when absent.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::sink::EventSink;
use crate::types::{names, Attributes, EventRecord, VideoStatus};

/// Attribute attached to every record when an identity is configured
pub const REF_ID_ATTRIBUTE: &str = "ref_id";

/// Typed front door to the data layer.
///
/// An emitter without a sink is headless: every call is a silent no-op, which
/// mirrors evaluating tracking code where no data layer can exist.
#[derive(Clone, Default)]
pub struct Emitter {
    sink: Option<Arc<dyn EventSink>>,
    ref_id: Option<String>,
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("attached", &self.sink.is_some())
            .field("ref_id", &self.ref_id)
            .finish()
    }
}

impl Emitter {
    /// Emitter appending to `sink`
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink: Some(sink),
            ref_id: None,
        }
    }

    /// Emitter with no sink; all emissions are dropped
    pub fn headless() -> Self {
        Self::default()
    }

    /// Attach a referral identifier to every record this emitter produces
    pub fn with_ref_id(mut self, ref_id: Option<String>) -> Self {
        self.ref_id = ref_id;
        self
    }

    pub fn ref_id(&self) -> Option<&str> {
        self.ref_id.as_deref()
    }

    /// Whether emissions reach a sink
    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    /// Append `{event, ...attributes}` to the sink
    pub fn emit(&self, event: &str, mut attributes: Map<String, Value>) {
        let Some(sink) = &self.sink else {
            debug!(event, "no data layer attached, dropping event");
            return;
        };

        if let Some(ref_id) = &self.ref_id {
            attributes
                .entry(REF_ID_ATTRIBUTE)
                .or_insert_with(|| Value::String(ref_id.clone()));
        }

        sink.push(EventRecord::new(event, attributes));
    }

    /// Push an arbitrary named event with optional parameters
    pub fn track_event(&self, event: &str, params: Option<Map<String, Value>>) {
        self.emit(event, params.unwrap_or_default());
    }

    /// `page_view` with caller-supplied custom parameters merged on top
    pub fn page_view(&self, page_path: &str, page_title: &str, custom: Option<Map<String, Value>>) {
        let attrs = Attributes::new()
            .with("page_path", page_path)
            .with("page_title", page_title)
            .merge(custom.unwrap_or_default());
        self.emit(names::PAGE_VIEW, attrs.into_map());
    }

    pub fn button_click(
        &self,
        button_name: &str,
        button_text: Option<&str>,
        location: Option<&str>,
    ) {
        let attrs = Attributes::new()
            .with("button_name", button_name)
            .with_opt("button_text", button_text)
            .with_opt("button_location", location);
        self.emit(names::BUTTON_CLICK, attrs.into_map());
    }

    /// `external_link_click`; `link_domain` is empty for unparseable URLs
    pub fn external_link_click(&self, link_url: &str, link_text: Option<&str>) {
        let attrs = Attributes::new()
            .with("link_url", link_url)
            .with_opt("link_text", link_text)
            .with("link_domain", extract_domain(link_url));
        self.emit(names::EXTERNAL_LINK_CLICK, attrs.into_map());
    }

    pub fn form_submit(&self, form_name: &str, form_id: Option<&str>) {
        let attrs = Attributes::new()
            .with("form_name", form_name)
            .with_opt("form_id", form_id);
        self.emit(names::FORM_SUBMIT, attrs.into_map());
    }

    pub fn form_input_interaction(
        &self,
        form_name: &str,
        input_name: &str,
        interaction_type: &str,
    ) {
        let attrs = Attributes::new()
            .with("form_name", form_name)
            .with("input_name", input_name)
            .with("interaction_type", interaction_type);
        self.emit(names::FORM_INPUT_INTERACTION, attrs.into_map());
    }

    pub fn form_complete(&self, form_name: &str, form_fields: usize) {
        let attrs = Attributes::new()
            .with("form_name", form_name)
            .with("form_fields", form_fields as u64);
        self.emit(names::FORM_COMPLETE, attrs.into_map());
    }

    pub fn scroll_depth(&self, depth: u8, page_path: &str) {
        let attrs = Attributes::new()
            .with("scroll_depth", depth)
            .with("scroll_depth_unit", "percent")
            .with("page_path", page_path);
        self.emit(names::SCROLL_DEPTH, attrs.into_map());
    }

    /// `video_engagement`; `video_progress` is only written for progress and seek
    pub fn video_event(
        &self,
        video_id: &str,
        video_title: &str,
        status: VideoStatus,
        progress: Option<u8>,
    ) {
        let progress = progress.filter(|_| status.carries_progress());
        let attrs = Attributes::new()
            .with("video_id", video_id)
            .with("video_title", video_title)
            .with("video_status", status.as_str())
            .with_opt("video_progress", progress);
        self.emit(names::VIDEO_ENGAGEMENT, attrs.into_map());
    }

    pub fn user_engagement(&self, engagement_time_seconds: u64, engagement_score: u8) {
        let attrs = Attributes::new()
            .with("engagement_time_seconds", engagement_time_seconds)
            .with("engagement_score", engagement_score);
        self.emit(names::USER_ENGAGEMENT, attrs.into_map());
    }

    /// `js_error` with an empty stack when none is known
    pub fn js_error(&self, message: &str, stack: Option<&str>) {
        let attrs = Attributes::new()
            .with("error_message", message)
            .with("error_stack", stack.unwrap_or_default());
        self.emit(names::JS_ERROR, attrs.into_map());
    }

    pub fn set_user_properties(&self, user_id: &str, properties: Option<Map<String, Value>>) {
        let attrs = Attributes::new()
            .with("user_id", user_id)
            .merge(properties.unwrap_or_default());
        self.emit(names::SET_USER_PROPERTIES, attrs.into_map());
    }

    pub fn generate_click(&self, category: &str, cluster: &str) {
        let attrs = Attributes::new()
            .with("button_name", "generate")
            .with("category", category)
            .with("cluster", cluster);
        self.emit(names::GENERATE_CLICK, attrs.into_map());
    }

    pub fn generate_success(&self, generation_time_ms: u64) {
        let attrs = Attributes::new().with("generation_time_ms", generation_time_ms);
        self.emit(names::GENERATE_SUCCESS, attrs.into_map());
    }

    pub fn generate_failed(&self, error_type: &str) {
        let attrs = Attributes::new().with("error_type", error_type);
        self.emit(names::GENERATE_FAILED, attrs.into_map());
    }

    pub fn output_generated(&self, category: &str, cluster: &str) {
        let attrs = Attributes::new()
            .with("category", category)
            .with("cluster", cluster);
        self.emit(names::OUTPUT_GENERATED, attrs.into_map());
    }

    pub fn copy_to_clipboard(&self, category: &str, cluster: &str) {
        let attrs = Attributes::new()
            .with("category", category)
            .with("cluster", cluster);
        self.emit(names::COPY_TO_CLIPBOARD, attrs.into_map());
    }
}

/// Host name of `url`, or an empty string when it cannot be parsed
pub fn extract_domain(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

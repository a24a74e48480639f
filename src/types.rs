//! Core types for the Tagpulse pipeline
//!
//! This module defines the records that flow into the data layer and the small
//! vocabulary enums (video status, activity kind, engagement level) shared by the
//! trackers.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Well-known event names pushed into the data layer
pub mod names {
    pub const PAGE_VIEW: &str = "page_view";
    pub const BUTTON_CLICK: &str = "button_click";
    pub const EXTERNAL_LINK_CLICK: &str = "external_link_click";
    pub const FORM_SUBMIT: &str = "form_submit";
    pub const FORM_INPUT_INTERACTION: &str = "form_input_interaction";
    pub const FORM_COMPLETE: &str = "form_complete";
    pub const SCROLL_DEPTH: &str = "scroll_depth";
    pub const VIDEO_ENGAGEMENT: &str = "video_engagement";
    pub const USER_ENGAGEMENT: &str = "user_engagement";
    pub const USER_ACTIVITY: &str = "user_activity";
    pub const USER_INACTIVE: &str = "user_inactive";
    pub const PAGE_EXIT: &str = "page_exit";
    pub const SESSION_INCREMENT: &str = "session_increment";
    pub const JS_ERROR: &str = "js_error";
    pub const SET_USER_PROPERTIES: &str = "set_user_properties";
    pub const GENERATE_CLICK: &str = "generate_click";
    pub const GENERATE_SUCCESS: &str = "generate_success";
    pub const GENERATE_FAILED: &str = "generate_failed";
    pub const OUTPUT_GENERATED: &str = "output_generated";
    pub const COPY_TO_CLIPBOARD: &str = "copy_to_clipboard";
    pub const GTM_JS: &str = "gtm.js";

    pub const VIEW_ITEM_LIST: &str = "view_item_list";
    pub const SELECT_ITEM: &str = "select_item";
    pub const ADD_TO_CART: &str = "add_to_cart";
    pub const REMOVE_FROM_CART: &str = "remove_from_cart";
    pub const BEGIN_CHECKOUT: &str = "begin_checkout";
    pub const PURCHASE: &str = "purchase";
}

/// Key under which a record's name is stored in its serialized form
pub const EVENT_KEY: &str = "event";

/// A single entry in the data layer.
///
/// Serializes flat: `{"event": <name>, ...attributes}`. Records are never
/// mutated once appended to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    event: String,
    attributes: Map<String, Value>,
}

impl EventRecord {
    /// Build a record. An `event` key inside `attributes` is discarded; the
    /// record's name always comes from `event`.
    pub fn new(event: impl Into<String>, mut attributes: Map<String, Value>) -> Self {
        attributes.remove(EVENT_KEY);
        Self {
            event: event.into(),
            attributes,
        }
    }

    /// Event name
    pub fn event(&self) -> &str {
        &self.event
    }

    /// All attributes except the event name
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Look up a top-level attribute
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Look up a nested attribute by dotted path, e.g. `ecommerce.value`
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.attributes.get(first)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Flat JSON object form, as an external consumer would see it
    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.attributes.len() + 1);
        map.insert(EVENT_KEY.to_string(), Value::String(self.event.clone()));
        for (k, v) in &self.attributes {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}

impl Serialize for EventRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attributes.len() + 1))?;
        map.serialize_entry(EVENT_KEY, &self.event)?;
        for (k, v) in &self.attributes {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EventRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut map = Map::<String, Value>::deserialize(deserializer)?;
        let event = match map.remove(EVENT_KEY) {
            Some(Value::String(name)) => name,
            Some(_) => return Err(D::Error::custom("`event` must be a string")),
            None => return Err(D::Error::missing_field(EVENT_KEY)),
        };
        Ok(Self {
            event,
            attributes: map,
        })
    }
}

/// Builder for record attributes that drops absent optional values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Map<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Set a key only when the value is present
    pub fn with_opt<V: Into<Value>>(mut self, key: &str, value: Option<V>) -> Self {
        if let Some(v) = value {
            self.0.insert(key.to_string(), v.into());
        }
        self
    }

    /// Merge caller-supplied parameters; later keys overwrite earlier ones
    pub fn merge(mut self, extra: Map<String, Value>) -> Self {
        for (k, v) in extra {
            self.0.insert(k, v);
        }
        self
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Attributes> for Map<String, Value> {
    fn from(attrs: Attributes) -> Self {
        attrs.0
    }
}

/// Video playback status reported in `video_engagement`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Play,
    Pause,
    Complete,
    Progress,
    Seek,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Play => "play",
            VideoStatus::Pause => "pause",
            VideoStatus::Complete => "complete",
            VideoStatus::Progress => "progress",
            VideoStatus::Seek => "seek",
        }
    }

    /// Whether records with this status carry `video_progress`
    pub fn carries_progress(&self) -> bool {
        matches!(self, VideoStatus::Progress | VideoStatus::Seek)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "play" => Some(VideoStatus::Play),
            "pause" => Some(VideoStatus::Pause),
            "complete" => Some(VideoStatus::Complete),
            "progress" => Some(VideoStatus::Progress),
            "seek" => Some(VideoStatus::Seek),
            _ => None,
        }
    }
}

/// Interactions that count as user activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    PointerMove,
    KeyPress,
    Click,
    Scroll,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::PointerMove => "pointer_move",
            ActivityKind::KeyPress => "key_press",
            ActivityKind::Click => "click",
            ActivityKind::Scroll => "scroll",
        }
    }
}

/// Coarse engagement classification derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementLevel {
    High,
    Medium,
    Low,
}

impl EngagementLevel {
    /// High at 80 and above, Medium at 50 and above
    pub fn from_score(score: u8) -> Self {
        if score >= 80 {
            EngagementLevel::High
        } else if score >= 50 {
            EngagementLevel::Medium
        } else {
            EngagementLevel::Low
        }
    }
}

use serde::Serialize;
use serde_json::Value;

use crate::types::{names, EventRecord, VideoStatus};

/// Required attributes per event name. Dotted entries address nested
/// objects; `gtm.start` is a literal top-level key.
const CONTRACTS: &[(&str, &[&str])] = &[
    (names::PAGE_VIEW, &["page_path", "page_title"]),
    (names::BUTTON_CLICK, &["button_name"]),
    (names::EXTERNAL_LINK_CLICK, &["link_url", "link_domain"]),
    (names::FORM_SUBMIT, &["form_name"]),
    (names::FORM_INPUT_INTERACTION, &["form_name", "input_name", "interaction_type"]),
    (names::FORM_COMPLETE, &["form_name", "form_fields"]),
    (names::SCROLL_DEPTH, &["scroll_depth", "scroll_depth_unit", "page_path"]),
    (names::VIDEO_ENGAGEMENT, &["video_id", "video_title", "video_status"]),
    (names::USER_ENGAGEMENT, &["engagement_time_seconds", "engagement_score"]),
    (names::USER_ACTIVITY, &["activity_type", "time_on_page"]),
    (names::USER_INACTIVE, &["inactive_duration"]),
    (
        names::PAGE_EXIT,
        &["page_path", "time_on_page", "engagement_score", "session_count"],
    ),
    (names::SESSION_INCREMENT, &["new_session_count"]),
    (names::JS_ERROR, &["error_message", "error_stack"]),
    (names::SET_USER_PROPERTIES, &["user_id"]),
    (names::GENERATE_CLICK, &["button_name", "category", "cluster"]),
    (names::GENERATE_SUCCESS, &["generation_time_ms"]),
    (names::GENERATE_FAILED, &["error_type"]),
    (names::OUTPUT_GENERATED, &["category", "cluster"]),
    (names::COPY_TO_CLIPBOARD, &["category", "cluster"]),
    (names::GTM_JS, &["gtm.start"]),
    (names::VIEW_ITEM_LIST, &["ecommerce.items"]),
    (names::SELECT_ITEM, &["ecommerce.items"]),
    (names::ADD_TO_CART, &["ecommerce.items"]),
    (names::REMOVE_FROM_CART, &["ecommerce.items"]),
    (names::BEGIN_CHECKOUT, &["ecommerce.items"]),
    (
        names::PURCHASE,
        &[
            "ecommerce.transaction_id",
            "ecommerce.value",
            "ecommerce.currency",
            "ecommerce.items",
        ],
    ),
];

/// Required attributes for `event`; empty for custom events
pub fn required_attributes(event: &str) -> &'static [&'static str] {
    CONTRACTS
        .iter()
        .find(|(name, _)| *name == event)
        .map(|(_, attrs)| *attrs)
        .unwrap_or(&[])
}

/// Event names that carry a contract
pub fn known_events() -> impl Iterator<Item = &'static str> {
    CONTRACTS.iter().map(|(name, _)| *name)
}

/// A record that breaks its category's contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContractViolation {
    #[error("{event}: missing required attribute `{attribute}`")]
    MissingAttribute { event: String, attribute: String },

    #[error("{event}: invalid `{attribute}`: {reason}")]
    InvalidValue {
        event: String,
        attribute: String,
        reason: String,
    },

    #[error("{event}: unexpected attribute `{attribute}`")]
    UnexpectedAttribute { event: String, attribute: String },
}

fn lookup<'a>(record: &'a EventRecord, attribute: &str) -> Option<&'a Value> {
    record.get(attribute).or_else(|| record.get_path(attribute))
}

/// Check one record against its category contract. Extra attributes are
/// allowed; custom events always pass.
pub fn validate_record(record: &EventRecord) -> Vec<ContractViolation> {
    let event = record.event();
    let mut violations: Vec<ContractViolation> = required_attributes(event)
        .iter()
        .filter(|attr| lookup(record, attr).is_none())
        .map(|attr| ContractViolation::MissingAttribute {
            event: event.to_string(),
            attribute: attr.to_string(),
        })
        .collect();

    let invalid = |attribute: &str, reason: String| ContractViolation::InvalidValue {
        event: event.to_string(),
        attribute: attribute.to_string(),
        reason,
    };

    match event {
        names::SCROLL_DEPTH => {
            if let Some(unit) = record.get("scroll_depth_unit") {
                if unit != "percent" {
                    violations.push(invalid(
                        "scroll_depth_unit",
                        format!("expected \"percent\", got {unit}"),
                    ));
                }
            }
            if let Some(depth) = record.get("scroll_depth") {
                if !depth.as_u64().is_some_and(|d| d <= 100) {
                    violations.push(invalid(
                        "scroll_depth",
                        format!("expected 0-100, got {depth}"),
                    ));
                }
            }
        }
        names::VIDEO_ENGAGEMENT => {
            let status = record
                .get("video_status")
                .and_then(Value::as_str)
                .and_then(VideoStatus::parse);
            match (status, record.get("video_status")) {
                (None, Some(raw)) => {
                    violations.push(invalid("video_status", format!("unknown status {raw}")));
                }
                (Some(status), _) => {
                    let progress = record.get("video_progress");
                    match (status.carries_progress(), progress) {
                        (true, None) => violations.push(ContractViolation::MissingAttribute {
                            event: event.to_string(),
                            attribute: "video_progress".to_string(),
                        }),
                        (false, Some(_)) => {
                            violations.push(ContractViolation::UnexpectedAttribute {
                                event: event.to_string(),
                                attribute: "video_progress".to_string(),
                            })
                        }
                        _ => {}
                    }
                }
                (None, None) => {}
            }
        }
        names::USER_ENGAGEMENT | names::PAGE_EXIT => {
            if let Some(score) = record.get("engagement_score") {
                if !score.as_u64().is_some_and(|s| s <= 100) {
                    violations.push(invalid(
                        "engagement_score",
                        format!("expected 0-100, got {score}"),
                    ));
                }
            }
        }
        _ => {}
    }

    if let Some(items) = record.get_path("ecommerce.items") {
        if !items.is_array() {
            violations.push(invalid("ecommerce.items", "expected an array".to_string()));
        }
    }

    violations
}

/// Violations across a whole data layer, paired with record positions
pub fn validate_all(records: &[EventRecord]) -> Vec<(usize, ContractViolation)> {
    records
        .iter()
        .enumerate()
        .flat_map(|(i, record)| validate_record(record).into_iter().map(move |v| (i, v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecommerce::{CartLine, Product, Transaction};
    use crate::emitter::Emitter;
    use crate::sink::DataLayer;
    use crate::types::{Attributes, VideoStatus};
    use serde_json::json;
    use std::sync::Arc;

    fn record(value: Value) -> EventRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_emitted_records_satisfy_contracts() {
        let layer = Arc::new(DataLayer::new());
        let emitter = Emitter::new(layer.clone());

        emitter.page_view("/", "Home", None);
        emitter.button_click("cta", Some("Buy"), None);
        emitter.external_link_click("not a url", None);
        emitter.form_submit("newsletter", None);
        emitter.scroll_depth(50, "/");
        emitter.video_event("v1", "Intro", VideoStatus::Play, None);
        emitter.video_event("v1", "Intro", VideoStatus::Progress, Some(25));
        emitter.user_engagement(30, 100);
        emitter.js_error("boom", None);
        emitter.generate_click("tech", "AI");

        let product = Product::new("SKU_001", "Headphones", "AudioTech", "Electronics", 10.0);
        let line = CartLine::new(product, 2);
        emitter.ecommerce().add_to_cart(&line, None, None);
        emitter.ecommerce().purchase(&Transaction {
            transaction_id: "TXN-1".to_string(),
            lines: vec![line],
            value: 20.0,
            tax: None,
            shipping: None,
            currency: None,
        });

        assert_eq!(validate_all(&layer.snapshot()), vec![]);
    }

    #[test]
    fn test_missing_attributes_reported() {
        let violations = validate_record(&record(json!({"event": "page_view", "page_path": "/"})));
        assert_eq!(
            violations,
            vec![ContractViolation::MissingAttribute {
                event: "page_view".to_string(),
                attribute: "page_title".to_string(),
            }]
        );

        let purchase = record(json!({"event": "purchase", "ecommerce": {"items": []}}));
        assert_eq!(validate_record(&purchase).len(), 3);
    }

    #[test]
    fn test_video_progress_only_for_progress_and_seek() {
        let pause = record(json!({
            "event": "video_engagement", "video_id": "v", "video_title": "t",
            "video_status": "pause", "video_progress": 50
        }));
        assert!(matches!(
            validate_record(&pause)[..],
            [ContractViolation::UnexpectedAttribute { .. }]
        ));

        let seek = record(json!({
            "event": "video_engagement", "video_id": "v", "video_title": "t", "video_status": "seek"
        }));
        assert!(matches!(
            validate_record(&seek)[..],
            [ContractViolation::MissingAttribute { .. }]
        ));

        let bogus = record(json!({
            "event": "video_engagement", "video_id": "v", "video_title": "t", "video_status": "rewind"
        }));
        assert!(matches!(
            validate_record(&bogus)[..],
            [ContractViolation::InvalidValue { .. }]
        ));
    }

    #[test]
    fn test_scroll_unit_must_be_percent() {
        let attrs = Attributes::new()
            .with("scroll_depth", 50)
            .with("scroll_depth_unit", "pixels")
            .with("page_path", "/")
            .into_map();
        let violations = validate_record(&EventRecord::new("scroll_depth", attrs));
        assert_eq!(violations.len(), 1);
        assert!(violations[0].to_string().contains("scroll_depth_unit"));
    }

    #[test]
    fn test_bootstrap_and_custom_events() {
        let bootstrap = record(json!({"event": "gtm.js", "gtm.start": 1705327200000u64}));
        assert!(validate_record(&bootstrap).is_empty());

        let custom = record(json!({"event": "demo_button_click"}));
        assert!(validate_record(&custom).is_empty());
        assert!(required_attributes("demo_button_click").is_empty());
        assert!(known_events().any(|e| e == "purchase"));
    }
}

//! Page-level error capture
//!
//! Uncaught runtime errors and unhandled rejections become `js_error` records.
//! Known noise (errors thrown by browser extensions, and wallet extensions
//! fighting over `window.ethereum`) is dropped before it reaches the data layer.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::emitter::Emitter;
use crate::types::{names, Attributes};

/// Script sources belonging to browser extensions
pub const EXTENSION_SCHEMES: [&str; 4] = [
    "chrome-extension://",
    "moz-extension://",
    "safari-extension://",
    "safari-web-extension://",
];

/// Benign error raised when two wallet extensions inject a provider
pub const ETHEREUM_REDEFINE_MESSAGE: &str = "Cannot redefine property: ethereum";

/// Prefix applied to rejection reasons
pub const REJECTION_PREFIX: &str = "Unhandled Promise Rejection: ";

/// An uncaught error as reported by the runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn at(mut self, source: impl Into<String>, lineno: u32, colno: u32) -> Self {
        self.source = Some(source.into());
        self.lineno = Some(lineno);
        self.colno = Some(colno);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// What the capture layer did with an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureOutcome {
    /// Recorded as `js_error` and kept from surfacing to the user
    Suppressed,
    /// Recognized as noise; nothing recorded
    Ignored,
}

/// Whether an error is known noise that must not be forwarded
pub fn is_noise(message: &str, source: Option<&str>) -> bool {
    if let Some(source) = source {
        if EXTENSION_SCHEMES.iter().any(|scheme| source.contains(scheme)) {
            return true;
        }
    }
    message.contains(ETHEREUM_REDEFINE_MESSAGE)
}

/// Global error handler bound to one emitter
#[derive(Debug, Clone)]
pub struct ErrorCapture {
    emitter: Emitter,
}

impl ErrorCapture {
    pub fn new(emitter: Emitter) -> Self {
        Self { emitter }
    }

    /// Handle an uncaught runtime error
    pub fn capture_error(&self, report: &ErrorReport) -> CaptureOutcome {
        if is_noise(&report.message, report.source.as_deref()) {
            debug!(message = %report.message, "ignoring extension noise");
            return CaptureOutcome::Ignored;
        }

        let attrs = Attributes::new()
            .with("error_message", report.message.as_str())
            .with("error_stack", report.stack.as_deref().unwrap_or_default())
            .with_opt("error_lineno", report.lineno)
            .with_opt("error_colno", report.colno)
            .with_opt("error_source", report.source.as_deref());
        self.emitter.emit(names::JS_ERROR, attrs.into_map());
        CaptureOutcome::Suppressed
    }

    /// Handle an unhandled promise rejection
    pub fn capture_rejection(&self, reason: &str, stack: Option<&str>) -> CaptureOutcome {
        if is_noise(reason, None) {
            debug!(reason, "ignoring extension noise");
            return CaptureOutcome::Ignored;
        }

        let message = format!("{REJECTION_PREFIX}{reason}");
        self.emitter.js_error(&message, stack);
        CaptureOutcome::Suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::DataLayer;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn capture() -> (Arc<DataLayer>, ErrorCapture) {
        let layer = Arc::new(DataLayer::new());
        let capture = ErrorCapture::new(Emitter::new(layer.clone()));
        (layer, capture)
    }

    #[test]
    fn test_error_becomes_js_error() {
        let (layer, capture) = capture();
        let report = ErrorReport::new("TypeError: x is undefined")
            .at("https://example.com/app.js", 12, 7)
            .with_stack("at f (app.js:12:7)");

        assert_eq!(capture.capture_error(&report), CaptureOutcome::Suppressed);
        assert_eq!(
            layer.snapshot()[0].to_value(),
            json!({
                "event": "js_error",
                "error_message": "TypeError: x is undefined",
                "error_stack": "at f (app.js:12:7)",
                "error_lineno": 12,
                "error_colno": 7,
                "error_source": "https://example.com/app.js"
            })
        );
    }

    #[test]
    fn test_missing_stack_is_empty_string() {
        let (layer, capture) = capture();
        capture.capture_error(&ErrorReport::new("boom"));
        assert_eq!(layer.snapshot()[0].get("error_stack"), Some(&json!("")));
    }

    #[test]
    fn test_extension_noise_ignored() {
        let (layer, capture) = capture();
        for source in [
            "chrome-extension://abcdef/content.js",
            "moz-extension://1234/inject.js",
            "safari-web-extension://x/y.js",
        ] {
            let report = ErrorReport::new("Script error").at(source, 1, 1);
            assert_eq!(capture.capture_error(&report), CaptureOutcome::Ignored);
        }
        let wallet = ErrorReport::new("TypeError: Cannot redefine property: ethereum");
        assert_eq!(capture.capture_error(&wallet), CaptureOutcome::Ignored);

        assert!(layer.is_empty());
    }

    #[test]
    fn test_rejection_message() {
        let (layer, capture) = capture();
        assert_eq!(
            capture.capture_rejection("network down", None),
            CaptureOutcome::Suppressed
        );
        let record = &layer.snapshot()[0];
        assert_eq!(
            record.get("error_message"),
            Some(&json!("Unhandled Promise Rejection: network down"))
        );
        assert_eq!(record.get("error_stack"), Some(&json!("")));
        assert!(record.get("error_source").is_none());
    }

    #[test]
    fn test_noisy_rejection_ignored() {
        let (layer, capture) = capture();
        let outcome = capture.capture_rejection("Cannot redefine property: ethereum", None);
        assert_eq!(outcome, CaptureOutcome::Ignored);
        assert!(layer.is_empty());
    }
}

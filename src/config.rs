//! Tracking configuration
//!
//! Defaults match a stock deployment. A JSON file may override any subset of
//! fields, and the container id can always be supplied through the
//! `TAGPULSE_GTM_ID` environment variable, which wins over the file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TrackError;
use crate::identity::{REF_ID_PARAM, REF_ID_STORAGE_KEY};
use crate::tracking::{EngagementConfig, DEFAULT_MILESTONES};

/// Environment variable carrying the tag manager container id
pub const GTM_ID_ENV: &str = "TAGPULSE_GTM_ID";

/// Placeholder id shipped in templates; treated as "not configured"
pub const PLACEHOLDER_GTM_ID: &str = "GTM-XXXXXXX";

/// Longest engagement interval or threshold accepted, one day
pub const MAX_ENGAGEMENT_SECS: u64 = 86_400;

const LOADER_SCRIPT_BASE: &str = "https://www.googletagmanager.com/gtm.js?id=";
const NOSCRIPT_BASE: &str = "https://www.googletagmanager.com/ns.html?id=";

/// Everything a page needs to start tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Tag manager container id, e.g. `GTM-ABC1234`
    pub container_id: Option<String>,
    pub scroll_milestones: Vec<u8>,
    pub video_milestones: Vec<u8>,
    pub engagement: EngagementConfig,
    /// Storage key for the persisted referral id
    pub ref_id_storage_key: String,
    /// Query parameter carrying the referral id
    pub ref_id_param: String,
    /// Attach the resolved referral id to every emitted record
    pub attach_ref_id: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            container_id: None,
            scroll_milestones: DEFAULT_MILESTONES.to_vec(),
            video_milestones: DEFAULT_MILESTONES.to_vec(),
            engagement: EngagementConfig::default(),
            ref_id_storage_key: REF_ID_STORAGE_KEY.to_string(),
            ref_id_param: REF_ID_PARAM.to_string(),
            attach_ref_id: true,
        }
    }
}

impl TrackingConfig {
    /// Defaults plus the container id from the environment
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, TrackError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file, then apply environment overrides
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TrackError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&contents)?.with_env_overrides())
    }

    /// Apply `TAGPULSE_GTM_ID` when it is set and not blank
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(id) = std::env::var(GTM_ID_ENV) {
            if !id.trim().is_empty() {
                self.container_id = Some(id.trim().to_string());
            }
        }
        self
    }

    pub fn with_container_id(mut self, id: impl Into<String>) -> Self {
        self.container_id = Some(id.into());
        self
    }

    pub fn validate(&self) -> Result<(), TrackError> {
        let engagement = &self.engagement;
        if engagement.sample_interval_secs == 0 {
            return Err(TrackError::InvalidConfig(
                "engagement.sample_interval_secs must be positive".to_string(),
            ));
        }
        if engagement.inactivity_check_secs == 0 {
            return Err(TrackError::InvalidConfig(
                "engagement.inactivity_check_secs must be positive".to_string(),
            ));
        }

        let max_ms = MAX_ENGAGEMENT_SECS * 1000;
        let spans = [
            ("sample_interval_secs", engagement.sample_interval_secs, MAX_ENGAGEMENT_SECS),
            ("inactivity_check_secs", engagement.inactivity_check_secs, MAX_ENGAGEMENT_SECS),
            (
                "inactivity_threshold_secs",
                engagement.inactivity_threshold_secs,
                MAX_ENGAGEMENT_SECS,
            ),
            ("checkpoint_rearm_ms", engagement.checkpoint_rearm_ms, max_ms),
            ("activity_debounce_ms", engagement.activity_debounce_ms, max_ms),
        ];
        if let Some((name, value, max)) = spans.iter().find(|(_, value, max)| value > max) {
            return Err(TrackError::InvalidConfig(format!(
                "engagement.{name} is {value}, above the maximum of {max}"
            )));
        }
        if let Some(m) = self
            .scroll_milestones
            .iter()
            .chain(&self.video_milestones)
            .find(|m| **m > 100)
        {
            return Err(TrackError::InvalidConfig(format!(
                "milestone {m} is above 100 percent"
            )));
        }
        if self.ref_id_storage_key.is_empty() || self.ref_id_param.is_empty() {
            return Err(TrackError::InvalidConfig(
                "ref_id storage key and parameter must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Container id when it is set to a real value
    pub fn active_container_id(&self) -> Option<&str> {
        self.container_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && *id != PLACEHOLDER_GTM_ID)
    }

    /// Whether the remote tag loader should be injected. The data layer
    /// works either way.
    pub fn loader_enabled(&self) -> bool {
        self.active_container_id().is_some()
    }

    pub fn loader_script_url(&self) -> Option<String> {
        self.active_container_id()
            .map(|id| format!("{LOADER_SCRIPT_BASE}{id}"))
    }

    /// Fallback iframe URL for clients without scripting
    pub fn noscript_url(&self) -> Option<String> {
        self.active_container_id().map(|id| format!("{NOSCRIPT_BASE}{id}"))
    }
}

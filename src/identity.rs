//! Referral identity resolution
//!
//! A referral identifier (`ref_id`) arrives as a URL query parameter on the
//! landing page and is persisted so later visits without the parameter are
//! still attributed. The URL always wins over the stored value.
//!
//! Storage is pluggable through [`IdentityStore`]. A failing store never fails
//! resolution: the error is logged and treated as "nothing persisted".

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::TrackError;

/// Storage key for the persisted identifier
pub const REF_ID_STORAGE_KEY: &str = "gtm_ref_id";

/// Query parameter carrying the identifier
pub const REF_ID_PARAM: &str = "ref_id";

/// Key-value persistence surviving page loads
pub trait IdentityStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, TrackError>;
    fn set(&self, key: &str, value: &str) -> Result<(), TrackError>;
    fn remove(&self, key: &str) -> Result<(), TrackError>;
}

impl<T: IdentityStore + ?Sized> IdentityStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, TrackError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TrackError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), TrackError> {
        (**self).remove(key)
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    writes: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with one value
    pub fn with_value(key: &str, value: &str) -> Self {
        let store = Self::new();
        store.values.lock().insert(key.to_string(), value.to_string());
        store
    }

    /// Number of successful `set` calls
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }
}

impl IdentityStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, TrackError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TrackError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        *self.writes.lock() += 1;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), TrackError> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// Store backed by a JSON object on disk.
///
/// A missing file reads as empty. Every write rewrites the whole file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>, TrackError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(TrackError::StorageUnavailable(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    fn save(&self, values: &HashMap<String, String>) -> Result<(), TrackError> {
        let json = serde_json::to_string_pretty(values)?;
        fs::write(&self.path, json).map_err(|e| {
            TrackError::StorageUnavailable(format!("{}: {e}", self.path.display()))
        })
    }
}

impl IdentityStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, TrackError> {
        let _guard = self.lock.lock();
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TrackError> {
        let _guard = self.lock.lock();
        let mut values = self.load()?;
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }

    fn remove(&self, key: &str) -> Result<(), TrackError> {
        let _guard = self.lock.lock();
        let mut values = self.load()?;
        if values.remove(key).is_some() {
            self.save(&values)?;
        }
        Ok(())
    }
}

/// Store that always fails, as blocked browser storage does
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

impl IdentityStore for UnavailableStore {
    fn get(&self, _key: &str) -> Result<Option<String>, TrackError> {
        Err(TrackError::StorageUnavailable("storage is disabled".to_string()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), TrackError> {
        Err(TrackError::StorageUnavailable("storage is disabled".to_string()))
    }

    fn remove(&self, _key: &str) -> Result<(), TrackError> {
        Err(TrackError::StorageUnavailable("storage is disabled".to_string()))
    }
}

/// Where a resolved identifier came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Url,
    Stored,
}

/// Outcome of a resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub ref_id: String,
    pub source: IdentitySource,
}

/// Read the `ref_id` query parameter from `url`.
///
/// Unparseable URLs, a missing parameter and an empty value all yield `None`.
pub fn extract_ref_id(url: &str) -> Option<String> {
    extract_param(url, REF_ID_PARAM)
}

/// Non-empty value of query parameter `param` in `url`
pub fn extract_param(url: &str, param: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == param)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// URL-over-storage precedence resolver
pub struct IdentityResolver<S: IdentityStore> {
    store: S,
    storage_key: String,
    param: String,
}

impl<S: IdentityStore> std::fmt::Debug for IdentityResolver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("storage_key", &self.storage_key)
            .field("param", &self.param)
            .finish_non_exhaustive()
    }
}

impl<S: IdentityStore> IdentityResolver<S> {
    pub fn new(store: S) -> Self {
        Self::with_keys(store, REF_ID_STORAGE_KEY, REF_ID_PARAM)
    }

    /// Resolver with a custom storage key and query parameter
    pub fn with_keys(store: S, storage_key: impl Into<String>, param: impl Into<String>) -> Self {
        Self {
            store,
            storage_key: storage_key.into(),
            param: param.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve the identifier for a page load at `url`.
    ///
    /// An identifier in the URL is persisted (unless already stored) and
    /// returned; otherwise the stored one is returned. Idempotent.
    pub fn resolve(&self, url: Option<&str>) -> Option<Resolution> {
        if let Some(ref_id) = url.and_then(|u| extract_param(u, &self.param)) {
            if self.stored().as_deref() != Some(ref_id.as_str()) {
                self.persist(&ref_id);
            }
            return Some(Resolution {
                ref_id,
                source: IdentitySource::Url,
            });
        }

        self.stored().map(|ref_id| Resolution {
            ref_id,
            source: IdentitySource::Stored,
        })
    }

    /// The persisted identifier, ignoring any URL
    pub fn current(&self) -> Option<String> {
        self.stored()
    }

    /// Forget the persisted identifier
    pub fn clear(&self) {
        if let Err(e) = self.store.remove(&self.storage_key) {
            warn!(error = %e, "failed to clear ref_id from storage");
        }
    }

    fn stored(&self) -> Option<String> {
        match self.store.get(&self.storage_key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(error = %e, "failed to read ref_id from storage");
                None
            }
        }
    }

    fn persist(&self, ref_id: &str) {
        match self.store.set(&self.storage_key, ref_id) {
            Ok(()) => debug!(ref_id, "ref_id persisted"),
            Err(e) => warn!(error = %e, "failed to store ref_id"),
        }
    }
}

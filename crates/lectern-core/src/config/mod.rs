//! Backend and sync settings for client apps.
//!
//! `BackendSettings` describes one remote store and `SyncSettings` the tunables
//! of a sync pass. Both are plain serde types so the CLI can keep them in its
//! profile file; they are validated and turned into runtime objects here.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::ConflictStrategy;
use crate::sync::{
    MemoryBackend, RemoteBackend, RestBackend, RetryPolicy, SyncConfig,
    DEFAULT_AUTO_RESOLVE_MAX_FIELDS,
};
use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

const DEFAULT_BACKEND_ID: &str = "default";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PUSH_CONCURRENCY: usize = 4;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 200;

/// Which kind of remote store a backend is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// HTTP REST service that assigns its own ids
    #[default]
    Rest,
    /// In-process store, for local testing
    Memory,
}

/// One configured remote store.
///
/// Tokens are user credentials; they live in the local profile only.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackendSettings {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl BackendSettings {
    /// Backend id, falling back to `default`.
    pub fn backend_id(&self) -> String {
        normalize_text_option(self.id.clone()).unwrap_or_else(|| DEFAULT_BACKEND_ID.to_string())
    }

    /// Trimmed base URL without a trailing slash.
    pub fn normalized_base_url(&self) -> Option<String> {
        normalize_text_option(self.base_url.clone())
            .map(|url| url.trim_end_matches('/').to_string())
    }

    pub fn validate(&self) -> Result<()> {
        if self.kind != BackendKind::Rest {
            return Ok(());
        }
        let url = self.normalized_base_url().ok_or_else(|| {
            Error::InvalidInput(format!(
                "backend '{}' needs a base URL",
                self.backend_id()
            ))
        })?;
        if !is_http_url(&url) {
            return Err(Error::InvalidInput(format!(
                "backend '{}' base URL must include http:// or https://",
                self.backend_id()
            )));
        }
        Ok(())
    }

    /// Create the backend these settings describe.
    pub fn build(&self) -> Result<Arc<dyn RemoteBackend>> {
        self.validate()?;
        let id = self.backend_id();
        match self.kind {
            BackendKind::Memory => Ok(Arc::new(MemoryBackend::new(id))),
            BackendKind::Rest => {
                let base_url = self.normalized_base_url().unwrap_or_default();
                let backend =
                    RestBackend::new(id, base_url, normalize_text_option(self.token.clone()))?;
                Ok(Arc::new(backend))
            }
        }
    }
}

/// Persisted sync tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    pub strategy: ConflictStrategy,
    pub auto_resolve_max_fields: usize,
    pub request_timeout_secs: u64,
    pub push_concurrency: usize,
    pub retry_attempts: u32,
    pub retry_initial_delay_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            strategy: ConflictStrategy::default(),
            auto_resolve_max_fields: DEFAULT_AUTO_RESOLVE_MAX_FIELDS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            push_concurrency: DEFAULT_PUSH_CONCURRENCY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_initial_delay_ms: DEFAULT_RETRY_INITIAL_DELAY_MS,
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(Error::InvalidInput(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Runtime configuration for the sync engines.
    pub fn to_sync_config(&self) -> Result<SyncConfig> {
        self.validate()?;
        let retry = RetryPolicy::new(self.retry_attempts)
            .with_initial_delay(Duration::from_millis(self.retry_initial_delay_ms));
        Ok(SyncConfig::new()
            .with_strategy(self.strategy)
            .with_auto_resolve_max_fields(self.auto_resolve_max_fields)
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_push_concurrency(self.push_concurrency)
            .with_retry(retry))
    }
}

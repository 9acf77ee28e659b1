//! Registry of provider adapters keyed by wire protocol.
//!
//! Lookups and mutations may happen from any thread; a call resolves its
//! adapter once at start and keeps the `Arc` for its whole lifetime, so
//! unregistering never affects an in-flight stream.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::errors::HarnessError;
use crate::provider::ProviderAdapter;
use crate::types::Api;

/// Metadata attached at registration time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterOptions {
    /// Tag used to remove every adapter a plugin registered at once.
    pub source_id: Option<String>,
    pub version: Option<String>,
    pub enabled: bool,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            source_id: None,
            version: None,
            enabled: true,
        }
    }
}

impl RegisterOptions {
    pub fn source(source_id: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            ..Self::default()
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// A registered adapter and its metadata.
#[derive(Clone)]
pub struct RegisteredProvider {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub source_id: Option<String>,
    pub version: Option<String>,
    pub enabled: bool,
}

impl RegisteredProvider {
    pub fn api(&self) -> Api {
        self.adapter.api()
    }
}

impl std::fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("api", &self.adapter.api())
            .field("source_id", &self.source_id)
            .field("version", &self.version)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    entries: DashMap<Api, RegisteredProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` under its declared protocol, replacing (and
    /// returning) any previous registration for that protocol.
    pub fn register(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        options: RegisterOptions,
    ) -> Result<Option<RegisteredProvider>, HarnessError> {
        let api = adapter.api();
        if api.is_blank() {
            return Err(HarnessError::Registry(
                "provider api must not be empty".into(),
            ));
        }
        info!(
            api = %api,
            source_id = options.source_id.as_deref().unwrap_or("-"),
            enabled = options.enabled,
            "registering provider"
        );
        Ok(self.entries.insert(
            api,
            RegisteredProvider {
                adapter,
                source_id: options.source_id,
                version: options.version,
                enabled: options.enabled,
            },
        ))
    }

    /// Registration for `api`, enabled or not.
    pub fn get(&self, api: &Api) -> Option<RegisteredProvider> {
        self.entries.get(api).map(|entry| entry.value().clone())
    }

    /// Adapter that should serve `api`.
    pub fn lookup(&self, api: &Api) -> Result<Arc<dyn ProviderAdapter>, HarnessError> {
        let entry = self
            .entries
            .get(api)
            .ok_or_else(|| HarnessError::ProviderNotFound { api: api.clone() })?;
        if !entry.enabled {
            return Err(HarnessError::ProviderDisabled { api: api.clone() });
        }
        Ok(entry.adapter.clone())
    }

    /// Registrations ordered by protocol id.
    pub fn list(&self, include_disabled: bool) -> Vec<RegisteredProvider> {
        let mut providers: Vec<RegisteredProvider> = self
            .entries
            .iter()
            .filter(|entry| include_disabled || entry.enabled)
            .map(|entry| entry.value().clone())
            .collect();
        providers.sort_by(|a, b| a.api().as_str().cmp(b.api().as_str()));
        providers
    }

    /// Returns `false` when nothing is registered for `api`.
    pub fn enable(&self, api: &Api) -> bool {
        self.set_enabled(api, true)
    }

    pub fn disable(&self, api: &Api) -> bool {
        self.set_enabled(api, false)
    }

    fn set_enabled(&self, api: &Api, enabled: bool) -> bool {
        match self.entries.get_mut(api) {
            Some(mut entry) => {
                entry.enabled = enabled;
                debug!(api = %api, enabled, "provider toggled");
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, api: &Api) -> Option<RegisteredProvider> {
        self.entries.remove(api).map(|(_, entry)| entry)
    }

    /// Removes every adapter registered with `source_id`; returns how many.
    pub fn unregister_by_source(&self, source_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.source_id.as_deref() != Some(source_id));
        let removed = before - self.entries.len();
        debug!(source_id, removed, "unregistered providers by source");
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

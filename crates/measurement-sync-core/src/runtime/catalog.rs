// crates/measurement-sync-core/src/runtime/catalog.rs
// ============================================================================
// Module: In-Memory Catalog
// Description: Catalog resolver backed by per-key watch channels.
// Purpose: Serve definitions in tests, replays, and embedded deployments.
// Dependencies: tokio, tokio-stream
// ============================================================================

//! ## Overview
//! [`InMemoryCatalog`] keeps one watch channel per context key. Resolving a
//! context subscribes to that channel, so later calls to
//! [`InMemoryCatalog::publish`] or [`InMemoryCatalog::fail`] reach every live
//! subscription, mirroring a refreshing remote catalog. A fallback set, when
//! configured, answers keys that were never published. Every resolve call is
//! counted per key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::watch;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;

use crate::core::ContextKey;
use crate::core::FieldDefinition;
use crate::core::ResolvedContext;
use crate::interfaces::CatalogError;
use crate::interfaces::CatalogResolver;
use crate::interfaces::DefinitionStream;

// ============================================================================
// SECTION: Entries
// ============================================================================

/// Current answer for one context key.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CatalogEntry {
    /// Nothing published yet.
    Pending,
    /// Published definitions.
    Definitions(Vec<FieldDefinition>),
    /// Published failure.
    Failed(String),
}

/// Mutable catalog state.
#[derive(Debug, Default)]
struct CatalogState {
    /// Channels by context key.
    entries: BTreeMap<ContextKey, watch::Sender<CatalogEntry>>,
    /// Definitions served to keys never published.
    fallback: Option<Vec<FieldDefinition>>,
    /// Resolve calls by context key.
    fetches: BTreeMap<ContextKey, usize>,
}

impl CatalogState {
    /// Returns the channel for a key, creating it on first use.
    fn channel(&mut self, key: &ContextKey) -> &watch::Sender<CatalogEntry> {
        let initial = self
            .fallback
            .as_ref()
            .map_or(CatalogEntry::Pending, |definitions| CatalogEntry::Definitions(definitions.clone()));
        self.entries.entry(key.clone()).or_insert_with(|| watch::channel(initial).0)
    }
}

// ============================================================================
// SECTION: Catalog
// ============================================================================

/// Catalog resolver holding definitions in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    /// Shared state.
    state: Arc<Mutex<CatalogState>>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog answering every key with the same definitions.
    #[must_use]
    pub fn with_fallback(definitions: Vec<FieldDefinition>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CatalogState {
                fallback: Some(definitions),
                ..CatalogState::default()
            })),
        }
    }

    /// Publishes definitions for a key, reaching live subscriptions.
    pub fn publish(&self, key: impl Into<ContextKey>, definitions: Vec<FieldDefinition>) {
        let key = key.into();
        if let Ok(mut state) = self.state.lock() {
            state.channel(&key).send_replace(CatalogEntry::Definitions(definitions));
        }
    }

    /// Publishes a failure for a key, reaching live subscriptions.
    pub fn fail(&self, key: impl Into<ContextKey>, message: impl Into<String>) {
        let key = key.into();
        let message = message.into();
        if let Ok(mut state) = self.state.lock() {
            state.channel(&key).send_replace(CatalogEntry::Failed(message));
        }
    }

    /// Returns the number of resolve calls for a key.
    #[must_use]
    pub fn fetch_count(&self, key: impl Into<ContextKey>) -> usize {
        let key = key.into();
        self.state
            .lock()
            .map(|state| state.fetches.get(&key).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Returns the number of resolve calls across every key.
    #[must_use]
    pub fn total_fetches(&self) -> usize {
        self.state.lock().map(|state| state.fetches.values().sum()).unwrap_or_default()
    }
}

impl CatalogResolver for InMemoryCatalog {
    fn resolve(&self, context: &ResolvedContext) -> DefinitionStream {
        let key = context.key();
        let Ok(mut state) = self.state.lock() else {
            return Box::pin(tokio_stream::once(Err(CatalogError::Fetch(
                "catalog mutex poisoned".to_string(),
            ))));
        };
        *state.fetches.entry(key.clone()).or_default() += 1;
        let receiver = state.channel(&key).subscribe();
        Box::pin(WatchStream::new(receiver).filter_map(|entry| match entry {
            CatalogEntry::Pending => None,
            CatalogEntry::Definitions(definitions) => Some(Ok(definitions)),
            CatalogEntry::Failed(message) => Some(Err(CatalogError::Fetch(message))),
        }))
    }
}

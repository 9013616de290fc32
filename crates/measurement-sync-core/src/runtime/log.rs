// crates/measurement-sync-core/src/runtime/log.rs
// ============================================================================
// Module: Engine Log Sinks
// Description: Structured log events and pluggable sinks for reconciler activity.
// Purpose: Record reloads, discards, failures, and row errors without panicking.
// Dependencies: serde, serde_json, tracing
// ============================================================================

//! ## Overview
//! Every notable reconciler decision is reported as an [`EngineLogEvent`]:
//! a stable event name, a level, the context key it concerns, an optional row,
//! and a message. Sinks decide where events go. [`TracingLogSink`] forwards to
//! `tracing`, [`StderrLogSink`] writes JSON lines, [`MemoryLogSink`] keeps
//! events for inspection, and [`NoopLogSink`] drops them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

use crate::core::ContextKey;
use crate::core::RowId;

// ============================================================================
// SECTION: Events
// ============================================================================

/// Severity of an engine log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Routine detail.
    Debug,
    /// Notable state change.
    Info,
    /// Recoverable anomaly.
    Warn,
    /// Failure handled by falling back to a safe state.
    Error,
}

/// Structured record of one reconciler decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineLogEvent {
    /// Stable event name.
    pub event: &'static str,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u128,
    /// Severity.
    pub level: LogLevel,
    /// Context key the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_key: Option<ContextKey>,
    /// Row the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<RowId>,
    /// Human-readable message.
    pub message: String,
}

/// Inputs for building an [`EngineLogEvent`].
#[derive(Debug, Clone)]
pub struct EngineLogEventParams {
    /// Stable event name.
    pub event: &'static str,
    /// Severity.
    pub level: LogLevel,
    /// Context key the event concerns.
    pub context_key: Option<ContextKey>,
    /// Row the event concerns.
    pub row: Option<RowId>,
    /// Human-readable message.
    pub message: String,
}

impl EngineLogEvent {
    /// Builds an event stamped with the current time.
    #[must_use]
    pub fn new(params: EngineLogEventParams) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event: params.event,
            timestamp_ms,
            level: params.level,
            context_key: params.context_key,
            row: params.row,
            message: params.message,
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Destination for engine log events.
pub trait EngineLogSink: Send + Sync {
    /// Records one event.
    fn record(&self, event: &EngineLogEvent);
}

/// Sink forwarding events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl EngineLogSink for TracingLogSink {
    fn record(&self, event: &EngineLogEvent) {
        let context_key = event.context_key.as_ref().map_or("-", ContextKey::as_str);
        let row = event.row.map(RowId::get);
        let name = event.event;
        let message = event.message.as_str();
        match event.level {
            LogLevel::Debug => tracing::debug!(event = name, context_key, row, "{message}"),
            LogLevel::Info => tracing::info!(event = name, context_key, row, "{message}"),
            LogLevel::Warn => tracing::warn!(event = name, context_key, row, "{message}"),
            LogLevel::Error => tracing::error!(event = name, context_key, row, "{message}"),
        }
    }
}

/// Sink writing JSON lines to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrLogSink;

impl EngineLogSink for StderrLogSink {
    fn record(&self, event: &EngineLogEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Sink keeping events in memory.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<EngineLogEvent>>,
}

impl MemoryLogSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<EngineLogEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns the recorded events with the given name.
    #[must_use]
    pub fn named(&self, name: &str) -> Vec<EngineLogEvent> {
        self.events().into_iter().filter(|event| event.event == name).collect()
    }
}

impl EngineLogSink for MemoryLogSink {
    fn record(&self, event: &EngineLogEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Sink discarding every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogSink;

impl EngineLogSink for NoopLogSink {
    fn record(&self, _event: &EngineLogEvent) {}
}

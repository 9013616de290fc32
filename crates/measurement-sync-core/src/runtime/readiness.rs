// crates/measurement-sync-core/src/runtime/readiness.rs
// ============================================================================
// Module: Readiness State Machine
// Description: Ordered load/build steps gating when entity values may be applied.
// Purpose: Publish step changes and a ready edge that waiters can await.
// Dependencies: serde, tokio
// ============================================================================

//! ## Overview
//! Readiness travels `Starting -> LoadingDefinitions -> SettingDefinitions ->
//! UpdatingSchema -> Ready`. [`Readiness::advance`] only moves forward.
//! [`Readiness::begin_cycle`] re-enters an earlier loading step when a new
//! definition load starts, and [`Readiness::reset`] returns to `Starting`
//! when the context becomes unresolvable. A separate ready flag changes only
//! on the edges into and out of `Ready`, so subscribers see exactly one ready
//! signal per arrival and one not-ready signal per regression.
//!
//! All waiters share one watch channel: concurrent calls to
//! [`Readiness::wait_until_ready`] resolve together.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use crate::runtime::lifecycle::Lifecycle;

// ============================================================================
// SECTION: Readiness Step
// ============================================================================

/// Stage of the definition load and schema build pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStep {
    /// No load has been requested or the context is unresolvable.
    #[default]
    Starting,
    /// Waiting for the catalog to emit definitions.
    LoadingDefinitions,
    /// Definitions received and being prepared.
    SettingDefinitions,
    /// Schema being rebuilt.
    UpdatingSchema,
    /// Schema built; entity values may be applied.
    Ready,
}

impl ReadinessStep {
    /// Returns the stable step name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::LoadingDefinitions => "loading_definitions",
            Self::SettingDefinitions => "setting_definitions",
            Self::UpdatingSchema => "updating_schema",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for ReadinessStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Raised when a wait ends because the engine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("reconciler stopped before becoming ready")]
pub struct Stopped;

// ============================================================================
// SECTION: Readiness
// ============================================================================

/// Shared readiness state machine.
///
/// # Invariants
/// - The ready flag equals `step == Ready` after every transition.
#[derive(Debug, Clone)]
pub struct Readiness {
    /// Current step.
    step: Arc<watch::Sender<ReadinessStep>>,
    /// Ready flag, modified only on edges.
    ready: Arc<watch::Sender<bool>>,
}

impl Readiness {
    /// Creates a state machine at `Starting`.
    #[must_use]
    pub fn new() -> Self {
        let (step, _) = watch::channel(ReadinessStep::Starting);
        let (ready, _) = watch::channel(false);
        Self {
            step: Arc::new(step),
            ready: Arc::new(ready),
        }
    }

    /// Returns the current step.
    #[must_use]
    pub fn step(&self) -> ReadinessStep {
        *self.step.borrow()
    }

    /// Returns true at `Ready`.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.step() == ReadinessStep::Ready
    }

    /// Returns true while definitions are loading or the schema is building.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        let step = self.step();
        step > ReadinessStep::Starting && step < ReadinessStep::Ready
    }

    /// Moves forward to `step` when it is beyond the current step.
    ///
    /// Returns true when the step changed.
    pub fn advance(&self, step: ReadinessStep) -> bool {
        let changed = self.step.send_if_modified(|current| {
            if step > *current {
                *current = step;
                true
            } else {
                false
            }
        });
        self.publish_ready();
        changed
    }

    /// Enters a loading step for a new cycle, regressing when needed.
    ///
    /// `Starting` is reachable only through [`Readiness::reset`]; passing it
    /// here leaves the state untouched.
    pub fn begin_cycle(&self, step: ReadinessStep) -> bool {
        if step == ReadinessStep::Starting {
            return false;
        }
        let changed = self.step.send_if_modified(|current| {
            if *current == step {
                false
            } else {
                *current = step;
                true
            }
        });
        self.publish_ready();
        changed
    }

    /// Returns to `Starting`.
    pub fn reset(&self) -> bool {
        let changed = self.step.send_if_modified(|current| {
            if *current == ReadinessStep::Starting {
                false
            } else {
                *current = ReadinessStep::Starting;
                true
            }
        });
        self.publish_ready();
        changed
    }

    /// Subscribes to step changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ReadinessStep> {
        self.step.subscribe()
    }

    /// Subscribes to the ready flag.
    #[must_use]
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Waits until `Ready`, or until the lifecycle stops.
    ///
    /// # Errors
    ///
    /// Returns [`Stopped`] when the lifecycle stops first.
    pub async fn wait_until_ready(&self, lifecycle: &Lifecycle) -> Result<(), Stopped> {
        if lifecycle.is_stopped() {
            return Err(Stopped);
        }
        let mut ready = self.ready.subscribe();
        tokio::select! {
            result = ready.wait_for(|ready| *ready) => result.map(|_| ()).map_err(|_| Stopped),
            () = lifecycle.stopped() => Err(Stopped),
        }
    }

    /// Aligns the ready flag with the current step.
    fn publish_ready(&self) {
        let ready = self.is_ready();
        self.ready.send_if_modified(|current| {
            if *current == ready {
                false
            } else {
                *current = ready;
                true
            }
        });
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

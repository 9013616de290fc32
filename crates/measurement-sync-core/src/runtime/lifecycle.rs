// crates/measurement-sync-core/src/runtime/lifecycle.rs
// ============================================================================
// Module: Lifecycle Signal
// Description: One-shot stop signal shared by a reconciler and its tasks.
// Purpose: Let pending waits and catalog subscriptions end promptly on teardown.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! A [`Lifecycle`] is a cloneable stop flag backed by a watch channel. Once
//! stopped it stays stopped; every clone observes the same flag.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use tokio::sync::watch;

// ============================================================================
// SECTION: Lifecycle
// ============================================================================

/// Shared stop signal.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    /// Stop flag; `true` once stopped.
    stop: Arc<watch::Sender<bool>>,
}

impl Lifecycle {
    /// Creates a running lifecycle.
    #[must_use]
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            stop: Arc::new(stop),
        }
    }

    /// Raises the stop signal, returning true on the first call.
    pub fn stop(&self) -> bool {
        self.stop.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    /// Returns true once the stop signal was raised.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolves once the stop signal is raised.
    pub async fn stopped(&self) {
        let mut receiver = self.stop.subscribe();
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

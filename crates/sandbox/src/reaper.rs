//! Backstop cleanup for leaked sandboxes.
//!
//! Callers are expected to destroy their sandboxes; the reaper exists for
//! the ones that never do (crash, timeout, lost connection). It works from
//! container metadata alone — no in-process registry — so it keeps working
//! across process restarts.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::runtime::ContainerRuntime;

/// Removes sandbox containers that have outlived an age threshold.
///
/// Note: age-based eviction is not coordinated with in-flight work. A
/// sandbox whose provisioning timestamp is old but which is still in use
/// can be reaped out from under its caller; the age threshold should sit
/// well above any sane command timeout.
pub struct Reaper {
    runtime: Arc<dyn ContainerRuntime>,
}

impl Reaper {
    /// Create a new reaper over the given runtime.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Remove every sandbox container older than `max_age` and return the
    /// count removed.
    ///
    /// An unavailable runtime is "nothing to clean", not an error, so a
    /// transient daemon outage never crashes the calling scheduler.
    /// Individual removal failures are logged and skipped.
    pub async fn sweep(&self, max_age: Duration) -> usize {
        let containers = match self.runtime.list_sandboxes().await {
            Ok(containers) => containers,
            Err(e) => {
                tracing::warn!(error = %e, "Container runtime unavailable; skipping sweep");
                return 0;
            }
        };

        let now_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let cutoff = now_unix - max_age.as_secs() as i64;

        let mut removed = 0;
        for container in containers {
            if container.created_at_unix >= cutoff {
                continue;
            }
            match self.runtime.remove(&container.container_ref).await {
                Ok(()) => {
                    tracing::info!(
                        container = %container.container_ref,
                        age_secs = now_unix - container.created_at_unix,
                        "Reaped expired sandbox"
                    );
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        container = %container.container_ref,
                        error = %e,
                        "Failed to remove expired sandbox"
                    );
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Sandbox sweep complete");
        }
        removed
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Sandbox lifecycle management.
//!
//! `SandboxManager` owns creation, mutation, and destruction of sandboxes
//! and is the only component that drives the container runtime's lifecycle
//! operations. Provisioning follows clone → materialize → install, with
//! rollback of partial resources on any failure.

use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use agentbox_core::{fs_policy, Error, Result, SandboxSettings};

use crate::runtime::{ContainerRuntime, ContainerSpec, ExecResult};
use crate::snapshot::{parse_container_listing, ExclusionRules, SnapshotSet};
use crate::staging::{archive_dir, archive_file, RepoBinding, RepoStager};

/// Prefix for sandbox container names; the container ref is derived from
/// the sandbox id alone, so no lookup table is needed to address one.
pub const CONTAINER_PREFIX: &str = "agentbox-sbx-";

/// Runtime-level container name for a sandbox id.
pub fn container_ref_for(id: &str) -> String {
    format!("{}{}", CONTAINER_PREFIX, id)
}

// =============================================================================
// Sandbox Handle
// =============================================================================

/// A handle to one isolated execution environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbox {
    /// Opaque caller-visible identifier.
    pub id: String,
    /// The underlying runtime's container name.
    pub container_ref: String,
    /// Creation time, used by the reaper for age-based eviction.
    pub created_at: SystemTime,
    /// The repository this sandbox was materialized from.
    pub repo: RepoBinding,
}

// =============================================================================
// Sandbox Manager
// =============================================================================

/// Owns the lifecycle of sandbox instances.
///
/// Sandboxes are independent units: operations on different ids are safe to
/// run fully in parallel. Calls against the *same* id are expected to be
/// issued sequentially by the caller; the manager does not serialize them.
pub struct SandboxManager {
    runtime: Arc<dyn ContainerRuntime>,
    stager: Arc<dyn RepoStager>,
    settings: SandboxSettings,
    exclusions: ExclusionRules,
    sandboxes: tokio::sync::RwLock<HashMap<String, Sandbox>>,
}

impl SandboxManager {
    /// Create a new sandbox manager.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        stager: Arc<dyn RepoStager>,
        settings: SandboxSettings,
    ) -> Self {
        Self {
            runtime,
            stager,
            settings,
            exclusions: ExclusionRules::default(),
            sandboxes: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Override the snapshot exclusion rules.
    pub fn with_exclusion_rules(mut self, exclusions: ExclusionRules) -> Self {
        self.exclusions = exclusions;
        self
    }

    /// Look up a sandbox handle by id.
    pub async fn get(&self, id: &str) -> Option<Sandbox> {
        self.sandboxes.read().await.get(id).cloned()
    }

    /// Check if the runtime backend is available.
    pub async fn is_available(&self) -> bool {
        self.runtime.ping().await
    }

    // =========================================================================
    // Provisioning
    // =========================================================================

    /// Provision a new sandbox from a repository.
    ///
    /// The container is created with its full security posture first; the
    /// repository is then staged on the host (the container has no network,
    /// so nothing can be cloned inside it), materialized through the
    /// copy-in primitive, and the optional offline install step runs last.
    /// On any failure the partial container and staging directory are
    /// removed and the original error is propagated; provisioning is never
    /// retried automatically.
    pub async fn create(
        &self,
        repo_owner: &str,
        repo_name: &str,
        git_ref: Option<&str>,
        credential: Secret<String>,
    ) -> Result<String> {
        if repo_owner.is_empty() || repo_name.is_empty() {
            return Err(Error::invalid_request(
                "repo_owner and repo_name must be non-empty",
            ));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let container_ref = container_ref_for(&id);
        let repo = RepoBinding {
            owner: repo_owner.to_string(),
            name: repo_name.to_string(),
            git_ref: git_ref.map(String::from),
        };

        let spec = ContainerSpec::from_settings(&self.settings.container);
        self.runtime.create_container(&container_ref, &spec).await?;

        if let Err(e) = self.materialize(&container_ref, &repo, credential).await {
            tracing::warn!(sandbox = %id, error = %e, "Provisioning failed; rolling back container");
            if let Err(cleanup) = self.runtime.remove(&container_ref).await {
                tracing::warn!(sandbox = %id, error = %cleanup, "Rollback removal failed");
            }
            return Err(e);
        }

        let sandbox = Sandbox {
            id: id.clone(),
            container_ref: container_ref.clone(),
            created_at: SystemTime::now(),
            repo,
        };
        self.sandboxes.write().await.insert(id.clone(), sandbox);

        tracing::info!(sandbox = %id, container = %container_ref, "Sandbox provisioned");
        Ok(id)
    }

    /// Stage, copy in, and install. Split out so `create` has a single
    /// rollback point.
    async fn materialize(
        &self,
        container_ref: &str,
        repo: &RepoBinding,
        credential: Secret<String>,
    ) -> Result<()> {
        let provisioning = &self.settings.provisioning;
        let credential = provisioning
            .clone_token
            .clone()
            .unwrap_or(credential);

        let staged = self
            .stager
            .stage(
                repo,
                &credential,
                Duration::from_secs(provisioning.clone_timeout_secs),
            )
            .await?;

        let archive = archive_dir(staged.path())?;
        self.runtime
            .copy_in(
                container_ref,
                &self.settings.container.workspace_dir,
                archive,
            )
            .await?;
        // Staging area removed as soon as the content is inside.
        drop(staged);

        if let Some(install) = &provisioning.install_command {
            let result = self
                .runtime
                .exec(
                    container_ref,
                    &shell_argv(install),
                    Duration::from_secs(provisioning.install_timeout_secs),
                )
                .await?;
            if !result.success() {
                return Err(Error::provisioning(format!(
                    "Install step failed with exit code {}: {}",
                    result.exit_code,
                    result.stderr.trim()
                )));
            }
        }

        Ok(())
    }

    // =========================================================================
    // Execution & File Mutation
    // =========================================================================

    /// Execute `command` as a single shell invocation inside the sandbox.
    ///
    /// Non-zero exits are results, not errors; callers must inspect
    /// `exit_code`. A timeout returns the partial output captured so far
    /// with a non-zero exit indicator. Both output streams are truncated to
    /// the configured cap, on success and failure alike.
    pub async fn run_command(
        &self,
        id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecResult> {
        let container_ref = container_ref_for(id);
        let timeout =
            timeout.unwrap_or(Duration::from_secs(self.settings.exec.default_timeout_secs));

        let mut result = self
            .runtime
            .exec(&container_ref, &shell_argv(command), timeout)
            .await?;

        let cap = self.settings.exec.max_output_bytes;
        truncate_output(&mut result.stdout, cap);
        truncate_output(&mut result.stderr, cap);
        Ok(result)
    }

    /// Write `content` as the complete body of `path` inside the sandbox
    /// workspace, replacing any existing content. Parent directories are
    /// created as needed.
    pub async fn write_file(&self, id: &str, path: &str, content: &[u8]) -> Result<()> {
        let container_ref = container_ref_for(id);
        let workspace = &self.settings.container.workspace_dir;
        let abs = fs_policy::resolve_workspace_path(workspace, path)?;
        let rel = abs
            .strip_prefix(&format!("{}/", workspace.trim_end_matches('/')))
            .ok_or_else(|| Error::internal(format!("Resolved path escaped workspace: {}", abs)))?;

        if let Some((parent, _)) = abs.rsplit_once('/') {
            if parent != workspace.trim_end_matches('/') {
                let mkdir = ["mkdir", "-p", parent].map(String::from).to_vec();
                let result = self
                    .runtime
                    .exec(&container_ref, &mkdir, Duration::from_secs(10))
                    .await?;
                if !result.success() {
                    return Err(Error::runtime(format!(
                        "Failed to create parent directory {}: {}",
                        parent,
                        result.stderr.trim()
                    )));
                }
            }
        }

        // Content travels as a tar stream, never as shell-command text.
        let archive = archive_file(rel, content)?;
        self.runtime.copy_in(&container_ref, workspace, archive).await?;

        tracing::debug!(sandbox = %id, path = %rel, bytes = content.len(), "File written to sandbox");
        Ok(())
    }

    /// Remove the file at `path` inside the sandbox workspace. Absence of
    /// the file is not an error.
    pub async fn delete_file(&self, id: &str, path: &str) -> Result<()> {
        let container_ref = container_ref_for(id);
        let abs = fs_policy::resolve_workspace_path(&self.settings.container.workspace_dir, path)?;

        let rm = ["rm", "-f", abs.as_str()].map(String::from).to_vec();
        let result = self
            .runtime
            .exec(&container_ref, &rm, Duration::from_secs(10))
            .await?;
        if !result.success() {
            return Err(Error::runtime(format!(
                "Failed to delete {}: {}",
                abs,
                result.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Remove the sandbox's container unconditionally. Idempotent: a
    /// sandbox whose container is already gone is treated as success.
    pub async fn destroy(&self, id: &str) -> Result<()> {
        let container_ref = container_ref_for(id);
        self.runtime.remove(&container_ref).await?;
        self.sandboxes.write().await.remove(id);
        tracing::info!(sandbox = %id, "Sandbox destroyed");
        Ok(())
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Take a content-addressed snapshot of the sandbox workspace via one
    /// batched in-container command.
    ///
    /// Snapshot failure must never abort the caller's build flow: a failed
    /// command or unreachable runtime degrades to an empty set, which reads
    /// as "no information available".
    pub async fn snapshot(&self, id: &str) -> SnapshotSet {
        let container_ref = container_ref_for(id);
        let workspace = &self.settings.container.workspace_dir;
        let command = self.exclusions.container_list_command(workspace);
        let timeout = Duration::from_secs(self.settings.exec.default_timeout_secs);

        match self
            .runtime
            .exec(&container_ref, &shell_argv(&command), timeout)
            .await
        {
            Ok(result) if result.exit_code == 0 => {
                parse_container_listing(&result.stdout, workspace)
            }
            Ok(result) => {
                tracing::warn!(
                    sandbox = %id,
                    exit_code = result.exit_code,
                    "Snapshot command failed; returning empty snapshot"
                );
                SnapshotSet::new()
            }
            Err(e) => {
                tracing::warn!(sandbox = %id, error = %e, "Snapshot exec failed; returning empty snapshot");
                SnapshotSet::new()
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Wrap a caller command string as a single argv element under `sh -c`.
///
/// The string stays one token all the way to the container's own shell,
/// which is the isolation boundary; no outer invocation layer re-tokenizes
/// it.
fn shell_argv(command: &str) -> Vec<String> {
    ["/bin/sh", "-c", command].map(String::from).to_vec()
}

/// Truncate to at most `max` bytes on a char boundary, keeping the prefix.
fn truncate_output(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_ref_derivation() {
        assert_eq!(container_ref_for("abc-123"), "agentbox-sbx-abc-123");
    }

    #[test]
    fn test_shell_argv_is_single_token() {
        let argv = shell_argv("echo 'a b' && ls");
        assert_eq!(argv.len(), 3);
        assert_eq!(argv[2], "echo 'a b' && ls");
    }

    #[test]
    fn test_truncate_output_keeps_prefix() {
        let mut s = "abcdef".to_string();
        truncate_output(&mut s, 4);
        assert_eq!(s, "abcd");

        let mut short = "ab".to_string();
        truncate_output(&mut short, 4);
        assert_eq!(short, "ab");
    }

    #[test]
    fn test_truncate_output_respects_char_boundaries() {
        let mut s = "héllo".to_string(); // 'é' spans bytes 1..3
        truncate_output(&mut s, 2);
        assert_eq!(s, "h");
    }
}

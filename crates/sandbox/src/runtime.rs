//! Typed container runtime interface.
//!
//! This module provides the `ContainerRuntime` trait and a Docker-based
//! implementation using the `bollard` crate. The trait is deliberately
//! argv- and archive-shaped: commands are passed as argument vectors and
//! file content moves as tar streams, so no caller string is ever
//! reinterpreted by an outer shell.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use agentbox_core::config::ContainerSettings;
use agentbox_core::{Error, Result};

/// Label applied to every sandbox container. The reaper discovers sandboxes
/// through this label alone, so it survives process restarts.
pub const MANAGED_BY_KEY: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "agentbox";

// =============================================================================
// Runtime Types
// =============================================================================

/// Security and resource posture for a sandbox container, applied once at
/// creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Image to create the container from.
    pub image: String,
    /// Hard memory ceiling in bytes.
    pub memory_limit_bytes: i64,
    /// CPU quota against the standard 100ms period.
    pub cpu_quota: i64,
    /// Maximum number of processes.
    pub pids_limit: i64,
    /// When true (the default posture) the container gets no network for
    /// its whole lifetime.
    pub network_disabled: bool,
    /// Read-only root filesystem.
    pub readonly_rootfs: bool,
    /// Writable workspace mount point and its tmpfs size.
    pub workspace_dir: String,
    pub workspace_size_bytes: i64,
    /// Size of the writable, non-executable /tmp tmpfs.
    pub tmp_size_bytes: i64,
    /// Non-root user commands run as.
    pub user: String,
    /// Container labels, used for reaper discovery.
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    /// Build the standard sandbox posture from settings. Network isolation
    /// and the read-only rootfs are not configurable.
    pub fn from_settings(settings: &ContainerSettings) -> Self {
        Self {
            image: settings.image.clone(),
            memory_limit_bytes: settings.memory_limit_bytes,
            cpu_quota: settings.cpu_quota,
            pids_limit: settings.pids_limit,
            network_disabled: true,
            readonly_rootfs: true,
            workspace_dir: settings.workspace_dir.clone(),
            workspace_size_bytes: settings.workspace_size_bytes,
            tmp_size_bytes: settings.tmp_size_bytes,
            user: settings.user.clone(),
            labels: HashMap::from([(MANAGED_BY_KEY.to_string(), MANAGED_BY_VALUE.to_string())]),
        }
    }
}

/// Result of executing a command in a sandbox container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    /// Exit code of the command.
    pub exit_code: i64,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Whether the command timed out.
    pub timed_out: bool,
}

impl ExecResult {
    /// Whether the execution was successful (exit code 0, no timeout).
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Metadata for one sandbox container, as reported by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxContainer {
    /// The runtime-level container name.
    pub container_ref: String,
    /// Creation time as a unix timestamp in seconds.
    pub created_at_unix: i64,
}

// =============================================================================
// Container Runtime Trait
// =============================================================================

/// Trait for container runtime backends.
///
/// Implementations provide the lifecycle and exec primitives the sandbox
/// manager is built on. The default implementation talks to Docker via
/// `bollard`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container with the given posture. On failure the
    /// partially created container is removed before the error is returned.
    async fn create_container(&self, container_ref: &str, spec: &ContainerSpec) -> Result<()>;

    /// Execute `argv` inside the container under the given timeout.
    ///
    /// Non-zero exits and mid-stream failures are reported through the
    /// returned `ExecResult`; only the container being unreachable is an
    /// error.
    async fn exec(
        &self,
        container_ref: &str,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ExecResult>;

    /// Extract a tar archive into `dst_dir` inside the container.
    async fn copy_in(&self, container_ref: &str, dst_dir: &str, archive: Bytes) -> Result<()>;

    /// Remove the container. Idempotent: a container that no longer exists
    /// is treated as success.
    async fn remove(&self, container_ref: &str) -> Result<()>;

    /// List all sandbox containers (by label) with their creation times,
    /// using runtime metadata only.
    async fn list_sandboxes(&self) -> Result<Vec<SandboxContainer>>;

    /// Check if the runtime backend is reachable.
    async fn ping(&self) -> bool;
}

// =============================================================================
// Docker Runtime Implementation
// =============================================================================

/// Docker-based container runtime using the `bollard` crate.
///
/// Containers are created with:
/// - No network access for their whole lifetime
/// - Read-only root filesystem; writable tmpfs at the workspace and /tmp
/// - Memory, CPU, and pids ceilings
/// - Non-root user, all capabilities dropped, no privilege escalation
pub struct DockerRuntime {
    docker: bollard::Docker,
}

impl DockerRuntime {
    /// Create a new Docker runtime connecting to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            Error::runtime(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;
        Ok(Self { docker })
    }

    /// Create from an existing bollard Docker client (for testing).
    pub fn from_client(docker: bollard::Docker) -> Self {
        Self { docker }
    }

    /// Map a `ContainerSpec` onto the Docker host configuration. Kept as a
    /// pure function so the posture can be asserted without a daemon.
    fn host_config(spec: &ContainerSpec) -> bollard::models::HostConfig {
        use bollard::models::{HostConfig, Mount, MountTypeEnum, ResourcesUlimits};

        HostConfig {
            memory: Some(spec.memory_limit_bytes),
            cpu_quota: Some(spec.cpu_quota),
            cpu_period: Some(100_000), // standard 100ms period
            network_mode: Some(if spec.network_disabled {
                "none".to_string()
            } else {
                "bridge".to_string()
            }),
            readonly_rootfs: Some(spec.readonly_rootfs),
            // Writable workspace scratch space, sized independently of the
            // memory ceiling
            mounts: Some(vec![Mount {
                target: Some(spec.workspace_dir.clone()),
                typ: Some(MountTypeEnum::TMPFS),
                tmpfs_options: Some(bollard::models::MountTmpfsOptions {
                    size_bytes: Some(spec.workspace_size_bytes),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            // General-purpose scratch area; noexec since nothing should run
            // from /tmp
            tmpfs: Some(HashMap::from([(
                "/tmp".to_string(),
                format!("size={},noexec,nosuid", spec.tmp_size_bytes),
            )])),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            pids_limit: Some(spec.pids_limit),
            ulimits: Some(vec![ResourcesUlimits {
                name: Some("nofile".to_string()),
                soft: Some(1024),
                hard: Some(2048),
            }]),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_container(&self, container_ref: &str, spec: &ContainerSpec) -> Result<()> {
        use bollard::container::{Config, CreateContainerOptions};

        let container_config = Config {
            image: Some(spec.image.clone()),
            working_dir: Some(spec.workspace_dir.clone()),
            user: Some(spec.user.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            host_config: Some(Self::host_config(spec)),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: container_ref,
            platform: None,
        };

        self.docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| Error::runtime(format!("Failed to create sandbox container: {}", e)))?;

        if let Err(e) = self
            .docker
            .start_container::<String>(container_ref, None)
            .await
        {
            // Created but never started: remove the husk before reporting.
            let _ = self.remove(container_ref).await;
            return Err(Error::runtime(format!(
                "Failed to start sandbox container: {}",
                e
            )));
        }

        tracing::info!(container = %container_ref, image = %spec.image, "Sandbox container created and started");

        Ok(())
    }

    async fn exec(
        &self,
        container_ref: &str,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ExecResult> {
        use bollard::exec::{CreateExecOptions, StartExecResults};

        let exec_options = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_ref, exec_options)
            .await
            .map_err(|e| Error::runtime(format!("Failed to create exec in sandbox: {}", e)))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::runtime(format!("Failed to start exec in sandbox: {}", e)))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            use futures::StreamExt;

            let collect_future = async {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(bollard::container::LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(bollard::container::LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {} // ignore stdin echoes
                        Err(e) => {
                            stderr.push_str(&format!("\n[sandbox error: {}]", e));
                            break;
                        }
                    }
                }
            };

            if tokio::time::timeout(timeout, collect_future).await.is_err() {
                tracing::warn!(container = %container_ref, "Sandbox exec timed out");
                return Ok(ExecResult {
                    exit_code: -1,
                    stdout,
                    stderr: format!("{}\n[Execution timed out after {:?}]", stderr, timeout),
                    timed_out: true,
                });
            }
        }

        // A failed inspect still yields a result: the caller gets whatever
        // output was captured plus a non-zero exit indicator.
        let exit_code = match self.docker.inspect_exec(&exec.id).await {
            Ok(inspect) => inspect.exit_code.unwrap_or(-1),
            Err(e) => {
                tracing::warn!(container = %container_ref, error = %e, "Failed to inspect exec result");
                -1
            }
        };

        Ok(ExecResult {
            exit_code,
            stdout,
            stderr,
            timed_out: false,
        })
    }

    async fn copy_in(&self, container_ref: &str, dst_dir: &str, archive: Bytes) -> Result<()> {
        use bollard::container::UploadToContainerOptions;

        let options = UploadToContainerOptions {
            path: dst_dir.to_string(),
            ..Default::default()
        };

        self.docker
            .upload_to_container(container_ref, Some(options), archive)
            .await
            .map_err(|e| Error::runtime(format!("Failed to copy archive into sandbox: {}", e)))
    }

    async fn remove(&self, container_ref: &str) -> Result<()> {
        use bollard::container::{RemoveContainerOptions, StopContainerOptions};

        // Stop with a short grace period; ignore failures since force-remove
        // follows.
        let _ = self
            .docker
            .stop_container(container_ref, Some(StopContainerOptions { t: 5 }))
            .await;

        match self
            .docker
            .remove_container(
                container_ref,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => {
                tracing::info!(container = %container_ref, "Sandbox container removed");
                Ok(())
            }
            // The desired end state already holds.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                tracing::debug!(container = %container_ref, "Sandbox container already gone");
                Ok(())
            }
            Err(e) => Err(Error::runtime(format!(
                "Failed to remove sandbox container: {}",
                e
            ))),
        }
    }

    async fn list_sandboxes(&self) -> Result<Vec<SandboxContainer>> {
        use bollard::container::ListContainersOptions;

        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{}={}", MANAGED_BY_KEY, MANAGED_BY_VALUE)],
        )]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| Error::runtime(format!("Failed to list sandbox containers: {}", e)))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let name = c
                    .names
                    .as_ref()
                    .and_then(|names| names.first())
                    .map(|n| n.trim_start_matches('/').to_string())?;
                Some(SandboxContainer {
                    container_ref: name,
                    created_at_unix: c.created.unwrap_or(0),
                })
            })
            .collect())
    }

    async fn ping(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

// =============================================================================
// Mock Runtime (for testing without Docker)
// =============================================================================

/// In-memory mock runtime for unit testing.
///
/// Records every lifecycle call so tests can assert on the container spec,
/// the exec argv, and the uploaded archives. Exec responses are scripted;
/// an empty queue yields a generic success.
#[derive(Default)]
pub struct MockRuntime {
    pub created: std::sync::Arc<tokio::sync::Mutex<Vec<(String, ContainerSpec)>>>,
    pub exec_log: std::sync::Arc<tokio::sync::Mutex<Vec<(String, Vec<String>)>>>,
    pub exec_responses: std::sync::Arc<tokio::sync::Mutex<Vec<ExecResult>>>,
    pub uploads: std::sync::Arc<tokio::sync::Mutex<Vec<(String, String, Bytes)>>>,
    pub removed: std::sync::Arc<tokio::sync::Mutex<Vec<String>>>,
    pub listing: std::sync::Arc<tokio::sync::Mutex<Vec<SandboxContainer>>>,
    pub fail_create: std::sync::atomic::AtomicBool,
    pub fail_exec: std::sync::atomic::AtomicBool,
    pub fail_listing: std::sync::atomic::AtomicBool,
}

impl MockRuntime {
    /// Create a mock runtime with predefined exec responses.
    pub fn new(responses: Vec<ExecResult>) -> Self {
        Self {
            exec_responses: std::sync::Arc::new(tokio::sync::Mutex::new(responses)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create_container(&self, container_ref: &str, spec: &ContainerSpec) -> Result<()> {
        if self.fail_create.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::runtime("mock create failure"));
        }
        self.created
            .lock()
            .await
            .push((container_ref.to_string(), spec.clone()));
        Ok(())
    }

    async fn exec(
        &self,
        container_ref: &str,
        argv: &[String],
        _timeout: Duration,
    ) -> Result<ExecResult> {
        if self.fail_exec.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::runtime("mock container unreachable"));
        }
        self.exec_log
            .lock()
            .await
            .push((container_ref.to_string(), argv.to_vec()));
        let mut responses = self.exec_responses.lock().await;
        if responses.is_empty() {
            Ok(ExecResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: false,
            })
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn copy_in(&self, container_ref: &str, dst_dir: &str, archive: Bytes) -> Result<()> {
        self.uploads
            .lock()
            .await
            .push((container_ref.to_string(), dst_dir.to_string(), archive));
        Ok(())
    }

    async fn remove(&self, container_ref: &str) -> Result<()> {
        self.removed.lock().await.push(container_ref.to_string());
        Ok(())
    }

    async fn list_sandboxes(&self) -> Result<Vec<SandboxContainer>> {
        if self.fail_listing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::runtime("mock daemon unreachable"));
        }
        Ok(self.listing.lock().await.clone())
    }

    async fn ping(&self) -> bool {
        !self.fail_listing.load(std::sync::atomic::Ordering::SeqCst)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_posture_defaults() {
        let settings = ContainerSettings {
            image: "agentbox-sandbox:latest".into(),
            workspace_dir: "/workspace".into(),
            memory_limit_bytes: 1024 * 1024 * 1024,
            cpu_quota: 100_000,
            pids_limit: 256,
            workspace_size_bytes: 512 * 1024 * 1024,
            tmp_size_bytes: 64 * 1024 * 1024,
            user: "agent".into(),
        };
        let spec = ContainerSpec::from_settings(&settings);
        assert!(spec.network_disabled, "network must be disabled");
        assert!(spec.readonly_rootfs, "rootfs must be read-only");
        assert!(spec.memory_limit_bytes > 0);
        assert!(spec.cpu_quota > 0);
        assert_eq!(
            spec.labels.get(MANAGED_BY_KEY).map(String::as_str),
            Some(MANAGED_BY_VALUE)
        );
    }

    #[test]
    fn test_host_config_mapping() {
        let settings = agentbox_core::SandboxSettings::default();
        let spec = ContainerSpec::from_settings(&settings.container);
        let host_config = DockerRuntime::host_config(&spec);

        assert_eq!(host_config.network_mode.as_deref(), Some("none"));
        assert_eq!(host_config.readonly_rootfs, Some(true));
        assert_eq!(host_config.memory, Some(spec.memory_limit_bytes));
        assert_eq!(host_config.cpu_quota, Some(spec.cpu_quota));
        assert_eq!(host_config.pids_limit, Some(spec.pids_limit));

        let mounts = host_config.mounts.expect("workspace mount present");
        assert_eq!(mounts[0].target.as_deref(), Some("/workspace"));
        let tmpfs = host_config.tmpfs.expect("/tmp tmpfs present");
        assert!(tmpfs["/tmp"].contains("noexec"));
    }

    #[test]
    fn test_exec_result_success() {
        let result = ExecResult {
            exit_code: 0,
            stdout: "hello".into(),
            stderr: String::new(),
            timed_out: false,
        };
        assert!(result.success());

        let timeout_result = ExecResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        };
        assert!(!timeout_result.success());
    }

    #[tokio::test]
    async fn test_mock_runtime_records_calls() {
        let runtime = MockRuntime::default();
        let settings = agentbox_core::SandboxSettings::default();
        let spec = ContainerSpec::from_settings(&settings.container);

        runtime.create_container("agentbox-sbx-test", &spec).await.unwrap();
        runtime
            .exec(
                "agentbox-sbx-test",
                &["echo".to_string(), "hi".to_string()],
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        runtime.remove("agentbox-sbx-test").await.unwrap();
        runtime.remove("agentbox-sbx-test").await.unwrap();

        assert_eq!(runtime.created.lock().await.len(), 1);
        assert_eq!(runtime.exec_log.lock().await.len(), 1);
        // Second remove is idempotent success.
        assert_eq!(runtime.removed.lock().await.len(), 2);
    }
}

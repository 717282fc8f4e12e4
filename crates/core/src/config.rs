use config::{Config, ConfigError, Environment, File};
use secrecy::Secret;
use serde::Deserialize;

/// Settings for the sandbox subsystem.
///
/// The resource-policy numbers here are applied once at container creation
/// and are not adjustable per call.
#[derive(Debug, Deserialize, Clone)]
pub struct SandboxSettings {
    pub container: ContainerSettings,
    pub provisioning: ProvisioningSettings,
    pub exec: ExecSettings,
    pub reaper: ReaperSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContainerSettings {
    /// Image the sandbox containers are created from.
    pub image: String,
    /// Working directory inside the container; the repository is
    /// materialized here.
    pub workspace_dir: String,
    /// Hard memory ceiling in bytes.
    pub memory_limit_bytes: i64,
    /// CPU quota against a 100ms period (100_000 = one core).
    pub cpu_quota: i64,
    /// Maximum number of processes inside the container.
    pub pids_limit: i64,
    /// Size of the writable workspace tmpfs mount in bytes.
    pub workspace_size_bytes: i64,
    /// Size of the writable /tmp tmpfs mount in bytes.
    pub tmp_size_bytes: i64,
    /// Non-root user commands run as.
    pub user: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvisioningSettings {
    /// Timeout for the host-side staging clone.
    pub clone_timeout_secs: u64,
    /// Command run inside the container after the repository is
    /// materialized. Must work without network access; `None` skips the
    /// install step entirely.
    pub install_command: Option<String>,
    /// Timeout for the install step.
    pub install_timeout_secs: u64,
    /// Base URL the repository owner/name pair is resolved against.
    pub git_base_url: String,
    /// Optional override for the clone credential, used instead of the
    /// per-call token when set.
    pub clone_token: Option<Secret<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecSettings {
    /// Default timeout for `run_command` when the caller passes none.
    pub default_timeout_secs: u64,
    /// Maximum retained bytes for each of stdout and stderr. Longer output
    /// is truncated, keeping the prefix.
    pub max_output_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReaperSettings {
    /// Sandboxes older than this are removed by the sweep.
    pub max_age_minutes: u64,
}

impl SandboxSettings {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("AGENTBOX_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map AGENTBOX__EXEC__MAX_OUTPUT_BYTES=65536 to exec.max_output_bytes
            .add_source(Environment::with_prefix("AGENTBOX").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            container: ContainerSettings {
                image: "agentbox-sandbox:latest".into(),
                workspace_dir: "/workspace".into(),
                memory_limit_bytes: 1024 * 1024 * 1024, // 1 GiB
                cpu_quota: 100_000,                     // 1 CPU core
                pids_limit: 256,
                workspace_size_bytes: 512 * 1024 * 1024,
                tmp_size_bytes: 64 * 1024 * 1024,
                user: "agent".into(),
            },
            provisioning: ProvisioningSettings {
                clone_timeout_secs: 120,
                install_command: None,
                install_timeout_secs: 300,
                git_base_url: "https://github.com".into(),
                clone_token: None,
            },
            exec: ExecSettings {
                default_timeout_secs: 120,
                max_output_bytes: 64 * 1024,
            },
            reaper: ReaperSettings {
                max_age_minutes: 120,
            },
        }
    }
}

#![deny(unused)]
//! Sandboxed code execution for Agentbox.
//!
//! This crate provisions short-lived, resource-constrained, network-isolated
//! Docker containers in which AI-generated code changes are applied, built,
//! and inspected before being surfaced to a human or committed. Snapshots
//! taken before and after a batch of mutations yield a file-level diff that
//! records what actually changed, without trusting the sandbox's own
//! bookkeeping.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Caller (agent/build orchestration)         │
//! │    ↓ create / run / write / snapshot        │
//! ├─────────────────────────────────────────────┤
//! │  SandboxManager                             │
//! │    clone → copy-in → install, rollback      │
//! ├─────────────────────────────────────────────┤
//! │  ContainerRuntime (DockerRuntime)           │
//! │    ↓ Docker API via bollard                 │
//! ├─────────────────────────────────────────────┤
//! │  Docker Container (isolated)                │
//! │    /workspace  (tmpfs, writable)            │
//! │    No network, read-only rootfs, no caps    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The `Reaper` runs independently of the manager, discovering sandboxes
//! through container labels alone, as a backstop against leaked resources.
//!
//! # Usage
//!
//! ```ignore
//! use agentbox_sandbox::{compare_snapshots, DockerRuntime, GitStager, SandboxManager};
//! use agentbox_core::SandboxSettings;
//!
//! let settings = SandboxSettings::default();
//! let runtime = Arc::new(DockerRuntime::new()?);
//! let stager = Arc::new(GitStager::new(&settings.provisioning.git_base_url));
//! let manager = SandboxManager::new(runtime, stager, settings);
//!
//! let id = manager.create("acme", "widgets", None, credential).await?;
//! let before = manager.snapshot(&id).await;
//! manager.write_file(&id, "src/a.txt", b"hello").await?;
//! let after = manager.snapshot(&id).await;
//! let diff = compare_snapshots(&before, &after);
//! manager.destroy(&id).await?;
//! ```

pub mod manager;
pub mod reaper;
pub mod runtime;
pub mod snapshot;
pub mod staging;

pub use manager::{container_ref_for, Sandbox, SandboxManager, CONTAINER_PREFIX};
pub use reaper::Reaper;
pub use runtime::{
    ContainerRuntime, ContainerSpec, DockerRuntime, ExecResult, MockRuntime, SandboxContainer,
};
pub use snapshot::{
    compare_snapshots, parse_container_listing, take_host_snapshot, ExclusionRules, FileSnapshot,
    SnapshotDiff, SnapshotSet,
};
pub use staging::{FixtureStager, GitStager, RepoBinding, RepoStager, StagedRepo};

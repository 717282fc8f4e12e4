//! Snapshot and diff integration tests.
//!
//! Covers the host walker against a real temporary tree, the in-container
//! listing path through SandboxManager + MockRuntime, and the end-to-end
//! before/after diff scenarios.

use secrecy::Secret;
use std::sync::Arc;

use agentbox_core::SandboxSettings;
use agentbox_sandbox::{
    compare_snapshots, take_host_snapshot, ExclusionRules, ExecResult, FixtureStager, MockRuntime,
    SandboxManager,
};

// =============================================================================
// Helpers
// =============================================================================

/// SHA-256 of "hello".
const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn write_fixture(root: &std::path::Path, path: &str, content: &[u8]) {
    let full = root.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
}

async fn provisioned(runtime: Arc<MockRuntime>) -> (SandboxManager, String) {
    let stager = Arc::new(FixtureStager::new(vec![(
        "README.md".into(),
        b"# fixture".to_vec(),
    )]));
    let manager = SandboxManager::new(runtime, stager, SandboxSettings::default());
    let id = manager
        .create("acme", "widgets", None, Secret::new("t".into()))
        .await
        .unwrap();
    (manager, id)
}

fn listing_line(size: u64, hash: &str, path: &str) -> String {
    format!("{} {} /workspace/{}\n", size, hash, path)
}

// =============================================================================
// 1. Host Walker
// =============================================================================

#[test]
fn test_host_snapshot_hashes_and_relativizes() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path(), "src/a.txt", b"hello");
    write_fixture(dir.path(), "README.md", b"# readme");

    let set = take_host_snapshot(dir.path(), &ExclusionRules::default());
    assert_eq!(set.len(), 2);

    let snap = &set["src/a.txt"];
    assert_eq!(snap.path, "src/a.txt");
    assert_eq!(snap.size, 5);
    assert_eq!(snap.hash, HELLO_SHA256);
}

#[test]
fn test_host_snapshot_applies_exclusions() {
    let dir = tempfile::tempdir().unwrap();
    let rules = ExclusionRules::default();

    write_fixture(dir.path(), "src/kept.rs", b"fn main() {}");
    write_fixture(dir.path(), "node_modules/lib/index.js", b"module.exports = 1;");
    write_fixture(dir.path(), ".git/config", b"[core]");
    write_fixture(dir.path(), "assets/logo.png", b"\x89PNG");
    let oversized = vec![b'x'; rules.max_file_bytes as usize + 1];
    write_fixture(dir.path(), "big.txt", &oversized);
    let at_limit = vec![b'y'; rules.max_file_bytes as usize];
    write_fixture(dir.path(), "at-limit.txt", &at_limit);

    let set = take_host_snapshot(dir.path(), &rules);

    assert!(set.contains_key("src/kept.rs"));
    assert!(set.contains_key("at-limit.txt"), "ceiling is inclusive");
    assert!(!set.contains_key("node_modules/lib/index.js"));
    assert!(!set.contains_key(".git/config"));
    assert!(!set.contains_key("assets/logo.png"));
    assert!(!set.contains_key("big.txt"));
}

#[test]
fn test_host_snapshot_of_missing_root_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("never-created");
    let set = take_host_snapshot(&missing, &ExclusionRules::default());
    assert!(set.is_empty());
}

// =============================================================================
// 2. Container Snapshot via Manager
// =============================================================================

#[tokio::test]
async fn test_container_snapshot_parses_listing() {
    let runtime = Arc::new(MockRuntime::default());
    let (manager, id) = provisioned(runtime.clone()).await;

    let hash_a = "a".repeat(64);
    let mut output = listing_line(5, &hash_a, "src/a.txt");
    output.push_str("find: '/workspace/locked': Permission denied\n");

    runtime.exec_responses.lock().await.push(ExecResult {
        exit_code: 0,
        stdout: output,
        stderr: String::new(),
        timed_out: false,
    });

    let set = manager.snapshot(&id).await;
    assert_eq!(set.len(), 1, "diagnostic line must be skipped, not fatal");
    assert_eq!(set["src/a.txt"].size, 5);

    // The batched command carries the shared exclusion rules.
    let exec_log = runtime.exec_log.lock().await;
    let (_, argv) = exec_log.last().unwrap();
    assert!(argv[2].contains("find /workspace"));
    assert!(argv[2].contains("node_modules"));
    assert!(argv[2].contains("sha256sum"));
}

#[tokio::test]
async fn test_snapshot_command_failure_degrades_to_empty() {
    let runtime = Arc::new(MockRuntime::default());
    let (manager, id) = provisioned(runtime.clone()).await;

    runtime.exec_responses.lock().await.push(ExecResult {
        exit_code: 127,
        stdout: String::new(),
        stderr: "sh: find: not found".into(),
        timed_out: false,
    });

    let set = manager.snapshot(&id).await;
    assert!(set.is_empty());
}

#[tokio::test]
async fn test_snapshot_runtime_error_degrades_to_empty() {
    let runtime = Arc::new(MockRuntime::default());
    let (manager, id) = provisioned(runtime.clone()).await;

    runtime
        .fail_exec
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let set = manager.snapshot(&id).await;
    assert!(set.is_empty(), "snapshot must never propagate the error");
}

// =============================================================================
// 3. End-to-End Diff Scenarios
// =============================================================================

#[tokio::test]
async fn test_scenario_written_file_appears_as_created() {
    let runtime = Arc::new(MockRuntime::default());
    let (manager, id) = provisioned(runtime.clone()).await;

    let readme_hash = "1".repeat(64);
    let hello_hash = "2".repeat(64);

    // Snapshot before, write src/a.txt (one mkdir exec), snapshot after.
    runtime.exec_responses.lock().await.extend([
        ExecResult {
            exit_code: 0,
            stdout: listing_line(9, &readme_hash, "README.md"),
            stderr: String::new(),
            timed_out: false,
        },
        ExecResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
        },
        ExecResult {
            exit_code: 0,
            stdout: format!(
                "{}{}",
                listing_line(9, &readme_hash, "README.md"),
                listing_line(5, &hello_hash, "src/a.txt")
            ),
            stderr: String::new(),
            timed_out: false,
        },
    ]);

    let before = manager.snapshot(&id).await;
    manager.write_file(&id, "src/a.txt", b"hello").await.unwrap();
    let after = manager.snapshot(&id).await;

    let diff = compare_snapshots(&before, &after);
    assert_eq!(diff.created, vec!["src/a.txt"]);
    assert!(diff.modified.is_empty());
    assert!(diff.deleted.is_empty());
    assert_eq!(diff.unchanged_count, 1);
    assert_eq!(diff.total_diff_bytes, 5);
}

#[tokio::test]
async fn test_scenario_equal_length_rewrite_counts_zero_bytes() {
    let runtime = Arc::new(MockRuntime::default());
    let (manager, id) = provisioned(runtime.clone()).await;

    let hash_a = "a".repeat(64);
    let hash_v1 = "b".repeat(64);
    let hash_v2 = "c".repeat(64);

    runtime.exec_responses.lock().await.extend([
        ExecResult {
            exit_code: 0,
            stdout: format!(
                "{}{}",
                listing_line(2, &hash_a, "one.txt"),
                listing_line(2, &hash_v1, "two.txt")
            ),
            stderr: String::new(),
            timed_out: false,
        },
        ExecResult {
            exit_code: 0,
            stdout: format!(
                "{}{}",
                listing_line(2, &hash_a, "one.txt"),
                listing_line(2, &hash_v2, "two.txt")
            ),
            stderr: String::new(),
            timed_out: false,
        },
    ]);

    let before = manager.snapshot(&id).await;
    let after = manager.snapshot(&id).await;

    let diff = compare_snapshots(&before, &after);
    assert_eq!(diff.modified, vec!["two.txt"]);
    assert_eq!(diff.unchanged_count, 1);
    assert_eq!(diff.total_diff_bytes, 0, "equal lengths, differing hashes");
}

#[test]
fn test_host_and_container_listings_are_comparable() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path(), "src/a.txt", b"hello");

    let host = take_host_snapshot(dir.path(), &ExclusionRules::default());
    let container = agentbox_sandbox::parse_container_listing(
        &listing_line(5, HELLO_SHA256, "src/a.txt"),
        "/workspace",
    );

    let diff = compare_snapshots(&host, &container);
    assert!(diff.created.is_empty());
    assert!(diff.modified.is_empty());
    assert!(diff.deleted.is_empty());
    assert_eq!(diff.unchanged_count, 1);
}

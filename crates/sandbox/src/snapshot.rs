//! Content-addressed file-tree snapshots and diffs.
//!
//! A snapshot is a manifest of `path → (sha256, size)` for every text-ish
//! file under a root, computed either by walking a host directory or by one
//! batched command inside a running sandbox. Two snapshots are compared
//! byte- and hash-level only; nothing here interprets file contents.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

// =============================================================================
// Snapshot Types
// =============================================================================

/// One file's identity at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// Slash-separated path relative to the snapshot root.
    pub path: String,
    /// SHA-256 of the full content, lowercase hex.
    pub hash: String,
    /// Byte length at snapshot time.
    pub size: u64,
}

/// A point-in-time view of a tree: path → snapshot, keys unique.
pub type SnapshotSet = BTreeMap<String, FileSnapshot>;

/// The classified difference between two snapshots.
///
/// Every path in the union of both sets lands in exactly one of
/// created/modified/deleted/unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotDiff {
    /// Paths present in `after` but not `before`.
    pub created: Vec<String>,
    /// Paths present in both with differing hash.
    pub modified: Vec<String>,
    /// Paths present in `before` but not `after`.
    pub deleted: Vec<String>,
    /// Paths present in both with equal hash.
    pub unchanged_count: usize,
    /// Sum of created sizes, absolute modified size deltas, and deleted
    /// sizes.
    pub total_diff_bytes: u64,
}

// =============================================================================
// Exclusion Rules
// =============================================================================

/// What a snapshot leaves out, shared by the host walker and the
/// in-container listing so the two stay comparable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionRules {
    /// Directory names pruned wholesale (dependencies, VCS, build output).
    pub dirs: Vec<String>,
    /// File extensions skipped (binary assets), without the leading dot.
    pub extensions: Vec<String>,
    /// Files larger than this many bytes are skipped.
    pub max_file_bytes: u64,
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self {
            dirs: [
                "node_modules",
                ".git",
                "target",
                "dist",
                "build",
                "vendor",
                "__pycache__",
                ".venv",
                ".next",
            ]
            .map(String::from)
            .to_vec(),
            extensions: [
                "png", "jpg", "jpeg", "gif", "ico", "webp", "woff", "woff2", "ttf", "eot",
                "zip", "tar", "gz", "pdf", "so", "dylib", "class", "jar", "wasm",
            ]
            .map(String::from)
            .to_vec(),
            max_file_bytes: 500 * 1024,
        }
    }
}

impl ExclusionRules {
    /// Whether a directory name is pruned from the walk.
    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.dirs.iter().any(|d| d == name)
    }

    /// Whether a file name is skipped by extension.
    pub fn is_excluded_file(&self, name: &str) -> bool {
        match name.rsplit_once('.') {
            Some((_, ext)) => {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            }
            None => false,
        }
    }

    /// Render the rules into one batched shell pipeline that emits a
    /// `"<size> <hash> <absolute-path>"` line per file under `root`.
    ///
    /// Running this inside the sandbox avoids copying every file out of an
    /// isolated container just to hash it on the host.
    pub fn container_list_command(&self, root: &str) -> String {
        let mut cmd = format!("find {}", root);

        if !self.dirs.is_empty() {
            cmd.push_str(" -type d \\(");
            for (i, dir) in self.dirs.iter().enumerate() {
                if i > 0 {
                    cmd.push_str(" -o");
                }
                cmd.push_str(&format!(" -name '{}'", dir));
            }
            cmd.push_str(" \\) -prune -o");
        }

        // -size -Nc matches strictly-less-than N bytes, so the ceiling is
        // inclusive like the host walker's.
        cmd.push_str(&format!(" -type f -size -{}c", self.max_file_bytes + 1));
        for ext in &self.extensions {
            cmd.push_str(&format!(" ! -name '*.{}'", ext));
        }
        cmd.push_str(" -print0 | while IFS= read -r -d '' f; do");
        cmd.push_str(
            " printf '%s %s %s\\n' \"$(wc -c < \"$f\")\" \"$(sha256sum \"$f\" | cut -d' ' -f1)\" \"$f\";",
        );
        cmd.push_str(" done");
        cmd
    }
}

// =============================================================================
// Host Snapshot
// =============================================================================

/// Hash a single file, reading in 64 KB chunks.
fn hash_file(path: &Path) -> std::io::Result<String> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Forward-slash relative path, stable across host platforms.
fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Walk `root` on the host and produce a snapshot.
///
/// Excluded directories are pruned, binary extensions and oversized files
/// skipped. A single unreadable file or directory is skipped silently
/// rather than aborting the rest of the walk.
pub fn take_host_snapshot(root: &Path, rules: &ExclusionRules) -> SnapshotSet {
    let mut set = SnapshotSet::new();

    let walker = walkdir::WalkDir::new(root).into_iter().filter_entry(|e| {
        !(e.file_type().is_dir()
            && rules.is_excluded_dir(&e.file_name().to_string_lossy()))
    });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable entry during snapshot walk");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if rules.is_excluded_file(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping file with unreadable metadata");
                continue;
            }
        };
        if size > rules.max_file_bytes {
            continue;
        }
        let Some(path) = relative_slash_path(root, entry.path()) else {
            continue;
        };
        let hash = match hash_file(entry.path()) {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!(path = %path, error = %e, "Skipping unreadable file during snapshot");
                continue;
            }
        };
        set.insert(path.clone(), FileSnapshot { path, hash, size });
    }

    set
}

// =============================================================================
// Container Snapshot Parsing
// =============================================================================

/// Parse the output of [`ExclusionRules::container_list_command`] into a
/// snapshot.
///
/// One line per file in `"<size> <hash> <absolute-path>"` form. Lines that
/// do not match (wrong token count, non-numeric size, hash not exactly 64
/// hex characters, path outside `root`) are skipped rather than failing the
/// whole parse, since the remote command can partially fail or intermix
/// diagnostics.
pub fn parse_container_listing(output: &str, root: &str) -> SnapshotSet {
    let root = root.trim_end_matches('/');
    let mut set = SnapshotSet::new();

    for line in output.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, ' ');
        let (Some(size), Some(hash), Some(abs_path)) =
            (parts.next(), parts.next(), parts.next())
        else {
            tracing::debug!(line = %line, "Skipping malformed snapshot line");
            continue;
        };
        let Ok(size) = size.parse::<u64>() else {
            tracing::debug!(line = %line, "Skipping snapshot line with non-numeric size");
            continue;
        };
        if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            tracing::debug!(line = %line, "Skipping snapshot line with malformed hash");
            continue;
        }
        let Some(rel) = abs_path
            .strip_prefix(root)
            .and_then(|p| p.strip_prefix('/'))
            .filter(|p| !p.is_empty())
        else {
            tracing::debug!(line = %line, "Skipping snapshot line outside the workspace root");
            continue;
        };

        set.insert(
            rel.to_string(),
            FileSnapshot {
                path: rel.to_string(),
                hash: hash.to_ascii_lowercase(),
                size,
            },
        );
    }

    set
}

// =============================================================================
// Diff
// =============================================================================

/// Compare two snapshots. Pure function, no I/O.
///
/// Size is informational only: two files with equal hashes are unchanged
/// regardless of their recorded sizes.
pub fn compare_snapshots(before: &SnapshotSet, after: &SnapshotSet) -> SnapshotDiff {
    let mut diff = SnapshotDiff::default();

    for (path, snap_after) in after {
        match before.get(path) {
            None => {
                diff.total_diff_bytes += snap_after.size;
                diff.created.push(path.clone());
            }
            Some(snap_before) if snap_before.hash != snap_after.hash => {
                diff.total_diff_bytes += snap_after.size.abs_diff(snap_before.size);
                diff.modified.push(path.clone());
            }
            Some(_) => diff.unchanged_count += 1,
        }
    }

    for (path, snap_before) in before {
        if !after.contains_key(path) {
            diff.total_diff_bytes += snap_before.size;
            diff.deleted.push(path.clone());
        }
    }

    diff
}

// =============================================================================
// Tests
// =============================================================================

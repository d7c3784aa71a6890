//! Link-cache manifest for skipping up-to-date link/strip actions.
//!
//! Tracks the command-line hash, artifact mtime, and per-input
//! mtime + SHA-256 content hash for each produced artifact. An artifact
//! is fresh when the recorded command line still matches, the artifact
//! itself is untouched, and none of its inputs (objects, the
//! intermediate, the linker script, the support archive) have changed
//! in content. Input mtimes are bookkeeping only: a touched-but-
//! identical input stays fresh, and a rewrite that restores the old
//! mtime is still caught by the hash.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Current schema version. Bump when the manifest format changes.
const MANIFEST_VERSION: u32 = 1;

/// Manifest filename within the build directory.
const MANIFEST_FILE: &str = "link-cache.json";

/// Result of a freshness check on a cached artifact.
pub enum FreshResult {
    /// The artifact does not need rebuilding.
    Fresh,
    /// The artifact must be rebuilt, with a human-readable reason.
    Stale(String),
}

impl FreshResult {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// Top-level cache manifest, keyed by artifact path.
#[derive(Default, Serialize, Deserialize)]
pub struct CacheManifest {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub entries: HashMap<PathBuf, ArtifactEntry>,
}

/// Cache entry for a single produced artifact.
#[derive(Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// SHA-256 hash of the tool command line.
    pub flags_hash: String,
    /// Artifact file mtime (seconds since epoch).
    pub artifact_mtime_secs: i64,
    /// Inputs (sources and prerequisites) and their recorded state.
    pub inputs: HashMap<PathBuf, InputRecord>,
}

/// Recorded state of a single input file.
#[derive(Serialize, Deserialize)]
pub struct InputRecord {
    /// Last known mtime (seconds since epoch).
    pub mtime_secs: i64,
    /// SHA-256 hash of the file contents.
    pub content_hash: String,
}

/// Path of the manifest within `build_dir`.
pub fn manifest_path(build_dir: &Path) -> PathBuf {
    build_dir.join(MANIFEST_FILE)
}

impl CacheManifest {
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: HashMap::new(),
        }
    }

    /// Load the manifest from `<build_dir>/link-cache.json`.
    ///
    /// Returns `None` if the file is missing, corrupt, or has a version
    /// mismatch — all three mean "rebuild everything".
    pub fn load(build_dir: &Path) -> Option<Self> {
        let path = build_dir.join(MANIFEST_FILE);
        let data = fs::read_to_string(&path).ok()?;
        let manifest: Self = serde_json::from_str(&data).ok()?;
        if manifest.version != MANIFEST_VERSION {
            return None;
        }
        Some(manifest)
    }

    /// Save the manifest atomically (write to tmp, then rename).
    pub fn save(&self, build_dir: &Path) -> Result<()> {
        fs::create_dir_all(build_dir)?;

        let path = build_dir.join(MANIFEST_FILE);
        let tmp_path = build_dir.join(format!("{MANIFEST_FILE}.tmp"));

        let json =
            serde_json::to_string_pretty(self).context("failed to serialize link cache")?;
        fs::write(&tmp_path, json).context("failed to write temporary link cache")?;
        fs::rename(&tmp_path, &path).context("failed to atomically replace link cache")?;

        Ok(())
    }

    /// Record a freshly built artifact.
    pub fn record(&mut self, target: &Path, flags_hash: String, inputs: &[PathBuf]) {
        let mut input_records = HashMap::new();
        for input in inputs {
            if let Some(mtime_secs) = file_mtime_secs(input) {
                let content_hash = hash_file(input).unwrap_or_default();
                input_records.insert(
                    input.clone(),
                    InputRecord {
                        mtime_secs,
                        content_hash,
                    },
                );
            }
        }
        self.entries.insert(
            target.to_path_buf(),
            ArtifactEntry {
                flags_hash,
                artifact_mtime_secs: file_mtime_secs(target).unwrap_or(0),
                inputs: input_records,
            },
        );
    }

    /// Check whether `target` is still fresh given the current command
    /// line and input set. Inputs are compared by content hash; a
    /// touched-but-identical input has its stored mtime absorbed.
    pub fn is_fresh(&mut self, target: &Path, flags_hash: &str, inputs: &[PathBuf]) -> FreshResult {
        let entry = match self.entries.get_mut(target) {
            Some(e) => e,
            None => return FreshResult::Stale("not built before".into()),
        };

        if entry.flags_hash != flags_hash {
            return FreshResult::Stale("command line changed".into());
        }

        match file_mtime_secs(target) {
            Some(mtime) if mtime == entry.artifact_mtime_secs => {}
            Some(_) => return FreshResult::Stale("artifact mtime changed".into()),
            None => return FreshResult::Stale("artifact missing".into()),
        }

        for input in inputs {
            let record = match entry.inputs.get_mut(input) {
                Some(r) => r,
                None => {
                    return FreshResult::Stale(format!("new input: {}", input.display()));
                }
            };

            let current_mtime = match file_mtime_secs(input) {
                Some(m) => m,
                None => {
                    return FreshResult::Stale(format!("input missing: {}", input.display()));
                }
            };

            // Contents decide staleness; an unchanged mtime alone is not
            // trusted, so a rewrite within the recording second (or with
            // a restored mtime) is still caught.
            let current_hash = match hash_file(input) {
                Ok(h) => h,
                Err(_) => {
                    return FreshResult::Stale(format!(
                        "failed to hash: {}",
                        input.display()
                    ));
                }
            };
            if current_hash != record.content_hash {
                return FreshResult::Stale(format!("input changed: {}", input.display()));
            }

            // Content unchanged despite an mtime change — update the
            // stored mtime.
            if current_mtime != record.mtime_secs {
                record.mtime_secs = current_mtime;
            }
        }

        FreshResult::Fresh
    }
}

/// Hash a tool command line for cache keying.
pub fn hash_command(program: &str, args: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(program.as_bytes());
    hasher.update(b"\0");
    for arg in args {
        hasher.update(arg.as_bytes());
        hasher.update(b"\0");
    }
    format!("{:x}", hasher.finalize())
}

/// SHA-256 hash of a file's contents, returned as a hex string.
fn hash_file(path: &Path) -> Result<String> {
    let data = fs::read(path)
        .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}

/// File mtime in whole seconds since the epoch, or `None` if the file
/// is missing or unreadable.
pub fn file_mtime_secs(path: &Path) -> Option<i64> {
    let metadata = fs::metadata(path).ok()?;
    let mtime = metadata.modified().ok()?;
    let secs = mtime
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Some(secs)
}

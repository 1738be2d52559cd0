//! Plugin discovery
//!
//! Scans root directories for plugin subdirectories, parses and validates
//! manifests, computes content checksums for update detection, and builds
//! the capability and dependency indexes. Manifest problems are recovered
//! locally: the offending directory is logged, recorded in the scan report,
//! and skipped; the scan never aborts.
//!
//! A scan never mutates the published index in place. It builds a fresh
//! index and swaps it atomically, so loads referencing a previous scan's
//! results stay consistent.

use crate::error::{PluginHostError, Result};
use crate::manifest::{PluginManifest, PluginMetadata};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Directory names excluded from checksums: compiled and cache artifacts.
pub const CACHE_DIRS: &[&str] = &[".git", "target", "node_modules", "__pycache__"];

/// Manifest file names, in precedence order. A `*.manifest.json` file is the
/// fallback when neither fixed name exists.
const MANIFEST_NAMES: &[&str] = &["manifest.json", "plugin.json"];
const MANIFEST_SUFFIX: &str = ".manifest.json";

/// A candidate directory rejected during a scan, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedManifest {
    pub directory: PathBuf,
    pub reason: String,
}

/// Two or more directories claimed the same plugin id; all are excluded.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestConflict {
    pub plugin_id: String,
    pub directories: Vec<PathBuf>,
}

/// Structured result of one discovery pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub discovered: Vec<String>,
    pub skipped: Vec<SkippedManifest>,
    pub conflicts: Vec<ManifestConflict>,
}

#[derive(Default)]
struct DiscoveryIndex {
    plugins: HashMap<String, PluginMetadata>,
    by_capability: HashMap<String, Vec<String>>,
    dependency_graph: HashMap<String, Vec<String>>,
}

/// Directory scanner and index over discovered plugins.
pub struct PluginDiscovery {
    index: RwLock<Arc<DiscoveryIndex>>,
}

impl PluginDiscovery {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(Arc::new(DiscoveryIndex::default())),
        }
    }

    /// Scan the given root directories and atomically replace the published
    /// index with the result.
    pub async fn scan(&self, directories: &[PathBuf]) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        // id -> every directory claiming it, for conflict detection
        let mut candidates: HashMap<String, Vec<(PathBuf, PluginMetadata)>> = HashMap::new();

        for root in directories {
            let entries = match std::fs::read_dir(root) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "plugin root not readable");
                    report.skipped.push(SkippedManifest {
                        directory: root.clone(),
                        reason: format!("root directory not readable: {e}"),
                    });
                    continue;
                }
            };

            for entry in entries.flatten() {
                let dir = entry.path();
                if !dir.is_dir() {
                    continue;
                }
                match load_candidate(&dir) {
                    Ok(metadata) => {
                        candidates
                            .entry(metadata.id().to_string())
                            .or_default()
                            .push((dir, metadata));
                    }
                    Err(reason) => {
                        debug!(directory = %dir.display(), reason, "skipping plugin directory");
                        report.skipped.push(SkippedManifest {
                            directory: dir,
                            reason,
                        });
                    }
                }
            }
        }

        let mut index = DiscoveryIndex::default();
        for (plugin_id, mut claims) in candidates {
            if claims.len() > 1 {
                // Never silently prefer one directory over another: all
                // claimants are excluded and the conflict is reported.
                let directories: Vec<PathBuf> = claims.iter().map(|(d, _)| d.clone()).collect();
                warn!(
                    plugin_id = %plugin_id,
                    count = directories.len(),
                    "duplicate plugin id across directories; excluding all"
                );
                report.conflicts.push(ManifestConflict {
                    plugin_id,
                    directories,
                });
                continue;
            }

            let Some((_, metadata)) = claims.pop() else {
                continue;
            };
            for capability in &metadata.manifest.capabilities {
                index
                    .by_capability
                    .entry(capability.clone())
                    .or_default()
                    .push(plugin_id.clone());
            }
            let mut deps: Vec<String> = metadata.manifest.dependencies.keys().cloned().collect();
            deps.sort();
            index.dependency_graph.insert(plugin_id.clone(), deps);
            index.plugins.insert(plugin_id, metadata);
        }

        report.discovered = index.plugins.keys().cloned().collect();
        report.discovered.sort();

        debug!(
            discovered = report.discovered.len(),
            skipped = report.skipped.len(),
            conflicts = report.conflicts.len(),
            "discovery scan complete"
        );

        *self.index.write().await = Arc::new(index);
        Ok(report)
    }

    pub async fn metadata(&self, plugin_id: &str) -> Option<PluginMetadata> {
        self.index.read().await.plugins.get(plugin_id).cloned()
    }

    pub async fn list(&self) -> Vec<PluginMetadata> {
        self.index.read().await.plugins.values().cloned().collect()
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.index.read().await.plugins.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// True if the plugin directory's content differs from the checksum
    /// captured at scan time. Supports update detection without a watcher.
    pub async fn has_plugin_changed(&self, plugin_id: &str) -> Result<bool> {
        let metadata = self
            .metadata(plugin_id)
            .await
            .ok_or_else(|| PluginHostError::PluginNotFound(plugin_id.to_string()))?;
        let current = compute_checksum(&metadata.source_path)?;
        Ok(current != metadata.checksum)
    }

    pub async fn plugins_by_capability(&self, capability: &str) -> Vec<String> {
        self.index
            .read()
            .await
            .by_capability
            .get(capability)
            .cloned()
            .unwrap_or_default()
    }

    /// Plugin id -> ids it depends on.
    pub async fn dependency_graph(&self) -> HashMap<String, Vec<String>> {
        self.index.read().await.dependency_graph.clone()
    }

    /// Reverse edges: every discovered plugin that depends on `plugin_id`.
    pub async fn dependents(&self, plugin_id: &str) -> Vec<String> {
        let index = self.index.read().await;
        let mut dependents: Vec<String> = index
            .dependency_graph
            .iter()
            .filter(|(_, deps)| deps.iter().any(|d| d == plugin_id))
            .map(|(id, _)| id.clone())
            .collect();
        dependents.sort();
        dependents
    }
}

impl Default for PluginDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse, validate, and checksum one candidate plugin directory.
/// Errors are returned as human-readable skip reasons.
fn load_candidate(dir: &Path) -> std::result::Result<PluginMetadata, String> {
    let manifest_path = find_manifest(dir).ok_or("no manifest file found")?;
    let text = std::fs::read_to_string(&manifest_path)
        .map_err(|e| format!("manifest not readable: {e}"))?;
    let manifest: PluginManifest =
        serde_json::from_str(&text).map_err(|e| format!("invalid manifest JSON: {e}"))?;
    manifest
        .validate()
        .map_err(|e| format!("manifest validation failed: {e}"))?;
    let checksum = compute_checksum(dir).map_err(|e| format!("checksum failed: {e}"))?;

    Ok(PluginMetadata {
        manifest,
        source_path: dir.to_path_buf(),
        checksum,
        discovered_at: Utc::now(),
    })
}

/// Locate the manifest file honoring the precedence order
/// `manifest.json` > `plugin.json` > first `*.manifest.json`.
fn find_manifest(dir: &Path) -> Option<PathBuf> {
    for name in MANIFEST_NAMES {
        let path = dir.join(name);
        if path.is_file() {
            return Some(path);
        }
    }

    let mut fallbacks: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(MANIFEST_SUFFIX))
        })
        .collect();
    fallbacks.sort();
    fallbacks.into_iter().next()
}

/// SHA-256 over the relative path and content of every file under the
/// plugin directory, in sorted path order, excluding cache artifacts.
/// Deterministic: an unchanged directory always yields the same digest.
pub fn compute_checksum(dir: &Path) -> Result<String> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for relative in &files {
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        let content = std::fs::read(dir.join(relative))?;
        hasher.update(&content);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if CACHE_DIRS.iter().any(|cache| *cache == name) {
                continue;
            }
            collect_files(base, &path, out)?;
        } else if path.is_file() {
            if let Ok(relative) = path.strip_prefix(base) {
                out.push(relative.to_path_buf());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_manifest(root: &Path, dir_name: &str, id: &str) -> PathBuf {
        write_named_manifest(root, dir_name, id, "manifest.json")
    }

    fn write_named_manifest(root: &Path, dir_name: &str, id: &str, file_name: &str) -> PathBuf {
        let dir = root.join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        let manifest = json!({
            "id": id,
            "name": format!("Plugin {id}"),
            "version": "1.0.0",
            "description": "test",
            "entryModule": "test_module",
            "entryClass": "TestPlugin",
            "capabilities": ["testing"],
        });
        std::fs::write(dir.join(file_name), manifest.to_string()).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_scan_finds_valid_plugins() {
        let root = TempDir::new().unwrap();
        write_manifest(root.path(), "one", "p1");
        write_manifest(root.path(), "two", "p2");

        let discovery = PluginDiscovery::new();
        let report = discovery.scan(&[root.path().to_path_buf()]).await.unwrap();
        assert_eq!(report.discovered, vec!["p1", "p2"]);
        assert!(report.conflicts.is_empty());
        assert!(discovery.metadata("p1").await.is_some());
    }

    #[tokio::test]
    async fn test_invalid_manifest_is_skipped_not_fatal() {
        let root = TempDir::new().unwrap();
        write_manifest(root.path(), "good", "p1");

        let bad = root.path().join("bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("manifest.json"), "{ not json").unwrap();

        let incomplete = root.path().join("incomplete");
        std::fs::create_dir_all(&incomplete).unwrap();
        std::fs::write(
            incomplete.join("manifest.json"),
            json!({"id": "p2", "name": "x"}).to_string(),
        )
        .unwrap();

        let discovery = PluginDiscovery::new();
        let report = discovery.scan(&[root.path().to_path_buf()]).await.unwrap();
        assert_eq!(report.discovered, vec!["p1"]);
        assert_eq!(report.skipped.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_both_excluded() {
        let root = TempDir::new().unwrap();
        write_manifest(root.path(), "copy-a", "dup");
        write_manifest(root.path(), "copy-b", "dup");
        write_manifest(root.path(), "ok", "p1");

        let discovery = PluginDiscovery::new();
        let report = discovery.scan(&[root.path().to_path_buf()]).await.unwrap();
        assert_eq!(report.discovered, vec!["p1"]);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts.first().unwrap().plugin_id, "dup");
        assert_eq!(report.conflicts.first().unwrap().directories.len(), 2);
        assert!(discovery.metadata("dup").await.is_none());
    }

    #[tokio::test]
    async fn test_manifest_precedence() {
        let root = TempDir::new().unwrap();
        // Both fixed names present: manifest.json must win
        let dir = write_manifest(root.path(), "both", "from-manifest");
        std::fs::write(
            dir.join("plugin.json"),
            json!({
                "id": "from-plugin", "name": "n", "version": "1.0.0",
                "description": "d", "entryModule": "m", "entryClass": "C"
            })
            .to_string(),
        )
        .unwrap();
        write_named_manifest(root.path(), "suffixed", "from-suffix", "my.manifest.json");

        let discovery = PluginDiscovery::new();
        let report = discovery.scan(&[root.path().to_path_buf()]).await.unwrap();
        assert_eq!(report.discovered, vec!["from-manifest", "from-suffix"]);
    }

    #[tokio::test]
    async fn test_checksum_deterministic_and_change_sensitive() {
        let root = TempDir::new().unwrap();
        let dir = write_manifest(root.path(), "one", "p1");
        std::fs::write(dir.join("code.txt"), "v1").unwrap();

        let first = compute_checksum(&dir).unwrap();
        assert_eq!(first, compute_checksum(&dir).unwrap());

        // Cache artifacts do not affect the digest
        std::fs::create_dir_all(dir.join("__pycache__")).unwrap();
        std::fs::write(dir.join("__pycache__").join("junk"), "x").unwrap();
        assert_eq!(first, compute_checksum(&dir).unwrap());

        // Content change does
        std::fs::write(dir.join("code.txt"), "v2").unwrap();
        let second = compute_checksum(&dir).unwrap();
        assert_ne!(first, second);

        // Adding a file does too
        std::fs::write(dir.join("extra.txt"), "").unwrap();
        assert_ne!(second, compute_checksum(&dir).unwrap());
    }

    #[tokio::test]
    async fn test_has_plugin_changed() {
        let root = TempDir::new().unwrap();
        let dir = write_manifest(root.path(), "one", "p1");

        let discovery = PluginDiscovery::new();
        discovery.scan(&[root.path().to_path_buf()]).await.unwrap();
        assert!(!discovery.has_plugin_changed("p1").await.unwrap());

        std::fs::write(dir.join("new-file.txt"), "content").unwrap();
        assert!(discovery.has_plugin_changed("p1").await.unwrap());

        assert!(discovery.has_plugin_changed("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_capability_and_dependency_indexes() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("dependent");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("manifest.json"),
            json!({
                "id": "dependent", "name": "Dependent", "version": "1.0.0",
                "description": "d", "entryModule": "m", "entryClass": "C",
                "capabilities": ["reporting"],
                "dependencies": {"base": ">=1.0"}
            })
            .to_string(),
        )
        .unwrap();
        write_manifest(root.path(), "base", "base");

        let discovery = PluginDiscovery::new();
        discovery.scan(&[root.path().to_path_buf()]).await.unwrap();

        assert_eq!(discovery.plugins_by_capability("reporting").await, vec!["dependent"]);
        assert!(discovery.plugins_by_capability("missing").await.is_empty());
        assert_eq!(
            discovery.dependency_graph().await.get("dependent"),
            Some(&vec!["base".to_string()])
        );
        assert_eq!(discovery.dependents("base").await, vec!["dependent"]);
    }
}

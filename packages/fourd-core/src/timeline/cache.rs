//! Best-effort timeline persistence.
//!
//! Received timelines are written to a cache directory so a hub restart
//! can resume without re-receiving the bulk transmission. Files are
//! named `{session_id}_{epoch_ms}.json`; only the newest N per
//! directory are kept.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FourdError, FourdResult};
use crate::timeline::TimelineDoc;
use crate::utils::now_millis;

/// On-disk cache of received timeline documents.
///
/// All operations are best-effort from the caller's perspective: the
/// hub logs a cache failure and carries on with the in-memory timeline.
pub struct TimelineCache {
    dir: PathBuf,
    keep: usize,
}

impl TimelineCache {
    pub fn new(dir: impl Into<PathBuf>, keep: usize) -> FourdResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| FourdError::Internal(format!("cache dir {}: {}", dir.display(), e)))?;
        Ok(Self { dir, keep })
    }

    /// Writes a timeline document for `session_id` and prunes old files.
    pub fn save(&self, session_id: &str, doc: &TimelineDoc) -> FourdResult<PathBuf> {
        let file_name = format!("{}_{}.json", sanitize(session_id), now_millis());
        let path = self.dir.join(file_name);

        let json = serde_json::to_string(doc)
            .map_err(|e| FourdError::Internal(format!("serialize timeline: {}", e)))?;
        fs::write(&path, json)
            .map_err(|e| FourdError::Internal(format!("write {}: {}", path.display(), e)))?;

        log::info!(
            "[Cache] saved timeline for session {} ({} events)",
            session_id,
            doc.events.len()
        );
        self.prune();
        Ok(path)
    }

    /// Loads the newest cached timeline for `session_id`, if any.
    pub fn load_latest(&self, session_id: &str) -> Option<TimelineDoc> {
        let path = self.latest_file(session_id)?;
        self.read_doc(&path)
    }

    fn read_doc(&self, path: &Path) -> Option<TimelineDoc> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("[Cache] read {} failed: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(doc) => {
                log::info!("[Cache] loaded timeline from {}", path.display());
                Some(doc)
            }
            Err(e) => {
                log::warn!("[Cache] parse {} failed: {}", path.display(), e);
                None
            }
        }
    }

    /// Newest cache file for one session. Newest is decided by the
    /// epoch-millis suffix embedded in the name.
    fn latest_file(&self, session_id: &str) -> Option<PathBuf> {
        let mut candidates = self.cache_files();
        let prefix = format!("{}_", sanitize(session_id));
        candidates.retain(|(name, _)| name.starts_with(&prefix));
        candidates
            .into_iter()
            .max_by_key(|(name, _)| file_timestamp(name))
            .map(|(_, path)| path)
    }

    /// Deletes all but the newest `keep` cache files.
    fn prune(&self) {
        let mut files = self.cache_files();
        if files.len() <= self.keep {
            return;
        }
        files.sort_by_key(|(name, _)| std::cmp::Reverse(file_timestamp(name)));
        for (name, path) in files.drain(self.keep..) {
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("[Cache] prune {} failed: {}", name, e);
            } else {
                log::debug!("[Cache] pruned {}", name);
            }
        }
    }

    fn cache_files(&self) -> Vec<(String, PathBuf)> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                let name = path.file_name()?.to_str()?.to_string();
                if name.ends_with(".json") {
                    Some((name, path))
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Keeps session ids filesystem-safe without losing uniqueness for the
/// usual UUID-style ids.
fn sanitize(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Extracts the epoch-millis suffix from `{session}_{millis}.json`.
fn file_timestamp(name: &str) -> u64 {
    name.trim_end_matches(".json")
        .rsplit('_')
        .next()
        .and_then(|ts| ts.parse().ok())
        .unwrap_or(0)
}

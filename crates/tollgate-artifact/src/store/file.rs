//! Directory-backed store
//!
//! Layout under the root:
//!
//! ```text
//! artifacts/<kind>/<id>/v000001.json   one record per (kind, id, version)
//! verdicts/<id>.jsonl                  append-only ledger, one result per line
//! ```
//!
//! Version records are written to a temp file, synced, then renamed into
//! place and never touched again. Ledger lines are appended and synced
//! before `append_verdict` returns. Writers within one process serialize on
//! an async mutex; the store does not coordinate across processes.

use super::{check_result_target, ArtifactStore, StoreError};
use crate::model::{Artifact, ArtifactDraft, ArtifactId, ArtifactKind};
use crate::verdict::GateResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    ///
    /// # Errors
    /// Returns error if the directory layout cannot be created
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("artifacts")).await?;
        fs::create_dir_all(root.join("verdicts")).await?;
        tracing::debug!(root = %root.display(), "file store opened");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_dir(&self, kind: ArtifactKind, id: &ArtifactId) -> PathBuf {
        self.root.join("artifacts").join(kind.as_str()).join(id.as_str())
    }

    fn ledger_path(&self, id: &ArtifactId) -> PathBuf {
        self.root.join("verdicts").join(format!("{id}.jsonl"))
    }

    /// Find the kind directory holding `id` and its sorted versions
    async fn locate(
        &self,
        id: &ArtifactId,
    ) -> Result<Option<(ArtifactKind, Vec<u64>)>, StoreError> {
        for kind in ArtifactKind::ALL {
            let dir = self.artifact_dir(kind, id);
            let versions = list_versions(&dir).await?;
            if !versions.is_empty() {
                return Ok(Some((kind, versions)));
            }
        }
        Ok(None)
    }

    async fn read_version(
        &self,
        kind: ArtifactKind,
        id: &ArtifactId,
        version: u64,
    ) -> Result<Artifact, StoreError> {
        let path = self.artifact_dir(kind, id).join(version_file(version));
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::VersionNotFound {
                    id: id.clone(),
                    version,
                })
            }
            Err(e) => return Err(e.into()),
        };
        let artifact: Artifact = serde_json::from_slice(&bytes)?;
        artifact.verify()?;
        Ok(artifact)
    }

    async fn read_ledger(&self, id: &ArtifactId) -> Result<Vec<GateResult>, StoreError> {
        let text = match fs::read_to_string(self.ledger_path(id)).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let complete = match text.rfind('\n') {
            Some(end) => &text[..=end],
            None => "",
        };
        if complete.len() != text.len() {
            tracing::warn!(%id, "ignoring torn trailing ledger line");
        }
        complete
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::from))
            .collect()
    }

    async fn latest_unlocked(&self, id: &ArtifactId) -> Result<Artifact, StoreError> {
        let (kind, versions) = self
            .locate(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let latest = versions.last().copied().unwrap_or_default();
        self.read_version(kind, id, latest).await
    }
}

fn version_file(version: u64) -> String {
    format!("v{version:06}.json")
}

fn parse_version_file(name: &str) -> Option<u64> {
    name.strip_prefix('v')?.strip_suffix(".json")?.parse().ok()
}

async fn list_versions(dir: &Path) -> Result<Vec<u64>, StoreError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut versions = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if let Some(v) = entry.file_name().to_str().and_then(parse_version_file) {
            versions.push(v);
        }
    }
    versions.sort_unstable();
    Ok(versions)
}

#[async_trait]
impl ArtifactStore for FileStore {
    async fn get(&self, id: &ArtifactId) -> Result<Artifact, StoreError> {
        let mut artifact = self.latest_unlocked(id).await?;
        artifact.verdict_history = self.read_ledger(id).await?;
        Ok(artifact)
    }

    async fn get_version(&self, id: &ArtifactId, version: u64) -> Result<Artifact, StoreError> {
        let (kind, _) = self
            .locate(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let mut artifact = self.read_version(kind, id, version).await?;
        artifact.verdict_history = self.read_ledger(id).await?;
        Ok(artifact)
    }

    #[tracing::instrument(skip(self, draft), fields(id = %draft.id, kind = %draft.kind))]
    async fn put(&self, draft: ArtifactDraft) -> Result<Artifact, StoreError> {
        let _guard = self.write_lock.lock().await;

        let next = match self.locate(&draft.id).await? {
            Some((existing, _)) if existing != draft.kind => {
                return Err(StoreError::KindChanged {
                    id: draft.id,
                    existing,
                    requested: draft.kind,
                });
            }
            Some((_, versions)) => versions.last().map_or(1, |v| v + 1),
            None => 1,
        };

        let artifact = draft.finalize(next, Utc::now())?;
        let dir = self.artifact_dir(artifact.kind, &artifact.id);
        fs::create_dir_all(&dir).await?;

        let final_path = dir.join(version_file(next));
        let tmp_path = dir.join(format!(".{}.tmp", version_file(next)));
        let encoded = serde_json::to_vec_pretty(&artifact)?;

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&encoded).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &final_path).await?;

        tracing::debug!(version = next, hash = %artifact.content_hash.short(), "artifact stored");
        Ok(artifact)
    }

    #[tracing::instrument(skip(self, result), fields(gate = %result.gate_name, verdict = %result.verdict))]
    async fn append_verdict(
        &self,
        id: &ArtifactId,
        observed_version: u64,
        result: GateResult,
    ) -> Result<(), StoreError> {
        check_result_target(id, observed_version, &result)?;
        let _guard = self.write_lock.lock().await;

        let (_, versions) = self
            .locate(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let current = versions.last().copied().unwrap_or_default();
        if current != observed_version {
            return Err(StoreError::Conflict {
                id: id.clone(),
                observed: observed_version,
                current,
            });
        }

        let path = self.ledger_path(id);
        drop_torn_tail(&path).await?;

        let mut line = serde_json::to_vec(&result)?;
        line.push(b'\n');
        let mut ledger = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        ledger.write_all(&line).await?;
        ledger.sync_data().await?;
        Ok(())
    }

    async fn verdicts(&self, id: &ArtifactId) -> Result<Vec<GateResult>, StoreError> {
        if self.locate(id).await?.is_none() {
            return Err(StoreError::NotFound(id.clone()));
        }
        self.read_ledger(id).await
    }

    async fn versions(&self, id: &ArtifactId) -> Result<Vec<u64>, StoreError> {
        self.locate(id)
            .await?
            .map(|(_, versions)| versions)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn latest_of_kind(
        &self,
        pipeline: &str,
        kind: ArtifactKind,
    ) -> Result<Option<Artifact>, StoreError> {
        let kind_dir = self.root.join("artifacts").join(kind.as_str());
        let mut entries = match fs::read_dir(&kind_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Only the winner is verified; records of other pipelines never fail the scan.
        let mut best: Option<(DateTime<Utc>, ArtifactId, u64)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Ok(id) = ArtifactId::new(name) else {
                continue;
            };
            let Some(&latest) = list_versions(&entry.path()).await?.last() else {
                continue;
            };
            let path = entry.path().join(version_file(latest));
            let header = match read_header(&path).await {
                Ok(header) => header,
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        %error,
                        "skipping unreadable artifact record"
                    );
                    continue;
                }
            };
            if header.pipeline != pipeline {
                continue;
            }
            let newer = best
                .as_ref()
                .map_or(true, |(at, best_id, _)| (header.created_at, &id) > (*at, best_id));
            if newer {
                best = Some((header.created_at, id, latest));
            }
        }

        match best {
            Some((_, id, version)) => {
                let mut artifact = self.read_version(kind, &id, version).await?;
                artifact.verdict_history = self.read_ledger(&id).await?;
                Ok(Some(artifact))
            }
            None => Ok(None),
        }
    }
}

/// Fields needed to rank a record without verifying it
#[derive(Deserialize)]
struct RecordHeader {
    pipeline: String,
    created_at: DateTime<Utc>,
}

async fn read_header(path: &Path) -> Result<RecordHeader, StoreError> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Cut a ledger back to its last complete line so the next append starts clean
async fn drop_torn_tail(path: &Path) -> Result<(), StoreError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if bytes.last().map_or(true, |&b| b == b'\n') {
        return Ok(());
    }
    let keep = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |end| end + 1);
    tracing::warn!(
        path = %path.display(),
        dropped = bytes.len() - keep,
        "truncating torn ledger tail before append"
    );
    let file = fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(keep as u64).await?;
    file.sync_data().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_file_names() {
        assert_eq!(version_file(12), "v000012.json");
        assert_eq!(parse_version_file("v000012.json"), Some(12));
        assert_eq!(parse_version_file(".v000012.json.tmp"), None);
        assert_eq!(parse_version_file("notes.txt"), None);
    }
}

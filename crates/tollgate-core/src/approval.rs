//! External approval signal
//!
//! The orchestrator asks an [`ApprovalSource`] whether a stage may advance
//! on a PASS or CONCERN verdict. How approval is obtained (a prompt, a
//! review tool, a file edited by hand) is the source's business.

use crate::error::ConfigError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Whether a human (or another system) has signed off on a stage
#[async_trait]
pub trait ApprovalSource: Send + Sync {
    /// # Errors
    /// Returns error if the approval record cannot be read
    async fn is_approved(&self, pipeline: &str, stage: &str) -> Result<bool, ConfigError>;
}

/// In-memory approvals, mutable through a shared reference
#[derive(Debug, Default)]
pub struct StaticApprovals {
    approve_everything: bool,
    approved: RwLock<HashSet<(String, String)>>,
}

impl StaticApprovals {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A source that approves every stage of every pipeline
    #[inline]
    #[must_use]
    pub fn everything() -> Self {
        Self {
            approve_everything: true,
            approved: RwLock::default(),
        }
    }

    pub fn approve(&self, pipeline: &str, stage: &str) {
        self.approved
            .write()
            .insert((pipeline.to_string(), stage.to_string()));
    }

    pub fn revoke(&self, pipeline: &str, stage: &str) {
        self.approved
            .write()
            .remove(&(pipeline.to_string(), stage.to_string()));
    }
}

#[async_trait]
impl ApprovalSource for StaticApprovals {
    async fn is_approved(&self, pipeline: &str, stage: &str) -> Result<bool, ConfigError> {
        Ok(self.approve_everything
            || self
                .approved
                .read()
                .contains(&(pipeline.to_string(), stage.to_string())))
    }
}

/// Approvals recorded in a TOML file, one array of stage names per pipeline
///
/// ```toml
/// checkout = ["requirements", "plan"]
/// ```
///
/// A missing file approves nothing. The file is re-read on every query so
/// edits take effect without a restart. Writes replace the file through a
/// rename and serialize across clones of one source; concurrent writers in
/// separate processes may still lose an update.
#[derive(Debug, Clone)]
pub struct FileApprovals {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

type ApprovalTable = BTreeMap<String, BTreeSet<String>>;

impl FileApprovals {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::default(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_table(&self) -> Result<ApprovalTable, ConfigError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ApprovalTable::new()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    async fn replace_file(&self, contents: &[u8]) -> std::io::Result<()> {
        let name = self
            .path
            .file_name()
            .map_or_else(|| "approvals".into(), |n| n.to_string_lossy());
        let tmp_path = self
            .path
            .with_file_name(format!(".{name}.{}.tmp", std::process::id()));
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, &self.path).await
    }

    /// Record an approval, creating the file if needed
    ///
    /// # Errors
    /// Returns error if the file cannot be read or written
    pub async fn approve(&self, pipeline: &str, stage: &str) -> Result<(), ConfigError> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.read_table().await?;
        table
            .entry(pipeline.to_string())
            .or_default()
            .insert(stage.to_string());
        let text = toml::to_string(&table).map_err(|e| ConfigError::InvalidValue {
            key: pipeline.to_string(),
            reason: e.to_string(),
        })?;
        self.replace_file(text.as_bytes())
            .await
            .map_err(|source| ConfigError::Io {
                path: self.path.clone(),
                source,
            })?;
        tracing::info!(pipeline, stage, path = %self.path.display(), "stage approved");
        Ok(())
    }
}

#[async_trait]
impl ApprovalSource for FileApprovals {
    async fn is_approved(&self, pipeline: &str, stage: &str) -> Result<bool, ConfigError> {
        Ok(self
            .read_table()
            .await?
            .get(pipeline)
            .is_some_and(|stages| stages.contains(stage)))
    }
}

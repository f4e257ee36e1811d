//! Report storage backends

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ghostrun_core::{PreflightReport, ReportSummary};
use tokio::sync::RwLock;
use tracing::debug;

/// Errors raised by report storage
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Report not found for run '{0}'")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Where finished preflight reports are kept
///
/// Reports are immutable once stored; storing again under the same run id
/// replaces the previous report.
#[async_trait]
pub trait ReportStorage: Send + Sync {
    async fn store(&self, run_id: &str, report: &PreflightReport) -> Result<(), StorageError>;

    async fn get(&self, run_id: &str) -> Result<Option<PreflightReport>, StorageError>;

    /// Newest first, optionally restricted to one tenant
    async fn list(
        &self,
        tenant_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ReportSummary>, StorageError>;

    /// Returns whether a report was removed
    async fn delete(&self, run_id: &str) -> Result<bool, StorageError>;
}

fn newest_first(mut summaries: Vec<ReportSummary>, limit: usize) -> Vec<ReportSummary> {
    summaries.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
    summaries.truncate(limit);
    summaries
}

/// Process-local storage
#[derive(Default)]
pub struct InMemoryReportStorage {
    reports: RwLock<HashMap<String, PreflightReport>>,
}

impl InMemoryReportStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStorage for InMemoryReportStorage {
    async fn store(&self, run_id: &str, report: &PreflightReport) -> Result<(), StorageError> {
        self.reports
            .write()
            .await
            .insert(run_id.to_string(), report.clone());
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<PreflightReport>, StorageError> {
        Ok(self.reports.read().await.get(run_id).cloned())
    }

    async fn list(
        &self,
        tenant_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ReportSummary>, StorageError> {
        let reports = self.reports.read().await;
        let summaries = reports
            .values()
            .filter(|r| tenant_id.map_or(true, |t| r.tenant_id == t))
            .map(|r| r.summary())
            .collect();
        Ok(newest_first(summaries, limit))
    }

    async fn delete(&self, run_id: &str) -> Result<bool, StorageError> {
        Ok(self.reports.write().await.remove(run_id).is_some())
    }
}

/// One pretty-printed JSON file per run under a directory
pub struct FileReportStorage {
    root: PathBuf,
}

impl FileReportStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf, StorageError> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::Backend(format!(
                "run id '{}' is not a valid file name",
                run_id
            )));
        }
        Ok(self.root.join(format!("{}.json", run_id)))
    }
}

#[async_trait]
impl ReportStorage for FileReportStorage {
    async fn store(&self, run_id: &str, report: &PreflightReport) -> Result<(), StorageError> {
        let path = self.path_for(run_id)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let content = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&path, content).await?;
        debug!("Stored preflight report at {:?}", path);
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<PreflightReport>, StorageError> {
        let path = self.path_for(run_id)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        tenant_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ReportSummary>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read(&path).await?;
            let report: PreflightReport = serde_json::from_slice(&content)?;
            if tenant_id.map_or(true, |t| report.tenant_id == t) {
                summaries.push(report.summary());
            }
        }
        Ok(newest_first(summaries, limit))
    }

    async fn delete(&self, run_id: &str) -> Result<bool, StorageError> {
        let path = self.path_for(run_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

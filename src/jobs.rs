//! Job status records
//! One JSON file per job under `<output_dir>/jobs/`, written only by the task running that job.

use anyhow::{Context, Result};
use rust_i18n::t;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::ComposeError;
use crate::types::{ArtifactRef, RenderOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// Pipeline progress, reported through the stage callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Materializing,
    Planning,
    Composing,
    Rendering,
    CleaningUp,
}

impl JobStage {
    /// Localized name shown on the console
    pub fn label(&self) -> String {
        match self {
            JobStage::Materializing => t!("stage.materializing").to_string(),
            JobStage::Planning => t!("stage.planning").to_string(),
            JobStage::Composing => t!("stage.composing").to_string(),
            JobStage::Rendering => t!("stage.rendering").to_string(),
            JobStage::CleaningUp => t!("stage.cleaning_up").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub stage: Option<JobStage>,
    /// Failure detail, or the output location on success
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub artifact: Option<ArtifactRef>,
    #[serde(default)]
    pub total_duration: Option<f64>,
    pub updated_at: String,
}

impl JobRecord {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: JobStatus::Queued,
            stage: None,
            detail: None,
            error_kind: None,
            artifact: None,
            total_duration: None,
            updated_at: chrono::Local::now().to_rfc3339(),
        }
    }
}

/// Records of the jobs rendered into `output_dir`
pub fn jobs_dir(output_dir: &Path) -> PathBuf {
    output_dir.join("jobs")
}

pub fn record_path(jobs_dir: &Path, job_id: &str) -> PathBuf {
    jobs_dir.join(format!("{}.json", job_id))
}

/// Read a stored record
pub fn load_record(jobs_dir: &Path, job_id: &str) -> Result<JobRecord> {
    let path = record_path(jobs_dir, job_id);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("No job record at {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Owns and persists the record of one job
pub struct JobTracker {
    path: PathBuf,
    record: Mutex<JobRecord>,
}

impl JobTracker {
    /// Create the record in the queued state
    pub fn create(jobs_dir: &Path, job_id: &str) -> Result<Self> {
        fs::create_dir_all(jobs_dir)
            .with_context(|| format!("Failed to create {}", jobs_dir.display()))?;
        let tracker = Self {
            path: record_path(jobs_dir, job_id),
            record: Mutex::new(JobRecord::new(job_id)),
        };
        tracker.update(|_| {})?;
        Ok(tracker)
    }

    fn update(&self, apply: impl FnOnce(&mut JobRecord)) -> Result<()> {
        let mut record = self
            .record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut record);
        record.updated_at = chrono::Local::now().to_rfc3339();

        let json = serde_json::to_string_pretty(&*record)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Record a stage change. Write failures are logged, the job goes on.
    pub fn stage(&self, stage: JobStage) {
        let result = self.update(|record| {
            record.status = JobStatus::Running;
            record.stage = Some(stage);
        });
        if let Err(e) = result {
            log::warn!("Failed to update job record: {:#}", e);
        }
    }

    pub fn succeed(&self, outcome: &RenderOutcome) -> Result<()> {
        self.update(|record| {
            record.status = JobStatus::Succeeded;
            record.stage = None;
            record.detail = Some(outcome.artifact.to_string());
            record.artifact = Some(outcome.artifact.clone());
            record.total_duration = Some(outcome.total_duration);
        })
    }

    pub fn fail(&self, error: &ComposeError) -> Result<()> {
        self.fail_with(error.kind(), &error.to_string())
    }

    /// Failures that happen outside the compositor (e.g. a panicked task)
    pub fn fail_with(&self, kind: &str, detail: &str) -> Result<()> {
        self.update(|record| {
            record.status = JobStatus::Failed;
            record.error_kind = Some(kind.to_string());
            record.detail = Some(detail.to_string());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = JobTracker::create(dir.path(), "job-1").unwrap();
        assert_eq!(load_record(dir.path(), "job-1").unwrap().status, JobStatus::Queued);

        tracker.stage(JobStage::Rendering);
        let record = load_record(dir.path(), "job-1").unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert_eq!(record.stage, Some(JobStage::Rendering));

        tracker
            .succeed(&RenderOutcome {
                job_id: "job-1".to_string(),
                artifact: ArtifactRef::LocalPath(PathBuf::from("/out/job-1.mp4")),
                total_duration: 13.0,
            })
            .unwrap();
        let record = load_record(dir.path(), "job-1").unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.total_duration, Some(13.0));
        assert_eq!(record.detail.as_deref(), Some("/out/job-1.mp4"));
    }

    #[test]
    fn test_failed_record_keeps_stage_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = JobTracker::create(dir.path(), "job-2").unwrap();
        tracker.stage(JobStage::Materializing);
        tracker
            .fail(&ComposeError::asset_fetch("narration", "https://x/a.mp3", "HTTP 404"))
            .unwrap();

        let record = load_record(dir.path(), "job-2").unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.stage, Some(JobStage::Materializing));
        assert_eq!(record.error_kind.as_deref(), Some("asset_fetch"));
        assert!(record.detail.unwrap().contains("HTTP 404"));
    }

    #[test]
    fn test_fail_with_reports_write_errors() {
        let dir = tempfile::tempdir().unwrap();
        let records = dir.path().join("jobs");
        let tracker = JobTracker::create(&records, "job-3").unwrap();
        tracker.fail_with("internal", "task panicked").unwrap();
        assert_eq!(
            load_record(&records, "job-3").unwrap().error_kind.as_deref(),
            Some("internal")
        );

        fs::remove_dir_all(&records).unwrap();
        assert!(tracker.fail_with("internal", "task panicked").is_err());
    }

    #[test]
    fn test_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_record(dir.path(), "nope").is_err());
    }
}

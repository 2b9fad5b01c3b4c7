//! Job lifecycle and ingest result
//!
//! accepted → running → completed | failed | skipped-duplicate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    /// Trigger decoded, nothing done yet
    Accepted,
    Running,
    Completed,
    /// Bundle already archived; nothing further to do
    SkippedDuplicate,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Accepted => "accepted",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::SkippedDuplicate => "skipped-duplicate",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accepted" => Some(JobState::Accepted),
            "running" => Some(JobState::Running),
            "completed" => Some(JobState::Completed),
            "skipped-duplicate" => Some(JobState::SkippedDuplicate),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::SkippedDuplicate | JobState::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub scan_id: String,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Surfaced error text when failed
    pub message: Option<String>,
    /// Key of the stored job log
    pub log_ref: String,
}

impl JobRecord {
    pub fn new(job_id: impl Into<String>, scan_id: impl Into<String>, log_ref: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            scan_id: scan_id.into(),
            state: JobState::Accepted,
            started_at: Utc::now(),
            ended_at: None,
            message: None,
            log_ref: log_ref.into(),
        }
    }

    /// Move to `new_state`, stamping the end time on terminal states.
    /// Transitions out of a terminal state are ignored.
    pub fn transition_to(&mut self, new_state: JobState) -> bool {
        if self.state.is_terminal() {
            tracing::warn!(
                job_id = %self.job_id,
                from = self.state.as_str(),
                to = new_state.as_str(),
                "Ignoring transition out of terminal job state"
            );
            return false;
        }
        self.state = new_state;
        if new_state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if self.transition_to(JobState::Failed) {
            self.message = Some(message.into());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Spectra,
    Image,
    Housekeeping,
    Unknown,
}

/// Returned by a successful ingest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub working_dir: PathBuf,
    pub is_update: bool,
    /// `None` when the job was skipped as a duplicate delivery
    pub change_kind: Option<ChangeKind>,
    pub scan_title: String,
    pub scan_id: String,
    pub job_id: String,
}

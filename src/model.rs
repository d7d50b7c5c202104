use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A trained network to evaluate, identified by the last component of its
/// folder path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub source_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub command: String,
    pub output_dir: PathBuf,
}

/// Model name to rendered command, in model-list order. The position of an
/// entry is the array task index that runs it.
pub type CommandSet = IndexMap<String, StageCommand>;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transform,
    Retrieval,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transform => "transform",
            Self::Retrieval => "retrieval",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduler-assigned job identifier.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub model: String,
    pub category: String,
    pub avg_score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedModel {
    pub model: String,
    pub path: String,
    pub reason: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Prepared,
    Submitted,
    Waited,
    Completed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prepared => "prepared",
            Self::Submitted => "submitted",
            Self::Waited => "waited",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestModel {
    pub name: String,
    pub source_path: String,
    pub transform_output_dir: String,
    pub retrieval_output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandListArtifact {
    pub path: String,
    pub sha256: String,
    pub command_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunJobs {
    pub transform_job_id: Option<JobId>,
    pub retrieval_job_id: Option<JobId>,
    pub wait_exit_status: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub models: usize,
    pub result_rows: usize,
    pub skipped_models: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: String,
    pub updated_at: String,
    pub workspace: String,
    pub models_file: String,
    pub notify_address: Option<String>,
    pub models: Vec<ManifestModel>,
    pub transform_commands: CommandListArtifact,
    pub retrieval_commands: CommandListArtifact,
    pub results_table: Option<String>,
    pub jobs: RunJobs,
    pub counts: RunCounts,
    pub skipped_models: Vec<SkippedModel>,
    pub warnings: Vec<String>,
}

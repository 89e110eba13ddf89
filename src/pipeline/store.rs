use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files a run may leave behind in its directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    CollectedClaims,
    GoldEvidence,
    RetrievedEvidence,
    Predictions,
    EvaluationResults,
    PipelineSummary,
    ErrorState,
}

impl Artifact {
    pub const ALL: [Artifact; 7] = [
        Artifact::CollectedClaims,
        Artifact::GoldEvidence,
        Artifact::RetrievedEvidence,
        Artifact::Predictions,
        Artifact::EvaluationResults,
        Artifact::PipelineSummary,
        Artifact::ErrorState,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Artifact::CollectedClaims => "collected_claims.json",
            Artifact::GoldEvidence => "gold_evidence.json",
            Artifact::RetrievedEvidence => "retrieved_evidence.json",
            Artifact::Predictions => "predictions.json",
            Artifact::EvaluationResults => "evaluation_results.json",
            Artifact::PipelineSummary => "pipeline_summary.json",
            Artifact::ErrorState => "error_state.json",
        }
    }
}

/// One run's directory under the output root.
#[derive(Debug, Clone)]
pub struct RunDir {
    run_id: String,
    path: PathBuf,
}

impl RunDir {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn artifact_path(&self, artifact: Artifact) -> PathBuf {
        self.path.join(artifact.file_name())
    }

    pub fn has(&self, artifact: Artifact) -> bool {
        self.artifact_path(artifact).is_file()
    }

    /// Pretty JSON, non-ASCII kept as is. Written to a temporary file and
    /// renamed so a crash never leaves a half-written artifact.
    pub fn write<T: Serialize + ?Sized>(&self, artifact: Artifact, value: &T) -> Result<()> {
        let target = self.artifact_path(artifact);
        let tmp = target.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(value)?;
        std::fs::write(&tmp, body).map_err(|e| io_error("writing", &tmp, e))?;
        std::fs::rename(&tmp, &target).map_err(|e| io_error("replacing", &target, e))?;
        debug!(path = %target.display(), "artifact written");
        Ok(())
    }

    /// `Ok(None)` when the artifact does not exist yet.
    pub fn read<T: DeserializeOwned>(&self, artifact: Artifact) -> Result<Option<T>> {
        let path = self.artifact_path(artifact);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| io_error("reading", &path, e))?;
        let value = serde_json::from_str(&raw)
            .map_err(|e| Error::DataProcessing(format!("malformed {}: {e}", path.display())))?;
        Ok(Some(value))
    }

    /// Like [`read`](Self::read) but a missing artifact is an error.
    pub fn require<T: DeserializeOwned>(&self, artifact: Artifact) -> Result<T> {
        self.read(artifact)?.ok_or_else(|| {
            Error::DataProcessing(format!(
                "{} not found in run {}; run the step that produces it first",
                artifact.file_name(),
                self.run_id
            ))
        })
    }

    pub fn remove(&self, artifact: Artifact) -> Result<()> {
        let path = self.artifact_path(artifact);
        if path.is_file() {
            std::fs::remove_file(&path).map_err(|e| io_error("removing", &path, e))?;
        }
        Ok(())
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::DataProcessing(format!("{action} {}: {e}", path.display()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Completed,
    Failed,
    InProgress,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunState::Completed => "COMPLETED",
            RunState::Failed => "FAILED",
            RunState::InProgress => "IN_PROGRESS",
        })
    }
}

/// What `status` and `list-runs` report for a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run_id: String,
    pub state: RunState,
    pub timestamp: Option<String>,
    pub claims: Option<usize>,
    pub total_seconds: Option<f64>,
    pub error: Option<String>,
    pub completed_steps: Vec<String>,
    pub artifacts: Vec<(String, bool)>,
}

// Only the fields status reporting needs; the full types live in the pipeline.
#[derive(Deserialize)]
struct SummaryHead {
    timestamp: String,
    #[serde(default)]
    timing: std::collections::BTreeMap<String, f64>,
    results_summary: CountsHead,
}

#[derive(Deserialize)]
struct CountsHead {
    total_claims: usize,
}

#[derive(Deserialize)]
struct ErrorHead {
    timestamp: String,
    error: String,
    #[serde(default)]
    completed_steps: Vec<String>,
}

/// Root directory holding one sub-directory per run.
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: &str) -> Result<RunDir> {
        let valid = !run_id.trim().is_empty()
            && !run_id.contains(['/', '\\'])
            && run_id != "."
            && run_id != "..";
        if !valid {
            return Err(Error::validation("run_id", format!("`{run_id}` is not a usable directory name")));
        }
        Ok(RunDir { run_id: run_id.to_string(), path: self.root.join(run_id) })
    }

    /// Creates the run directory if needed.
    pub fn open(&self, run_id: &str) -> Result<RunDir> {
        let dir = self.run_dir(run_id)?;
        std::fs::create_dir_all(dir.path()).map_err(|e| io_error("creating", dir.path(), e))?;
        Ok(dir)
    }

    /// An existing run; a missing directory is an error.
    pub fn existing(&self, run_id: &str) -> Result<RunDir> {
        let dir = self.run_dir(run_id)?;
        if !dir.path().is_dir() {
            return Err(Error::DataProcessing(format!("run directory not found: {}", dir.path().display())));
        }
        Ok(dir)
    }

    /// A failure record wins over a summary; neither means still running or
    /// abandoned.
    pub fn status(&self, run_id: &str) -> Result<RunStatus> {
        let dir = self.existing(run_id)?;
        let artifacts = Artifact::ALL.iter().map(|a| (a.file_name().to_string(), dir.has(*a))).collect();
        let mut status = RunStatus {
            run_id: run_id.to_string(),
            state: RunState::InProgress,
            timestamp: None,
            claims: None,
            total_seconds: None,
            error: None,
            completed_steps: Vec::new(),
            artifacts,
        };

        if let Some(err) = dir.read::<ErrorHead>(Artifact::ErrorState)? {
            status.state = RunState::Failed;
            status.timestamp = Some(err.timestamp);
            status.error = Some(err.error);
            status.completed_steps = err.completed_steps;
        } else if let Some(summary) = dir.read::<SummaryHead>(Artifact::PipelineSummary)? {
            status.state = RunState::Completed;
            status.timestamp = Some(summary.timestamp);
            status.claims = Some(summary.results_summary.total_claims);
            status.total_seconds = summary.timing.get("total_pipeline").copied();
            status.completed_steps = summary.timing.keys().filter(|k| *k != "total_pipeline").cloned().collect();
        }
        Ok(status)
    }

    /// Every run under the root, newest first. Runs without a timestamp sort
    /// last. A missing root lists nothing.
    pub fn list_runs(&self) -> Result<Vec<RunStatus>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.root).map_err(|e| io_error("listing", &self.root, e))?;
        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error("listing", &self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            runs.push(self.status(&name)?);
        }
        runs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.run_id.cmp(&a.run_id)));
        Ok(runs)
    }
}

//! Run artifact capture and persistence.
//!
//! Long random walks run in CI; when one fails, the seed and the rule trace
//! are everything needed to replay it. This module captures a walk outcome as
//! a JSON artifact on disk so a failure in a matrix job can be reproduced
//! locally with `c3d sim --seed <seed>`.

use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::config::ModelConfig;

/// Snapshot of one walk: seed, configuration, rule trace, and verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifact {
    /// Unique identifier for this run.
    pub run_id: String,
    /// When the run started.
    pub timestamp: DateTime<Utc>,
    /// Deterministic seed the scheduler ran with.
    pub seed: u64,
    /// Machine sizing the run used.
    pub config: ModelConfig,
    /// Rules applied, in order.
    pub events: Vec<String>,
    /// Number of applied steps.
    pub steps: usize,
    /// Whether the run passed or failed.
    pub status: RunStatus,
    /// The failure diagnostic, if any.
    pub error: Option<String>,
}

/// Verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Every step passed every check.
    Passed,
    /// A protocol violation or broken invariant was hit.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl RunArtifact {
    /// Capture a passing run.
    pub fn new(config: ModelConfig, seed: u64, events: Vec<String>) -> Self {
        let timestamp = Utc::now();
        let run_id = format!("walk-seed{}-{}", seed, timestamp.format("%Y%m%d-%H%M%S"));
        Self {
            run_id,
            timestamp,
            seed,
            config,
            steps: events.len(),
            events,
            status: RunStatus::Passed,
            error: None,
        }
    }

    /// Mark the run as failed with a diagnostic.
    pub fn with_failure(mut self, error: impl Into<String>) -> Self {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self
    }

    /// Persist this artifact as `{base_dir}/{run_id}.json`.
    pub fn persist(&self, base_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let base_dir = base_dir.as_ref();
        fs::create_dir_all(base_dir).context("failed to create artifact directory")?;

        let file_path = base_dir.join(format!("{}.json", self.run_id));
        let json =
            serde_json::to_string_pretty(self).context("failed to serialize run artifact")?;
        fs::write(&file_path, json).context("failed to write run artifact")?;

        Ok(file_path)
    }

    /// Load an artifact back from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("failed to read run artifact")?;
        serde_json::from_str(&contents).context("failed to deserialize run artifact")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_captures_the_trace() {
        let artifact = RunArtifact::new(
            ModelConfig::default(),
            42,
            vec!["0: load@s0".into(), "1: deliver@s0: GETS".into()],
        );
        assert_eq!(artifact.seed, 42);
        assert_eq!(artifact.steps, 2);
        assert_eq!(artifact.status, RunStatus::Passed);
        assert!(artifact.error.is_none());
        assert!(artifact.run_id.starts_with("walk-seed42-"));
    }

    #[test]
    fn failure_marking_keeps_the_diagnostic() {
        let artifact = RunArtifact::new(ModelConfig::default(), 7, Vec::new())
            .with_failure("s0 observed v0 but the last committed write was v1");
        assert_eq!(artifact.status, RunStatus::Failed);
        assert_eq!(
            artifact.error.as_deref(),
            Some("s0 observed v0 but the last committed write was v1")
        );
    }

    #[test]
    fn artifact_roundtrips_through_json() {
        let original = RunArtifact::new(ModelConfig::default(), 42, vec!["0: load@s0".into()]);
        let json = serde_json::to_string(&original).expect("serialize");
        let loaded: RunArtifact = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(original.run_id, loaded.run_id);
        assert_eq!(original.seed, loaded.seed);
        assert_eq!(original.events, loaded.events);
        assert_eq!(original.status, loaded.status);
    }
}

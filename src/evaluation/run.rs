//! Evaluation run state.
//!
//! Stages advance strictly forward: `pending -> running -> succeeded|failed`
//! or `pending -> skipped`, and a stage cannot start while an earlier one is
//! still pending or running.

use super::model::Module;
use crate::llm::{GeneratedTest, Protocol};
use crate::tools::{BuildReport, CoverageResult, MutationResult, TestCounts};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Compile,
    Execute,
    Coverage,
    Mutation,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 4] = [Stage::Compile, Stage::Execute, Stage::Coverage, Stage::Mutation];

    pub fn index(&self) -> usize {
        match self {
            Stage::Compile => 0,
            Stage::Execute => 1,
            Stage::Coverage => 2,
            Stage::Mutation => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Compile => "compile",
            Stage::Execute => "execute",
            Stage::Coverage => "coverage",
            Stage::Mutation => "mutation",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    Skipped {
        reason: String,
    },
}

impl StageStatus {
    pub fn name(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed { .. } => "failed",
            StageStatus::Skipped { .. } => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Succeeded | StageStatus::Failed { .. } | StageStatus::Skipped { .. }
        )
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            StageStatus::Failed { reason, .. } | StageStatus::Skipped { reason } => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip)]
    started: Option<Instant>,
}

impl StageRecord {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            duration_ms: None,
            started: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot move {stage} from {from} to {to}")]
    Invalid {
        stage: Stage,
        from: &'static str,
        to: &'static str,
    },

    #[error("cannot start {stage} while {blocked_by} is {state}")]
    OutOfOrder {
        stage: Stage,
        blocked_by: Stage,
        state: &'static str,
    },
}

/// Where the run's tests came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestSource {
    Generated {
        /// Copy kept for inspection, when it could be written
        #[serde(skip_serializing_if = "Option::is_none")]
        saved_to: Option<PathBuf>,
        generation: GeneratedTest,
    },
    Supplied {
        path: PathBuf,
    },
    GenerationFailed {
        protocol: Protocol,
        error: String,
    },
}

/// One attempt to evaluate a module against a set of tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRun {
    /// `<module-id>_<tier>_<YYYYMMDD_HHMMSS>`
    pub id: String,
    pub module: Module,
    pub test_source: TestSource,
    stages: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<TestCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutation: Option<MutationResult>,
    pub started_at: DateTime<Local>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Local>>,
}

impl EvaluationRun {
    pub fn new(module: Module, test_source: TestSource) -> Self {
        let started_at = Local::now();
        Self {
            id: format!(
                "{}_{}_{}",
                module.id,
                module.tier,
                started_at.format("%Y%m%d_%H%M%S")
            ),
            module,
            test_source,
            stages: Stage::ALL.iter().copied().map(StageRecord::new).collect(),
            build: None,
            execution: None,
            coverage: None,
            mutation: None,
            started_at,
            finished_at: None,
        }
    }

    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    pub fn status(&self, stage: Stage) -> &StageStatus {
        &self.stages[stage.index()].status
    }

    /// Generation record, when the tests were generated.
    pub fn generation(&self) -> Option<&GeneratedTest> {
        match &self.test_source {
            TestSource::Generated { generation, .. } => Some(generation),
            _ => None,
        }
    }

    pub fn protocol(&self) -> Option<Protocol> {
        match &self.test_source {
            TestSource::Generated { generation, .. } => Some(generation.protocol),
            TestSource::GenerationFailed { protocol, .. } => Some(*protocol),
            TestSource::Supplied { .. } => None,
        }
    }

    pub fn start(&mut self, stage: Stage) -> Result<(), TransitionError> {
        if let Some(blocker) = self.stages[..stage.index()]
            .iter()
            .find(|r| !r.status.is_terminal())
        {
            return Err(TransitionError::OutOfOrder {
                stage,
                blocked_by: blocker.stage,
                state: blocker.status.name(),
            });
        }
        let record = self.expect_status(stage, &StageStatus::Pending, "running")?;
        record.status = StageStatus::Running;
        record.started = Some(Instant::now());
        tracing::debug!("[{}] {} started", self.id, stage);
        Ok(())
    }

    pub fn succeed(&mut self, stage: Stage) -> Result<(), TransitionError> {
        let record = self.expect_status(stage, &StageStatus::Running, "succeeded")?;
        record.status = StageStatus::Succeeded;
        record.duration_ms = record.started.map(|t| t.elapsed().as_millis() as u64);
        Ok(())
    }

    pub fn fail(
        &mut self,
        stage: Stage,
        reason: impl Into<String>,
        output: Option<String>,
    ) -> Result<(), TransitionError> {
        let record = self.expect_status(stage, &StageStatus::Running, "failed")?;
        record.status = StageStatus::Failed {
            reason: reason.into(),
            output: output.filter(|o| !o.trim().is_empty()),
        };
        record.duration_ms = record.started.map(|t| t.elapsed().as_millis() as u64);
        Ok(())
    }

    pub fn skip(&mut self, stage: Stage, reason: impl Into<String>) -> Result<(), TransitionError> {
        let record = self.expect_status(stage, &StageStatus::Pending, "skipped")?;
        record.status = StageStatus::Skipped {
            reason: reason.into(),
        };
        Ok(())
    }

    /// Skip every stage that has not started yet.
    pub fn skip_remaining(&mut self, reason: &str) {
        for record in &mut self.stages {
            if record.status == StageStatus::Pending {
                record.status = StageStatus::Skipped {
                    reason: reason.to_string(),
                };
            }
        }
    }

    /// Force every stage into a terminal state. Running stages fail with
    /// `reason`; pending ones are skipped.
    pub fn abort(&mut self, reason: &str) {
        for record in &mut self.stages {
            if record.status == StageStatus::Running {
                record.status = StageStatus::Failed {
                    reason: reason.to_string(),
                    output: None,
                };
                record.duration_ms = record.started.map(|t| t.elapsed().as_millis() as u64);
            }
        }
        self.skip_remaining(reason);
    }

    /// Stamp the finish time. Unresolved stages are aborted first.
    pub fn finish(&mut self) {
        if !self.is_terminal() {
            tracing::warn!("[{}] finished with unresolved stages", self.id);
            self.abort("evaluation ended before this stage resolved");
        }
        self.finished_at = Some(Local::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.stages.iter().all(|r| r.status.is_terminal())
    }

    /// Every stage succeeded.
    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|r| r.status == StageStatus::Succeeded)
    }

    /// The first failed stage with its reason and captured output.
    pub fn failed_stage(&self) -> Option<(Stage, &str, Option<&str>)> {
        self.stages.iter().find_map(|r| match &r.status {
            StageStatus::Failed { reason, output } => {
                Some((r.stage, reason.as_str(), output.as_deref()))
            }
            _ => None,
        })
    }

    /// Statuses in stage order, without timings.
    pub fn statuses(&self) -> Vec<(Stage, StageStatus)> {
        self.stages.iter().map(|r| (r.stage, r.status.clone())).collect()
    }

    pub fn total_stage_ms(&self) -> u64 {
        self.stages.iter().filter_map(|r| r.duration_ms).sum()
    }

    /// Machine time spent producing and scoring the tests.
    pub fn ai_time_ms(&self) -> u64 {
        self.generation().map(|g| g.latency_ms).unwrap_or(0) + self.total_stage_ms()
    }

    fn expect_status(
        &mut self,
        stage: Stage,
        expected: &StageStatus,
        to: &'static str,
    ) -> Result<&mut StageRecord, TransitionError> {
        let record = &mut self.stages[stage.index()];
        if &record.status != expected {
            return Err(TransitionError::Invalid {
                stage,
                from: record.status.name(),
                to,
            });
        }
        Ok(record)
    }
}

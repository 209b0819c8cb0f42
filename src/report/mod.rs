//! Aggregated evaluation reports.
//!
//! A [`Report`] is built from terminal [`EvaluationRun`]s only. It carries
//! threshold verdicts per run and, for a baseline/experimental pair, the
//! comparison metrics.

pub mod render;
pub mod writer;

pub use render::{render, ReportFormat};
pub use writer::write_report;

use crate::config::EvaluationConfig;
use crate::evaluation::{ComplexityTier, EvaluationRun};
use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("run {0} still has unresolved stages")]
    NotTerminal(String),
}

/// Coverage and mutation score against the configured minimums.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ThresholdVerdict {
    pub coverage_threshold: f64,
    pub branch_coverage_threshold: f64,
    pub mutation_threshold: f64,
    /// `None` when the coverage stage produced no result
    pub coverage_met: Option<bool>,
    /// `None` when no branch counters were reported
    pub branch_met: Option<bool>,
    /// `None` when the mutation stage produced no result
    pub mutation_met: Option<bool>,
}

impl ThresholdVerdict {
    pub fn evaluate(run: &EvaluationRun, config: &EvaluationConfig) -> Self {
        Self {
            coverage_threshold: config.coverage_threshold,
            branch_coverage_threshold: config.branch_coverage_threshold,
            mutation_threshold: config.mutation_threshold,
            coverage_met: run
                .coverage
                .as_ref()
                .map(|c| c.line_coverage >= config.coverage_threshold),
            branch_met: run
                .coverage
                .as_ref()
                .and_then(|c| c.branch_coverage)
                .map(|b| b >= config.branch_coverage_threshold),
            mutation_met: run
                .mutation
                .as_ref()
                .map(|m| m.score >= config.mutation_threshold),
        }
    }

    /// Modules without branches pass the branch minimum trivially.
    pub fn passed(&self) -> bool {
        self.coverage_met == Some(true)
            && self.mutation_met == Some(true)
            && self.branch_met != Some(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub label: String,
    pub run: EvaluationRun,
    pub thresholds: ThresholdVerdict,
    /// Operator estimate of the time to write the tests by hand
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_minutes: Option<f64>,
    /// `(manual - ai) / manual * 100`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub efficiency_gain: Option<f64>,
}

impl RunSummary {
    fn new(label: &str, run: EvaluationRun, config: &EvaluationConfig, manual_minutes: Option<f64>) -> Self {
        let thresholds = ThresholdVerdict::evaluate(&run, config);
        let efficiency_gain = manual_minutes.and_then(|m| efficiency_gain(m, run.ai_time_ms()));
        Self {
            label: label.to_string(),
            run,
            thresholds,
            manual_minutes,
            efficiency_gain,
        }
    }

    pub fn coverage(&self) -> Option<f64> {
        self.run.coverage.as_ref().map(|c| c.line_coverage)
    }

    pub fn mutation_score(&self) -> Option<f64> {
        self.run.mutation.as_ref().map(|m| m.score)
    }
}

/// Experimental minus baseline.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Comparison {
    pub coverage_delta: Option<f64>,
    pub mutation_score_delta: Option<f64>,
    /// Difference in generation plus stage time
    pub duration_delta_secs: f64,
    pub efficiency_gain_delta: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub title: String,
    pub generated_at: DateTime<Local>,
    /// Every stage of every run succeeded
    pub complete: bool,
    pub runs: Vec<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
}

impl Report {
    /// Report for a single run.
    pub fn single(
        run: EvaluationRun,
        config: &EvaluationConfig,
        manual_minutes: Option<f64>,
    ) -> Result<Self, ReportError> {
        ensure_terminal(&run)?;
        let title = format!("Test quality report: {}", run.module.id);
        let label = run.module.tier.to_string();
        Ok(Self::build(title, vec![RunSummary::new(&label, run, config, manual_minutes)], None))
    }

    /// Baseline versus experimental report.
    pub fn comparison(
        baseline: EvaluationRun,
        experimental: EvaluationRun,
        config: &EvaluationConfig,
        manual_minutes: (Option<f64>, Option<f64>),
    ) -> Result<Self, ReportError> {
        ensure_terminal(&baseline)?;
        ensure_terminal(&experimental)?;
        let title = format!(
            "Test quality comparison: {} vs {}",
            baseline.module.id, experimental.module.id
        );
        let base = RunSummary::new(&ComplexityTier::Baseline.to_string(), baseline, config, manual_minutes.0);
        let exp = RunSummary::new(
            &ComplexityTier::Experimental.to_string(),
            experimental,
            config,
            manual_minutes.1,
        );

        let delta = |a: Option<f64>, b: Option<f64>| a.zip(b).map(|(a, b)| b - a);
        let comparison = Comparison {
            coverage_delta: delta(base.coverage(), exp.coverage()),
            mutation_score_delta: delta(base.mutation_score(), exp.mutation_score()),
            duration_delta_secs: (exp.run.ai_time_ms() as f64 - base.run.ai_time_ms() as f64) / 1000.0,
            efficiency_gain_delta: delta(base.efficiency_gain, exp.efficiency_gain),
        };

        Ok(Self::build(title, vec![base, exp], Some(comparison)))
    }

    fn build(title: String, runs: Vec<RunSummary>, comparison: Option<Comparison>) -> Self {
        Self {
            title,
            generated_at: Local::now(),
            complete: runs.iter().all(|r| r.run.is_complete()),
            runs,
            comparison,
        }
    }

    /// The run under study: the only run, or the experimental one.
    pub fn primary(&self) -> Option<&RunSummary> {
        self.runs.last()
    }

    pub fn mutation_score(&self) -> Option<f64> {
        self.primary().and_then(RunSummary::mutation_score)
    }

    pub fn coverage(&self) -> Option<f64> {
        self.primary().and_then(RunSummary::coverage)
    }

    /// File name without extension, unique per module, tier and second.
    pub fn artifact_stem(&self) -> String {
        match self.runs.as_slice() {
            [single] => single.run.id.clone(),
            [base, exp] => format!(
                "{}-vs-{}_{}",
                base.run.module.id,
                exp.run.module.id,
                self.generated_at.format("%Y%m%d_%H%M%S")
            ),
            _ => format!("report_{}", self.generated_at.format("%Y%m%d_%H%M%S")),
        }
    }
}

fn ensure_terminal(run: &EvaluationRun) -> Result<(), ReportError> {
    if run.is_terminal() {
        Ok(())
    } else {
        Err(ReportError::NotTerminal(run.id.clone()))
    }
}

/// Percent of manual authoring time saved; `None` without a usable estimate.
pub fn efficiency_gain(manual_minutes: f64, ai_time_ms: u64) -> Option<f64> {
    if manual_minutes <= 0.0 || !manual_minutes.is_finite() {
        return None;
    }
    let ai_minutes = ai_time_ms as f64 / 60_000.0;
    Some((manual_minutes - ai_minutes) / manual_minutes * 100.0)
}

//! Adapters around external build, coverage and mutation tools.
//!
//! Each tool kind is a [`ToolAdapter`]: it knows which commands to run and
//! how to parse what they leave behind. The orchestrator only sees a
//! [`Toolchain`] selected by the module's language.

pub mod jacoco;
pub mod maven;
pub mod mutmut;
pub mod pit;
pub mod process;
pub mod pytest;
pub mod pytest_cov;

use crate::config::ToolsConfig;
use crate::error::{BuildError, ExecutionError, ToolError};
use crate::evaluation::Module;
use crate::language::Language;
use async_trait::async_trait;
use process::{run_all, CancelSignal, Invocation, ProcessOutput};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Paths a stage works with, all inside the run's private workspace.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub module: Module,
    /// Root of the copied project
    pub workspace: PathBuf,
    /// The module's source file inside the workspace
    pub source_file: PathBuf,
    /// The test file inside the workspace
    pub test_file: PathBuf,
}

impl StageContext {
    /// Stem of the test file, which is the test class name for Java.
    pub fn test_name(&self) -> String {
        self.test_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// One kind of external tool: which commands to run and how to read them.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    type Output: Send;
    type Error: From<ToolError> + std::error::Error + Send;

    fn name(&self) -> &'static str;

    fn invocations(&self, ctx: &StageContext) -> Vec<Invocation>;

    fn parse(&self, ctx: &StageContext, outputs: &[ProcessOutput])
        -> Result<Self::Output, Self::Error>;

    async fn run(
        &self,
        ctx: &StageContext,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<Self::Output, Self::Error> {
        let invocations = self.invocations(ctx);
        let outputs = run_all(&invocations, timeout, cancel).await?;
        self.parse(ctx, &outputs)
    }
}

pub type CompileAdapter = Arc<dyn ToolAdapter<Output = BuildReport, Error = BuildError>>;
pub type ExecuteAdapter = Arc<dyn ToolAdapter<Output = TestCounts, Error = ExecutionError>>;
pub type CoverageAdapter = Arc<dyn ToolAdapter<Output = CoverageResult, Error = ToolError>>;
pub type MutationAdapter = Arc<dyn ToolAdapter<Output = MutationResult, Error = ToolError>>;

/// The four stage adapters for one language.
#[derive(Clone)]
pub struct Toolchain {
    pub compile: CompileAdapter,
    pub execute: ExecuteAdapter,
    pub coverage: CoverageAdapter,
    pub mutation: MutationAdapter,
}

impl Toolchain {
    pub fn for_language(language: Language, tools: &ToolsConfig) -> Self {
        match language {
            Language::Java => Self {
                compile: Arc::new(maven::MavenCompile::new(&tools.maven)),
                execute: Arc::new(maven::MavenTest::new(&tools.maven)),
                coverage: Arc::new(jacoco::Jacoco::new(&tools.maven)),
                mutation: Arc::new(pit::Pit::new(&tools.maven)),
            },
            Language::Python => Self {
                compile: Arc::new(pytest::PyCompile::new(&tools.python)),
                execute: Arc::new(pytest::Pytest::new(&tools.python)),
                coverage: Arc::new(pytest_cov::PytestCov::new(&tools.python)),
                mutation: Arc::new(mutmut::Mutmut::new(&tools.mutmut, &tools.python)),
            },
        }
    }

    /// Tool names in stage order, for logs.
    pub fn describe(&self) -> String {
        format!(
            "{} / {} / {} / {}",
            self.compile.name(),
            self.execute.name(),
            self.coverage.name(),
            self.mutation.name()
        )
    }
}

/// Result of a successful compile stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BuildReport {
    pub warnings: Vec<String>,
}

/// Test outcomes reported by a test runner.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
    pub errored: u32,
    pub skipped: u32,
}

impl TestCounts {
    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.errored + self.skipped
    }

    pub fn unsuccessful(&self) -> u32 {
        self.failed + self.errored
    }

    /// Whether any test actually ran to an assertion outcome.
    pub fn has_results(&self) -> bool {
        self.passed + self.failed > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoverageResult {
    pub tool: String,
    /// Percent of lines covered
    pub line_coverage: f64,
    /// Percent of branches covered, when the tool measures them
    pub branch_coverage: Option<f64>,
    pub lines_covered: u64,
    pub lines_total: u64,
}

impl CoverageResult {
    pub fn from_counts(
        tool: &str,
        lines_covered: u64,
        lines_total: u64,
        branches: Option<(u64, u64)>,
    ) -> Self {
        Self {
            tool: tool.to_string(),
            line_coverage: percent(lines_covered, lines_total),
            branch_coverage: branches
                .filter(|(_, total)| *total > 0)
                .map(|(covered, total)| percent(covered, total)),
            lines_covered,
            lines_total,
        }
    }
}

/// Kill/survive classification as reported by the mutation tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MutantStatus {
    Killed,
    Survived,
    TimedOut,
    NoCoverage,
    /// The tool could not run this mutant
    Unviable,
}

impl std::fmt::Display for MutantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutantStatus::Killed => write!(f, "killed"),
            MutantStatus::Survived => write!(f, "survived"),
            MutantStatus::TimedOut => write!(f, "timed_out"),
            MutantStatus::NoCoverage => write!(f, "no_coverage"),
            MutantStatus::Unviable => write!(f, "unviable"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MutantRecord {
    pub id: String,
    pub status: MutantStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MutationResult {
    pub tool: String,
    /// detected / total * 100
    pub score: f64,
    /// Mutants counted towards the score (unviable excluded)
    pub total: u32,
    pub killed: u32,
    pub survived: u32,
    pub timed_out: u32,
    pub no_coverage: u32,
    pub unviable: u32,
    pub mutants: Vec<MutantRecord>,
}

impl MutationResult {
    pub fn from_mutants(tool: &str, mutants: Vec<MutantRecord>) -> Self {
        let count = |status| mutants.iter().filter(|m| m.status == status).count() as u32;
        let mut result = Self::from_counts(
            tool,
            count(MutantStatus::Killed),
            count(MutantStatus::Survived),
            count(MutantStatus::TimedOut),
            count(MutantStatus::NoCoverage),
            count(MutantStatus::Unviable),
        );
        result.mutants = mutants;
        result
    }

    /// Build from summary counts when the tool gives no per-mutant listing.
    pub fn from_counts(
        tool: &str,
        killed: u32,
        survived: u32,
        timed_out: u32,
        no_coverage: u32,
        unviable: u32,
    ) -> Self {
        let total = killed + survived + timed_out + no_coverage;
        Self {
            tool: tool.to_string(),
            score: percent(u64::from(killed + timed_out), u64::from(total)),
            total,
            killed,
            survived,
            timed_out,
            no_coverage,
            unviable,
            mutants: Vec::new(),
        }
    }

    pub fn detected(&self) -> u32 {
        self.killed + self.timed_out
    }
}

/// Percentage in [0, 100]; zero when there is nothing to measure.
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Resolve a configured executable against the workspace when it is a
/// relative path like `./mvnw`.
pub fn resolve_program(program: &str, workspace: &std::path::Path) -> String {
    if program.starts_with("./") || program.starts_with("../") {
        workspace.join(program).to_string_lossy().into_owned()
    } else {
        program.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutant(id: &str, status: MutantStatus) -> MutantRecord {
        MutantRecord {
            id: id.to_string(),
            status,
            location: None,
            description: None,
        }
    }

    // =========================================================================
    // Score tests
    // =========================================================================

    #[test]
    fn test_mutation_score_counts_timeouts_as_detected() {
        let result = MutationResult::from_mutants(
            "pit",
            vec![
                mutant("1", MutantStatus::Killed),
                mutant("2", MutantStatus::Killed),
                mutant("3", MutantStatus::TimedOut),
                mutant("4", MutantStatus::Survived),
                mutant("5", MutantStatus::Unviable),
            ],
        );
        assert_eq!(result.total, 4);
        assert_eq!(result.detected(), 3);
        assert_eq!(result.unviable, 1);
        assert_eq!(result.score, 75.0);
        assert_eq!(result.mutants.len(), 5);
    }

    #[test]
    fn test_mutation_score_includes_no_coverage_in_total() {
        let result = MutationResult::from_counts("pit", 1, 0, 0, 1, 0);
        assert_eq!(result.score, 50.0);
    }

    #[test]
    fn test_mutation_score_zero_mutants() {
        let result = MutationResult::from_mutants("mutmut", Vec::new());
        assert_eq!(result.total, 0);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_coverage_from_counts() {
        let result = CoverageResult::from_counts("jacoco", 45, 50, Some((3, 4)));
        assert_eq!(result.line_coverage, 90.0);
        assert_eq!(result.branch_coverage, Some(75.0));

        let result = CoverageResult::from_counts("coverage.py", 0, 0, Some((0, 0)));
        assert_eq!(result.line_coverage, 0.0);
        assert_eq!(result.branch_coverage, None);
    }

    // =========================================================================
    // TestCounts tests
    // =========================================================================

    #[test]
    fn test_counts_partial_results() {
        let counts = TestCounts {
            passed: 0,
            failed: 0,
            errored: 2,
            skipped: 1,
        };
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.unsuccessful(), 2);
        assert!(!counts.has_results());

        let counts = TestCounts {
            failed: 1,
            ..Default::default()
        };
        assert!(counts.has_results());
    }

    #[test]
    fn test_resolve_program() {
        let ws = std::path::Path::new("/work");
        assert_eq!(resolve_program("mvn", ws), "mvn");
        assert_eq!(resolve_program("./mvnw", ws), "/work/./mvnw");
    }

    #[test]
    fn test_toolchain_for_language() {
        let tools = ToolsConfig::default();
        let java = Toolchain::for_language(Language::Java, &tools);
        assert_eq!(java.describe(), "maven-compile / surefire / jacoco / pit");
        let python = Toolchain::for_language(Language::Python, &tools);
        assert_eq!(python.describe(), "py_compile / pytest / pytest-cov / mutmut");
    }
}

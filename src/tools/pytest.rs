//! Python syntax check and pytest execution.

use super::process::{Invocation, ProcessOutput};
use super::{resolve_program, BuildReport, StageContext, TestCounts, ToolAdapter};
use crate::error::{BuildError, ExecutionError, ToolError};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// pytest exit code when nothing was collected.
const NO_TESTS_COLLECTED: i32 = 5;

fn summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+) (passed|failed|errors?|skipped|xfailed|xpassed|deselected|warnings?)")
            .unwrap()
    })
}

/// Counts from pytest's final summary line, e.g.
/// `3 passed, 1 failed, 1 error in 0.12s`.
pub fn parse_summary(output: &str) -> Option<TestCounts> {
    let line = output
        .lines()
        .rev()
        .find(|l| l.contains(" in ") && summary_re().is_match(l))?;

    let mut counts = TestCounts::default();
    for caps in summary_re().captures_iter(line) {
        let n = caps[1].parse::<u32>().unwrap_or(0);
        match &caps[2] {
            "passed" | "xpassed" => counts.passed += n,
            "failed" => counts.failed += n,
            "error" | "errors" => counts.errored += n,
            "skipped" | "xfailed" => counts.skipped += n,
            _ => {}
        }
    }
    Some(counts)
}

/// `PYTHONPATH` making both flat and `src/` layouts importable.
pub(crate) fn python_path(workspace: &Path) -> String {
    let paths = [workspace.to_path_buf(), workspace.join("src")];
    std::env::join_paths(paths.iter())
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| workspace.to_string_lossy().into_owned())
}

pub(crate) fn pytest_invocation(python: &str, ctx: &StageContext) -> Invocation {
    Invocation::new(resolve_program(python, &ctx.workspace), &ctx.workspace)
        .args(["-m", "pytest"])
        .arg(ctx.test_file.to_string_lossy())
        .args(["-q", "-p", "no:cacheprovider"])
        .env("PYTHONPATH", python_path(&ctx.workspace))
        .env("PYTHONDONTWRITEBYTECODE", "1")
}

/// `python -m py_compile` over the module and its test.
pub struct PyCompile {
    python: String,
}

impl PyCompile {
    pub fn new(python: &str) -> Self {
        Self {
            python: python.to_string(),
        }
    }
}

impl ToolAdapter for PyCompile {
    type Output = BuildReport;
    type Error = BuildError;

    fn name(&self) -> &'static str {
        "py_compile"
    }

    fn invocations(&self, ctx: &StageContext) -> Vec<Invocation> {
        vec![Invocation::new(resolve_program(&self.python, &ctx.workspace), &ctx.workspace)
            .args(["-m", "py_compile"])
            .arg(ctx.source_file.to_string_lossy())
            .arg(ctx.test_file.to_string_lossy())
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .allow_failure()]
    }

    fn parse(&self, _ctx: &StageContext, outputs: &[ProcessOutput]) -> Result<BuildReport, BuildError> {
        let output = outputs.first().ok_or_else(|| ToolError::Parse {
            tool: "py_compile",
            reason: "no process output".to_string(),
        })?;
        if output.success {
            Ok(BuildReport::default())
        } else {
            Err(BuildError::Compilation {
                output: output.combined(),
            })
        }
    }
}

/// `python -m pytest` on the evaluated test file.
pub struct Pytest {
    python: String,
}

impl Pytest {
    pub fn new(python: &str) -> Self {
        Self {
            python: python.to_string(),
        }
    }
}

impl ToolAdapter for Pytest {
    type Output = TestCounts;
    type Error = ExecutionError;

    fn name(&self) -> &'static str {
        "pytest"
    }

    fn invocations(&self, ctx: &StageContext) -> Vec<Invocation> {
        vec![pytest_invocation(&self.python, ctx).allow_failure()]
    }

    fn parse(&self, _ctx: &StageContext, outputs: &[ProcessOutput]) -> Result<TestCounts, ExecutionError> {
        let output = outputs.first().ok_or_else(|| ToolError::Parse {
            tool: "pytest",
            reason: "no process output".to_string(),
        })?;
        let combined = output.combined();

        if output.exit_code == Some(NO_TESTS_COLLECTED) {
            return Err(ExecutionError::NoTests { output: combined });
        }

        match parse_summary(&combined) {
            Some(counts) if counts.unsuccessful() > 0 => Err(ExecutionError::TestsFailed {
                counts,
                output: combined,
            }),
            Some(counts) if counts.total() == 0 => Err(ExecutionError::NoTests { output: combined }),
            Some(counts) if output.success => Ok(counts),
            _ => Err(ExecutionError::Crashed { output: combined }),
        }
    }
}

//! Maven compile and Surefire test execution.

use super::process::{Invocation, ProcessOutput};
use super::{resolve_program, BuildReport, StageContext, TestCounts, ToolAdapter};
use crate::error::{BuildError, ExecutionError, ToolError};
use regex::Regex;
use std::sync::OnceLock;

fn surefire_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Tests run:\s*(\d+),\s*Failures:\s*(\d+),\s*Errors:\s*(\d+),\s*Skipped:\s*(\d+)")
            .unwrap()
    })
}

/// Counts from the last Surefire summary line, which is the aggregate.
pub fn parse_surefire(output: &str) -> Option<TestCounts> {
    let caps = surefire_re().captures_iter(output).last()?;
    let num = |i: usize| caps[i].parse::<u32>().unwrap_or(0);
    let (run, failures, errors, skipped) = (num(1), num(2), num(3), num(4));
    Some(TestCounts {
        passed: run.saturating_sub(failures + errors + skipped),
        failed: failures,
        errored: errors,
        skipped,
    })
}

fn lines_with<'a>(output: &'a str, marker: &str) -> Vec<&'a str> {
    output.lines().filter(|l| l.contains(marker)).collect()
}

/// `mvn test-compile`
pub struct MavenCompile {
    maven: String,
}

impl MavenCompile {
    pub fn new(maven: &str) -> Self {
        Self {
            maven: maven.to_string(),
        }
    }
}

impl ToolAdapter for MavenCompile {
    type Output = BuildReport;
    type Error = BuildError;

    fn name(&self) -> &'static str {
        "maven-compile"
    }

    fn invocations(&self, ctx: &StageContext) -> Vec<Invocation> {
        vec![Invocation::new(resolve_program(&self.maven, &ctx.workspace), &ctx.workspace)
            .args(["-B", "-q", "test-compile"])
            .allow_failure()]
    }

    fn parse(&self, _ctx: &StageContext, outputs: &[ProcessOutput]) -> Result<BuildReport, BuildError> {
        let output = outputs.first().ok_or_else(|| ToolError::Parse {
            tool: "maven",
            reason: "no process output".to_string(),
        })?;
        let combined = output.combined();

        if output.success {
            return Ok(BuildReport {
                warnings: lines_with(&combined, "[WARNING]")
                    .into_iter()
                    .map(String::from)
                    .collect(),
            });
        }

        let errors = lines_with(&combined, "[ERROR]");
        Err(BuildError::Compilation {
            output: if errors.is_empty() {
                combined
            } else {
                errors.join("\n")
            },
        })
    }
}

/// `mvn test` restricted to the evaluated test class.
pub struct MavenTest {
    maven: String,
}

impl MavenTest {
    pub fn new(maven: &str) -> Self {
        Self {
            maven: maven.to_string(),
        }
    }
}

impl ToolAdapter for MavenTest {
    type Output = TestCounts;
    type Error = ExecutionError;

    fn name(&self) -> &'static str {
        "surefire"
    }

    fn invocations(&self, ctx: &StageContext) -> Vec<Invocation> {
        vec![Invocation::new(resolve_program(&self.maven, &ctx.workspace), &ctx.workspace)
            .args(["-B", "test"])
            .arg(format!("-Dtest={}", ctx.test_name()))
            .arg("-Dsurefire.failIfNoSpecifiedTests=false")
            .allow_failure()]
    }

    fn parse(&self, _ctx: &StageContext, outputs: &[ProcessOutput]) -> Result<TestCounts, ExecutionError> {
        let output = outputs.first().ok_or_else(|| ToolError::Parse {
            tool: "surefire",
            reason: "no process output".to_string(),
        })?;
        let combined = output.combined();

        match parse_surefire(&combined) {
            Some(counts) if counts.unsuccessful() > 0 => Err(ExecutionError::TestsFailed {
                counts,
                output: combined,
            }),
            Some(counts) if counts.total() == 0 => Err(ExecutionError::NoTests { output: combined }),
            Some(counts) if output.success => Ok(counts),
            None if output.success => Err(ExecutionError::NoTests { output: combined }),
            _ => Err(ExecutionError::Crashed { output: combined }),
        }
    }
}

//! Coverage for Python modules through pytest-cov's JSON report.

use super::process::{Invocation, ProcessOutput};
use super::pytest::pytest_invocation;
use super::{CoverageResult, StageContext, ToolAdapter};
use crate::error::ToolError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const REPORT_FILE: &str = ".qualitygate-coverage.json";

pub struct PytestCov {
    python: String,
}

impl PytestCov {
    pub fn new(python: &str) -> Self {
        Self {
            python: python.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CoverageReport {
    #[serde(default)]
    files: HashMap<String, FileCoverage>,
    totals: Summary,
}

#[derive(Debug, Deserialize)]
struct FileCoverage {
    summary: Summary,
}

#[derive(Debug, Deserialize)]
struct Summary {
    covered_lines: u64,
    num_statements: u64,
    #[serde(default)]
    covered_branches: Option<u64>,
    #[serde(default)]
    num_branches: Option<u64>,
}

impl Summary {
    fn into_result(self) -> CoverageResult {
        let branches = self.covered_branches.zip(self.num_branches);
        CoverageResult::from_counts("pytest-cov", self.covered_lines, self.num_statements, branches)
    }
}

/// Coverage for `source_file` from a coverage.py JSON report, falling back
/// to the report totals when the file is not listed.
pub fn parse_report(json: &str, workspace: &Path, source_file: &Path) -> Result<CoverageResult, ToolError> {
    let report: CoverageReport = serde_json::from_str(json).map_err(|e| ToolError::Parse {
        tool: "pytest-cov",
        reason: e.to_string(),
    })?;

    let matching = report.files.into_iter().find(|(name, _)| {
        let path = Path::new(name);
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            workspace.join(path)
        };
        absolute == source_file
    });

    match matching {
        Some((_, file)) => Ok(file.summary.into_result()),
        None => {
            tracing::debug!(
                "{} not listed in coverage report, using totals",
                source_file.display()
            );
            Ok(report.totals.into_result())
        }
    }
}

fn report_path(workspace: &Path) -> PathBuf {
    workspace.join(REPORT_FILE)
}

impl ToolAdapter for PytestCov {
    type Output = CoverageResult;
    type Error = ToolError;

    fn name(&self) -> &'static str {
        "pytest-cov"
    }

    fn invocations(&self, ctx: &StageContext) -> Vec<Invocation> {
        let cov_target = ctx
            .source_file
            .parent()
            .unwrap_or(ctx.workspace.as_path())
            .to_string_lossy()
            .into_owned();

        // Failing tests exit 1 but still write the report
        vec![pytest_invocation(&self.python, ctx)
            .arg(format!("--cov={}", cov_target))
            .arg("--cov-branch")
            .arg(format!("--cov-report=json:{}", report_path(&ctx.workspace).display()))
            .allow_failure()]
    }

    fn parse(&self, ctx: &StageContext, outputs: &[ProcessOutput]) -> Result<CoverageResult, ToolError> {
        let path = report_path(&ctx.workspace);
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // No report usually means pytest-cov is missing or pytest crashed
                return Err(match outputs.first() {
                    Some(output) if !output.success => ToolError::Failed {
                        program: "pytest --cov".to_string(),
                        code: output.exit_code,
                        output: output.combined(),
                    },
                    _ => ToolError::MissingReport {
                        tool: "pytest-cov",
                        detail: format!("{} was not written", path.display()),
                    },
                });
            }
            Err(source) => {
                return Err(ToolError::Io {
                    tool: "pytest-cov",
                    source,
                })
            }
        };
        parse_report(&json, &ctx.workspace, &ctx.source_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::run::tests::test_module;
    use tempfile::TempDir;

    const REPORT: &str = r#"{
  "meta": {"version": "7.4.0", "branch_coverage": true},
  "files": {
    "calc/ops.py": {
      "executed_lines": [1, 2, 4],
      "summary": {"covered_lines": 19, "num_statements": 20, "percent_covered": 92.5,
                  "missing_lines": 1, "excluded_lines": 0, "num_branches": 8, "covered_branches": 7}
    },
    "calc/__init__.py": {
      "summary": {"covered_lines": 0, "num_statements": 0, "percent_covered": 100.0,
                  "missing_lines": 0, "excluded_lines": 0, "num_branches": 0, "covered_branches": 0}
    }
  },
  "totals": {"covered_lines": 19, "num_statements": 40, "percent_covered": 47.5,
             "missing_lines": 21, "excluded_lines": 0, "num_branches": 8, "covered_branches": 7}
}"#;

    #[test]
    fn test_parse_report_for_module() {
        let ws = Path::new("/ws");
        let result = parse_report(REPORT, ws, &ws.join("calc/ops.py")).unwrap();
        assert_eq!(result.line_coverage, 95.0);
        assert_eq!(result.branch_coverage, Some(87.5));
        assert_eq!(result.tool, "pytest-cov");
    }

    #[test]
    fn test_parse_report_falls_back_to_totals() {
        let ws = Path::new("/ws");
        let result = parse_report(REPORT, ws, &ws.join("other.py")).unwrap();
        assert_eq!(result.line_coverage, 47.5);
    }

    #[test]
    fn test_parse_report_without_branches() {
        let json = r#"{"files": {}, "totals": {"covered_lines": 10, "num_statements": 10}}"#;
        let result = parse_report(json, Path::new("/ws"), Path::new("/ws/x.py")).unwrap();
        assert_eq!(result.line_coverage, 100.0);
        assert_eq!(result.branch_coverage, None);
    }

    #[test]
    fn test_parse_report_malformed() {
        let err = parse_report("{}", Path::new("/ws"), Path::new("/ws/x.py")).unwrap_err();
        assert!(matches!(err, ToolError::Parse { tool: "pytest-cov", .. }));
    }

    #[test]
    fn test_missing_report_after_crash() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = StageContext {
            module: test_module(),
            workspace: temp_dir.path().to_path_buf(),
            source_file: temp_dir.path().join("calc.py"),
            test_file: temp_dir.path().join("tests/test_calc.py"),
        };
        let crashed = ProcessOutput {
            program: "python3".to_string(),
            exit_code: Some(4),
            success: false,
            stdout: String::new(),
            stderr: "error: unrecognized arguments: --cov".to_string(),
            duration_ms: 1,
        };
        let err = PytestCov::new("python3").parse(&ctx, &[crashed]).unwrap_err();
        assert!(err.output().unwrap().contains("unrecognized arguments"));
    }

    #[test]
    fn test_invocation() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = StageContext {
            module: test_module(),
            workspace: temp_dir.path().to_path_buf(),
            source_file: temp_dir.path().join("calc/ops.py"),
            test_file: temp_dir.path().join("tests/test_ops.py"),
        };
        let inv = &PytestCov::new("python3").invocations(&ctx)[0];
        assert!(inv.continue_on_failure);
        assert!(inv.args.contains(&format!("--cov={}", temp_dir.path().join("calc").display())));
        assert!(inv.args.contains(&"--cov-branch".to_string()));
        assert!(inv.env.iter().any(|(k, _)| k == "PYTHONPATH"));
    }
}

//! JaCoCo line and branch coverage through Maven.

use super::process::{Invocation, ProcessOutput};
use super::{resolve_program, CoverageResult, StageContext, ToolAdapter};
use crate::error::ToolError;
use crate::language::JavaLanguage;
use std::path::{Path, PathBuf};

const JACOCO_PLUGIN: &str = "org.jacoco:jacoco-maven-plugin";

pub struct Jacoco {
    maven: String,
}

impl Jacoco {
    pub fn new(maven: &str) -> Self {
        Self {
            maven: maven.to_string(),
        }
    }
}

impl ToolAdapter for Jacoco {
    type Output = CoverageResult;
    type Error = ToolError;

    fn name(&self) -> &'static str {
        "jacoco"
    }

    fn invocations(&self, ctx: &StageContext) -> Vec<Invocation> {
        // Failing tests still produce coverage data
        vec![Invocation::new(resolve_program(&self.maven, &ctx.workspace), &ctx.workspace)
            .arg("-B")
            .arg(format!("-Dtest={}", ctx.test_name()))
            .arg("-Dsurefire.failIfNoSpecifiedTests=false")
            .arg("-Dmaven.test.failure.ignore=true")
            .arg(format!("{}:prepare-agent", JACOCO_PLUGIN))
            .arg("test")
            .arg(format!("{}:report", JACOCO_PLUGIN))]
    }

    fn parse(&self, ctx: &StageContext, _outputs: &[ProcessOutput]) -> Result<CoverageResult, ToolError> {
        let csv_path = find_report(&ctx.workspace)?;
        let csv = std::fs::read_to_string(&csv_path).map_err(|source| ToolError::Io {
            tool: "jacoco",
            source,
        })?;

        let source = &ctx.module.source;
        let package = JavaLanguage.package(source).unwrap_or_default();
        let class = JavaLanguage
            .class_name(source)
            .unwrap_or_else(|| ctx.module.id.clone());

        parse_csv(&csv, &package, &class)
    }
}

fn find_report(workspace: &Path) -> Result<PathBuf, ToolError> {
    let default = workspace.join("target/site/jacoco/jacoco.csv");
    if default.is_file() {
        return Ok(default);
    }
    let pattern = workspace.join("target/site/jacoco*/jacoco.csv");
    glob::glob(&pattern.to_string_lossy())
        .ok()
        .and_then(|paths| paths.flatten().next())
        .ok_or_else(|| ToolError::MissingReport {
            tool: "jacoco",
            detail: format!("no jacoco.csv under {}", workspace.join("target/site").display()),
        })
}

/// Sum LINE and BRANCH counters for `class` (and its nested classes).
pub fn parse_csv(csv: &str, package: &str, class: &str) -> Result<CoverageResult, ToolError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(csv.as_bytes());

    let header = reader
        .headers()
        .map_err(|e| parse_error(&format!("bad header: {}", e)))?
        .clone();
    let column = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| parse_error(&format!("missing column {}", name)))
    };

    let package_col = column("PACKAGE")?;
    let class_col = column("CLASS")?;
    let line_missed = column("LINE_MISSED")?;
    let line_covered = column("LINE_COVERED")?;
    let branch_missed = column("BRANCH_MISSED")?;
    let branch_covered = column("BRANCH_COVERED")?;

    let nested_prefix = format!("{}.", class);
    let mut matched = false;
    let (mut lc, mut lm, mut bc, mut bm) = (0u64, 0u64, 0u64, 0u64);

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| parse_error(&format!("row {}: {}", row_idx + 1, e)))?;
        let field = |i: usize| record.get(i).unwrap_or("");
        let number = |i: usize| field(i).parse::<u64>().unwrap_or(0);

        let row_class = field(class_col);
        if field(package_col) != package
            || (row_class != class && !row_class.starts_with(&nested_prefix))
        {
            continue;
        }
        matched = true;
        lc += number(line_covered);
        lm += number(line_missed);
        bc += number(branch_covered);
        bm += number(branch_missed);
    }

    if !matched {
        return Err(parse_error(&format!(
            "no coverage rows for {}",
            JavaLanguage.qualified_name(Some(package), class)
        )));
    }

    Ok(CoverageResult::from_counts("jacoco", lc, lc + lm, Some((bc, bc + bm))))
}

fn parse_error(reason: &str) -> ToolError {
    ToolError::Parse {
        tool: "jacoco",
        reason: reason.to_string(),
    }
}

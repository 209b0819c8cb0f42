//! mutmut mutation testing for Python modules.
//!
//! `mutmut run` does the work; `mutmut junitxml` lists every mutant with
//! its outcome. The progress line printed by `run` is used when the listing
//! cannot be read.

use super::process::{Invocation, ProcessOutput};
use super::pytest::python_path;
use super::{resolve_program, MutantRecord, MutantStatus, MutationResult, StageContext, ToolAdapter};
use crate::error::ToolError;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Exit bit mutmut sets on a fatal error; the other bits report findings.
const FATAL_EXIT_BIT: i32 = 1;

pub struct Mutmut {
    mutmut: String,
    python: String,
}

impl Mutmut {
    pub fn new(mutmut: &str, python: &str) -> Self {
        Self {
            mutmut: mutmut.to_string(),
            python: python.to_string(),
        }
    }
}

fn testcase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<testcase\b([^>]*?)(?:/>|>(.*?)</testcase>)").unwrap()
    })
}

fn attribute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(\w+)="([^"]*)""#).unwrap())
}

fn progress_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"🎉\s*(\d+)\s*⏰\s*(\d+)\s*🤔\s*(\d+)\s*🙁\s*(\d+)\s*🔇\s*(\d+)").unwrap()
    })
}

/// Parse `mutmut junitxml` output into per-mutant records.
pub fn parse_junitxml(xml: &str) -> Option<MutationResult> {
    if !xml.contains("<testsuite") {
        return None;
    }

    let mutants = testcase_re()
        .captures_iter(xml)
        .enumerate()
        .map(|(i, caps)| {
            let attributes = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let attr = |name: &str| {
                attribute_re()
                    .captures_iter(attributes)
                    .find(|c| &c[1] == name)
                    .map(|c| c[2].to_string())
            };

            let status = if body.contains("<failure") {
                MutantStatus::Survived
            } else if body.contains("<error") {
                MutantStatus::TimedOut
            } else if body.contains("<skipped") {
                MutantStatus::Unviable
            } else {
                MutantStatus::Killed
            };

            let location = match (attr("file"), attr("line")) {
                (Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
                (file, _) => file,
            };

            MutantRecord {
                id: attr("name")
                    .map(|n| n.trim_start_matches("Mutant #").to_string())
                    .unwrap_or_else(|| (i + 1).to_string()),
                status,
                location,
                description: None,
            }
        })
        .collect();

    Some(MutationResult::from_mutants("mutmut", mutants))
}

/// Counts from the last progress line of `mutmut run`, e.g.
/// `⠏ 12/12  🎉 9  ⏰ 0  🤔 1  🙁 2  🔇 0`.
pub fn parse_progress(output: &str) -> Option<MutationResult> {
    let caps = progress_re().captures_iter(output).last()?;
    let num = |i: usize| caps[i].parse::<u32>().unwrap_or(0);
    let (killed, timeout, suspicious, survived, skipped) = (num(1), num(2), num(3), num(4), num(5));
    // Suspicious mutants made the tests slow but still failed them
    Some(MutationResult::from_counts(
        "mutmut",
        killed + suspicious,
        survived,
        timeout,
        0,
        skipped,
    ))
}

fn relative<'a>(path: &'a Path, base: &Path) -> std::borrow::Cow<'a, str> {
    path.strip_prefix(base).unwrap_or(path).to_string_lossy()
}

impl ToolAdapter for Mutmut {
    type Output = MutationResult;
    type Error = ToolError;

    fn name(&self) -> &'static str {
        "mutmut"
    }

    fn invocations(&self, ctx: &StageContext) -> Vec<Invocation> {
        let ws = &ctx.workspace;
        let program = resolve_program(&self.mutmut, ws);
        let tests_dir = ctx.test_file.parent().unwrap_or(ws.as_path());
        let runner = format!(
            "{} -m pytest -x -q -p no:cacheprovider {}",
            resolve_program(&self.python, ws),
            relative(&ctx.test_file, ws)
        );

        vec![
            Invocation::new(&program, ws)
                .arg("run")
                .arg("--paths-to-mutate")
                .arg(relative(&ctx.source_file, ws))
                .arg("--tests-dir")
                .arg(relative(tests_dir, ws))
                .arg("--runner")
                .arg(runner)
                .env("PYTHONPATH", python_path(ws))
                .allow_failure(),
            Invocation::new(&program, ws)
                .args(["junitxml", "--untested-policy=skipped"])
                .allow_failure(),
        ]
    }

    fn parse(&self, _ctx: &StageContext, outputs: &[ProcessOutput]) -> Result<MutationResult, ToolError> {
        let run = outputs.first().ok_or_else(|| ToolError::Parse {
            tool: "mutmut",
            reason: "no process output".to_string(),
        })?;

        if run.exit_code.map_or(true, |code| code & FATAL_EXIT_BIT != 0) {
            return Err(ToolError::Failed {
                program: "mutmut run".to_string(),
                code: run.exit_code,
                output: run.combined(),
            });
        }

        if let Some(result) = outputs.get(1).and_then(|listing| parse_junitxml(&listing.stdout)) {
            return Ok(result);
        }

        tracing::debug!("mutmut junitxml unavailable, falling back to progress line");
        parse_progress(&run.combined()).ok_or_else(|| ToolError::Parse {
            tool: "mutmut",
            reason: "neither a mutant listing nor a progress summary was found".to_string(),
        })
    }
}

//! PIT mutation testing through `pitest-maven`.

use super::process::{Invocation, ProcessOutput};
use super::{resolve_program, MutantRecord, MutantStatus, MutationResult, StageContext, ToolAdapter};
use crate::error::ToolError;
use crate::language::JavaLanguage;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub struct Pit {
    maven: String,
}

impl Pit {
    pub fn new(maven: &str) -> Self {
        Self {
            maven: maven.to_string(),
        }
    }
}

fn mutation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<mutation\b([^>]*)>(.*?)</mutation>").unwrap())
}

fn status_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"status\s*=\s*['"](\w+)['"]"#).unwrap())
}

fn element(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(unescape(body[start..end].trim()))
}

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|lt|gt|quot|apos|amp);").unwrap())
}

/// Decode XML entities in a single pass, named and numeric.
fn unescape(text: &str) -> String {
    entity_re()
        .replace_all(text, |caps: &regex::Captures| {
            let entity = &caps[1];
            let decoded = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "amp" => Some('&'),
                _ => {
                    let code = match entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => entity[1..].parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Map a PIT detection status onto the common classification.
pub fn map_status(status: &str) -> MutantStatus {
    match status {
        "KILLED" | "MEMORY_ERROR" | "RUN_ERROR" => MutantStatus::Killed,
        "TIMED_OUT" => MutantStatus::TimedOut,
        "SURVIVED" => MutantStatus::Survived,
        "NO_COVERAGE" => MutantStatus::NoCoverage,
        _ => MutantStatus::Unviable,
    }
}

/// Parse PIT's `mutations.xml`.
pub fn parse_mutations_xml(xml: &str) -> Result<MutationResult, ToolError> {
    if !xml.contains("<mutations") {
        return Err(ToolError::Parse {
            tool: "pit",
            reason: "not a PIT mutations report".to_string(),
        });
    }

    let mutants = mutation_re()
        .captures_iter(xml)
        .enumerate()
        .map(|(i, caps)| {
            let attributes = &caps[1];
            let body = &caps[2];
            let status = status_re()
                .captures(attributes)
                .map(|c| map_status(&c[1]))
                .unwrap_or(MutantStatus::Unviable);
            let location = match (element(body, "sourceFile"), element(body, "lineNumber")) {
                (Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
                (Some(file), None) => Some(file),
                _ => None,
            };
            let description = element(body, "description").or_else(|| {
                element(body, "mutator")
                    .map(|m| m.rsplit('.').next().unwrap_or_default().to_string())
            });
            MutantRecord {
                id: (i + 1).to_string(),
                status,
                location,
                description,
            }
        })
        .collect();

    Ok(MutationResult::from_mutants("pit", mutants))
}

fn find_report(workspace: &Path) -> Result<PathBuf, ToolError> {
    let default = workspace.join("target/pit-reports/mutations.xml");
    if default.is_file() {
        return Ok(default);
    }
    // Timestamped report directories
    let pattern = workspace.join("target/pit-reports/**/mutations.xml");
    glob::glob(&pattern.to_string_lossy())
        .ok()
        .and_then(|paths| paths.flatten().max())
        .ok_or_else(|| ToolError::MissingReport {
            tool: "pit",
            detail: format!(
                "no mutations.xml under {}",
                workspace.join("target/pit-reports").display()
            ),
        })
}

impl ToolAdapter for Pit {
    type Output = MutationResult;
    type Error = ToolError;

    fn name(&self) -> &'static str {
        "pit"
    }

    fn invocations(&self, ctx: &StageContext) -> Vec<Invocation> {
        let source = &ctx.module.source;
        let package = JavaLanguage.package(source);
        let class = JavaLanguage
            .class_name(source)
            .unwrap_or_else(|| ctx.module.id.clone());
        let target_class = JavaLanguage.qualified_name(package.as_deref(), &class);
        let target_test = JavaLanguage.qualified_name(package.as_deref(), &ctx.test_name());

        vec![Invocation::new(resolve_program(&self.maven, &ctx.workspace), &ctx.workspace)
            .args(["-B", "test-compile", "org.pitest:pitest-maven:mutationCoverage"])
            .arg(format!("-DtargetClasses={}*", target_class))
            .arg(format!("-DtargetTests={}", target_test))
            .arg("-DoutputFormats=XML")
            .arg("-DtimestampedReports=false")
            .arg("-DfailWhenNoMutations=false")]
    }

    fn parse(&self, ctx: &StageContext, _outputs: &[ProcessOutput]) -> Result<MutationResult, ToolError> {
        let path = find_report(&ctx.workspace)?;
        let xml = std::fs::read_to_string(&path).map_err(|source| ToolError::Io {
            tool: "pit",
            source,
        })?;
        parse_mutations_xml(&xml)
    }
}

use super::{render, Report, ReportFormat};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Write `report` into `dir` once per format as `<stem>.<ext>`.
///
/// Existing artifacts are never overwritten: when any of the target files
/// already exists the stem gets a `-2`, `-3`, ... suffix.
pub fn write_report(report: &Report, dir: &Path, formats: &[ReportFormat]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create reports directory {}", dir.display()))?;

    let stem = free_stem(dir, &report.artifact_stem(), formats);
    let mut written = Vec::with_capacity(formats.len());
    for format in formats {
        let contents = render(report, *format)?;
        let path = dir.join(format!("{}.{}", stem, format.extension()));
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        tracing::debug!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

fn free_stem(dir: &Path, stem: &str, formats: &[ReportFormat]) -> String {
    let taken = |candidate: &str| {
        formats
            .iter()
            .any(|f| dir.join(format!("{}.{}", candidate, f.extension())).exists())
    };
    if !taken(stem) {
        return stem.to_string();
    }
    (2u32..)
        .map(|n| format!("{}-{}", stem, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluationConfig;
    use crate::report::tests::broken_run;
    use tempfile::TempDir;

    #[test]
    fn test_writes_one_artifact_per_format() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("reports");
        let report = Report::single(broken_run(), &EvaluationConfig::default(), None).unwrap();

        let written = write_report(&report, &dir, &ReportFormat::ALL).unwrap();
        assert_eq!(written.len(), 3);
        let stem = report.artifact_stem();
        assert!(stem.starts_with("Calculator_"));
        for ext in ["json", "md", "html"] {
            assert!(dir.join(format!("{}.{}", stem, ext)).is_file());
        }

        let json = std::fs::read_to_string(dir.join(format!("{}.json", stem))).unwrap();
        assert!(json.contains("\"complete\": false"));
    }

    #[test]
    fn test_same_stem_does_not_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let report = Report::single(broken_run(), &EvaluationConfig::default(), None).unwrap();

        let first = write_report(&report, temp_dir.path(), &[ReportFormat::Json]).unwrap();
        let second = write_report(&report, temp_dir.path(), &[ReportFormat::Json]).unwrap();
        assert_ne!(first[0], second[0]);
        assert!(second[0]
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("-2.json"));
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_json_only() {
        let temp_dir = TempDir::new().unwrap();
        let report = Report::single(broken_run(), &EvaluationConfig::default(), None).unwrap();
        let written = write_report(&report, temp_dir.path(), &[ReportFormat::Json]).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].extension().unwrap(), "json");
    }
}

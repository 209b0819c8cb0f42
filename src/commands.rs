//! Command handlers behind the CLI.

use crate::config::Config;
use crate::evaluation::{
    ComplexityTier, EvaluationRun, Module, Orchestrator, StageStatus, TestInput, TestSource,
};
use crate::llm::{create_client, Protocol, RetryPolicy, TestGenerator};
use crate::materialize::{write_test, TestLayout};
use crate::report::{write_report, Report, ReportFormat};
use crate::tools::process::CancelSignal;
use anyhow::{Context, Result};
use console::Style;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Captured output lines shown on the terminal for a failed stage.
const OUTPUT_PREVIEW_LINES: usize = 30;

/// How a command ended, mapped onto the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// A run is incomplete or a check failed
    Failed,
    Interrupted,
}

impl Outcome {
    fn from_runs<'a>(runs: impl IntoIterator<Item = &'a EvaluationRun>, cancel: &CancelSignal) -> Self {
        if cancel.is_cancelled() {
            Outcome::Interrupted
        } else if runs.into_iter().all(EvaluationRun::is_complete) {
            Outcome::Success
        } else {
            Outcome::Failed
        }
    }

    pub fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Success => ExitCode::SUCCESS,
            Outcome::Failed => ExitCode::from(1),
            Outcome::Interrupted => ExitCode::from(130),
        }
    }
}

pub struct EvaluateArgs {
    pub module: PathBuf,
    pub tests: Option<PathBuf>,
    pub report: bool,
    pub protocol: Option<Protocol>,
    pub tier: ComplexityTier,
}

pub struct EvaluateAllArgs {
    pub baseline: PathBuf,
    pub experimental: PathBuf,
    pub protocol: Option<Protocol>,
    pub manual_minutes_baseline: Option<f64>,
    pub manual_minutes_experimental: Option<f64>,
    pub no_report: bool,
}

fn build_generator(config: &Config) -> Result<Arc<TestGenerator>> {
    let client = create_client(&config.llm)?;
    Ok(Arc::new(TestGenerator::new(
        client,
        RetryPolicy::from_config(&config.llm),
    )))
}

/// Generate a test for a module and write it to `output`.
pub async fn generate(
    config: &Config,
    module: &Path,
    output: &Path,
    protocol: Option<Protocol>,
    cancel: &CancelSignal,
) -> Result<Outcome> {
    let module = Module::load(module, ComplexityTier::Baseline, config.evaluation.language)?;
    let protocol = protocol.unwrap_or(config.evaluation.default_protocol);
    let generator = build_generator(config)?;

    let generated = tokio::select! {
        result = generator.generate(&module, protocol) => result,
        _ = cancel.cancelled() => return Ok(Outcome::Interrupted),
    };
    let generated = match generated {
        Ok(generated) => generated,
        Err(e) => {
            print_error(&format!("Test generation for {} failed: {}", module.id, e));
            return Ok(Outcome::Failed);
        }
    };

    let path = write_test(&module, &generated.source, output, TestLayout::Flat)
        .context("Failed to write generated test")?;
    print_success(&format!(
        "Generated {} line(s) for {} with {} ({} protocol) in {:.1}s",
        generated.source.lines().count(),
        module.id,
        generated.model,
        protocol,
        generated.latency_ms as f64 / 1000.0
    ));
    println!("  {}", path.display());
    Ok(Outcome::Success)
}

/// Evaluate one module and write its report.
pub async fn evaluate(config: Arc<Config>, args: EvaluateArgs, cancel: &CancelSignal) -> Result<Outcome> {
    let module = Module::load(&args.module, args.tier, config.evaluation.language)?;
    let (input, generator) = match args.tests {
        Some(path) => (TestInput::Supplied(path), None),
        None => {
            let protocol = args.protocol.unwrap_or(config.evaluation.default_protocol);
            (TestInput::Generate(protocol), Some(build_generator(&config)?))
        }
    };

    let orchestrator = Orchestrator::new(config.clone(), generator);
    let run = orchestrator.evaluate(&module, input, cancel).await;
    let outcome = Outcome::from_runs([&run], cancel);
    print_run(&run);

    let report = Report::single(run, &config.evaluation, None)?;
    print_thresholds(&report);

    // JSON is always kept; --report adds the human-readable renderings
    let formats: &[ReportFormat] = if args.report {
        &ReportFormat::ALL
    } else {
        &[ReportFormat::Json]
    };
    let written = write_report(&report, &config.evaluation.reports_dir, formats)?;
    print_written(&written);

    if !report.complete {
        print_error("Report is incomplete");
    }
    Ok(outcome)
}

/// Evaluate a baseline and an experimental module concurrently and compare.
pub async fn evaluate_all(
    config: Arc<Config>,
    args: EvaluateAllArgs,
    cancel: &CancelSignal,
) -> Result<Outcome> {
    let language = config.evaluation.language;
    let baseline = Module::load(&args.baseline, ComplexityTier::Baseline, language)
        .context("Failed to load baseline module")?;
    let experimental = Module::load(&args.experimental, ComplexityTier::Experimental, language)
        .context("Failed to load experimental module")?;

    let protocol = args.protocol.unwrap_or(config.evaluation.default_protocol);
    let orchestrator = Arc::new(Orchestrator::new(config.clone(), Some(build_generator(&config)?)));
    let mut runs = orchestrator
        .evaluate_many(
            vec![
                (baseline, TestInput::Generate(protocol)),
                (experimental, TestInput::Generate(protocol)),
            ],
            cancel,
        )
        .await;
    let outcome = Outcome::from_runs(&runs, cancel);
    for run in &runs {
        print_run(run);
    }

    let (experimental_run, baseline_run) = match (runs.pop(), runs.pop()) {
        (Some(experimental), Some(baseline)) => (experimental, baseline),
        _ => anyhow::bail!("Expected a baseline and an experimental run"),
    };

    let reports_dir = &config.evaluation.reports_dir;
    let mut written = Vec::new();
    if !args.no_report {
        for (run, minutes) in [
            (&baseline_run, args.manual_minutes_baseline),
            (&experimental_run, args.manual_minutes_experimental),
        ] {
            let single = Report::single(run.clone(), &config.evaluation, minutes)?;
            written.extend(write_report(&single, reports_dir, &[ReportFormat::Json])?);
        }
    }

    let report = Report::comparison(
        baseline_run,
        experimental_run,
        &config.evaluation,
        (args.manual_minutes_baseline, args.manual_minutes_experimental),
    )?;
    print_thresholds(&report);
    print_comparison(&report);

    if !args.no_report {
        written.extend(write_report(&report, reports_dir, &ReportFormat::ALL)?);
        print_written(&written);
    }

    if !report.complete {
        print_error("Comparison report is incomplete");
    }
    Ok(outcome)
}

/// Verify the configured LLM endpoint answers within its timeout.
pub async fn check(config: &Config) -> Result<Outcome> {
    let client = create_client(&config.llm)?;
    let endpoint = config.llm.endpoint_url();
    tracing::debug!("Checking {} at {}", client.provider(), endpoint);

    match tokio::time::timeout(config.llm.timeout(), client.check_available()).await {
        Ok(Ok(())) => {
            print_success(&format!(
                "{} endpoint {} is reachable and serves {}",
                config.llm.provider,
                endpoint,
                client.model()
            ));
            Ok(Outcome::Success)
        }
        Ok(Err(e)) => {
            print_error(&format!("{} endpoint {}: {}", config.llm.provider, endpoint, e));
            Ok(Outcome::Failed)
        }
        Err(_) => {
            print_error(&format!(
                "{} endpoint {} did not answer within {}s",
                config.llm.provider, endpoint, config.llm.timeout_seconds
            ));
            Ok(Outcome::Failed)
        }
    }
}

pub fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

fn print_success(msg: &str) {
    let style = Style::new().green().bold();
    println!("{} {}", style.apply_to("✓"), msg);
}

fn print_run(run: &EvaluationRun) {
    let bold = Style::new().bold();
    let dim = Style::new().dim();
    println!();
    println!(
        "{} {}",
        bold.apply_to(&run.id),
        dim.apply_to(format!("({}, {})", run.module.language, run.module.tier))
    );

    match &run.test_source {
        TestSource::Generated { generation, .. } => println!(
            "  {} tests from {} ({} protocol, {:.1}s)",
            dim.apply_to("·"),
            generation.model,
            generation.protocol,
            generation.latency_ms as f64 / 1000.0
        ),
        TestSource::Supplied { path } => {
            println!("  {} tests from {}", dim.apply_to("·"), path.display())
        }
        TestSource::GenerationFailed { error, .. } => println!(
            "  {} {}",
            Style::new().red().apply_to("test generation failed:"),
            error
        ),
    }

    for record in run.stages() {
        let (marker, style) = match &record.status {
            StageStatus::Succeeded => ("✓", Style::new().green()),
            StageStatus::Failed { .. } => ("✗", Style::new().red()),
            StageStatus::Skipped { .. } => ("-", Style::new().dim()),
            StageStatus::Pending | StageStatus::Running => ("?", Style::new().yellow()),
        };
        let duration = record
            .duration_ms
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_default();
        let detail = record.status.reason().unwrap_or_default();
        println!(
            "  {} {:<9} {:>7}  {}",
            style.apply_to(marker),
            record.stage.name(),
            dim.apply_to(duration),
            detail
        );
    }

    if let Some(counts) = run.execution {
        println!(
            "  {} tests: {} passed, {} failed, {} errored, {} skipped",
            dim.apply_to("·"),
            counts.passed,
            counts.failed,
            counts.errored,
            counts.skipped
        );
    }

    if let Some((stage, _, Some(output))) = run.failed_stage() {
        let lines: Vec<&str> = output.lines().collect();
        let start = lines.len().saturating_sub(OUTPUT_PREVIEW_LINES);
        println!("  {} output:", bold.apply_to(stage.name()));
        for line in &lines[start..] {
            println!("    {}", dim.apply_to(line));
        }
    }
}

fn print_thresholds(report: &Report) {
    for summary in &report.runs {
        let line = |name: &str, value: Option<f64>, threshold: f64, met: Option<bool>| {
            let style = match met {
                Some(true) => Style::new().green(),
                Some(false) => Style::new().yellow(),
                None => Style::new().dim(),
            };
            let value = value
                .map(|v| format!("{:.1}%", v))
                .unwrap_or_else(|| "n/a".to_string());
            format!(
                "{} {} (threshold {:.1}%)",
                name,
                style.apply_to(value),
                threshold
            )
        };
        println!(
            "{} {}: {}, {}, {}",
            Style::new().cyan().bold().apply_to("→"),
            summary.run.module.id,
            line(
                "coverage",
                summary.coverage(),
                summary.thresholds.coverage_threshold,
                summary.thresholds.coverage_met
            ),
            line(
                "branches",
                summary.run.coverage.as_ref().and_then(|c| c.branch_coverage),
                summary.thresholds.branch_coverage_threshold,
                summary.thresholds.branch_met
            ),
            line(
                "mutation score",
                summary.mutation_score(),
                summary.thresholds.mutation_threshold,
                summary.thresholds.mutation_met
            ),
        );
    }
}

fn print_comparison(report: &Report) {
    let Some(comparison) = &report.comparison else {
        return;
    };
    let delta = |value: Option<f64>| {
        value
            .map(|v| format!("{:+.1}", v))
            .unwrap_or_else(|| "n/a".to_string())
    };
    println!();
    println!("{}", Style::new().bold().apply_to("Experimental vs baseline"));
    println!("  coverage        {} pts", delta(comparison.coverage_delta));
    println!("  mutation score  {} pts", delta(comparison.mutation_score_delta));
    println!("  AI time         {:+.1}s", comparison.duration_delta_secs);
    println!("  efficiency gain {} pts", delta(comparison.efficiency_gain_delta));
}

fn print_written(paths: &[PathBuf]) {
    let dim = Style::new().dim();
    for path in paths {
        println!("  {} {}", dim.apply_to("wrote"), path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::run::tests::test_module;
    use crate::evaluation::Stage;
    use crate::tools::process::cancellation;

    fn finished(complete: bool) -> EvaluationRun {
        let mut run = EvaluationRun::new(
            test_module(),
            TestSource::Supplied {
                path: PathBuf::from("CalculatorTest.java"),
            },
        );
        for stage in Stage::ALL {
            run.start(stage).unwrap();
            if complete {
                run.succeed(stage).unwrap();
            } else {
                run.fail(stage, "boom", None).unwrap();
                run.skip_remaining("upstream failure");
                break;
            }
        }
        run.finish();
        run
    }

    #[test]
    fn test_outcome_from_runs() {
        let never = CancelSignal::never();
        assert_eq!(Outcome::from_runs([&finished(true)], &never), Outcome::Success);
        assert_eq!(
            Outcome::from_runs(&[finished(true), finished(false)], &never),
            Outcome::Failed
        );

        let (handle, signal) = cancellation();
        handle.cancel();
        assert_eq!(Outcome::from_runs([&finished(true)], &signal), Outcome::Interrupted);
    }

    #[tokio::test]
    async fn test_check_reports_unreachable_endpoint() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let mut config = Config::default();
        config.llm.url = Some(url);
        config.llm.timeout_seconds = 5;
        assert_eq!(check(&config).await.unwrap(), Outcome::Failed);
    }

    #[tokio::test]
    async fn test_check_succeeds_when_model_is_listed() {
        let (url, _server) = crate::llm::test_server::serve(vec![(
            200,
            r#"{"models":[{"name":"codellama:latest"}]}"#.to_string(),
        )])
        .await;

        let mut config = Config::default();
        config.llm.url = Some(url);
        assert_eq!(check(&config).await.unwrap(), Outcome::Success);
    }

    #[tokio::test]
    async fn test_evaluate_supplied_test_writes_json_report() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let project = temp_dir.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(project.join("pyproject.toml"), "[project]").unwrap();
        std::fs::write(project.join("calc.py"), "def add(a, b):\n    return a + b\n").unwrap();
        std::fs::write(project.join("test_calc.py"), "def test_add(:\n").unwrap();

        let mut config = Config::default();
        config.evaluation.reports_dir = temp_dir.path().join("reports");
        // A missing interpreter fails compile without needing Python
        config.tools.python = "qualitygate-no-such-python".to_string();

        let outcome = evaluate(
            Arc::new(config),
            EvaluateArgs {
                module: project.join("calc.py"),
                tests: Some(project.join("test_calc.py")),
                report: false,
                protocol: None,
                tier: ComplexityTier::Baseline,
            },
            &CancelSignal::never(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::Failed);
        let reports: Vec<_> = std::fs::read_dir(temp_dir.path().join("reports"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].extension().unwrap(), "json");
        let json = std::fs::read_to_string(&reports[0]).unwrap();
        assert!(json.contains("\"complete\": false"));
    }
    #[tokio::test]
    async fn test_evaluate_all_keeps_same_named_modules_apart() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        for version in ["v1", "v2"] {
            let project = temp_dir.path().join(version);
            std::fs::create_dir_all(&project).unwrap();
            std::fs::write(project.join("pyproject.toml"), "[project]").unwrap();
            std::fs::write(project.join("calc.py"), "def add(a, b):\n    return a + b\n").unwrap();
        }

        let completion = r#"{"model":"codellama:latest","response":"```python\nfrom calc import add\n\ndef test_add():\n    assert add(1, 2) == 3\n```","done":true}"#;
        let (url, _server) = crate::llm::test_server::serve(vec![
            (200, completion.to_string()),
            (200, completion.to_string()),
        ])
        .await;

        let mut config = Config::default();
        config.llm.url = Some(url);
        config.llm.max_retries = 0;
        config.evaluation.reports_dir = temp_dir.path().join("reports");
        config.evaluation.generated_tests_dir = temp_dir.path().join("generated");
        config.tools.python = "qualitygate-no-such-python".to_string();

        let outcome = evaluate_all(
            Arc::new(config),
            EvaluateAllArgs {
                baseline: temp_dir.path().join("v1/calc.py"),
                experimental: temp_dir.path().join("v2/calc.py"),
                protocol: None,
                manual_minutes_baseline: None,
                manual_minutes_experimental: None,
                no_report: false,
            },
            &CancelSignal::never(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Failed);

        let names: Vec<String> = std::fs::read_dir(temp_dir.path().join("reports"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        // One JSON per run plus the comparison in three formats
        assert_eq!(names.len(), 5, "{:?}", names);
        assert!(names.iter().any(|n| n.starts_with("calc_baseline_") && n.ends_with(".json")));
        assert!(names.iter().any(|n| n.starts_with("calc_experimental_") && n.ends_with(".json")));

        for tier in ["baseline", "experimental"] {
            assert!(temp_dir
                .path()
                .join("generated")
                .join(tier)
                .join("test_calc.py")
                .is_file());
        }
    }
}

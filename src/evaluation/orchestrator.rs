//! Sequences one module's evaluation: test generation, then compile,
//! execute, coverage and mutation in a private workspace.
//!
//! [`Orchestrator::evaluate`] never fails. Every problem ends up as a stage
//! status on the returned [`EvaluationRun`].

use super::model::Module;
use super::run::{EvaluationRun, Stage, TestSource, TransitionError};
use super::workspace::Workspace;
use crate::config::Config;
use crate::error::GenerationError;
use crate::llm::{GeneratedTest, Protocol, TestGenerator};
use crate::materialize::{write_test, TestLayout};
use crate::tools::process::{tail_output, CancelSignal};
use crate::tools::{StageContext, Toolchain};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const UPSTREAM_FAILURE: &str = "upstream failure";
const GENERATION_FAILED: &str = "test generation failed";
const CANCELLED: &str = "cancelled";

/// Where the tests for a run come from.
#[derive(Debug, Clone)]
pub enum TestInput {
    Generate(Protocol),
    Supplied(PathBuf),
}

/// Test code waiting to be placed in the workspace.
enum PendingTest {
    Source(String),
    File(PathBuf),
}

pub struct Orchestrator {
    config: Arc<Config>,
    generator: Option<Arc<TestGenerator>>,
    toolchain: Option<Toolchain>,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, generator: Option<Arc<TestGenerator>>) -> Self {
        Self {
            config,
            generator,
            toolchain: None,
        }
    }

    /// Use `toolchain` for every module instead of picking one by language.
    pub fn with_toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    fn toolchain_for(&self, module: &Module) -> Toolchain {
        self.toolchain
            .clone()
            .unwrap_or_else(|| Toolchain::for_language(module.language, &self.config.tools))
    }

    /// Evaluate `module` against generated or supplied tests.
    ///
    /// Every call generates (when asked to) and builds from scratch; nothing
    /// from an earlier run is reused.
    pub async fn evaluate(
        &self,
        module: &Module,
        input: TestInput,
        cancel: &CancelSignal,
    ) -> EvaluationRun {
        if !module.is_unchanged() {
            tracing::warn!(
                "{} changed on disk since it was loaded; evaluating the loaded source",
                module.path.display()
            );
        }

        let (test_source, pending) = match input {
            TestInput::Supplied(path) => (
                TestSource::Supplied { path: path.clone() },
                PendingTest::File(path),
            ),
            TestInput::Generate(protocol) => match self.generate(module, protocol, cancel).await {
                Ok(generation) => {
                    let saved_to = self.save_generated(module, &generation.source);
                    let source = generation.source.clone();
                    (
                        TestSource::Generated {
                            saved_to,
                            generation,
                        },
                        PendingTest::Source(source),
                    )
                }
                Err(error) => {
                    let reason = if cancel.is_cancelled() {
                        CANCELLED
                    } else {
                        GENERATION_FAILED
                    };
                    tracing::error!("Test generation for {} failed: {}", module.id, error);
                    let mut run = EvaluationRun::new(
                        module.clone(),
                        TestSource::GenerationFailed {
                            protocol,
                            error: error.to_string(),
                        },
                    );
                    run.skip_remaining(reason);
                    run.finish();
                    return run;
                }
            },
        };

        let mut run = EvaluationRun::new(module.clone(), test_source);
        if let Err(e) = self.drive(&mut run, &pending, cancel).await {
            tracing::error!("[{}] Evaluation stopped: {}", run.id, e);
            run.abort(&format!("internal error: {}", e));
        }
        run.finish();

        tracing::info!(
            "[{}] Finished: {}",
            run.id,
            run.stages()
                .iter()
                .map(|r| format!("{}={}", r.stage, r.status))
                .collect::<Vec<_>>()
                .join(", ")
        );
        run
    }

    /// Evaluate several modules concurrently, each in its own task and
    /// workspace. Runs come back in input order.
    pub async fn evaluate_many(
        self: &Arc<Self>,
        jobs: Vec<(Module, TestInput)>,
        cancel: &CancelSignal,
    ) -> Vec<EvaluationRun> {
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|(module, input)| {
                let fallback = (module.clone(), input.clone());
                let this = Arc::clone(self);
                let cancel = cancel.clone();
                let handle =
                    tokio::spawn(async move { this.evaluate(&module, input, &cancel).await });
                (fallback, handle)
            })
            .collect();

        let mut runs = Vec::with_capacity(handles.len());
        for ((module, input), handle) in handles {
            match handle.await {
                Ok(run) => runs.push(run),
                Err(e) => {
                    tracing::error!("Evaluation task for {} failed: {}", module.id, e);
                    let source = match input {
                        TestInput::Supplied(path) => TestSource::Supplied { path },
                        TestInput::Generate(protocol) => TestSource::GenerationFailed {
                            protocol,
                            error: format!("evaluation task failed: {}", e),
                        },
                    };
                    let mut run = EvaluationRun::new(module, source);
                    run.abort("evaluation task failed");
                    run.finish();
                    runs.push(run);
                }
            }
        }
        runs
    }

    async fn generate(
        &self,
        module: &Module,
        protocol: Protocol,
        cancel: &CancelSignal,
    ) -> Result<GeneratedTest, GenerationError> {
        let generator = self.generator.as_ref().ok_or(GenerationError::NoClient)?;
        tokio::select! {
            result = generator.generate(module, protocol) => result,
            _ = cancel.cancelled() => Err(GenerationError::Rejected("generation cancelled".to_string())),
        }
    }

    /// Keep a copy of the generated test outside the workspace.
    /// Keep a copy under `<generated_tests_dir>/<tier>/` so concurrent
    /// baseline and experimental runs never share a file.
    fn save_generated(&self, module: &Module, source: &str) -> Option<PathBuf> {
        let dir = self
            .config
            .evaluation
            .generated_tests_dir
            .join(module.tier.to_string());
        match write_test(module, source, &dir, TestLayout::Flat) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!("Could not save generated test for {}: {:#}", module.id, e);
                None
            }
        }
    }

    async fn drive(
        &self,
        run: &mut EvaluationRun,
        pending: &PendingTest,
        cancel: &CancelSignal,
    ) -> Result<(), TransitionError> {
        let module = run.module.clone();
        let toolchain = self.toolchain_for(&module);
        tracing::info!(
            "[{}] Evaluating {} with {}",
            run.id,
            module.path.display(),
            toolchain.describe()
        );

        // Workspace setup counts towards compile
        run.start(Stage::Compile)?;
        let (_workspace, ctx) = match prepare(&module, pending).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!("[{}] Could not set up workspace: {:#}", run.id, e);
                run.fail(Stage::Compile, format!("{:#}", e), None)?;
                run.skip_remaining(UPSTREAM_FAILURE);
                return Ok(());
            }
        };

        match toolchain.compile.run(&ctx, self.timeout(Stage::Compile), cancel).await {
            Ok(report) => {
                run.build = Some(report);
                run.succeed(Stage::Compile)?;
            }
            Err(e) => {
                return self.stop(run, Stage::Compile, e.to_string(), e.output(), e.is_cancelled());
            }
        }

        run.start(Stage::Execute)?;
        let mut mutation_allowed = true;
        match toolchain.execute.run(&ctx, self.timeout(Stage::Execute), cancel).await {
            Ok(counts) => {
                run.execution = Some(counts);
                run.succeed(Stage::Execute)?;
            }
            Err(e) => {
                let partial = e.partial_counts().copied();
                let has_results = partial.map_or(false, |c| c.has_results());
                if e.is_cancelled() || !has_results {
                    return self.stop(run, Stage::Execute, e.to_string(), e.output(), e.is_cancelled());
                }
                // Coverage can still be measured; mutation needs a green baseline
                tracing::warn!("[{}] execute failed with partial results: {}", run.id, e);
                run.execution = partial;
                run.fail(Stage::Execute, e.to_string(), self.captured(e.output()))?;
                run.skip(Stage::Mutation, UPSTREAM_FAILURE)?;
                mutation_allowed = false;
            }
        }

        run.start(Stage::Coverage)?;
        match toolchain.coverage.run(&ctx, self.timeout(Stage::Coverage), cancel).await {
            Ok(coverage) => {
                run.coverage = Some(coverage);
                run.succeed(Stage::Coverage)?;
            }
            Err(e) => {
                return self.stop(run, Stage::Coverage, e.to_string(), e.output(), e.is_cancelled());
            }
        }

        if !mutation_allowed {
            return Ok(());
        }

        run.start(Stage::Mutation)?;
        match toolchain.mutation.run(&ctx, self.timeout(Stage::Mutation), cancel).await {
            Ok(mutation) => {
                run.mutation = Some(mutation);
                run.succeed(Stage::Mutation)?;
            }
            Err(e) => {
                return self.stop(run, Stage::Mutation, e.to_string(), e.output(), e.is_cancelled());
            }
        }

        Ok(())
    }

    /// Fail `stage` and skip everything after it.
    fn stop(
        &self,
        run: &mut EvaluationRun,
        stage: Stage,
        reason: String,
        output: Option<&str>,
        cancelled: bool,
    ) -> Result<(), TransitionError> {
        let output = self.captured(output);
        if cancelled {
            run.fail(stage, CANCELLED, output)?;
            run.skip_remaining(CANCELLED);
        } else {
            tracing::warn!("[{}] {} failed: {}", run.id, stage, reason);
            run.fail(stage, reason, output)?;
            run.skip_remaining(UPSTREAM_FAILURE);
        }
        Ok(())
    }

    fn captured(&self, output: Option<&str>) -> Option<String> {
        output.map(|o| tail_output(o, self.config.evaluation.max_output_bytes))
    }

    fn timeout(&self, stage: Stage) -> std::time::Duration {
        self.config.evaluation.timeout_for(stage)
    }
}

/// Copy the project into a workspace and put the test where the toolchain
/// will find it.
async fn prepare(module: &Module, pending: &PendingTest) -> anyhow::Result<(Workspace, StageContext)> {
    let workspace = Workspace::prepare(module)
        .await
        .context("Failed to prepare workspace")?;

    let test_file = match pending {
        PendingTest::Source(source) => {
            write_test(module, source, workspace.path(), TestLayout::Conventional)?
        }
        PendingTest::File(path) => place_supplied(module, &workspace, path)?,
    };

    let ctx = StageContext {
        module: module.clone(),
        workspace: workspace.path().to_path_buf(),
        source_file: workspace.translate(module, &module.path),
        test_file,
    };
    Ok((workspace, ctx))
}

/// A supplied test already inside the project is used where it was copied
/// to; anything else is materialized like a generated test.
fn place_supplied(module: &Module, workspace: &Workspace, path: &Path) -> anyhow::Result<PathBuf> {
    let path = path
        .canonicalize()
        .with_context(|| format!("Test file not found: {}", path.display()))?;

    if path.starts_with(&module.project_root) {
        let copied = workspace.translate(module, &path);
        if copied.is_file() {
            return Ok(copied);
        }
    }

    let source = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read test file {}", path.display()))?;
    write_test(module, &source, workspace.path(), TestLayout::Conventional)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BuildError, ExecutionError, ToolError};
    use crate::evaluation::{ComplexityTier, StageStatus};
    use crate::llm::generator::fake::ScriptedClient;
    use crate::llm::RetryPolicy;
    use crate::tools::process::{cancellation, Invocation, ProcessOutput};
    use crate::tools::{BuildReport, CoverageResult, MutationResult, TestCounts, ToolAdapter};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const VALID_TEST: &str = "```java\nimport org.junit.jupiter.api.Test;\nimport static org.junit.jupiter.api.Assertions.*;\n\npublic class CalculatorTest {\n    @Test\n    void adds() {\n        assertEquals(4, new Calculator().add(2, 2));\n    }\n}\n```";

    const BROKEN_TEST: &str = "```java\nimport org.junit.jupiter.api.Test;\n\npublic class CalculatorTest {\n    @Test\n    void adds() {\n        assertEquals(4, new Calculator().add(2, 2)\n    }\n}\n```";

    type Outcome<O, E> = Box<dyn Fn(&StageContext) -> Result<O, E> + Send + Sync>;

    /// Adapter that returns a canned outcome without spawning anything.
    struct FakeAdapter<O, E> {
        outcome: Outcome<O, E>,
        delay: Option<Duration>,
        calls: AtomicU32,
    }

    impl<O, E> FakeAdapter<O, E> {
        fn new(outcome: impl Fn(&StageContext) -> Result<O, E> + Send + Sync + 'static) -> Self {
            Self {
                outcome: Box::new(outcome),
                delay: None,
                calls: AtomicU32::new(0),
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl<O, E> ToolAdapter for FakeAdapter<O, E>
    where
        O: Send + 'static,
        E: From<ToolError> + std::error::Error + Send + 'static,
    {
        type Output = O;
        type Error = E;

        fn name(&self) -> &'static str {
            "fake"
        }

        fn invocations(&self, _ctx: &StageContext) -> Vec<Invocation> {
            Vec::new()
        }

        fn parse(&self, ctx: &StageContext, _outputs: &[ProcessOutput]) -> Result<O, E> {
            (self.outcome)(ctx)
        }

        async fn run(&self, ctx: &StageContext, _timeout: Duration, cancel: &CancelSignal) -> Result<O, E> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let cancelled = || {
                E::from(ToolError::Cancelled {
                    program: "fake".to_string(),
                    output: "partial output".to_string(),
                })
            };
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(cancelled()),
                }
            }
            self.parse(ctx, &[])
        }
    }

    struct Fakes {
        compile: Arc<FakeAdapter<BuildReport, BuildError>>,
        execute: Arc<FakeAdapter<TestCounts, ExecutionError>>,
        coverage: Arc<FakeAdapter<CoverageResult, ToolError>>,
        mutation: Arc<FakeAdapter<MutationResult, ToolError>>,
    }

    impl Fakes {
        fn passing() -> Self {
            Self {
                compile: Arc::new(FakeAdapter::new(|ctx| {
                    if ctx.test_file.is_file() {
                        Ok(BuildReport::default())
                    } else {
                        Err(BuildError::Compilation {
                            output: format!("missing {}", ctx.test_file.display()),
                        })
                    }
                })),
                execute: Arc::new(FakeAdapter::new(|_| {
                    Ok(TestCounts {
                        passed: 5,
                        ..Default::default()
                    })
                })),
                coverage: Arc::new(FakeAdapter::new(|_| {
                    Ok(CoverageResult::from_counts("jacoco", 40, 40, Some((8, 8))))
                })),
                mutation: Arc::new(FakeAdapter::new(|_| {
                    Ok(MutationResult::from_counts("pit", 23, 2, 0, 0, 0))
                })),
            }
        }

        fn toolchain(&self) -> Toolchain {
            Toolchain {
                compile: self.compile.clone(),
                execute: self.execute.clone(),
                coverage: self.coverage.clone(),
                mutation: self.mutation.clone(),
            }
        }
    }

    struct Fixture {
        project: TempDir,
        module: Module,
        config: Arc<Config>,
    }

    fn fixture() -> Fixture {
        let project = TempDir::new().unwrap();
        let root = project.path();
        std::fs::write(root.join("pom.xml"), "<project/>").unwrap();
        let src = root.join("src/main/java");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(
            src.join("Calculator.java"),
            "public class Calculator {\n    public int add(int a, int b) { return a + b; }\n}\n",
        )
        .unwrap();
        let module = Module::load(&src.join("Calculator.java"), ComplexityTier::Baseline, None).unwrap();

        let mut config = Config::default();
        config.evaluation.generated_tests_dir = root.join("generated");
        Fixture {
            project,
            module,
            config: Arc::new(config),
        }
    }

    fn orchestrator(fixture: &Fixture, fakes: &Fakes, client: Arc<ScriptedClient>) -> Orchestrator {
        let retry = RetryPolicy {
            max_retries: 0,
            base_backoff: Duration::from_millis(1),
        };
        let generator = Arc::new(TestGenerator::new(client, retry));
        Orchestrator::new(fixture.config.clone(), Some(generator)).with_toolchain(fakes.toolchain())
    }

    fn skipped(reason: &str) -> StageStatus {
        StageStatus::Skipped {
            reason: reason.to_string(),
        }
    }

    // =========================================================================
    // Stage sequencing tests
    // =========================================================================

    #[tokio::test]
    async fn test_full_run_reports_coverage_and_mutation_score() {
        let fixture = fixture();
        let fakes = Fakes::passing();
        let orchestrator = orchestrator(&fixture, &fakes, Arc::new(ScriptedClient::always(VALID_TEST)));

        let run = orchestrator
            .evaluate(&fixture.module, TestInput::Generate(Protocol::Standard), &CancelSignal::never())
            .await;

        assert!(run.is_complete());
        assert!(run.finished_at.is_some());
        assert_eq!(run.coverage.as_ref().unwrap().line_coverage, 100.0);
        assert_eq!(run.mutation.as_ref().unwrap().score, 92.0);
        assert_eq!(run.execution.unwrap().passed, 5);

        let generation = run.generation().unwrap();
        assert_eq!(generation.protocol, Protocol::Standard);
        assert_eq!(generation.model, "fake-model");
        match &run.test_source {
            TestSource::Generated { saved_to, .. } => {
                let saved = saved_to.as_ref().unwrap();
                assert_eq!(
                    saved,
                    &fixture
                        .project
                        .path()
                        .join("generated")
                        .join(run.module.tier.to_string())
                        .join("CalculatorTest.java")
                );
                assert!(saved.is_file());
            }
            other => panic!("expected generated source, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_compile_failure_skips_everything_after() {
        let fixture = fixture();
        let mut fakes = Fakes::passing();
        fakes.compile = Arc::new(FakeAdapter::new(|_| {
            Err(BuildError::Compilation {
                output: "[ERROR] CalculatorTest.java:[7,55] ')' expected".to_string(),
            })
        }));
        let orchestrator = orchestrator(&fixture, &fakes, Arc::new(ScriptedClient::always(BROKEN_TEST)));

        let run = orchestrator
            .evaluate(&fixture.module, TestInput::Generate(Protocol::Standard), &CancelSignal::never())
            .await;

        match run.status(Stage::Compile) {
            StageStatus::Failed { reason, output } => {
                assert_eq!(reason, "test sources do not compile");
                assert!(output.as_deref().unwrap().contains("')' expected"));
            }
            other => panic!("expected compile failure, got {:?}", other),
        }
        for stage in [Stage::Execute, Stage::Coverage, Stage::Mutation] {
            assert_eq!(run.status(stage), &skipped("upstream failure"));
        }
        assert!(!run.is_complete());
        assert_eq!(fakes.execute.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_tests_with_results_still_measure_coverage() {
        let fixture = fixture();
        let mut fakes = Fakes::passing();
        fakes.execute = Arc::new(FakeAdapter::new(|_| {
            Err(ExecutionError::TestsFailed {
                counts: TestCounts {
                    passed: 3,
                    failed: 1,
                    ..Default::default()
                },
                output: "Tests run: 4, Failures: 1".to_string(),
            })
        }));
        let orchestrator = orchestrator(&fixture, &fakes, Arc::new(ScriptedClient::always(VALID_TEST)));

        let run = orchestrator
            .evaluate(&fixture.module, TestInput::Generate(Protocol::Advanced), &CancelSignal::never())
            .await;

        assert_eq!(run.status(Stage::Execute).name(), "failed");
        assert_eq!(run.status(Stage::Coverage), &StageStatus::Succeeded);
        assert_eq!(run.status(Stage::Mutation), &skipped("upstream failure"));
        assert_eq!(run.execution.unwrap().failed, 1);
        assert!(run.coverage.is_some());
        assert_eq!(fakes.mutation.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_crash_without_results_skips_coverage() {
        let fixture = fixture();
        let mut fakes = Fakes::passing();
        fakes.execute = Arc::new(FakeAdapter::new(|_| {
            Err(ExecutionError::Tool(ToolError::Timeout {
                program: "mvn".to_string(),
                seconds: 300,
                output: "Running CalculatorTest".to_string(),
            }))
        }));
        let orchestrator = orchestrator(&fixture, &fakes, Arc::new(ScriptedClient::always(VALID_TEST)));

        let run = orchestrator
            .evaluate(&fixture.module, TestInput::Generate(Protocol::Standard), &CancelSignal::never())
            .await;

        assert_eq!(
            run.status(Stage::Execute).reason(),
            Some("`mvn` timed out after 300s")
        );
        assert_eq!(run.status(Stage::Coverage), &skipped("upstream failure"));
        assert_eq!(run.status(Stage::Mutation), &skipped("upstream failure"));
        assert_eq!(fakes.coverage.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_coverage_failure_skips_mutation() {
        let fixture = fixture();
        let mut fakes = Fakes::passing();
        fakes.coverage = Arc::new(FakeAdapter::new(|_| {
            Err(ToolError::MissingReport {
                tool: "jacoco",
                detail: "no jacoco.csv".to_string(),
            })
        }));
        let orchestrator = orchestrator(&fixture, &fakes, Arc::new(ScriptedClient::always(VALID_TEST)));

        let run = orchestrator
            .evaluate(&fixture.module, TestInput::Generate(Protocol::Standard), &CancelSignal::never())
            .await;

        assert_eq!(run.status(Stage::Execute), &StageStatus::Succeeded);
        assert_eq!(run.status(Stage::Coverage).name(), "failed");
        assert_eq!(run.status(Stage::Mutation), &skipped("upstream failure"));
    }

    #[tokio::test]
    async fn test_captured_output_is_truncated() {
        let mut fixture = fixture();
        let mut config = (*fixture.config).clone();
        config.evaluation.max_output_bytes = 16;
        fixture.config = Arc::new(config);

        let mut fakes = Fakes::passing();
        fakes.compile = Arc::new(FakeAdapter::new(|_| {
            Err(BuildError::Compilation {
                output: format!("{}BUILD FAILURE", "[INFO] noise\n".repeat(500)),
            })
        }));
        let orchestrator = orchestrator(&fixture, &fakes, Arc::new(ScriptedClient::always(VALID_TEST)));

        let run = orchestrator
            .evaluate(&fixture.module, TestInput::Generate(Protocol::Standard), &CancelSignal::never())
            .await;

        let (stage, _, output) = run.failed_stage().unwrap();
        assert_eq!(stage, Stage::Compile);
        let output = output.unwrap();
        assert!(output.starts_with("(truncated)..."));
        assert!(output.ends_with("BUILD FAILURE"));
    }

    // =========================================================================
    // Test source tests
    // =========================================================================

    #[tokio::test]
    async fn test_generation_failure_skips_all_stages() {
        let fixture = fixture();
        let fakes = Fakes::passing();
        let client = Arc::new(ScriptedClient::always("I'm sorry, I can't write tests for this."));
        let orchestrator = orchestrator(&fixture, &fakes, client.clone());

        let run = orchestrator
            .evaluate(&fixture.module, TestInput::Generate(Protocol::Expert), &CancelSignal::never())
            .await;

        for stage in Stage::ALL {
            assert_eq!(run.status(stage), &skipped("test generation failed"));
        }
        assert!(matches!(
            run.test_source,
            TestSource::GenerationFailed {
                protocol: Protocol::Expert,
                ..
            }
        ));
        assert_eq!(run.protocol(), Some(Protocol::Expert));
        assert_eq!(client.calls(), 1);
        assert_eq!(fakes.compile.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generation_without_client() {
        let fixture = fixture();
        let fakes = Fakes::passing();
        let orchestrator =
            Orchestrator::new(fixture.config.clone(), None).with_toolchain(fakes.toolchain());

        let run = orchestrator
            .evaluate(&fixture.module, TestInput::Generate(Protocol::Standard), &CancelSignal::never())
            .await;

        match &run.test_source {
            TestSource::GenerationFailed { error, .. } => assert_eq!(error, "no LLM client configured"),
            other => panic!("expected generation failure, got {:?}", other),
        }
        assert!(run.is_terminal());
    }

    #[tokio::test]
    async fn test_supplied_test_inside_project_is_used_in_place() {
        let fixture = fixture();
        let test_dir = fixture.project.path().join("src/test/java");
        std::fs::create_dir_all(&test_dir).unwrap();
        std::fs::write(test_dir.join("CalculatorTest.java"), "public class CalculatorTest {}").unwrap();

        let mut fakes = Fakes::passing();
        fakes.compile = Arc::new(FakeAdapter::new(|ctx| {
            let expected = ctx.workspace.join("src/test/java/CalculatorTest.java");
            if ctx.test_file == expected && ctx.source_file.is_file() {
                Ok(BuildReport::default())
            } else {
                Err(BuildError::Compilation {
                    output: format!("unexpected test file {}", ctx.test_file.display()),
                })
            }
        }));
        let client = Arc::new(ScriptedClient::always(VALID_TEST));
        let orchestrator = orchestrator(&fixture, &fakes, client.clone());

        let run = orchestrator
            .evaluate(
                &fixture.module,
                TestInput::Supplied(test_dir.join("CalculatorTest.java")),
                &CancelSignal::never(),
            )
            .await;

        assert!(run.is_complete(), "{:?}", run.failed_stage());
        assert_eq!(client.calls(), 0);
        assert!(run.generation().is_none());
    }

    #[tokio::test]
    async fn test_supplied_test_outside_project_is_materialized() {
        let fixture = fixture();
        let elsewhere = TempDir::new().unwrap();
        let supplied = elsewhere.path().join("CalculatorEdgeTest.java");
        std::fs::write(&supplied, "public class CalculatorEdgeTest {}").unwrap();

        let mut fakes = Fakes::passing();
        fakes.compile = Arc::new(FakeAdapter::new(|ctx| {
            if ctx.test_file == ctx.workspace.join("src/test/java/CalculatorEdgeTest.java")
                && ctx.test_file.is_file()
            {
                Ok(BuildReport::default())
            } else {
                Err(BuildError::Compilation {
                    output: ctx.test_file.display().to_string(),
                })
            }
        }));
        let orchestrator = orchestrator(&fixture, &fakes, Arc::new(ScriptedClient::always(VALID_TEST)));

        let run = orchestrator
            .evaluate(&fixture.module, TestInput::Supplied(supplied), &CancelSignal::never())
            .await;
        assert_eq!(run.status(Stage::Compile), &StageStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_missing_supplied_test_fails_compile() {
        let fixture = fixture();
        let fakes = Fakes::passing();
        let orchestrator = orchestrator(&fixture, &fakes, Arc::new(ScriptedClient::always(VALID_TEST)));

        let run = orchestrator
            .evaluate(
                &fixture.module,
                TestInput::Supplied(PathBuf::from("/nonexistent/CalculatorTest.java")),
                &CancelSignal::never(),
            )
            .await;

        let reason = run.status(Stage::Compile).reason().unwrap();
        assert!(reason.contains("Test file not found"));
        assert_eq!(run.status(Stage::Execute), &skipped("upstream failure"));
        assert_eq!(fakes.compile.calls.load(Ordering::SeqCst), 0);
    }

    // =========================================================================
    // Repeatability and cancellation tests
    // =========================================================================

    #[tokio::test]
    async fn test_repeated_runs_regenerate_and_match() {
        let fixture = fixture();
        let fakes = Fakes::passing();
        let client = Arc::new(ScriptedClient::always(VALID_TEST));
        let orchestrator = orchestrator(&fixture, &fakes, client.clone());

        let first = orchestrator
            .evaluate(&fixture.module, TestInput::Generate(Protocol::Standard), &CancelSignal::never())
            .await;
        let second = orchestrator
            .evaluate(&fixture.module, TestInput::Generate(Protocol::Standard), &CancelSignal::never())
            .await;

        assert_eq!(first.statuses(), second.statuses());
        assert_eq!(client.calls(), 2);
        assert_eq!(fakes.compile.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_fails_in_flight_stage() {
        let fixture = fixture();
        let mut fakes = Fakes::passing();
        fakes.execute = Arc::new(
            FakeAdapter::new(|_| Ok(TestCounts::default())).slow(Duration::from_secs(30)),
        );
        let orchestrator = Arc::new(orchestrator(
            &fixture,
            &fakes,
            Arc::new(ScriptedClient::always(VALID_TEST)),
        ));

        let (handle, signal) = cancellation();
        let task = {
            let orchestrator = orchestrator.clone();
            let module = fixture.module.clone();
            tokio::spawn(async move {
                orchestrator
                    .evaluate(&module, TestInput::Generate(Protocol::Standard), &signal)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.cancel();

        let run = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.status(Stage::Compile), &StageStatus::Succeeded);
        match run.status(Stage::Execute) {
            StageStatus::Failed { reason, output } => {
                assert_eq!(reason, "cancelled");
                assert_eq!(output.as_deref(), Some("partial output"));
            }
            other => panic!("expected cancelled execute, got {:?}", other),
        }
        assert_eq!(run.status(Stage::Coverage), &skipped("cancelled"));
        assert_eq!(run.status(Stage::Mutation), &skipped("cancelled"));
    }

    #[tokio::test]
    async fn test_evaluate_many_keeps_order() {
        let fixture = fixture();
        let fakes = Fakes::passing();
        let orchestrator = Arc::new(orchestrator(
            &fixture,
            &fakes,
            Arc::new(ScriptedClient::always(VALID_TEST)),
        ));

        let mut experimental = fixture.module.clone();
        experimental.tier = ComplexityTier::Experimental;
        let runs = orchestrator
            .evaluate_many(
                vec![
                    (fixture.module.clone(), TestInput::Generate(Protocol::Standard)),
                    (experimental, TestInput::Generate(Protocol::Expert)),
                ],
                &CancelSignal::never(),
            )
            .await;

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].module.tier, ComplexityTier::Baseline);
        assert_eq!(runs[1].module.tier, ComplexityTier::Experimental);
        assert!(runs.iter().all(|r| r.is_complete()));
    }
}

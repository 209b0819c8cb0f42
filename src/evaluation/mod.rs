//! Module evaluation: loading modules, isolating their projects and running
//! the compile, execute, coverage and mutation stages against a test.

pub mod model;
pub mod orchestrator;
pub mod run;
pub mod workspace;

pub use model::{ComplexityTier, Module};
pub use orchestrator::{Orchestrator, TestInput};
pub use run::{EvaluationRun, Stage, StageStatus, TestSource};

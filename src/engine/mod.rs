//! Training engine seam
//!
//! The engine that owns embedding storage, kernels and optimization is an
//! external collaborator. This module defines:
//! - [`TrainingEngine`] - the three calls a launcher makes: compile, summary, fit
//! - [`Model`] - what gets compiled
//! - [`DryRunEngine`] - a host-only implementation for tests and planning

pub mod dry_run;
pub mod model;
pub mod schedule;

pub use dry_run::{CompiledModel, DryRunEngine, DryRunStats, SummaryRow};
pub use model::Model;
pub use schedule::{snapshot_name, training_events, EventKind, FitReport, TrainingEvent};

use tracing::info_span;

use crate::config::FitParams;
use crate::error::ForgeResult;

/// Something that can compile and train a [`Model`].
pub trait TrainingEngine {
    /// Check the model and build whatever the engine needs to run it.
    fn compile(&mut self, model: &Model) -> ForgeResult<()>;

    /// Human-readable description of the compiled model.
    fn summary(&mut self) -> ForgeResult<String>;

    /// Run the training loop.
    fn fit(&mut self, params: &FitParams) -> ForgeResult<FitReport>;
}

/// Compile, summarize and fit in one go, returning the summary and report.
pub fn launch<E: TrainingEngine>(
    engine: &mut E,
    model: &Model,
    params: &FitParams,
) -> ForgeResult<(String, FitReport)> {
    let span = info_span!("launch", max_iter = params.max_iter);
    let _guard = span.enter();

    engine.compile(model)?;
    let summary = engine.summary()?;
    let report = engine.fit(params)?;
    Ok((summary, report))
}

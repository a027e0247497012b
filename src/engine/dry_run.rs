//! Host-only engine that validates and walks a training run without
//! computing anything.
//!
//! It stands in for the GPU engine in tests and in the CLI: `compile` does
//! every check a real engine would need up front, `summary` renders the
//! layer table, and `fit` replays the iteration schedule.

use tracing::{debug, info};

use super::model::Model;
use super::schedule::{training_events, EventKind, FitReport};
use super::TrainingEngine;
use crate::config::FitParams;
use crate::embedding::GpuPlacement;
use crate::error::{ForgeError, ForgeResult};

/// One row of the model summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub layer_type: String,
    pub bottoms: Vec<String>,
    pub tops: Vec<String>,
    pub output_shapes: Vec<Vec<usize>>,
}

/// What `compile` produced
#[derive(Debug, Clone)]
pub struct CompiledModel {
    pub rows: Vec<SummaryRow>,
    pub placement: Vec<GpuPlacement>,
    pub num_gpus: usize,
    pub batchsize: usize,
}

/// Call counters, for tests
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DryRunStats {
    pub compile_count: usize,
    pub summary_count: usize,
    pub fit_count: usize,
    pub iterations_run: usize,
}

#[derive(Debug, Default)]
pub struct DryRunEngine {
    compiled: Option<CompiledModel>,
    stats: DryRunStats,
}

impl DryRunEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &DryRunStats {
        &self.stats
    }

    pub fn compiled(&self) -> Option<&CompiledModel> {
        self.compiled.as_ref()
    }

    pub fn reset(&mut self) {
        self.compiled = None;
        self.stats = DryRunStats::default();
    }
}

impl TrainingEngine for DryRunEngine {
    fn compile(&mut self, model: &Model) -> ForgeResult<()> {
        self.stats.compile_count += 1;
        let shapes = model.validate()?;

        let mut rows = Vec::with_capacity(model.graph.len());
        for id in model.graph.topological_order()? {
            let layer = &model.graph.layers[id.0];
            let output_shapes = layer
                .top_names
                .iter()
                .map(|t| {
                    shapes.get(t).map(<[usize]>::to_vec).ok_or_else(|| {
                        ForgeError::Internal(format!("no shape inferred for '{}'", t))
                    })
                })
                .collect::<ForgeResult<Vec<_>>>()?;
            rows.push(SummaryRow {
                layer_type: layer.kind.type_name().to_string(),
                bottoms: layer.bottom_names.clone(),
                tops: layer.top_names.clone(),
                output_shapes,
            });
        }

        let placement = model
            .embedding_collections()
            .into_iter()
            .flat_map(|c| c.placement_report())
            .collect();

        info!(layers = rows.len(), "compiled model");
        self.compiled = Some(CompiledModel {
            rows,
            placement,
            num_gpus: model.solver.num_gpus(),
            batchsize: model.solver.batchsize,
        });
        Ok(())
    }

    fn summary(&mut self) -> ForgeResult<String> {
        let compiled = self.compiled.as_ref().ok_or(ForgeError::EngineNotCompiled)?;
        self.stats.summary_count += 1;

        let mut lines = vec![
            format!(
                "{:<24}{:<40}{:<40}{}",
                "Layer Type", "Input Name", "Output Name", "Output Shape"
            ),
            "-".repeat(120),
        ];
        for row in &compiled.rows {
            // Collapse long fan-in lists like the 26 embedding lookups.
            let shapes = match row.output_shapes.as_slice() {
                [single] => format!("({}, {})", compiled.batchsize, join_dims(single)),
                many => format!("{} tensors", many.len()),
            };
            lines.push(format!(
                "{:<24}{:<40}{:<40}{}",
                row.layer_type,
                abbreviate(&row.bottoms),
                abbreviate(&row.tops),
                shapes
            ));
        }
        if !compiled.placement.is_empty() {
            lines.push(String::new());
            lines.extend(compiled.placement.iter().map(|gpu| {
                format!(
                    "gpu{}: {} tables, {:.2} MiB",
                    gpu.gpu,
                    gpu.local_table_ids.len(),
                    gpu.param_bytes as f64 / (1024.0 * 1024.0)
                )
            }));
        }

        let mut out = lines.join("\n");
        out.push('\n');
        Ok(out)
    }

    fn fit(&mut self, params: &FitParams) -> ForgeResult<FitReport> {
        if self.compiled.is_none() {
            return Err(ForgeError::EngineNotCompiled);
        }
        params.validate()?;
        self.stats.fit_count += 1;

        let mut report = FitReport {
            iterations: params.max_iter,
            ..Default::default()
        };
        for event in training_events(params) {
            match event.kind {
                EventKind::Display => debug!(iter = event.iteration, "display"),
                EventKind::Eval => debug!(iter = event.iteration, "eval"),
                EventKind::Snapshot => info!(iter = event.iteration, "snapshot"),
            }
            report.record(&event, &params.snapshot_prefix);
        }
        self.stats.iterations_run += params.max_iter;
        info!(
            iterations = report.iterations,
            evals = report.evals,
            snapshots = report.snapshots.len(),
            "dry run finished"
        );
        Ok(report)
    }
}

fn abbreviate(names: &[String]) -> String {
    if names.len() > 4 {
        format!(
            "{},{},...,{} ({})",
            names[0],
            names[1],
            names[names.len() - 1],
            names.len()
        )
    } else {
        names.join(",")
    }
}

fn join_dims(dims: &[usize]) -> String {
    dims.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataReaderParams, DataReaderType, OptimizerConfig, SolverConfig};
    use crate::dlrm::DlrmBuilder;
    use std::path::PathBuf;

    fn small_model() -> Model {
        let slots = vec![203931, 4, 14, 90000, 7, 8];
        let reader = DataReaderParams::new(
            DataReaderType::Parquet,
            vec![PathBuf::from("train.txt")],
            PathBuf::from("val.txt"),
        )
        .with_slot_size_array(slots.clone());
        DlrmBuilder::new(slots)
            .num_gpus(2)
            .ev_size(16)
            .bottom_mlp(vec![16])
            .top_mlp(vec![8, 1])
            .build(
                SolverConfig::new().with_local_gpus(2),
                reader,
                OptimizerConfig::default(),
            )
            .unwrap()
    }

    #[test]
    fn test_summary_layout() {
        let mut engine = DryRunEngine::new();
        engine.compile(&small_model()).unwrap();
        let summary = engine.summary().unwrap();

        let lines: Vec<&str> = summary.lines().collect();
        assert!(lines[0].starts_with("Layer Type"));
        assert_eq!(lines[1], "-".repeat(120));
        assert!(summary.ends_with('\n'));
        assert!(summary.contains("data0,data1,...,data5 (6)"));
        assert!(summary.contains("(8, 16)"));
        assert!(lines.iter().any(|l| l.starts_with("gpu1: 5 tables")));
        assert_eq!(engine.stats().summary_count, 1);
    }

    #[test]
    fn test_reset_clears_compiled_model() {
        let mut engine = DryRunEngine::new();
        engine.compile(&small_model()).unwrap();
        engine.reset();
        assert!(engine.compiled().is_none());
        assert_eq!(engine.stats(), &DryRunStats::default());
    }
}

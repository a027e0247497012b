//! dlrmforge - DLRM training planner
//!
//! Builds the embedding sharding plan and the validated layer graph of a DLRM
//! recommendation model, and hands them to a training engine through the
//! [`engine::TrainingEngine`] seam.

#![allow(clippy::module_inception)] // graph::graph mirrors the module layout

pub mod config;
pub mod dlrm;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod graph;
pub mod logging;
pub mod sharding;

pub use config::TrainingConfig;
pub use dlrm::{DlrmBuilder, DlrmSpec};
pub use engine::{DryRunEngine, Model, TrainingEngine};
pub use error::{ErrorCategory, ForgeError, ForgeResult};
pub use logging::init_logging_default;
pub use sharding::{generate_plan, Placement, ShardingPlan};

/// Build the model described by `config`: sharding plan, embedding
/// collection and DLRM graph, bound to the config's solver, reader and
/// optimizer.
pub fn build_model(config: &TrainingConfig) -> ForgeResult<Model> {
    config.validate()?;
    DlrmBuilder::new(config.reader.slot_size_array.clone())
        .with_spec(config.model.clone())
        .num_gpus(config.num_gpus())
        .build(
            config.solver.clone(),
            config.reader.clone(),
            config.optimizer,
        )
}

#[cfg(test)]
mod library_tests {
    use super::*;

    #[test]
    fn test_build_reference_model() {
        let model = build_model(&TrainingConfig::reference()).unwrap();
        assert!(model.validate().is_ok());
        assert_eq!(model.embedding_collections().len(), 1);
    }
}

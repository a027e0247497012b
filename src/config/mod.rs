//! Training configuration.
//!
//! This module defines [`TrainingConfig`], the on-disk description of a
//! training run: solver, data reader, optimizer, model shape and fit cadence.
//! Configs are plain JSON.

pub mod optimizer;
pub mod reader;
pub mod solver;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config_error;
use crate::dlrm::{DlrmSpec, CRITEO_40M_SLOT_SIZES};
use crate::error::{io_context, ForgeResult};

pub use optimizer::{FitParams, OptimizerConfig, OptimizerType, UpdateType};
pub use reader::{
    AlignmentType, AsyncParam, CheckType, DataReaderParams, DataReaderType, SampleLayout,
};
pub use solver::{MetricSpec, MetricType, SolverConfig};

/// Batch size the reference reader's I/O queue is sized for.
pub const REFERENCE_IO_BATCHSIZE: usize = 65536;

/// Everything needed to build and launch one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default)]
    pub solver: SolverConfig,
    pub reader: DataReaderParams,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub model: DlrmSpec,
    #[serde(default)]
    pub fit: FitParams,
}

impl TrainingConfig {
    /// The DLRM run on the 40M-row-limited Criteo set: 8 GPUs, async raw
    /// reader, SGD.
    ///
    /// Reader I/O is sized for the production batch even though the solver
    /// runs small batches.
    pub fn reference() -> Self {
        let model = DlrmSpec::default();
        let slot_sizes = CRITEO_40M_SLOT_SIZES.to_vec();
        let layout = SampleLayout::new(model.label_dim, model.dense_dim, slot_sizes.len());

        let reader = DataReaderParams::new(
            DataReaderType::RawAsync,
            vec![PathBuf::from(
                "/raid/datasets/criteo/mlperf/40m.limit_preshuffled/train_data.bin",
            )],
            PathBuf::from("/raid/datasets/criteo/mlperf/40m.limit_preshuffled/test_data.bin"),
        )
        .with_num_samples(4_195_197_692, 89_137_319)
        .with_cache_eval_data(51)
        .with_slot_size_array(slot_sizes)
        .with_async_param(AsyncParam::derive(REFERENCE_IO_BATCHSIZE, &layout, 2));

        Self {
            solver: SolverConfig::default(),
            reader,
            optimizer: OptimizerConfig::default(),
            model,
            fit: FitParams::default(),
        }
    }

    pub fn from_json_str(json: &str) -> ForgeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> ForgeResult<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| io_context(e, &format!("reading {}", path.display())))?;
        let config = Self::from_json_str(&contents)?;
        debug!(path = %path.display(), "loaded training config");
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> ForgeResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| io_context(e, &format!("writing {}", path.display())))
    }

    /// GPUs the sharding plan is built for: the solver's device count
    pub fn num_gpus(&self) -> usize {
        self.solver.num_gpus()
    }

    pub fn validate(&self) -> ForgeResult<()> {
        self.solver.validate()?;
        self.reader.validate()?;
        self.optimizer.validate()?;
        self.model.validate()?;
        self.fit.validate()?;

        if let Some(expected) = self.model.num_gpus {
            let devices = self.solver.num_gpus();
            if expected != devices {
                return Err(config_error!(
                    "model expects {} GPUs but solver vvgpu lists {} devices",
                    expected,
                    devices
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_config_is_valid() {
        let config = TrainingConfig::reference();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_gpus(), 8);
        assert_eq!(config.reader.slot_size_array.len(), 26);
        assert_eq!(
            config.reader.async_param.as_ref().map(|p| p.max_nr_per_thread),
            Some(36)
        );
    }

    #[test]
    fn test_json_round_trip_in_memory() {
        let config = TrainingConfig::reference();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(TrainingConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{
            "reader": {
                "data_reader_type": "Parquet",
                "source": ["./criteo_data/train/_file_list.txt"],
                "eval_source": "./criteo_data/val/_file_list.txt",
                "num_samples": 0,
                "eval_num_samples": 0
            }
        }"#;
        let config = TrainingConfig::from_json_str(json).unwrap();
        assert_eq!(config.solver, SolverConfig::default());
        assert_eq!(config.fit.max_iter, 1000);
        assert!(config.reader.async_param.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_gpu_count_cross_check() {
        let mut config = TrainingConfig::reference();
        config.model.num_gpus = Some(8);
        assert!(config.validate().is_ok());
        assert_eq!(config.num_gpus(), 8);

        config.model.num_gpus = Some(2);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, crate::error::ForgeError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("2 GPUs"));

        config.solver = config.solver.clone().with_local_gpus(2);
        assert!(config.validate().is_ok());
        assert_eq!(config.num_gpus(), 2);
    }

    #[test]
    fn test_bad_json_is_io_category() {
        let err = TrainingConfig::from_json_str("{").unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Io);
    }
}

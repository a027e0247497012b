//! Optimizer and training-loop parameters.

use serde::{Deserialize, Serialize};

use crate::config_error;
use crate::error::ForgeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptimizerType {
    #[default]
    Sgd,
    Adam,
    AdaGrad,
}

/// How embedding rows are updated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpdateType {
    /// Only rows touched by the batch
    #[default]
    Local,
    /// Every row, every step
    Global,
    /// Touched rows, with the skipped global updates applied lazily
    LazyGlobal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub optimizer_type: OptimizerType,
    pub update_type: UpdateType,
    pub atomic_update: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            optimizer_type: OptimizerType::Sgd,
            update_type: UpdateType::Local,
            atomic_update: true,
        }
    }
}

impl OptimizerConfig {
    pub fn new(optimizer_type: OptimizerType, update_type: UpdateType) -> Self {
        Self {
            optimizer_type,
            update_type,
            atomic_update: optimizer_type == OptimizerType::Sgd,
        }
    }

    pub fn with_atomic_update(mut self, atomic_update: bool) -> Self {
        self.atomic_update = atomic_update;
        self
    }

    pub fn validate(&self) -> ForgeResult<()> {
        if self.atomic_update && self.optimizer_type != OptimizerType::Sgd {
            return Err(config_error!(
                "atomic_update is only supported by SGD, not {:?}",
                self.optimizer_type
            ));
        }
        Ok(())
    }
}

/// Length and cadence of a training run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitParams {
    pub max_iter: usize,
    /// Log training metrics every `display` iterations
    pub display: usize,
    pub eval_interval: usize,
    /// Write a checkpoint every `snapshot` iterations
    pub snapshot: usize,
    pub snapshot_prefix: String,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            display: 100,
            eval_interval: 100,
            snapshot: 10_000_000,
            snapshot_prefix: "dlrm".to_string(),
        }
    }
}

impl FitParams {
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_display(mut self, display: usize) -> Self {
        self.display = display;
        self
    }

    pub fn with_eval_interval(mut self, eval_interval: usize) -> Self {
        self.eval_interval = eval_interval;
        self
    }

    pub fn with_snapshot(mut self, snapshot: usize, prefix: impl Into<String>) -> Self {
        self.snapshot = snapshot;
        self.snapshot_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> ForgeResult<()> {
        if self.max_iter == 0 {
            return Err(config_error!("max_iter must be > 0"));
        }
        if self.display == 0 || self.eval_interval == 0 || self.snapshot == 0 {
            return Err(config_error!("display, eval_interval and snapshot must be > 0"));
        }
        if self.snapshot_prefix.is_empty() {
            return Err(config_error!("snapshot_prefix must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimizer_defaults() {
        let opt = OptimizerConfig::default();
        assert_eq!(opt.optimizer_type, OptimizerType::Sgd);
        assert!(opt.atomic_update);
        assert!(opt.validate().is_ok());
    }

    #[test]
    fn test_atomic_update_requires_sgd() {
        let adam = OptimizerConfig::new(OptimizerType::Adam, UpdateType::Global);
        assert!(!adam.atomic_update);
        assert!(adam.validate().is_ok());
        assert!(adam.with_atomic_update(true).validate().is_err());
    }

    #[test]
    fn test_fit_params() {
        let fit = FitParams::default();
        assert_eq!(fit.max_iter, 1000);
        assert_eq!(fit.snapshot_prefix, "dlrm");
        assert!(fit.validate().is_ok());
        assert!(fit.clone().with_display(0).validate().is_err());
        assert!(fit.with_snapshot(10, "").validate().is_err());
    }
}

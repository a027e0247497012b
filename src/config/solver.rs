//! Solver configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config_error;
use crate::error::ForgeResult;

/// Evaluation metric tracked during training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    AverageLoss,
    #[serde(rename = "AUC")]
    Auc,
}

/// Metric plus the threshold at which training may stop early
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub metric: MetricType,
    pub threshold: f64,
}

/// Global training parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Batches evaluated per evaluation pass
    pub max_eval_batches: usize,
    pub batchsize_eval: usize,
    pub batchsize: usize,
    pub lr: f64,
    pub warmup_steps: usize,
    /// Device ids per node
    pub vvgpu: Vec<Vec<usize>>,
    pub repeat_dataset: bool,
    /// 64-bit sparse keys instead of 32-bit
    pub i64_input_key: bool,
    pub metrics_spec: Vec<MetricSpec>,
    pub use_embedding_collection: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            max_eval_batches: 70,
            batchsize_eval: 8,
            batchsize: 8,
            lr: 0.5,
            warmup_steps: 300,
            vvgpu: vec![(0..8).collect()],
            repeat_dataset: true,
            i64_input_key: false,
            metrics_spec: vec![MetricSpec {
                metric: MetricType::AverageLoss,
                threshold: 0.0,
            }],
            use_embedding_collection: true,
        }
    }
}

impl SolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batchsize(mut self, batchsize: usize) -> Self {
        self.batchsize = batchsize;
        self
    }

    pub fn with_batchsize_eval(mut self, batchsize_eval: usize) -> Self {
        self.batchsize_eval = batchsize_eval;
        self
    }

    pub fn with_max_eval_batches(mut self, max_eval_batches: usize) -> Self {
        self.max_eval_batches = max_eval_batches;
        self
    }

    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_warmup_steps(mut self, warmup_steps: usize) -> Self {
        self.warmup_steps = warmup_steps;
        self
    }

    pub fn with_vvgpu(mut self, vvgpu: Vec<Vec<usize>>) -> Self {
        self.vvgpu = vvgpu;
        self
    }

    /// Single node with devices `0..n`
    pub fn with_local_gpus(self, n: usize) -> Self {
        self.with_vvgpu(vec![(0..n).collect()])
    }

    pub fn with_metric(mut self, metric: MetricType, threshold: f64) -> Self {
        self.metrics_spec.retain(|m| m.metric != metric);
        self.metrics_spec.push(MetricSpec { metric, threshold });
        self
    }

    /// Total number of GPUs across all nodes
    pub fn num_gpus(&self) -> usize {
        self.vvgpu.iter().map(Vec::len).sum()
    }

    pub fn num_nodes(&self) -> usize {
        self.vvgpu.len()
    }

    pub fn validate(&self) -> ForgeResult<()> {
        if self.batchsize == 0 || self.batchsize_eval == 0 {
            return Err(config_error!("batch sizes must be > 0"));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(config_error!("lr must be a positive number, got {}", self.lr));
        }
        if self.num_gpus() == 0 {
            return Err(config_error!("vvgpu lists no devices"));
        }
        for (node, devices) in self.vvgpu.iter().enumerate() {
            let unique: BTreeSet<_> = devices.iter().collect();
            if unique.len() != devices.len() {
                return Err(config_error!("node {} lists a device twice", node));
            }
        }
        if self.metrics_spec.is_empty() {
            return Err(config_error!("at least one metric is required"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_default() {
        let solver = SolverConfig::default();
        assert_eq!(solver.num_gpus(), 8);
        assert_eq!(solver.num_nodes(), 1);
        assert_eq!(solver.warmup_steps, 300);
        assert!(solver.use_embedding_collection);
        assert!(solver.validate().is_ok());
    }

    #[test]
    fn test_solver_builder() {
        let solver = SolverConfig::new()
            .with_batchsize(65536)
            .with_batchsize_eval(65536)
            .with_lr(24.0)
            .with_local_gpus(2)
            .with_metric(MetricType::Auc, 0.8025);
        assert_eq!(solver.batchsize, 65536);
        assert_eq!(solver.vvgpu, vec![vec![0, 1]]);
        assert_eq!(solver.metrics_spec.len(), 2);
    }

    #[test]
    fn test_solver_validation() {
        assert!(SolverConfig::new().with_batchsize(0).validate().is_err());
        assert!(SolverConfig::new().with_lr(0.0).validate().is_err());
        assert!(SolverConfig::new().with_lr(f64::NAN).validate().is_err());
        assert!(SolverConfig::new().with_vvgpu(vec![vec![]]).validate().is_err());
        assert!(SolverConfig::new()
            .with_vvgpu(vec![vec![0, 0]])
            .validate()
            .is_err());
        // the same device id on two nodes is fine
        assert!(SolverConfig::new()
            .with_vvgpu(vec![vec![0, 1], vec![0, 1]])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_metric_serde_names() {
        let json = serde_json::to_string(&MetricType::Auc).unwrap();
        assert_eq!(json, r#""AUC""#);
    }
}

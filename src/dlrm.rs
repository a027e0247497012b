//! DLRM model assembly.
//!
//! DLRM feeds dense features through a bottom MLP, looks up one embedding per
//! categorical slot, takes pairwise dot products between all of those vectors
//! (the interaction layer) and finishes with a top MLP and a logistic loss.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{DataReaderParams, OptimizerConfig, SolverConfig};
use crate::config_error;
use crate::embedding::{Combiner, EmbeddingPlanner, EmbeddingTableConfig};
use crate::engine::Model;
use crate::error::ForgeResult;
use crate::graph::{Layer, LayerKind, ModelGraph, SparseInput};
use crate::invalid_arg;
use crate::sharding::ShardingPlan;

/// Vocabulary sizes of the 26 Criteo slots, limited to 40M rows per table.
pub const CRITEO_40M_SLOT_SIZES: [u64; 26] = [
    203931, 18598, 14092, 7012, 18977, 4, 6385, 1245, 49, 186213, 71328, 67288, 11, 2168, 7338,
    61, 4, 932, 15, 204515, 141526, 199433, 60919, 9137, 71, 34,
];

/// Vocabulary sizes of the 26 slots of the full Criteo 1TB set.
pub const CRITEO_1TB_SLOT_SIZES: [u64; 26] = [
    39884406, 39043, 17289, 7420, 20263, 3, 7120, 1543, 63, 38532951, 2953546, 403346, 10, 2208,
    11938, 155, 4, 976, 14, 39979771, 25641295, 39664984, 585935, 12972, 108, 36,
];

/// Shape of a DLRM network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DlrmSpec {
    pub label_dim: usize,
    pub dense_dim: usize,
    /// Embedding width; the bottom MLP must end at this width
    pub ev_size: usize,
    pub bottom_mlp: Vec<usize>,
    /// Ends in a single logit
    pub top_mlp: Vec<usize>,
    pub combiner: Combiner,
    /// Expected GPU count of the sharding plan. When set it must equal the
    /// solver's device count; configs that disagree are rejected.
    pub num_gpus: Option<usize>,
}

impl Default for DlrmSpec {
    fn default() -> Self {
        Self {
            label_dim: 1,
            dense_dim: 13,
            ev_size: 128,
            bottom_mlp: vec![512, 256, 128],
            top_mlp: vec![1024, 1024, 512, 256, 1],
            combiner: Combiner::Sum,
            num_gpus: None,
        }
    }
}

impl DlrmSpec {
    pub fn validate(&self) -> ForgeResult<()> {
        if self.label_dim == 0 || self.dense_dim == 0 || self.ev_size == 0 {
            return Err(config_error!("label_dim, dense_dim and ev_size must be > 0"));
        }
        match self.bottom_mlp.last() {
            Some(&w) if w == self.ev_size => {}
            Some(&w) => {
                return Err(config_error!(
                    "bottom MLP ends at width {}, interaction needs ev_size {}",
                    w,
                    self.ev_size
                ))
            }
            None => return Err(config_error!("bottom MLP needs at least one layer")),
        }
        if self.top_mlp.last() != Some(&1) {
            return Err(config_error!("top MLP must end in a single output"));
        }
        if self.bottom_mlp.iter().chain(&self.top_mlp).any(|&w| w == 0) {
            return Err(config_error!("MLP widths must be > 0"));
        }
        if self.num_gpus == Some(0) {
            return Err(config_error!("num_gpus override must be >= 1"));
        }
        Ok(())
    }
}

/// Builds the DLRM layer graph for a set of categorical slots.
#[derive(Debug, Clone)]
pub struct DlrmBuilder {
    slot_sizes: Vec<u64>,
    spec: DlrmSpec,
    num_gpus: usize,
}

impl DlrmBuilder {
    pub fn new(slot_sizes: Vec<u64>) -> Self {
        Self {
            slot_sizes,
            spec: DlrmSpec::default(),
            num_gpus: 1,
        }
    }

    pub fn with_spec(mut self, spec: DlrmSpec) -> Self {
        if let Some(n) = spec.num_gpus {
            self.num_gpus = n;
        }
        self.spec = spec;
        self
    }

    pub fn num_gpus(mut self, num_gpus: usize) -> Self {
        self.num_gpus = num_gpus;
        self
    }

    pub fn ev_size(mut self, ev_size: usize) -> Self {
        self.spec.ev_size = ev_size;
        self
    }

    pub fn bottom_mlp(mut self, widths: Vec<usize>) -> Self {
        self.spec.bottom_mlp = widths;
        self
    }

    pub fn top_mlp(mut self, widths: Vec<usize>) -> Self {
        self.spec.top_mlp = widths;
        self
    }

    pub fn spec(&self) -> &DlrmSpec {
        &self.spec
    }

    pub fn plan(&self) -> ForgeResult<ShardingPlan> {
        ShardingPlan::try_new(&self.slot_sizes, self.num_gpus)
    }

    /// The full layer graph, wired by the names the reference model uses
    /// (`data{i}`, `emb_vec{i}`, `fc{k}`, `relu{k}`, ...).
    pub fn build_graph(&self) -> ForgeResult<ModelGraph> {
        self.spec.validate()?;
        if self.slot_sizes.is_empty() {
            return Err(invalid_arg!("DLRM needs at least one categorical slot"));
        }
        let spec = &self.spec;
        let num_slots = self.slot_sizes.len();
        let mut graph = ModelGraph::new();

        graph.add(Layer::input(
            "label",
            spec.label_dim,
            "dense",
            spec.dense_dim,
            (0..num_slots)
                .map(|i| SparseInput::one_hot(format!("data{}", i)))
                .collect(),
        ));

        let mut planner = EmbeddingPlanner::new();
        for (i, &size) in self.slot_sizes.iter().enumerate() {
            planner.embedding_lookup(
                EmbeddingTableConfig::new(i, size, spec.ev_size),
                format!("data{}", i),
                format!("emb_vec{}", i),
                spec.combiner,
            );
        }
        graph.add(Layer::embedding_collection(
            planner.create_embedding_collection(self.plan()?)?,
        ));

        graph.add(Layer::dense(
            LayerKind::Concat,
            (0..num_slots).map(|i| format!("emb_vec{}", i)),
            ["sparse_embedding1"],
        ));

        let mut fc = 0;
        let mut prev = "dense".to_string();
        for &width in &spec.bottom_mlp {
            fc += 1;
            prev = add_fc_relu(&mut graph, &prev, fc, width, true);
        }

        graph.add(Layer::dense(
            LayerKind::Interaction,
            [prev.as_str(), "sparse_embedding1"],
            ["interaction1"],
        ));

        prev = "interaction1".to_string();
        let last = spec.top_mlp.len() - 1;
        for (i, &width) in spec.top_mlp.iter().enumerate() {
            fc += 1;
            prev = add_fc_relu(&mut graph, &prev, fc, width, i != last);
        }

        graph.add(Layer::dense(
            LayerKind::BinaryCrossEntropyLoss,
            [prev.as_str(), "label"],
            ["loss"],
        ));

        info!(
            slots = num_slots,
            layers = graph.len(),
            gpus = self.num_gpus,
            "built DLRM graph"
        );
        Ok(graph)
    }

    /// Wrap the graph into a [`Model`] with the given run configuration.
    pub fn build(
        &self,
        solver: SolverConfig,
        reader: DataReaderParams,
        optimizer: OptimizerConfig,
    ) -> ForgeResult<Model> {
        let mut model = Model::new(solver, reader, optimizer);
        model.graph = self.build_graph()?;
        Ok(model)
    }
}

/// Add `fc{k}` and optionally `relu{k}`; returns the name of the last top.
fn add_fc_relu(graph: &mut ModelGraph, bottom: &str, k: usize, width: usize, relu: bool) -> String {
    let fc = format!("fc{}", k);
    graph.add(Layer::dense(
        LayerKind::InnerProduct { num_output: width },
        [bottom],
        [fc.as_str()],
    ));
    if !relu {
        return fc;
    }
    let relu = format!("relu{}", k);
    graph.add(Layer::dense(LayerKind::ReLU, [fc.as_str()], [relu.as_str()]));
    relu
}

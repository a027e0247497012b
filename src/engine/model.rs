//! The model aggregate handed to a training engine.

use tracing::{debug, info};

use crate::config::{DataReaderParams, OptimizerConfig, SolverConfig};
use crate::embedding::EmbeddingCollection;
use crate::error::{ForgeError, ForgeResult};
use crate::graph::{infer_shapes, Layer, LayerKind, ModelGraph, TensorShapes};

/// Solver, reader, optimizer and layer graph of one training run.
#[derive(Debug, Clone)]
pub struct Model {
    pub solver: SolverConfig,
    pub reader: DataReaderParams,
    pub optimizer: OptimizerConfig,
    pub graph: ModelGraph,
}

impl Model {
    pub fn new(solver: SolverConfig, reader: DataReaderParams, optimizer: OptimizerConfig) -> Self {
        Self {
            solver,
            reader,
            optimizer,
            graph: ModelGraph::new(),
        }
    }

    /// Append a layer. Wiring is checked later by [`Model::validate`].
    pub fn add(&mut self, layer: Layer) -> &mut Self {
        debug!(layer = %layer.name, kind = layer.kind.type_name(), "adding layer");
        self.graph.add(layer);
        self
    }

    pub fn add_embedding_collection(&mut self, collection: EmbeddingCollection) -> &mut Self {
        self.add(Layer::embedding_collection(collection))
    }

    pub fn embedding_collections(&self) -> Vec<&EmbeddingCollection> {
        self.graph
            .layers
            .iter()
            .filter_map(|l| match &l.kind {
                LayerKind::EmbeddingCollection(c) => Some(c.as_ref()),
                _ => None,
            })
            .collect()
    }

    /// Validate configs, wiring, shapes and the agreement between the
    /// sharding plan, the solver's devices and the reader's slots.
    pub fn validate(&self) -> ForgeResult<TensorShapes> {
        self.solver.validate()?;
        self.reader.validate()?;
        self.optimizer.validate()?;
        self.graph.validate()?;
        let shapes = infer_shapes(&self.graph)?;

        let collections = self.embedding_collections();
        if !self.solver.use_embedding_collection && !collections.is_empty() {
            return Err(ForgeError::InvalidConfiguration(
                "graph has an embedding collection but use_embedding_collection is off".to_string(),
            ));
        }
        for collection in collections {
            self.check_collection(collection)?;
        }

        info!(
            layers = self.graph.len(),
            tensors = shapes.len(),
            gpus = self.solver.num_gpus(),
            "model validated"
        );
        Ok(shapes)
    }

    fn check_collection(&self, collection: &EmbeddingCollection) -> ForgeResult<()> {
        let plan_gpus = collection.plan.num_gpus();
        let solver_gpus = self.solver.num_gpus();
        if plan_gpus != solver_gpus {
            return Err(ForgeError::PlanMismatch(format!(
                "plan has {} GPU rows, solver has {} devices",
                plan_gpus, solver_gpus
            )));
        }

        let slots = &self.reader.slot_size_array;
        if !slots.is_empty() {
            let vocab: Vec<u64> = collection
                .tables
                .iter()
                .map(|t| t.max_vocabulary_size)
                .collect();
            if vocab.len() != slots.len() {
                return Err(ForgeError::PlanMismatch(format!(
                    "reader has {} slots, collection has {} tables",
                    slots.len(),
                    vocab.len()
                )));
            }
            if let Some(t) = (0..slots.len()).find(|&t| vocab[t] != slots[t]) {
                return Err(ForgeError::PlanMismatch(format!(
                    "table {} has vocabulary {}, reader slot says {}",
                    collection.tables[t].table_id, vocab[t], slots[t]
                )));
            }
        }
        Ok(())
    }
}

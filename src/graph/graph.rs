//! The layer graph.
//!
//! Layers reference each other only through tensor names: a layer's bottoms
//! must be tops of other layers. The graph owns the layers in insertion order
//! and answers structural questions about them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use super::layer::{Layer, LayerKind};
use crate::error::{ForgeError, ForgeResult};

/// Index of a layer inside a [`ModelGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub usize);

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelGraph {
    pub layers: Vec<Layer>,
}

impl ModelGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, layer: Layer) -> LayerId {
        let id = LayerId(self.layers.len());
        self.layers.push(layer);
        id
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Map each tensor name to the layer producing it.
    fn producers(&self) -> ForgeResult<HashMap<&str, LayerId>> {
        let mut producers = HashMap::new();
        for (idx, layer) in self.layers.iter().enumerate() {
            for top in &layer.top_names {
                if producers.insert(top.as_str(), LayerId(idx)).is_some() {
                    return Err(ForgeError::DuplicateTensor(top.clone()));
                }
            }
        }
        Ok(producers)
    }

    /// Layers whose tops are consumed by nobody
    pub fn terminal_layers(&self) -> Vec<LayerId> {
        let consumed: BTreeSet<&str> = self
            .layers
            .iter()
            .flat_map(|l| l.bottom_names.iter().map(String::as_str))
            .collect();
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, l)| l.top_names.iter().all(|t| !consumed.contains(t.as_str())))
            .map(|(i, _)| LayerId(i))
            .collect()
    }

    /// Layers in dependency order; ties go to the earlier-added layer.
    pub fn topological_order(&self) -> ForgeResult<Vec<LayerId>> {
        let producers = self.producers()?;

        let mut deps: Vec<BTreeSet<usize>> = Vec::with_capacity(self.layers.len());
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.layers.len()];
        for (idx, layer) in self.layers.iter().enumerate() {
            let mut layer_deps = BTreeSet::new();
            for bottom in &layer.bottom_names {
                let producer = producers.get(bottom.as_str()).ok_or_else(|| {
                    ForgeError::DanglingTensor {
                        layer: layer.name.clone(),
                        tensor: bottom.clone(),
                    }
                })?;
                if layer_deps.insert(producer.0) {
                    dependents[producer.0].push(idx);
                }
            }
            deps.push(layer_deps);
        }

        let mut remaining: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.layers.len())
            .filter(|&i| remaining[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.layers.len());

        while let Some(idx) = ready.pop_first() {
            order.push(LayerId(idx));
            for &next in &dependents[idx] {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != self.layers.len() {
            let stuck: Vec<&str> = remaining
                .iter()
                .enumerate()
                .filter(|(_, &n)| n > 0)
                .map(|(i, _)| self.layers[i].name.as_str())
                .collect();
            return Err(ForgeError::GraphCycle(stuck.join(", ")));
        }
        Ok(order)
    }

    /// Check the wiring: names, arity, no dangling or duplicate tensors, no
    /// cycles and exactly one loss.
    pub fn validate(&self) -> ForgeResult<()> {
        if self.layers.is_empty() {
            return Err(ForgeError::InvalidLayer {
                layer: String::new(),
                reason: "graph has no layers".to_string(),
            });
        }

        let mut names = BTreeSet::new();
        for layer in &self.layers {
            if layer.name.is_empty() {
                return Err(ForgeError::InvalidLayer {
                    layer: layer.name.clone(),
                    reason: "layer name is empty".to_string(),
                });
            }
            if !names.insert(layer.name.as_str()) {
                return Err(ForgeError::InvalidLayer {
                    layer: layer.name.clone(),
                    reason: "layer name is used twice".to_string(),
                });
            }
            layer
                .kind
                .check_arity(layer.bottom_names.len(), layer.top_names.len())
                .map_err(|reason| ForgeError::InvalidLayer {
                    layer: layer.name.clone(),
                    reason,
                })?;
            if let LayerKind::InnerProduct { num_output: 0 } = layer.kind {
                return Err(ForgeError::InvalidLayer {
                    layer: layer.name.clone(),
                    reason: "num_output must be > 0".to_string(),
                });
            }
        }

        let losses = self.layers.iter().filter(|l| l.kind.is_loss()).count();
        if losses != 1 {
            return Err(ForgeError::InvalidLayer {
                layer: String::new(),
                reason: format!("graph needs exactly one loss layer, found {}", losses),
            });
        }

        let order = self.topological_order()?;
        debug!(layers = order.len(), "layer graph validated");
        Ok(())
    }
}

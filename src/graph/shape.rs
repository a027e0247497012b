//! Per-sample tensor shape inference over a validated layer graph.

use std::collections::HashMap;

use super::graph::ModelGraph;
use super::layer::{Layer, LayerKind};
use crate::error::{ForgeError, ForgeResult};

/// Per-sample dims of every named tensor (batch dimension omitted)
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TensorShapes {
    shapes: HashMap<String, Vec<usize>>,
}

impl TensorShapes {
    pub fn get(&self, name: &str) -> Option<&[usize]> {
        self.shapes.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    fn require(&self, layer: &Layer, name: &str) -> ForgeResult<&[usize]> {
        self.get(name).ok_or_else(|| ForgeError::DanglingTensor {
            layer: layer.name.clone(),
            tensor: name.to_string(),
        })
    }
}

/// Width of the interaction output for `num_embeddings` embedding vectors of
/// width `vec_size` plus one dense vector of the same width: all pairwise dot
/// products, the dense vector itself and one padding element.
pub fn interaction_output_dim(num_embeddings: usize, vec_size: usize) -> usize {
    let features = num_embeddings + 1;
    features * (features + 1) / 2 - features + vec_size + 1
}

fn mismatch(layer: &Layer, reason: String) -> ForgeError {
    ForgeError::ShapeMismatch {
        layer: layer.name.clone(),
        reason,
    }
}

/// Infer every tensor's shape by walking the graph in topological order.
///
/// Layers with the wrong number of bottoms or tops fail with
/// [`ForgeError::InvalidLayer`], so this is safe on unvalidated graphs.
pub fn infer_shapes(graph: &ModelGraph) -> ForgeResult<TensorShapes> {
    let mut out = TensorShapes::default();
    for id in graph.topological_order()? {
        let layer = &graph.layers[id.0];
        let tops = infer_layer(layer, &out)?;
        for (name, dims) in layer.top_names.iter().zip(tops) {
            out.shapes.insert(name.clone(), dims);
        }
    }
    Ok(out)
}

fn infer_layer(layer: &Layer, known: &TensorShapes) -> ForgeResult<Vec<Vec<usize>>> {
    layer
        .kind
        .check_arity(layer.bottom_names.len(), layer.top_names.len())
        .map_err(|reason| ForgeError::InvalidLayer {
            layer: layer.name.clone(),
            reason,
        })?;

    match &layer.kind {
        LayerKind::Input {
            label_dim,
            dense_dim,
            sparse,
            ..
        } => {
            let mut tops = vec![vec![*label_dim], vec![*dense_dim]];
            tops.extend(sparse.iter().map(|s| vec![s.slot_num]));
            Ok(tops)
        }

        LayerKind::EmbeddingCollection(collection) => {
            for bottom in &layer.bottom_names {
                known.require(layer, bottom)?;
            }
            Ok(collection
                .lookups
                .iter()
                .map(|l| vec![l.table.ev_size])
                .collect())
        }

        LayerKind::Concat => {
            let mut rows = 0;
            let mut width = None;
            for bottom in &layer.bottom_names {
                let dims = known.require(layer, bottom)?;
                let (r, w) = match dims {
                    [w] => (1, *w),
                    [r, w] => (*r, *w),
                    _ => return Err(mismatch(layer, format!("cannot concat '{}' of rank {}", bottom, dims.len()))),
                };
                match width {
                    Some(expected) if expected != w => {
                        return Err(mismatch(
                            layer,
                            format!("'{}' has width {}, expected {}", bottom, w, expected),
                        ))
                    }
                    _ => width = Some(w),
                }
                rows += r;
            }
            Ok(vec![vec![rows, width.unwrap_or(0)]])
        }

        LayerKind::InnerProduct { num_output } => {
            let mut dims = known.require(layer, &layer.bottom_names[0])?.to_vec();
            match dims.last_mut() {
                Some(last) => *last = *num_output,
                None => dims.push(*num_output),
            }
            Ok(vec![dims])
        }

        LayerKind::ReLU => Ok(vec![known.require(layer, &layer.bottom_names[0])?.to_vec()]),

        LayerKind::Interaction => {
            let dense = known.require(layer, &layer.bottom_names[0])?;
            let embeddings = known.require(layer, &layer.bottom_names[1])?;
            match (dense, embeddings) {
                ([d], [n, w]) if d == w => Ok(vec![vec![interaction_output_dim(*n, *w)]]),
                ([d], [_, w]) => Err(mismatch(
                    layer,
                    format!("dense width {} differs from embedding width {}", d, w),
                )),
                _ => Err(mismatch(
                    layer,
                    format!(
                        "expects [d] and [n, d], got {:?} and {:?}",
                        dense, embeddings
                    ),
                )),
            }
        }

        LayerKind::BinaryCrossEntropyLoss => {
            let logits = known.require(layer, &layer.bottom_names[0])?;
            let label = known.require(layer, &layer.bottom_names[1])?;
            if logits.iter().product::<usize>() != 1 || label.iter().product::<usize>() != 1 {
                return Err(mismatch(
                    layer,
                    format!("expects scalar logit and label, got {:?} and {:?}", logits, label),
                ));
            }
            Ok(vec![vec![1]])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::layer::SparseInput;

    #[test]
    fn test_interaction_dim_for_criteo() {
        // 26 categorical slots + dense, width 128
        assert_eq!(interaction_output_dim(26, 128), 480);
        assert_eq!(interaction_output_dim(1, 4), 1 + 4 + 1);
    }

    #[test]
    fn test_mlp_shapes() {
        let mut graph = ModelGraph::new();
        graph.add(Layer::input("label", 1, "dense", 13, vec![SparseInput::one_hot("data0")]));
        graph.add(Layer::dense(LayerKind::InnerProduct { num_output: 64 }, ["dense"], ["fc1"]));
        graph.add(Layer::dense(LayerKind::ReLU, ["fc1"], ["relu1"]));
        graph.add(Layer::dense(LayerKind::InnerProduct { num_output: 1 }, ["relu1"], ["fc2"]));
        graph.add(Layer::dense(
            LayerKind::BinaryCrossEntropyLoss,
            ["fc2", "label"],
            ["loss"],
        ));

        let shapes = infer_shapes(&graph).unwrap();
        assert_eq!(shapes.get("dense"), Some(&[13][..]));
        assert_eq!(shapes.get("relu1"), Some(&[64][..]));
        assert_eq!(shapes.get("loss"), Some(&[1][..]));
        assert_eq!(shapes.get("data0"), Some(&[1][..]));
    }

    #[test]
    fn test_concat_and_interaction_mismatch() {
        let mut graph = ModelGraph::new();
        graph.add(Layer::input("label", 1, "dense", 8, vec![]));
        graph.add(Layer::dense(LayerKind::InnerProduct { num_output: 16 }, ["dense"], ["a"]));
        graph.add(Layer::dense(LayerKind::InnerProduct { num_output: 16 }, ["dense"], ["b"]));
        graph.add(Layer::dense(LayerKind::Concat, ["a", "b"], ["cat"]));
        graph.add(Layer::dense(LayerKind::Interaction, ["dense", "cat"], ["inter"]));

        let err = infer_shapes(&graph).unwrap_err();
        assert!(matches!(err, ForgeError::ShapeMismatch { ref layer, .. } if layer == "inter"));
    }

    #[test]
    fn test_wrong_arity_is_an_error() {
        let mut graph = ModelGraph::new();
        graph.add(Layer::input("label", 1, "dense", 8, vec![]));
        graph.add(Layer::dense(LayerKind::ReLU, Vec::<String>::new(), ["x"]));
        match infer_shapes(&graph) {
            Err(ForgeError::InvalidLayer { layer, .. }) => assert_eq!(layer, "x"),
            other => panic!("expected invalid layer, got {:?}", other),
        }

        let mut graph = ModelGraph::new();
        graph.add(Layer::input("label", 1, "dense", 8, vec![]));
        graph.add(Layer::dense(LayerKind::Interaction, ["dense"], ["inter"]));
        assert!(matches!(
            infer_shapes(&graph),
            Err(ForgeError::InvalidLayer { .. })
        ));
    }

    #[test]
    fn test_concat_width_mismatch() {
        let mut graph = ModelGraph::new();
        graph.add(Layer::input("label", 1, "dense", 8, vec![]));
        graph.add(Layer::dense(LayerKind::InnerProduct { num_output: 16 }, ["dense"], ["a"]));
        graph.add(Layer::dense(LayerKind::InnerProduct { num_output: 32 }, ["dense"], ["b"]));
        graph.add(Layer::dense(LayerKind::Concat, ["a", "b"], ["cat"]));
        assert!(infer_shapes(&graph).is_err());
    }
}

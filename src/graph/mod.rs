//! Layer-graph IR for training models.
//!
//! Layers are nodes; tensor names are the edges between a producing layer's
//! tops and the consuming layers' bottoms.

pub mod graph;
pub mod layer;
pub mod shape;

pub use graph::{LayerId, ModelGraph};
pub use layer::{Layer, LayerKind, SparseInput};
pub use shape::{infer_shapes, interaction_output_dim, TensorShapes};

//! Layer descriptors.

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingCollection;

/// One sparse input slot group read from the data reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseInput {
    pub name: String,
    /// Upper bound on ids per sample
    pub max_feature_num_per_sample: usize,
    pub is_fixed_length: bool,
    pub slot_num: usize,
}

impl SparseInput {
    /// One-hot, single-slot input
    pub fn one_hot(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_feature_num_per_sample: 1,
            is_fixed_length: false,
            slot_num: 1,
        }
    }
}

/// What a layer computes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LayerKind {
    Input {
        label_name: String,
        label_dim: usize,
        dense_name: String,
        dense_dim: usize,
        sparse: Vec<SparseInput>,
    },
    EmbeddingCollection(Box<EmbeddingCollection>),
    Concat,
    InnerProduct {
        num_output: usize,
    },
    ReLU,
    Interaction,
    BinaryCrossEntropyLoss,
}

impl LayerKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            LayerKind::Input { .. } => "Input",
            LayerKind::EmbeddingCollection(_) => "EmbeddingCollection",
            LayerKind::Concat => "Concat",
            LayerKind::InnerProduct { .. } => "InnerProduct",
            LayerKind::ReLU => "ReLU",
            LayerKind::Interaction => "Interaction",
            LayerKind::BinaryCrossEntropyLoss => "BinaryCrossEntropyLoss",
        }
    }

    pub fn is_loss(&self) -> bool {
        matches!(self, LayerKind::BinaryCrossEntropyLoss)
    }

    /// Check bottom/top counts; returns the reason on failure.
    pub(crate) fn check_arity(&self, bottoms: usize, tops: usize) -> Result<(), String> {
        let ok = match self {
            LayerKind::Input { .. } => bottoms == 0 && tops >= 2,
            LayerKind::EmbeddingCollection(c) => {
                bottoms == c.lookups.len() && tops == c.lookups.len() && bottoms > 0
            }
            LayerKind::Concat => bottoms >= 1 && tops == 1,
            LayerKind::InnerProduct { .. } | LayerKind::ReLU => bottoms == 1 && tops == 1,
            LayerKind::Interaction | LayerKind::BinaryCrossEntropyLoss => {
                bottoms == 2 && tops == 1
            }
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "{} cannot take {} bottoms and {} tops",
                self.type_name(),
                bottoms,
                tops
            ))
        }
    }
}

/// A named layer wired by tensor names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
    pub bottom_names: Vec<String>,
    pub top_names: Vec<String>,
}

impl Layer {
    /// Data input layer; its tops are the label, the dense features and every
    /// sparse input, in that order.
    pub fn input(
        label_name: impl Into<String>,
        label_dim: usize,
        dense_name: impl Into<String>,
        dense_dim: usize,
        sparse: Vec<SparseInput>,
    ) -> Self {
        let label_name = label_name.into();
        let dense_name = dense_name.into();
        let mut top_names = vec![label_name.clone(), dense_name.clone()];
        top_names.extend(sparse.iter().map(|s| s.name.clone()));
        Self {
            name: "input".to_string(),
            kind: LayerKind::Input {
                label_name,
                label_dim,
                dense_name,
                dense_dim,
                sparse,
            },
            bottom_names: Vec::new(),
            top_names,
        }
    }

    pub fn embedding_collection(collection: EmbeddingCollection) -> Self {
        let bottom_names = collection.bottom_names().into_iter().map(String::from).collect();
        let top_names = collection.top_names().into_iter().map(String::from).collect();
        Self {
            name: "embedding_collection".to_string(),
            kind: LayerKind::EmbeddingCollection(Box::new(collection)),
            bottom_names,
            top_names,
        }
    }

    /// Dense layer named after its first top
    pub fn dense<B, T>(kind: LayerKind, bottom_names: B, top_names: T) -> Self
    where
        B: IntoIterator,
        B::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        let top_names: Vec<String> = top_names.into_iter().map(Into::into).collect();
        Self {
            name: top_names.first().cloned().unwrap_or_default(),
            kind,
            bottom_names: bottom_names.into_iter().map(Into::into).collect(),
            top_names,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

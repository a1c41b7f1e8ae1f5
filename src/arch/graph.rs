use ndarray::{Array2, ArrayView2};

use crate::{Result, SwarmErr};

/// A node classification dataset: node features, the graph and the labeled training nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphData {
    features: Array2<f32>,
    adjacency: Array2<f32>,
    train_idx: Vec<usize>,
    labels: Vec<usize>,
}

impl GraphData {
    /// Creates a new `GraphData`.
    ///
    /// # Arguments
    /// * `features` - The `(nodes, features)` input matrix.
    /// * `adjacency` - The `(nodes, nodes)` adjacency matrix, positive entries are edges.
    /// * `train_idx` - The nodes the training loss is computed on.
    /// * `labels` - The class of every node.
    ///
    /// # Returns
    /// A new `GraphData` or an error if the pieces don't describe the same nodes.
    pub fn new(
        features: Array2<f32>,
        adjacency: Array2<f32>,
        train_idx: Vec<usize>,
        labels: Vec<usize>,
    ) -> Result<Self> {
        let n = features.nrows();

        if adjacency.dim() != (n, n) {
            return Err(SwarmErr::DimensionMismatch {
                what: "adjacency",
                group: 0,
                param: 0,
                got: adjacency.shape().to_vec(),
                expected: vec![n, n],
            });
        }
        if labels.len() != n {
            return Err(SwarmErr::SizeMismatch {
                what: "labels",
                got: labels.len(),
                expected: n,
            });
        }
        if train_idx.is_empty() {
            return Err(SwarmErr::InvalidInput("train_idx cannot be empty".into()));
        }
        if let Some(idx) = train_idx.iter().find(|&&i| i >= n) {
            return Err(SwarmErr::InvalidInput(format!(
                "training node {idx} out of range for {n} nodes"
            )));
        }

        Ok(Self {
            features,
            adjacency,
            train_idx,
            labels,
        })
    }

    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    pub fn adjacency(&self) -> ArrayView2<'_, f32> {
        self.adjacency.view()
    }

    pub fn train_idx(&self) -> &[usize] {
        &self.train_idx
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn num_nodes(&self) -> usize {
        self.features.nrows()
    }
}

use ndarray::{Array2, ArrayView2};

use crate::{Result, params::Snapshot};

/// Anything that owns a set of trainable parameters organized as a `Snapshot`.
pub trait ParamHost {
    /// The current parameters.
    fn params(&self) -> &Snapshot;

    /// Mutable access to the parameter buffers, writes are visible to every later read.
    fn params_mut(&mut self) -> &mut Snapshot;
}

impl ParamHost for Snapshot {
    fn params(&self) -> &Snapshot {
        self
    }

    fn params_mut(&mut self) -> &mut Snapshot {
        self
    }
}

/// A graph model: class scores for every node given its features and the graph's adjacency.
pub trait Model: ParamHost {
    /// Makes a forward pass through the network, caching what the backward pass needs.
    ///
    /// # Arguments
    /// * `features` - The `(nodes, features)` input matrix.
    /// * `adjacency` - The `(nodes, nodes)` adjacency matrix, positive entries are edges.
    ///
    /// # Returns
    /// The `(nodes, classes)` scores or an error if the inputs don't fit the model.
    fn forward(
        &mut self,
        features: ArrayView2<f32>,
        adjacency: ArrayView2<f32>,
    ) -> Result<Array2<f32>>;

    /// Backpropagates `d_out`, the gradient of the loss with respect to the last forward's
    /// output, writing the gradient of every parameter into `grads`.
    fn backward(&mut self, d_out: ArrayView2<f32>, grads: &mut Snapshot) -> Result<()>;

    /// Switches between training (dropout active) and evaluation mode.
    fn set_training(&mut self, training: bool);
}

use log::debug;

use crate::{
    Result,
    arch::{CrossEntropy, Gat, GraphData, Model, ParamHost},
    config::{GatConfig, RefinerConfig},
    optimization::{Adam, Optimizer},
    params::Snapshot,
};

/// A local search that improves a set of weights.
pub trait Refine {
    /// Refines `weights`, returning the improved weights with the same structure.
    ///
    /// # Errors
    /// A `DimensionMismatch` or `SizeMismatch` error if `weights` don't fit the refiner's model.
    fn apply(&mut self, weights: &Snapshot) -> Result<Snapshot>;
}

/// Refines weights with a burst of supervised gradient descent on a graph.
///
/// Every call to `apply` loads the weights into its own model, trains it for the configured
/// epochs starting from a freshly reset optimizer and hands back the trained weights.
pub struct GradientRefiner<M: Model, O: Optimizer> {
    model: M,
    optimizer: O,
    graph: GraphData,
    loss_fn: CrossEntropy,
    config: RefinerConfig,
    grads: Snapshot,
    losses: Vec<f32>,
}

impl GradientRefiner<Gat, Adam> {
    /// Creates a new `GradientRefiner` training a `Gat` with `Adam`.
    ///
    /// # Arguments
    /// * `gat` - The network's configuration, must describe the refined weights.
    /// * `graph` - The data the network is trained on.
    /// * `config` - The amount of epochs and the learning rate of every burst.
    /// * `seed` - The seed of the network's initialization and dropout, `None` uses the os.
    ///
    /// # Returns
    /// A new `GradientRefiner` or an error if any config is invalid.
    pub fn new(
        gat: GatConfig,
        graph: GraphData,
        config: RefinerConfig,
        seed: Option<u64>,
    ) -> Result<Self> {
        config.validate()?;

        let model = Gat::seeded(gat, seed)?;
        let optimizer = Adam::with_learning_rate(model.params(), config.learning_rate);
        Self::with_parts(model, optimizer, graph, config)
    }
}

impl<M: Model, O: Optimizer> GradientRefiner<M, O> {
    /// Creates a new `GradientRefiner` out of an arbitrary model and optimizer.
    ///
    /// `config.learning_rate` is not forwarded to `optimizer`, it's expected to be built with it.
    pub fn with_parts(
        model: M,
        optimizer: O,
        graph: GraphData,
        config: RefinerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let grads = model.params().zeros_like();

        Ok(Self {
            model,
            optimizer,
            graph,
            loss_fn: CrossEntropy::new(),
            config,
            grads,
            losses: Vec::with_capacity(config.epochs),
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn graph(&self) -> &GraphData {
        &self.graph
    }

    pub fn config(&self) -> &RefinerConfig {
        &self.config
    }

    /// The training loss of every epoch of the last burst.
    pub fn losses(&self) -> &[f32] {
        &self.losses
    }

    fn epoch(&mut self) -> Result<f32> {
        let labels = self.graph.labels();
        let rows = self.graph.train_idx();

        self.grads.fill(0.);
        let log_probs = self.model.forward(self.graph.features(), self.graph.adjacency())?;

        let loss = self.loss_fn.loss(log_probs.view(), labels, rows)?;
        let d_out = self.loss_fn.loss_prime(log_probs.view(), labels, rows)?;

        self.model.backward(d_out.view(), &mut self.grads)?;
        self.optimizer.update_params(&self.grads, self.model.params_mut())?;

        Ok(loss)
    }
}

impl<M: Model, O: Optimizer> Refine for GradientRefiner<M, O> {
    fn apply(&mut self, weights: &Snapshot) -> Result<Snapshot> {
        self.model.params_mut().assign(weights)?;
        self.optimizer.reset();
        self.model.set_training(true);
        self.losses.clear();

        for _ in 0..self.config.epochs {
            let loss = self.epoch()?;
            self.losses.push(loss);
        }

        if let (Some(&first), Some(&last)) = (self.losses.first(), self.losses.last()) {
            let epochs = self.losses.len();
            debug!(epochs = epochs, first_loss = first, last_loss = last; "refined weights");
        }

        Ok(self.model.params().clone())
    }
}

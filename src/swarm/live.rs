use log::trace;

use crate::{Result, arch::ParamHost, params::Snapshot};

/// A loss evaluated on a model through its current weights.
///
/// Evaluating must only read the weights, two evaluations of unchanged weights return the
/// same loss.
pub trait Objective<H: ?Sized> {
    fn evaluate(&mut self, host: &mut H) -> Result<f32>;
}

impl<H: ?Sized, F> Objective<H> for F
where
    F: FnMut(&mut H) -> Result<f32>,
{
    fn evaluate(&mut self, host: &mut H) -> Result<f32> {
        self(host)
    }
}

/// The write capability over the weights of the live model.
///
/// Holding a `LiveWeights` is the only way the swarm writes into the model, and since it
/// borrows the model mutably there's never more than one writer.
pub struct LiveWeights<'a, H: ParamHost + ?Sized> {
    host: &'a mut H,
}

impl<'a, H: ParamHost + ?Sized> LiveWeights<'a, H> {
    pub fn new(host: &'a mut H) -> Self {
        Self { host }
    }

    /// Copies `weights` into the model's parameter buffers, in place.
    ///
    /// # Returns
    /// An error if `weights` has a different structure than the model's parameters.
    pub fn write(&mut self, weights: &Snapshot) -> Result<()> {
        trace!(params = weights.num_params(); "writing live weights");
        self.host.params_mut().assign(weights)
    }

    /// Evaluates `objective` on the model as it is now.
    pub fn evaluate<O>(&mut self, objective: &mut O) -> Result<f32>
    where
        O: Objective<H> + ?Sized,
    {
        objective.evaluate(self.host)
    }

    pub fn params(&self) -> &Snapshot {
        self.host.params()
    }
}

/// Evaluates `objective` with `weights` loaded on a copy of `host`, leaving `host` untouched.
///
/// # Arguments
/// * `host` - The model to copy.
/// * `weights` - The weights to evaluate.
/// * `objective` - The loss to evaluate.
pub fn evaluate_detached<H, O>(host: &H, weights: &Snapshot, objective: &mut O) -> Result<f32>
where
    H: ParamHost + Clone,
    O: Objective<H> + ?Sized,
{
    let mut copy = host.clone();
    let mut live = LiveWeights::new(&mut copy);
    live.write(weights)?;
    live.evaluate(objective)
}

use crate::{Result, params::Snapshot};

/// Defines the strategy for updating model parameters based on calculated gradients.
///
/// The `Optimizer` trait is responsible for the mathematical transition of weights from state
/// `t` to `t+1`.
pub trait Optimizer {
    /// Updates the parameters in place using the gradients.
    ///
    /// # Arguments
    /// * `grad` - The gradients, with the same structure as `params`.
    /// * `params` - The current parameter values.
    ///
    /// # Returns
    /// An error if `grad` and `params` have different structures.
    fn update_params(&mut self, grad: &Snapshot, params: &mut Snapshot) -> Result<()>;

    /// Forgets every accumulated state, as if the optimizer was just created.
    fn reset(&mut self);
}

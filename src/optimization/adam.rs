use ndarray::Zip;

use super::Optimizer;
use crate::{Result, params::Snapshot};

/// The Adam optimizer, with one pair of moment estimates per parameter tensor.
///
/// A group's `lr` metadata takes precedence over the optimizer's learning rate.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Snapshot,
    s: Snapshot,
    epsilon: f32,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `template` - The parameters this instance will update, only their structure is used.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(
        template: &Snapshot,
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    ) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: template.zeros_like(),
            s: template.zeros_like(),
            epsilon,
        }
    }

    /// Creates a new `Adam` with the usual `0.9`, `0.999` and `1e-8` hyperparameters.
    pub fn with_learning_rate(template: &Snapshot, learning_rate: f32) -> Self {
        Self::new(template, learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &Snapshot, params: &mut Snapshot) -> Result<()> {
        params.check_shapes(grad, "gradients")?;
        self.v.check_shapes(params, "optimized params")?;

        let Self {
            learning_rate,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;

        let groups = params
            .groups_mut()
            .iter_mut()
            .zip(grad.groups())
            .zip(self.v.groups_mut().iter_mut())
            .zip(self.s.groups_mut().iter_mut());

        for (((group, grads), vs), ss) in groups {
            let lr = group.lr().unwrap_or(learning_rate);
            let step_size = lr * (bc2.sqrt() / bc1);

            let tensors = group
                .params_mut()
                .iter_mut()
                .zip(grads.params())
                .zip(vs.params_mut().iter_mut())
                .zip(ss.params_mut().iter_mut());

            for (((p, g), v), s) in tensors {
                Zip::from(p.value_mut())
                    .and(g.value())
                    .and(v.value_mut())
                    .and(s.value_mut())
                    .for_each(|p, &g, v, s| {
                        *v = b1 * *v + (1. - b1) * g;
                        *s = b2 * *s + (1. - b2) * g.powi(2);
                        *p -= step_size * *v / (s.sqrt() + eps);
                    });
            }
        }

        Ok(())
    }

    fn reset(&mut self) {
        self.beta1_t = 1.;
        self.beta2_t = 1.;
        self.v.fill(0.);
        self.s.fill(0.);
    }
}

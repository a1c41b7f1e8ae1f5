use ndarray::{Array2, ArrayView2};

use crate::{Result, SwarmErr};

/// Negative log-likelihood of the true classes, computed on log-probabilities and restricted
/// to a subset of rows (the training nodes).
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    /// Returns a new `CrossEntropy`.
    pub fn new() -> Self {
        Self
    }

    fn check(log_probs: &ArrayView2<f32>, labels: &[usize], rows: &[usize]) -> Result<()> {
        let (n, nclass) = log_probs.dim();

        if labels.len() != n {
            return Err(SwarmErr::SizeMismatch {
                what: "labels",
                got: labels.len(),
                expected: n,
            });
        }
        if rows.is_empty() {
            return Err(SwarmErr::InvalidInput("no rows to compute the loss on".into()));
        }
        if let Some(&row) = rows.iter().find(|&&r| r >= n) {
            return Err(SwarmErr::InvalidInput(format!(
                "row {row} out of range for {n} nodes"
            )));
        }
        if let Some(&row) = rows.iter().find(|&&r| labels[r] >= nclass) {
            return Err(SwarmErr::InvalidInput(format!(
                "label {} of row {row} out of range for {nclass} classes",
                labels[row]
            )));
        }

        Ok(())
    }

    /// The mean negative log-probability of the labeled class over `rows`.
    ///
    /// # Arguments
    /// * `log_probs` - The `(nodes, classes)` output of the model.
    /// * `labels` - The class of every node.
    /// * `rows` - The nodes the loss is computed on.
    pub fn loss(
        &self,
        log_probs: ArrayView2<f32>,
        labels: &[usize],
        rows: &[usize],
    ) -> Result<f32> {
        Self::check(&log_probs, labels, rows)?;

        let total: f32 = rows.iter().map(|&r| -log_probs[[r, labels[r]]]).sum();
        Ok(total / rows.len() as f32)
    }

    /// The gradient of `loss` with respect to `log_probs`.
    ///
    /// Only the labeled entries of `rows` are nonzero, each holding `-1 / rows.len()`.
    pub fn loss_prime(
        &self,
        log_probs: ArrayView2<f32>,
        labels: &[usize],
        rows: &[usize],
    ) -> Result<Array2<f32>> {
        Self::check(&log_probs, labels, rows)?;

        let scale = 1. / rows.len() as f32;
        let mut grad = Array2::zeros(log_probs.raw_dim());
        for &r in rows {
            grad[[r, labels[r]]] -= scale;
        }

        Ok(grad)
    }

    /// The fraction of `rows` whose most probable class is the labeled one.
    pub fn accuracy(
        &self,
        log_probs: ArrayView2<f32>,
        labels: &[usize],
        rows: &[usize],
    ) -> Result<f32> {
        Self::check(&log_probs, labels, rows)?;

        let hits = rows
            .iter()
            .filter(|&&r| {
                let row = log_probs.row(r);
                let predicted = row
                    .iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (c, &lp)| {
                        if lp > best.1 { (c, lp) } else { best }
                    })
                    .0;
                predicted == labels[r]
            })
            .count();

        Ok(hits as f32 / rows.len() as f32)
    }
}

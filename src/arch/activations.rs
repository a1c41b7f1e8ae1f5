use ndarray::{Array2, ArrayViewMut1, Axis};
use ndarray_rand::RandomExt;
use rand::{Rng, distr::StandardUniform};

/// Element-wise activation functions and their derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActFn {
    LeakyRelu { alpha: f32 },
    Elu,
}
use ActFn::*;

impl ActFn {
    pub fn leaky_relu(alpha: f32) -> Self {
        LeakyRelu { alpha }
    }

    pub fn elu() -> Self {
        Elu
    }

    pub fn f(&self, x: f32) -> f32 {
        match *self {
            LeakyRelu { alpha } if x <= 0. => alpha * x,
            LeakyRelu { .. } => x,
            Elu if x <= 0. => x.exp() - 1.,
            Elu => x,
        }
    }

    /// The derivative evaluated at the pre-activation value `x`.
    pub fn df(&self, x: f32) -> f32 {
        match *self {
            LeakyRelu { alpha } if x <= 0. => alpha,
            LeakyRelu { .. } => 1.,
            Elu if x <= 0. => x.exp(),
            Elu => 1.,
        }
    }
}

fn softmax_row(mut row: ArrayViewMut1<f32>) {
    let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
    row.mapv_inplace(|x| (x - max).exp());
    let sum = row.sum();
    row.mapv_inplace(|x| x / sum);
}

/// Applies a numerically stable softmax over every row.
pub fn softmax_rows(x: &mut Array2<f32>) {
    x.axis_iter_mut(Axis(0)).for_each(softmax_row);
}

/// Applies a numerically stable log-softmax over every row.
pub fn log_softmax_rows(x: &mut Array2<f32>) {
    for mut row in x.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        let lse = max + row.fold(0., |acc, &x| acc + (x - max).exp()).ln();
        row.mapv_inplace(|x| x - lse);
    }
}

/// Inverted dropout: zeroes each value with probability `p` and scales the survivors by
/// `1 / (1 - p)`.
///
/// # Returns
/// The mask that was applied, `None` if nothing was dropped (`p == 0`).
pub fn dropout<R: Rng + ?Sized>(x: &mut Array2<f32>, p: f32, rng: &mut R) -> Option<Array2<f32>> {
    if p <= 0. {
        return None;
    }

    let scale = 1. / (1. - p);
    let mask = Array2::<f32>::random_using(x.raw_dim(), StandardUniform, rng)
        .mapv_into(|u| if u < p { 0. } else { scale });

    *x *= &mask;
    Some(mask)
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn leaky_relu() {
        let act = ActFn::leaky_relu(0.2);

        assert_eq!(act.f(2.), 2.);
        assert_eq!(act.f(-2.), -0.4);
        assert_eq!(act.df(2.), 1.);
        assert_eq!(act.df(-2.), 0.2);
    }

    #[test]
    fn elu() {
        let act = ActFn::elu();

        assert_eq!(act.f(3.), 3.);
        assert!((act.f(-1.) - (-1f32).exp() + 1.).abs() < 1e-7);
        assert!((act.df(-1.) - (-1f32).exp()).abs() < 1e-7);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let mut x = array![[1., 2., 3.], [-9e15, 0., -9e15]];
        softmax_rows(&mut x);

        for row in x.rows() {
            assert!((row.sum() - 1.).abs() < 1e-6);
        }
        assert_eq!(x[[1, 1]], 1.);
        assert_eq!(x[[1, 0]], 0.);
    }

    #[test]
    fn log_softmax_matches_softmax() {
        let mut a = array![[0.5, -1., 2.]];
        let mut b = a.clone();
        softmax_rows(&mut a);
        log_softmax_rows(&mut b);

        for (p, lp) in a.iter().zip(b.iter()) {
            assert!((p.ln() - lp).abs() < 1e-6);
        }
    }

    #[test]
    fn dropout_scales_survivors() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut x = Array2::<f32>::ones((20, 20));
        let mask = dropout(&mut x, 0.5, &mut rng).unwrap();

        assert!(x.iter().all(|&v| v == 0. || v == 2.));
        assert_eq!(x, mask);
        assert!(x.iter().any(|&v| v == 0.));
        assert!(dropout(&mut x, 0., &mut rng).is_none());
    }
}

use ndarray::{Array1, Array2, ArrayView2, Axis, Zip, s};
use rand::Rng;

use super::activations::{ActFn, dropout, softmax_rows};
use crate::{Result, SwarmErr};

/// Score given to non adjacent node pairs before the softmax.
const MASKED: f32 = -9e15;

/// The state kept by a forward pass for the backward pass.
#[derive(Debug, Clone)]
struct Cache {
    input: Array2<f32>,
    wh: Array2<f32>,
    scores: Array2<f32>,
    attention: Array2<f32>,
    dropped: Array2<f32>,
    mask: Option<Array2<f32>>,
    h: Array2<f32>,
}

/// A single graph attention head.
///
/// Parameters are not owned by the layer, they are handed to every pass as the `w` matrix of
/// shape `(in, out)` and the `a` vector of shape `(2 * out, 1)`.
#[derive(Debug, Clone)]
pub struct GraphAttention {
    dim: (usize, usize),
    leaky_relu: ActFn,
    dropout: f32,
    concat: bool,
    cache: Option<Cache>,
}

impl GraphAttention {
    /// Creates a new `GraphAttention` head.
    ///
    /// # Arguments
    /// * `dim` - The `(in, out)` features of the head.
    /// * `alpha` - The negative slope of the leaky relu applied to the attention scores.
    /// * `dropout` - The dropout rate applied to the attention coefficients.
    /// * `concat` - Whether the head's output goes through an elu (hidden heads) or not.
    ///
    /// # Returns
    /// A new `GraphAttention` instance.
    pub fn new(dim: (usize, usize), alpha: f32, dropout: f32, concat: bool) -> Self {
        Self {
            dim,
            leaky_relu: ActFn::leaky_relu(alpha),
            dropout,
            concat,
            cache: None,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    fn check_params(&self, w: &ArrayView2<f32>, a: &ArrayView2<f32>) -> Result<()> {
        let (fin, fout) = self.dim;

        if w.dim() != (fin, fout) {
            return Err(SwarmErr::DimensionMismatch {
                what: "attention weights",
                group: 0,
                param: 0,
                got: w.shape().to_vec(),
                expected: vec![fin, fout],
            });
        }

        if a.dim() != (2 * fout, 1) {
            return Err(SwarmErr::DimensionMismatch {
                what: "attention vector",
                group: 0,
                param: 1,
                got: a.shape().to_vec(),
                expected: vec![2 * fout, 1],
            });
        }

        Ok(())
    }

    /// Makes a forward pass through the head.
    ///
    /// # Arguments
    /// * `w` - The head's weight matrix.
    /// * `a` - The head's attention vector.
    /// * `input` - The `(nodes, in)` node features.
    /// * `adjacency` - The `(nodes, nodes)` adjacency matrix.
    /// * `training` - Whether dropout applies.
    /// * `rng` - The source of the dropout masks.
    ///
    /// # Returns
    /// The `(nodes, out)` features of every node.
    pub fn forward<R: Rng + ?Sized>(
        &mut self,
        w: ArrayView2<f32>,
        a: ArrayView2<f32>,
        input: ArrayView2<f32>,
        adjacency: ArrayView2<f32>,
        training: bool,
        rng: &mut R,
    ) -> Result<Array2<f32>> {
        self.check_params(&w, &a)?;

        let n = input.nrows();
        if input.ncols() != self.dim.0 {
            return Err(SwarmErr::SizeMismatch {
                what: "attention input features",
                got: input.ncols(),
                expected: self.dim.0,
            });
        }
        if adjacency.dim() != (n, n) {
            return Err(SwarmErr::SizeMismatch {
                what: "adjacency rows",
                got: adjacency.nrows(),
                expected: n,
            });
        }

        let fout = self.dim.1;
        let wh = input.dot(&w);
        let src: Array1<f32> = wh.dot(&a.slice(s![..fout, 0]));
        let dst: Array1<f32> = wh.dot(&a.slice(s![fout.., 0]));

        let scores = Array2::from_shape_fn((n, n), |(i, j)| src[i] + dst[j]);
        let mut attention = Zip::from(&scores).and(&adjacency).map_collect(|&e, &adj| {
            if adj > 0. {
                self.leaky_relu.f(e)
            } else {
                MASKED
            }
        });
        softmax_rows(&mut attention);

        let mut dropped = attention.clone();
        let mask = match training {
            true => dropout(&mut dropped, self.dropout, rng),
            false => None,
        };

        let h = dropped.dot(&wh);
        let out = match self.concat {
            true => h.mapv(|x| ActFn::Elu.f(x)),
            false => h.clone(),
        };

        self.cache = Some(Cache {
            input: input.to_owned(),
            wh,
            scores,
            attention,
            dropped,
            mask,
            h,
        });

        Ok(out)
    }

    /// Backpropagates the gradient of the head's last output.
    ///
    /// # Arguments
    /// * `w` - The head's weight matrix, the same used on `forward`.
    /// * `a` - The head's attention vector, the same used on `forward`.
    /// * `adjacency` - The adjacency matrix, the same used on `forward`.
    /// * `d_out` - The `(nodes, out)` gradient of the loss with respect to the head's output.
    ///
    /// # Returns
    /// A tuple with the gradients with respect to the input, `w` and `a`.
    pub fn backward(
        &mut self,
        w: ArrayView2<f32>,
        a: ArrayView2<f32>,
        adjacency: ArrayView2<f32>,
        d_out: ArrayView2<f32>,
    ) -> Result<(Array2<f32>, Array2<f32>, Array2<f32>)> {
        self.check_params(&w, &a)?;
        let cache = self.cache.as_ref().ok_or(SwarmErr::MissingForwardPass)?;
        let n = cache.wh.nrows();
        let fout = self.dim.1;

        if d_out.dim() != (n, fout) {
            return Err(SwarmErr::SizeMismatch {
                what: "attention output gradient rows",
                got: d_out.nrows(),
                expected: n,
            });
        }

        let dh = match self.concat {
            true => Zip::from(&d_out)
                .and(&cache.h)
                .map_collect(|&d, &h| d * ActFn::Elu.df(h)),
            false => d_out.to_owned(),
        };

        let mut d_wh = cache.dropped.t().dot(&dh);
        let mut d_attention = dh.dot(&cache.wh.t());
        if let Some(mask) = &cache.mask {
            d_attention *= mask;
        }

        // Softmax backward, only edges carry a gradient to the scores.
        let mut d_scores = Array2::<f32>::zeros((n, n));
        for i in 0..n {
            let p = cache.attention.row(i);
            let dp = d_attention.row(i);
            let dot = p.dot(&dp);

            for j in 0..n {
                if adjacency[[i, j]] > 0. {
                    let e = cache.scores[[i, j]];
                    d_scores[[i, j]] = p[j] * (dp[j] - dot) * self.leaky_relu.df(e);
                }
            }
        }

        let d_src: Array1<f32> = d_scores.sum_axis(Axis(1));
        let d_dst: Array1<f32> = d_scores.sum_axis(Axis(0));
        let a_src = a.slice(s![..fout, 0]);
        let a_dst = a.slice(s![fout.., 0]);

        d_wh += &d_src
            .view()
            .insert_axis(Axis(1))
            .dot(&a_src.insert_axis(Axis(0)));
        d_wh += &d_dst
            .view()
            .insert_axis(Axis(1))
            .dot(&a_dst.insert_axis(Axis(0)));

        let mut da = Array2::<f32>::zeros((2 * fout, 1));
        da.slice_mut(s![..fout, 0])
            .assign(&cache.wh.t().dot(&d_src));
        da.slice_mut(s![fout.., 0])
            .assign(&cache.wh.t().dot(&d_dst));

        let dw = cache.input.t().dot(&d_wh);
        let d_input = d_wh.dot(&w.t());

        Ok((d_input, dw, da))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn line_graph() -> Array2<f32> {
        array![[1., 1., 0.], [1., 1., 1.], [0., 1., 1.]]
    }

    #[test]
    fn attention_rows_only_cover_neighbours() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut head = GraphAttention::new((2, 2), 0.2, 0., true);
        let w = array![[1., 0.], [0., 1.]];
        let a = array![[0.5], [-0.5], [1.], [0.25]];
        let x = array![[1., 2.], [0., -1.], [3., 1.]];
        let adj = line_graph();

        let out = head
            .forward(w.view(), a.view(), x.view(), adj.view(), false, &mut rng)
            .unwrap();
        let attention = &head.cache.as_ref().unwrap().attention;

        assert_eq!(out.dim(), (3, 2));
        assert_eq!(attention[[0, 2]], 0.);
        assert_eq!(attention[[2, 0]], 0.);
        for row in attention.rows() {
            assert!((row.sum() - 1.).abs() < 1e-6);
        }
    }

    #[test]
    fn backward_before_forward_fails() {
        let mut head = GraphAttention::new((2, 2), 0.2, 0., false);
        let w = Array2::zeros((2, 2));
        let a = Array2::zeros((4, 1));
        let adj = line_graph();
        let d = Array2::zeros((3, 2));

        assert!(matches!(
            head.backward(w.view(), a.view(), adj.view(), d.view()),
            Err(SwarmErr::MissingForwardPass)
        ));
    }

    #[test]
    fn wrong_parameter_shapes_fail() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut head = GraphAttention::new((2, 2), 0.2, 0., false);
        let w = Array2::zeros((3, 2));
        let a = Array2::zeros((4, 1));
        let x = Array2::zeros((3, 2));
        let adj = line_graph();

        let result = head.forward(w.view(), a.view(), x.view(), adj.view(), false, &mut rng);
        assert!(matches!(result, Err(SwarmErr::DimensionMismatch { .. })));
    }

    #[test]
    fn gradient_descends_the_output_sum() {
        // loss = sum(out), so d_out is all ones.
        let mut rng = StdRng::seed_from_u64(0);
        let mut head = GraphAttention::new((2, 2), 0.2, 0., true);
        let mut w = array![[0.3, -0.2], [0.1, 0.4]];
        let mut a = array![[0.5], [-0.5], [1.], [0.25]];
        let x = array![[1., 2.], [0., -1.], [3., 1.]];
        let adj = line_graph();

        let before = head
            .forward(w.view(), a.view(), x.view(), adj.view(), false, &mut rng)
            .unwrap()
            .sum();
        let ones = Array2::ones((3, 2));
        let (_, dw, da) = head
            .backward(w.view(), a.view(), adj.view(), ones.view())
            .unwrap();

        let norm = (dw.mapv(|g| g * g).sum() + da.mapv(|g| g * g).sum()).sqrt();
        assert!(norm > 1e-3);

        let step = 1e-2 / norm;
        w.scaled_add(-step, &dw);
        a.scaled_add(-step, &da);

        let after = head
            .forward(w.view(), a.view(), x.view(), adj.view(), false, &mut rng)
            .unwrap()
            .sum();

        assert!(after < before, "{after} >= {before}");
    }
}

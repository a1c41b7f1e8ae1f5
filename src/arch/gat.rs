use ndarray::{Array2, ArrayView2, ArrayViewMut2, Axis, Ix2, Zip, concatenate, s};
use rand::{SeedableRng, rngs::StdRng};

use super::{
    Model, ParamHost,
    activations::{ActFn, dropout, log_softmax_rows},
    attention::GraphAttention,
};
use crate::{
    Result, SwarmErr,
    config::GatConfig,
    params::{Param, ParamGroup, Snapshot, xavier_uniform},
};

/// Gain of the xavier initialization of every weight.
const INIT_GAIN: f32 = 1.414;

const HEADS_GROUP: usize = 0;
const OUT_GROUP: usize = 1;

/// What the backward pass needs from the last forward pass.
#[derive(Debug, Clone)]
struct Cache {
    adjacency: Array2<f32>,
    hidden_mask: Option<Array2<f32>>,
    logits: Array2<f32>,
    log_probs: Array2<f32>,
}

/// A two layer graph attention network.
///
/// The hidden layer concatenates `nheads` attention heads, the output layer is a single head
/// followed by an elu and a log-softmax over the classes.
///
/// Parameters are laid out in two groups: `"attentions"` holds `attention_{h}.W` and
/// `attention_{h}.a` for every hidden head, `"out_att"` holds `out_att.W` and `out_att.a`.
#[derive(Debug, Clone)]
pub struct Gat {
    config: GatConfig,
    params: Snapshot,
    heads: Vec<GraphAttention>,
    out_att: GraphAttention,
    training: bool,
    rng: StdRng,
    cache: Option<Cache>,
}

impl Gat {
    /// Creates a new `Gat` with xavier initialized parameters.
    ///
    /// # Arguments
    /// * `config` - The sizes and regularization of the network.
    /// * `rng` - The generator used for the initialization and the dropout masks.
    ///
    /// # Returns
    /// A new `Gat` instance in training mode, or an error if the config is invalid.
    pub fn new(config: GatConfig, mut rng: StdRng) -> Result<Self> {
        config.validate()?;

        let GatConfig {
            nfeat,
            nhid,
            nclass,
            dropout,
            nheads,
            alpha,
        } = config;

        let mut head_params = Vec::with_capacity(2 * nheads);
        for h in 0..nheads {
            let w = xavier_uniform(&mut rng, (nfeat, nhid), INIT_GAIN)?;
            let a = xavier_uniform(&mut rng, (2 * nhid, 1), INIT_GAIN)?;
            head_params.push(Param::new(format!("attention_{h}.W"), w.into_dyn()));
            head_params.push(Param::new(format!("attention_{h}.a"), a.into_dyn()));
        }

        let w = xavier_uniform(&mut rng, (nhid * nheads, nclass), INIT_GAIN)?;
        let a = xavier_uniform(&mut rng, (2 * nclass, 1), INIT_GAIN)?;
        let out_params = vec![
            Param::new("out_att.W", w.into_dyn()),
            Param::new("out_att.a", a.into_dyn()),
        ];

        let params = Snapshot::new(vec![
            ParamGroup::new("attentions", head_params),
            ParamGroup::new("out_att", out_params),
        ]);

        let heads = (0..nheads)
            .map(|_| GraphAttention::new((nfeat, nhid), alpha, dropout, true))
            .collect();
        let out_att = GraphAttention::new((nhid * nheads, nclass), alpha, dropout, false);

        Ok(Self {
            config,
            params,
            heads,
            out_att,
            training: true,
            rng,
            cache: None,
        })
    }

    /// Creates a new `Gat`, seeding its generator from `seed` or from the os.
    pub fn seeded(config: GatConfig, seed: Option<u64>) -> Result<Self> {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self::new(config, rng)
    }

    pub fn config(&self) -> &GatConfig {
        &self.config
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    fn view(&self, group: usize, index: usize) -> Result<ArrayView2<'_, f32>> {
        let param = self
            .params
            .param(group, index)
            .ok_or(SwarmErr::SizeMismatch {
                what: "gat params",
                got: index,
                expected: index + 1,
            })?;

        Ok(param.value().view().into_dimensionality::<Ix2>()?)
    }
}

fn write_grad(grads: &mut Snapshot, group: usize, index: usize, grad: &Array2<f32>) -> Result<()> {
    let param = grads.param_mut(group, index).ok_or(SwarmErr::SizeMismatch {
        what: "gat gradients",
        got: index,
        expected: index + 1,
    })?;

    let mut dst: ArrayViewMut2<f32> = param.value_mut().view_mut().into_dimensionality()?;
    if dst.dim() != grad.dim() {
        return Err(SwarmErr::DimensionMismatch {
            what: "gat gradients",
            group,
            param: index,
            got: dst.shape().to_vec(),
            expected: grad.shape().to_vec(),
        });
    }

    dst.assign(grad);
    Ok(())
}

impl ParamHost for Gat {
    fn params(&self) -> &Snapshot {
        &self.params
    }

    fn params_mut(&mut self) -> &mut Snapshot {
        &mut self.params
    }
}

impl Model for Gat {
    fn forward(
        &mut self,
        features: ArrayView2<f32>,
        adjacency: ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        let p = self.config.dropout;
        let training = self.training;

        // The input features are not trainable, their mask is not kept.
        let mut x = features.to_owned();
        if training {
            dropout(&mut x, p, &mut self.rng);
        }

        let head_params = (0..self.heads.len())
            .map(|h| {
                let w = self.view(HEADS_GROUP, 2 * h)?.to_owned();
                let a = self.view(HEADS_GROUP, 2 * h + 1)?.to_owned();
                Ok((w, a))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut outs = Vec::with_capacity(self.heads.len());
        for (head, (w, a)) in self.heads.iter_mut().zip(&head_params) {
            let out = head.forward(
                w.view(),
                a.view(),
                x.view(),
                adjacency,
                training,
                &mut self.rng,
            )?;
            outs.push(out);
        }

        let views: Vec<_> = outs.iter().map(|o| o.view()).collect();
        let mut hidden = concatenate(Axis(1), &views)?;
        let hidden_mask = match training {
            true => dropout(&mut hidden, p, &mut self.rng),
            false => None,
        };

        let w = self.view(OUT_GROUP, 0)?.to_owned();
        let a = self.view(OUT_GROUP, 1)?.to_owned();
        let logits = self.out_att.forward(
            w.view(),
            a.view(),
            hidden.view(),
            adjacency,
            training,
            &mut self.rng,
        )?;

        let mut log_probs = logits.mapv(|x| ActFn::Elu.f(x));
        log_softmax_rows(&mut log_probs);

        self.cache = Some(Cache {
            adjacency: adjacency.to_owned(),
            hidden_mask,
            logits,
            log_probs: log_probs.clone(),
        });

        Ok(log_probs)
    }

    fn backward(&mut self, d_out: ArrayView2<f32>, grads: &mut Snapshot) -> Result<()> {
        self.params.check_shapes(grads, "gat gradients")?;
        let cache = self.cache.take().ok_or(SwarmErr::MissingForwardPass)?;

        if d_out.dim() != cache.log_probs.dim() {
            return Err(SwarmErr::SizeMismatch {
                what: "gat output gradient rows",
                got: d_out.nrows(),
                expected: cache.log_probs.nrows(),
            });
        }

        // log-softmax backward: dx = d - softmax(x) * rowsum(d).
        let row_sums = d_out.sum_axis(Axis(1));
        let mut d_logits = Array2::<f32>::zeros(d_out.raw_dim());
        Zip::indexed(&mut d_logits)
            .and(&d_out)
            .and(&cache.log_probs)
            .and(&cache.logits)
            .for_each(|(i, _), dl, &d, &lp, &z| {
                *dl = (d - lp.exp() * row_sums[i]) * ActFn::Elu.df(z);
            });

        let w = self.view(OUT_GROUP, 0)?.to_owned();
        let a = self.view(OUT_GROUP, 1)?.to_owned();
        let (mut d_hidden, dw, da) = self.out_att.backward(
            w.view(),
            a.view(),
            cache.adjacency.view(),
            d_logits.view(),
        )?;
        write_grad(grads, OUT_GROUP, 0, &dw)?;
        write_grad(grads, OUT_GROUP, 1, &da)?;

        if let Some(mask) = &cache.hidden_mask {
            d_hidden *= mask;
        }

        let nhid = self.config.nhid;
        for h in 0..self.heads.len() {
            let w = self.view(HEADS_GROUP, 2 * h)?.to_owned();
            let a = self.view(HEADS_GROUP, 2 * h + 1)?.to_owned();
            let d_head = d_hidden.slice(s![.., h * nhid..(h + 1) * nhid]);

            let (_, dw, da) =
                self.heads[h].backward(w.view(), a.view(), cache.adjacency.view(), d_head)?;
            write_grad(grads, HEADS_GROUP, 2 * h, &dw)?;
            write_grad(grads, HEADS_GROUP, 2 * h + 1, &da)?;
        }

        Ok(())
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

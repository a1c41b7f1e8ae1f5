use log::{debug, info};
use rand::{SeedableRng, rngs::StdRng};

use super::{
    live::{LiveWeights, Objective},
    particle::{GlobalBest, Particle, PsoCoefficients},
};
use crate::{
    Result,
    arch::ParamHost,
    config::SwarmConfig,
    params::Snapshot,
    refiner::Refine,
};

/// A particle swarm whose best particle is refined by gradient descent.
///
/// Particles step one after the other in population order, each one seeing the global best
/// left by the ones before it.
pub struct Gdpso<F: Refine> {
    particles: Vec<Particle>,
    global_best: GlobalBest,
    config: SwarmConfig,
    refiner: F,
    rng: StdRng,
    iteration: usize,
}

impl<F: Refine> Gdpso<F> {
    /// Creates a new `Gdpso`.
    ///
    /// # Arguments
    /// * `live_params` - The current weights of the live model, the structure of every particle
    ///   and the initial global best.
    /// * `config` - The swarm's hyperparameters.
    /// * `refiner` - The local search applied to the owner of the global best.
    ///
    /// # Returns
    /// A new `Gdpso` or an error if the config is invalid.
    pub fn new(live_params: &Snapshot, config: SwarmConfig, refiner: F) -> Result<Self> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let coefficients = PsoCoefficients::from(&config);
        let particles = (0..config.num_particles)
            .map(|id| {
                Particle::new(
                    id,
                    live_params,
                    coefficients,
                    config.max_param_value,
                    config.min_param_value,
                    &mut rng,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            particles,
            global_best: GlobalBest::new(live_params.clone()),
            config,
            refiner,
            rng,
            iteration: 0,
        })
    }

    /// Runs one iteration of the swarm.
    ///
    /// Every particle steps through `live`, then the global best is written into `live` and
    /// evaluated.
    ///
    /// # Arguments
    /// * `live` - The model whose weights are searched.
    /// * `objective` - The loss to minimize, evaluated on `live`.
    ///
    /// # Returns
    /// The loss of the global best, as evaluated by `objective` on the live model.
    pub fn step<H, O>(&mut self, live: &mut H, objective: &mut O) -> Result<f32>
    where
        H: ParamHost + ?Sized,
        O: Objective<H> + ?Sized,
    {
        for particle in &mut self.particles {
            let loss = particle.step(
                &mut LiveWeights::new(live),
                objective,
                &self.global_best,
                &mut self.refiner,
                &mut self.rng,
            )?;

            // The owner keeps the global best for as long as it sits exactly on it.
            if loss < self.global_best.loss() {
                self.global_best.claim(particle.id(), particle.position(), loss)?;
            } else if loss.is_nan() || particle.position() != self.global_best.position() {
                self.global_best.release(particle.id());
            }
        }

        self.iteration += 1;

        let mut handle = LiveWeights::new(live);
        handle.write(self.global_best.position())?;
        let loss = handle.evaluate(objective)?;

        info!(
            iteration = self.iteration,
            best_loss = self.global_best.loss(),
            owner = self.global_best.owner();
            "swarm stepped"
        );
        debug!(diversity = self.diversity()?; "swarm diversity");

        Ok(loss)
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn global_best(&self) -> &GlobalBest {
        &self.global_best
    }

    pub fn global_best_loss(&self) -> f32 {
        self.global_best.loss()
    }

    pub fn global_best_position(&self) -> &Snapshot {
        self.global_best.position()
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn refiner(&self) -> &F {
        &self.refiner
    }

    /// The amount of completed iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// The mean euclidean distance between every particle and the global best.
    pub fn diversity(&self) -> Result<f32> {
        let total = self
            .particles
            .iter()
            .map(|p| p.position().distance(self.global_best.position()))
            .sum::<Result<f32>>()?;

        Ok(total / self.particles.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;
    use crate::{
        SwarmErr,
        params::{Param, ParamGroup},
    };

    struct Identity;

    impl Refine for Identity {
        fn apply(&mut self, weights: &Snapshot) -> Result<Snapshot> {
            Ok(weights.clone())
        }
    }

    fn template() -> Snapshot {
        let value = ArrayD::zeros(IxDyn(&[3]));
        Snapshot::new(vec![ParamGroup::new("g", vec![Param::new("w", value)])])
    }

    fn config(num_particles: usize) -> SwarmConfig {
        SwarmConfig {
            num_particles,
            seed: Some(42),
            ..Default::default()
        }
    }

    fn sum_of_squares(host: &mut Snapshot) -> Result<f32> {
        Ok(host.iter().map(|p| p.value().mapv(|x| x * x).sum()).sum())
    }

    #[test]
    fn particles_are_built_in_order() {
        let swarm = Gdpso::new(&template(), config(4), Identity).unwrap();

        let ids: Vec<_> = swarm.particles().iter().map(Particle::id).collect();
        assert_eq!(ids, [0, 1, 2, 3]);
        assert_eq!(swarm.global_best_loss(), f32::INFINITY);
        assert_eq!(swarm.global_best().owner(), None);
        assert_eq!(swarm.global_best_position(), &template());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let result = Gdpso::new(&template(), config(0), Identity);
        assert!(matches!(result, Err(SwarmErr::InvalidConfig(_))));
    }

    #[test]
    fn same_seed_same_search() {
        let mut a = Gdpso::new(&template(), config(5), Identity).unwrap();
        let mut b = Gdpso::new(&template(), config(5), Identity).unwrap();
        let (mut live_a, mut live_b) = (template(), template());

        for _ in 0..3 {
            let loss_a = a.step(&mut live_a, &mut sum_of_squares).unwrap();
            let loss_b = b.step(&mut live_b, &mut sum_of_squares).unwrap();
            assert_eq!(loss_a, loss_b);
        }

        assert_eq!(a.global_best(), b.global_best());
    }

    #[test]
    fn the_live_model_ends_on_the_global_best() {
        let mut swarm = Gdpso::new(&template(), config(6), Identity).unwrap();
        let mut live = template();

        let loss = swarm.step(&mut live, &mut sum_of_squares).unwrap();

        assert_eq!(&live, swarm.global_best_position());
        assert_eq!(loss, swarm.global_best_loss());
        assert_eq!(swarm.iteration(), 1);
        assert!(swarm.global_best().owner().is_some());
        assert!(swarm.diversity().unwrap() > 0.);
    }

    #[test]
    fn the_global_best_is_the_lowest_loss_seen() {
        let mut swarm = Gdpso::new(&template(), config(5), Identity).unwrap();
        let mut live = template();
        let mut seen = Vec::new();
        let mut objective = |host: &mut Snapshot| -> Result<f32> {
            let loss = sum_of_squares(host)?;
            seen.push(loss);
            Ok(loss)
        };

        swarm.step(&mut live, &mut objective).unwrap();
        swarm.step(&mut live, &mut objective).unwrap();

        let lowest = seen.iter().copied().fold(f32::INFINITY, f32::min);
        assert_eq!(swarm.global_best_loss(), lowest);
        // Five particle steps and one global best evaluation per iteration.
        assert_eq!(seen.len(), 12);
    }

    #[test]
    fn a_refine_that_keeps_the_weights_keeps_the_ownership() {
        struct Counting {
            calls: usize,
        }

        impl Refine for Counting {
            fn apply(&mut self, weights: &Snapshot) -> Result<Snapshot> {
                self.calls += 1;
                Ok(weights.clone())
            }
        }

        let mut swarm = Gdpso::new(&template(), config(1), Counting { calls: 0 }).unwrap();
        let mut live = template();

        for _ in 0..3 {
            swarm.step(&mut live, &mut sum_of_squares).unwrap();
            assert_eq!(swarm.global_best().owner(), Some(0));
        }

        // The first step flies, the next two refine the owned global best.
        assert_eq!(swarm.refiner().calls, 2);
        assert_eq!(swarm.particles()[0].position(), swarm.global_best_position());
    }

    #[test]
    fn errors_abort_the_iteration() {
        let mut swarm = Gdpso::new(&template(), config(3), Identity).unwrap();
        let mut live = template();
        let mut failing = |_: &mut Snapshot| -> Result<f32> {
            Err(SwarmErr::InvalidInput("boom".into()))
        };

        assert!(swarm.step(&mut live, &mut failing).is_err());
        assert_eq!(swarm.iteration(), 0);
    }
}

use log::debug;
use ndarray::{ArrayD, Zip};
use ndarray_rand::RandomExt;
use rand::{Rng, distr::StandardUniform};

use super::live::{LiveWeights, Objective};
use crate::{
    Result,
    arch::ParamHost,
    config::SwarmConfig,
    params::{Snapshot, initialize},
    refiner::Refine,
};

/// The weights of a particle's velocity update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PsoCoefficients {
    /// How much of the previous velocity is kept.
    pub inertial_weight: f32,
    /// The pull towards the particle's own best position.
    pub cognitive_coefficient: f32,
    /// The pull towards the swarm's best position.
    pub social_coefficient: f32,
}

impl From<&SwarmConfig> for PsoCoefficients {
    fn from(config: &SwarmConfig) -> Self {
        Self {
            inertial_weight: config.inertial_weight,
            cognitive_coefficient: config.cognitive_coefficient,
            social_coefficient: config.social_coefficient,
        }
    }
}

/// The best position any particle of a swarm has visited.
///
/// `owner` is the id of the particle currently sitting on `position`, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalBest {
    owner: Option<usize>,
    position: Snapshot,
    loss: f32,
}

impl GlobalBest {
    /// Creates a new unowned `GlobalBest` at `position` with an infinite loss.
    pub fn new(position: Snapshot) -> Self {
        Self {
            owner: None,
            position,
            loss: f32::INFINITY,
        }
    }

    pub fn owner(&self) -> Option<usize> {
        self.owner
    }

    pub fn position(&self) -> &Snapshot {
        &self.position
    }

    pub fn loss(&self) -> f32 {
        self.loss
    }

    /// Moves the global best to `position`, owned by particle `id`.
    pub(super) fn claim(&mut self, id: usize, position: &Snapshot, loss: f32) -> Result<()> {
        self.position.assign(position)?;
        self.owner = Some(id);
        self.loss = loss;
        Ok(())
    }

    /// Drops the ownership of particle `id`, if it's the owner.
    pub(super) fn release(&mut self, id: usize) {
        if self.owner == Some(id) {
            self.owner = None;
        }
    }
}

/// A candidate set of weights moving through the search space.
#[derive(Debug, Clone)]
pub struct Particle {
    id: usize,
    position: Snapshot,
    velocity: Snapshot,
    best_position: Snapshot,
    best_loss: f32,
    coefficients: PsoCoefficients,
}

impl Particle {
    /// Creates a new `Particle` at a random position.
    ///
    /// # Arguments
    /// * `id` - The particle's index in its swarm.
    /// * `template` - The structure of the weights.
    /// * `coefficients` - The weights of the velocity update.
    /// * `max` - The upper bound of the initial position.
    /// * `min` - The lower bound of the initial position.
    /// * `rng` - The source of the initial position and velocity.
    ///
    /// # Returns
    /// A new `Particle` or an error if the bounds don't describe a valid range.
    pub fn new<R: Rng + ?Sized>(
        id: usize,
        template: &Snapshot,
        coefficients: PsoCoefficients,
        max: f32,
        min: f32,
        rng: &mut R,
    ) -> Result<Self> {
        let magnitude = (max - min).abs();
        let position = initialize(template, max, min, rng)?;
        let velocity = initialize(template, magnitude, -magnitude, rng)?;
        let best_position = position.clone();

        Ok(Self {
            id,
            position,
            velocity,
            best_position,
            best_loss: f32::INFINITY,
            coefficients,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn position(&self) -> &Snapshot {
        &self.position
    }

    pub fn velocity(&self) -> &Snapshot {
        &self.velocity
    }

    pub fn best_position(&self) -> &Snapshot {
        &self.best_position
    }

    pub fn best_loss(&self) -> f32 {
        self.best_loss
    }

    pub fn coefficients(&self) -> &PsoCoefficients {
        &self.coefficients
    }

    /// Whether this particle sits on the swarm's global best.
    pub fn is_global_best(&self, global_best: &GlobalBest) -> bool {
        global_best.owner == Some(self.id)
    }

    /// Moves the particle once and evaluates its new position.
    ///
    /// The owner of the global best is refined with `refiner`, every other particle follows the
    /// velocity update. Either way the new position is written into the live model and the
    /// objective is evaluated exactly once.
    ///
    /// # Arguments
    /// * `live` - The write handle over the live model.
    /// * `objective` - The loss to minimize.
    /// * `global_best` - The swarm's current global best.
    /// * `refiner` - The local search applied to the owner of the global best.
    /// * `rng` - The swarm's random number generator.
    ///
    /// # Returns
    /// The loss of the new position.
    pub fn step<H, O, F, R>(
        &mut self,
        live: &mut LiveWeights<'_, H>,
        objective: &mut O,
        global_best: &GlobalBest,
        refiner: &mut F,
        rng: &mut R,
    ) -> Result<f32>
    where
        H: ParamHost + ?Sized,
        O: Objective<H> + ?Sized,
        F: Refine + ?Sized,
        R: Rng + ?Sized,
    {
        let branch = if self.is_global_best(global_best) {
            let refined = refiner.apply(&self.position)?;
            self.position.assign(&refined)?;
            "refine"
        } else {
            self.fly(global_best, rng)?;
            "swarm"
        };

        live.write(&self.position)?;
        let loss = live.evaluate(objective)?;

        if loss < self.best_loss {
            self.best_position.assign(&self.position)?;
            self.best_loss = loss;
        }

        debug!(particle = self.id, loss = loss, branch = branch; "particle stepped");
        Ok(loss)
    }

    /// The velocity update, `v' = w*v + c1*r_p*(pb - p) + c2*r_g*(gb - p)` and `p' = p + v'`.
    fn fly<R: Rng + ?Sized>(&mut self, global_best: &GlobalBest, rng: &mut R) -> Result<()> {
        self.position.check_shapes(&global_best.position, "global best position")?;

        let PsoCoefficients {
            inertial_weight: w,
            cognitive_coefficient: c1,
            social_coefficient: c2,
        } = self.coefficients;

        let tensors = self
            .position
            .iter_mut()
            .zip(self.velocity.iter_mut())
            .zip(self.best_position.iter())
            .zip(global_best.position.iter());

        for (((p, v), pb), gb) in tensors {
            let dim = v.value().raw_dim();
            let r_p = ArrayD::<f32>::random_using(dim.clone(), StandardUniform, rng);
            let r_g = ArrayD::<f32>::random_using(dim, StandardUniform, rng);

            Zip::from(&r_p)
                .and(&r_g)
                .and(v.value_mut())
                .and(p.value_mut())
                .and(pb.value())
                .and(gb.value())
                .for_each(|&rp, &rg, v, p, &pb, &gb| {
                    *v = w * *v + c1 * rp * (pb - *p) + c2 * rg * (gb - *p);
                    *p += *v;
                });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::IxDyn;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::params::{Param, ParamGroup};

    const COEFFICIENTS: PsoCoefficients = PsoCoefficients {
        inertial_weight: 0.9,
        cognitive_coefficient: 1.,
        social_coefficient: 1.,
    };

    fn template() -> Snapshot {
        Snapshot::new(vec![
            ParamGroup::new(
                "a",
                vec![
                    Param::new("w", ArrayD::zeros(IxDyn(&[2, 3]))),
                    Param::new("b", ArrayD::zeros(IxDyn(&[3]))),
                ],
            ),
            ParamGroup::new("b", vec![Param::new("w", ArrayD::zeros(IxDyn(&[4])))]),
        ])
    }

    fn sum_of_squares(host: &mut Snapshot) -> Result<f32> {
        Ok(host.iter().map(|p| p.value().mapv(|x| x * x).sum()).sum())
    }

    /// Adds `delta` to every weight, counting its calls.
    struct Shift {
        delta: f32,
        calls: usize,
    }

    impl Refine for Shift {
        fn apply(&mut self, weights: &Snapshot) -> Result<Snapshot> {
            self.calls += 1;
            Ok(weights.map_params(|p| p.value().mapv(|x| x + self.delta)))
        }
    }

    fn particle(id: usize, seed: u64) -> Particle {
        let mut rng = StdRng::seed_from_u64(seed);
        Particle::new(id, &template(), COEFFICIENTS, 10., -10., &mut rng).unwrap()
    }

    #[test]
    fn new_particles_start_within_bounds() {
        let particle = particle(0, 1);

        for p in particle.position().iter() {
            assert!(p.value().iter().all(|x| (-10. ..=10.).contains(x)));
        }
        for v in particle.velocity().iter() {
            assert!(v.value().iter().all(|x| (-20. ..=20.).contains(x)));
        }
        assert_eq!(particle.best_position(), particle.position());
        assert_eq!(particle.best_loss(), f32::INFINITY);
        assert_ne!(particle.position(), particle.velocity());
    }

    #[test]
    fn velocity_update_is_reproducible() {
        let mut particle = particle(0, 2);
        let before = particle.clone();
        let halved = particle.position().map_params(|p| p.value().mapv(|x| x / 2.));
        let global_best = GlobalBest::new(halved);
        let mut host = template();
        let mut shift = Shift { delta: 0., calls: 0 };

        let mut rng = StdRng::seed_from_u64(3);
        let loss = particle
            .step(
                &mut LiveWeights::new(&mut host),
                &mut sum_of_squares,
                &global_best,
                &mut shift,
                &mut rng,
            )
            .unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        let tensors = before
            .position()
            .iter()
            .zip(before.velocity().iter())
            .zip(before.best_position().iter())
            .zip(global_best.position().iter())
            .zip(particle.position().iter().zip(particle.velocity().iter()));

        for ((((p, v), pb), gb), (got_p, got_v)) in tensors {
            let dim = v.value().raw_dim();
            let r_p = ArrayD::<f32>::random_using(dim.clone(), StandardUniform, &mut rng);
            let r_g = ArrayD::<f32>::random_using(dim, StandardUniform, &mut rng);

            for i in 0..v.value().len() {
                let (p, v, pb, gb) = (
                    p.value().as_slice().unwrap()[i],
                    v.value().as_slice().unwrap()[i],
                    pb.value().as_slice().unwrap()[i],
                    gb.value().as_slice().unwrap()[i],
                );
                let (rp, rg) = (r_p.as_slice().unwrap()[i], r_g.as_slice().unwrap()[i]);

                let expected_v = 0.9 * v + 1. * rp * (pb - p) + 1. * rg * (gb - p);
                assert_eq!(got_v.value().as_slice().unwrap()[i], expected_v);
                assert_eq!(got_p.value().as_slice().unwrap()[i], p + expected_v);
            }
        }

        assert_eq!(shift.calls, 0);
        assert_eq!(&host, particle.position());
        assert_eq!(loss, sum_of_squares(&mut host).unwrap());
        assert_eq!(particle.best_loss(), loss);
        assert_eq!(particle.best_position(), particle.position());
    }

    #[test]
    fn ownership_not_equality_makes_the_global_best() {
        let particle = particle(4, 5);
        let mut global_best = GlobalBest::new(particle.position().clone());

        assert!(!particle.is_global_best(&global_best));

        global_best.claim(3, particle.position(), 1.).unwrap();
        assert!(!particle.is_global_best(&global_best));

        let nudged = particle
            .position()
            .map_params(|p| p.value().mapv(|x| x + f32::EPSILON));
        global_best.claim(4, &nudged, 0.5).unwrap();
        assert!(particle.is_global_best(&global_best));

        global_best.release(3);
        assert_eq!(global_best.owner(), Some(4));
        global_best.release(4);
        assert!(!particle.is_global_best(&global_best));
    }

    #[test]
    fn owner_is_refined_once_in_place() {
        let mut particle = particle(0, 6);
        let mut global_best = GlobalBest::new(template());
        global_best.claim(0, particle.position(), 1.).unwrap();

        let start = particle.position().clone();
        let ptrs: Vec<_> = particle.position().iter().map(|p| p.value().as_ptr()).collect();
        let mut host = template();
        let host_ptrs: Vec<_> = host.iter().map(|p| p.value().as_ptr()).collect();
        let mut shift = Shift { delta: 1., calls: 0 };
        let mut rng = StdRng::seed_from_u64(7);

        particle
            .step(
                &mut LiveWeights::new(&mut host),
                &mut sum_of_squares,
                &global_best,
                &mut shift,
                &mut rng,
            )
            .unwrap();

        let expected = start.map_params(|p| p.value().mapv(|x| x + 1.));
        let after: Vec<_> = particle.position().iter().map(|p| p.value().as_ptr()).collect();
        let host_after: Vec<_> = host.iter().map(|p| p.value().as_ptr()).collect();

        assert_eq!(shift.calls, 1);
        assert_eq!(particle.position(), &expected);
        assert_eq!(&host, &expected);
        assert_eq!(ptrs, after);
        assert_eq!(host_ptrs, host_after);
    }

    #[test]
    fn nan_losses_never_become_personal_bests() {
        let mut particle = particle(0, 8);
        let global_best = GlobalBest::new(template());
        let mut host = template();
        let mut shift = Shift { delta: 0., calls: 0 };
        let mut rng = StdRng::seed_from_u64(9);
        let mut nan = |_: &mut Snapshot| -> Result<f32> { Ok(f32::NAN) };

        let loss = particle
            .step(
                &mut LiveWeights::new(&mut host),
                &mut nan,
                &global_best,
                &mut shift,
                &mut rng,
            )
            .unwrap();

        assert!(loss.is_nan());
        assert_eq!(particle.best_loss(), f32::INFINITY);
        assert_ne!(particle.best_position(), particle.position());
    }
}

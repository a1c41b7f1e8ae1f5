use ndarray::{Array2, ArrayD};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::Uniform;

use super::Snapshot;
use crate::{Result, SwarmErr};

/// Draws a new snapshot shaped like `template` with every value sampled from `U[low, high]`.
///
/// Every tensor consumes its own draws from `rng`, in group order, so no two tensors (nor two
/// calls) share samples. The template is left untouched.
///
/// # Arguments
/// * `template` - The snapshot whose structure, names and metadata are replicated.
/// * `high` - The inclusive upper limit.
/// * `low` - The inclusive lower limit.
/// * `rng` - A random number generator.
///
/// # Returns
/// An error if the range is invalid (low > high or non finite bounds).
pub fn initialize<R: Rng + ?Sized>(
    template: &Snapshot,
    high: f32,
    low: f32,
    rng: &mut R,
) -> Result<Snapshot> {
    if !low.is_finite() || !high.is_finite() {
        return Err(SwarmErr::InvalidDistribution(format!(
            "bounds must be finite, got [{low}, {high}]"
        )));
    }

    let distribution = Uniform::new_inclusive(low, high)?;

    Ok(template.map_params(|p| ArrayD::random_using(p.value().raw_dim(), distribution, rng)))
}

/// Draws a `(fan_in, fan_out)` weight matrix using Xavier uniform initialization.
///
/// # Arguments
/// * `rng` - A random number generator.
/// * `fan_in` - The number of input units in the weight tensor.
/// * `fan_out` - The number of output units in the weight tensor.
/// * `gain` - The scaling factor applied to the range.
///
/// # Returns
/// An error if the calculated range is invalid.
pub fn xavier_uniform<R: Rng + ?Sized>(
    rng: &mut R,
    (fan_in, fan_out): (usize, usize),
    gain: f32,
) -> Result<Array2<f32>> {
    let range = gain * (6. / (fan_in + fan_out) as f32).sqrt();
    let distribution = Uniform::new_inclusive(-range, range)?;
    Ok(Array2::random_using((fan_in, fan_out), distribution, rng))
}

#[cfg(test)]
mod tests {
    use ndarray::IxDyn;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::params::{Param, ParamGroup};

    fn template() -> Snapshot {
        Snapshot::new(vec![
            ParamGroup::new(
                "a",
                vec![
                    Param::new("w", ArrayD::zeros(IxDyn(&[4, 5]))),
                    Param::new("b", ArrayD::zeros(IxDyn(&[5]))),
                ],
            ),
            ParamGroup::new("b", vec![Param::new("w", ArrayD::zeros(IxDyn(&[3, 2, 2])))])
                .with_lr(0.1),
        ])
    }

    #[test]
    fn values_lie_within_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        let template = template();

        for _ in 0..100 {
            let snapshot = initialize(&template, 2.5, -1.5, &mut rng).unwrap();
            template.check_shapes(&snapshot, "initialized").unwrap();

            for p in snapshot.iter() {
                assert!(p.value().iter().all(|&x| (-1.5..=2.5).contains(&x)));
            }
        }
    }

    #[test]
    fn structure_and_metadata_are_kept() {
        let mut rng = StdRng::seed_from_u64(42);
        let template = template();
        let snapshot = initialize(&template, 1., -1., &mut rng).unwrap();

        assert_eq!(snapshot.shapes(), template.shapes());
        assert_eq!(snapshot.groups()[1].lr(), Some(0.1));
        assert_eq!(snapshot.param(0, 1).unwrap().name(), "b");
        assert!(template.iter().all(|p| p.value().iter().all(|&x| x == 0.)));
    }

    #[test]
    fn every_call_is_a_new_draw() {
        let mut rng = StdRng::seed_from_u64(42);
        let template = template();

        let a = initialize(&template, 1., -1., &mut rng).unwrap();
        let b = initialize(&template, 1., -1., &mut rng).unwrap();

        assert_ne!(a, b);
        for (p, q) in a.iter().zip(b.iter()) {
            assert_ne!(p.value().as_ptr(), q.value().as_ptr());
        }
    }

    #[test]
    fn invalid_ranges_fail() {
        let mut rng = StdRng::seed_from_u64(42);
        let template = template();

        assert!(initialize(&template, -1., 1., &mut rng).is_err());
        assert!(initialize(&template, f32::INFINITY, 1., &mut rng).is_err());
    }

    #[test]
    fn degenerate_range_is_constant() {
        let mut rng = StdRng::seed_from_u64(42);
        let snapshot = initialize(&template(), 0., 0., &mut rng).unwrap();

        assert!(snapshot.iter().all(|p| p.value().iter().all(|&x| x == 0.)));
    }

    #[test]
    fn xavier_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let w = xavier_uniform(&mut rng, (10, 6), 1.414).unwrap();
        let range = 1.414 * (6f32 / 16.).sqrt();

        assert_eq!(w.dim(), (10, 6));
        assert!(w.iter().all(|x| x.abs() <= range));
    }
}

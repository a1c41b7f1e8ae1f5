mod gdpso;
mod live;
mod particle;

pub use gdpso::Gdpso;
pub use live::{LiveWeights, Objective, evaluate_detached};
pub use particle::{GlobalBest, Particle, PsoCoefficients};

pub mod arch;
pub mod config;
pub mod error;
pub mod optimization;
pub mod params;
pub mod refiner;
pub mod swarm;

pub use error::{Result, SwarmErr};

pub mod activations;
mod attention;
mod gat;
mod graph;
mod loss;
mod model;

pub use attention::GraphAttention;
pub use gat::Gat;
pub use graph::GraphData;
pub use loss::CrossEntropy;
pub use model::{Model, ParamHost};

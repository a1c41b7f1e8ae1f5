use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use ndarray::ShapeError;
use rand_distr::uniform::Error as UniformError;

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, SwarmErr>;

/// The crate's error type.
#[derive(Debug)]
pub enum SwarmErr {
    /// Two snapshots disagree on the shape of one of their tensors.
    DimensionMismatch {
        what: &'static str,
        group: usize,
        param: usize,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    /// Two collections disagree on their amount of elements (groups, params, rows...).
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidConfig(String),
    InvalidDistribution(String),
    InvalidInput(String),
    /// `backward` was called on a model that has no cached forward pass.
    MissingForwardPass,
    Shape(ShapeError),
    Json(serde_json::Error),
    Io(io::Error),
}

impl Display for SwarmErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwarmErr::DimensionMismatch {
                what,
                group,
                param,
                got,
                expected,
            } => write!(
                f,
                "dimension mismatch for {what} at group {group}, param {param}: got {got:?}, expected {expected:?}"
            ),
            SwarmErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "size mismatch for {what}: got {got}, expected {expected}"),
            SwarmErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            SwarmErr::InvalidDistribution(msg) => write!(f, "invalid distribution: {msg}"),
            SwarmErr::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            SwarmErr::MissingForwardPass => {
                write!(f, "backward pass requested before any forward pass")
            }
            SwarmErr::Shape(e) => write!(f, "shape error: {e}"),
            SwarmErr::Json(e) => write!(f, "json error: {e}"),
            SwarmErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for SwarmErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SwarmErr::Shape(e) => Some(e),
            SwarmErr::Json(e) => Some(e),
            SwarmErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for SwarmErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<UniformError> for SwarmErr {
    fn from(value: UniformError) -> Self {
        Self::InvalidDistribution(value.to_string())
    }
}

impl From<serde_json::Error> for SwarmErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<io::Error> for SwarmErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

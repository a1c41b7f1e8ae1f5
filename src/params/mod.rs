mod init;
mod snapshot;

pub use init::{initialize, xavier_uniform};
pub use snapshot::{Param, ParamGroup, Snapshot};

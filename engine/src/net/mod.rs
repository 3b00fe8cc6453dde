mod endpoint;
mod mesh;

pub use endpoint::Endpoint;
pub use mesh::{Mesh, ReduceOp};

pub mod invalidation;
pub mod paths;

pub use invalidation::*;
pub use paths::*;

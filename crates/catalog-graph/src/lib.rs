pub mod chunked;
pub mod memory_store;
pub mod planner;
pub mod rebuild;
pub mod relation;
pub mod service;
pub mod writer;

pub use chunked::*;
pub use memory_store::*;
pub use planner::*;
pub use rebuild::*;
pub use relation::*;
pub use service::*;
pub use writer::*;

//! Runtime-domain modules: task model, local executor, partitioning and
//! cancellation.

pub mod cancel;
pub mod executor;
pub mod partitioner;
pub mod task;

pub use cancel::*;
pub use executor::*;
pub use partitioner::*;
pub use task::*;

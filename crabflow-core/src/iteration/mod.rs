//! Iteration-domain modules: cross-task handoff inside supersteps.

pub mod broker;

pub use broker::*;

//! imgtree-lib: Core types and logic for imgtree
//!
//! This crate incrementally rebuilds a tree of interdependent container images:
//! - `generate`: discovers image definitions and builds the dependency graph
//! - `graph`: the dependency graph and its traversal primitives
//! - `plan`: decides which images must be rebuilt, tested or retagged
//! - `execute`: rebuilds the graph in parallel, in dependency order
//! - `tag`: promotes build-time tags to their final and release tags

pub mod consts;
pub mod dockerfile;
pub mod execute;
pub mod generate;
pub mod graph;
pub mod image;
pub mod metadata;
pub mod plan;
pub mod ratelimit;
pub mod report;
pub mod tag;
pub mod types;
pub mod util;

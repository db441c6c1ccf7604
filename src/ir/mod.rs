//! Graph IR
//!
//! Per-method computation graphs of a module hierarchy:
//! - `prim::GetAttr` reads module attributes (weights, submodules, observers)
//! - `prim::CallMethod` calls into a submodule (or `self`) method graph
//! - `aten::*` nodes are builtin tensor operations
//!
//! Graphs are straight-line (no control flow); execution order is explicit.

mod builder;
mod graph;
mod printer;
mod types;


pub use builder::GraphBuilder;
pub use graph::{Graph, Node, NodeId, Producer, ValueId, ValueInfo};
pub use types::{Constant, OpKind, ValueType};

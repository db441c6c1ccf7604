//! Module hierarchy: arena of modules, attributes and method graphs
//!
//! Also provides the standard layers (`Linear`, `Conv2d`, sequential
//! containers) with their canonical scripted graphs.

mod model;
mod nn;


pub use model::{join_path, Attribute, Model, ModuleId, ModuleNode, Stage};
pub use nn::{Conv2dOptions, ModelBuilder};

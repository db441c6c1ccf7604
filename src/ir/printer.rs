//! Textual graph dump
//!
//! ```text
//! graph(%self : M,
//!       %x : Tensor):
//!   %fc.1 : Linear = prim::GetAttr[name="fc"](%self)
//!   %2 : Tensor = prim::CallMethod[name="forward"](%fc.1, %x)
//!   return (%2)
//! ```

use super::graph::{Graph, Producer, ValueId};
use super::types::OpKind;
use std::fmt;

impl Graph {
    /// Printable name of a value: inputs keep their name, node outputs get
    /// the arena index appended so names stay unique.
    pub fn value_display_name(&self, id: ValueId) -> String {
        let info = self.value(id);
        match (&info.name, info.producer) {
            (Some(name), Producer::Input(_)) => format!("%{name}"),
            (Some(name), Producer::Node { .. }) => format!("%{name}.{}", id.0),
            (None, _) => format!("%{}", id.0),
        }
    }

    fn join_values(&self, values: &[ValueId]) -> String {
        values
            .iter()
            .map(|&v| self.value_display_name(v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn kind_attribute(kind: &OpKind) -> Option<String> {
    match kind {
        OpKind::Constant(c) => Some(format!("value={c}")),
        OpKind::GetAttr(name) | OpKind::CallMethod(name) | OpKind::CallFunction(name) => {
            Some(format!("name=\"{name}\""))
        }
        _ => None,
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inputs: Vec<String> = self
            .inputs()
            .iter()
            .map(|&v| format!("{} : {}", self.value_display_name(v), self.value(v).ty))
            .collect();
        writeln!(f, "graph({}):", inputs.join(",\n      "))?;

        for node in self.nodes() {
            let outputs: Vec<String> = node
                .outputs
                .iter()
                .map(|&v| format!("{} : {}", self.value_display_name(v), self.value(v).ty))
                .collect();
            let attr = kind_attribute(&node.kind)
                .map(|a| format!("[{a}]"))
                .unwrap_or_default();
            writeln!(
                f,
                "  {} = {}{}({})",
                outputs.join(", "),
                node.kind.qualified_name(),
                attr,
                self.join_values(&node.inputs)
            )?;
        }

        writeln!(f, "  return ({})", self.join_values(self.outputs()))
    }
}

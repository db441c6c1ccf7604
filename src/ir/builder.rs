//! Front-end style graph construction
//!
//! Stands in for a scripting front end: builds method graphs node by node in
//! source order.

use super::graph::{Graph, ValueId};
use super::types::{Constant, OpKind, ValueType};

/// Builder for a single method graph
pub struct GraphBuilder {
    graph: Graph,
    self_value: ValueId,
}

impl GraphBuilder {
    /// Start a method graph for a module of type `module_type`
    pub fn new(module_type: &str) -> Self {
        let mut graph = Graph::new();
        let self_value = graph.add_input("self", ValueType::Module(module_type.to_string()));
        Self { graph, self_value }
    }

    /// The receiver (`%self`)
    pub fn self_value(&self) -> ValueId {
        self.self_value
    }

    /// Add a tensor argument
    pub fn input(&mut self, name: &str) -> ValueId {
        self.graph.add_input(name, ValueType::Tensor)
    }

    /// Add a `prim::Constant`
    pub fn constant(&mut self, value: Constant) -> ValueId {
        let ty = value.value_type();
        let node = self.graph.append(OpKind::Constant(value), vec![], vec![ty]);
        self.graph.node(node).output()
    }

    /// Read an attribute of `owner`
    pub fn get_attr(&mut self, owner: ValueId, name: &str, ty: ValueType) -> ValueId {
        let node = self
            .graph
            .append(OpKind::GetAttr(name.to_string()), vec![owner], vec![ty]);
        let out = self.graph.node(node).output();
        self.graph.set_value_name(out, name);
        out
    }

    /// Read a submodule of `%self`
    pub fn submodule(&mut self, name: &str, module_type: &str) -> ValueId {
        let owner = self.self_value;
        self.get_attr(owner, name, ValueType::Module(module_type.to_string()))
    }

    /// Read a tensor attribute of `%self`
    pub fn tensor_attr(&mut self, name: &str) -> ValueId {
        let owner = self.self_value;
        self.get_attr(owner, name, ValueType::Tensor)
    }

    /// Call `receiver.method(args...)`, returning a tensor
    pub fn call_method(&mut self, method: &str, receiver: ValueId, args: &[ValueId]) -> ValueId {
        let mut inputs = vec![receiver];
        inputs.extend_from_slice(args);
        let node = self.graph.append(
            OpKind::CallMethod(method.to_string()),
            inputs,
            vec![ValueType::Tensor],
        );
        self.graph.node(node).output()
    }

    /// Call a builtin function, returning a tensor
    pub fn call_function(&mut self, function: &str, args: &[ValueId]) -> ValueId {
        self.op(OpKind::CallFunction(function.to_string()), args)
    }

    /// Append a tensor-producing op
    pub fn op(&mut self, kind: OpKind, args: &[ValueId]) -> ValueId {
        let node = self
            .graph
            .append(kind, args.to_vec(), vec![ValueType::Tensor]);
        self.graph.node(node).output()
    }

    /// Return `value` and finish the graph
    pub fn ret(mut self, value: ValueId) -> Graph {
        self.graph.mark_output(value);
        self.graph
    }
}

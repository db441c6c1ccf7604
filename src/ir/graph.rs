//! Arena-indexed method graph
//!
//! Nodes and values live in append-only arenas and are addressed by index.
//! Execution order is kept separately, so rewrite passes can splice nodes in
//! at any position without invalidating ids held elsewhere. Removed nodes stay
//! in the arena (flagged) and drop out of the order.

use super::types::{OpKind, ValueType};

/// Index of a node in a graph's node arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Index of a value in a graph's value arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

/// Where a value comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Producer {
    /// Graph input at this position (0 is `self`)
    Input(usize),
    /// Output `index` of a node
    Node { node: NodeId, index: usize },
}

/// Metadata of a graph value
#[derive(Clone, Debug)]
pub struct ValueInfo {
    /// Debug name hint used by the printer
    pub name: Option<String>,
    /// Static type
    pub ty: ValueType,
    /// Defining site
    pub producer: Producer,
}

/// A node in a method graph
#[derive(Clone, Debug)]
pub struct Node {
    /// Arena index of this node
    pub id: NodeId,
    /// Operation
    pub kind: OpKind,
    /// Operand values
    pub inputs: Vec<ValueId>,
    /// Produced values
    pub outputs: Vec<ValueId>,
    removed: bool,
}

impl Node {
    /// First output value
    ///
    /// Every node kind in this IR produces at least one value.
    pub fn output(&self) -> ValueId {
        self.outputs[0]
    }

    /// Check if this node has been removed by a pass
    pub fn is_removed(&self) -> bool {
        self.removed
    }
}

/// Method graph: inputs, ordered nodes and returned values
#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    values: Vec<ValueInfo>,
    order: Vec<NodeId>,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
}

impl Graph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a graph input
    pub fn add_input(&mut self, name: &str, ty: ValueType) -> ValueId {
        let index = self.inputs.len();
        let id = self.push_value(ty, Producer::Input(index));
        self.values[id.0].name = Some(name.to_string());
        self.inputs.push(id);
        id
    }

    /// Graph inputs; position 0 is the receiver module
    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    /// Returned values
    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    /// Mark a value as returned by the graph
    pub fn mark_output(&mut self, value: ValueId) {
        self.outputs.push(value);
    }

    /// Metadata of a value
    pub fn value(&self, id: ValueId) -> &ValueInfo {
        &self.values[id.0]
    }

    /// Attach a debug name to a value
    pub fn set_value_name(&mut self, id: ValueId, name: impl Into<String>) {
        self.values[id.0].name = Some(name.into());
    }

    /// Get a node by id
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Live nodes in execution order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.order.iter().map(move |id| &self.nodes[id.0])
    }

    /// Ids of live nodes in execution order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.order.clone()
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if the graph has no live nodes
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Position of a live node in execution order
    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.order.iter().position(|&n| n == id)
    }

    /// Node defining a value, `None` for graph inputs
    pub fn producer_node(&self, value: ValueId) -> Option<NodeId> {
        match self.values[value.0].producer {
            Producer::Node { node, .. } => Some(node),
            Producer::Input(_) => None,
        }
    }

    /// Append a node at the end of the execution order
    pub fn append(
        &mut self,
        kind: OpKind,
        inputs: Vec<ValueId>,
        output_types: Vec<ValueType>,
    ) -> NodeId {
        let pos = self.order.len();
        self.insert_at(pos, kind, inputs, output_types)
    }

    /// Insert a node at the start of the execution order
    pub fn insert_at_start(
        &mut self,
        kind: OpKind,
        inputs: Vec<ValueId>,
        output_types: Vec<ValueType>,
    ) -> NodeId {
        self.insert_at(0, kind, inputs, output_types)
    }

    /// Insert a node directly before `anchor`
    pub fn insert_before(
        &mut self,
        anchor: NodeId,
        kind: OpKind,
        inputs: Vec<ValueId>,
        output_types: Vec<ValueType>,
    ) -> NodeId {
        let pos = self.position(anchor).unwrap_or(self.order.len());
        self.insert_at(pos, kind, inputs, output_types)
    }

    /// Insert a node directly after `anchor`
    pub fn insert_after(
        &mut self,
        anchor: NodeId,
        kind: OpKind,
        inputs: Vec<ValueId>,
        output_types: Vec<ValueType>,
    ) -> NodeId {
        let pos = self.position(anchor).map_or(self.order.len(), |p| p + 1);
        self.insert_at(pos, kind, inputs, output_types)
    }

    fn insert_at(
        &mut self,
        pos: usize,
        kind: OpKind,
        inputs: Vec<ValueId>,
        output_types: Vec<ValueType>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        let outputs = output_types
            .into_iter()
            .enumerate()
            .map(|(index, ty)| self.push_value(ty, Producer::Node { node: id, index }))
            .collect();
        self.nodes.push(Node {
            id,
            kind,
            inputs,
            outputs,
            removed: false,
        });
        self.order.insert(pos, id);
        id
    }

    fn push_value(&mut self, ty: ValueType, producer: Producer) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(ValueInfo {
            name: None,
            ty,
            producer,
        });
        id
    }

    /// Uses of a value as `(node, operand index)`, in execution order
    pub fn uses(&self, value: ValueId) -> Vec<(NodeId, usize)> {
        let mut uses = Vec::new();
        for node in self.nodes() {
            for (i, input) in node.inputs.iter().enumerate() {
                if *input == value {
                    uses.push((node.id, i));
                }
            }
        }
        uses
    }

    /// Check if a value is consumed by any live node or returned
    pub fn has_uses(&self, value: ValueId) -> bool {
        self.outputs.contains(&value) || self.nodes().any(|n| n.inputs.contains(&value))
    }

    /// Replace all uses of `old` with `new`, except as an operand of `except`
    pub fn replace_uses_except(&mut self, old: ValueId, new: ValueId, except: NodeId) {
        for &id in &self.order {
            if id == except {
                continue;
            }
            for input in &mut self.nodes[id.0].inputs {
                if *input == old {
                    *input = new;
                }
            }
        }
        for output in &mut self.outputs {
            if *output == old {
                *output = new;
            }
        }
    }

    /// Remove a node from execution order
    pub fn remove_node(&mut self, id: NodeId) {
        self.nodes[id.0].removed = true;
        self.order.retain(|&n| n != id);
    }

    /// Live nodes matching a predicate, in execution order
    pub fn find_nodes<F>(&self, pred: F) -> Vec<NodeId>
    where
        F: Fn(&Node) -> bool,
    {
        self.nodes().filter(|n| pred(n)).map(|n| n.id).collect()
    }

    /// Count live nodes of a given kind by qualified name
    pub fn count_op(&self, qualified_name: &str) -> usize {
        self.nodes()
            .filter(|n| n.kind.qualified_name() == qualified_name)
            .count()
    }
}

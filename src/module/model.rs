//! Module hierarchy arena
//!
//! Modules live in a flat arena and refer to their children by `ModuleId`,
//! so one instance may be reachable through several attribute paths.
//! Qualified dotted paths are derived by walking attributes from the root.

use crate::error::{QuantError, Result};
use crate::ir::{Graph, OpKind, Producer, ValueId};
use crate::observer::Observer;
use crate::tensor::Tensor;
use std::collections::BTreeMap;
use std::fmt;

/// Index of a module in the model arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub usize);

/// Value stored under a module attribute name
#[derive(Clone, Debug)]
pub enum Attribute {
    /// Parameter or buffer
    Tensor(Tensor),
    /// Child module reference
    Module(ModuleId),
    /// Observer state inserted by the prepare pass
    Observer(Observer),
    Float(f32),
    Int(i64),
    IntList(Vec<i64>),
}

/// A module: typed bag of attributes plus method graphs
#[derive(Clone, Debug)]
pub struct ModuleNode {
    type_name: String,
    attributes: BTreeMap<String, Attribute>,
    methods: BTreeMap<String, Graph>,
}

impl ModuleNode {
    /// Create an empty module of type `type_name`
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            attributes: BTreeMap::new(),
            methods: BTreeMap::new(),
        }
    }

    /// Builder-style: add a child module
    pub fn with_submodule(mut self, name: &str, child: ModuleId) -> Self {
        self.attributes
            .insert(name.to_string(), Attribute::Module(child));
        self
    }

    /// Builder-style: add a tensor attribute
    pub fn with_tensor(mut self, name: &str, tensor: Tensor) -> Self {
        self.attributes
            .insert(name.to_string(), Attribute::Tensor(tensor));
        self
    }

    /// Builder-style: add a method
    pub fn with_method(mut self, name: &str, graph: Graph) -> Self {
        self.methods.insert(name.to_string(), graph);
        self
    }

    /// Type name (class) of the module
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Look up an attribute
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Look up an attribute mutably
    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attributes.get_mut(name)
    }

    /// Insert or replace an attribute
    pub fn set_attribute(&mut self, name: impl Into<String>, value: Attribute) {
        self.attributes.insert(name.into(), value);
    }

    /// Remove an attribute, returning it
    pub fn remove_attribute(&mut self, name: &str) -> Option<Attribute> {
        self.attributes.remove(name)
    }

    /// All attributes in name order
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Attribute)> + '_ {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Attribute names starting with `prefix`
    pub fn attrs_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.attributes
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Child modules as `(attribute name, id)`
    pub fn submodules(&self) -> Vec<(&str, ModuleId)> {
        self.attributes
            .iter()
            .filter_map(|(name, attr)| match attr {
                Attribute::Module(id) => Some((name.as_str(), *id)),
                _ => None,
            })
            .collect()
    }

    /// First free attribute name of the form `{prefix}{n}`
    pub fn next_attr_name(&self, prefix: &str) -> String {
        (0..)
            .map(|n| format!("{prefix}{n}"))
            .find(|name| !self.attributes.contains_key(name))
            .unwrap_or_else(|| prefix.to_string())
    }

    /// Look up a method graph
    pub fn method(&self, name: &str) -> Option<&Graph> {
        self.methods.get(name)
    }

    /// Method names in order
    pub fn method_names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    /// Insert or replace a method graph
    pub fn set_method(&mut self, name: impl Into<String>, graph: Graph) {
        self.methods.insert(name.into(), graph);
    }
}

/// Pipeline stage of a model
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// No quantization pass has run
    Float,
    /// Observers inserted, statistics being collected
    Observed,
    /// Quantize/dequantize nodes inserted
    Quantized,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Float => f.write_str("float"),
            Stage::Observed => f.write_str("observed"),
            Stage::Quantized => f.write_str("quantized"),
        }
    }
}

/// Join a parent path and a child attribute name
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}.{child}")
    }
}

/// Module hierarchy with a distinguished root
#[derive(Clone, Debug)]
pub struct Model {
    modules: Vec<ModuleNode>,
    root: ModuleId,
    stage: Stage,
}

impl Model {
    pub(crate) fn from_parts(modules: Vec<ModuleNode>, root: ModuleId) -> Self {
        Self {
            modules,
            root,
            stage: Stage::Float,
        }
    }

    /// Root module id
    pub fn root(&self) -> ModuleId {
        self.root
    }

    /// Current pipeline stage
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    /// Get a module by id
    pub fn module(&self, id: ModuleId) -> &ModuleNode {
        &self.modules[id.0]
    }

    /// Get a mutable module by id
    pub fn module_mut(&mut self, id: ModuleId) -> &mut ModuleNode {
        &mut self.modules[id.0]
    }

    /// Resolve a dotted path (`""` is the root)
    pub fn resolve_path(&self, path: &str) -> Option<ModuleId> {
        if path.is_empty() {
            return Some(self.root);
        }
        path.split('.').try_fold(self.root, |current, name| {
            match self.module(current).attribute(name)? {
                Attribute::Module(child) => Some(*child),
                _ => None,
            }
        })
    }

    fn require_path(&self, path: &str) -> Result<ModuleId> {
        self.resolve_path(path)
            .ok_or_else(|| QuantError::ConfigResolution {
                path: path.to_string(),
                reason: "no such module".to_string(),
            })
    }

    /// Every (path, module) pair reachable from the root, depth first.
    ///
    /// A shared instance appears once per path; cycles are cut.
    pub fn module_paths(&self) -> Vec<(String, ModuleId)> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        self.collect_paths(self.root, String::new(), &mut stack, &mut out);
        out
    }

    fn collect_paths(
        &self,
        id: ModuleId,
        path: String,
        ancestors: &mut Vec<ModuleId>,
        out: &mut Vec<(String, ModuleId)>,
    ) {
        out.push((path.clone(), id));
        for (name, child) in self.module(id).submodules() {
            if ancestors.contains(&child) {
                continue;
            }
            ancestors.push(child);
            self.collect_paths(child, join_path(&path, name), ancestors, out);
            ancestors.pop();
        }
    }

    /// First path at which a module is reachable, for diagnostics
    pub fn display_path(&self, id: ModuleId) -> String {
        self.module_paths()
            .into_iter()
            .find(|(_, m)| *m == id)
            .map(|(p, _)| if p.is_empty() { "<root>".to_string() } else { p })
            .unwrap_or_else(|| format!("<detached {}>", id.0))
    }

    /// Names of the direct submodules of the module at `path`
    pub fn submodule_names(&self, path: &str) -> Result<Vec<String>> {
        let id = self.require_path(path)?;
        Ok(self
            .module(id)
            .submodules()
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect())
    }

    /// Attribute names of the module at `path` starting with `prefix`
    pub fn attrs_with_prefix(&self, path: &str, prefix: &str) -> Result<Vec<String>> {
        let id = self.require_path(path)?;
        Ok(self.module(id).attrs_with_prefix(prefix))
    }

    /// Method graph of the module at `path`
    pub fn method_graph(&self, path: &str, method: &str) -> Result<&Graph> {
        let id = self.require_path(path)?;
        self.module(id)
            .method(method)
            .ok_or_else(|| QuantError::MethodNotFound {
                module: self.display_path(id),
                method: method.to_string(),
            })
    }

    /// All observers, as `(module, attribute name, observer)`
    pub fn observers(&self) -> Vec<(ModuleId, &str, &Observer)> {
        self.modules
            .iter()
            .enumerate()
            .flat_map(|(i, m)| {
                m.attributes().filter_map(move |(name, attr)| match attr {
                    Attribute::Observer(obs) => Some((ModuleId(i), name, obs)),
                    _ => None,
                })
            })
            .collect()
    }

    /// Total number of observer attributes in the model
    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }

    /// Statically resolve a module-typed value of a graph owned by `owner`.
    ///
    /// Follows `prim::GetAttr` chains rooted at `%self`; returns the module
    /// and the attribute chain relative to `owner`.
    pub fn resolve_module_value(
        &self,
        owner: ModuleId,
        graph: &Graph,
        value: ValueId,
    ) -> Option<(ModuleId, Vec<String>)> {
        match graph.value(value).producer {
            Producer::Input(0) => Some((owner, Vec::new())),
            Producer::Input(_) => None,
            Producer::Node { node, .. } => {
                let node = graph.node(node);
                let OpKind::GetAttr(name) = &node.kind else {
                    return None;
                };
                let (parent, mut chain) =
                    self.resolve_module_value(owner, graph, *node.inputs.first()?)?;
                match self.module(parent).attribute(name)? {
                    Attribute::Module(child) => {
                        chain.push(name.clone());
                        Some((*child, chain))
                    }
                    _ => None,
                }
            }
        }
    }

    /// Resolve an observer-typed value to `(owning module, attribute name)`
    pub fn resolve_observer_value(
        &self,
        owner: ModuleId,
        graph: &Graph,
        value: ValueId,
    ) -> Option<(ModuleId, String)> {
        let node = graph.node(graph.producer_node(value)?);
        let OpKind::GetAttr(name) = &node.kind else {
            return None;
        };
        let (module, _) = self.resolve_module_value(owner, graph, *node.inputs.first()?)?;
        match self.module(module).attribute(name)? {
            Attribute::Observer(_) => Some((module, name.clone())),
            _ => None,
        }
    }

    /// Check that every `prim::CallMethod` on a module resolves to a method
    pub fn validate_calls(&self) -> Result<()> {
        for (i, module) in self.modules.iter().enumerate() {
            let owner = ModuleId(i);
            for name in module.method_names() {
                let Some(graph) = module.method(&name) else {
                    continue;
                };
                for node in graph.nodes() {
                    let OpKind::CallMethod(method) = &node.kind else {
                        continue;
                    };
                    let receiver = node.inputs.first().copied();
                    let resolved = receiver.and_then(|r| {
                        self.resolve_module_value(owner, graph, r)
                            .map(|(m, _)| self.module(m).method(method).is_some())
                            .or_else(|| self.resolve_observer_value(owner, graph, r).map(|_| true))
                    });
                    if resolved != Some(true) {
                        return Err(QuantError::UnresolvedCallee {
                            method: method.clone(),
                            location: format!("{}.{name}", module.type_name()),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

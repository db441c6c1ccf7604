//! Static call graph traversal

use crate::error::{QuantError, Result};
use crate::ir::{Graph, Node, OpKind};
use crate::module::{Model, ModuleId};
use std::collections::HashSet;

/// Callee of a `prim::CallMethod` on a module receiver.
///
/// `Ok(None)` for calls on observers; an error when the receiver cannot be
/// resolved statically.
pub(crate) fn module_callee(
    model: &Model,
    owner: ModuleId,
    graph: &Graph,
    node: &Node,
) -> Result<Option<(ModuleId, String)>> {
    let OpKind::CallMethod(method) = &node.kind else {
        return Ok(None);
    };
    let unresolved = || QuantError::UnresolvedCallee {
        method: method.clone(),
        location: model.display_path(owner),
    };
    let receiver = *node.inputs.first().ok_or_else(unresolved)?;
    if let Some((callee, _)) = model.resolve_module_value(owner, graph, receiver) {
        if model.module(callee).method(method).is_none() {
            return Err(QuantError::MethodNotFound {
                module: model.display_path(callee),
                method: method.clone(),
            });
        }
        return Ok(Some((callee, method.clone())));
    }
    if model.resolve_observer_value(owner, graph, receiver).is_some() {
        return Ok(None);
    }
    Err(unresolved())
}

/// Every `(module, method)` reachable from `root.method`, callers first
pub fn reachable_methods(model: &Model, method: &str) -> Result<Vec<(ModuleId, String)>> {
    let root = model.root();
    if model.module(root).method(method).is_none() {
        return Err(QuantError::MethodNotFound {
            module: model.display_path(root),
            method: method.to_string(),
        });
    }

    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![(root, method.to_string())];
    while let Some(key) = stack.pop() {
        if !seen.insert(key.clone()) {
            continue;
        }
        let (module, name) = &key;
        if let Some(graph) = model.module(*module).method(name) {
            let mut callees = Vec::new();
            for node in graph.nodes() {
                if let Some(callee) = module_callee(model, *module, graph, node)? {
                    callees.push(callee);
                }
            }
            stack.extend(callees.into_iter().rev());
        }
        order.push(key);
    }
    Ok(order)
}

//! Observer insertion
//!
//! Methods are processed callee-first. Each quantizable op asks for its
//! activation (argument 0) and weight (argument 1) to be observed. A value
//! defined in the current graph is observed right after its definition; a
//! value that is a method input is handed to the caller as a boundary
//! request, which maps it onto the call-site argument. At the entry method
//! inputs are observed at the top of the graph. The net effect is that every
//! activation is observed at its outermost call site.

use super::calls::module_callee;
use super::{PassReport, OBSERVER_PREFIX};
use crate::config::{same_config, QConfigDict, QConfigRef};
use crate::error::{QuantError, Result};
use crate::ir::{Graph, Node, NodeId, OpKind, Producer, ValueId, ValueType};
use crate::module::{Attribute, Model, ModuleId, Stage};
use crate::observer::{Observer, ObserverPurpose};
use crate::tensor::DType;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

type MethodKey = (ModuleId, String);

/// A value of the current graph that needs an observer
#[derive(Clone, Debug)]
struct Request {
    value: ValueId,
    purpose: ObserverPurpose,
    qconfig: QConfigRef,
}

/// Observation a method delegates to its callers, by graph input position
#[derive(Clone, Debug)]
struct BoundaryRequest {
    input: usize,
    purpose: ObserverPurpose,
    qconfig: QConfigRef,
}

pub(super) fn run(
    model: &mut Model,
    method: &str,
    qconfig_dict: &QConfigDict,
    is_dynamic: bool,
) -> Result<PassReport> {
    if model.stage() != Stage::Float {
        return Err(QuantError::DoubleInstrumentation {
            target: format!("model in {} stage", model.stage()),
        });
    }
    if !is_dynamic {
        return Err(QuantError::UnsupportedScheme {
            scheme: "static activation quantization".to_string(),
        });
    }
    qconfig_dict.validate(model)?;
    for path in qconfig_dict.paths() {
        let Some(qconfig) = qconfig_dict.resolve(path) else {
            continue;
        };
        if qconfig.activation.scheme.is_per_channel() {
            return Err(QuantError::UnsupportedScheme {
                scheme: format!(
                    "{} activations (qconfig for '{path}')",
                    qconfig.activation.scheme.name()
                ),
            });
        }
        if qconfig.activation.dtype != DType::QUInt8 {
            return Err(QuantError::UnsupportedScheme {
                scheme: format!(
                    "{} dynamic activations (qconfig for '{path}'), only quint8 is chosen at runtime",
                    qconfig.activation.dtype
                ),
            });
        }
    }

    let mut configs = HashMap::new();
    for (path, id) in model.module_paths() {
        if let Some(qconfig) = qconfig_dict.resolve(&path) {
            configs.entry(id).or_insert_with(|| Arc::clone(qconfig));
        }
    }

    let root = model.root();
    let mut inserter = ObserverInserter {
        model,
        configs,
        entry: (root, method.to_string()),
        summaries: HashMap::new(),
        in_progress: HashSet::new(),
        report: PassReport::default(),
    };
    inserter.process(root, method)?;
    inserter.model.set_stage(Stage::Observed);

    let report = inserter.report;
    info!(
        method,
        activation = report.activation_observers,
        weight = report.weight_observers,
        "inserted observers"
    );
    Ok(report)
}

struct ObserverInserter<'a> {
    model: &'a mut Model,
    /// Resolved qconfig per module instance
    configs: HashMap<ModuleId, QConfigRef>,
    entry: MethodKey,
    summaries: HashMap<MethodKey, Vec<BoundaryRequest>>,
    in_progress: HashSet<MethodKey>,
    report: PassReport,
}

impl ObserverInserter<'_> {
    fn process(&mut self, module: ModuleId, method: &str) -> Result<Vec<BoundaryRequest>> {
        let key = (module, method.to_string());
        if let Some(summary) = self.summaries.get(&key) {
            return Ok(summary.clone());
        }
        if !self.in_progress.insert(key.clone()) {
            return Err(QuantError::execution(
                "prim::CallMethod",
                format!(
                    "recursive call to {}.{method} cannot be instrumented",
                    self.model.display_path(module)
                ),
            ));
        }

        let mut graph = self
            .model
            .module(module)
            .method(method)
            .cloned()
            .ok_or_else(|| QuantError::MethodNotFound {
                module: self.model.display_path(module),
                method: method.to_string(),
            })?;

        let requests = self.collect_requests(module, &graph)?;
        let is_entry = key == self.entry;
        let summary = self.apply(module, method, &mut graph, requests, is_entry)?;

        self.model.module_mut(module).set_method(method, graph);
        self.in_progress.remove(&key);
        self.summaries.insert(key, summary.clone());
        Ok(summary)
    }

    /// Walk the graph in order, gathering local and callee requests
    fn collect_requests(&mut self, module: ModuleId, graph: &Graph) -> Result<Vec<Request>> {
        let qconfig = self.configs.get(&module).cloned();
        let mut requests = Vec::new();

        for node in graph.nodes() {
            if node.kind.is_quantizable() {
                if let Some(qconfig) = &qconfig {
                    for (index, purpose) in [
                        (0, ObserverPurpose::Activation),
                        (1, ObserverPurpose::Weight),
                    ] {
                        if let Some(value) = self.tensor_operand(module, graph, node, index) {
                            requests.push(Request {
                                value,
                                purpose,
                                qconfig: Arc::clone(qconfig),
                            });
                        }
                    }
                }
                continue;
            }

            if let (OpKind::CallMethod(_), Some(&receiver)) = (&node.kind, node.inputs.first()) {
                if self
                    .model
                    .resolve_observer_value(module, graph, receiver)
                    .is_some()
                {
                    return Err(QuantError::DoubleInstrumentation {
                        target: format!(
                            "{} (existing observer call)",
                            self.model.display_path(module)
                        ),
                    });
                }
            }

            let Some((callee, callee_method)) = module_callee(self.model, module, graph, node)?
            else {
                continue;
            };
            for boundary in self.process(callee, &callee_method)? {
                let value = node.inputs.get(boundary.input).copied().ok_or_else(|| {
                    QuantError::execution(
                        "prim::CallMethod",
                        format!(
                            "call to '{callee_method}' passes no argument {}",
                            boundary.input
                        ),
                    )
                })?;
                requests.push(Request {
                    value,
                    purpose: boundary.purpose,
                    qconfig: boundary.qconfig,
                });
            }
        }
        Ok(requests)
    }

    fn tensor_operand(
        &self,
        module: ModuleId,
        graph: &Graph,
        node: &Node,
        index: usize,
    ) -> Option<ValueId> {
        let value = node.inputs.get(index).copied()?;
        if graph.value(value).ty == ValueType::Tensor {
            return Some(value);
        }
        warn!(
            module = %self.model.display_path(module),
            op = node.kind.qualified_name(),
            operand = index,
            ty = %graph.value(value).ty,
            "skipping non-tensor operand of quantizable op"
        );
        None
    }

    /// Place observers for local values, return the rest as boundary requests
    fn apply(
        &mut self,
        module: ModuleId,
        method: &str,
        graph: &mut Graph,
        requests: Vec<Request>,
        is_entry: bool,
    ) -> Result<Vec<BoundaryRequest>> {
        let mut seen: HashMap<ValueId, QConfigRef> = HashMap::new();
        let mut boundary = Vec::new();
        let mut entry_cursor: Option<NodeId> = None;

        for request in requests {
            match seen.get(&request.value) {
                Some(existing) if same_config(Some(existing), Some(&request.qconfig)) => continue,
                Some(_) => {
                    return Err(QuantError::DoubleInstrumentation {
                        target: format!(
                            "{} in {}.{method} (requested with two different qconfigs)",
                            graph.value_display_name(request.value),
                            self.model.display_path(module)
                        ),
                    });
                }
                None => {
                    seen.insert(request.value, Arc::clone(&request.qconfig));
                }
            }

            match graph.value(request.value).producer {
                Producer::Node { node, .. } => {
                    self.insert_observer(module, graph, &request, Some(node))?;
                }
                Producer::Input(0) => {
                    return Err(QuantError::execution(
                        "prim::CallMethod",
                        format!("cannot observe the receiver of {method}"),
                    ));
                }
                Producer::Input(_) if is_entry => {
                    let call = self.insert_observer(module, graph, &request, entry_cursor)?;
                    entry_cursor = Some(call);
                }
                Producer::Input(input) => boundary.push(BoundaryRequest {
                    input,
                    purpose: request.purpose,
                    qconfig: request.qconfig,
                }),
            }
        }
        Ok(boundary)
    }

    /// Attach a new observer attribute to `module` and call it on the value.
    ///
    /// Nodes go right after `after`, or at the top of the graph. Returns the
    /// observer call node.
    fn insert_observer(
        &mut self,
        module: ModuleId,
        graph: &mut Graph,
        request: &Request,
        after: Option<NodeId>,
    ) -> Result<NodeId> {
        let spec = match request.purpose {
            ObserverPurpose::Activation => request.qconfig.activation.clone(),
            ObserverPurpose::Weight => request.qconfig.weight.clone(),
        };
        let class = spec.class_name();
        let this = *graph.inputs().first().ok_or_else(|| {
            QuantError::execution("prim::GetAttr", "method graph has no receiver")
        })?;

        let owner = self.model.module_mut(module);
        let name = owner.next_attr_name(OBSERVER_PREFIX);
        owner.set_attribute(
            name.clone(),
            Attribute::Observer(Observer::new(spec, request.purpose)),
        );

        let kind = OpKind::GetAttr(name.clone());
        let types = vec![ValueType::Observer(class.to_string())];
        let getter = match after {
            Some(anchor) => graph.insert_after(anchor, kind, vec![this], types),
            None => graph.insert_at_start(kind, vec![this], types),
        };
        let observer = graph.node(getter).output();
        graph.set_value_name(observer, name.clone());

        let call = graph.insert_after(
            getter,
            OpKind::CallMethod("forward".to_string()),
            vec![observer, request.value],
            vec![ValueType::Tensor],
        );
        let observed = graph.node(call).output();
        if let Some(hint) = graph.value(request.value).name.clone() {
            graph.set_value_name(observed, hint);
        }
        graph.replace_uses_except(request.value, observed, call);

        match request.purpose {
            ObserverPurpose::Activation => self.report.activation_observers += 1,
            ObserverPurpose::Weight => self.report.weight_observers += 1,
        }
        debug!(
            module = %self.model.display_path(module),
            observer = %name,
            class,
            purpose = ?request.purpose,
            value = %graph.value_display_name(request.value),
            "inserted observer"
        );
        Ok(call)
    }
}

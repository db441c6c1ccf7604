//! Quantize/dequantize insertion
//!
//! Each observer call `y = observer.forward(v)` becomes
//! `q = quantize(v, qparams...)` placed where the observer call was, plus
//! `dq = dequantize(q)` right before the first consumer of `y`. Weight
//! parameters are precomputed and stored as module attributes; dynamic
//! activation parameters come from `aten::_choose_qparams_per_tensor` at
//! runtime. Observer nodes and attributes are removed afterwards.

use super::calls::reachable_methods;
use super::PassReport;
use crate::error::{QuantError, Result};
use crate::ir::{Constant, Graph, NodeId, OpKind, ValueId, ValueType};
use crate::module::{Attribute, Model, ModuleId, ModuleNode, Stage};
use crate::qparams::{calculate_qparams, QParams};
use ndarray::Array1;
use tracing::{debug, info};

pub(super) fn run(model: &mut Model, method: &str, is_dynamic: bool) -> Result<PassReport> {
    match model.stage() {
        Stage::Observed => {}
        Stage::Float => {
            return Err(QuantError::PassOrdering {
                pass: "insert_quant_dequant",
                stage: Stage::Float.to_string(),
                hint: "Run insert_observers and calibrate with run_forward first",
            });
        }
        Stage::Quantized => {
            return Err(QuantError::PassOrdering {
                pass: "insert_quant_dequant",
                stage: Stage::Quantized.to_string(),
                hint: "The model is already quantized; start again from the float model",
            });
        }
    }
    if !is_dynamic {
        return Err(QuantError::UnsupportedScheme {
            scheme: "static activation quantization".to_string(),
        });
    }

    let mut report = PassReport::default();
    let mut retired: Vec<(ModuleId, String)> = Vec::new();
    for (module, name) in reachable_methods(model, method)? {
        let Some(mut graph) = model.module(module).method(&name).cloned() else {
            continue;
        };
        rewrite_graph(model, module, &mut graph, is_dynamic, &mut report, &mut retired)?;
        model.module_mut(module).set_method(name, graph);
    }

    for (module, name) in retired {
        if model.module_mut(module).remove_attribute(&name).is_some() {
            report.removed_observers += 1;
        }
    }
    model.set_stage(Stage::Quantized);

    info!(
        method,
        rewritten = report.rewritten_edges,
        dynamic = report.dynamic_edges,
        removed = report.removed_observers,
        "inserted quant/dequant"
    );
    Ok(report)
}

fn rewrite_graph(
    model: &mut Model,
    module: ModuleId,
    graph: &mut Graph,
    is_dynamic: bool,
    report: &mut PassReport,
    retired: &mut Vec<(ModuleId, String)>,
) -> Result<()> {
    for call in graph.node_ids() {
        let node = graph.node(call);
        if !matches!(node.kind, OpKind::CallMethod(_)) {
            continue;
        }
        let Some(&receiver) = node.inputs.first() else {
            continue;
        };
        let Some((obs_module, obs_name)) = model.resolve_observer_value(module, graph, receiver)
        else {
            continue;
        };
        let value = node.inputs.get(1).copied().ok_or_else(|| {
            QuantError::execution("prim::CallMethod", format!("observer '{obs_name}' called without input"))
        })?;
        let observed = node.output();
        let getter = graph.producer_node(receiver);
        let owner_value = getter
            .and_then(|g| graph.node(g).inputs.first().copied())
            .ok_or_else(|| {
                QuantError::execution("prim::GetAttr", format!("observer '{obs_name}' has no owner"))
            })?;

        let path = model.display_path(obs_module);
        let qparams = match model.module(obs_module).attribute(&obs_name) {
            Some(Attribute::Observer(obs)) => calculate_qparams(obs, is_dynamic, &path, &obs_name)?,
            _ => {
                return Err(QuantError::AttributeNotFound {
                    module: path,
                    name: obs_name,
                })
            }
        };

        let quantized = emit_quantize(
            model.module_mut(obs_module),
            graph,
            call,
            owner_value,
            value,
            &qparams,
        );

        let dequant = match graph.uses(observed).first() {
            Some(&(consumer, _)) => {
                graph.insert_before(consumer, OpKind::Dequantize, vec![quantized], vec![ValueType::Tensor])
            }
            None => graph.insert_after(call, OpKind::Dequantize, vec![quantized], vec![ValueType::Tensor]),
        };
        let dequantized = graph.node(dequant).output();
        if let Some(hint) = graph.value(value).name.clone() {
            graph.set_value_name(dequantized, hint);
        }
        graph.replace_uses_except(observed, dequantized, dequant);

        graph.remove_node(call);
        if let Some(getter) = getter {
            if !graph.has_uses(receiver) {
                graph.remove_node(getter);
            }
        }

        report.rewritten_edges += 1;
        if matches!(qparams, QParams::Dynamic { .. }) {
            report.dynamic_edges += 1;
        }
        debug!(
            module = %path,
            observer = %obs_name,
            qparams = ?qparams,
            "replaced observer with quant/dequant"
        );
        retired.push((obs_module, obs_name));
    }
    Ok(())
}

/// First `n` such that `{prefix}{n}` is free for every prefix
fn free_index(module: &ModuleNode, prefixes: &[&str]) -> usize {
    (0..)
        .find(|n| {
            prefixes
                .iter()
                .all(|p| module.attribute(&format!("{p}{n}")).is_none())
        })
        .unwrap_or(0)
}

/// Insert the quantize sequence for `value` directly before `anchor`.
///
/// Stored parameters are attached to `owner` and read through
/// `owner_value`. Returns the quantized value.
fn emit_quantize(
    owner: &mut ModuleNode,
    graph: &mut Graph,
    anchor: NodeId,
    owner_value: ValueId,
    value: ValueId,
    qparams: &QParams,
) -> ValueId {
    let insert = |graph: &mut Graph, kind: OpKind, inputs: Vec<ValueId>, types: Vec<ValueType>| {
        let id = graph.insert_before(anchor, kind, inputs, types);
        graph.node(id).outputs.clone()
    };
    let constant = |graph: &mut Graph, c: Constant| {
        let ty = c.value_type();
        graph.insert_before(anchor, OpKind::Constant(c), vec![], vec![ty])
    };
    let get_attr = |graph: &mut Graph, name: &str, ty: ValueType| {
        let id = graph.insert_before(anchor, OpKind::GetAttr(name.to_string()), vec![owner_value], vec![ty]);
        let out = graph.node(id).output();
        graph.set_value_name(out, name);
        out
    };

    let quantize = match qparams {
        QParams::Dynamic { dtype, reduce_range } => {
            let reduce = constant(graph, Constant::Bool(*reduce_range));
            let reduce = graph.node(reduce).output();
            let chosen = insert(
                graph,
                OpKind::ChooseQParamsPerTensor,
                vec![value, reduce],
                vec![ValueType::Float, ValueType::Int],
            );
            let dtype = constant(graph, Constant::DType(*dtype));
            let dtype = graph.node(dtype).output();
            insert(
                graph,
                OpKind::QuantizePerTensor,
                vec![value, chosen[0], chosen[1], dtype],
                vec![ValueType::Tensor],
            )
        }
        QParams::PerTensor {
            scale,
            zero_point,
            dtype,
        } => {
            let k = free_index(owner, &["_scale_", "_zero_point_"]);
            let scale_name = format!("_scale_{k}");
            let zp_name = format!("_zero_point_{k}");
            owner.set_attribute(scale_name.clone(), Attribute::Float(*scale));
            owner.set_attribute(zp_name.clone(), Attribute::Int(i64::from(*zero_point)));

            let scale = get_attr(graph, &scale_name, ValueType::Float);
            let zero_point = get_attr(graph, &zp_name, ValueType::Int);
            let dtype = constant(graph, Constant::DType(*dtype));
            let dtype = graph.node(dtype).output();
            insert(
                graph,
                OpKind::QuantizePerTensor,
                vec![value, scale, zero_point, dtype],
                vec![ValueType::Tensor],
            )
        }
        QParams::PerChannel {
            scales,
            zero_points,
            axis,
            dtype,
        } => {
            let k = free_index(owner, &["_scales_", "_zero_points_"]);
            let scales_name = format!("_scales_{k}");
            let zps_name = format!("_zero_points_{k}");
            owner.set_attribute(
                scales_name.clone(),
                Attribute::Tensor(Array1::from(scales.clone()).into_dyn()),
            );
            owner.set_attribute(
                zps_name.clone(),
                Attribute::IntList(zero_points.iter().map(|&z| i64::from(z)).collect()),
            );

            let scales = get_attr(graph, &scales_name, ValueType::Tensor);
            let zero_points = get_attr(graph, &zps_name, ValueType::IntList);
            let axis = constant(graph, Constant::Int(*axis as i64));
            let axis = graph.node(axis).output();
            let dtype = constant(graph, Constant::DType(*dtype));
            let dtype = graph.node(dtype).output();
            insert(
                graph,
                OpKind::QuantizePerChannel,
                vec![value, scales, zero_points, axis, dtype],
                vec![ValueType::Tensor],
            )
        }
    };
    quantize[0]
}

//! Graph interpreter
//!
//! Executes method graphs node by node against a mutable model. Calls on an
//! observer feed the tensor into the observer's statistics and return it
//! unchanged, which is how calibration happens.

use super::ops::{self, Conv2dParams};
use super::value::Value;
use crate::error::{QuantError, Result};
use crate::ir::{Constant, Graph, Node, OpKind};
use crate::module::{Attribute, Model, ModuleId};
use crate::qparams::{choose_qparams_per_tensor, dequantize, quantize_per_channel, quantize_per_tensor};
use crate::tensor::Tensor;
use tracing::trace;

const MAX_CALL_DEPTH: usize = 256;

/// Interpreter bound to one model
pub struct Interpreter<'m> {
    model: &'m mut Model,
    depth: usize,
}

impl<'m> Interpreter<'m> {
    pub fn new(model: &'m mut Model) -> Self {
        Self { model, depth: 0 }
    }

    /// Run `module.method(args...)`; `self` is bound implicitly
    pub fn call_method(&mut self, module: ModuleId, method: &str, args: Vec<Value>) -> Result<Value> {
        let graph = self
            .model
            .module(module)
            .method(method)
            .cloned()
            .ok_or_else(|| QuantError::MethodNotFound {
                module: self.model.display_path(module),
                method: method.to_string(),
            })?;

        if self.depth >= MAX_CALL_DEPTH {
            return Err(QuantError::execution(
                "prim::CallMethod",
                format!("call depth exceeded {MAX_CALL_DEPTH} at '{method}'"),
            ));
        }
        self.depth += 1;
        let result = self.run_graph(&graph, module, args);
        self.depth -= 1;
        result
    }

    fn run_graph(&mut self, graph: &Graph, module: ModuleId, args: Vec<Value>) -> Result<Value> {
        let expected = graph.inputs().len().saturating_sub(1);
        if args.len() != expected {
            return Err(QuantError::execution(
                "prim::CallMethod",
                format!("expected {expected} arguments, got {}", args.len()),
            ));
        }

        let Some((receiver, params)) = graph.inputs().split_first() else {
            return Err(QuantError::execution("prim::CallMethod", "method graph has no receiver"));
        };
        let mut env: Vec<Option<Value>> = Vec::new();
        bind(&mut env, receiver.0, Value::Module(module));
        for (v, arg) in params.iter().zip(args) {
            bind(&mut env, v.0, arg);
        }

        for node in graph.nodes() {
            let operands = node
                .inputs
                .iter()
                .map(|v| {
                    env.get(v.0).cloned().flatten().ok_or_else(|| {
                        QuantError::execution(
                            node.kind.qualified_name(),
                            format!("operand {} used before definition", graph.value_display_name(*v)),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let results = self.eval(node, operands)?;
            if results.len() != node.outputs.len() {
                return Err(QuantError::execution(
                    node.kind.qualified_name(),
                    format!("produced {} values for {} outputs", results.len(), node.outputs.len()),
                ));
            }
            for (out, value) in node.outputs.iter().zip(results) {
                bind(&mut env, out.0, value);
            }
        }

        match graph.outputs() {
            [] => Ok(Value::None),
            [out, ..] => env
                .get(out.0)
                .cloned()
                .flatten()
                .ok_or_else(|| QuantError::execution("return", "returned value never defined")),
        }
    }

    fn eval(&mut self, node: &Node, args: Vec<Value>) -> Result<Vec<Value>> {
        let op = node.kind.qualified_name();
        let arg = |i: usize| {
            args.get(i)
                .ok_or_else(|| QuantError::execution(op, format!("missing operand {i}")))
        };

        let value = match &node.kind {
            OpKind::Constant(c) => constant_value(c),
            OpKind::GetAttr(name) => self.get_attr(arg(0)?, name)?,
            OpKind::CallMethod(method) => match arg(0)? {
                Value::Module(target) => {
                    let target = *target;
                    self.call_method(target, method, args[1..].to_vec())?
                }
                Value::Observer { module, name } => {
                    let input = arg(1)?.as_tensor(op)?.clone();
                    self.observe(*module, name, &input)?;
                    Value::Tensor(input)
                }
                other => {
                    return Err(QuantError::execution(
                        op,
                        format!("cannot call '{method}' on {}", other.kind()),
                    ))
                }
            },
            OpKind::CallFunction(name) => match name.as_str() {
                "linear" => Value::Tensor(eval_linear(op, &args)?),
                "relu" => Value::Tensor(ops::relu(arg(0)?.as_tensor(op)?)),
                other => {
                    return Err(QuantError::execution(op, format!("unknown function '{other}'")))
                }
            },
            OpKind::Linear => Value::Tensor(eval_linear(op, &args)?),
            OpKind::Conv2d => {
                let params = Conv2dParams {
                    stride: ops::int_pair(op, arg(3)?.as_int_list(op)?)?,
                    padding: ops::int_pair(op, arg(4)?.as_int_list(op)?)?,
                    dilation: ops::int_pair(op, arg(5)?.as_int_list(op)?)?,
                    groups: usize::try_from(arg(6)?.as_int(op)?)
                        .map_err(|_| QuantError::execution(op, "negative groups"))?,
                };
                Value::Tensor(ops::conv2d(
                    arg(0)?.as_tensor(op)?,
                    arg(1)?.as_tensor(op)?,
                    arg(2)?.as_optional_tensor(op)?,
                    params,
                )?)
            }
            OpKind::Relu => Value::Tensor(ops::relu(arg(0)?.as_tensor(op)?)),
            OpKind::Add => Value::Tensor(ops::add(arg(0)?.as_tensor(op)?, arg(1)?.as_tensor(op)?)?),
            OpKind::ChooseQParamsPerTensor => {
                let (scale, zero_point) =
                    choose_qparams_per_tensor(arg(0)?.as_tensor(op)?, arg(1)?.as_bool(op)?);
                return Ok(vec![
                    Value::Float(f64::from(scale)),
                    Value::Int(i64::from(zero_point)),
                ]);
            }
            OpKind::QuantizePerTensor => {
                let zero_point = i32::try_from(arg(2)?.as_int(op)?)
                    .map_err(|_| QuantError::execution(op, "zero point out of range"))?;
                Value::QTensor(quantize_per_tensor(
                    arg(0)?.as_tensor(op)?,
                    arg(1)?.as_float(op)? as f32,
                    zero_point,
                    arg(3)?.as_dtype(op)?,
                ))
            }
            OpKind::QuantizePerChannel => {
                let scales: Vec<f32> = arg(1)?.as_tensor(op)?.iter().copied().collect();
                let zero_points = arg(2)?
                    .as_int_list(op)?
                    .iter()
                    .map(|&z| i32::try_from(z))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|_| QuantError::execution(op, "zero point out of range"))?;
                let axis = usize::try_from(arg(3)?.as_int(op)?)
                    .map_err(|_| QuantError::execution(op, "negative axis"))?;
                Value::QTensor(quantize_per_channel(
                    arg(0)?.as_tensor(op)?,
                    &scales,
                    &zero_points,
                    axis,
                    arg(4)?.as_dtype(op)?,
                )?)
            }
            OpKind::Dequantize => Value::Tensor(dequantize(arg(0)?.as_qtensor(op)?)),
        };
        Ok(vec![value])
    }

    fn get_attr(&self, owner: &Value, name: &str) -> Result<Value> {
        let Value::Module(owner) = owner else {
            return Err(QuantError::execution(
                "prim::GetAttr",
                format!("cannot read '{name}' from {}", owner.kind()),
            ));
        };
        let attr = self
            .model
            .module(*owner)
            .attribute(name)
            .ok_or_else(|| QuantError::AttributeNotFound {
                module: self.model.display_path(*owner),
                name: name.to_string(),
            })?;
        Ok(match attr {
            Attribute::Tensor(t) => Value::Tensor(t.clone()),
            Attribute::Module(id) => Value::Module(*id),
            Attribute::Observer(_) => Value::Observer {
                module: *owner,
                name: name.to_string(),
            },
            Attribute::Float(v) => Value::Float(f64::from(*v)),
            Attribute::Int(v) => Value::Int(*v),
            Attribute::IntList(v) => Value::IntList(v.clone()),
        })
    }

    fn observe(&mut self, module: ModuleId, name: &str, tensor: &Tensor) -> Result<()> {
        if let Some(Attribute::Observer(obs)) = self.model.module_mut(module).attribute_mut(name) {
            obs.observe(tensor)?;
            trace!(module = module.0, observer = name, batches = obs.num_batches(), "observed tensor");
            return Ok(());
        }
        Err(QuantError::AttributeNotFound {
            module: self.model.display_path(module),
            name: name.to_string(),
        })
    }
}

fn bind(env: &mut Vec<Option<Value>>, id: usize, value: Value) {
    if env.len() <= id {
        env.resize(id + 1, None);
    }
    env[id] = Some(value);
}

fn eval_linear(op: &str, args: &[Value]) -> Result<Tensor> {
    let get = |i: usize| {
        args.get(i)
            .ok_or_else(|| QuantError::execution(op, format!("missing operand {i}")))
    };
    let bias = match args.get(2) {
        Some(v) => v.as_optional_tensor(op)?,
        None => None,
    };
    ops::linear(get(0)?.as_tensor(op)?, get(1)?.as_tensor(op)?, bias)
}

fn constant_value(c: &Constant) -> Value {
    match c {
        Constant::Float(v) => Value::Float(*v),
        Constant::Int(v) => Value::Int(*v),
        Constant::Bool(v) => Value::Bool(*v),
        Constant::IntList(v) => Value::IntList(v.clone()),
        Constant::DType(d) => Value::DType(*d),
        Constant::None => Value::None,
    }
}

/// Run `method` of the root module; observers met along the way record
/// statistics
pub fn run_forward(model: &mut Model, method: &str, inputs: Vec<Value>) -> Result<Value> {
    let root = model.root();
    Interpreter::new(model).call_method(root, method, inputs)
}

/// Run the root `forward` on a single tensor
pub fn forward(model: &mut Model, input: &Tensor) -> Result<Tensor> {
    run_forward(model, "forward", vec![Value::Tensor(input.clone())])?.into_tensor("forward")
}

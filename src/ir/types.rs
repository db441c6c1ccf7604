//! Node kinds, constants and value types of the graph IR

use crate::tensor::DType;
use std::fmt;

/// Static type of a graph value
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Tensor,
    Float,
    Int,
    Bool,
    IntList,
    DType,
    None,
    /// Module instance, carrying its type name
    Module(String),
    /// Observer attribute, carrying its class name (e.g. `MinMaxObserver`)
    Observer(String),
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Tensor => f.write_str("Tensor"),
            ValueType::Float => f.write_str("float"),
            ValueType::Int => f.write_str("int"),
            ValueType::Bool => f.write_str("bool"),
            ValueType::IntList => f.write_str("int[]"),
            ValueType::DType => f.write_str("ScalarType"),
            ValueType::None => f.write_str("NoneType"),
            ValueType::Module(name) | ValueType::Observer(name) => f.write_str(name),
        }
    }
}

/// Literal embedded in a `prim::Constant` node
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Float(f64),
    Int(i64),
    Bool(bool),
    IntList(Vec<i64>),
    DType(DType),
    None,
}

impl Constant {
    /// Type of the value this constant produces
    pub fn value_type(&self) -> ValueType {
        match self {
            Constant::Float(_) => ValueType::Float,
            Constant::Int(_) => ValueType::Int,
            Constant::Bool(_) => ValueType::Bool,
            Constant::IntList(_) => ValueType::IntList,
            Constant::DType(_) => ValueType::DType,
            Constant::None => ValueType::None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Float(v) => write!(f, "{v:?}"),
            Constant::Int(v) => write!(f, "{v}"),
            Constant::Bool(v) => write!(f, "{}", u8::from(*v)),
            Constant::IntList(v) => {
                let items: Vec<String> = v.iter().map(i64::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Constant::DType(d) => write!(f, "{d}"),
            Constant::None => f.write_str("None"),
        }
    }
}

/// Operation performed by a node
#[derive(Clone, Debug, PartialEq)]
pub enum OpKind {
    /// `prim::Constant`
    Constant(Constant),
    /// `prim::GetAttr[name=...]`; input 0 is the owning module
    GetAttr(String),
    /// `prim::CallMethod[name=...]`; input 0 is the receiver
    CallMethod(String),
    /// `prim::CallFunction[name=...]` of a builtin function
    CallFunction(String),
    /// `aten::linear(input, weight, bias)`
    Linear,
    /// `aten::conv2d(input, weight, bias, stride, padding, dilation, groups)`
    Conv2d,
    /// `aten::relu(input)`
    Relu,
    /// `aten::add(a, b)`
    Add,
    /// `aten::quantize_per_tensor(input, scale, zero_point, dtype)`
    QuantizePerTensor,
    /// `aten::quantize_per_channel(input, scales, zero_points, axis, dtype)`
    QuantizePerChannel,
    /// `aten::dequantize(qtensor)`
    Dequantize,
    /// `aten::_choose_qparams_per_tensor(input, reduce_range) -> (scale, zero_point)`
    ChooseQParamsPerTensor,
}

impl OpKind {
    /// Qualified operator name as shown in graph dumps
    pub fn qualified_name(&self) -> &'static str {
        match self {
            OpKind::Constant(_) => "prim::Constant",
            OpKind::GetAttr(_) => "prim::GetAttr",
            OpKind::CallMethod(_) => "prim::CallMethod",
            OpKind::CallFunction(_) => "prim::CallFunction",
            OpKind::Linear => "aten::linear",
            OpKind::Conv2d => "aten::conv2d",
            OpKind::Relu => "aten::relu",
            OpKind::Add => "aten::add",
            OpKind::QuantizePerTensor => "aten::quantize_per_tensor",
            OpKind::QuantizePerChannel => "aten::quantize_per_channel",
            OpKind::Dequantize => "aten::dequantize",
            OpKind::ChooseQParamsPerTensor => "aten::_choose_qparams_per_tensor",
        }
    }

    /// True for ops whose argument 0 is an activation and argument 1 a weight
    pub fn is_quantizable(&self) -> bool {
        match self {
            OpKind::Linear | OpKind::Conv2d => true,
            OpKind::CallFunction(name) => name == "linear",
            _ => false,
        }
    }

    /// True for nodes introduced by the quant/dequant rewrite
    pub fn is_quant_op(&self) -> bool {
        matches!(
            self,
            OpKind::QuantizePerTensor
                | OpKind::QuantizePerChannel
                | OpKind::Dequantize
                | OpKind::ChooseQParamsPerTensor
        )
    }
}

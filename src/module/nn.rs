//! Standard layers and model assembly
//!
//! Builds modules with the same method graphs a scripting front end emits:
//! - `Linear.forward` reads `weight`/`bias` and calls the builtin `linear`
//! - `Conv2d.forward` reads `weight` and delegates to `_conv_forward`,
//!   which runs `aten::conv2d`

use super::model::{Model, ModuleId, ModuleNode};
use crate::error::{QuantError, Result};
use crate::ir::{Constant, GraphBuilder, OpKind};
use crate::tensor::Tensor;
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Convolution hyperparameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conv2dOptions {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub dilation: usize,
}

impl Conv2dOptions {
    /// Square kernel, stride 1, no padding
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            stride: 1,
            padding: 0,
            dilation: 1,
        }
    }
}

/// Incrementally assembles a module arena
pub struct ModelBuilder {
    modules: Vec<ModuleNode>,
    rng: StdRng,
}

impl ModelBuilder {
    /// Create a builder whose parameter init is seeded by `seed`
    pub fn new(seed: u64) -> Self {
        Self {
            modules: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Add an arbitrary module
    pub fn add(&mut self, node: ModuleNode) -> ModuleId {
        let id = ModuleId(self.modules.len());
        self.modules.push(node);
        id
    }

    /// Type name of an already added module
    pub fn type_name(&self, id: ModuleId) -> &str {
        self.modules[id.0].type_name()
    }

    /// Uniform(-1/sqrt(fan_in), 1/sqrt(fan_in)) init
    fn init_tensor(&mut self, shape: &[usize], fan_in: usize) -> Tensor {
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
        let len: usize = shape.iter().product();
        let data: Vec<f32> = (0..len)
            .map(|_| self.rng.random_range(-bound..bound))
            .collect();
        ArrayD::from_shape_vec(IxDyn(shape), data).unwrap_or_else(|_| ArrayD::zeros(IxDyn(shape)))
    }

    /// `Linear(in_features, out_features)` with bias
    pub fn linear(&mut self, in_features: usize, out_features: usize) -> ModuleId {
        let weight = self.init_tensor(&[out_features, in_features], in_features);
        let bias = self.init_tensor(&[out_features], in_features);

        let mut b = GraphBuilder::new("Linear");
        let input = b.input("input");
        let w = b.tensor_attr("weight");
        let bias_v = b.tensor_attr("bias");
        let out = b.call_function("linear", &[input, w, bias_v]);
        let forward = b.ret(out);

        self.add(
            ModuleNode::new("Linear")
                .with_tensor("weight", weight)
                .with_tensor("bias", bias)
                .with_method("forward", forward),
        )
    }

    /// `Conv2d(in, out, kernel)` with stride 1 and no padding
    pub fn conv2d(&mut self, in_channels: usize, out_channels: usize, kernel_size: usize) -> ModuleId {
        self.conv2d_with(Conv2dOptions::new(in_channels, out_channels, kernel_size))
    }

    /// `Conv2d` with explicit options
    pub fn conv2d_with(&mut self, opts: Conv2dOptions) -> ModuleId {
        let k = opts.kernel_size;
        let fan_in = opts.in_channels * k * k;
        let weight = self.init_tensor(&[opts.out_channels, opts.in_channels, k, k], fan_in);
        let bias = self.init_tensor(&[opts.out_channels], fan_in);

        let mut fwd = GraphBuilder::new("Conv2d");
        let input = fwd.input("input");
        let w = fwd.tensor_attr("weight");
        let this = fwd.self_value();
        let out = fwd.call_method("_conv_forward", this, &[input, w]);
        let forward = fwd.ret(out);

        let mut inner = GraphBuilder::new("Conv2d");
        let input = inner.input("input");
        let w = inner.input("weight");
        let bias_v = inner.tensor_attr("bias");
        let pair = |v: usize| Constant::IntList(vec![v as i64, v as i64]);
        let stride = inner.constant(pair(opts.stride));
        let padding = inner.constant(pair(opts.padding));
        let dilation = inner.constant(pair(opts.dilation));
        let groups = inner.constant(Constant::Int(1));
        let out = inner.op(
            OpKind::Conv2d,
            &[input, w, bias_v, stride, padding, dilation, groups],
        );
        let conv_forward = inner.ret(out);

        self.add(
            ModuleNode::new("Conv2d")
                .with_tensor("weight", weight)
                .with_tensor("bias", bias)
                .with_method("forward", forward)
                .with_method("_conv_forward", conv_forward),
        )
    }

    /// Container whose `forward` runs each child in order
    pub fn sequential(&mut self, type_name: &str, children: &[(&str, ModuleId)]) -> ModuleId {
        let mut b = GraphBuilder::new(type_name);
        let mut x = b.input("x");
        let mut node = ModuleNode::new(type_name);
        for &(name, child) in children {
            let child_type = self.type_name(child).to_string();
            let m = b.submodule(name, &child_type);
            x = b.call_method("forward", m, &[x]);
            node = node.with_submodule(name, child);
        }
        let forward = b.ret(x);
        self.add(node.with_method("forward", forward))
    }

    /// Finish with `root` as the top-level module
    pub fn build(self, root: ModuleId) -> Result<Model> {
        if root.0 >= self.modules.len() {
            return Err(QuantError::AttributeNotFound {
                module: "<builder>".to_string(),
                name: format!("module #{}", root.0),
            });
        }
        let model = Model::from_parts(self.modules, root);
        model.validate_calls()?;
        Ok(model)
    }
}

//! Shared fixtures for integration tests

#![allow(dead_code)]

use cuantizar::ir::GraphBuilder;
use cuantizar::module::{Model, ModelBuilder, ModuleNode};
use cuantizar::tensor::Tensor;
use ndarray::{ArrayD, IxDyn};
use rand::{Rng, SeedableRng};

/// Ordered substring matcher over a graph dump.
///
/// `check` patterns must appear in order; a `check_not` pattern must not
/// appear between the surrounding `check` matches (or before the end).
#[derive(Default)]
pub struct FileCheck {
    steps: Vec<Step>,
}

enum Step {
    Check(String),
    CheckNot(String),
}

impl FileCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(mut self, pattern: &str) -> Self {
        self.steps.push(Step::Check(pattern.to_string()));
        self
    }

    pub fn check_not(mut self, pattern: &str) -> Self {
        self.steps.push(Step::CheckNot(pattern.to_string()));
        self
    }

    /// Panic with the dump if any step fails
    pub fn run(&self, text: &str) {
        let mut pos = 0;
        let mut pending: Vec<&str> = Vec::new();
        for step in &self.steps {
            match step {
                Step::CheckNot(pattern) => pending.push(pattern),
                Step::Check(pattern) => {
                    let Some(offset) = text[pos..].find(pattern.as_str()) else {
                        panic!("check '{pattern}' not found after offset {pos} in:\n{text}");
                    };
                    let start = pos + offset;
                    assert_no_match(&pending, &text[pos..start], text);
                    pending.clear();
                    pos = start + pattern.len();
                }
            }
        }
        assert_no_match(&pending, &text[pos..], text);
    }
}

fn assert_no_match(patterns: &[&str], region: &str, text: &str) {
    for pattern in patterns {
        assert!(
            !region.contains(pattern),
            "check_not '{pattern}' matched in:\n{region}\nfull graph:\n{text}"
        );
    }
}

// ============================================================================
// Models
// ============================================================================

/// `M { fc: Linear(5, 5) }`, forward = fc(x)
pub fn single_linear(seed: u64) -> Model {
    let mut mb = ModelBuilder::new(seed);
    let fc = mb.linear(5, 5);
    let root = mb.sequential("M", &[("fc", fc)]);
    mb.build(root).unwrap()
}

/// `M { conv: Conv2d(3, 5, 3), sub: Sub { fc: Linear(5, 5) } }`,
/// forward = sub(conv(x)) with `sub` read before `conv`
pub fn conv_then_sub(seed: u64) -> Model {
    let mut mb = ModelBuilder::new(seed);
    let conv = mb.conv2d(3, 5, 3);
    let fc = mb.linear(5, 5);
    let sub = mb.sequential("Sub", &[("fc", fc)]);

    let mut b = GraphBuilder::new("M");
    let x = b.input("x");
    let sub_v = b.submodule("sub", "Sub");
    let conv_v = b.submodule("conv", "Conv2d");
    let h = b.call_method("forward", conv_v, &[x]);
    let y = b.call_method("forward", sub_v, &[h]);
    let root = mb.add(
        ModuleNode::new("M")
            .with_submodule("conv", conv)
            .with_submodule("sub", sub)
            .with_method("forward", b.ret(y)),
    );
    mb.build(root).unwrap()
}

/// `M { conv: Conv2d(3, 5, 3) }`
pub fn conv_model(seed: u64) -> Model {
    let mut mb = ModelBuilder::new(seed);
    let conv = mb.conv2d(3, 5, 3);
    let root = mb.sequential("M", &[("conv", conv)]);
    mb.build(root).unwrap()
}

/// `M { fc1: Linear(5, 5), fc2: Linear(5, 5) }`
pub fn two_linear(seed: u64) -> Model {
    let mut mb = ModelBuilder::new(seed);
    let fc1 = mb.linear(5, 5);
    let fc2 = mb.linear(5, 5);
    let root = mb.sequential("M", &[("fc1", fc1), ("fc2", fc2)]);
    mb.build(root).unwrap()
}

/// Uniform(-1, 1) tensor
pub fn rand_tensor(shape: &[usize], seed: u64) -> Tensor {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let len = shape.iter().product();
    let data: Vec<f32> = (0..len).map(|_| rng.random_range(-1.0..1.0)).collect();
    ArrayD::from_shape_vec(IxDyn(shape), data).unwrap()
}

//! Scalar reverse-mode differentiation tape
//!
//! Every operation appends a node holding its forward value and a backward
//! rule. Parents always precede their children, so the reverse pass is a
//! single sweep from the root towards index zero.
//!
//! Most nodes carry plain local partials. Operators whose gradient is meant
//! to differ from their true derivative register a [`BackwardRule`] instead.

use std::cell::RefCell;
use std::sync::Arc;

/// Explicit backward rule for a custom node
pub trait BackwardRule: Send + Sync {
    /// Rule name, used in diagnostics
    fn name(&self) -> &'static str;

    /// Gradient for each parent given the upstream gradient, the parents'
    /// forward values and this node's forward value
    fn backward(&self, upstream: f64, parents: &[f64], output: f64) -> Vec<f64>;
}

/// Handle to a value recorded on a [`Tape`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(usize);

impl Var {
    /// Position of the node on its tape
    pub fn index(self) -> usize {
        self.0
    }
}

enum Backward {
    Leaf,
    Linear(Vec<f64>),
    Custom(Arc<dyn BackwardRule>),
}

struct Node {
    value: f64,
    parents: Vec<Var>,
    backward: Backward,
}

/// Recording of a single forward computation
///
/// A tape is built per call and is not shared between threads.
#[derive(Default)]
pub struct Tape {
    nodes: RefCell<Vec<Node>>,
}

impl std::fmt::Debug for Tape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tape").field("nodes", &self.len()).finish()
    }
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded nodes
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record an input value
    pub fn leaf(&self, value: f64) -> Var {
        self.push(Node {
            value,
            parents: Vec::new(),
            backward: Backward::Leaf,
        })
    }

    /// Forward value of a node
    pub fn value(&self, var: Var) -> f64 {
        self.nodes.borrow()[var.0].value
    }

    /// Forward values of several nodes
    pub fn values(&self, vars: &[Var]) -> Vec<f64> {
        let nodes = self.nodes.borrow();
        vars.iter().map(|v| nodes[v.0].value).collect()
    }

    /// Record a node whose gradient is `upstream * partial` for each term
    pub fn linear(&self, value: f64, terms: &[(Var, f64)]) -> Var {
        self.push(Node {
            value,
            parents: terms.iter().map(|(v, _)| *v).collect(),
            backward: Backward::Linear(terms.iter().map(|(_, d)| *d).collect()),
        })
    }

    /// Record a node with an explicit backward rule
    pub fn custom<R: BackwardRule + 'static>(&self, value: f64, parents: &[Var], rule: R) -> Var {
        self.push(Node {
            value,
            parents: parents.to_vec(),
            backward: Backward::Custom(Arc::new(rule)),
        })
    }

    /// Forward `value`, backward passes the upstream gradient to `parent` untouched
    pub fn straight_through(&self, value: f64, parent: Var) -> Var {
        self.linear(value, &[(parent, 1.0)])
    }

    pub fn add(&self, a: Var, b: Var) -> Var {
        let value = self.value(a) + self.value(b);
        self.linear(value, &[(a, 1.0), (b, 1.0)])
    }

    pub fn sub(&self, a: Var, b: Var) -> Var {
        let value = self.value(a) - self.value(b);
        self.linear(value, &[(a, 1.0), (b, -1.0)])
    }

    pub fn mul(&self, a: Var, b: Var) -> Var {
        let (va, vb) = (self.value(a), self.value(b));
        self.linear(va * vb, &[(a, vb), (b, va)])
    }

    pub fn div(&self, a: Var, b: Var) -> Var {
        let (va, vb) = (self.value(a), self.value(b));
        self.linear(va / vb, &[(a, 1.0 / vb), (b, -va / (vb * vb))])
    }

    pub fn neg(&self, a: Var) -> Var {
        self.scale(a, -1.0)
    }

    /// `a * k` for a constant `k`
    pub fn scale(&self, a: Var, k: f64) -> Var {
        self.linear(self.value(a) * k, &[(a, k)])
    }

    /// `a + k` for a constant `k`
    pub fn add_scalar(&self, a: Var, k: f64) -> Var {
        self.linear(self.value(a) + k, &[(a, 1.0)])
    }

    /// `k - a` for a constant `k`
    pub fn rsub_scalar(&self, k: f64, a: Var) -> Var {
        self.linear(k - self.value(a), &[(a, -1.0)])
    }

    /// `a ^ k` for a constant exponent; infinite slopes at zero are dropped
    pub fn powf(&self, a: Var, k: f64) -> Var {
        let va = self.value(a);
        let slope = k * va.powf(k - 1.0);
        let slope = if slope.is_finite() { slope } else { 0.0 };
        self.linear(va.powf(k), &[(a, slope)])
    }

    pub fn abs(&self, a: Var) -> Var {
        let va = self.value(a);
        let slope = if va > 0.0 {
            1.0
        } else if va < 0.0 {
            -1.0
        } else {
            0.0
        };
        self.linear(va.abs(), &[(a, slope)])
    }

    /// Plain clamp: gradient vanishes outside `[lo, hi]`
    pub fn clamp(&self, a: Var, lo: f64, hi: f64) -> Var {
        let va = self.value(a);
        if va < lo {
            self.linear(lo, &[(a, 0.0)])
        } else if va > hi {
            self.linear(hi, &[(a, 0.0)])
        } else {
            self.linear(va, &[(a, 1.0)])
        }
    }

    /// Smallest of `vars`; the gradient flows to the first minimiser
    pub fn min(&self, vars: &[Var]) -> Option<Var> {
        let values = self.values(vars);
        let (at, value) = values
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, v)| match best {
                Some((_, b)) if b <= v => best,
                _ => Some((i, v)),
            })?;
        Some(self.linear(value, &[(vars[at], 1.0)]))
    }

    /// Reverse pass from `root`
    ///
    /// Only nodes the root depends on receive a gradient, so custom rules
    /// that add a bias never fire for disconnected nodes.
    pub fn gradient(&self, root: Var) -> Gradients {
        let nodes = self.nodes.borrow();
        let mut grads = vec![0.0; root.0 + 1];
        let mut reached = vec![false; root.0 + 1];
        grads[root.0] = 1.0;
        reached[root.0] = true;

        for index in (0..=root.0).rev() {
            if !reached[index] {
                continue;
            }
            let node = &nodes[index];
            let upstream = grads[index];
            let contributions: Vec<f64> = match &node.backward {
                Backward::Leaf => continue,
                Backward::Linear(partials) => partials.iter().map(|d| upstream * d).collect(),
                Backward::Custom(rule) => {
                    let parent_values: Vec<f64> =
                        node.parents.iter().map(|p| nodes[p.0].value).collect();
                    rule.backward(upstream, &parent_values, node.value)
                }
            };
            for (parent, g) in node.parents.iter().zip(contributions) {
                grads[parent.0] += g;
                reached[parent.0] = true;
            }
        }

        Gradients(grads)
    }

    fn push(&self, node: Node) -> Var {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(node);
        Var(nodes.len() - 1)
    }
}

/// Result of a reverse pass
#[derive(Debug, Clone)]
pub struct Gradients(Vec<f64>);

impl Gradients {
    /// Gradient of the root with respect to `var`
    pub fn wrt(&self, var: Var) -> f64 {
        self.0.get(var.0).copied().unwrap_or(0.0)
    }

    pub fn wrt_all(&self, vars: &[Var]) -> Vec<f64> {
        vars.iter().map(|v| self.wrt(*v)).collect()
    }
}

/// Identity forward, `k * dy` backward
#[derive(Debug, Clone, Copy)]
pub struct ScaledGradient(pub f64);

impl BackwardRule for ScaledGradient {
    fn name(&self) -> &'static str {
        "scaled_gradient"
    }

    fn backward(&self, upstream: f64, parents: &[f64], _output: f64) -> Vec<f64> {
        vec![upstream * self.0; parents.len()]
    }
}

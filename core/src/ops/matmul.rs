use crate::broadcast::multi_broadcast;
use crate::internal::*;
use derive_new::new;

/// Batched matrix product with optional implicit transposition of either
/// operand and ONNX-style broadcast over the batch axes.
#[derive(Debug, Clone, new)]
pub struct MatMul {
    pub trans_a: bool,
    pub trans_b: bool,
    /// Geometry cached by the last shape inference, for diagnostics.
    #[new(default)]
    m: usize,
    #[new(default)]
    n: usize,
    #[new(default)]
    k: usize,
}

impl MatMul {
    /// `(m, n, k)` from the last successful shape inference.
    pub fn mnk(&self) -> (usize, usize, usize) {
        (self.m, self.n, self.k)
    }

    pub(crate) fn infer_shapes(&mut self, inputs: &[Shape]) -> Option<TVec<Shape>> {
        if inputs.len() != 2 {
            return None;
        }
        let (a, b) = (&inputs[0], &inputs[1]);
        if a.len() < 2 || b.len() < 2 {
            return None;
        }
        let (m, k_a) = if self.trans_a {
            (a[a.len() - 1], a[a.len() - 2])
        } else {
            (a[a.len() - 2], a[a.len() - 1])
        };
        let (k_b, n) = if self.trans_b {
            (b[b.len() - 1], b[b.len() - 2])
        } else {
            (b[b.len() - 2], b[b.len() - 1])
        };
        if k_a != k_b {
            return None;
        }
        let mut output = multi_broadcast(&[&a[..a.len() - 2], &b[..b.len() - 2]])?;
        self.m = m;
        self.n = n;
        self.k = k_a;
        output.push(m);
        output.push(n);
        Some(tvec!(output))
    }
}

impl fmt::Display for MatMul {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "MatMul([{},{}], mnk=[{},{},{}])",
            if self.trans_a { "A^T" } else { "A" },
            if self.trans_b { "B^T" } else { "B" },
            self.m,
            self.n,
            self.k
        )
    }
}

//! Dense+activation fusions produced by the compiler's fuse pass (§4.6 phase 2).
//!
//! Each holds a copy of the source [`Dense`]'s parameters and performs
//! matmul-then-bias-then-activation in a single pass over the output buffer, reducing
//! memory traffic relative to running the two layers back to back. Semantics are
//! identical to the unfused `Dense` followed by its activation.

use super::{Dense, Layer};
use crate::error::Result;
use crate::tensor::Tensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FusedKind {
    ReLU,
    Sigmoid,
}

fn apply(kind: FusedKind, out: &mut [f32]) {
    match kind {
        FusedKind::ReLU => {
            for x in out.iter_mut() {
                *x = x.max(0.0);
            }
        }
        FusedKind::Sigmoid => {
            for x in out.iter_mut() {
                *x = 1.0 / (1.0 + (-*x).exp());
            }
        }
    }
}

macro_rules! fused_layer {
    ($name:ident, $kind:expr, $label:expr) => {
        #[derive(Clone)]
        pub struct $name {
            dense: Dense,
        }

        impl $name {
            pub fn from_dense(dense: Dense) -> Self {
                Self { dense }
            }

            pub fn dense(&self) -> &Dense {
                &self.dense
            }
        }

        impl Layer for $name {
            fn forward(&self, input: &Tensor, output: &mut Tensor) -> Result<()> {
                self.dense.forward(input, output)?;
                apply($kind, output.as_mut_slice());
                Ok(())
            }

            fn name(&self) -> &str {
                $label
            }

            fn parameter_count(&self) -> usize {
                self.dense.parameter_count()
            }

            fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
                self.dense.output_shape(input_shape)
            }

            fn clone_box(&self) -> Box<dyn Layer> {
                Box::new(self.clone())
            }

            // Fused layers are a compiled-model artifact (§4.6 phase 2); the on-disk
            // format (§4.5) has no tag for them, so they never reach `write_body`.
            fn type_tag(&self) -> u32 {
                0
            }

            fn write_body(&self, _out: &mut Vec<u8>) {
                unreachable!("fused layers are never serialized");
            }
        }
    };
}

fused_layer!(FusedDenseReLU, FusedKind::ReLU, "FusedDenseReLU");
fused_layer!(FusedDenseSigmoid, FusedKind::Sigmoid, "FusedDenseSigmoid");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Activation;

    fn make_dense() -> Dense {
        let w = Tensor::from_data(vec![2, 2], &[1.0, -1.0, 0.5, 0.5]).unwrap();
        let b = Tensor::from_data(vec![2], &[0.0, -1.0]).unwrap();
        Dense::new(w, Some(b)).unwrap()
    }

    #[test]
    fn fused_relu_matches_dense_then_relu() {
        let dense = make_dense();
        let fused = FusedDenseReLU::from_dense(dense.clone());
        let relu = Activation::ReLU;

        let x = Tensor::from_data(vec![2], &[2.0, 3.0]).unwrap();
        let mut unfused = Tensor::from_shape(vec![2]).unwrap();
        dense.forward(&x, &mut unfused).unwrap();
        let mut expected = Tensor::from_shape(vec![2]).unwrap();
        relu.forward(&unfused, &mut expected).unwrap();

        let mut got = Tensor::from_shape(vec![2]).unwrap();
        fused.forward(&x, &mut got).unwrap();

        for (a, b) in got.as_slice().iter().zip(expected.as_slice()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn fused_sigmoid_matches_dense_then_sigmoid() {
        let dense = make_dense();
        let fused = FusedDenseSigmoid::from_dense(dense.clone());
        let sigmoid = Activation::Sigmoid;

        let x = Tensor::from_data(vec![2], &[2.0, 3.0]).unwrap();
        let mut unfused = Tensor::from_shape(vec![2]).unwrap();
        dense.forward(&x, &mut unfused).unwrap();
        let mut expected = Tensor::from_shape(vec![2]).unwrap();
        sigmoid.forward(&unfused, &mut expected).unwrap();

        let mut got = Tensor::from_shape(vec![2]).unwrap();
        fused.forward(&x, &mut got).unwrap();

        for (a, b) in got.as_slice().iter().zip(expected.as_slice()) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}

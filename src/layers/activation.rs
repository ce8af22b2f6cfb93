//! Activation layers: ReLU, Sigmoid, Tanh, Softmax (§4.3 "Activation layers").

use super::Layer;
use crate::error::Result;
use crate::kernels;
use crate::tensor::Tensor;

/// A closed set of elementwise (or, for Softmax, row-wise) activation functions, each
/// delegating to the matching kernel in [`kernels::elementwise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    ReLU,
    Sigmoid,
    Tanh,
    Softmax,
}

impl Activation {
    fn kernel_name(&self) -> &'static str {
        match self {
            Activation::ReLU => "ReLU",
            Activation::Sigmoid => "Sigmoid",
            Activation::Tanh => "Tanh",
            Activation::Softmax => "Softmax",
        }
    }
}

impl Layer for Activation {
    fn forward(&self, input: &Tensor, output: &mut Tensor) -> Result<()> {
        match self {
            Activation::ReLU => kernels::relu(input, output),
            Activation::Sigmoid => kernels::sigmoid(input, output),
            Activation::Tanh => kernels::tanh(input, output),
            Activation::Softmax => kernels::softmax(input, output),
        }
    }

    fn name(&self) -> &str {
        self.kernel_name()
    }

    fn parameter_count(&self) -> usize {
        0
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        if *self == Activation::Softmax && input_shape.len() >= 3 {
            return Err(crate::error::TitanError::shape_mismatch(format!(
                "Softmax does not support rank >= 3, got rank {}",
                input_shape.len()
            )));
        }
        Ok(input_shape.to_vec())
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(*self)
    }

    fn type_tag(&self) -> u32 {
        use super::wire::*;
        match self {
            Activation::ReLU => TAG_RELU,
            Activation::Sigmoid => TAG_SIGMOID,
            Activation::Tanh => TAG_TANH,
            Activation::Softmax => TAG_SOFTMAX,
        }
    }

    fn write_body(&self, _out: &mut Vec<u8>) {
        // Activation records have no body (§4.5).
    }
}

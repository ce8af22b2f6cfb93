//! Int8-quantized Dense, produced by the compiler's quantize pass (§4.6 phase 3).

use super::Layer;
use crate::error::{Result, TitanError};
use crate::kernels;
use crate::tensor::quantized::quantize;
use crate::tensor::{QuantizedTensor, Tensor};

use super::Dense;

/// Built from a trained [`Dense`]: its weight matrix is transposed to `(in, out)` and
/// quantized; the bias stays floating-point. Forward quantizes the input, runs an int8
/// GEMM, and adds the float bias.
#[derive(Clone)]
pub struct QuantizedDense {
    weights_q: QuantizedTensor,
    bias: Option<Tensor>,
    in_features: usize,
    out_features: usize,
}

impl QuantizedDense {
    pub fn from_dense(dense: &Dense) -> Result<Self> {
        let mut weights_t = Tensor::from_shape(vec![dense.in_features(), dense.out_features()])?;
        kernels::transpose(dense.weights(), &mut weights_t)?;
        let weights_q = quantize(&weights_t)?;
        Ok(Self {
            weights_q,
            bias: dense.bias().cloned(),
            in_features: dense.in_features(),
            out_features: dense.out_features(),
        })
    }

    fn as_2d(&self, input: &Tensor) -> Result<Tensor> {
        match input.rank() {
            1 => Tensor::from_data(vec![1, self.in_features], input.as_slice()),
            2 => Ok(input.clone()),
            r => Err(TitanError::shape_mismatch(format!(
                "QuantizedDense supports rank-1 or rank-2 input, got rank {}",
                r
            ))),
        }
    }

    fn add_bias_row(&self, row: &mut [f32]) {
        if let Some(bias) = &self.bias {
            for (x, b) in row.iter_mut().zip(bias.as_slice()) {
                *x += b;
            }
        }
    }
}

impl Layer for QuantizedDense {
    fn forward(&self, input: &Tensor, output: &mut Tensor) -> Result<()> {
        let in_2d = self.as_2d(input)?;
        if in_2d.shape()[1] != self.in_features {
            return Err(TitanError::shape_mismatch(format!(
                "QuantizedDense expected input size {}, got {:?}",
                self.in_features,
                input.shape()
            )));
        }
        let batch = in_2d.shape()[0];
        let q_in = quantize(&in_2d)?;

        let mut gemm_out = Tensor::from_shape(vec![batch, self.out_features])?;
        kernels::int8_gemm(&q_in, &self.weights_q, &mut gemm_out)?;
        for row in gemm_out.as_mut_slice().chunks_mut(self.out_features) {
            self.add_bias_row(row);
        }

        match input.rank() {
            1 => {
                output.ensure_shape(&[self.out_features])?;
                output.as_mut_slice().copy_from_slice(gemm_out.as_slice());
            }
            _ => {
                output.ensure_shape(&[batch, self.out_features])?;
                output.as_mut_slice().copy_from_slice(gemm_out.as_slice());
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "QuantizedDense"
    }

    fn parameter_count(&self) -> usize {
        self.weights_q.size() + self.bias.as_ref().map_or(0, Tensor::size)
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        match input_shape.len() {
            1 => Ok(vec![self.out_features]),
            2 => Ok(vec![input_shape[0], self.out_features]),
            r => Err(TitanError::shape_mismatch(format!(
                "QuantizedDense supports rank-1 or rank-2 input, got rank {}",
                r
            ))),
        }
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }

    // QuantizedDense is a compiled-model artifact (§4.6 phase 3); the on-disk format
    // (§4.5) has no tag for it, so it never reaches `write_body`.
    fn type_tag(&self) -> u32 {
        0
    }

    fn write_body(&self, _out: &mut Vec<u8>) {
        unreachable!("quantized layers are never serialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_is_close_to_unquantized_dense() {
        let w = Tensor::from_data(vec![2, 3], &[1.0, 2.0, -1.0, 0.5, 0.5, 0.5]).unwrap();
        let b = Tensor::from_data(vec![2], &[0.1, -0.1]).unwrap();
        let dense = Dense::new(w, Some(b)).unwrap();
        let qdense = QuantizedDense::from_dense(&dense).unwrap();

        let x = Tensor::from_data(vec![3], &[1.0, 2.0, 3.0]).unwrap();
        let mut expected = Tensor::from_shape(vec![2]).unwrap();
        dense.forward(&x, &mut expected).unwrap();
        let mut got = Tensor::from_shape(vec![2]).unwrap();
        qdense.forward(&x, &mut got).unwrap();

        for (a, b) in got.as_slice().iter().zip(expected.as_slice()) {
            assert!((a - b).abs() < 0.5, "{} vs {}", a, b);
        }
    }

    #[test]
    fn output_shape_matches_dense() {
        let w = Tensor::from_data(vec![2, 3], &[0.0; 6]).unwrap();
        let dense = Dense::new(w, None).unwrap();
        let qdense = QuantizedDense::from_dense(&dense).unwrap();
        assert_eq!(qdense.output_shape(&[3]).unwrap(), vec![2]);
        assert_eq!(qdense.output_shape(&[4, 3]).unwrap(), vec![4, 2]);
    }
}

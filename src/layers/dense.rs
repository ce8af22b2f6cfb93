//! Fully connected layer (§4.3 "Dense").

use super::Layer;
use crate::error::{Result, TitanError};
use crate::kernels;
use crate::tensor::Tensor;

/// `y = W.x + b` for rank-1 input, or `Y = X.W^T + b` (bias broadcast per row) for
/// rank-2 `(batch, in)` input. Owns `weights` as `(out, in)`, caching a transposed copy
/// for the batched path so every forward call reuses the numeric kernels in [`kernels`]
/// rather than re-deriving a dot product by hand.
#[derive(Clone)]
pub struct Dense {
    weights: Tensor,
    weights_t: Tensor,
    bias: Option<Tensor>,
    in_features: usize,
    out_features: usize,
}

impl Dense {
    pub fn new(weights: Tensor, bias: Option<Tensor>) -> Result<Self> {
        if weights.rank() != 2 {
            return Err(TitanError::invalid_argument("Dense weights must be rank-2 (out, in)"));
        }
        let (out_features, in_features) = (weights.shape()[0], weights.shape()[1]);
        if let Some(b) = &bias {
            if b.shape() != [out_features] {
                return Err(TitanError::invalid_argument(format!(
                    "Dense bias shape {:?} does not match out_features {}",
                    b.shape(),
                    out_features
                )));
            }
        }
        let mut weights_t = Tensor::from_shape(vec![in_features, out_features])?;
        kernels::transpose(&weights, &mut weights_t)?;
        Ok(Self {
            weights,
            weights_t,
            bias,
            in_features,
            out_features,
        })
    }

    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    fn add_bias_row(&self, row: &mut [f32]) {
        if let Some(bias) = &self.bias {
            for (x, b) in row.iter_mut().zip(bias.as_slice()) {
                *x += b;
            }
        }
    }
}

impl Layer for Dense {
    fn forward(&self, input: &Tensor, output: &mut Tensor) -> Result<()> {
        match input.rank() {
            1 => {
                if input.shape()[0] != self.in_features {
                    return Err(TitanError::shape_mismatch(format!(
                        "Dense expected input size {}, got {}",
                        self.in_features,
                        input.shape()[0]
                    )));
                }
                kernels::matvec(&self.weights, input, output)?;
                self.add_bias_row(output.as_mut_slice());
                Ok(())
            }
            2 => {
                if input.shape()[1] != self.in_features {
                    return Err(TitanError::shape_mismatch(format!(
                        "Dense expected input feature size {}, got {:?}",
                        self.in_features,
                        input.shape()
                    )));
                }
                kernels::matmul_blocked(input, &self.weights_t, output)?;
                let out_features = self.out_features;
                for row in output.as_mut_slice().chunks_mut(out_features) {
                    self.add_bias_row(row);
                }
                Ok(())
            }
            r => Err(TitanError::shape_mismatch(format!(
                "Dense supports rank-1 or rank-2 input, got rank {}",
                r
            ))),
        }
    }

    fn name(&self) -> &str {
        "Dense"
    }

    fn parameter_count(&self) -> usize {
        self.weights.size() + self.bias.as_ref().map_or(0, Tensor::size)
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        match input_shape.len() {
            1 => Ok(vec![self.out_features]),
            2 => Ok(vec![input_shape[0], self.out_features]),
            r => Err(TitanError::shape_mismatch(format!(
                "Dense supports rank-1 or rank-2 input, got rank {}",
                r
            ))),
        }
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }

    fn type_tag(&self) -> u32 {
        super::wire::TAG_DENSE
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        use super::wire::{write_floats, write_u32};
        write_u32(out, self.in_features as u32);
        write_u32(out, self.out_features as u32);
        out.push(self.bias.is_some() as u8);
        write_floats(out, self.weights.as_slice());
        if let Some(b) = &self.bias {
            write_floats(out, b.as_slice());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_dense() -> Dense {
        let w = Tensor::from_data(vec![2, 3], &[1.0, 0.0, 1.0, 0.0, 1.0, 1.0]).unwrap();
        let b = Tensor::from_data(vec![2], &[0.5, -0.5]).unwrap();
        Dense::new(w, Some(b)).unwrap()
    }

    #[test]
    fn forward_rank1() {
        let dense = make_dense();
        let x = Tensor::from_data(vec![3], &[1.0, 2.0, 3.0]).unwrap();
        let mut y = Tensor::from_shape(vec![2]).unwrap();
        dense.forward(&x, &mut y).unwrap();
        assert_eq!(y.as_slice(), &[4.5, 4.5]);
    }

    #[test]
    fn forward_rank2_broadcasts_bias() {
        let dense = make_dense();
        let x = Tensor::from_data(vec![2, 3], &[1.0, 2.0, 3.0, 0.0, 0.0, 0.0]).unwrap();
        let mut y = Tensor::from_shape(vec![2, 2]).unwrap();
        dense.forward(&x, &mut y).unwrap();
        assert_eq!(y.as_slice(), &[4.5, 4.5, 0.5, -0.5]);
    }

    #[test]
    fn rank_mismatch_is_error() {
        let dense = make_dense();
        let x = Tensor::from_shape(vec![2, 2, 2]).unwrap();
        let mut y = Tensor::from_shape(vec![2]).unwrap();
        assert!(dense.forward(&x, &mut y).is_err());
    }

    #[test]
    fn output_shape_matches_forward() {
        let dense = make_dense();
        assert_eq!(dense.output_shape(&[3]).unwrap(), vec![2]);
        assert_eq!(dense.output_shape(&[5, 3]).unwrap(), vec![5, 2]);
    }
}

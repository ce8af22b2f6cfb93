//! 2D convolution via im2col + dense product (§4.3 "Conv2D").

use super::Layer;
use crate::error::{Result, TitanError};
use crate::kernels;
use crate::tensor::Tensor;

/// VALID uses zero padding; SAME computes asymmetric padding per §4.2 so that
/// `outSize = ceil(input/stride)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingMode {
    Valid,
    Same,
}

/// Holds weights as `(outC, inC, kH, kW)` (cached additionally as a flat `(outC,
/// inC*kH*kW)` view, since flattening the trailing dims doesn't reorder the row-major
/// buffer) and an optional per-output-channel bias.
#[derive(Clone)]
pub struct Conv2D {
    weights: Tensor,
    weights_2d: Tensor,
    bias: Option<Tensor>,
    in_channels: usize,
    out_channels: usize,
    kh: usize,
    kw: usize,
    sh: usize,
    sw: usize,
    padding: PaddingMode,
}

impl Conv2D {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        weights: Tensor,
        bias: Option<Tensor>,
        stride: (usize, usize),
        padding: PaddingMode,
    ) -> Result<Self> {
        if weights.rank() != 4 {
            return Err(TitanError::invalid_argument(
                "Conv2D weights must be rank-4 (outC, inC, kH, kW)",
            ));
        }
        let (out_channels, in_channels, kh, kw) = (
            weights.shape()[0],
            weights.shape()[1],
            weights.shape()[2],
            weights.shape()[3],
        );
        if let Some(b) = &bias {
            if b.shape() != [out_channels] {
                return Err(TitanError::invalid_argument(format!(
                    "Conv2D bias shape {:?} does not match out_channels {}",
                    b.shape(),
                    out_channels
                )));
            }
        }
        let weights_2d = Tensor::from_data(vec![out_channels, in_channels * kh * kw], weights.as_slice())?;
        let (sh, sw) = stride;
        if sh == 0 || sw == 0 {
            return Err(TitanError::invalid_argument("Conv2D stride must be non-zero"));
        }
        Ok(Self {
            weights,
            weights_2d,
            bias,
            in_channels,
            out_channels,
            kh,
            kw,
            sh,
            sw,
            padding,
        })
    }

    fn padding_for(&self, h: usize, w: usize) -> (usize, usize, usize, usize) {
        match self.padding {
            PaddingMode::Valid => (0, 0, 0, 0),
            PaddingMode::Same => {
                let (pt, pb) = kernels::same_padding(h, self.kh, self.sh);
                let (pl, pr) = kernels::same_padding(w, self.kw, self.sw);
                (pt, pb, pl, pr)
            }
        }
    }

    fn spatial_output(&self, h: usize, w: usize) -> Result<(usize, usize)> {
        let (pt, pb, pl, pr) = self.padding_for(h, w);
        let out_h = kernels::output_size(h, pt + pb, self.kh, self.sh)?;
        let out_w = kernels::output_size(w, pl + pr, self.kw, self.sw)?;
        Ok((out_h, out_w))
    }

    fn forward_sample(&self, input: &Tensor, out_slice: &mut [f32]) -> Result<()> {
        let (c, h, w) = (input.shape()[0], input.shape()[1], input.shape()[2]);
        if c != self.in_channels {
            return Err(TitanError::shape_mismatch(format!(
                "Conv2D expected {} input channels, got {}",
                self.in_channels, c
            )));
        }
        let (pt, pb, pl, pr) = self.padding_for(h, w);
        let (out_h, out_w) = self.spatial_output(h, w)?;

        let mut cols = Tensor::from_shape(vec![1, 1])?;
        kernels::im2col(input, self.kh, self.kw, self.sh, self.sw, pt, pb, pl, pr, &mut cols)?;

        let mut conv_out = Tensor::from_shape(vec![self.out_channels, out_h * out_w])?;
        kernels::matmul_blocked(&self.weights_2d, &cols, &mut conv_out)?;

        if let Some(bias) = &self.bias {
            let spatial = out_h * out_w;
            for (channel, bias_val) in conv_out.as_mut_slice().chunks_mut(spatial).zip(bias.as_slice()) {
                for x in channel.iter_mut() {
                    *x += bias_val;
                }
            }
        }
        out_slice.copy_from_slice(conv_out.as_slice());
        Ok(())
    }

    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    pub fn stride(&self) -> (usize, usize) {
        (self.sh, self.sw)
    }

    pub fn padding(&self) -> PaddingMode {
        self.padding
    }
}

impl Layer for Conv2D {
    fn forward(&self, input: &Tensor, output: &mut Tensor) -> Result<()> {
        match input.rank() {
            3 => {
                let (h, w) = (input.shape()[1], input.shape()[2]);
                let (out_h, out_w) = self.spatial_output(h, w)?;
                output.ensure_shape(&[self.out_channels, out_h, out_w])?;
                self.forward_sample(input, output.as_mut_slice())
            }
            4 => {
                let (n, c, h, w) = (
                    input.shape()[0],
                    input.shape()[1],
                    input.shape()[2],
                    input.shape()[3],
                );
                let (out_h, out_w) = self.spatial_output(h, w)?;
                output.ensure_shape(&[n, self.out_channels, out_h, out_w])?;
                let sample_in_size = c * h * w;
                let sample_out_size = self.out_channels * out_h * out_w;
                for i in 0..n {
                    let sample = Tensor::from_data(
                        vec![c, h, w],
                        &input.as_slice()[i * sample_in_size..(i + 1) * sample_in_size],
                    )?;
                    let out_slice =
                        &mut output.as_mut_slice()[i * sample_out_size..(i + 1) * sample_out_size];
                    self.forward_sample(&sample, out_slice)?;
                }
                Ok(())
            }
            r => Err(TitanError::shape_mismatch(format!(
                "Conv2D supports rank-3 (C,H,W) or rank-4 (N,C,H,W) input, got rank {}",
                r
            ))),
        }
    }

    fn name(&self) -> &str {
        "Conv2D"
    }

    fn parameter_count(&self) -> usize {
        self.weights.size() + self.bias.as_ref().map_or(0, Tensor::size)
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        match input_shape.len() {
            3 => {
                let (out_h, out_w) = self.spatial_output(input_shape[1], input_shape[2])?;
                Ok(vec![self.out_channels, out_h, out_w])
            }
            4 => {
                let (out_h, out_w) = self.spatial_output(input_shape[2], input_shape[3])?;
                Ok(vec![input_shape[0], self.out_channels, out_h, out_w])
            }
            r => Err(TitanError::shape_mismatch(format!(
                "Conv2D supports rank-3 or rank-4 input, got rank {}",
                r
            ))),
        }
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }

    fn type_tag(&self) -> u32 {
        super::wire::TAG_CONV2D
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        use super::wire::{write_floats, write_u32};
        write_u32(out, self.in_channels as u32);
        write_u32(out, self.out_channels as u32);
        write_u32(out, self.kh as u32);
        write_u32(out, self.kw as u32);
        write_u32(out, self.sh as u32);
        write_u32(out, self.sw as u32);
        out.push(match self.padding {
            PaddingMode::Valid => 0,
            PaddingMode::Same => 1,
        });
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

    fn identity_conv() -> Conv2D {
        // 1x1x1x1 kernel of value 1.0, no bias: pass-through.
        let w = Tensor::from_data(vec![1, 1, 1, 1], &[1.0]).unwrap();
        Conv2D::new(w, None, (1, 1), PaddingMode::Valid).unwrap()
    }

    #[test]
    fn identity_kernel_passes_through() {
        let conv = identity_conv();
        let input = Tensor::from_data(vec![1, 2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut out = Tensor::from_shape(vec![1, 2, 2]).unwrap();
        conv.forward(&input, &mut out).unwrap();
        assert_eq!(out.as_slice(), input.as_slice());
    }

    #[test]
    fn same_padding_preserves_spatial_size() {
        let w = Tensor::from_data(vec![1, 1, 3, 3], &vec![0.0; 9]).unwrap();
        let conv = Conv2D::new(w, None, (1, 1), PaddingMode::Same).unwrap();
        let input = Tensor::from_shape(vec![1, 5, 5]).unwrap();
        assert_eq!(conv.output_shape(&[1, 5, 5]).unwrap(), vec![1, 5, 5]);
        let mut out = Tensor::from_shape(vec![1, 1, 1]).unwrap();
        conv.forward(&input, &mut out).unwrap();
        assert_eq!(out.shape(), &[1, 5, 5]);
    }

    #[test]
    fn batched_4d_input() {
        let conv = identity_conv();
        let input = Tensor::from_data(vec![2, 1, 2, 2], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]).unwrap();
        let mut out = Tensor::from_shape(vec![1]).unwrap();
        conv.forward(&input, &mut out).unwrap();
        assert_eq!(out.shape(), &[2, 1, 2, 2]);
        assert_eq!(out.as_slice(), input.as_slice());
    }
}

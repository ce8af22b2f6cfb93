//! Max/Avg pooling (§4.3 "Pooling").

use super::Layer;
use crate::error::{Result, TitanError};
use crate::tensor::Tensor;

/// Which reduction a [`PoolParams`]-based layer performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Max,
    Avg,
}

#[derive(Clone)]
struct PoolParams {
    kh: usize,
    kw: usize,
    sh: usize,
    sw: usize,
    ph: usize,
    pw: usize,
}

impl PoolParams {
    /// Stride of zero defaults to the kernel size, per §4.3.
    fn new(kernel: (usize, usize), stride: (usize, usize), padding: (usize, usize)) -> Result<Self> {
        let (kh, kw) = kernel;
        if kh == 0 || kw == 0 {
            return Err(TitanError::invalid_argument("pooling kernel size must be non-zero"));
        }
        let sh = if stride.0 == 0 { kh } else { stride.0 };
        let sw = if stride.1 == 0 { kw } else { stride.1 };
        Ok(Self {
            kh,
            kw,
            sh,
            sw,
            ph: padding.0,
            pw: padding.1,
        })
    }

    fn spatial_output(&self, h: usize, w: usize) -> Result<(usize, usize)> {
        let out_h = crate::kernels::output_size(h, 2 * self.ph, self.kh, self.sh)?;
        let out_w = crate::kernels::output_size(w, 2 * self.pw, self.kw, self.sw)?;
        Ok((out_h, out_w))
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        match input_shape.len() {
            3 => {
                let (out_h, out_w) = self.spatial_output(input_shape[1], input_shape[2])?;
                Ok(vec![input_shape[0], out_h, out_w])
            }
            4 => {
                let (out_h, out_w) = self.spatial_output(input_shape[2], input_shape[3])?;
                Ok(vec![input_shape[0], input_shape[1], out_h, out_w])
            }
            r => Err(TitanError::shape_mismatch(format!(
                "pooling supports rank-3 or rank-4 input, got rank {}",
                r
            ))),
        }
    }

    fn forward_sample(&self, c: usize, h: usize, w: usize, input: &[f32], out: &mut [f32], kind: PoolKind) {
        let (out_h, out_w) = self.spatial_output(h, w).expect("validated by caller");
        for ch in 0..c {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut max_val = f32::NEG_INFINITY;
                    let mut sum = 0.0f32;
                    for kr in 0..self.kh {
                        let in_row = oh as isize * self.sh as isize - self.ph as isize + kr as isize;
                        for kc in 0..self.kw {
                            let in_col = ow as isize * self.sw as isize - self.pw as isize + kc as isize;
                            let value = if in_row < 0 || in_row >= h as isize || in_col < 0 || in_col >= w as isize {
                                // Max pool: padded positions are -inf so they never win.
                                // Avg pool: padded positions contribute 0 to the sum.
                                None
                            } else {
                                Some(input[(ch * h + in_row as usize) * w + in_col as usize])
                            };
                            match value {
                                Some(v) => {
                                    if v > max_val {
                                        max_val = v;
                                    }
                                    sum += v;
                                }
                                None => {}
                            }
                        }
                    }
                    let result = match kind {
                        PoolKind::Max => max_val,
                        // Divides by the full kernel area, not the count of valid
                        // positions — intentional (§9 open question), preserved here.
                        PoolKind::Avg => sum / (self.kh * self.kw) as f32,
                    };
                    out[(ch * out_h + oh) * out_w + ow] = result;
                }
            }
        }
    }

    fn forward(&self, input: &Tensor, output: &mut Tensor, kind: PoolKind) -> Result<()> {
        match input.rank() {
            3 => {
                let (c, h, w) = (input.shape()[0], input.shape()[1], input.shape()[2]);
                let shape = self.output_shape(input.shape())?;
                output.ensure_shape(&shape)?;
                self.forward_sample(c, h, w, input.as_slice(), output.as_mut_slice(), kind);
                Ok(())
            }
            4 => {
                let (n, c, h, w) = (
                    input.shape()[0],
                    input.shape()[1],
                    input.shape()[2],
                    input.shape()[3],
                );
                let shape = self.output_shape(input.shape())?;
                output.ensure_shape(&shape)?;
                let (out_h, out_w) = self.spatial_output(h, w)?;
                let in_sample = c * h * w;
                let out_sample = c * out_h * out_w;
                for i in 0..n {
                    let in_slice = &input.as_slice()[i * in_sample..(i + 1) * in_sample];
                    let out_slice = &mut output.as_mut_slice()[i * out_sample..(i + 1) * out_sample];
                    self.forward_sample(c, h, w, in_slice, out_slice, kind);
                }
                Ok(())
            }
            r => Err(TitanError::shape_mismatch(format!(
                "pooling supports rank-3 or rank-4 input, got rank {}",
                r
            ))),
        }
    }
}

macro_rules! pool_layer {
    ($name:ident, $kind:expr, $label:expr, $tag:expr) => {
        #[derive(Clone)]
        pub struct $name {
            params: PoolParams,
        }

        impl $name {
            pub fn new(kernel: (usize, usize), stride: (usize, usize), padding: (usize, usize)) -> Result<Self> {
                Ok(Self {
                    params: PoolParams::new(kernel, stride, padding)?,
                })
            }

            pub fn kernel(&self) -> (usize, usize) {
                (self.params.kh, self.params.kw)
            }

            pub fn stride(&self) -> (usize, usize) {
                (self.params.sh, self.params.sw)
            }

            pub fn padding(&self) -> (usize, usize) {
                (self.params.ph, self.params.pw)
            }
        }

        impl Layer for $name {
            fn forward(&self, input: &Tensor, output: &mut Tensor) -> Result<()> {
                self.params.forward(input, output, $kind)
            }

            fn name(&self) -> &str {
                $label
            }

            fn parameter_count(&self) -> usize {
                0
            }

            fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
                self.params.output_shape(input_shape)
            }

            fn clone_box(&self) -> Box<dyn Layer> {
                Box::new(self.clone())
            }

            fn type_tag(&self) -> u32 {
                $tag
            }

            fn write_body(&self, out: &mut Vec<u8>) {
                use super::wire::write_u32;
                // The on-disk record stores one scalar per axis pair; only square
                // kernels/strides/paddings round-trip exactly (§4.5).
                write_u32(out, self.params.kh as u32);
                write_u32(out, self.params.sh as u32);
                write_u32(out, self.params.ph as u32);
            }
        }
    };
}

pool_layer!(MaxPool2D, PoolKind::Max, "MaxPool2D", super::wire::TAG_MAXPOOL);
pool_layer!(AvgPool2D, PoolKind::Avg, "AvgPool2D", super::wire::TAG_AVGPOOL);

//! im2col / col2im rearrangement for convolution-as-GEMM (§4.2).

use crate::error::{Result, TitanError};
use crate::tensor::Tensor;

/// `floor((input + total_padding - kernel) / stride) + 1`.
pub fn output_size(input: usize, total_padding: usize, kernel: usize, stride: usize) -> Result<usize> {
    let padded = input + total_padding;
    if padded < kernel {
        return Err(TitanError::invalid_argument(format!(
            "kernel {} larger than padded input {}",
            kernel, padded
        )));
    }
    Ok((padded - kernel) / stride + 1)
}

/// SAME padding: total padding so that `outSize = ceil(input/stride)`, split `total/2` on
/// each side with the extra unit (if `total` is odd) going to the *after* side.
pub fn same_padding(input: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let out_size = (input + stride - 1) / stride;
    let needed = (out_size.saturating_sub(1)) * stride + kernel;
    let total = needed.saturating_sub(input);
    let before = total / 2;
    let after = total - before;
    (before, after)
}

/// Rearranges a `(C,H,W)` input into a `(C*kH*kW, outH*outW)` matrix so convolution
/// reduces to a dense product against weights viewed as `(outC, C*kH*kW)`.
pub fn im2col(
    input: &Tensor,
    kh: usize,
    kw: usize,
    sh: usize,
    sw: usize,
    pad_top: usize,
    pad_bottom: usize,
    pad_left: usize,
    pad_right: usize,
    out: &mut Tensor,
) -> Result<()> {
    if input.rank() != 3 {
        return Err(TitanError::invalid_argument("im2col requires a rank-3 (C,H,W) input"));
    }
    let (c, h, w) = (input.shape()[0], input.shape()[1], input.shape()[2]);
    let out_h = output_size(h, pad_top + pad_bottom, kh, sh)?;
    let out_w = output_size(w, pad_left + pad_right, kw, sw)?;

    out.ensure_shape(&[c * kh * kw, out_h * out_w])?;
    out.zero();

    let in_data = input.as_slice();
    let col_data = out.as_mut_slice();
    let cols = out_h * out_w;

    for ch in 0..c {
        for kr in 0..kh {
            for kc in 0..kw {
                let row = (ch * kh + kr) * kw + kc;
                for out_row in 0..out_h {
                    let in_row = out_row as isize * sh as isize - pad_top as isize + kr as isize;
                    if in_row < 0 || in_row >= h as isize {
                        continue;
                    }
                    for out_col in 0..out_w {
                        let in_col = out_col as isize * sw as isize - pad_left as isize + kc as isize;
                        if in_col < 0 || in_col >= w as isize {
                            continue;
                        }
                        let col = out_row * out_w + out_col;
                        col_data[row * cols + col] =
                            in_data[(ch * h + in_row as usize) * w + in_col as usize];
                    }
                }
            }
        }
    }
    Ok(())
}

/// Inverse of [`im2col`]: accumulates overlapping patches back into a `(C,H,W)` tensor.
/// The column index encodes `(out_row, out_col)` row-major, matching [`im2col`]. Not
/// exercised by inference (training/backprop only), kept for parity with the kernel set
/// described in §2's component table.
#[allow(clippy::too_many_arguments)]
pub fn col2im(
    cols: &Tensor,
    c: usize,
    h: usize,
    w: usize,
    kh: usize,
    kw: usize,
    sh: usize,
    sw: usize,
    pad_top: usize,
    pad_left: usize,
    out_h: usize,
    out_w: usize,
    out: &mut Tensor,
) -> Result<()> {
    out.ensure_shape(&[c, h, w])?;
    out.zero();

    let col_data = cols.as_slice();
    let img_data = out.as_mut_slice();
    let cols_total = out_h * out_w;

    for ch in 0..c {
        for kr in 0..kh {
            for kc in 0..kw {
                let row = (ch * kh + kr) * kw + kc;
                for out_row in 0..out_h {
                    let in_row = out_row as isize * sh as isize - pad_top as isize + kr as isize;
                    if in_row < 0 || in_row >= h as isize {
                        continue;
                    }
                    for out_col in 0..out_w {
                        let in_col = out_col as isize * sw as isize - pad_left as isize + kc as isize;
                        if in_col < 0 || in_col >= w as isize {
                            continue;
                        }
                        let col = out_row * out_w + out_col;
                        img_data[(ch * h + in_row as usize) * w + in_col as usize] +=
                            col_data[row * cols_total + col];
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_padding_keeps_output_size_for_odd_kernel() {
        assert_eq!(output_size(5, 2, 3, 1).unwrap(), 5);
        let (before, after) = same_padding(5, 3, 1);
        assert_eq!(before + after, 2);
        assert_eq!(output_size(5, before + after, 3, 1).unwrap(), 5);

        let (before, after) = same_padding(28, 3, 1);
        assert_eq!(output_size(28, before + after, 3, 1).unwrap(), 28);
    }

    #[test]
    fn same_padding_right_biased_when_odd() {
        // kernel=2, stride=1: needed total padding is 1 (odd) -> after gets the extra.
        let (before, after) = same_padding(4, 2, 1);
        assert_eq!(before, 0);
        assert_eq!(after, 1);
    }

    #[test]
    fn im2col_shapes_and_padding_zeros() {
        let input = Tensor::from_data(vec![1, 3, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]).unwrap();
        let mut cols = Tensor::from_shape(vec![1, 1]).unwrap();
        im2col(&input, 3, 3, 1, 1, 1, 1, 1, 1, &mut cols).unwrap();
        // output spatial size: (3+2-3)/1+1 = 3 -> 3x3 = 9 columns, row count = 1*3*3=9
        assert_eq!(cols.shape(), &[9, 9]);
        // the first output position (0,0) uses top-left 3x3 patch with one row/col of
        // zero padding on the top and left.
        let col0: Vec<f32> = (0..9).map(|r| cols.get(&[r, 0])).collect();
        assert_eq!(col0, vec![0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 0.0, 4.0, 5.0]);
    }

    #[test]
    fn im2col_valid_matches_center_patch() {
        let input = Tensor::from_data(vec![1, 3, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]).unwrap();
        let mut cols = Tensor::from_shape(vec![1, 1]).unwrap();
        im2col(&input, 3, 3, 1, 1, 0, 0, 0, 0, &mut cols).unwrap();
        assert_eq!(cols.shape(), &[9, 1]);
        let col0: Vec<f32> = (0..9).map(|r| cols.get(&[r, 0])).collect();
        assert_eq!(col0, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn col2im_is_inverse_of_im2col_without_overlap() {
        let input = Tensor::from_data(vec![1, 3, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]).unwrap();
        let mut cols = Tensor::from_shape(vec![1, 1]).unwrap();
        im2col(&input, 3, 3, 1, 1, 0, 0, 0, 0, &mut cols).unwrap();
        let mut back = Tensor::from_shape(vec![1, 3, 3]).unwrap();
        col2im(&cols, 1, 3, 3, 3, 3, 1, 1, 0, 0, 1, 1, &mut back).unwrap();
        assert_eq!(back.as_slice(), input.as_slice());
    }
}

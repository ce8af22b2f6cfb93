//! Elementwise ops and activations (§4.2 "Activations").

use crate::error::{Result, TitanError};
use crate::tensor::Tensor;

pub fn add(a: &Tensor, b: &Tensor, out: &mut Tensor) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(TitanError::invalid_argument(format!(
            "elementwise add shape mismatch: {:?} vs {:?}",
            a.shape(),
            b.shape()
        )));
    }
    out.ensure_shape(a.shape())?;
    for ((dst, &x), &y) in out.as_mut_slice().iter_mut().zip(a.as_slice()).zip(b.as_slice()) {
        *dst = x + y;
    }
    Ok(())
}

pub fn multiply(a: &Tensor, b: &Tensor, out: &mut Tensor) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(TitanError::invalid_argument(format!(
            "elementwise multiply shape mismatch: {:?} vs {:?}",
            a.shape(),
            b.shape()
        )));
    }
    out.ensure_shape(a.shape())?;
    for ((dst, &x), &y) in out.as_mut_slice().iter_mut().zip(a.as_slice()).zip(b.as_slice()) {
        *dst = x * y;
    }
    Ok(())
}

pub fn scalar_multiply(a: &Tensor, scalar: f32, out: &mut Tensor) -> Result<()> {
    out.ensure_shape(a.shape())?;
    for (dst, &x) in out.as_mut_slice().iter_mut().zip(a.as_slice()) {
        *dst = x * scalar;
    }
    Ok(())
}

/// `max(0, x)` elementwise.
pub fn relu(input: &Tensor, out: &mut Tensor) -> Result<()> {
    out.ensure_shape(input.shape())?;
    for (dst, &x) in out.as_mut_slice().iter_mut().zip(input.as_slice()) {
        *dst = x.max(0.0);
    }
    Ok(())
}

/// `1 / (1 + exp(-x))` elementwise.
pub fn sigmoid(input: &Tensor, out: &mut Tensor) -> Result<()> {
    out.ensure_shape(input.shape())?;
    for (dst, &x) in out.as_mut_slice().iter_mut().zip(input.as_slice()) {
        *dst = 1.0 / (1.0 + (-x).exp());
    }
    Ok(())
}

/// Elementwise `tanh`, wrapping `f32::tanh`.
pub fn tanh(input: &Tensor, out: &mut Tensor) -> Result<()> {
    out.ensure_shape(input.shape())?;
    for (dst, &x) in out.as_mut_slice().iter_mut().zip(input.as_slice()) {
        *dst = x.tanh();
    }
    Ok(())
}

/// Numerically stabilized softmax: whole-tensor for rank 1, row-wise for rank 2.
/// Rank &ge; 3 is rejected.
pub fn softmax(input: &Tensor, out: &mut Tensor) -> Result<()> {
    match input.rank() {
        1 => {
            out.ensure_shape(input.shape())?;
            softmax_row(input.as_slice(), out.as_mut_slice());
            Ok(())
        }
        2 => {
            out.ensure_shape(input.shape())?;
            let cols = input.shape()[1];
            let in_data = input.as_slice();
            let out_data = out.as_mut_slice();
            for (in_row, out_row) in in_data.chunks(cols).zip(out_data.chunks_mut(cols)) {
                softmax_row(in_row, out_row);
            }
            Ok(())
        }
        r => Err(TitanError::invalid_argument(format!(
            "softmax supports rank 1 or 2, got rank {}",
            r
        ))),
    }
}

fn softmax_row(input: &[f32], out: &mut [f32]) {
    let max = input.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for (dst, &x) in out.iter_mut().zip(input) {
        let e = (x - max).exp();
        *dst = e;
        sum += e;
    }
    for dst in out.iter_mut() {
        *dst /= sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_clamps_negatives() {
        let input = Tensor::from_data(vec![4], &[-2.0, 0.0, 1.0, 3.0]).unwrap();
        let mut out = Tensor::from_shape(vec![4]).unwrap();
        relu(&input, &mut out).unwrap();
        assert_eq!(out.as_slice(), &[0.0, 0.0, 1.0, 3.0]);
    }

    #[test]
    fn sigmoid_bounds() {
        let input = Tensor::from_data(vec![3], &[-100.0, 0.0, 100.0]).unwrap();
        let mut out = Tensor::from_shape(vec![3]).unwrap();
        sigmoid(&input, &mut out).unwrap();
        assert!(out.as_slice()[0] < 1e-6);
        assert!((out.as_slice()[1] - 0.5).abs() < 1e-6);
        assert!(out.as_slice()[2] > 1.0 - 1e-6);
    }

    #[test]
    fn softmax_rank1_sums_to_one_and_is_finite_for_large_inputs() {
        let input = Tensor::from_data(vec![3], &[1000.0, 1000.0, 1000.0]).unwrap();
        let mut out = Tensor::from_shape(vec![3]).unwrap();
        softmax(&input, &mut out).unwrap();
        assert!(out.as_slice().iter().all(|x| x.is_finite()));
        let sum: f32 = out.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn softmax_rank2_is_row_wise() {
        let input = Tensor::from_data(vec![2, 2], &[1.0, 2.0, 10.0, 10.0]).unwrap();
        let mut out = Tensor::from_shape(vec![2, 2]).unwrap();
        softmax(&input, &mut out).unwrap();
        let row0_sum: f32 = out.as_slice()[0..2].iter().sum();
        let row1_sum: f32 = out.as_slice()[2..4].iter().sum();
        assert!((row0_sum - 1.0).abs() < 1e-6);
        assert!((row1_sum - 1.0).abs() < 1e-6);
        assert!((out.as_slice()[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn softmax_rejects_rank3() {
        let input = Tensor::from_shape(vec![2, 2, 2]).unwrap();
        let mut out = Tensor::from_shape(vec![2, 2, 2]).unwrap();
        assert!(softmax(&input, &mut out).is_err());
    }
}

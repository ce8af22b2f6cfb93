//! 8-bit signed quantized sibling of [`Tensor`] (§3.2).

use crate::error::{Result, TitanError};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr;

use super::ALIGNMENT;

fn layout_for(size: usize) -> Option<Layout> {
    if size == 0 {
        return None;
    }
    Layout::from_size_align(size, ALIGNMENT).ok()
}

/// A per-tensor affine-quantized 8-bit signed buffer: `real ~= (q - zero_point) * scale`.
pub struct QuantizedTensor {
    data: *mut i8,
    size: usize,
    shape: Vec<usize>,
    pub scale: f32,
    pub zero_point: i8,
}

unsafe impl Send for QuantizedTensor {}
unsafe impl Sync for QuantizedTensor {}

impl QuantizedTensor {
    pub fn from_shape(shape: Vec<usize>, scale: f32, zero_point: i8) -> Result<Self> {
        if shape.is_empty() || shape.iter().any(|&d| d == 0) {
            return Err(TitanError::invalid_argument(format!(
                "invalid shape {:?} for quantized tensor",
                shape
            )));
        }
        if scale <= 0.0 {
            return Err(TitanError::invalid_argument("quantization scale must be positive"));
        }
        let size = shape.iter().product();
        let data = match layout_for(size) {
            Some(layout) => unsafe { alloc_zeroed(layout) as *mut i8 },
            None => ptr::null_mut(),
        };
        Ok(Self {
            data,
            size,
            shape,
            scale,
            zero_point,
        })
    }

    pub fn empty() -> Self {
        Self {
            data: ptr::null_mut(),
            size: 0,
            shape: Vec::new(),
            scale: 1.0,
            zero_point: 0,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_slice(&self) -> &[i8] {
        if self.data.is_null() {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.data, self.size) }
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [i8] {
        if self.data.is_null() {
            &mut []
        } else {
            unsafe { std::slice::from_raw_parts_mut(self.data, self.size) }
        }
    }

    pub fn as_ptr(&self) -> *const i8 {
        self.data
    }

    /// Dequantizes into a plain float tensor: `x = (q - zero_point) * scale`.
    pub fn dequantize(&self) -> super::Tensor {
        let mut out = super::Tensor::from_shape(self.shape.clone())
            .expect("dequantizing a valid quantized tensor's shape cannot fail");
        let zp = self.zero_point as i32;
        for (dst, &q) in out.as_mut_slice().iter_mut().zip(self.as_slice()) {
            *dst = (q as i32 - zp) as f32 * self.scale;
        }
        out
    }
}

impl Clone for QuantizedTensor {
    fn clone(&self) -> Self {
        let mut out = QuantizedTensor::from_shape(self.shape.clone(), self.scale, self.zero_point)
            .expect("cloning a valid quantized tensor's shape cannot fail");
        out.as_mut_slice().copy_from_slice(self.as_slice());
        out
    }
}

impl Drop for QuantizedTensor {
    fn drop(&mut self) {
        if let Some(layout) = layout_for(self.size) {
            unsafe { dealloc(self.data as *mut u8, layout) };
        }
    }
}

/// Per-tensor asymmetric 8-bit quantization (§4.2 "Quantization").
pub fn quantize(tensor: &super::Tensor) -> Result<QuantizedTensor> {
    let data = tensor.as_slice();
    let mut min = 0.0f32;
    let mut max = 0.0f32;
    for &x in data {
        if x < min {
            min = x;
        }
        if x > max {
            max = x;
        }
    }

    let mut out = QuantizedTensor::from_shape(tensor.shape().to_vec(), 1.0, 0)?;

    if min == max {
        let zp = min.round().clamp(-128.0, 127.0) as i8;
        out.scale = 1.0;
        out.zero_point = zp;
        out.as_mut_slice().iter_mut().for_each(|q| *q = zp);
        return Ok(out);
    }

    let scale = (max - min) / 255.0;
    let zero_point = (-128.0 - min / scale).round().clamp(-128.0, 127.0) as i8;
    out.scale = scale;
    out.zero_point = zero_point;

    for (dst, &x) in out.as_mut_slice().iter_mut().zip(data) {
        let q = (x / scale + zero_point as f32).round().clamp(-128.0, 127.0);
        *dst = q as i8;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    #[test]
    fn round_trip_bounded_by_one_quantum() {
        let t = Tensor::from_data(vec![5], &[-2.0, -1.0, 0.0, 1.5, 3.0]).unwrap();
        let q = quantize(&t).unwrap();
        let back = q.dequantize();
        for (&orig, &got) in t.as_slice().iter().zip(back.as_slice()) {
            assert!((orig - got).abs() <= q.scale + 1e-6, "{} vs {}", orig, got);
        }
    }

    #[test]
    fn constant_tensor_quantizes_to_single_code() {
        let t = Tensor::from_data(vec![3], &[5.0, 5.0, 5.0]).unwrap();
        let q = quantize(&t).unwrap();
        assert_eq!(q.scale, 1.0);
        assert!(q.as_slice().iter().all(|&v| v == q.zero_point));
    }

    #[test]
    fn zero_point_in_range() {
        let t = Tensor::from_data(vec![4], &[-100.0, 0.0, 50.0, 127.0]).unwrap();
        let q = quantize(&t).unwrap();
        assert!(q.zero_point >= -128 && q.zero_point <= 127);
    }
}

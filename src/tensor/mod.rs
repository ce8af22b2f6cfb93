//! Owned, 32-byte-aligned N-dimensional numeric buffers (§3.1).

pub mod quantized;

use crate::error::{Result, TitanError};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::ptr;
use tracing::{debug, instrument};

pub use quantized::QuantizedTensor;

/// AVX2 load/store width and blocked-kernel tile boundary (§4.1).
pub const ALIGNMENT: usize = 32;

fn rounded_bytes(size: usize) -> usize {
    let bytes = size * std::mem::size_of::<f32>();
    (bytes + ALIGNMENT - 1) / ALIGNMENT * ALIGNMENT
}

fn layout_for(size: usize) -> Option<Layout> {
    if size == 0 {
        return None;
    }
    Layout::from_size_align(rounded_bytes(size), ALIGNMENT).ok()
}

/// An exclusively owned, row-major, 32-byte-aligned buffer of `f32` with an ordered
/// list of dimension sizes. See spec §3.1 for the full lifecycle contract.
pub struct Tensor {
    data: *mut f32,
    size: usize,
    shape: Vec<usize>,
}

// Safety: `Tensor` owns its buffer exclusively; all mutation requires `&mut self`.
// Shared immutable access across threads (e.g. compiled-model parameter tensors)
// never exposes interior mutability, so both auto traits are sound.
unsafe impl Send for Tensor {}
unsafe impl Sync for Tensor {}

impl Tensor {
    /// Constructs a zero-initialized tensor of the given shape.
    ///
    /// Fails with `InvalidArgument` ("InvalidShape") if any dimension, or the shape
    /// itself, is empty.
    #[instrument(skip(shape))]
    pub fn from_shape(shape: Vec<usize>) -> Result<Self> {
        Self::validate_shape(&shape)?;
        let size = shape.iter().product();
        let data = match layout_for(size) {
            Some(layout) => {
                let ptr = unsafe { alloc_zeroed(layout) as *mut f32 };
                if ptr.is_null() {
                    return Err(TitanError::invalid_argument(
                        "allocation failure constructing tensor",
                    ));
                }
                ptr
            }
            None => ptr::null_mut(),
        };
        debug!(?shape, size, "allocated tensor");
        Ok(Self { data, size, shape })
    }

    /// Constructs a tensor from the given shape and row-major data. Fails if `data.len()`
    /// does not equal the shape's product.
    pub fn from_data(shape: Vec<usize>, data: &[f32]) -> Result<Self> {
        Self::validate_shape(&shape)?;
        let size: usize = shape.iter().product();
        if data.len() != size {
            return Err(TitanError::invalid_argument(format!(
                "data length {} does not match shape size {}",
                data.len(),
                size
            )));
        }
        let mut tensor = Self::from_shape(shape)?;
        tensor.as_mut_slice().copy_from_slice(data);
        Ok(tensor)
    }

    /// An empty tensor: null pointer, zero size, empty shape. This is the state a
    /// tensor is left in after [`Tensor::take`] moves its contents out, and is the
    /// only shape allowed to violate the rank-&ge;1 invariant.
    pub fn empty() -> Self {
        Self {
            data: ptr::null_mut(),
            size: 0,
            shape: Vec::new(),
        }
    }

    fn validate_shape(shape: &[usize]) -> Result<()> {
        if shape.is_empty() || shape.iter().any(|&d| d == 0) {
            return Err(TitanError::invalid_argument(format!(
                "invalid shape {:?}: rank must be >= 1 and no dimension may be zero",
                shape
            )));
        }
        Ok(())
    }

    /// Takes this tensor's contents, leaving `self` an empty tensor (§3.1 "Moved").
    /// Mirrors a C++ move constructor for callers that need the explicit boundary;
    /// ordinary Rust moves (`let b = a;`) already transfer ownership without this.
    pub fn take(&mut self) -> Tensor {
        std::mem::replace(self, Tensor::empty())
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        if self.data.is_null() {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.data, self.size) }
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        if self.data.is_null() {
            &mut []
        } else {
            unsafe { std::slice::from_raw_parts_mut(self.data, self.size) }
        }
    }

    pub fn as_ptr(&self) -> *const f32 {
        self.data
    }

    pub fn as_mut_ptr(&mut self) -> *mut f32 {
        self.data
    }

    /// Returns the alignment (in bytes) of the underlying allocation, for tests.
    pub fn alignment_of_ptr(&self) -> usize {
        self.data as usize % ALIGNMENT
    }

    fn flat_index(&self, idx: &[usize]) -> usize {
        debug_assert_eq!(idx.len(), self.shape.len(), "index rank must match tensor rank");
        let mut flat = 0usize;
        for (i, &dim_idx) in idx.iter().enumerate() {
            debug_assert!(dim_idx < self.shape[i], "index {} out of bounds for dim {}", dim_idx, i);
            let stride: usize = self.shape[i + 1..].iter().product();
            flat += dim_idx * stride;
        }
        flat
    }

    /// Row-major multi-index read. Bounds are `debug_assert`ed only (§4.1): release
    /// builds omit the check to keep the inner loop tight.
    pub fn get(&self, idx: &[usize]) -> f32 {
        self.as_slice()[self.flat_index(idx)]
    }

    pub fn set(&mut self, idx: &[usize], value: f32) {
        let flat = self.flat_index(idx);
        self.as_mut_slice()[flat] = value;
    }

    pub fn fill(&mut self, value: f32) {
        self.as_mut_slice().iter_mut().for_each(|x| *x = value);
    }

    pub fn zero(&mut self) {
        self.fill(0.0);
    }

    /// Reallocates in place if `shape` differs from the current shape; otherwise reuses
    /// the existing storage. This is the "op reallocates output only on mismatch"
    /// contract shared by every kernel in §4.2.
    pub fn ensure_shape(&mut self, shape: &[usize]) -> Result<()> {
        if self.shape == shape {
            return Ok(());
        }
        *self = Tensor::from_shape(shape.to_vec())?;
        Ok(())
    }

    pub fn deep_clone(&self) -> Tensor {
        self.clone()
    }
}

impl Clone for Tensor {
    fn clone(&self) -> Self {
        let mut out = Tensor::from_shape(self.shape.clone())
            .expect("cloning a valid tensor's shape cannot fail");
        out.as_mut_slice().copy_from_slice(self.as_slice());
        out
    }
}

impl Default for Tensor {
    fn default() -> Self {
        Tensor::empty()
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        if let Some(layout) = layout_for(self.size) {
            unsafe { dealloc(self.data as *mut u8, layout) };
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("size", &self.size)
            .finish()
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.as_slice() == other.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_zero_initializes_and_aligns() {
        let t = Tensor::from_shape(vec![2, 3]).unwrap();
        assert_eq!(t.size(), 6);
        assert_eq!(t.as_slice(), &[0.0; 6]);
        assert_eq!(t.alignment_of_ptr(), 0);
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(Tensor::from_shape(vec![2, 0]).is_err());
        assert!(Tensor::from_shape(vec![]).is_err());
    }

    #[test]
    fn data_length_mismatch_is_rejected() {
        assert!(Tensor::from_data(vec![2, 2], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn take_leaves_source_empty_and_safe_to_drop() {
        let mut t = Tensor::from_data(vec![2], &[1.0, 2.0]).unwrap();
        let moved = t.take();
        assert_eq!(moved.as_slice(), &[1.0, 2.0]);
        assert_eq!(t.size(), 0);
        assert!(t.shape().is_empty());
        assert!(t.as_ptr().is_null());
        // dropping `t` here must not crash
    }

    #[test]
    fn row_major_indexing() {
        let t = Tensor::from_data(vec![2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(t.get(&[0, 0]), 1.0);
        assert_eq!(t.get(&[1, 2]), 6.0);
        assert_eq!(t.get(&[1, 0]), 4.0);
    }

    #[test]
    fn deep_clone_is_independent() {
        let t = Tensor::from_data(vec![2], &[1.0, 2.0]).unwrap();
        let mut c = t.deep_clone();
        c.fill(9.0);
        assert_eq!(t.as_slice(), &[1.0, 2.0]);
        assert_eq!(c.as_slice(), &[9.0, 9.0]);
    }

    #[test]
    fn ensure_shape_reuses_storage_when_unchanged() {
        let mut t = Tensor::from_shape(vec![4]).unwrap();
        let ptr_before = t.as_ptr();
        t.ensure_shape(&[4]).unwrap();
        assert_eq!(t.as_ptr(), ptr_before);
        t.ensure_shape(&[8]).unwrap();
        assert_eq!(t.size(), 8);
    }
}

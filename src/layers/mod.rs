//! Polymorphic layer abstraction (§3.3, §4.3).

pub mod activation;
pub mod conv2d;
pub mod dense;
pub mod flatten;
pub mod fused;
pub mod pooling;
pub mod quantized_dense;

use crate::error::Result;
use crate::tensor::Tensor;

pub use activation::Activation;
pub use conv2d::{Conv2D, PaddingMode};
pub use dense::Dense;
pub use flatten::Flatten;
pub use fused::{FusedDenseReLU, FusedDenseSigmoid};
pub use pooling::{AvgPool2D, MaxPool2D, PoolKind};
pub use quantized_dense::QuantizedDense;

/// Uniform capability set every layer variant implements: forward, name, parameter
/// count, pure output-shape inference, and cloneability (§3.3). Implemented as a
/// trait-object-safe trait rather than a class hierarchy, so [`Sequential`] can hold a
/// closed set of heterogeneous layer variants behind one interface.
///
/// [`Sequential`]: crate::model::Sequential
pub trait Layer: Send + Sync {
    /// Runs this layer's computation, writing into `output`. `output` is reallocated
    /// via [`Tensor::ensure_shape`] if its shape doesn't already match
    /// `self.output_shape(input.shape())`.
    fn forward(&self, input: &Tensor, output: &mut Tensor) -> Result<()>;

    /// A human-readable name, used in `Sequential::summary` and log records.
    fn name(&self) -> &str;

    /// Total count of trainable parameters (weights + biases) owned by this layer.
    fn parameter_count(&self) -> usize;

    /// Pure function from an input shape to this layer's output shape. Must not
    /// allocate a tensor or touch `self`'s buffers.
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>>;

    /// Deep-clones this layer, including its owned parameter tensors. Needed so the
    /// compiler (§4.6) can duplicate a model without knowing concrete layer types.
    fn clone_box(&self) -> Box<dyn Layer>;

    /// This variant's on-disk type tag (§4.5).
    fn type_tag(&self) -> u32;

    /// Appends this layer's type-specific record body (everything after the tag) to
    /// `out`, in the little-endian layout §4.5 specifies.
    fn write_body(&self, out: &mut Vec<u8>);

    /// Narrows back to a concrete type. The compiler's fuse/quantize passes (§4.6) need
    /// to recognize specific variants (Dense, an activation kind) inside the closed set
    /// without the trait itself growing a match-on-everything method.
    fn as_any(&self) -> &dyn std::any::Any
    where
        Self: 'static,
    {
        self
    }
}

/// Type tags and little-endian write helpers shared by every `write_body` impl and by
/// the parser in `crate::serialize` (§4.5).
pub mod wire {
    pub const TAG_DENSE: u32 = 1;
    pub const TAG_RELU: u32 = 2;
    pub const TAG_SIGMOID: u32 = 3;
    pub const TAG_TANH: u32 = 4;
    pub const TAG_SOFTMAX: u32 = 5;
    pub const TAG_CONV2D: u32 = 6;
    pub const TAG_MAXPOOL: u32 = 7;
    pub const TAG_AVGPOOL: u32 = 8;
    pub const TAG_FLATTEN: u32 = 9;

    pub fn write_u32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_floats(out: &mut Vec<u8>, data: &[f32]) {
        for &x in data {
            out.extend_from_slice(&x.to_le_bytes());
        }
    }
}

impl Clone for Box<dyn Layer> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl std::fmt::Debug for dyn Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({} params)", self.name(), self.parameter_count())
    }
}

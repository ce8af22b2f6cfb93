//! Blocked, SIMD-accelerated linear-algebra kernels (§4.2).
//!
//! Every kernel follows the same contract: `op(inputs.., output: &mut Tensor)`. `output`
//! is reallocated via [`Tensor::ensure_shape`] only when its shape doesn't already
//! match; otherwise its storage is reused. Shape/parameter mismatches are reported as
//! `InvalidArgument`.

pub mod elementwise;
pub mod im2col;
pub mod matmul;
pub mod quant;

pub use elementwise::{add, multiply, relu, scalar_multiply, sigmoid, softmax, tanh};
pub use im2col::{col2im, im2col, output_size, same_padding};
pub use matmul::{matmul_blocked, matmul_reference, matvec, transpose};
pub use quant::int8_gemm;

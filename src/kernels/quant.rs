//! Int8 GEMM over [`QuantizedTensor`] operands (§4.2 "Int8 GEMM").

use crate::error::{Result, TitanError};
use crate::tensor::{QuantizedTensor, Tensor};

/// `C = dequant(A) . dequant(B)`, computed via an int32 accumulator of
/// `(a - zp_a)(b - zp_b)` scaled by `scale_a * scale_b` once at the end.
pub fn int8_gemm(a: &QuantizedTensor, b: &QuantizedTensor, out: &mut Tensor) -> Result<()> {
    if a.shape().len() != 2 || b.shape().len() != 2 {
        return Err(TitanError::invalid_argument("int8_gemm requires rank-2 operands"));
    }
    let (m, k1) = (a.shape()[0], a.shape()[1]);
    let (k2, n) = (b.shape()[0], b.shape()[1]);
    if k1 != k2 {
        return Err(TitanError::invalid_argument(format!(
            "int8_gemm inner dimension mismatch: {:?} x {:?}",
            a.shape(),
            b.shape()
        )));
    }
    out.ensure_shape(&[m, n])?;

    let a_data = a.as_slice();
    let b_data = b.as_slice();
    let zp_a = a.zero_point as i32;
    let zp_b = b.zero_point as i32;
    let combined_scale = a.scale * b.scale;
    let c_data = out.as_mut_slice();

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            unsafe {
                int8_gemm_avx2(a_data, b_data, c_data, m, n, k1, zp_a, zp_b, combined_scale)
            };
            return Ok(());
        }
    }
    int8_gemm_scalar(a_data, b_data, c_data, m, n, k1, zp_a, zp_b, combined_scale);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn int8_gemm_scalar(
    a: &[i8],
    b: &[i8],
    c: &mut [f32],
    m: usize,
    n: usize,
    k: usize,
    zp_a: i32,
    zp_b: i32,
    scale: f32,
) {
    for i in 0..m {
        for j in 0..n {
            let mut acc: i32 = 0;
            for kk in 0..k {
                let av = a[i * k + kk] as i32 - zp_a;
                let bv = b[kk * n + j] as i32 - zp_b;
                acc += av * bv;
            }
            c[i * n + j] = acc as f32 * scale;
        }
    }
}

/// SIMD path: widens to i16 before subtracting zero-points (an i8 difference of two
/// i8 values can overflow i8), multiply-accumulates pairwise into i32, then reduces
/// horizontally. A scalar tail handles remaining columns.
#[cfg(target_arch = "x86_64")]
#[allow(clippy::too_many_arguments)]
#[target_feature(enable = "avx2")]
unsafe fn int8_gemm_avx2(
    a: &[i8],
    b: &[i8],
    c: &mut [f32],
    m: usize,
    n: usize,
    k: usize,
    zp_a: i32,
    zp_b: i32,
    scale: f32,
) {
    use std::arch::x86_64::*;

    let zp_a_vec = _mm_set1_epi16(zp_a as i16);
    let zp_b_vec = _mm_set1_epi16(zp_b as i16);

    for i in 0..m {
        for j in 0..n {
            let mut acc_vec = _mm_setzero_si128();
            let mut kk = 0usize;
            let mut b_scratch = [0i8; 8];
            while kk + 8 <= k {
                let a_i8 = _mm_loadl_epi64(a.as_ptr().add(i * k + kk) as *const __m128i);
                let a_i16 = _mm_sub_epi16(_mm_cvtepi8_epi16(a_i8), zp_a_vec);

                // B's column stride is n, not unit: gather via an 8-element scratch copy.
                for (t, s) in b_scratch.iter_mut().enumerate() {
                    *s = *b.get_unchecked((kk + t) * n + j);
                }
                let b_i8 = _mm_loadl_epi64(b_scratch.as_ptr() as *const __m128i);
                let b_i16 = _mm_sub_epi16(_mm_cvtepi8_epi16(b_i8), zp_b_vec);

                // madd_epi16 multiplies lanes pairwise and adds adjacent results,
                // i.e. sums 8 elementwise products into 4 int32 lanes.
                let prod = _mm_madd_epi16(a_i16, b_i16);
                acc_vec = _mm_add_epi32(acc_vec, prod);
                kk += 8;
            }

            let mut lanes = [0i32; 4];
            _mm_storeu_si128(lanes.as_mut_ptr() as *mut __m128i, acc_vec);
            let mut acc: i32 = lanes.iter().sum();

            while kk < k {
                let av = *a.get_unchecked(i * k + kk) as i32 - zp_a;
                let bv = *b.get_unchecked(kk * n + j) as i32 - zp_b;
                acc += av * bv;
                kk += 1;
            }
            *c.get_unchecked_mut(i * n + j) = acc as f32 * scale;
        }
    }
}

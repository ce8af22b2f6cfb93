//! Dense matrix product, matrix-vector product, and transpose (§4.2).

use crate::error::{Result, TitanError};
use crate::tensor::Tensor;

const MC: usize = 64;
const NC: usize = 64;
const KC: usize = 256;

fn check_matmul_shapes(a: &Tensor, b: &Tensor) -> Result<(usize, usize, usize)> {
    if a.rank() != 2 || b.rank() != 2 {
        return Err(TitanError::invalid_argument("matmul requires rank-2 tensors"));
    }
    let (m, k1) = (a.shape()[0], a.shape()[1]);
    let (k2, n) = (b.shape()[0], b.shape()[1]);
    if k1 != k2 {
        return Err(TitanError::invalid_argument(format!(
            "matmul inner dimension mismatch: {:?} x {:?}",
            a.shape(),
            b.shape()
        )));
    }
    Ok((m, k1, n))
}

/// Triple-loop reference matmul with deterministic left-to-right summation order.
pub fn matmul_reference(a: &Tensor, b: &Tensor, out: &mut Tensor) -> Result<()> {
    let (m, k, n) = check_matmul_shapes(a, b)?;
    out.ensure_shape(&[m, n])?;

    let a_data = a.as_slice();
    let b_data = b.as_slice();
    let c_data = out.as_mut_slice();

    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0f32;
            for kk in 0..k {
                sum += a_data[i * k + kk] * b_data[kk * n + j];
            }
            c_data[i * n + j] = sum;
        }
    }
    Ok(())
}

/// Three-level blocked matmul with an AVX2+FMA inner kernel where available. Summation
/// order differs from [`matmul_reference`]; see §4.2 for the accepted tolerance.
pub fn matmul_blocked(a: &Tensor, b: &Tensor, out: &mut Tensor) -> Result<()> {
    let (m, k, n) = check_matmul_shapes(a, b)?;
    out.ensure_shape(&[m, n])?;
    out.zero();

    let a_data = a.as_slice();
    let b_data = b.as_slice();
    let c_data = out.as_mut_slice();

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            unsafe { blocked_avx2(a_data, b_data, c_data, m, n, k) };
            return Ok(());
        }
    }
    blocked_scalar(a_data, b_data, c_data, m, n, k);
    Ok(())
}

fn blocked_scalar(a: &[f32], b: &[f32], c: &mut [f32], m: usize, n: usize, k: usize) {
    for mc in (0..m).step_by(MC) {
        let m_end = (mc + MC).min(m);
        for kc in (0..k).step_by(KC) {
            let k_end = (kc + KC).min(k);
            for nc in (0..n).step_by(NC) {
                let n_end = (nc + NC).min(n);
                for i in mc..m_end {
                    for j in nc..n_end {
                        let mut sum = 0.0f32;
                        for kk in kc..k_end {
                            sum += a[i * k + kk] * b[kk * n + j];
                        }
                        c[i * n + j] += sum;
                    }
                }
            }
        }
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn blocked_avx2(a: &[f32], b: &[f32], c: &mut [f32], m: usize, n: usize, k: usize) {
    use std::arch::x86_64::*;

    for mc in (0..m).step_by(MC) {
        let m_end = (mc + MC).min(m);
        for kc in (0..k).step_by(KC) {
            let k_end = (kc + KC).min(k);
            for nc in (0..n).step_by(NC) {
                let n_end = (nc + NC).min(n);
                for i in mc..m_end {
                    for j in nc..n_end {
                        let mut acc = _mm256_setzero_ps();
                        let mut kk = kc;
                        let mut scratch = [0.0f32; 8];
                        while kk + 8 <= k_end {
                            let a_vec = _mm256_loadu_ps(a.as_ptr().add(i * k + kk));
                            // B's column stride is n, not unit: gather via scratch copy.
                            for (t, s) in scratch.iter_mut().enumerate() {
                                *s = *b.get_unchecked((kk + t) * n + j);
                            }
                            let b_vec = _mm256_loadu_ps(scratch.as_ptr());
                            acc = _mm256_fmadd_ps(a_vec, b_vec, acc);
                            kk += 8;
                        }
                        let mut lanes = [0.0f32; 8];
                        _mm256_storeu_ps(lanes.as_mut_ptr(), acc);
                        let mut sum: f32 = lanes.iter().sum();
                        while kk < k_end {
                            sum += a[i * k + kk] * b[kk * n + j];
                            kk += 1;
                        }
                        *c.get_unchecked_mut(i * n + j) += sum;
                    }
                }
            }
        }
    }
}

/// Matrix-vector product: `(M,K) x (K) -> (M)`.
pub fn matvec(a: &Tensor, x: &Tensor, out: &mut Tensor) -> Result<()> {
    if a.rank() != 2 || x.rank() != 1 {
        return Err(TitanError::invalid_argument("matvec requires a rank-2 matrix and rank-1 vector"));
    }
    let (m, k) = (a.shape()[0], a.shape()[1]);
    if x.shape()[0] != k {
        return Err(TitanError::invalid_argument(format!(
            "matvec dimension mismatch: matrix {:?}, vector {:?}",
            a.shape(),
            x.shape()
        )));
    }
    out.ensure_shape(&[m])?;

    let a_data = a.as_slice();
    let x_data = x.as_slice();
    let y_data = out.as_mut_slice();
    for i in 0..m {
        let mut sum = 0.0f32;
        for kk in 0..k {
            sum += a_data[i * k + kk] * x_data[kk];
        }
        y_data[i] = sum;
    }
    Ok(())
}

/// Row-major transpose: `(M,N) -> (N,M)`.
pub fn transpose(a: &Tensor, out: &mut Tensor) -> Result<()> {
    if a.rank() != 2 {
        return Err(TitanError::invalid_argument("transpose requires a rank-2 tensor"));
    }
    let (m, n) = (a.shape()[0], a.shape()[1]);
    out.ensure_shape(&[n, m])?;

    let a_data = a.as_slice();
    let t_data = out.as_mut_slice();
    for i in 0..m {
        for j in 0..n {
            t_data[j * m + i] = a_data[i * n + j];
        }
    }
    Ok(())
}

fn relative_close(a: f32, b: f32) -> bool {
    (a - b).abs() <= 0.01 + 0.01 * b.abs()
}

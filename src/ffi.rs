//! `extern "C"` surface over an opaque handle, for embedding from non-Rust hosts (§6.2).
//!
//! Every function is panic-free from the caller's perspective: Rust panics are caught
//! at the boundary and reported as `StatusCode::InferenceError` rather than unwinding
//! across the FFI edge.

use crate::error::TitanError;
use crate::handle::ModelHandle;
use crate::tensor::Tensor;
use std::ffi::{c_char, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::Mutex;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 0,
    LoadError = 1,
    InferenceError = 2,
    ValidationError = 3,
    InvalidArgument = 4,
}

/// Opaque handle returned to C callers. Pairs a [`ModelHandle`] with the last error
/// message produced on this handle, since the C API has no `Result` to propagate one.
pub struct TitanHandle {
    model: ModelHandle,
    last_error: Mutex<Option<String>>,
}

fn set_last_error(handle: &TitanHandle, message: String) {
    *handle.last_error.lock().unwrap() = Some(message);
}

fn status_for(err: &TitanError) -> StatusCode {
    match err {
        TitanError::ModelLoad(_) => StatusCode::LoadError,
        TitanError::Inference(_) => StatusCode::InferenceError,
        TitanError::Validation(_) => StatusCode::ValidationError,
        TitanError::InvalidArgument(_) => StatusCode::InvalidArgument,
    }
}

/// Loads a model from `path` (a NUL-terminated UTF-8 string). Returns a valid handle
/// pointer on success, or null on failure; callers should not expect a last-error
/// message on a null return since there is no handle to attach it to.
///
/// # Safety
/// `path` must be a valid, NUL-terminated, readable pointer for the duration of the
/// call.
#[no_mangle]
pub unsafe extern "C" fn titan_load_model(path: *const c_char) -> *mut TitanHandle {
    if path.is_null() {
        return ptr::null_mut();
    }
    let result = catch_unwind(|| {
        let c_str = CStr::from_ptr(path);
        let path_str = c_str.to_str().map_err(|_| TitanError::invalid_argument("path is not valid UTF-8"))?;
        ModelHandle::builder(path_str).build()
    });

    match result {
        Ok(Ok(model)) => Box::into_raw(Box::new(TitanHandle {
            model,
            last_error: Mutex::new(None),
        })),
        _ => ptr::null_mut(),
    }
}

/// Frees a handle returned by [`titan_load_model`]. Safe to call with null (no-op).
///
/// # Safety
/// `handle` must either be null or a pointer previously returned by
/// [`titan_load_model`] that has not already been freed.
#[no_mangle]
pub unsafe extern "C" fn titan_free_model(handle: *mut TitanHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Runs one prediction. `input` must have exactly `input_len` elements matching the
/// model's expected input shape; `output` must have capacity for at least
/// `output_capacity` elements. Writes the number of elements actually produced to
/// `*output_len` on success.
///
/// # Safety
/// `handle` must be a live pointer from [`titan_load_model`]. `input` must be readable
/// for `input_len` elements. `output` must be writable for `output_capacity` elements.
/// `output_len` must be writable for one `usize`.
#[no_mangle]
pub unsafe extern "C" fn titan_predict(
    handle: *mut TitanHandle,
    input: *const f32,
    input_len: usize,
    output: *mut f32,
    output_capacity: usize,
    output_len: *mut usize,
) -> StatusCode {
    let handle = match handle.as_ref() {
        Some(h) => h,
        None => return StatusCode::InvalidArgument,
    };

    let input_slice = std::slice::from_raw_parts(input, input_len);
    let shape = handle.model.expected_input_shape().to_vec();

    let result = catch_unwind(AssertUnwindSafe(|| {
        let tensor = Tensor::from_data(shape, input_slice)?;
        handle.model.predict(tensor)
    }));

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(_) => {
            set_last_error(handle, "internal panic during predict".to_string());
            return StatusCode::InferenceError;
        }
    };

    match outcome {
        Ok(tensor) => {
            let data = tensor.as_slice();
            if data.len() > output_capacity {
                set_last_error(
                    handle,
                    format!("output buffer too small: need {}, have {}", data.len(), output_capacity),
                );
                return StatusCode::InvalidArgument;
            }
            std::slice::from_raw_parts_mut(output, data.len()).copy_from_slice(data);
            *output_len = data.len();
            StatusCode::Ok
        }
        Err(e) => {
            let status = status_for(&e);
            set_last_error(handle, e.to_string());
            status
        }
    }
}

/// # Safety
/// `handle` must be a live pointer from [`titan_load_model`]. The returned pointer is
/// owned by the caller and must be freed with [`titan_free_string`].
#[no_mangle]
pub unsafe extern "C" fn titan_last_error(handle: *mut TitanHandle) -> *mut c_char {
    let handle = match handle.as_ref() {
        Some(h) => h,
        None => return ptr::null_mut(),
    };
    match handle.last_error.lock().unwrap().clone() {
        Some(msg) => CString::new(msg).map(CString::into_raw).unwrap_or(ptr::null_mut()),
        None => ptr::null_mut(),
    }
}

/// Frees a string returned by [`titan_last_error`].
///
/// # Safety
/// `s` must either be null or a pointer previously returned by [`titan_last_error`].
#[no_mangle]
pub unsafe extern "C" fn titan_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// # Safety
/// `handle` must be a live pointer from [`titan_load_model`].
#[no_mangle]
pub unsafe extern "C" fn titan_layer_count(handle: *mut TitanHandle) -> usize {
    match handle.as_ref() {
        Some(h) => h.model.layer_count(),
        None => 0,
    }
}

/// # Safety
/// `handle` must be a live pointer from [`titan_load_model`].
#[no_mangle]
pub unsafe extern "C" fn titan_is_loaded(handle: *mut TitanHandle) -> bool {
    handle.as_ref().map(|h| h.model.is_loaded()).unwrap_or(false)
}

/// # Safety
/// `handle` must be a live pointer from [`titan_load_model`].
#[no_mangle]
pub unsafe extern "C" fn titan_inference_count(handle: *mut TitanHandle) -> u64 {
    match handle.as_ref() {
        Some(h) => h.model.stats().count,
        None => 0,
    }
}

/// # Safety
/// `handle` must be a live pointer from [`titan_load_model`].
#[no_mangle]
pub unsafe extern "C" fn titan_mean_latency_ms(handle: *mut TitanHandle) -> f64 {
    match handle.as_ref() {
        Some(h) => h.model.stats().mean().as_secs_f64() * 1000.0,
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Activation, Dense};
    use crate::model::Sequential;
    use crate::serialize::save_to_path;
    use std::ffi::CString;

    fn write_test_model(path: &std::path::Path) {
        let w1 = Tensor::from_data(vec![4, 2], &[0.1; 8]).unwrap();
        let w2 = Tensor::from_data(vec![1, 4], &[0.1; 4]).unwrap();
        let model = Sequential::from_layers(vec![
            Box::new(Dense::new(w1, None).unwrap()),
            Box::new(Activation::ReLU),
            Box::new(Dense::new(w2, None).unwrap()),
        ]);
        save_to_path(&model, path).unwrap();
    }

    #[test]
    fn load_predict_and_free_round_trip() {
        let path = std::env::temp_dir().join("titaninfer_ffi_test.titn");
        write_test_model(&path);
        let c_path = CString::new(path.to_str().unwrap()).unwrap();

        unsafe {
            let handle = titan_load_model(c_path.as_ptr());
            assert!(!handle.is_null());
            assert_eq!(titan_layer_count(handle), 3);

            let input = [1.0f32, 2.0];
            let mut output = [0.0f32; 4];
            let mut output_len = 0usize;
            let status = titan_predict(handle, input.as_ptr(), input.len(), output.as_mut_ptr(), output.len(), &mut output_len);
            assert_eq!(status, StatusCode::Ok);
            assert_eq!(output_len, 1);

            titan_free_model(handle);
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn predict_with_undersized_output_buffer_reports_invalid_argument() {
        let path = std::env::temp_dir().join("titaninfer_ffi_test_small_buf.titn");
        write_test_model(&path);
        let c_path = CString::new(path.to_str().unwrap()).unwrap();

        unsafe {
            let handle = titan_load_model(c_path.as_ptr());
            let input = [1.0f32, 2.0];
            let mut output: [f32; 0] = [];
            let mut output_len = 0usize;
            let status = titan_predict(handle, input.as_ptr(), input.len(), output.as_mut_ptr(), output.len(), &mut output_len);
            assert_eq!(status, StatusCode::InvalidArgument);

            let err = titan_last_error(handle);
            assert!(!err.is_null());
            titan_free_string(err);
            titan_free_model(handle);
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn load_missing_file_returns_null() {
        let c_path = CString::new("/nonexistent/path.titn").unwrap();
        unsafe {
            let handle = titan_load_model(c_path.as_ptr());
            assert!(handle.is_null());
        }
    }
}

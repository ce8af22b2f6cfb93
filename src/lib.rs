//! TitanInfer: a CPU-only inference engine for pre-trained feed-forward models.
//!
//! Load a serialized model, compile it (layer fusion, optional quantization,
//! pre-allocated buffers), and run predictions through [`handle::ModelHandle`] or the
//! lower-level [`engine::InferenceEngine`] directly.

pub mod batcher;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod kernels;
pub mod layers;
#[macro_use]
pub mod logger;
pub mod model;
pub mod serialize;
pub mod tensor;
pub mod threadpool;

pub use compiler::{compile, CompileOptions, CompiledModel};
pub use engine::{InferenceEngine, ProfilingStats};
pub use error::{InferenceError, ModelLoadError, Result, TitanError, ValidationError};
pub use handle::{ModelHandle, ModelHandleBuilder};
pub use model::Sequential;
pub use serialize::{deserialize, load_from_path, save_to_path, serialize};
pub use tensor::Tensor;

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a `tracing` subscriber reading `RUST_LOG` (defaulting to `info`). Intended
/// for host applications embedding this crate; library code itself never initializes
/// logging on its own.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

//! Mutex-guarded façade over a compiled model: the crate's primary embedding surface
//! (§4.10).

use crate::batcher::{BatcherConfig, DynamicBatcher};
use crate::compiler::{compile, CompileOptions};
use crate::engine::{InferenceEngine, ProfilingStats};
use crate::error::{ModelLoadError, Result, TitanError};
use crate::layers::Dense;
use crate::logger::LogLevel;
use crate::serialize::load_from_path;
use crate::tensor::Tensor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, instrument};

/// What drives a single predict call once a handle is built: either the engine
/// directly, or an engine fronted by a [`DynamicBatcher`] when `batcher_config` was set.
enum Backend {
    Direct(InferenceEngine),
    Batched(DynamicBatcher),
}

/// Thread-safe entry point wrapping one loaded model. Every public method takes `&self`
/// and serializes access internally; move the handle itself (it's `Send`) rather than
/// sharing `&mut` across threads.
pub struct ModelHandle {
    backend: Mutex<Backend>,
    input_shape: Vec<usize>,
    model_path: PathBuf,
}

impl ModelHandle {
    pub fn builder(model_path: impl Into<PathBuf>) -> ModelHandleBuilder {
        ModelHandleBuilder::new(model_path)
    }

    /// Runs one prediction through the loaded model, validating shape and NaN content
    /// at the boundary (§4.10, §7.3).
    #[instrument(skip(self, input))]
    pub fn predict(&self, input: Tensor) -> Result<Tensor> {
        let mut backend = self.backend.lock().unwrap();
        match &mut *backend {
            Backend::Direct(engine) => engine.predict(&input),
            Backend::Batched(batcher) => batcher.predict(input),
        }
    }

    pub fn predict_batch(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        inputs.into_iter().map(|input| self.predict(input)).collect()
    }

    pub fn is_loaded(&self) -> bool {
        true
    }

    pub fn expected_input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    pub fn layer_count(&self) -> usize {
        match &*self.backend.lock().unwrap() {
            Backend::Direct(engine) => engine.layer_count(),
            Backend::Batched(_) => 0,
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Returns a snapshot of the profiling accumulator. Unavailable (returns the
    /// zeroed default) once requests are routed through a batcher, since the batcher
    /// owns the engine on its own consumer thread.
    pub fn stats(&self) -> ProfilingStats {
        match &*self.backend.lock().unwrap() {
            Backend::Direct(engine) => engine.stats().clone(),
            Backend::Batched(_) => ProfilingStats::default(),
        }
    }

    pub fn reset_stats(&self) {
        if let Backend::Direct(engine) = &mut *self.backend.lock().unwrap() {
            engine.reset_stats();
        }
    }
}

/// Collects construction-time options before `build()` loads and compiles the model
/// (§4.10). Mirrors the teacher's builder-then-validate pattern rather than a
/// many-argument constructor.
pub struct ModelHandleBuilder {
    model_path: PathBuf,
    enable_profiling: bool,
    warmup_runs: usize,
    input_shape: Option<Vec<usize>>,
    log_level: Option<LogLevel>,
    compile_options: CompileOptions,
    batcher_config: Option<BatcherConfig>,
}

impl ModelHandleBuilder {
    fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            enable_profiling: false,
            warmup_runs: 0,
            input_shape: None,
            log_level: None,
            compile_options: CompileOptions::default(),
            batcher_config: None,
        }
    }

    pub fn enable_profiling(mut self, enabled: bool) -> Self {
        self.enable_profiling = enabled;
        self
    }

    pub fn warmup_runs(mut self, n: usize) -> Self {
        self.warmup_runs = n;
        self
    }

    /// Overrides shape inference. Required for any model whose first layer isn't
    /// `Dense` (the only layer type a shape can be inferred from).
    pub fn input_shape(mut self, shape: Vec<usize>) -> Self {
        self.input_shape = Some(shape);
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn compile_options(mut self, options: CompileOptions) -> Self {
        self.compile_options = options;
        self
    }

    /// Routes `predict` calls through a [`DynamicBatcher`] instead of calling the
    /// engine directly; profiling stats become unavailable through the handle once set.
    pub fn batcher_config(mut self, config: BatcherConfig) -> Self {
        self.batcher_config = Some(config);
        self
    }

    #[instrument(skip(self))]
    pub fn build(self) -> Result<ModelHandle> {
        if let Some(level) = self.log_level {
            crate::logger::set_level(level);
        }

        let model = load_from_path(&self.model_path)?;
        let input_shape = match self.input_shape {
            Some(shape) => shape,
            None => infer_input_shape(&model)?,
        };

        let compiled = compile(&model, &input_shape, self.compile_options)?;
        let mut engine = InferenceEngine::new(compiled, self.enable_profiling);
        if self.warmup_runs > 0 {
            engine.warmup(self.warmup_runs)?;
        }

        info!(path = %self.model_path.display(), layers = engine.layer_count(), "model loaded");

        let backend = match self.batcher_config {
            Some(config) => Backend::Batched(DynamicBatcher::new(engine, config)),
            None => Backend::Direct(engine),
        };

        Ok(ModelHandle {
            backend: Mutex::new(backend),
            input_shape,
            model_path: self.model_path,
        })
    }
}

fn infer_input_shape(model: &crate::model::Sequential) -> Result<Vec<usize>> {
    let first = model
        .layers()
        .first()
        .ok_or_else(|| TitanError::ModelLoad(ModelLoadError::EmptyModel))?;
    match first.as_any().downcast_ref::<Dense>() {
        Some(dense) => Ok(vec![dense.in_features()]),
        None => Err(TitanError::invalid_argument(
            "model's first layer isn't Dense; input_shape must be supplied explicitly",
        )),
    }
}

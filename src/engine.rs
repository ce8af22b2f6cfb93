//! Pre-allocated buffer chain, validated predict, optional profiling, warmup (§4.7).

use crate::batcher::BatchForward;
use crate::compiler::CompiledModel;
use crate::error::{InferenceError, Result, TitanError, ValidationError};
use crate::tensor::Tensor;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Running latency/throughput counters, reset independently of the engine's buffers.
#[derive(Debug, Clone, Default)]
pub struct ProfilingStats {
    pub count: u64,
    pub total: Duration,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
    pub per_layer_total: Vec<Duration>,
}

impl ProfilingStats {
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }

    fn record(&mut self, elapsed: Duration, per_layer: &[Duration]) {
        self.count += 1;
        self.total += elapsed;
        self.min = Some(self.min.map_or(elapsed, |m| m.min(elapsed)));
        self.max = Some(self.max.map_or(elapsed, |m| m.max(elapsed)));
        if self.per_layer_total.len() < per_layer.len() {
            self.per_layer_total.resize(per_layer.len(), Duration::ZERO);
        }
        for (acc, &d) in self.per_layer_total.iter_mut().zip(per_layer) {
            *acc += d;
        }
    }
}

/// Compiled model + per-layer buffers + optional profiling accumulator (§3.6).
pub struct InferenceEngine {
    compiled: CompiledModel,
    profiling_enabled: bool,
    stats: ProfilingStats,
}

impl InferenceEngine {
    pub fn new(compiled: CompiledModel, profiling_enabled: bool) -> Self {
        Self {
            compiled,
            profiling_enabled,
            stats: ProfilingStats::default(),
        }
    }

    pub fn input_shape(&self) -> &[usize] {
        self.compiled.input_shape()
    }

    pub fn output_shape(&self) -> &[usize] {
        self.compiled.output_shape()
    }

    pub fn layer_count(&self) -> usize {
        self.compiled.model().len()
    }

    pub fn stats(&self) -> &ProfilingStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = ProfilingStats::default();
    }

    fn validate(&self, input: &Tensor) -> Result<()> {
        if input.shape() != self.compiled.input_shape() {
            return Err(TitanError::Validation(ValidationError::ShapeMismatch(format!(
                "expected input shape {:?}, got {:?}",
                self.compiled.input_shape(),
                input.shape()
            ))));
        }
        if input.as_slice().iter().any(|x| x.is_nan()) {
            return Err(TitanError::Validation(ValidationError::NanInput));
        }
        Ok(())
    }

    /// Validates, executes the compiled layer chain, and returns a deep copy of the
    /// final buffer (§4.7).
    #[instrument(skip(self, input))]
    pub fn predict(&mut self, input: &Tensor) -> Result<Tensor> {
        self.validate(input)?;

        let start = self.profiling_enabled.then(Instant::now);
        let mut per_layer;

        {
            let (model, buffers) = self.compiled.split_model_and_buffers();
            let layers = model.layers();
            if layers.is_empty() {
                return Err(TitanError::Inference(InferenceError::NoModelLoaded));
            }
            per_layer = Vec::with_capacity(layers.len());

            let layer_start = self.profiling_enabled.then(Instant::now);
            layers[0]
                .forward(input, &mut buffers[0])
                .map_err(|e| TitanError::Inference(InferenceError::InternalError(e.to_string())))?;
            if let Some(t) = layer_start {
                per_layer.push(t.elapsed());
            }

            for i in 1..layers.len() {
                let layer_start = self.profiling_enabled.then(Instant::now);
                let (head, tail) = buffers.split_at_mut(i);
                layers[i]
                    .forward(&head[i - 1], &mut tail[0])
                    .map_err(|e| TitanError::Inference(InferenceError::InternalError(e.to_string())))?;
                if let Some(t) = layer_start {
                    per_layer.push(t.elapsed());
                }
            }
        }

        if let Some(t0) = start {
            self.stats.record(t0.elapsed(), &per_layer);
        }

        let result = self.compiled.buffers().last().expect("non-empty model has buffers").deep_clone();
        debug!(output_shape = ?result.shape(), "predict complete");
        Ok(result)
    }

    pub fn predict_batch(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        inputs.iter().map(|input| self.predict(input)).collect()
    }

    /// Runs `n` dummy predicts on a zero-filled input, then clears the profiling
    /// accumulator so warmup cost doesn't pollute real measurements.
    pub fn warmup(&mut self, n: usize) -> Result<()> {
        let input = Tensor::from_shape(self.compiled.input_shape().to_vec())?;
        for _ in 0..n {
            self.predict(&input)?;
        }
        self.reset_stats();
        Ok(())
    }
}

/// Drives the model-level ping-pong forward (§4.4) directly on a caller-stacked batch,
/// bypassing the per-sample validated `predict` path. Used by [`crate::batcher`] once it
/// has already stacked same-shaped inputs.
impl BatchForward for InferenceEngine {
    fn forward_batch(&mut self, stacked: &Tensor, _batch_size: usize) -> Result<Tensor> {
        if self.compiled.model().is_empty() {
            return Err(TitanError::Inference(InferenceError::NoModelLoaded));
        }
        let mut a = Tensor::from_shape(stacked.shape().to_vec())?;
        let mut b = Tensor::from_shape(stacked.shape().to_vec())?;
        let result = self
            .compiled
            .model()
            .forward(stacked, &mut a, &mut b)
            .map_err(|e| TitanError::Inference(InferenceError::InternalError(e.to_string())))?;
        Ok(result.deep_clone())
    }

    fn sample_output_shape(&self) -> Vec<usize> {
        self.output_shape().to_vec()
    }

    fn input_shape(&self) -> Vec<usize> {
        InferenceEngine::input_shape(self).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompileOptions};
    use crate::layers::{Activation, Dense};
    use crate::model::Sequential;

    fn engine() -> InferenceEngine {
        let w1 = Tensor::from_data(vec![4, 2], &[0.1; 8]).unwrap();
        let w2 = Tensor::from_data(vec![1, 4], &[0.1; 4]).unwrap();
        let model = Sequential::from_layers(vec![
            Box::new(Dense::new(w1, None).unwrap()),
            Box::new(Activation::ReLU),
            Box::new(Dense::new(w2, None).unwrap()),
        ]);
        let compiled = compile(&model, &[2], CompileOptions { enable_fusion: false, enable_quantization: false }).unwrap();
        InferenceEngine::new(compiled, true)
    }

    #[test]
    fn predict_returns_correct_shape_and_records_stats() {
        let mut eng = engine();
        let input = Tensor::from_data(vec![2], &[1.0, 2.0]).unwrap();
        let out = eng.predict(&input).unwrap();
        assert_eq!(out.shape(), &[1]);
        assert_eq!(eng.stats().count, 1);
    }

    #[test]
    fn predict_rejects_shape_mismatch() {
        let mut eng = engine();
        let input = Tensor::from_data(vec![3], &[1.0, 2.0, 3.0]).unwrap();
        let err = eng.predict(&input).unwrap_err();
        assert!(matches!(err, TitanError::Validation(ValidationError::ShapeMismatch(_))));
    }

    #[test]
    fn predict_rejects_nan_input() {
        let mut eng = engine();
        let input = Tensor::from_data(vec![2], &[f32::NAN, 1.0]).unwrap();
        let err = eng.predict(&input).unwrap_err();
        assert!(matches!(err, TitanError::Validation(ValidationError::NanInput)));
    }

    #[test]
    fn warmup_clears_stats_afterward() {
        let mut eng = engine();
        eng.warmup(3).unwrap();
        assert_eq!(eng.stats().count, 0);
    }

    #[test]
    fn predict_batch_runs_each_input_independently() {
        let mut eng = engine();
        let inputs = vec![
            Tensor::from_data(vec![2], &[1.0, 2.0]).unwrap(),
            Tensor::from_data(vec![2], &[3.0, 4.0]).unwrap(),
        ];
        let outs = eng.predict_batch(&inputs).unwrap();
        assert_eq!(outs.len(), 2);
    }
}

//! Clone → fuse → quantize → shape-chain pre-allocate (§4.6).

use crate::error::{Result, TitanError};
use crate::layers::{Activation, Dense, FusedDenseReLU, FusedDenseSigmoid, Layer, QuantizedDense};
use crate::model::Sequential;
use crate::tensor::Tensor;
use tracing::{debug, instrument};

/// Toggles for the fuse and quantize passes; the clone and shape-chain passes always run.
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    pub enable_fusion: bool,
    pub enable_quantization: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            enable_fusion: true,
            enable_quantization: false,
        }
    }
}

/// Immutable after construction: an owned, rewritten [`Sequential`], the declared input
/// shape, and one pre-allocated intermediate tensor per layer (§3.5).
pub struct CompiledModel {
    model: Sequential,
    input_shape: Vec<usize>,
    buffers: Vec<Tensor>,
}

impl CompiledModel {
    pub fn model(&self) -> &Sequential {
        &self.model
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    pub fn buffers(&self) -> &[Tensor] {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut [Tensor] {
        &mut self.buffers
    }

    /// Splits the struct into disjoint borrows of its model and its buffers, so a
    /// caller can read layers while mutating buffers in the same forward pass.
    pub fn split_model_and_buffers(&mut self) -> (&Sequential, &mut [Tensor]) {
        (&self.model, &mut self.buffers)
    }

    pub fn output_shape(&self) -> &[usize] {
        self.buffers
            .last()
            .map(Tensor::shape)
            .unwrap_or(&self.input_shape)
    }
}

/// Runs the four compiler phases on `source`, producing a [`CompiledModel`] ready for
/// [`crate::engine::InferenceEngine`].
#[instrument(skip(source, options))]
pub fn compile(source: &Sequential, input_shape: &[usize], options: CompileOptions) -> Result<CompiledModel> {
    if source.is_empty() {
        return Err(TitanError::invalid_argument("cannot compile an empty model"));
    }

    let cloned = clone_phase(source);
    let fused = if options.enable_fusion { fuse_phase(cloned) } else { cloned };
    let quantized = if options.enable_quantization {
        quantize_phase(fused)?
    } else {
        fused
    };
    let buffers = preallocate_phase(&quantized, input_shape)?;

    debug!(layers = quantized.len(), buffers = buffers.len(), "compiled model");
    Ok(CompiledModel {
        model: quantized,
        input_shape: input_shape.to_vec(),
        buffers,
    })
}

/// Phase 1: an independent deep clone, each layer duplicating its own parameter tensors.
fn clone_phase(source: &Sequential) -> Sequential {
    source.deep_clone()
}

/// Phase 2: left-to-right scan, fusing Dense+ReLU and Dense+Sigmoid pairs. Strictly
/// two-at-a-time; a fused layer is never itself a fusion candidate.
fn fuse_phase(source: Sequential) -> Sequential {
    let layers = source.layers();
    let mut out: Vec<Box<dyn Layer>> = Vec::with_capacity(layers.len());
    let mut i = 0;
    while i < layers.len() {
        let fused = layers.get(i + 1).and_then(|next| {
            let dense = as_dense(layers[i].as_ref())?;
            let activation = as_activation(next.as_ref())?;
            match activation {
                Activation::ReLU => Some(Box::new(FusedDenseReLU::from_dense(dense.clone())) as Box<dyn Layer>),
                Activation::Sigmoid => Some(Box::new(FusedDenseSigmoid::from_dense(dense.clone())) as Box<dyn Layer>),
                _ => None,
            }
        });
        match fused {
            Some(layer) => {
                out.push(layer);
                i += 2;
            }
            None => {
                out.push(layers[i].clone_box());
                i += 1;
            }
        }
    }
    Sequential::from_layers(out)
}

/// Phase 3: replaces every remaining (post-fusion) Dense with a QuantizedDense.
fn quantize_phase(source: Sequential) -> Result<Sequential> {
    let mut out = Vec::with_capacity(source.len());
    for layer in source.layers() {
        if let Some(dense) = as_dense(layer.as_ref()) {
            out.push(Box::new(QuantizedDense::from_dense(dense)?) as Box<dyn Layer>);
        } else {
            out.push(layer.clone_box());
        }
    }
    Ok(Sequential::from_layers(out))
}

/// Phase 4: chains `output_shape` from the declared input, allocating one buffer per
/// layer.
fn preallocate_phase(model: &Sequential, input_shape: &[usize]) -> Result<Vec<Tensor>> {
    let mut shape = input_shape.to_vec();
    let mut buffers = Vec::with_capacity(model.len());
    for layer in model.layers() {
        shape = layer.output_shape(&shape)?;
        buffers.push(Tensor::from_shape(shape.clone())?);
    }
    Ok(buffers)
}

fn as_dense(layer: &dyn Layer) -> Option<&Dense> {
    layer.as_any().downcast_ref::<Dense>()
}

fn as_activation(layer: &dyn Layer) -> Option<Activation> {
    layer.as_any().downcast_ref::<Activation>().copied()
}

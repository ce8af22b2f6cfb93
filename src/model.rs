//! Ordered layer sequence with ping-pong-buffered forward (§3.4, §4.4).

use crate::error::{Result, TitanError};
use crate::layers::Layer;
use crate::tensor::Tensor;

/// An ordered list of owned layers. Consecutive layers must be shape-compatible for
/// some declared input shape; this is only checked at compile/load time (§3.4), not on
/// every mutation.
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
}

impl Sequential {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn from_layers(layers: Vec<Box<dyn Layer>>) -> Self {
        Self { layers }
    }

    pub fn push(&mut self, layer: Box<dyn Layer>) {
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Chains `output_shape` across every layer starting from `input_shape`.
    pub fn infer_output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        let mut shape = input_shape.to_vec();
        for layer in &self.layers {
            shape = layer.output_shape(&shape)?;
        }
        Ok(shape)
    }

    /// Runs every layer using two ping-pong buffers: layer 0 writes buffer A, layer 1
    /// reads A and writes B, layer 2 reads B and writes A, and so on. Each layer's
    /// forward auto-grows its receiving buffer if the shape differs. Returns a
    /// reference to whichever buffer holds the final result.
    ///
    /// This is the model-level default; the compiled/engine path (§4.6) instead
    /// allocates one buffer per layer to avoid any aliasing assumptions between
    /// adjacent stages.
    pub fn forward<'a>(&self, input: &Tensor, buf_a: &'a mut Tensor, buf_b: &'a mut Tensor) -> Result<&'a Tensor> {
        if self.layers.is_empty() {
            return Err(TitanError::invalid_argument("cannot run forward on an empty model"));
        }

        self.layers[0].forward(input, buf_a)?;
        let mut last_is_a = true;
        for layer in &self.layers[1..] {
            if last_is_a {
                layer.forward(buf_a, buf_b)?;
            } else {
                layer.forward(buf_b, buf_a)?;
            }
            last_is_a = !last_is_a;
        }
        Ok(if last_is_a { buf_a } else { buf_b })
    }

    pub fn deep_clone(&self) -> Sequential {
        Sequential {
            layers: self.layers.iter().map(|l| l.clone_box()).collect(),
        }
    }

    /// Emits one line per layer (name, output shape, parameter count) plus a total,
    /// given a caller-supplied input shape to chain `output_shape` from.
    pub fn summary(&self, input_shape: &[usize]) -> Result<String> {
        let mut out = String::new();
        let mut shape = input_shape.to_vec();
        let mut total_params = 0usize;
        for layer in &self.layers {
            shape = layer.output_shape(&shape)?;
            total_params += layer.parameter_count();
            out.push_str(&format!(
                "{:<20} output={:<20?} params={}\n",
                layer.name(),
                shape,
                layer.parameter_count()
            ));
        }
        out.push_str(&format!("total params: {}\n", total_params));
        Ok(out)
    }
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Activation, Dense};
    use crate::tensor::Tensor;

    fn mlp() -> Sequential {
        let w1 = Tensor::from_data(vec![4, 2], &[0.1, 0.2, 0.1, 0.2, 0.1, 0.2, 0.1, 0.2]).unwrap();
        let d1 = Dense::new(w1, None).unwrap();
        let w2 = Tensor::from_data(vec![1, 4], &[0.1, 0.1, 0.1, 0.1]).unwrap();
        let d2 = Dense::new(w2, None).unwrap();
        Sequential::from_layers(vec![
            Box::new(d1),
            Box::new(Activation::ReLU),
            Box::new(d2),
        ])
    }

    #[test]
    fn ping_pong_forward_matches_sequential_shapes() {
        let model = mlp();
        let input = Tensor::from_data(vec![2], &[1.0, 2.0]).unwrap();
        let mut a = Tensor::from_shape(vec![1]).unwrap();
        let mut b = Tensor::from_shape(vec![1]).unwrap();
        let result = model.forward(&input, &mut a, &mut b).unwrap();
        assert_eq!(result.shape(), &[1]);
    }

    #[test]
    fn infer_output_shape_chains_layers() {
        let model = mlp();
        assert_eq!(model.infer_output_shape(&[2]).unwrap(), vec![1]);
    }

    #[test]
    fn empty_model_forward_errors() {
        let model = Sequential::new();
        let input = Tensor::from_data(vec![2], &[1.0, 2.0]).unwrap();
        let mut a = Tensor::from_shape(vec![1]).unwrap();
        let mut b = Tensor::from_shape(vec![1]).unwrap();
        assert!(model.forward(&input, &mut a, &mut b).is_err());
    }

    #[test]
    fn deep_clone_is_independent_layer_list() {
        let model = mlp();
        let cloned = model.deep_clone();
        assert_eq!(cloned.len(), model.len());
    }

    #[test]
    fn summary_lists_every_layer_and_total() {
        let model = mlp();
        let summary = model.summary(&[2]).unwrap();
        assert!(summary.contains("Dense"));
        assert!(summary.contains("ReLU"));
        assert!(summary.contains("total params"));
    }
}

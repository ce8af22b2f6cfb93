//! Pure shape-change layer (§4.3 "Flatten"). Data layout is preserved; only the shape
//! metadata changes, so forward is a straight copy.

use super::Layer;
use crate::error::Result;
use crate::tensor::Tensor;

#[derive(Debug, Clone, Copy, Default)]
pub struct Flatten;

impl Flatten {
    pub fn new() -> Self {
        Self
    }

    fn flattened_shape(input_shape: &[usize]) -> Vec<usize> {
        match input_shape.len() {
            0 | 1 | 2 => input_shape.to_vec(),
            3 => vec![input_shape.iter().product()],
            _ => {
                let rest: usize = input_shape[1..].iter().product();
                vec![input_shape[0], rest]
            }
        }
    }
}

impl Layer for Flatten {
    fn forward(&self, input: &Tensor, output: &mut Tensor) -> Result<()> {
        let shape = Self::flattened_shape(input.shape());
        output.ensure_shape(&shape)?;
        output.as_mut_slice().copy_from_slice(input.as_slice());
        Ok(())
    }

    fn name(&self) -> &str {
        "Flatten"
    }

    fn parameter_count(&self) -> usize {
        0
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        Ok(Self::flattened_shape(input_shape))
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(*self)
    }

    fn type_tag(&self) -> u32 {
        super::wire::TAG_FLATTEN
    }

    fn write_body(&self, _out: &mut Vec<u8>) {
        // Flatten records have no body (§4.5).
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank1_and_rank2_pass_through() {
        assert_eq!(Flatten::flattened_shape(&[4]), vec![4]);
        assert_eq!(Flatten::flattened_shape(&[2, 3]), vec![2, 3]);
    }

    #[test]
    fn rank3_collapses_to_single_dim() {
        assert_eq!(Flatten::flattened_shape(&[3, 4, 5]), vec![60]);
    }

    #[test]
    fn rank4_keeps_first_dim_collapses_rest() {
        assert_eq!(Flatten::flattened_shape(&[2, 3, 4, 5]), vec![2, 60]);
    }

    #[test]
    fn forward_preserves_data() {
        let flatten = Flatten::new();
        let input = Tensor::from_data(vec![1, 2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut out = Tensor::from_shape(vec![1]).unwrap();
        flatten.forward(&input, &mut out).unwrap();
        assert_eq!(out.shape(), &[4]);
        assert_eq!(out.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }
}

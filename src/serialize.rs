//! Framed binary model format: magic, version, per-layer records (§4.5, §6.1).

use crate::error::{ModelLoadError, Result, TitanError};
use crate::layers::wire::*;
use crate::layers::{Activation, AvgPool2D, Conv2D, Dense, Flatten, Layer, MaxPool2D, PaddingMode};
use crate::model::Sequential;
use crate::tensor::Tensor;
use std::io::{Read, Write};
use tracing::instrument;

const MAGIC: &[u8; 4] = b"TITN";
const VERSION: u32 = 2;

fn load_err(msg: impl Into<String>) -> TitanError {
    TitanError::ModelLoad(ModelLoadError::InvalidFormat(msg.into()))
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(load_err("unexpected end of file"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn floats(&mut self, count: usize) -> Result<Vec<f32>> {
        let bytes = self.take(count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect())
    }
}

/// Serializes a model to the on-disk layout described in §4.5. Each layer writes its own
/// tag and body via the [`Layer`](crate::layers::Layer) trait, so adding a new
/// serializable variant only requires implementing those two methods on the layer
/// itself.
pub fn serialize(model: &Sequential) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    write_u32(&mut out, VERSION);
    write_u32(&mut out, model.len() as u32);

    for layer in model.layers() {
        write_u32(&mut out, layer.type_tag());
        layer.write_body(&mut out);
    }
    Ok(out)
}

#[instrument(skip(bytes))]
pub fn deserialize(bytes: &[u8]) -> Result<Sequential> {
    let mut reader = Reader::new(bytes);
    let magic = reader.take(4)?;
    if magic != MAGIC {
        return Err(load_err("missing or invalid magic bytes"));
    }
    let version = reader.u32()?;
    if version > VERSION {
        return Err(load_err(format!(
            "model version {} is newer than supported version {}",
            version, VERSION
        )));
    }
    let layer_count = reader.u32()? as usize;

    let mut layers: Vec<Box<dyn crate::layers::Layer>> = Vec::with_capacity(layer_count);
    for _ in 0..layer_count {
        layers.push(read_layer(&mut reader)?);
    }
    if layers.is_empty() {
        return Err(TitanError::ModelLoad(ModelLoadError::EmptyModel));
    }
    Ok(Sequential::from_layers(layers))
}

fn read_layer(reader: &mut Reader) -> Result<Box<dyn crate::layers::Layer>> {
    let tag = reader.u32()?;
    match tag {
        TAG_DENSE => {
            let in_features = reader.u32()? as usize;
            let out_features = reader.u32()? as usize;
            let has_bias = reader.u8()? != 0;
            let weights = Tensor::from_data(vec![out_features, in_features], &reader.floats(out_features * in_features)?)?;
            let bias = if has_bias {
                Some(Tensor::from_data(vec![out_features], &reader.floats(out_features)?)?)
            } else {
                None
            };
            Ok(Box::new(Dense::new(weights, bias)?))
        }
        TAG_RELU => Ok(Box::new(Activation::ReLU)),
        TAG_SIGMOID => Ok(Box::new(Activation::Sigmoid)),
        TAG_TANH => Ok(Box::new(Activation::Tanh)),
        TAG_SOFTMAX => Ok(Box::new(Activation::Softmax)),
        TAG_CONV2D => {
            let in_c = reader.u32()? as usize;
            let out_c = reader.u32()? as usize;
            let kh = reader.u32()? as usize;
            let kw = reader.u32()? as usize;
            let sh = reader.u32()? as usize;
            let sw = reader.u32()? as usize;
            let padding = match reader.u8()? {
                0 => PaddingMode::Valid,
                1 => PaddingMode::Same,
                other => return Err(load_err(format!("unknown Conv2D padding mode {}", other))),
            };
            let has_bias = reader.u8()? != 0;
            let weights = Tensor::from_data(vec![out_c, in_c, kh, kw], &reader.floats(out_c * in_c * kh * kw)?)?;
            let bias = if has_bias {
                Some(Tensor::from_data(vec![out_c], &reader.floats(out_c)?)?)
            } else {
                None
            };
            Ok(Box::new(Conv2D::new(weights, bias, (sh, sw), padding)?))
        }
        TAG_MAXPOOL => {
            let (kernel, stride, padding) = read_pool_params(reader)?;
            Ok(Box::new(MaxPool2D::new(kernel, stride, padding)?))
        }
        TAG_AVGPOOL => {
            let (kernel, stride, padding) = read_pool_params(reader)?;
            Ok(Box::new(AvgPool2D::new(kernel, stride, padding)?))
        }
        TAG_FLATTEN => Ok(Box::new(Flatten::new())),
        other => Err(load_err(format!("unknown layer type tag {}", other))),
    }
}

fn read_pool_params(reader: &mut Reader) -> Result<((usize, usize), (usize, usize), (usize, usize))> {
    let kernel = reader.u32()? as usize;
    let stride = reader.u32()? as usize;
    let padding = reader.u32()? as usize;
    Ok(((kernel, kernel), (stride, stride), (padding, padding)))
}

/// Writes a serialized model to a path. A thin `std::fs` wrapper; kept separate from
/// `serialize` so in-memory round-trip tests don't need a filesystem.
pub fn save_to_path(model: &Sequential, path: &std::path::Path) -> Result<()> {
    let bytes = serialize(model)?;
    let mut file = std::fs::File::create(path)
        .map_err(|e| TitanError::ModelLoad(ModelLoadError::FileNotFound(format!("{}: {}", path.display(), e))))?;
    file.write_all(&bytes)
        .map_err(|e| load_err(format!("failed writing {}: {}", path.display(), e)))?;
    Ok(())
}

pub fn load_from_path(path: &std::path::Path) -> Result<Sequential> {
    let mut file = std::fs::File::open(path)
        .map_err(|_| TitanError::ModelLoad(ModelLoadError::FileNotFound(path.display().to_string())))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| load_err(format!("failed reading {}: {}", path.display(), e)))?;
    deserialize(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Activation;

    fn mlp_deterministic() -> Sequential {
        // Dense(4,8): w[i] = 0.1*((i%5)+1), no bias; ReLU; Dense(8,3): same formula,
        // bias = 0.01*i (§8 scenario 1).
        let w1: Vec<f32> = (0..32).map(|i| 0.1 * ((i % 5 + 1) as f32)).collect();
        let dense1 = Dense::new(Tensor::from_data(vec![8, 4], &w1).unwrap(), None).unwrap();
        let w2: Vec<f32> = (0..24).map(|i| 0.1 * ((i % 5 + 1) as f32)).collect();
        let b2: Vec<f32> = (0..3).map(|i| 0.01 * i as f32).collect();
        let dense2 = Dense::new(
            Tensor::from_data(vec![3, 8], &w2).unwrap(),
            Some(Tensor::from_data(vec![3], &b2).unwrap()),
        )
        .unwrap();
        Sequential::from_layers(vec![
            Box::new(dense1),
            Box::new(Activation::ReLU),
            Box::new(dense2),
            Box::new(Activation::Softmax),
        ])
    }

    #[test]
    fn round_trip_preserves_forward_output_bit_exact() {
        let model = mlp_deterministic();
        let bytes = serialize(&model).unwrap();
        let loaded = deserialize(&bytes).unwrap();

        let input = Tensor::from_data(vec![4], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut a1 = Tensor::from_shape(vec![1]).unwrap();
        let mut b1 = Tensor::from_shape(vec![1]).unwrap();
        let out1 = model.forward(&input, &mut a1, &mut b1).unwrap().clone();

        let mut a2 = Tensor::from_shape(vec![1]).unwrap();
        let mut b2 = Tensor::from_shape(vec![1]).unwrap();
        let out2 = loaded.forward(&input, &mut a2, &mut b2).unwrap();

        assert_eq!(out1.as_slice(), out2.as_slice());
        let sum: f32 = out2.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = b"XXXX\x02\x00\x00\x00\x00\x00\x00\x00".to_vec();
        assert!(deserialize(&bytes).is_err());
    }

    #[test]
    fn rejects_future_version() {
        let mut bytes = MAGIC.to_vec();
        write_u32(&mut bytes, VERSION + 1);
        write_u32(&mut bytes, 0);
        assert!(deserialize(&bytes).is_err());
    }

    #[test]
    fn rejects_empty_model() {
        let mut bytes = MAGIC.to_vec();
        write_u32(&mut bytes, VERSION);
        write_u32(&mut bytes, 0);
        assert!(deserialize(&bytes).is_err());
    }

    #[test]
    fn rejects_truncated_weight_section() {
        // magic, version 1, layer count 1, Dense tag, in=4, out=3, has_bias=1, then only
        // 2 weight floats instead of 12 (§8 scenario 6).
        let mut bytes = MAGIC.to_vec();
        write_u32(&mut bytes, 1);
        write_u32(&mut bytes, 1);
        write_u32(&mut bytes, TAG_DENSE);
        write_u32(&mut bytes, 4);
        write_u32(&mut bytes, 3);
        bytes.push(1);
        write_floats(&mut bytes, &[0.1, 0.2]);
        let err = deserialize(&bytes).unwrap_err();
        assert!(matches!(err, TitanError::ModelLoad(ModelLoadError::InvalidFormat(_))));
    }

    #[test]
    fn rejects_unknown_type_tag() {
        let mut bytes = MAGIC.to_vec();
        write_u32(&mut bytes, VERSION);
        write_u32(&mut bytes, 1);
        write_u32(&mut bytes, 99);
        assert!(deserialize(&bytes).is_err());
    }
}

use anyhow::{anyhow, bail};
use ndarray::IxDyn;

use crate::{
    compress::{CompressionError, Compressor, CompressorKind},
    tensor::{NumericArray, QuantizedTensor, Tensor},
};

#[derive(Debug)]
/// Quantizes tensors affinely to integer codes between their minimum and maximum.
pub struct QuantizedZeroPoint {
    bits: u8,
}

impl QuantizedZeroPoint {
    /// Creates a compressor with codes of the given bit width. The width is clamped to `1..=8`.
    pub fn new(bits: u8) -> Self {
        Self {
            bits: bits.clamp(1, 8),
        }
    }

    fn levels(&self) -> f32 {
        ((1_u16 << self.bits) - 1) as f32
    }
}

impl Compressor for QuantizedZeroPoint {
    fn kind(&self) -> CompressorKind {
        CompressorKind::Dense
    }

    fn is_compressed(&self, tensor: &Tensor) -> bool {
        matches!(tensor, Tensor::Quantized(_))
    }

    fn compress(&self, tensor: Tensor) -> Result<Tensor, CompressionError> {
        let array = match tensor.into_canonical() {
            Tensor::Dense(array) => array,
            quantized @ Tensor::Quantized(_) => return Ok(quantized),
            _ => bail!("only dense tensors can be quantized"),
        };

        let (min, max) = array
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &x| {
                (min.min(x), max.max(x))
            });
        let min = if min.is_finite() { min } else { 0. };
        let levels = self.levels();
        let scale = match (max - min) / levels {
            scale if scale.is_normal() => scale,
            _ => 1.,
        };

        let codes = array
            .iter()
            .map(|&x| ((x - min) / scale).round().clamp(0., levels) as u8)
            .collect();
        Ok(Tensor::Quantized(QuantizedTensor {
            shape: array.shape().to_vec(),
            min,
            scale,
            bits: self.bits,
            codes,
        }))
    }

    fn decompress(&self, tensor: Tensor) -> Result<Tensor, CompressionError> {
        match tensor {
            Tensor::Quantized(quantized) => {
                let data = quantized
                    .codes
                    .iter()
                    .map(|&code| quantized.min + code as f32 * quantized.scale)
                    .collect();
                NumericArray::from_shape_vec(IxDyn(&quantized.shape), data)
                    .map(Tensor::Dense)
                    .map_err(|_| anyhow!("quantized codes do not match the shape"))
            }
            tensor => Ok(tensor),
        }
    }
}

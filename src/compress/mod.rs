//! Compression of tensors on the wire.
//!
//! A [`Compressor`] shrinks the tensors exchanged between the parties and a plain aggregator.
//! Compressors of the [`CompressorKind::Sparse`] kind produce sparse tensors. For them the
//! aggregation layer records where a compressed activation was occupied and zeroes the matching
//! gradient everywhere else, so the sparsity pattern of a gradient follows the sparsity pattern
//! of its activation.

mod quantized;
mod sparse;

use crate::tensor::Tensor;

pub use self::{
    quantized::QuantizedZeroPoint,
    sparse::{RandomSparse, TopkSparse},
};

/// The error type of compressors.
pub type CompressionError = anyhow::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// The capability of a compressor.
pub enum CompressorKind {
    /// The compressed form is an opaque encoding.
    Dense,
    /// The compressed form is a sparse tensor whose occupancy is meaningful.
    Sparse,
}

/// A tensor compression codec.
pub trait Compressor: Send + Sync + 'static {
    /// Gets the capability of the compressor.
    fn kind(&self) -> CompressorKind;

    /// Checks if `tensor` is in the compressed form of this compressor.
    fn is_compressed(&self, tensor: &Tensor) -> bool;

    /// Compresses `tensor`. Tensors which are already compressed are returned unchanged.
    fn compress(&self, tensor: Tensor) -> Result<Tensor, CompressionError>;

    /// Decompresses `tensor` into the dense form. Tensors which are not compressed are returned
    /// unchanged.
    fn decompress(&self, tensor: Tensor) -> Result<Tensor, CompressionError>;

    /// Checks for each of the `tensors` if it is compressed.
    fn are_compressed(&self, tensors: &[Tensor]) -> Vec<bool> {
        tensors
            .iter()
            .map(|tensor| self.is_compressed(tensor))
            .collect()
    }
}

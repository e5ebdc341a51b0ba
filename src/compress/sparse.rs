//! Sparsifying compressors.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::bail;
use rand::{seq::index, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::{
    compress::{CompressionError, Compressor, CompressorKind},
    tensor::{NumericArray, SparseTensor, Tensor},
};

/// Gets the number of elements to keep out of `len` when a share `sparse_rate` is dropped.
fn kept(len: usize, sparse_rate: f32) -> usize {
    let kept = ((1. - sparse_rate) * len as f32).round() as usize;
    kept.min(len)
}

/// Gets the dense array to sparsify.
fn dense(tensor: Tensor) -> Result<Result<NumericArray, Tensor>, CompressionError> {
    match tensor.into_canonical() {
        Tensor::Dense(array) => Ok(Ok(array)),
        sparse @ Tensor::Sparse(_) => Ok(Err(sparse)),
        _ => bail!("only dense tensors can be sparsified"),
    }
}

fn densify(tensor: Tensor) -> Tensor {
    match tensor {
        Tensor::Sparse(sparse) => Tensor::Dense(sparse.to_dense()),
        tensor => tensor,
    }
}

#[derive(Debug)]
/// Keeps the elements with the largest magnitudes.
pub struct TopkSparse {
    sparse_rate: f32,
}

impl TopkSparse {
    /// Creates a compressor which drops the share `sparse_rate` of the elements with the smallest
    /// magnitudes. The rate is clamped to `[0, 1]`.
    pub fn new(sparse_rate: f32) -> Self {
        Self {
            sparse_rate: sparse_rate.clamp(0., 1.),
        }
    }
}

impl Compressor for TopkSparse {
    fn kind(&self) -> CompressorKind {
        CompressorKind::Sparse
    }

    fn is_compressed(&self, tensor: &Tensor) -> bool {
        matches!(tensor, Tensor::Sparse(_))
    }

    fn compress(&self, tensor: Tensor) -> Result<Tensor, CompressionError> {
        let array = match dense(tensor)? {
            Ok(array) => array,
            Err(sparse) => return Ok(sparse),
        };

        let mut order = array.iter().enumerate().collect::<Vec<_>>();
        order.sort_unstable_by(|(_, a), (_, b)| b.abs().total_cmp(&a.abs()));
        let indices = order
            .into_iter()
            .take(kept(array.len(), self.sparse_rate))
            .map(|(index, _)| index)
            .collect();
        Ok(Tensor::Sparse(SparseTensor::gather(&array, indices)))
    }

    fn decompress(&self, tensor: Tensor) -> Result<Tensor, CompressionError> {
        Ok(densify(tensor))
    }
}

#[derive(Debug)]
/// Keeps a random selection of the elements.
///
/// The selection is drawn from a seeded ChaCha20 stream, one stream per compressed tensor, so a
/// sequence of compressions is reproducible for a given seed.
pub struct RandomSparse {
    sparse_rate: f32,
    seed: u64,
    stream: AtomicU64,
}

impl RandomSparse {
    /// Creates a compressor which drops a random share `sparse_rate` of the elements. The rate is
    /// clamped to `[0, 1]`.
    pub fn new(sparse_rate: f32, seed: u64) -> Self {
        Self {
            sparse_rate: sparse_rate.clamp(0., 1.),
            seed,
            stream: AtomicU64::new(0),
        }
    }
}

impl Compressor for RandomSparse {
    fn kind(&self) -> CompressorKind {
        CompressorKind::Sparse
    }

    fn is_compressed(&self, tensor: &Tensor) -> bool {
        matches!(tensor, Tensor::Sparse(_))
    }

    fn compress(&self, tensor: Tensor) -> Result<Tensor, CompressionError> {
        let array = match dense(tensor)? {
            Ok(array) => array,
            Err(sparse) => return Ok(sparse),
        };

        let mut prng = ChaCha20Rng::seed_from_u64(self.seed);
        prng.set_stream(self.stream.fetch_add(1, Ordering::Relaxed));
        let indices =
            index::sample(&mut prng, array.len(), kept(array.len(), self.sparse_rate)).into_vec();
        Ok(Tensor::Sparse(SparseTensor::gather(&array, indices)))
    }

    fn decompress(&self, tensor: Tensor) -> Result<Tensor, CompressionError> {
        Ok(densify(tensor))
    }
}

//! Compensation of the sparsity introduced by compressed activations.
//!
//! When an activation arrives in a sparse compressed form, only its occupied positions took part
//! in the forward pass. The matching gradient is restricted to the same positions before it
//! travels back.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    compress::{CompressionError, Compressor, CompressorKind},
    error::ArgumentError,
    tensor::{SparseMask, Tensor},
};

#[derive(Debug, Error)]
/// Errors of the sparsity compensation.
pub enum SparseError {
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error("the compressor failed: {0:#}")]
    Compressor(CompressionError),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
/// What the forward pass of a round recorded about its compressed activations.
pub struct SparseState {
    masks: Option<Vec<Option<SparseMask>>>,
    compressed: Vec<bool>,
}

impl SparseState {
    /// Gets the occupancy masks of the activations, if the compressor is sparsity-aware.
    ///
    /// An activation which was not compressed has no mask.
    pub fn masks(&self) -> Option<&[Option<SparseMask>]> {
        self.masks.as_deref()
    }

    /// Gets for each activation if it arrived compressed.
    pub fn compressed(&self) -> &[bool] {
        &self.compressed
    }

    /// Checks if the state holds any masks.
    pub fn has_masks(&self) -> bool {
        self.masks.as_ref().map_or(false, |masks| !masks.is_empty())
    }

    /// Checks that the state can be applied to `gradients` gradients.
    ///
    /// # Errors
    /// Fails if the masks, or the compression flags when there are no masks, don't match the
    /// number of gradients.
    pub fn check(&self, gradients: usize) -> Result<(), ArgumentError> {
        match &self.masks {
            Some(masks) if !masks.is_empty() => {
                if masks.len() != gradients {
                    return Err(ArgumentError::MaskLengthMismatch {
                        masks: masks.len(),
                        gradients,
                    });
                }
            }
            _ => {
                if self.compressed.len() != gradients {
                    return Err(ArgumentError::FlagLengthMismatch {
                        flags: self.compressed.len(),
                        gradients,
                    });
                }
            }
        }
        Ok(())
    }
}

fn occupancy(tensor: &Tensor) -> Option<SparseMask> {
    match tensor {
        Tensor::Sparse(sparse) => Some(sparse.occupancy()),
        Tensor::Dense(array) => Some(SparseMask::of_dense(array)),
        Tensor::Native(native) => Some(SparseMask::of_dense(&native.array)),
        Tensor::Quantized(_) => None,
    }
}

/// Decompresses the compressed `tensors`.
///
/// For a sparsity-aware compressor the occupancy of every compressed tensor is recorded before it
/// is decompressed.
///
/// # Errors
/// Fails if the compressor fails.
pub fn handle_sparse_hiddens(
    tensors: Vec<Tensor>,
    compressor: &dyn Compressor,
) -> Result<(Vec<Tensor>, SparseState), SparseError> {
    let compressed = compressor.are_compressed(&tensors);
    let masks = match compressor.kind() {
        CompressorKind::Sparse => Some(
            tensors
                .iter()
                .zip(&compressed)
                .map(|(tensor, &compressed)| {
                    if compressed {
                        occupancy(tensor)
                    } else {
                        None
                    }
                })
                .collect(),
        ),
        CompressorKind::Dense => None,
    };

    let tensors = tensors
        .into_iter()
        .zip(&compressed)
        .map(|(tensor, &compressed)| {
            if compressed {
                compressor.decompress(tensor)
            } else {
                Ok(tensor)
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(SparseError::Compressor)?;

    Ok((tensors, SparseState { masks, compressed }))
}

/// Restricts `gradients` to the sparsity recorded in `state`.
///
/// If masks were recorded, each gradient is multiplied by its mask and kept in sparse form.
/// Gradients without a mask pass through. Otherwise each gradient whose activation arrived
/// compressed is compressed again.
///
/// # Errors
/// Fails if the state does not match the gradients, if a gradient is still compressed or if the
/// compressor fails.
pub fn handle_sparse_gradients(
    gradients: Vec<Tensor>,
    state: &SparseState,
    compressor: &dyn Compressor,
) -> Result<Vec<Tensor>, SparseError> {
    state.check(gradients.len())?;
    let gradients = gradients
        .into_iter()
        .map(Tensor::into_array)
        .collect::<Result<Vec<_>, _>>()?;

    match &state.masks {
        Some(masks) if !masks.is_empty() => gradients
            .into_iter()
            .zip(masks)
            .map(|(gradient, mask)| match mask {
                Some(mask) => mask
                    .apply(&gradient)
                    .map(Tensor::Sparse)
                    .map_err(SparseError::from),
                None => Ok(Tensor::Dense(gradient)),
            })
            .collect(),
        _ => gradients
            .into_iter()
            .zip(&state.compressed)
            .map(|(gradient, &compressed)| {
                if compressed {
                    compressor
                        .compress(Tensor::Dense(gradient))
                        .map_err(SparseError::Compressor)
                } else {
                    Ok(Tensor::Dense(gradient))
                }
            })
            .collect(),
    }
}

//! Sparse tensors and occupancy masks.

use std::convert::TryFrom;

use ndarray::IxDyn;
use serde::{Deserialize, Serialize};

use crate::{error::ArgumentError, tensor::NumericArray};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSparseTensor")]
/// A tensor which stores only some of its elements.
///
/// Elements are addressed by their flat index in row-major order. All other elements are zero.
pub struct SparseTensor {
    shape: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f32>,
}

#[derive(Deserialize)]
/// The unchecked wire form of a [`SparseTensor`].
struct RawSparseTensor {
    shape: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f32>,
}

impl TryFrom<RawSparseTensor> for SparseTensor {
    type Error = ArgumentError;

    fn try_from(raw: RawSparseTensor) -> Result<Self, Self::Error> {
        Self::new(raw.shape, raw.indices, raw.values)
    }
}

impl SparseTensor {
    /// Creates a sparse tensor.
    ///
    /// # Errors
    /// Fails if the number of indices and values differ, or if the indices are not strictly
    /// increasing and within the shape.
    pub fn new(
        shape: Vec<usize>,
        indices: Vec<usize>,
        values: Vec<f32>,
    ) -> Result<Self, ArgumentError> {
        if indices.len() != values.len() {
            return Err(ArgumentError::InvalidSparseTensor(
                "indices and values differ in length",
            ));
        }
        if indices.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ArgumentError::InvalidSparseTensor(
                "indices are not strictly increasing",
            ));
        }
        let len = shape.iter().product::<usize>();
        if indices.last().map_or(false, |&last| last >= len) {
            return Err(ArgumentError::InvalidSparseTensor("index out of bounds"));
        }
        Ok(Self {
            shape,
            indices,
            values,
        })
    }

    /// Creates a sparse tensor which keeps the elements of `array` at the given flat indices.
    ///
    /// The indices are sorted and deduplicated, indices out of bounds are dropped.
    pub fn gather(array: &NumericArray, mut indices: Vec<usize>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        indices.retain(|&index| index < array.len());

        let flat = array.iter().copied().collect::<Vec<_>>();
        let values = indices.iter().map(|&index| flat[index]).collect();
        Self {
            shape: array.shape().to_vec(),
            indices,
            values,
        }
    }

    /// Gets the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Gets the flat indices of the stored elements.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Gets the stored elements.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Gets the number of stored elements.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Materializes the tensor as a dense array.
    pub fn to_dense(&self) -> NumericArray {
        let mut dense = NumericArray::zeros(IxDyn(&self.shape));
        if let Some(data) = dense.as_slice_mut() {
            for (&index, &value) in self.indices.iter().zip(&self.values) {
                if let Some(element) = data.get_mut(index) {
                    *element = value;
                }
            }
        }
        dense
    }

    /// Gets the occupancy mask of the tensor: the positions of its nonzero elements.
    pub fn occupancy(&self) -> SparseMask {
        let indices = self
            .indices
            .iter()
            .zip(&self.values)
            .filter(|(_, &value)| value != 0.)
            .map(|(&index, _)| index)
            .collect();
        SparseMask {
            shape: self.shape.clone(),
            indices,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// A boolean occupancy pattern of a tensor, stored as the flat indices of its `true` positions.
pub struct SparseMask {
    shape: Vec<usize>,
    indices: Vec<usize>,
}

impl SparseMask {
    /// Gets the occupancy mask of a dense array.
    pub fn of_dense(array: &NumericArray) -> Self {
        let indices = array
            .iter()
            .enumerate()
            .filter(|(_, &value)| value != 0.)
            .map(|(index, _)| index)
            .collect();
        Self {
            shape: array.shape().to_vec(),
            indices,
        }
    }

    /// Gets the shape of the masked tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Gets the flat indices of the occupied positions.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Multiplies `array` elementwise with the mask, keeping the result in sparse form.
    ///
    /// # Errors
    /// Fails if the shapes of the mask and the array differ.
    pub fn apply(&self, array: &NumericArray) -> Result<SparseTensor, ArgumentError> {
        if array.shape() != self.shape.as_slice() {
            return Err(ArgumentError::MaskShapeMismatch {
                mask: self.shape.clone(),
                gradient: array.shape().to_vec(),
            });
        }
        Ok(SparseTensor::gather(array, self.indices.clone()))
    }
}

//! Tensors and their representations.
//!
//! A [`Tensor`] is in one of several forms while it travels through the aggregation layer:
//! - dense: the canonical [`NumericArray`] form every computation works on,
//! - sparse or quantized: the compressed forms produced by a [`Compressor`],
//! - native: the form the bottom and top networks of a [`Backend`] consume.
//!
//! [`Compressor`]: crate::Compressor

pub(crate) mod sparse;

use std::{fmt, str::FromStr};

use derive_more::{Display, From};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::ArgumentError;

pub use self::sparse::{SparseMask, SparseTensor};

/// A dense array of arbitrary dimension.
pub type NumericArray = ArrayD<f32>;

#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// The deep learning backend of the bottom and top networks.
pub enum Backend {
    #[display(fmt = "tensorflow")]
    Tensorflow,
    #[display(fmt = "torch")]
    Torch,
}

impl FromStr for Backend {
    type Err = ArgumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tensorflow" => Ok(Backend::Tensorflow),
            "torch" => Ok(Backend::Torch),
            _ => Err(ArgumentError::UnsupportedBackend(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// A tensor in the native form of a backend.
pub struct NativeTensor {
    pub backend: Backend,
    pub array: NumericArray,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// A tensor quantized to integer codes with a zero point.
///
/// An element is restored as `min + code * scale`.
pub struct QuantizedTensor {
    pub shape: Vec<usize>,
    pub min: f32,
    pub scale: f32,
    pub bits: u8,
    pub codes: Vec<u8>,
}

#[derive(Clone, Debug, From, PartialEq, Serialize, Deserialize)]
/// A tensor in one of its representations.
pub enum Tensor {
    Dense(NumericArray),
    Sparse(SparseTensor),
    Quantized(QuantizedTensor),
    Native(NativeTensor),
}

impl Tensor {
    /// Gets the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::Dense(array) => array.shape(),
            Tensor::Sparse(sparse) => sparse.shape(),
            Tensor::Quantized(quantized) => &quantized.shape,
            Tensor::Native(native) => native.array.shape(),
        }
    }

    /// Checks if the tensor is in a compressed form.
    pub fn is_compressed_form(&self) -> bool {
        matches!(self, Tensor::Sparse(_) | Tensor::Quantized(_))
    }

    /// Converts a native tensor into the canonical dense form.
    ///
    /// Dense and compressed tensors are returned unchanged.
    pub fn into_canonical(self) -> Self {
        match self {
            Tensor::Native(native) => Tensor::Dense(native.array),
            tensor => tensor,
        }
    }

    /// Materializes the tensor as a dense array.
    ///
    /// # Errors
    /// Fails for quantized tensors, which must be decompressed by their compressor first.
    pub fn into_array(self) -> Result<NumericArray, ArgumentError> {
        match self {
            Tensor::Dense(array) => Ok(array),
            Tensor::Native(native) => Ok(native.array),
            Tensor::Sparse(sparse) => Ok(sparse.to_dense()),
            Tensor::Quantized(_) => Err(ArgumentError::StillCompressed),
        }
    }

    /// Converts the tensor into the native form of `backend`.
    ///
    /// # Errors
    /// Fails for quantized tensors, which must be decompressed by their compressor first.
    pub fn into_native(self, backend: Backend) -> Result<Self, ArgumentError> {
        let array = self.into_array()?;
        Ok(Tensor::Native(NativeTensor { backend, array }))
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let form = match self {
            Tensor::Dense(_) => "dense",
            Tensor::Sparse(_) => "sparse",
            Tensor::Quantized(_) => "quantized",
            Tensor::Native(native) => return write!(f, "{}{:?}", native.backend, self.shape()),
        };
        write!(f, "{}{:?}", form, self.shape())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// The hidden representation computed by a party's bottom network.
pub enum Hidden {
    Single(Tensor),
    Multi(Vec<Tensor>),
}

#[allow(clippy::len_without_is_empty)]
impl Hidden {
    /// Gets the number of tensors.
    pub fn len(&self) -> usize {
        match self {
            Hidden::Single(_) => 1,
            Hidden::Multi(tensors) => tensors.len(),
        }
    }

    /// Gets the single tensor of the hidden representation.
    ///
    /// A sequence holding exactly one tensor counts as a single tensor.
    pub fn into_single(self) -> Option<Tensor> {
        match self {
            Hidden::Single(tensor) => Some(tensor),
            Hidden::Multi(mut tensors) if tensors.len() == 1 => tensors.pop(),
            Hidden::Multi(_) => None,
        }
    }

    /// Flattens the hidden representation into its tensors.
    pub fn into_tensors(self) -> Vec<Tensor> {
        match self {
            Hidden::Single(tensor) => vec![tensor],
            Hidden::Multi(tensors) => tensors,
        }
    }
}

impl From<Tensor> for Hidden {
    fn from(tensor: Tensor) -> Self {
        Hidden::Single(tensor)
    }
}

impl From<Vec<Tensor>> for Hidden {
    fn from(tensors: Vec<Tensor>) -> Self {
        Hidden::Multi(tensors)
    }
}

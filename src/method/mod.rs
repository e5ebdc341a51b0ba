//! Aggregation methods.
//!
//! An [`AggMethod`] fuses the hidden representations of all parties into one representation and
//! splits the gradient of the fused representation into one gradient per party. Methods are
//! stateless: everything the backward pass needs from the forward pass is handed to it by the
//! aggregation layer.

mod builtin;

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{device::DeviceObject, tensor::NumericArray};

pub use self::builtin::{Average, Concat, Sum};

/// The error type of aggregation methods.
pub type MethodError = anyhow::Error;

#[derive(Clone, Debug, From, PartialEq, Serialize, Deserialize)]
/// The weight of a party in a weighted aggregation.
pub enum Weight {
    Scalar(f32),
    /// A weight which is broadcast against the party's hidden representation.
    Tensor(NumericArray),
}

#[derive(Clone, Debug, PartialEq)]
/// A weight as handed to the aggregation layer.
pub enum WeightInput {
    /// A weight known to the caller, which may be used on any device.
    Local(Weight),
    /// A weight owned by a device, which is transferred to the aggregator before use.
    Remote(DeviceObject<Weight>),
}

impl From<Weight> for WeightInput {
    fn from(weight: Weight) -> Self {
        WeightInput::Local(weight)
    }
}

impl From<DeviceObject<Weight>> for WeightInput {
    fn from(weight: DeviceObject<Weight>) -> Self {
        WeightInput::Remote(weight)
    }
}

/// The math of an aggregation.
///
/// Both functions run on the aggregator device, which may be a secure or encrypted device.
/// Implementations must therefore be pure functions of their arguments.
pub trait AggMethod: Send + Sync + 'static {
    /// Fuses the hidden representations of the parties, given in party order.
    ///
    /// # Behavior
    ///
    /// - `axis` is the axis along which the fusion is done, for methods where this matters.
    /// - `weights`, if any, holds one weight per party in party order.
    fn forward(
        &self,
        inputs: &[NumericArray],
        axis: usize,
        weights: Option<&[Weight]>,
    ) -> Result<NumericArray, MethodError>;

    /// Splits the gradients of the fused representation into one gradient per party.
    ///
    /// # Behavior
    ///
    /// - `inputs` are the hidden representations the matching forward pass fused.
    /// - The result holds exactly `parties_num` gradients in party order, each with the shape of
    ///   the party's input.
    fn backward(
        &self,
        gradients: &[NumericArray],
        weights: Option<&[Weight]>,
        inputs: &[NumericArray],
        parties_num: usize,
    ) -> Result<Vec<NumericArray>, MethodError>;
}

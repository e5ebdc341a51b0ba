//! Errors of the aggregation layer.
//!
//! Construction problems are reported as [`ConfigError`]s, violated preconditions of a single call
//! as [`ArgumentError`]s. Failures of the device substrate are reported as [`RuntimeError`]s and
//! are never retried by the layer.

use thiserror::Error;

use crate::{device::Device, runtime::RuntimeError};

#[derive(Debug, Error, Eq, PartialEq)]
/// Errors related to the construction of an [`AggLayer`].
///
/// [`AggLayer`]: crate::AggLayer
pub enum ConfigError {
    #[error("at least one party is required")]
    NoParties,

    #[error("party {0} is listed more than once")]
    DuplicateParty(Device),

    #[error("party {0} must be a plain device")]
    PartyNotPlain(Device),

    #[error("label holder {0} must be a plain device")]
    LabelHolderNotPlain(Device),

    #[error(
        "without an aggregation method the aggregator {aggregator} must be the label holder {label_holder}"
    )]
    AggregatorMismatch {
        aggregator: Device,
        label_holder: Device,
    },
}

#[derive(Debug, Error, PartialEq)]
/// Errors related to violated preconditions of a single call.
pub enum ArgumentError {
    #[error("data to aggregate must not be empty")]
    EmptyData,

    #[error("gradient must not be empty")]
    EmptyGradient,

    #[error("no data was provided for party {0}")]
    MissingParty(Device),

    #[error("{0} is not a party of this layer")]
    UnknownParty(Device),

    #[error("expected {expected} values, one per party, but got {got}")]
    PartyCountMismatch { expected: usize, got: usize },

    #[error("expected {expected} weights, one per party, but got {got}")]
    WeightLengthMismatch { expected: usize, got: usize },

    #[error("the gradient resides on {found} but must reside on the label holder {expected}")]
    GradientMisplaced { expected: Device, found: Device },

    #[error("the output number of each party's base net is unknown")]
    OutputNumUnset,

    #[error("gradient length {got} is not consistent with the base nets' output number {expected}")]
    OutputNumMismatch { expected: usize, got: usize },

    #[error("{masks} sparse masks cannot be applied to {gradients} gradients")]
    MaskLengthMismatch { masks: usize, gradients: usize },

    #[error("{flags} compression flags cannot be applied to {gradients} gradients")]
    FlagLengthMismatch { flags: usize, gradients: usize },

    #[error("a sparse mask of shape {mask:?} cannot be applied to a gradient of shape {gradient:?}")]
    MaskShapeMismatch {
        mask: Vec<usize>,
        gradient: Vec<usize>,
    },

    #[error("invalid backend, only 'tensorflow' or 'torch' are supported but got '{0}'")]
    UnsupportedBackend(String),

    #[error("party {party} sent {count} hidden tensors but fusion requires exactly one")]
    MultiHiddenInFusion { party: Device, count: usize },

    #[error("the tensor is still compressed and cannot be used as a numeric array")]
    StillCompressed,

    #[error("the sparse tensor is invalid: {0}")]
    InvalidSparseTensor(&'static str),

    #[error("the round context belongs to another aggregation layer")]
    ForeignContext,
}

#[derive(Debug, Error)]
/// The error type of the [`AggLayer`] operations.
///
/// [`AggLayer`]: crate::AggLayer
pub enum AggLayerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid argument: {0}")]
    Argument(#[from] ArgumentError),

    #[error("runtime failure: {0}")]
    Runtime(#[from] RuntimeError),
}

//! The envelope exchanged between the networks and the aggregation layer.

use serde::{Deserialize, Serialize};

use crate::tensor::Hidden;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// Auxiliary loss terms, e.g. regularization losses of a bottom network.
pub enum Losses {
    Scalar(f32),
    Vector(Vec<f32>),
    /// The losses of each party, in party order. Attached to fused envelopes.
    PerParty(Vec<Option<Losses>>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// A hidden representation together with the losses which travel with it.
///
/// Envelopes are never modified in place: every stage of the aggregation layer consumes an
/// envelope and produces a new one.
pub struct ForwardData {
    pub hidden: Hidden,
    pub losses: Option<Losses>,
}

impl ForwardData {
    /// Creates an envelope.
    pub fn new(hidden: impl Into<Hidden>, losses: Option<Losses>) -> Self {
        Self {
            hidden: hidden.into(),
            losses,
        }
    }

    /// Consumes the envelope into its hidden representation and losses.
    pub fn into_parts(self) -> (Hidden, Option<Losses>) {
        (self.hidden, self.losses)
    }
}

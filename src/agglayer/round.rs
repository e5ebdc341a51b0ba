use crate::{
    agglayer::sparse::SparseState,
    device::DeviceObject,
    envelope::{ForwardData, Losses},
    tensor::Tensor,
};

#[derive(Clone, Debug, PartialEq)]
/// The result of a forward pass, residing on the label holder.
pub enum ForwardOutput {
    /// The fused envelope of a layer with an aggregation method.
    Fused(DeviceObject<ForwardData>),
    /// The hidden tensors of all parties, in party order, of a layer without an aggregation
    /// method.
    Passthrough(DeviceObject<Vec<Tensor>>),
}

impl ForwardOutput {
    /// Gets the fused envelope, if any.
    pub fn into_fused(self) -> Option<DeviceObject<ForwardData>> {
        match self {
            ForwardOutput::Fused(fused) => Some(fused),
            ForwardOutput::Passthrough(_) => None,
        }
    }

    /// Gets the passed through hidden tensors, if any.
    pub fn into_passthrough(self) -> Option<DeviceObject<Vec<Tensor>>> {
        match self {
            ForwardOutput::Fused(_) => None,
            ForwardOutput::Passthrough(tensors) => Some(tensors),
        }
    }
}

#[derive(Clone, Debug)]
/// The state of a round, from its forward pass to its backward pass.
///
/// A context is created by [`AggLayer::forward()`] and must be handed to the
/// [`AggLayer::backward()`] of the same round on the same layer.
///
/// [`AggLayer::forward()`]: crate::AggLayer::forward
/// [`AggLayer::backward()`]: crate::AggLayer::backward
pub struct RoundContext {
    pub(crate) layer: u64,
    pub(crate) round: u64,
    pub(crate) hiddens: Vec<DeviceObject<Tensor>>,
    pub(crate) losses: DeviceObject<Vec<Option<Losses>>>,
    pub(crate) sparse: Option<DeviceObject<SparseState>>,
}

impl RoundContext {
    /// Gets the number of the round on its layer, starting at zero.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Gets the collected hidden representations on the aggregator, in party order.
    ///
    /// Empty for a layer without an aggregation method.
    pub fn hiddens(&self) -> &[DeviceObject<Tensor>] {
        &self.hiddens
    }

    /// Gets the losses of the parties on the label holder, in party order.
    pub fn losses(&self) -> &DeviceObject<Vec<Option<Losses>>> {
        &self.losses
    }

    /// Gets what the forward pass recorded about compressed activations, if a compressor is
    /// configured.
    pub fn sparse(&self) -> Option<&DeviceObject<SparseState>> {
        self.sparse.as_ref()
    }
}

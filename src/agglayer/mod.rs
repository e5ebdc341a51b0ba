//! The aggregation layer.
//!
//! See the [crate] documentation for an overview of a round.

mod round;
pub mod sparse;
mod split;
#[cfg(test)]
mod tests;
mod transport;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::anyhow;
use futures::future::try_join_all;
use tracing_futures::Instrument;

use crate::{
    compress::Compressor,
    device::{Device, DeviceKind, DeviceObject},
    envelope::{ForwardData, Losses},
    error::{AggLayerError, ArgumentError, ConfigError},
    method::{AggMethod, Weight, WeightInput},
    runtime::{Runtime, RuntimeError, TaskError},
    settings::{CompressorSettings, MethodSettings, Settings},
    tensor::{Backend, Hidden, NumericArray, Tensor},
};

pub use self::{
    round::{ForwardOutput, RoundContext},
    sparse::SparseState,
    split::split_to_parties,
};
use self::{
    sparse::{handle_sparse_gradients, handle_sparse_hiddens},
    transport::Transport,
};

/// Values keyed by the party they belong to.
pub type PartyMap<T> = HashMap<Device, T>;

static LAYER_IDS: AtomicU64 = AtomicU64::new(0);

/// How the hidden representations of the parties reach the label holder.
enum Strategy {
    /// Fuse them with an aggregation method on the aggregator.
    Fusion(Arc<dyn AggMethod>),
    /// Hand them to the label holder as they are.
    Passthrough,
}

#[derive(Clone, Debug)]
/// The hidden representations and losses gathered from the parties.
pub struct Collected {
    /// The hidden representations on the aggregator, in party order.
    pub hiddens: Vec<DeviceObject<Tensor>>,
    /// The losses on the label holder, in party order.
    pub losses: DeviceObject<Vec<Option<Losses>>>,
}

/// The aggregation layer between the bottom networks of the parties and the top network of the
/// label holder.
pub struct AggLayer<R> {
    id: u64,
    runtime: R,
    parties: Vec<Device>,
    aggregator: Device,
    label_holder: Device,
    strategy: Strategy,
    transport: Transport,
    compressor: Option<Arc<dyn Compressor>>,
    backend: Backend,
    basenet_output_num: Option<PartyMap<usize>>,
    rounds: AtomicU64,
}

impl<R> fmt::Debug for AggLayer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggLayer")
            .field("id", &self.id)
            .field("parties", &self.parties)
            .field("aggregator", &self.aggregator)
            .field("label_holder", &self.label_holder)
            .field("mode", &self.mode())
            .field("transport", &self.transport)
            .field("backend", &self.backend)
            .field("basenet_output_num", &self.basenet_output_num)
            .finish()
    }
}

impl<R> AggLayer<R> {
    fn mode(&self) -> &'static str {
        match self.strategy {
            Strategy::Fusion(_) => "fusion",
            Strategy::Passthrough => "passthrough",
        }
    }

    /// Gets the parties, in party order.
    pub fn parties(&self) -> &[Device] {
        &self.parties
    }

    /// Gets the aggregator device.
    pub fn aggregator(&self) -> &Device {
        &self.aggregator
    }

    /// Gets the label holder device.
    pub fn label_holder(&self) -> &Device {
        &self.label_holder
    }

    /// Gets the backend of the networks.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Gets the number of output tensors of each party's bottom network, if set.
    pub fn basenet_output_num(&self) -> Option<&PartyMap<usize>> {
        self.basenet_output_num.as_ref()
    }

    /// Sets the number of output tensors of each party's bottom network.
    ///
    /// A layer without an aggregation method needs them to split the gradients in the backward
    /// pass.
    ///
    /// # Errors
    /// Fails unless there is exactly one number per party.
    pub fn set_basenet_output_num(
        &mut self,
        output_num: PartyMap<usize>,
    ) -> Result<(), ArgumentError> {
        if let Some(unknown) = output_num.keys().find(|&device| !self.is_party(device)) {
            return Err(ArgumentError::UnknownParty(unknown.clone()));
        }
        if let Some(missing) = self
            .parties
            .iter()
            .find(|&party| !output_num.contains_key(party))
        {
            return Err(ArgumentError::MissingParty(missing.clone()));
        }
        self.basenet_output_num = Some(output_num);
        Ok(())
    }

    fn is_party(&self, device: &Device) -> bool {
        self.parties.contains(device)
    }

    /// Orders the values of the parties by party order.
    fn in_party_order<T>(&self, mut data: PartyMap<T>) -> Result<Vec<T>, ArgumentError> {
        if data.is_empty() {
            return Err(ArgumentError::EmptyData);
        }
        if let Some(unknown) = data.keys().find(|&device| !self.is_party(device)) {
            return Err(ArgumentError::UnknownParty(unknown.clone()));
        }
        self.parties
            .iter()
            .map(|party| {
                data.remove(party)
                    .ok_or_else(|| ArgumentError::MissingParty(party.clone()))
            })
            .collect()
    }
}

impl<R> AggLayer<R>
where
    R: Runtime,
{
    /// Creates an aggregation layer.
    ///
    /// Without an aggregation `method` the hidden representations are passed through to the
    /// label holder, which must then be the aggregator. A `compressor` is used on the wire only if
    /// the aggregator is a plain device, but its sparsity is compensated for in any case.
    ///
    /// # Errors
    /// Fails if the parties are empty or not distinct, if a party or the label holder is not a
    /// plain device, or if there is no aggregation method and the aggregator is not the label
    /// holder.
    pub fn new(
        runtime: R,
        aggregator: Device,
        parties: Vec<Device>,
        label_holder: Device,
        method: Option<Arc<dyn AggMethod>>,
        backend: Backend,
        compressor: Option<Arc<dyn Compressor>>,
    ) -> Result<Self, ConfigError> {
        if parties.is_empty() {
            return Err(ConfigError::NoParties);
        }
        let mut distinct = HashSet::with_capacity(parties.len());
        for party in &parties {
            if !distinct.insert(party) {
                return Err(ConfigError::DuplicateParty(party.clone()));
            }
            if party.kind() != DeviceKind::Plain {
                return Err(ConfigError::PartyNotPlain(party.clone()));
            }
        }
        if label_holder.kind() != DeviceKind::Plain {
            return Err(ConfigError::LabelHolderNotPlain(label_holder));
        }

        let strategy = match method {
            Some(method) => Strategy::Fusion(method),
            None if aggregator == label_holder => Strategy::Passthrough,
            None => {
                return Err(ConfigError::AggregatorMismatch {
                    aggregator,
                    label_holder,
                })
            }
        };
        let transport = Transport::select(&aggregator, compressor.as_ref());

        Ok(Self {
            id: LAYER_IDS.fetch_add(1, Ordering::Relaxed),
            runtime,
            parties,
            aggregator,
            label_holder,
            strategy,
            transport,
            compressor,
            backend,
            basenet_output_num: None,
            rounds: AtomicU64::new(0),
        })
    }

    /// Creates an aggregation layer from its settings.
    ///
    /// # Errors
    /// Fails for the same reasons as [`AggLayer::new()`].
    pub fn from_settings(settings: &Settings, runtime: R) -> Result<Self, ConfigError> {
        let topology = &settings.topology;
        let layer = &settings.layer;
        Self::new(
            runtime,
            topology.aggregator.clone(),
            topology.parties(),
            topology.label_holder(),
            layer.method.as_ref().map(MethodSettings::build),
            layer.backend,
            layer.compressor.as_ref().map(CompressorSettings::build),
        )
    }

    /// Gathers the hidden representations of the parties on the aggregator.
    ///
    /// # Behavior
    ///
    /// For each party, concurrently:
    /// - split the envelope into its hidden representation and losses on the party,
    /// - move the losses to the label holder,
    /// - convert the hidden representation to the dense form on the party and move it to the
    ///   aggregator, compressed on the wire if the transport says so.
    ///
    /// The losses are finally gathered on the label holder.
    ///
    /// # Errors
    /// Fails if `data` is empty, doesn't hold exactly one envelope per party or an envelope holds
    /// more than one hidden tensor. Failures of the runtime are propagated.
    pub async fn collect(
        &self,
        data: PartyMap<DeviceObject<ForwardData>>,
    ) -> Result<Collected, AggLayerError> {
        let envelopes = self.in_party_order(data)?;
        for (party, envelope) in self.parties.iter().zip(&envelopes) {
            let count = envelope.value().hidden.len();
            if count != 1 {
                return Err(ArgumentError::MultiHiddenInFusion {
                    party: party.clone(),
                    count,
                }
                .into());
            }
        }

        let (hiddens, losses): (Vec<_>, Vec<_>) = try_join_all(
            self.parties
                .iter()
                .zip(envelopes)
                .map(|(party, envelope)| self.collect_party(party, envelope)),
        )
        .await?
        .into_iter()
        .unzip();
        let losses = self.runtime.gather(&self.label_holder, losses).await?;

        Ok(Collected { hiddens, losses })
    }

    async fn collect_party(
        &self,
        party: &Device,
        envelope: DeviceObject<ForwardData>,
    ) -> Result<(DeviceObject<Tensor>, DeviceObject<Option<Losses>>), RuntimeError> {
        let (hidden, losses) = self
            .runtime
            .apply(party, envelope, |data| Ok(data.into_parts()))
            .await?
            .unzip();
        let losses = self.runtime.transfer(losses, &self.label_holder).await?;

        let hidden = self
            .runtime
            .apply(party, hidden, |hidden| {
                hidden
                    .into_single()
                    .map(Tensor::into_canonical)
                    .ok_or_else(|| anyhow!("expected a single hidden tensor"))
            })
            .await?;
        let hidden = self
            .transport
            .send(&self.runtime, hidden, &self.aggregator)
            .await?;
        trace!(%party, aggregator = %self.aggregator, "collected hidden");

        Ok((hidden, losses))
    }

    /// Sends one tensor to each party.
    ///
    /// # Behavior
    ///
    /// For each party, concurrently, move its tensor to it, compressed on the wire if the
    /// transport says so, and convert it to the native form of the backend there.
    ///
    /// # Errors
    /// Fails if there isn't exactly one tensor per party. Failures of the runtime are propagated.
    pub async fn scatter(
        &self,
        data: Vec<DeviceObject<Tensor>>,
    ) -> Result<PartyMap<DeviceObject<Tensor>>, AggLayerError> {
        if data.len() != self.parties.len() {
            return Err(ArgumentError::PartyCountMismatch {
                expected: self.parties.len(),
                got: data.len(),
            }
            .into());
        }

        let backend = self.backend;
        let scattered = try_join_all(self.parties.iter().zip(data).map(
            |(party, tensor)| async move {
                let tensor = self.transport.send(&self.runtime, tensor, party).await?;
                trace!(%party, "scattered tensor");
                self.runtime
                    .apply(party, tensor, move |tensor| {
                        Ok(tensor.into_native(backend)?)
                    })
                    .await
            },
        ))
        .await?;

        Ok(self.parties.iter().cloned().zip(scattered).collect())
    }

    /// Runs the forward pass of a round.
    ///
    /// # Behavior
    ///
    /// With an aggregation method, the hidden representations are collected on the aggregator
    /// and fused there along `axis` with the optional `weights`. The fused tensor moves to the
    /// label holder uncompressed. If the aggregation method itself emitted a compressed tensor,
    /// its sparsity is recorded there before it is decompressed. It is returned in the native form of the backend, enveloped with the losses
    /// of all parties.
    ///
    /// Without an aggregation method, the envelopes move to the label holder directly and all
    /// their hidden tensors are returned as one list in party order, again recording the
    /// sparsity of compressed tensors.
    ///
    /// The returned [`RoundContext`] must be handed to the matching [`AggLayer::backward()`].
    ///
    /// # Errors
    /// Fails if `data` is empty, doesn't hold exactly one envelope per party or, with an
    /// aggregation method, an envelope holds more than one hidden tensor or the weights are not
    /// one per party. Failures of the runtime, including failures of the aggregation method and
    /// the compressor, are propagated.
    pub async fn forward(
        &self,
        data: PartyMap<DeviceObject<ForwardData>>,
        axis: usize,
        weights: Option<Vec<WeightInput>>,
    ) -> Result<(ForwardOutput, RoundContext), AggLayerError> {
        if data.is_empty() {
            return Err(ArgumentError::EmptyData.into());
        }

        let round = self.rounds.fetch_add(1, Ordering::Relaxed);
        let span = debug_span!("forward", round, mode = self.mode());
        async move {
            match &self.strategy {
                Strategy::Fusion(method) => {
                    self.fuse(method.clone(), data, axis, weights, round).await
                }
                Strategy::Passthrough => self.pass_through(data, round).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn fuse(
        &self,
        method: Arc<dyn AggMethod>,
        data: PartyMap<DeviceObject<ForwardData>>,
        axis: usize,
        weights: Option<Vec<WeightInput>>,
        round: u64,
    ) -> Result<(ForwardOutput, RoundContext), AggLayerError> {
        let Collected { hiddens, losses } = self.collect(data).await?;
        let weights = self.weights_on_aggregator(weights).await?;

        let inputs = self
            .runtime
            .gather(&self.aggregator, hiddens.clone())
            .await?;
        let fused = self
            .runtime
            .apply(&self.aggregator, inputs, move |tensors| {
                let inputs = tensors
                    .into_iter()
                    .map(Tensor::into_array)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Tensor::Dense(method.forward(
                    &inputs,
                    axis,
                    weights.as_deref(),
                )?))
            })
            .await?;
        debug!(aggregator = %self.aggregator, "fused hiddens");

        let fused = self.runtime.transfer(fused, &self.label_holder).await?;
        let (fused, sparse) = match &self.compressor {
            Some(compressor) => {
                let compressor = compressor.clone();
                let (fused, sparse) = self
                    .runtime
                    .apply(&self.label_holder, fused, move |fused| {
                        let (mut tensors, state) =
                            handle_sparse_hiddens(vec![fused], compressor.as_ref())?;
                        let fused = tensors
                            .pop()
                            .ok_or_else(|| anyhow!("the fused tensor vanished"))?;
                        Ok((fused, state))
                    })
                    .await?
                    .unzip();
                (fused, Some(sparse))
            }
            None => (fused, None),
        };

        let backend = self.backend;
        let per_party = losses.clone().resolve(&self.label_holder)?;
        let output = self
            .runtime
            .apply(&self.label_holder, fused, move |fused| {
                Ok(ForwardData::new(
                    fused.into_native(backend)?,
                    Some(Losses::PerParty(per_party)),
                ))
            })
            .await?;

        let context = RoundContext {
            layer: self.id,
            round,
            hiddens,
            losses,
            sparse,
        };
        Ok((ForwardOutput::Fused(output), context))
    }

    async fn pass_through(
        &self,
        data: PartyMap<DeviceObject<ForwardData>>,
        round: u64,
    ) -> Result<(ForwardOutput, RoundContext), AggLayerError> {
        let envelopes = self.in_party_order(data)?;
        let envelopes = try_join_all(
            envelopes
                .into_iter()
                .map(|envelope| self.runtime.transfer(envelope, &self.label_holder)),
        )
        .await?;
        let envelopes = self.runtime.gather(&self.label_holder, envelopes).await?;

        let (hiddens, losses) = self
            .runtime
            .apply(&self.label_holder, envelopes, |envelopes| {
                let (hiddens, losses): (Vec<_>, Vec<_>) = envelopes
                    .into_iter()
                    .map(ForwardData::into_parts)
                    .unzip();
                let hiddens = hiddens
                    .into_iter()
                    .flat_map(Hidden::into_tensors)
                    .collect::<Vec<_>>();
                Ok((hiddens, losses))
            })
            .await?
            .unzip();
        debug!(label_holder = %self.label_holder, "passed hiddens through");

        let (hiddens, sparse) = match &self.compressor {
            Some(compressor) => {
                let compressor = compressor.clone();
                let (hiddens, sparse) = self
                    .runtime
                    .apply(&self.label_holder, hiddens, move |hiddens| {
                        Ok(handle_sparse_hiddens(hiddens, compressor.as_ref())?)
                    })
                    .await?
                    .unzip();
                (hiddens, Some(sparse))
            }
            None => (hiddens, None),
        };

        let context = RoundContext {
            layer: self.id,
            round,
            hiddens: Vec::new(),
            losses,
            sparse,
        };
        Ok((ForwardOutput::Passthrough(hiddens), context))
    }

    /// Runs the backward pass of a round.
    ///
    /// # Behavior
    ///
    /// The sparsity recorded in the forward pass, if any, is applied to the `gradient` on the
    /// label holder first.
    ///
    /// With an aggregation method, the gradient moves to the aggregator, where the backward pass
    /// of the method splits it into one gradient per party, given the hidden representations of
    /// the round and the optional `weights`. The gradients are then scattered to the parties.
    ///
    /// Without an aggregation method, the gradient, which must reside on the label holder, is
    /// split into contiguous slices of the parties' output numbers in party order and each slice
    /// moves to its party.
    ///
    /// # Errors
    /// Fails if `context` was created by another layer, the gradient is empty or doesn't match
    /// the recorded sparsity. Without an aggregation method, it also fails if the gradient does
    /// not reside on the label holder, or if the output numbers are unset or don't add up to the
    /// length of the gradient. Failures of the runtime are propagated.
    pub async fn backward(
        &self,
        gradient: DeviceObject<Vec<Tensor>>,
        context: RoundContext,
        weights: Option<Vec<WeightInput>>,
    ) -> Result<PartyMap<DeviceObject<Hidden>>, AggLayerError> {
        if context.layer != self.id {
            return Err(ArgumentError::ForeignContext.into());
        }
        if gradient.value().is_empty() {
            return Err(ArgumentError::EmptyGradient.into());
        }

        let span = debug_span!("backward", round = context.round, mode = self.mode());
        async move {
            match &self.strategy {
                Strategy::Fusion(method) => {
                    self.split_fused(method.clone(), gradient, context, weights)
                        .await
                }
                Strategy::Passthrough => self.split_passed(gradient, context).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn split_fused(
        &self,
        method: Arc<dyn AggMethod>,
        gradient: DeviceObject<Vec<Tensor>>,
        context: RoundContext,
        weights: Option<Vec<WeightInput>>,
    ) -> Result<PartyMap<DeviceObject<Hidden>>, AggLayerError> {
        let gradient = self.compensate(gradient, context.sparse).await?;
        let gradient = self
            .runtime
            .transfer(gradient, &self.aggregator)
            .await?
            .resolve(&self.aggregator)?;
        let weights = self.weights_on_aggregator(weights).await?;
        let inputs = context
            .hiddens
            .into_iter()
            .map(|hidden| hidden.resolve(&self.aggregator))
            .collect::<Result<Vec<_>, _>>()?;

        let parties_num = self.parties.len();
        let compressor = self.compressor.clone();
        let gradients = self
            .runtime
            .execute(
                &self.aggregator,
                self.aggregator.kind().returns(parties_num),
                move || {
                    let gradients = gradient
                        .into_iter()
                        .map(|gradient| canonical(gradient, compressor.as_deref()))
                        .collect::<Result<Vec<_>, _>>()?;
                    let inputs = inputs
                        .into_iter()
                        .map(Tensor::into_array)
                        .collect::<Result<Vec<_>, _>>()?;
                    let gradients =
                        method.backward(&gradients, weights.as_deref(), &inputs, parties_num)?;
                    Ok(gradients.into_iter().map(Tensor::Dense).collect())
                },
            )
            .await?;
        debug!(aggregator = %self.aggregator, "split fused gradient");

        Ok(self
            .scatter(gradients)
            .await?
            .into_iter()
            .map(|(party, gradient)| (party, gradient.map(Hidden::Single)))
            .collect())
    }

    async fn split_passed(
        &self,
        gradient: DeviceObject<Vec<Tensor>>,
        context: RoundContext,
    ) -> Result<PartyMap<DeviceObject<Hidden>>, AggLayerError> {
        if !gradient.is_on(&self.label_holder) {
            return Err(ArgumentError::GradientMisplaced {
                expected: self.label_holder.clone(),
                found: gradient.device().clone(),
            }
            .into());
        }
        let output_num = self
            .basenet_output_num
            .as_ref()
            .ok_or(ArgumentError::OutputNumUnset)?;
        let counts = self
            .parties
            .iter()
            .map(|party| output_num.get(party).copied().unwrap_or_default())
            .collect::<Vec<_>>();
        let expected = counts.iter().sum::<usize>();
        if expected != gradient.value().len() {
            return Err(ArgumentError::OutputNumMismatch {
                expected,
                got: gradient.value().len(),
            }
            .into());
        }

        let gradient = self
            .compensate(gradient, context.sparse)
            .await?
            .resolve(&self.label_holder)?;
        let slices = self
            .runtime
            .execute(
                &self.label_holder,
                self.label_holder.kind().returns(self.parties.len()),
                move || Ok(split_to_parties(&gradient, &counts)?),
            )
            .await?;
        let slices = try_join_all(
            self.parties
                .iter()
                .zip(slices)
                .map(|(party, slice)| self.runtime.transfer(slice, party)),
        )
        .await?;
        debug!(label_holder = %self.label_holder, "split gradient to parties");

        Ok(self
            .parties
            .iter()
            .cloned()
            .zip(slices.into_iter().map(|slice| slice.map(Hidden::Multi)))
            .collect())
    }

    /// Applies the sparsity recorded in a forward pass to the gradient on the label holder.
    async fn compensate(
        &self,
        gradient: DeviceObject<Vec<Tensor>>,
        sparse: Option<DeviceObject<SparseState>>,
    ) -> Result<DeviceObject<Vec<Tensor>>, AggLayerError> {
        let (state, compressor) = match (sparse, &self.compressor) {
            (Some(state), Some(compressor)) => (
                state.resolve(&self.label_holder)?,
                compressor.clone(),
            ),
            _ => return Ok(gradient),
        };
        state.check(gradient.value().len())?;

        let gradient = self
            .runtime
            .transfer(gradient, &self.label_holder)
            .await?;
        let gradient = self
            .runtime
            .apply(&self.label_holder, gradient, move |gradient| {
                Ok(handle_sparse_gradients(
                    gradient,
                    &state,
                    compressor.as_ref(),
                )?)
            })
            .await?;
        trace!(label_holder = %self.label_holder, "compensated sparsity");

        Ok(gradient)
    }

    /// Moves the weights owned by devices to the aggregator.
    async fn weights_on_aggregator(
        &self,
        weights: Option<Vec<WeightInput>>,
    ) -> Result<Option<Vec<Weight>>, AggLayerError> {
        let weights = match weights {
            Some(weights) => weights,
            None => return Ok(None),
        };
        if weights.len() != self.parties.len() {
            return Err(ArgumentError::WeightLengthMismatch {
                expected: self.parties.len(),
                got: weights.len(),
            }
            .into());
        }

        let weights = try_join_all(weights.into_iter().map(|weight| async move {
            match weight {
                WeightInput::Local(weight) => Ok::<_, RuntimeError>(weight),
                WeightInput::Remote(weight) => self
                    .runtime
                    .transfer(weight, &self.aggregator)
                    .await?
                    .resolve(&self.aggregator),
            }
        }))
        .await?;
        Ok(Some(weights))
    }
}

/// Converts a gradient which arrived on the aggregator into the dense form.
fn canonical(
    gradient: Tensor,
    compressor: Option<&dyn Compressor>,
) -> Result<NumericArray, TaskError> {
    let gradient = match compressor {
        Some(compressor) if compressor.is_compressed(&gradient) => {
            compressor.decompress(gradient)?
        }
        _ => gradient,
    };
    Ok(gradient.into_array()?)
}

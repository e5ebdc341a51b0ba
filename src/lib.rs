#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Aggregation layer for vertically partitioned split learning
//!
//! In split learning over vertically partitioned data every party holds a private slice of the
//! features of the same samples and runs its own *bottom* network on it. The partial activations
//! of all parties are fused into a single representation that feeds a shared *top* network owned
//! by the party holding the labels. On the way back the gradient of the fused representation is
//! split again and each share is routed to the party it belongs to.
//!
//! This crate implements that boundary, the [`AggLayer`]:
//!
//! - **collect**: gather the hidden representations of all parties on the aggregator device,
//!   optionally compressing them on the wire.
//! - **forward**: fuse the collected hiddens with an [`AggMethod`] on the aggregator, which may be
//!   a plain device, a secure multi-party device or a homomorphic encryption device, and hand the
//!   fused [`ForwardData`] to the label holder.
//! - **backward**: split the gradient of the fused representation per party, compensating for the
//!   sparsity introduced by a [`Compressor`], and scatter the shares to their owners.
//!
//! The state a backward pass needs from its forward pass (the collected hiddens, the gathered
//! losses and the sparsity masks) is returned by [`AggLayer::forward()`] as a [`RoundContext`] and
//! handed back to [`AggLayer::backward()`], so rounds can never overwrite each other.
//!
//! Placing functions on devices and moving values between them is the job of a [`Runtime`]. The
//! [`LocalRuntime`] runs everything in-process and serializes every transfer, which makes it
//! suitable for simulations and tests.
//!
//! ```no_run
//! # use std::{collections::HashMap, sync::Arc};
//! # use ndarray::ArrayD;
//! # use agglayer::{AggLayer, Backend, Device, DeviceObject, ForwardData, LocalRuntime, Tensor, method::Sum};
//! # async fn round() -> Result<(), agglayer::AggLayerError> {
//! let alice = Device::plain("alice");
//! let bob = Device::plain("bob");
//! let layer = AggLayer::new(
//!     LocalRuntime::new(),
//!     alice.clone(),
//!     vec![alice.clone(), bob.clone()],
//!     alice.clone(),
//!     Some(Arc::new(Sum)),
//!     Backend::Tensorflow,
//!     None,
//! )?;
//!
//! let mut data = HashMap::new();
//! for party in &[&alice, &bob] {
//!     let hidden = Tensor::from(ArrayD::<f32>::ones(ndarray::IxDyn(&[4, 8])));
//!     data.insert((*party).clone(), DeviceObject::new((*party).clone(), ForwardData::new(hidden, None)));
//! }
//! let (fused, context) = layer.forward(data, 0, None).await?;
//!
//! let gradient = DeviceObject::new(alice.clone(), vec![Tensor::from(ArrayD::<f32>::ones(ndarray::IxDyn(&[4, 8])))]);
//! let gradients = layer.backward(gradient, context, None).await?;
//! assert_eq!(gradients.len(), 2);
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate tracing;

pub mod agglayer;
pub mod compress;
pub mod device;
pub mod envelope;
pub mod error;
pub mod method;
pub mod runtime;
pub mod settings;
pub mod tensor;

pub use self::{
    agglayer::{AggLayer, Collected, ForwardOutput, PartyMap, RoundContext},
    compress::{Compressor, CompressorKind},
    device::{Device, DeviceKind, DeviceObject, Returns},
    envelope::{ForwardData, Losses},
    error::{AggLayerError, ArgumentError, ConfigError},
    method::{AggMethod, Weight, WeightInput},
    runtime::{local::LocalRuntime, Runtime, RuntimeError},
    tensor::{Backend, Hidden, NumericArray, Tensor},
};

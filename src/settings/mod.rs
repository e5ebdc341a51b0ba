//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables. An example
//! of a configuration file can be found in the `configs/` directory located in the repository root.


use std::{fmt, path::Path, sync::Arc};

use config::{Config, ConfigError, Environment, File};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    compress::{Compressor, QuantizedZeroPoint, RandomSparse, TopkSparse},
    device::Device,
    method::{AggMethod, Average, Concat, Sum},
    tensor::Backend,
};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    #[validate]
    pub topology: TopologySettings,
    #[validate]
    pub layer: LayerSettings,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("agglayer")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_topology"))]
/// The devices taking part in the aggregation.
pub struct TopologySettings {
    /// The names of the parties, in party order. Every party is a plain device.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [topology]
    /// parties = ["alice", "bob", "carol"]
    /// ```
    #[validate(length(min = 1))]
    pub parties: Vec<String>,

    /// The aggregator device.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [topology.aggregator]
    /// name = "spu"
    /// kind = "secure_compute"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// AGGLAYER__TOPOLOGY__AGGREGATOR__NAME=heu
    /// AGGLAYER__TOPOLOGY__AGGREGATOR__KIND=homomorphic
    /// ```
    pub aggregator: Device,

    /// The name of the party holding the labels.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [topology]
    /// label_holder = "alice"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// AGGLAYER__TOPOLOGY__LABEL_HOLDER=alice
    /// ```
    pub label_holder: String,
}

impl TopologySettings {
    /// Gets the party devices, in party order.
    pub fn parties(&self) -> Vec<Device> {
        self.parties.iter().map(Device::plain).collect()
    }

    /// Gets the label holder device.
    pub fn label_holder(&self) -> Device {
        Device::plain(&self.label_holder)
    }

    /// Checks that the parties are distinct and the label holder is one of them.
    fn validate_topology(&self) -> Result<(), ValidationError> {
        let distinct = self
            .parties
            .iter()
            .enumerate()
            .all(|(i, party)| !self.parties[..i].contains(party));
        if !distinct {
            return Err(ValidationError::new("duplicate parties"));
        }
        if !self.parties.contains(&self.label_holder) {
            return Err(ValidationError::new("label holder is not a party"));
        }
        Ok(())
    }
}

/// A wrapper for validate derive.
fn validate_topology(s: &TopologySettings) -> Result<(), ValidationError> {
    s.validate_topology()
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_layer"))]
/// The settings of the aggregation layer.
pub struct LayerSettings {
    /// The backend of the bottom and top networks, either `tensorflow` or `torch`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [layer]
    /// backend = "torch"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// AGGLAYER__LAYER__BACKEND=torch
    /// ```
    #[serde(deserialize_with = "deserialize_backend")]
    pub backend: Backend,

    /// The axis along which the hidden representations are fused.
    ///
    /// `sum` and `average` reduce elementwise and ignore it. With `concat` it must equal the axis
    /// of the method.
    #[serde(default)]
    pub axis: usize,

    /// The aggregation method. Leave this out to pass the hidden representations through to the
    /// label holder, which then must be the aggregator.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [layer.method]
    /// kind = "concat"
    /// axis = 1
    /// ```
    #[serde(default)]
    pub method: Option<MethodSettings>,

    /// The compressor of tensors on the wire.
    ///
    /// The sparse rate of the sparsifying compressors must be between `0` and `1` (i.e.
    /// `0 < sparse_rate < 1`) and the bit width of the quantizing compressor must be between `1`
    /// and `8`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [layer.compressor]
    /// kind = "random_sparse"
    /// sparse_rate = 0.9
    /// seed = 42
    /// ```
    #[serde(default)]
    pub compressor: Option<CompressorSettings>,
}

impl LayerSettings {
    /// Checks the axis of a concatenation and the compressor parameters.
    fn validate_layer(&self) -> Result<(), ValidationError> {
        if let Some(MethodSettings::Concat { axis }) = self.method {
            if axis != self.axis {
                return Err(ValidationError::new("conflicting concatenation axes"));
            }
        }

        let valid = match self.compressor {
            Some(CompressorSettings::TopkSparse { sparse_rate })
            | Some(CompressorSettings::RandomSparse { sparse_rate, .. }) => {
                0. < sparse_rate && sparse_rate < 1.
            }
            Some(CompressorSettings::QuantizedZeroPoint { bits }) => (1..=8).contains(&bits),
            None => true,
        };
        if valid {
            Ok(())
        } else {
            Err(ValidationError::new("invalid compressor parameters"))
        }
    }
}

/// A wrapper for validate derive.
fn validate_layer(s: &LayerSettings) -> Result<(), ValidationError> {
    s.validate_layer()
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// The settings of an aggregation method.
pub enum MethodSettings {
    Sum,
    Average,
    Concat { axis: usize },
}

impl MethodSettings {
    /// Creates the aggregation method.
    pub fn build(&self) -> Arc<dyn AggMethod> {
        match *self {
            MethodSettings::Sum => Arc::new(Sum),
            MethodSettings::Average => Arc::new(Average),
            MethodSettings::Concat { axis } => Arc::new(Concat::new(axis)),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// The settings of a compressor.
pub enum CompressorSettings {
    TopkSparse { sparse_rate: f32 },
    RandomSparse { sparse_rate: f32, seed: u64 },
    QuantizedZeroPoint { bits: u8 },
}

impl CompressorSettings {
    /// Creates the compressor.
    pub fn build(&self) -> Arc<dyn Compressor> {
        match *self {
            CompressorSettings::TopkSparse { sparse_rate } => {
                Arc::new(TopkSparse::new(sparse_rate))
            }
            CompressorSettings::RandomSparse { sparse_rate, seed } => {
                Arc::new(RandomSparse::new(sparse_rate, seed))
            }
            CompressorSettings::QuantizedZeroPoint { bits } => {
                Arc::new(QuantizedZeroPoint::new(bits))
            }
        }
    }
}

fn deserialize_backend<'de, D>(deserializer: D) -> Result<Backend, D::Error>
where
    D: Deserializer<'de>,
{
    struct BackendVisitor;

    impl<'de> Visitor<'de> for BackendVisitor {
        type Value = Backend;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "either 'tensorflow' or 'torch'")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            value
                .parse()
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(BackendVisitor)
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// AGGLAYER__LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.3.15/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.3.15/tracing_subscriber/filter/struct.EnvFilter.html#directives")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}

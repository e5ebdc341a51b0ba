//! Devices and the values they own.
//!
//! A [`Device`] is a named place where functions run and values live. Parties and the label
//! holder are always [`DeviceKind::Plain`] devices, while the aggregator may also be a secure
//! multi-party computation device or a homomorphic encryption device.
//!
//! A [`DeviceObject`] is a value owned by exactly one device. Moving it to another device is an
//! explicit [`Runtime::transfer()`] and functions placed on a device via [`Runtime::execute()`]
//! only accept values that reside there.
//!
//! [`Runtime::transfer()`]: crate::Runtime::transfer
//! [`Runtime::execute()`]: crate::Runtime::execute

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::runtime::RuntimeError;

#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// The kind of a device.
pub enum DeviceKind {
    /// A device of a single party which computes on plaintext values.
    #[display(fmt = "plain")]
    Plain,
    /// A secure multi-party computation device spanning several parties.
    #[display(fmt = "secure_compute")]
    SecureCompute,
    /// A homomorphic encryption device.
    #[display(fmt = "homomorphic")]
    Homomorphic,
}

impl DeviceKind {
    /// Checks if tensors exchanged with a device of this kind may be compressed on the wire.
    ///
    /// Only plaintext payloads can be compressed; the encodings of secure and encrypted devices
    /// are opaque.
    pub fn supports_wire_compression(self) -> bool {
        matches!(self, DeviceKind::Plain)
    }

    /// Checks if a function with several outputs placed on a device of this kind must declare its
    /// output arity up front.
    ///
    /// The output arity of a secure computation is fixed when its circuit is compiled and can't
    /// be inferred from the function's result.
    pub fn requires_declared_arity(self) -> bool {
        matches!(self, DeviceKind::SecureCompute)
    }

    /// Gets the output declaration of a function with `count` outputs for this kind of device.
    pub fn returns(self, count: usize) -> Returns {
        if self.requires_declared_arity() {
            Returns::UserSpecified(count)
        } else {
            Returns::Static(count)
        }
    }
}

#[derive(Clone, Debug, Display, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[display(fmt = "{}({})", kind, name)]
/// A named device.
pub struct Device {
    name: String,
    kind: DeviceKind,
}

impl Device {
    /// Creates a device.
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Creates a plain party device.
    pub fn plain(name: impl Into<String>) -> Self {
        Self::new(name, DeviceKind::Plain)
    }

    /// Creates a secure multi-party computation device.
    pub fn secure_compute(name: impl Into<String>) -> Self {
        Self::new(name, DeviceKind::SecureCompute)
    }

    /// Creates a homomorphic encryption device.
    pub fn homomorphic(name: impl Into<String>) -> Self {
        Self::new(name, DeviceKind::Homomorphic)
    }

    /// Gets the name of the device.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the kind of the device.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// The output declaration of a placed function.
pub enum Returns {
    /// The number of outputs is known from the function's result.
    Static(usize),
    /// The number of outputs is declared by the caller, as secure devices require.
    UserSpecified(usize),
}

impl Returns {
    /// Gets the number of outputs.
    pub fn count(self) -> usize {
        match self {
            Returns::Static(count) | Returns::UserSpecified(count) => count,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
/// A value owned by a device.
pub struct DeviceObject<T> {
    device: Device,
    value: T,
}

impl<T> DeviceObject<T> {
    /// Wraps a value which resides on `device`.
    pub fn new(device: Device, value: T) -> Self {
        Self { device, value }
    }

    /// Gets the device owning the value.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Checks if the value resides on `device`.
    pub fn is_on(&self, device: &Device) -> bool {
        &self.device == device
    }

    /// Gets a reference to the value without moving it off its device.
    ///
    /// This is a peek on the bookkeeping of the substrate. The aggregation layer only uses it to
    /// check lengths and counts before it places any function. Computations on the value must be
    /// placed on its device.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Takes the value for use on `device`.
    ///
    /// # Errors
    /// Fails if the value resides on a different device. It must be transferred first.
    pub fn resolve(self, device: &Device) -> Result<T, RuntimeError> {
        if self.is_on(device) {
            Ok(self.value)
        } else {
            Err(RuntimeError::Misplaced {
                expected: device.clone(),
                found: self.device,
            })
        }
    }

    /// Consumes the object into its device and value.
    pub fn into_parts(self) -> (Device, T) {
        (self.device, self.value)
    }

    /// Consumes the object into its value, wherever it resides.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Restructures the value without moving it off its device.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DeviceObject<U> {
        DeviceObject {
            device: self.device,
            value: f(self.value),
        }
    }
}

impl<A, B> DeviceObject<(A, B)> {
    /// Splits a pair of values into two objects on the same device.
    pub fn unzip(self) -> (DeviceObject<A>, DeviceObject<B>) {
        let (a, b) = self.value;
        (
            DeviceObject::new(self.device.clone(), a),
            DeviceObject::new(self.device, b),
        )
    }
}

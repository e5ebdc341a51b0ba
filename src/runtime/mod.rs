//! The device substrate.
//!
//! The aggregation layer never computes anything itself. It places functions on devices and
//! moves values between them through a [`Runtime`], which is free to schedule the resulting units
//! of work concurrently. Independent work, like the per-party steps of a collection, is issued as
//! joined futures, while dependent work is ordered by awaiting its inputs.

pub mod local;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::device::{Device, DeviceObject, Returns};

/// The error type of functions placed on a device. Aggregation methods and compressors report
/// their failures with it.
pub type TaskError = anyhow::Error;

/// A value which can be transferred between devices.
pub trait Payload: Serialize + DeserializeOwned + Send + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + 'static {}

#[derive(Debug, Error)]
/// Errors of the device substrate.
pub enum RuntimeError {
    #[error("the value resides on {found} but was used on {expected}")]
    Misplaced { expected: Device, found: Device },

    #[error("the function placed on {device} declared {declared} outputs but returned {got}")]
    ArityMismatch {
        device: Device,
        declared: usize,
        got: usize,
    },

    #[error("the function placed on {device} returns {count} outputs without declaring its arity")]
    UndeclaredArity { device: Device, count: usize },

    #[error("serialization of a transferred value failed: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("the placed function panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("the placed function failed: {0:#}")]
    Task(TaskError),
}

#[async_trait]
/// An abstract device substrate.
pub trait Runtime
where
    Self: Clone + Send + Sync + 'static,
{
    /// Runs `task` on `device`.
    ///
    /// # Behavior
    ///
    /// - If `returns` is a [`Returns::Static`] declaration of more than one output and the device
    ///   requires declared arities, fail with [`RuntimeError::UndeclaredArity`] without running
    ///   the task.
    /// - If the task fails, return [`RuntimeError::Task`].
    /// - If the task returns a different number of values than declared, return
    ///   [`RuntimeError::ArityMismatch`].
    /// - Otherwise return the values as objects residing on `device`.
    async fn execute<U, F>(
        &self,
        device: &Device,
        returns: Returns,
        task: F,
    ) -> Result<Vec<DeviceObject<U>>, RuntimeError>
    where
        U: Send + 'static,
        F: FnOnce() -> Result<Vec<U>, TaskError> + Send + 'static;

    /// Transfers `object` to the device `to`.
    ///
    /// # Behavior
    ///
    /// - If the object already resides on `to`, return it unchanged.
    /// - Otherwise encode the value for the target device, move it and return it as an object
    ///   residing on `to`.
    async fn transfer<T>(
        &self,
        object: DeviceObject<T>,
        to: &Device,
    ) -> Result<DeviceObject<T>, RuntimeError>
    where
        T: Payload;

    /// Applies the single-output function `f` to a value residing on `device`.
    async fn apply<T, U, F>(
        &self,
        device: &Device,
        object: DeviceObject<T>,
        f: F,
    ) -> Result<DeviceObject<U>, RuntimeError>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(T) -> Result<U, TaskError> + Send + 'static,
    {
        let value = object.resolve(device)?;
        let mut outputs = self
            .execute(device, Returns::Static(1), move || Ok(vec![f(value)?]))
            .await?;
        outputs.pop().ok_or_else(|| RuntimeError::ArityMismatch {
            device: device.clone(),
            declared: 1,
            got: 0,
        })
    }

    /// Applies `f` to several values residing on `device`.
    async fn apply_all<T, U, F>(
        &self,
        device: &Device,
        objects: Vec<DeviceObject<T>>,
        returns: Returns,
        f: F,
    ) -> Result<Vec<DeviceObject<U>>, RuntimeError>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(Vec<T>) -> Result<Vec<U>, TaskError> + Send + 'static,
    {
        let values = objects
            .into_iter()
            .map(|object| object.resolve(device))
            .collect::<Result<Vec<_>, _>>()?;
        self.execute(device, returns, move || f(values)).await
    }

    /// Gathers several values residing on `device` into one object.
    async fn gather<T>(
        &self,
        device: &Device,
        objects: Vec<DeviceObject<T>>,
    ) -> Result<DeviceObject<Vec<T>>, RuntimeError>
    where
        T: Send + 'static,
    {
        let mut gathered = self
            .apply_all(device, objects, Returns::Static(1), |values| Ok(vec![values]))
            .await?;
        gathered.pop().ok_or_else(|| RuntimeError::ArityMismatch {
            device: device.clone(),
            declared: 1,
            got: 0,
        })
    }
}

//! An in-process device substrate.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::{sync::Mutex, task};

use crate::{
    device::{Device, DeviceObject, Returns},
    runtime::{Payload, Runtime, RuntimeError, TaskError},
};

#[derive(Clone, Debug, Eq, PartialEq)]
/// A record of a value which moved between two devices.
pub struct Transfer {
    /// The device which owned the value.
    pub from: Device,
    /// The device which owns the value now.
    pub to: Device,
    /// The encoded size of the value in bytes.
    pub bytes: usize,
}

#[derive(Clone, Debug, Default)]
/// A [`Runtime`] which hosts all devices in the current process.
///
/// Placed functions run on the blocking thread pool of the surrounding tokio runtime. Transfers
/// encode the value with `bincode` and decode it again on the target device, so every transfer
/// pays the serialization cost a remote substrate would pay and is recorded in a log.
pub struct LocalRuntime {
    transfers: Arc<Mutex<Vec<Transfer>>>,
}

impl LocalRuntime {
    /// Creates a runtime with an empty transfer log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets all transfers so far, in the order they completed.
    pub async fn transfers(&self) -> Vec<Transfer> {
        self.transfers.lock().await.clone()
    }

    /// Gets the total number of bytes transferred from `from` to `to` so far.
    pub async fn transferred_bytes(&self, from: &Device, to: &Device) -> usize {
        self.transfers
            .lock()
            .await
            .iter()
            .filter(|transfer| &transfer.from == from && &transfer.to == to)
            .map(|transfer| transfer.bytes)
            .sum()
    }

    /// Clears the transfer log.
    pub async fn clear_transfers(&self) {
        self.transfers.lock().await.clear();
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    async fn execute<U, F>(
        &self,
        device: &Device,
        returns: Returns,
        task: F,
    ) -> Result<Vec<DeviceObject<U>>, RuntimeError>
    where
        U: Send + 'static,
        F: FnOnce() -> Result<Vec<U>, TaskError> + Send + 'static,
    {
        if let Returns::Static(count) = returns {
            if count > 1 && device.kind().requires_declared_arity() {
                return Err(RuntimeError::UndeclaredArity {
                    device: device.clone(),
                    count,
                });
            }
        }

        trace!(%device, outputs = returns.count(), "running placed function");
        let values = task::spawn_blocking(task)
            .await?
            .map_err(RuntimeError::Task)?;
        if values.len() != returns.count() {
            return Err(RuntimeError::ArityMismatch {
                device: device.clone(),
                declared: returns.count(),
                got: values.len(),
            });
        }

        Ok(values
            .into_iter()
            .map(|value| DeviceObject::new(device.clone(), value))
            .collect())
    }

    async fn transfer<T>(
        &self,
        object: DeviceObject<T>,
        to: &Device,
    ) -> Result<DeviceObject<T>, RuntimeError>
    where
        T: Payload,
    {
        if object.is_on(to) {
            return Ok(object);
        }

        let (from, value) = object.into_parts();
        let encoded = bincode::serialize(&value)?;
        let value = bincode::deserialize::<T>(&encoded)?;
        debug!(%from, %to, bytes = encoded.len(), "transferred value");

        self.transfers.lock().await.push(Transfer {
            from,
            to: to.clone(),
            bytes: encoded.len(),
        });
        Ok(DeviceObject::new(to.clone(), value))
    }
}

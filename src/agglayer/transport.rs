use std::{fmt, sync::Arc};

use crate::{
    compress::Compressor,
    device::{Device, DeviceObject},
    runtime::{Runtime, RuntimeError},
    tensor::Tensor,
};

#[derive(Clone)]
/// How tensors travel between the parties and the aggregator.
pub(crate) enum Transport {
    Plain,
    /// Tensors are compressed on the sending device and decompressed on the receiving device.
    Compressed(Arc<dyn Compressor>),
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Plain => write!(f, "Plain"),
            Transport::Compressed(_) => write!(f, "Compressed"),
        }
    }
}

impl Transport {
    /// Selects the transport for an aggregator.
    ///
    /// Only plaintext aggregators exchange compressed tensors.
    pub(crate) fn select(aggregator: &Device, compressor: Option<&Arc<dyn Compressor>>) -> Self {
        match compressor {
            Some(compressor) if aggregator.kind().supports_wire_compression() => {
                Transport::Compressed(compressor.clone())
            }
            _ => Transport::Plain,
        }
    }

    /// Moves `object` to `to` and leaves it in the wire form.
    async fn ship<R: Runtime>(
        &self,
        runtime: &R,
        object: DeviceObject<Tensor>,
        to: &Device,
    ) -> Result<DeviceObject<Tensor>, RuntimeError> {
        match self {
            Transport::Plain => runtime.transfer(object, to).await,
            Transport::Compressed(compressor) => {
                let from = object.device().clone();
                let compressor = compressor.clone();
                let compressed = runtime
                    .apply(&from, object, move |tensor| compressor.compress(tensor))
                    .await?;
                runtime.transfer(compressed, to).await
            }
        }
    }

    /// Moves `object` to `to` and restores the dense form on arrival.
    pub(crate) async fn send<R: Runtime>(
        &self,
        runtime: &R,
        object: DeviceObject<Tensor>,
        to: &Device,
    ) -> Result<DeviceObject<Tensor>, RuntimeError> {
        let arrived = self.ship(runtime, object, to).await?;
        match self {
            Transport::Plain => Ok(arrived),
            Transport::Compressed(compressor) => {
                let compressor = compressor.clone();
                runtime
                    .apply(to, arrived, move |tensor| compressor.decompress(tensor))
                    .await
            }
        }
    }
}

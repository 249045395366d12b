//! GPU object helpers - `GpuBackend` の create/destroy を scoped resource として扱う
//!
//! `Device` は service として registry から解決されます。
//! 暗黙のグローバル device は持たず、必ず layer 経由で provide してください。

use std::future::Future;
use std::sync::Arc;

use super::handle::Resource;
use super::manager::acquire_release;
use crate::domain::EffectError;
use crate::effect::Effect;
use crate::ports::{BufferDescriptor, GpuBackend, GpuError, GpuHandle, PipelineDescriptor, TextureDescriptor};
use crate::service::{Layer, Service};

/// Handle to a GPU backend, resolved as a service.
#[derive(Clone)]
pub struct Device {
    backend: Arc<dyn GpuBackend>,
}

impl Service for Device {
    const TAG: &'static str = "tessel.device";
}

impl Device {
    pub fn new(backend: Arc<dyn GpuBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// Layer binding an already-created device.
    pub fn layer(backend: Arc<dyn GpuBackend>) -> Layer {
        Layer::succeed(Self::new(backend))
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").field("backend", &self.backend.name()).finish()
    }
}

/// A native object created by a [`Device`], together with its descriptor.
#[derive(Debug)]
pub struct GpuObject<D> {
    pub handle: GpuHandle,
    pub descriptor: D,
    device: Device,
}

pub type Buffer = GpuObject<BufferDescriptor>;
pub type Texture = GpuObject<TextureDescriptor>;
pub type Pipeline = GpuObject<PipelineDescriptor>;

/// Create a buffer released when the current scope closes.
pub fn buffer(desc: BufferDescriptor) -> Effect<Resource<Buffer>> {
    let label = desc.label.clone();
    scoped_object(label, desc, |device, desc| async move {
        device.backend.create_buffer(&desc).await
    })
}

pub fn texture(desc: TextureDescriptor) -> Effect<Resource<Texture>> {
    let label = desc.label.clone();
    scoped_object(label, desc, |device, desc| async move {
        device.backend.create_texture(&desc).await
    })
}

pub fn pipeline(desc: PipelineDescriptor) -> Effect<Resource<Pipeline>> {
    let label = desc.label.clone();
    scoped_object(label, desc, |device, desc| async move {
        device.backend.create_pipeline(&desc).await
    })
}

fn scoped_object<D, C, Fut>(label: String, desc: D, create: C) -> Effect<Resource<GpuObject<D>>>
where
    D: Clone + Send + Sync + 'static,
    C: Fn(Device, D) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<GpuHandle, GpuError>> + Send + 'static,
{
    let create = Arc::new(create);
    let resource_label = label.clone();
    let acquire = Effect::<Device>::service().and_then(move |device| {
        let create = Arc::clone(&create);
        let desc = desc.clone();
        let label = label.clone();
        Effect::from_future(move || {
            let device = device.clone();
            let desc = desc.clone();
            let label = label.clone();
            let created = (*create)(device.clone(), desc.clone());
            async move {
                let handle = created
                    .await
                    .map_err(|err| EffectError::acquisition(label.clone(), err))?;
                tracing::debug!(%handle, label = %label, backend = device.backend.name(), "gpu object created");
                Ok(GpuObject {
                    handle,
                    descriptor: desc,
                    device,
                })
            }
        })
    });
    acquire_release(resource_label, acquire, destroy)
}

fn destroy<D: Send + Sync + 'static>(object: Arc<GpuObject<D>>) -> Effect<()> {
    Effect::from_future(move || {
        let object = Arc::clone(&object);
        async move {
            object
                .device
                .backend
                .destroy(object.handle)
                .await
                .map_err(|err| EffectError::custom("gpu.destroy", format!("{}: {err}", object.handle)))
        }
    })
}

use crate::foundation::error::{SetupStage, SnowError, SnowResult};

/// Adapter, device and queue shared by every GPU stage of a session.
pub struct GpuContext {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuContext {
    /// Context without an output surface, for offscreen runs and tests.
    pub fn headless() -> SnowResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        Self::request(&instance, None)
    }

    /// Context able to present to `window`, plus the surface for it.
    #[cfg(feature = "window")]
    pub fn for_window(
        window: std::sync::Arc<winit::window::Window>,
    ) -> SnowResult<(Self, wgpu::Surface<'static>)> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let surface = instance.create_surface(window).map_err(|e| {
            SnowError::setup(SetupStage::Output, format!("create output surface: {e}"))
        })?;
        let ctx = Self::request(&instance, Some(&surface))?;
        Ok((ctx, surface))
    }

    fn request(
        instance: &wgpu::Instance,
        compatible_surface: Option<&wgpu::Surface<'_>>,
    ) -> SnowResult<Self> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                SnowError::setup(SetupStage::Context, "no gpu adapter available")
            }
            other => SnowError::setup(
                SetupStage::Context,
                format!("wgpu request_adapter failed: {other:?}"),
            ),
        })?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("snowfield_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| {
            SnowError::setup(
                SetupStage::Context,
                format!("wgpu request_device failed: {e:?}"),
            )
        })?;

        let info = adapter.get_info();
        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            "gpu context ready"
        );
        Ok(Self {
            adapter,
            device,
            queue,
        })
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

/// Runs `f` inside an error scope and reports anything it raised.
pub(crate) fn scoped<T>(
    device: &wgpu::Device,
    filter: wgpu::ErrorFilter,
    f: impl FnOnce() -> T,
) -> (T, Option<wgpu::Error>) {
    device.push_error_scope(filter);
    let out = f();
    let err = pollster::block_on(device.pop_error_scope());
    (out, err)
}

use crate::{
    foundation::{
        core::PixelLayout,
        error::{SetupStage, SnowError, SnowResult},
    },
    gpu::context::{GpuContext, scoped},
    surface::PixelMemory,
};

/// Pixel surface living in GPU memory. Created with both storage usage
/// (compute writes) and copy-source usage (display uploads), which is all
/// the registration the two domains need.
#[derive(Debug)]
pub struct GpuPixelBuffer {
    layout: PixelLayout,
    buffer: wgpu::Buffer,
}

impl GpuPixelBuffer {
    pub fn allocate(ctx: &GpuContext, layout: PixelLayout) -> SnowResult<Self> {
        if layout.row_pitch() % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT != 0 {
            return Err(SnowError::setup(
                SetupStage::Surface,
                format!(
                    "row pitch {} is not a multiple of {}",
                    layout.row_pitch(),
                    wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
                ),
            ));
        }

        let size = layout.byte_len() as u64;
        let limit = u64::from(ctx.device().limits().max_storage_buffer_binding_size);
        if size > limit {
            return Err(SnowError::setup(
                SetupStage::Registration,
                format!("surface needs {size} bytes, storage bindings allow {limit}"),
            ));
        }

        let (buffer, err) = scoped(ctx.device(), wgpu::ErrorFilter::OutOfMemory, || {
            ctx.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some("snowfield_pixel_surface"),
                size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        if let Some(e) = err {
            return Err(SnowError::setup(
                SetupStage::Surface,
                format!("allocate pixel surface: {e}"),
            ));
        }

        tracing::debug!(bytes = size, "allocated gpu pixel surface");
        Ok(Self { layout, buffer })
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

impl PixelMemory for GpuPixelBuffer {
    fn layout(&self) -> PixelLayout {
        self.layout
    }
}

use crate::{
    foundation::{
        core::{BYTES_PER_PIXEL, PixelLayout, align_to},
        error::{SnowError, SnowResult},
    },
    gpu::{buffer::GpuPixelBuffer, context::GpuContext},
    surface::DisplayOwned,
};

/// Copies the visible pixels of a display-owned surface back to the host,
/// rows packed. Used for diagnostics and tests; the frame loop never reads
/// back.
pub fn read_surface(
    ctx: &GpuContext,
    surface: &DisplayOwned<GpuPixelBuffer>,
) -> SnowResult<Vec<u8>> {
    let layout = surface.layout();
    let staging = staging_buffer(ctx.device(), layout.byte_len() as u64);
    let mut encoder = ctx
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("snowfield_surface_readback_encoder"),
        });
    encoder.copy_buffer_to_buffer(
        surface.memory().buffer(),
        0,
        &staging,
        0,
        layout.byte_len() as u64,
    );
    ctx.queue().submit(Some(encoder.finish()));
    map_rows(ctx.device(), &staging, layout)
}

/// Copies a whole `width x height` 4-byte-per-texel texture back to the host.
pub(crate) fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
) -> SnowResult<Vec<u8>> {
    let (width, height) = (texture.width(), texture.height());
    let pitch = align_to(width * BYTES_PER_PIXEL, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
        .ok_or_else(|| SnowError::gpu("readback row pitch overflow"))?;
    let layout = PixelLayout::with_pitch(width, height, pitch)?;
    let staging = staging_buffer(device, layout.byte_len() as u64);

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("snowfield_texture_readback_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(pitch),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));
    map_rows(device, &staging, layout)
}

fn staging_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("snowfield_readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn map_rows(
    device: &wgpu::Device,
    staging: &wgpu::Buffer,
    layout: PixelLayout,
) -> SnowResult<Vec<u8>> {
    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |res| {
        let _ = tx.send(res);
    });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| SnowError::gpu(format!("wgpu poll failed: {e:?}")))?;
    rx.recv()
        .map_err(|_| SnowError::gpu("readback channel closed"))?
        .map_err(|e| SnowError::gpu(format!("readback map failed: {e:?}")))?;

    let mapped = slice.get_mapped_range();
    let pitch = layout.row_pitch() as usize;
    let row = layout.row_bytes();
    let mut out = Vec::with_capacity(row * layout.height() as usize);
    for y in 0..layout.height() as usize {
        let start = y * pitch;
        out.extend_from_slice(&mapped[start..start + row]);
    }
    drop(mapped);
    staging.unmap();
    Ok(out)
}

use crate::{
    display::{CLEAR_COLOR, DisplayStage, QuadVertex, ortho_bytes, quad_bytes},
    foundation::{
        core::PixelLayout,
        error::{SetupStage, SnowError, SnowResult},
    },
    gpu::{
        buffer::GpuPixelBuffer,
        context::{GpuContext, scoped},
        readback::read_texture,
    },
    surface::DisplayOwned,
};

/// Texture format of the sampled image. Kernels write `0xAARRGGBB` words,
/// which are B, G, R, A bytes in memory, so declaring the image BGRA lets
/// the buffer-to-texture copy run without any conversion.
pub const IMAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

const SHADER: &str = r#"
struct VsOut {
  @builtin(position) pos: vec4<f32>,
  @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var t_image: texture_2d<f32>;
@group(0) @binding(1) var s_image: sampler;
@group(0) @binding(2) var<uniform> projection: mat4x4<f32>;

@vertex
fn vs(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VsOut {
  var o: VsOut;
  o.pos = projection * vec4<f32>(position, 0.0, 1.0);
  o.uv = uv;
  return o;
}

@fragment
fn fs(in: VsOut) -> @location(0) vec4<f32> {
  return textureSample(t_image, s_image, in.uv);
}
"#;

enum Target {
    Window {
        surface: wgpu::Surface<'static>,
        adapter: wgpu::Adapter,
        size: (u32, u32),
        config: Option<wgpu::SurfaceConfiguration>,
        view_format: wgpu::TextureFormat,
        frame: Option<wgpu::SurfaceTexture>,
    },
    Offscreen {
        texture: Option<wgpu::Texture>,
        drawn: bool,
    },
}

struct Resources {
    layout: PixelLayout,
    image: wgpu::Texture,
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    vertices: wgpu::Buffer,
}

/// Display stage on the GPU: uploads the released surface into a sampled
/// image with a GPU-side copy and draws it as one textured rectangle.
pub struct GpuDisplay {
    device: wgpu::Device,
    queue: wgpu::Queue,
    target: Target,
    resources: Option<Resources>,
    presented: u64,
}

impl GpuDisplay {
    /// Presents into a window surface, paced by vertical sync. `size` is
    /// the window's inner size in physical pixels; it must equal the
    /// surface layout.
    pub fn windowed(ctx: &GpuContext, surface: wgpu::Surface<'static>, size: (u32, u32)) -> Self {
        Self::with_target(
            ctx,
            Target::Window {
                surface,
                adapter: ctx.adapter().clone(),
                size,
                config: None,
                view_format: IMAGE_FORMAT,
                frame: None,
            },
        )
    }

    /// Draws into an offscreen texture that can be read back.
    pub fn offscreen(ctx: &GpuContext) -> Self {
        Self::with_target(
            ctx,
            Target::Offscreen {
                texture: None,
                drawn: false,
            },
        )
    }

    fn with_target(ctx: &GpuContext, target: Target) -> Self {
        Self {
            device: ctx.device().clone(),
            queue: ctx.queue().clone(),
            target,
            resources: None,
            presented: 0,
        }
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented
    }

    fn resources(&self) -> SnowResult<&Resources> {
        self.resources
            .as_ref()
            .ok_or_else(|| SnowError::gpu("display used before configure"))
    }

    /// Reads the sampled image back, rows packed, bytes as the kernel wrote
    /// them.
    pub fn read_sampled_image(&self) -> SnowResult<Vec<u8>> {
        let res = self.resources()?;
        read_texture(&self.device, &self.queue, &res.image)
    }

    /// Reads the composited output back; offscreen targets only.
    pub fn read_output(&self) -> SnowResult<Vec<u8>> {
        match &self.target {
            Target::Offscreen {
                texture: Some(texture),
                ..
            } => read_texture(&self.device, &self.queue, texture),
            Target::Offscreen { texture: None, .. } => {
                Err(SnowError::gpu("display used before configure"))
            }
            Target::Window { .. } => Err(SnowError::gpu("window output cannot be read back")),
        }
    }

    fn configure_target(&mut self, layout: PixelLayout) -> SnowResult<wgpu::TextureFormat> {
        let (width, height) = (layout.width(), layout.height());
        match &mut self.target {
            Target::Window {
                surface,
                adapter,
                size,
                config,
                view_format,
                ..
            } => {
                check_output_size(*size, layout)?;
                let caps = surface.get_capabilities(adapter);
                let (format, linear) = pick_surface_format(&caps.formats).ok_or_else(|| {
                    SnowError::setup(SetupStage::Display, "output surface reports no formats")
                })?;
                let cfg = wgpu::SurfaceConfiguration {
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    format,
                    width,
                    height,
                    present_mode: wgpu::PresentMode::Fifo,
                    desired_maximum_frame_latency: 2,
                    alpha_mode: caps
                        .alpha_modes
                        .first()
                        .copied()
                        .unwrap_or(wgpu::CompositeAlphaMode::Auto),
                    view_formats: if linear == format {
                        vec![]
                    } else {
                        vec![linear]
                    },
                };
                surface.configure(&self.device, &cfg);
                tracing::info!(?format, ?linear, width, height, "output surface configured (fifo)");
                *config = Some(cfg);
                *view_format = linear;
                Ok(linear)
            }
            Target::Offscreen { texture, .. } => {
                *texture = Some(self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("snowfield_offscreen_output"),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: IMAGE_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                }));
                Ok(IMAGE_FORMAT)
            }
        }
    }

    fn build_resources(
        &self,
        layout: PixelLayout,
        format: wgpu::TextureFormat,
    ) -> Resources {
        let device = &self.device;
        let (width, height) = (layout.width(), layout.height());

        let image = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("snowfield_sampled_image"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: IMAGE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let image_view = image.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("snowfield_image_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let projection = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("snowfield_projection"),
            size: 64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&projection, 0, &ortho_bytes(width, height));

        let vertex_bytes = quad_bytes(width, height);
        let vertices = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("snowfield_quad"),
            size: vertex_bytes.len() as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&vertices, 0, &vertex_bytes);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("snowfield_display_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(64),
                    },
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("snowfield_display_bg"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&image_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: projection.as_entire_binding(),
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("snowfield_display_shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("snowfield_display_pl"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("snowfield_display_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: QuadVertex::SIZE,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Resources {
            layout,
            image,
            pipeline,
            bind_group,
            vertices,
        }
    }
}

/// Swapchain extents follow the window on most backends, so a window of any
/// other size would leave every acquire outdated.
pub(crate) fn check_output_size(size: (u32, u32), layout: PixelLayout) -> SnowResult<()> {
    if size == (layout.width(), layout.height()) {
        return Ok(());
    }
    Err(SnowError::setup(
        SetupStage::Output,
        format!(
            "output is {}x{}, surface is {}x{}",
            size.0,
            size.1,
            layout.width(),
            layout.height()
        ),
    ))
}

/// Picks the swapchain format and the format its views are rendered in.
/// The view is never sRGB, so output bytes stay those of the surface.
pub(crate) fn pick_surface_format(
    formats: &[wgpu::TextureFormat],
) -> Option<(wgpu::TextureFormat, wgpu::TextureFormat)> {
    if let Some(f) = formats.iter().copied().find(|f| *f == IMAGE_FORMAT) {
        return Some((f, f));
    }
    if let Some(f) = formats.iter().copied().find(|f| !f.is_srgb()) {
        return Some((f, f));
    }
    formats.first().map(|f| (*f, f.remove_srgb_suffix()))
}

impl DisplayStage for GpuDisplay {
    type Memory = GpuPixelBuffer;

    #[tracing::instrument(skip(self))]
    fn configure(&mut self, layout: PixelLayout) -> SnowResult<()> {
        let format = self.configure_target(layout)?;
        let (resources, err) = scoped(&self.device, wgpu::ErrorFilter::Validation, || {
            self.build_resources(layout, format)
        });
        if let Some(e) = err {
            return Err(SnowError::setup(
                SetupStage::Display,
                format!("display pipeline: {e}"),
            ));
        }
        self.resources = Some(resources);
        Ok(())
    }

    fn refresh(&mut self, surface: &DisplayOwned<GpuPixelBuffer>) -> SnowResult<()> {
        let res = self.resources()?;
        let layout = res.layout;
        if surface.layout() != layout {
            return Err(SnowError::gpu(format!(
                "display configured for {layout:?}, refreshed from {:?}",
                surface.layout()
            )));
        }

        let ((), err) = scoped(&self.device, wgpu::ErrorFilter::Validation, || {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("snowfield_upload_encoder"),
                });
            encoder.copy_buffer_to_texture(
                wgpu::TexelCopyBufferInfo {
                    buffer: surface.memory().buffer(),
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(layout.row_pitch()),
                        rows_per_image: Some(layout.height()),
                    },
                },
                wgpu::TexelCopyTextureInfo {
                    texture: &res.image,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: layout.width(),
                    height: layout.height(),
                    depth_or_array_layers: 1,
                },
            );
            self.queue.submit(Some(encoder.finish()));
        });
        match err {
            Some(e) => Err(SnowError::gpu(format!("upload surface to sampled image: {e}"))),
            None => Ok(()),
        }
    }

    fn draw(&mut self) -> SnowResult<()> {
        let Some(res) = self.resources.as_ref() else {
            return Err(SnowError::gpu("display used before configure"));
        };

        let (view, frame) = match &mut self.target {
            Target::Window {
                surface,
                config,
                view_format,
                ..
            } => match surface.get_current_texture() {
                Ok(frame) => {
                    let view = frame.texture.create_view(&wgpu::TextureViewDescriptor {
                        format: Some(*view_format),
                        ..Default::default()
                    });
                    (view, Some(frame))
                }
                Err(wgpu::SurfaceError::OutOfMemory) => {
                    return Err(SnowError::gpu("output surface out of memory"));
                }
                Err(e @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                    if let Some(cfg) = config.as_ref() {
                        surface.configure(&self.device, cfg);
                    }
                    return Err(SnowError::presentation(format!(
                        "output surface {e}, reconfigured"
                    )));
                }
                Err(e) => {
                    return Err(SnowError::presentation(format!("acquire output frame: {e}")));
                }
            },
            Target::Offscreen { texture, .. } => {
                let Some(texture) = texture.as_ref() else {
                    return Err(SnowError::gpu("display used before configure"));
                };
                (
                    texture.create_view(&wgpu::TextureViewDescriptor::default()),
                    None,
                )
            }
        };

        let [r, g, b, a] = CLEAR_COLOR;
        let (_, err) = scoped(&self.device, wgpu::ErrorFilter::Validation, || {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("snowfield_display_encoder"),
                });
            {
                let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("snowfield_display_rp"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &view,
                        resolve_target: None,
                        depth_slice: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                rp.set_pipeline(&res.pipeline);
                rp.set_bind_group(0, &res.bind_group, &[]);
                rp.set_vertex_buffer(0, res.vertices.slice(..));
                rp.draw(0..4, 0..1);
            }
            self.queue.submit(Some(encoder.finish()));
        });

        match &mut self.target {
            Target::Window { frame: pending, .. } => *pending = frame,
            Target::Offscreen { drawn, .. } => *drawn = true,
        }

        match err {
            Some(e) => Err(SnowError::presentation(format!("draw: {e}"))),
            None => Ok(()),
        }
    }

    fn present(&mut self) -> SnowResult<()> {
        match &mut self.target {
            Target::Window { frame, .. } => {
                let Some(frame) = frame.take() else {
                    return Err(SnowError::presentation("no output frame to present"));
                };
                frame.present();
            }
            Target::Offscreen { drawn, .. } => {
                if !std::mem::take(drawn) {
                    return Err(SnowError::presentation("present without a drawn frame"));
                }
            }
        }
        self.presented += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::TextureFormat as F;

    #[test]
    fn bgra_surface_format_is_preferred() {
        let picked = pick_surface_format(&[F::Rgba8UnormSrgb, F::Rgba8Unorm, F::Bgra8Unorm]);
        assert_eq!(picked, Some((F::Bgra8Unorm, F::Bgra8Unorm)));
    }

    #[test]
    fn linear_format_beats_srgb() {
        let picked = pick_surface_format(&[F::Bgra8UnormSrgb, F::Rgba8Unorm]);
        assert_eq!(picked, Some((F::Rgba8Unorm, F::Rgba8Unorm)));
    }

    #[test]
    fn srgb_only_surfaces_render_through_a_linear_view() {
        let picked = pick_surface_format(&[F::Bgra8UnormSrgb]);
        assert_eq!(picked, Some((F::Bgra8UnormSrgb, F::Bgra8Unorm)));
        assert_eq!(pick_surface_format(&[]), None);
    }

    #[test]
    fn output_must_match_the_surface_size() {
        let layout = PixelLayout::aligned(1920, 1080).unwrap();
        assert!(check_output_size((1920, 1080), layout).is_ok());
        let err = check_output_size((2560, 1440), layout).unwrap_err();
        assert_eq!(err.setup_stage(), Some(SetupStage::Output));
    }
}

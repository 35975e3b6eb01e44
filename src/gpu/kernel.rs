use crate::{
    clock::CLOCK_STEP,
    compute::{ComputeStage, KernelProgram, check_layout},
    foundation::{
        core::PixelLayout,
        error::{SetupStage, SnowError, SnowResult},
    },
    gpu::{
        buffer::GpuPixelBuffer,
        context::{GpuContext, scoped},
    },
    surface::{ComputeOwned, WriteFence},
};

const WORKGROUP_EDGE: u32 = 16;
const PARAMS_SIZE: u64 = 16;

const PRELUDE: &str = r#"
struct Params {
  width: u32,
  height: u32,
  pitch: u32,
  t: f32,
};

@group(0) @binding(0) var<storage, read_write> pixels: array<u32>;
@group(0) @binding(1) var<uniform> params: Params;

fn avalanche(x: u32) -> u32 {
  var h = x;
  h = h ^ (h >> 16u);
  h = h * 0x7feb352du;
  h = h ^ (h >> 15u);
  h = h * 0x846ca68bu;
  h = h ^ (h >> 16u);
  return h;
}

fn pack_bgra(r: u32, g: u32, b: u32, a: u32) -> u32 {
  return (a << 24u) | (r << 16u) | (g << 8u) | b;
}
"#;

const SNOW_TEXEL: &str = r#"
fn texel(x: u32, y: u32) -> u32 {
  let seed = avalanche(x + avalanche(y + avalanche(bitcast<u32>(params.t))));
  let v = seed & 0xffu;
  return pack_bgra(v, v, v, 0xffu);
}
"#;

const ENTRY: &str = r#"
@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
  if (id.x >= params.width || id.y >= params.height) {
    return;
  }
  pixels[id.y * params.pitch + id.x] = texel(id.x, id.y);
}
"#;

fn palette_texel() -> String {
    format!(
        r#"
fn texel(x: u32, y: u32) -> u32 {{
  let step = u32(round(params.t / {CLOCK_STEP:?})) % 3u;
  if (step == 0u) {{
    return pack_bgra(255u, 0u, 0u, 255u);
  }}
  if (step == 1u) {{
    return pack_bgra(0u, 255u, 0u, 255u);
  }}
  return pack_bgra(0u, 0u, 255u, 255u);
}}
"#
    )
}

pub(crate) fn kernel_source(program: KernelProgram) -> String {
    let texel = match program {
        KernelProgram::Snow => SNOW_TEXEL.to_string(),
        KernelProgram::Palette => palette_texel(),
    };
    format!("{PRELUDE}{texel}{ENTRY}")
}

struct KernelState {
    layout: PixelLayout,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    bind_group: Option<(u64, wgpu::BindGroup)>,
}

/// Compute stage running a WGSL kernel over the GPU pixel surface.
pub struct GpuKernel {
    device: wgpu::Device,
    queue: wgpu::Queue,
    program: KernelProgram,
    state: Option<KernelState>,
}

impl GpuKernel {
    pub fn new(ctx: &GpuContext, program: KernelProgram) -> Self {
        Self {
            device: ctx.device().clone(),
            queue: ctx.queue().clone(),
            program,
            state: None,
        }
    }

    pub fn program(&self) -> KernelProgram {
        self.program
    }
}

impl ComputeStage for GpuKernel {
    type Memory = GpuPixelBuffer;

    #[tracing::instrument(skip(self), fields(program = ?self.program))]
    fn setup(&mut self, layout: PixelLayout) -> SnowResult<()> {
        let device = &self.device;
        let ((pipeline, bind_group_layout), err) =
            scoped(device, wgpu::ErrorFilter::Validation, || {
                let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("snowfield_kernel_shader"),
                    source: wgpu::ShaderSource::Wgsl(kernel_source(self.program).into()),
                });

                let bind_group_layout =
                    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some("snowfield_kernel_bgl"),
                        entries: &[
                            wgpu::BindGroupLayoutEntry {
                                binding: 0,
                                visibility: wgpu::ShaderStages::COMPUTE,
                                ty: wgpu::BindingType::Buffer {
                                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                                    has_dynamic_offset: false,
                                    min_binding_size: None,
                                },
                                count: None,
                            },
                            wgpu::BindGroupLayoutEntry {
                                binding: 1,
                                visibility: wgpu::ShaderStages::COMPUTE,
                                ty: wgpu::BindingType::Buffer {
                                    ty: wgpu::BufferBindingType::Uniform,
                                    has_dynamic_offset: false,
                                    min_binding_size: wgpu::BufferSize::new(PARAMS_SIZE),
                                },
                                count: None,
                            },
                        ],
                    });

                let pipeline_layout =
                    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                        label: Some("snowfield_kernel_pl"),
                        bind_group_layouts: &[&bind_group_layout],
                        push_constant_ranges: &[],
                    });

                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some("snowfield_kernel_pipeline"),
                    layout: Some(&pipeline_layout),
                    module: &shader,
                    entry_point: Some("main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                });
                (pipeline, bind_group_layout)
            });
        if let Some(e) = err {
            return Err(SnowError::setup(
                SetupStage::Compute,
                format!("kernel pipeline: {e}"),
            ));
        }

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("snowfield_kernel_params"),
            size: PARAMS_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        self.state = Some(KernelState {
            layout,
            pipeline,
            bind_group_layout,
            params,
            bind_group: None,
        });
        Ok(())
    }

    fn write(
        &mut self,
        target: &mut ComputeOwned<GpuPixelBuffer>,
        t: f32,
    ) -> SnowResult<WriteFence> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| SnowError::gpu("gpu kernel used before setup"))?;
        let layout = check_layout(Some(state.layout), target.layout())?;

        let mut params = [0u8; PARAMS_SIZE as usize];
        params[0..4].copy_from_slice(&layout.width().to_le_bytes());
        params[4..8].copy_from_slice(&layout.height().to_le_bytes());
        params[8..12].copy_from_slice(&layout.pitch_pixels().to_le_bytes());
        params[12..16].copy_from_slice(&t.to_le_bytes());
        self.queue.write_buffer(&state.params, 0, &params);

        let surface_id = target.surface_id();
        let device = &self.device;
        let (submission, err) = scoped(device, wgpu::ErrorFilter::Validation, || {
            if state.bind_group.as_ref().map(|(id, _)| *id) != Some(surface_id) {
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("snowfield_kernel_bg"),
                    layout: &state.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: target.memory().buffer().as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: state.params.as_entire_binding(),
                        },
                    ],
                });
                state.bind_group = Some((surface_id, bind_group));
            }

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("snowfield_kernel_encoder"),
            });
            if let Some((_, bind_group)) = state.bind_group.as_ref() {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("snowfield_kernel_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&state.pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(
                    layout.width().div_ceil(WORKGROUP_EDGE),
                    layout.height().div_ceil(WORKGROUP_EDGE),
                    1,
                );
            }
            self.queue.submit(Some(encoder.finish()))
        });
        if let Some(e) = err {
            // A bind group created against a bad buffer must not be reused.
            state.bind_group = None;
            return Err(SnowError::gpu(format!("kernel dispatch: {e}")));
        }

        Ok(WriteFence::Gpu {
            device: self.device.clone(),
            submission,
        })
    }

    fn teardown(&mut self) {
        if self.state.take().is_some() {
            tracing::debug!(program = ?self.program, "gpu kernel torn down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_share_the_entry_point() {
        for program in [KernelProgram::Snow, KernelProgram::Palette] {
            let src = kernel_source(program);
            assert!(src.contains("fn main("));
            assert!(src.contains("fn texel("));
            assert!(src.contains("@workgroup_size(16, 16, 1)"));
        }
        assert!(kernel_source(KernelProgram::Palette).contains("params.t / 0.1"));
    }
}

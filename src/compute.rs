//! Compute stage contract and the host-side kernels.
//!
//! A kernel is set up once with the surface layout, then asked to fill the
//! whole surface every frame. `write` may return before the work finishes
//! (GPU kernels do), but it must hand back a [`WriteFence`] covering all of
//! it; the orchestrator waits on that fence before the surface is released.

use crate::{
    clock::CLOCK_STEP,
    foundation::{
        core::{OPAQUE_BLUE, OPAQUE_GREEN, OPAQUE_RED, PixelLayout, pack_bgra},
        error::{SnowError, SnowResult},
    },
    surface::{ComputeOwned, HostPixels, PixelMemory, WriteFence},
};

pub trait ComputeStage {
    type Memory: PixelMemory;

    fn setup(&mut self, layout: PixelLayout) -> SnowResult<()>;

    /// Assigns every visible pixel of `target` for animation time `t`.
    fn write(&mut self, target: &mut ComputeOwned<Self::Memory>, t: f32)
    -> SnowResult<WriteFence>;

    fn teardown(&mut self);
}

/// Which pattern a kernel draws.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelProgram {
    /// Animated grey noise.
    #[default]
    Snow,
    /// One solid colour per clock step: red, green, blue, repeating.
    Palette,
}

fn avalanche(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x7feb_352d);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846c_a68b);
    h ^= h >> 16;
    h
}

/// Snow texel for pixel `(x, y)` at time `t`, packed like the GPU kernel
/// writes it.
pub fn snow_texel(x: u32, y: u32, t: f32) -> u32 {
    let seed = avalanche(x.wrapping_add(avalanche(y.wrapping_add(avalanche(t.to_bits())))));
    let v = (seed & 0xff) as u8;
    pack_bgra(v, v, v, 0xff)
}

/// Palette entry for time `t`, assuming the default clock step.
pub fn palette_word(t: f32) -> u32 {
    let step = (t / CLOCK_STEP).round() as u64;
    match step % 3 {
        0 => OPAQUE_RED,
        1 => OPAQUE_GREEN,
        _ => OPAQUE_BLUE,
    }
}

/// Writes a solid colour keyed to the clock value.
#[derive(Debug, Default)]
pub struct ClockPalette {
    layout: Option<PixelLayout>,
    writes: u64,
}

impl ClockPalette {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl ComputeStage for ClockPalette {
    type Memory = HostPixels;

    fn setup(&mut self, layout: PixelLayout) -> SnowResult<()> {
        self.layout = Some(layout);
        Ok(())
    }

    fn write(&mut self, target: &mut ComputeOwned<HostPixels>, t: f32) -> SnowResult<WriteFence> {
        check_layout(self.layout, target.layout())?;
        target.memory_mut().fill(palette_word(t));
        self.writes += 1;
        Ok(WriteFence::Complete)
    }

    fn teardown(&mut self) {
        self.layout = None;
    }
}

/// CPU rendition of the snow kernel.
#[derive(Debug, Default)]
pub struct HostSnow {
    layout: Option<PixelLayout>,
}

impl HostSnow {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ComputeStage for HostSnow {
    type Memory = HostPixels;

    fn setup(&mut self, layout: PixelLayout) -> SnowResult<()> {
        self.layout = Some(layout);
        Ok(())
    }

    fn write(&mut self, target: &mut ComputeOwned<HostPixels>, t: f32) -> SnowResult<WriteFence> {
        let layout = check_layout(self.layout, target.layout())?;
        let px = target.memory_mut();
        for y in 0..layout.height() {
            for (x, chunk) in px.row_mut(y).chunks_exact_mut(4).enumerate() {
                chunk.copy_from_slice(&snow_texel(x as u32, y, t).to_le_bytes());
            }
        }
        Ok(WriteFence::Complete)
    }

    fn teardown(&mut self) {
        self.layout = None;
    }
}

pub(crate) fn check_layout(
    configured: Option<PixelLayout>,
    target: PixelLayout,
) -> SnowResult<PixelLayout> {
    let layout = configured
        .ok_or_else(|| SnowError::Other(anyhow::anyhow!("compute stage used before setup")))?;
    if layout != target {
        return Err(SnowError::Other(anyhow::anyhow!(
            "compute stage set up for {}x{} but handed a {}x{} surface",
            layout.width(),
            layout.height(),
            target.width(),
            target.height()
        )));
    }
    Ok(layout)
}

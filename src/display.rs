//! Display stage contract, the fixed output geometry and the CPU fallback.
//!
//! Output coordinates equal pixel coordinates with the origin at the top
//! left. The surface is drawn as one rectangle shifted by
//! [`PIXEL_CENTER_OFFSET`] so that, sampled with nearest filtering, every
//! output pixel centre lands inside exactly one texel. The texture
//! coordinates flip the vertical axis: row 0 of the surface ends up at
//! the bottom of the output.

use crate::{
    foundation::{
        core::{BYTES_PER_PIXEL, PixelLayout},
        error::{SnowError, SnowResult},
    },
    surface::{DisplayOwned, HostPixels, PixelMemory},
};

pub const PIXEL_CENTER_OFFSET: f32 = 0.375;

/// Colour the output is cleared to before the rectangle is drawn, as
/// `[r, g, b, a]` in 0..1.
pub const CLEAR_COLOR: [f64; 4] = [0.5, 0.0, 0.0, 0.0];

pub trait DisplayStage {
    type Memory: PixelMemory;

    /// Allocates the sampled image and fixes the orthographic mapping.
    fn configure(&mut self, layout: PixelLayout) -> SnowResult<()>;

    /// Copies the released surface into the sampled image.
    fn refresh(&mut self, surface: &DisplayOwned<Self::Memory>) -> SnowResult<()>;

    fn draw(&mut self) -> SnowResult<()>;

    /// Hands the drawn frame to the output; blocks on vertical sync where
    /// the output paces.
    fn present(&mut self) -> SnowResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

impl QuadVertex {
    pub const SIZE: u64 = 16;

    pub fn to_le_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        let words = [self.position[0], self.position[1], self.uv[0], self.uv[1]];
        for (dst, w) in out.chunks_exact_mut(4).zip(words) {
            dst.copy_from_slice(&w.to_le_bytes());
        }
        out
    }
}

/// The output rectangle in triangle-strip order: top-left, bottom-left,
/// top-right, bottom-right.
pub fn fullscreen_quad(width: u32, height: u32) -> [QuadVertex; 4] {
    let (w, h) = (width as f32, height as f32);
    let o = PIXEL_CENTER_OFFSET;
    [
        QuadVertex {
            position: [o, o],
            uv: [0.0, 1.0],
        },
        QuadVertex {
            position: [o, h + o],
            uv: [0.0, 0.0],
        },
        QuadVertex {
            position: [w + o, o],
            uv: [1.0, 1.0],
        },
        QuadVertex {
            position: [w + o, h + o],
            uv: [1.0, 0.0],
        },
    ]
}

pub fn quad_bytes(width: u32, height: u32) -> Vec<u8> {
    fullscreen_quad(width, height)
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

/// Column-major orthographic projection: x in `0..width` to -1..1, y in
/// `0..height` to 1..-1 (top-left origin), z passed through into 0..1.
pub fn ortho_top_left(width: u32, height: u32) -> [[f32; 4]; 4] {
    let (w, h) = (width as f32, height as f32);
    [
        [2.0 / w, 0.0, 0.0, 0.0],
        [0.0, -2.0 / h, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [-1.0, 1.0, 0.0, 1.0],
    ]
}

pub fn ortho_bytes(width: u32, height: u32) -> [u8; 64] {
    let mut out = [0u8; 64];
    let m = ortho_top_left(width, height);
    for (dst, w) in out.chunks_exact_mut(4).zip(m.iter().flatten()) {
        dst.copy_from_slice(&w.to_le_bytes());
    }
    out
}

/// Applies a column-major matrix to an output-space point.
pub fn project(m: &[[f32; 4]; 4], p: [f32; 2]) -> [f32; 2] {
    let x = m[0][0] * p[0] + m[1][0] * p[1] + m[3][0];
    let y = m[0][1] * p[0] + m[1][1] * p[1] + m[3][1];
    [x, y]
}

/// Texel hit by the centre of output pixel `(x, y)` when the quad is drawn
/// with nearest sampling, or `None` if the centre misses the quad.
pub fn sampled_texel(width: u32, height: u32, x: u32, y: u32) -> Option<(u32, u32)> {
    let q = fullscreen_quad(width, height);
    let (tl, br) = (q[0], q[3]);
    let (cx, cy) = (x as f32 + 0.5, y as f32 + 0.5);
    if cx < tl.position[0] || cx >= br.position[0] || cy < tl.position[1] || cy >= br.position[1]
    {
        return None;
    }
    let fx = (cx - tl.position[0]) / (br.position[0] - tl.position[0]);
    let fy = (cy - tl.position[1]) / (br.position[1] - tl.position[1]);
    let u = tl.uv[0] + fx * (br.uv[0] - tl.uv[0]);
    let v = tl.uv[1] + fy * (br.uv[1] - tl.uv[1]);
    let tx = ((u * width as f32).floor() as u32).min(width - 1);
    let ty = ((v * height as f32).floor() as u32).min(height - 1);
    Some((tx, ty))
}

/// CPU fallback display: the sampled image is a byte copy of the surface
/// and the output is a host framebuffer.
#[derive(Debug, Default)]
pub struct HostDisplay {
    layout: Option<PixelLayout>,
    image: Vec<u8>,
    output: Vec<u8>,
    drawn: bool,
    presented: Option<Vec<u8>>,
    presented_frames: u64,
}

impl HostDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last refreshed image, rows packed, bytes as the kernel wrote them.
    pub fn sampled_image(&self) -> &[u8] {
        &self.image
    }

    /// The last presented output frame, if any.
    pub fn presented(&self) -> Option<&[u8]> {
        self.presented.as_deref()
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented_frames
    }

    fn layout(&self) -> SnowResult<PixelLayout> {
        self.layout
            .ok_or_else(|| SnowError::Other(anyhow::anyhow!("display used before configure")))
    }
}

impl DisplayStage for HostDisplay {
    type Memory = HostPixels;

    fn configure(&mut self, layout: PixelLayout) -> SnowResult<()> {
        let tight = layout.to_tight();
        self.image = vec![0; tight.byte_len()];
        self.output = vec![0; tight.byte_len()];
        self.layout = Some(layout);
        Ok(())
    }

    fn refresh(&mut self, surface: &DisplayOwned<HostPixels>) -> SnowResult<()> {
        let layout = self.layout()?;
        if surface.layout() != layout {
            return Err(SnowError::Other(anyhow::anyhow!(
                "display configured for {layout:?}, refreshed from {:?}",
                surface.layout()
            )));
        }
        let row = layout.row_bytes();
        for y in 0..layout.height() {
            let start = y as usize * row;
            self.image[start..start + row].copy_from_slice(surface.memory().row(y));
        }
        Ok(())
    }

    fn draw(&mut self) -> SnowResult<()> {
        let layout = self.layout()?;
        let (w, h) = (layout.width(), layout.height());
        let bpp = BYTES_PER_PIXEL as usize;
        let clear = CLEAR_COLOR.map(|c| (c * 255.0).round() as u8);
        let clear_bgra = [clear[2], clear[1], clear[0], clear[3]];
        for y in 0..h {
            for x in 0..w {
                let dst = (y as usize * w as usize + x as usize) * bpp;
                let px = match sampled_texel(w, h, x, y) {
                    Some((tx, ty)) => {
                        let src = (ty as usize * w as usize + tx as usize) * bpp;
                        [
                            self.image[src],
                            self.image[src + 1],
                            self.image[src + 2],
                            self.image[src + 3],
                        ]
                    }
                    None => clear_bgra,
                };
                self.output[dst..dst + bpp].copy_from_slice(&px);
            }
        }
        self.drawn = true;
        Ok(())
    }

    fn present(&mut self) -> SnowResult<()> {
        if !std::mem::take(&mut self.drawn) {
            return Err(SnowError::presentation("present without a drawn frame"));
        }
        self.presented = Some(self.output.clone());
        self.presented_frames += 1;
        Ok(())
    }
}

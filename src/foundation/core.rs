use crate::foundation::error::{SnowError, SnowResult};

pub const BYTES_PER_PIXEL: u32 = 4;

pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;

/// Row pitch alignment required for buffer-to-texture copies.
pub const COPY_ROW_ALIGNMENT: u32 = 256;

/// Fixed geometry of the shared pixel surface.
///
/// Width and height never change after construction. `row_pitch` is the
/// distance in bytes between the starts of two consecutive rows; it is at
/// least `width * 4` and always a multiple of 4, so every row starts on a
/// whole pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelLayout {
    width: u32,
    height: u32,
    row_pitch: u32,
}

impl PixelLayout {
    /// Rows packed back to back.
    pub fn tight(width: u32, height: u32) -> SnowResult<Self> {
        let pitch = row_bytes(width)?;
        Self::with_pitch(width, height, pitch)
    }

    /// Rows padded to [`COPY_ROW_ALIGNMENT`], as GPU copies require.
    pub fn aligned(width: u32, height: u32) -> SnowResult<Self> {
        let pitch = row_bytes(width)?;
        let padded = align_to(pitch, COPY_ROW_ALIGNMENT)
            .ok_or_else(|| SnowError::config("row pitch overflow"))?;
        Self::with_pitch(width, height, padded)
    }

    pub fn with_pitch(width: u32, height: u32, row_pitch: u32) -> SnowResult<Self> {
        if width == 0 || height == 0 {
            return Err(SnowError::config(format!(
                "surface dimensions must be non-zero (got {width}x{height})"
            )));
        }
        let min_pitch = row_bytes(width)?;
        if row_pitch < min_pitch {
            return Err(SnowError::config(format!(
                "row pitch {row_pitch} is smaller than one row ({min_pitch} bytes)"
            )));
        }
        if row_pitch % BYTES_PER_PIXEL != 0 {
            return Err(SnowError::config(format!(
                "row pitch {row_pitch} is not a whole number of pixels"
            )));
        }
        (row_pitch as u64)
            .checked_mul(height as u64)
            .filter(|len| usize::try_from(*len).is_ok())
            .ok_or_else(|| SnowError::config("surface byte size overflow"))?;
        Ok(Self {
            width,
            height,
            row_pitch,
        })
    }

    pub fn width(self) -> u32 {
        self.width
    }

    pub fn height(self) -> u32 {
        self.height
    }

    pub fn row_pitch(self) -> u32 {
        self.row_pitch
    }

    pub fn pitch_pixels(self) -> u32 {
        self.row_pitch / BYTES_PER_PIXEL
    }

    pub fn row_bytes(self) -> usize {
        (self.width * BYTES_PER_PIXEL) as usize
    }

    pub fn byte_len(self) -> usize {
        self.row_pitch as usize * self.height as usize
    }

    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_tight(self) -> bool {
        self.row_pitch == self.width * BYTES_PER_PIXEL
    }

    /// Byte offset of pixel `(x, y)`; `None` when outside the surface.
    pub fn texel_offset(self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(y as usize * self.row_pitch as usize + (x * BYTES_PER_PIXEL) as usize)
    }

    /// The same dimensions with rows packed back to back.
    pub fn to_tight(self) -> Self {
        Self {
            row_pitch: self.width * BYTES_PER_PIXEL,
            ..self
        }
    }
}

fn row_bytes(width: u32) -> SnowResult<u32> {
    width
        .checked_mul(BYTES_PER_PIXEL)
        .ok_or_else(|| SnowError::config("surface width overflow"))
}

pub(crate) fn align_to(value: u32, alignment: u32) -> Option<u32> {
    let mask = alignment - 1;
    Some(value.checked_add(mask)? & !mask)
}

/// Packs a colour the way kernels store it: one little-endian word
/// `0xAARRGGBB`, which lays the bytes out as B, G, R, A.
pub fn pack_bgra(r: u8, g: u8, b: u8, a: u8) -> u32 {
    (u32::from(a) << 24) | (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

/// Inverse of [`pack_bgra`], returned as `[r, g, b, a]`.
pub fn unpack_bgra(word: u32) -> [u8; 4] {
    let [b, g, r, a] = word.to_le_bytes();
    [r, g, b, a]
}

pub const OPAQUE_RED: u32 = 0xFF_FF_00_00;
pub const OPAQUE_GREEN: u32 = 0xFF_00_FF_00;
pub const OPAQUE_BLUE: u32 = 0xFF_00_00_FF;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tight_layout_has_no_padding() {
        let l = PixelLayout::tight(3, 2).unwrap();
        assert_eq!(l.row_pitch(), 12);
        assert_eq!(l.byte_len(), 24);
        assert!(l.is_tight());
    }

    #[test]
    fn aligned_layout_pads_rows_for_copies() {
        let l = PixelLayout::aligned(3, 2).unwrap();
        assert_eq!(l.row_pitch(), 256);
        assert_eq!(l.pitch_pixels(), 64);
        assert_eq!(l.byte_len(), 512);
        assert!(!l.is_tight());

        let full_hd = PixelLayout::aligned(DEFAULT_WIDTH, DEFAULT_HEIGHT).unwrap();
        assert_eq!(full_hd.row_pitch(), DEFAULT_WIDTH * 4);
        assert!(full_hd.is_tight());
    }

    #[test]
    fn rejects_degenerate_layouts() {
        assert!(PixelLayout::tight(0, 10).is_err());
        assert!(PixelLayout::tight(10, 0).is_err());
        assert!(PixelLayout::with_pitch(10, 10, 39).is_err());
        assert!(PixelLayout::with_pitch(10, 10, 42).is_err());
        assert!(PixelLayout::tight(u32::MAX, 1).is_err());
    }

    #[test]
    fn texel_offset_honours_pitch() {
        let l = PixelLayout::with_pitch(4, 4, 32).unwrap();
        assert_eq!(l.texel_offset(0, 0), Some(0));
        assert_eq!(l.texel_offset(1, 2), Some(68));
        assert_eq!(l.texel_offset(4, 0), None);
        assert_eq!(l.texel_offset(0, 4), None);
    }

    #[test]
    fn bgra_packing_puts_blue_first_in_memory() {
        let w = pack_bgra(0x11, 0x22, 0x33, 0x44);
        assert_eq!(w.to_le_bytes(), [0x33, 0x22, 0x11, 0x44]);
        assert_eq!(unpack_bgra(w), [0x11, 0x22, 0x33, 0x44]);
        assert_eq!(unpack_bgra(OPAQUE_RED), [255, 0, 0, 255]);
        assert_eq!(unpack_bgra(OPAQUE_GREEN), [0, 255, 0, 255]);
        assert_eq!(unpack_bgra(OPAQUE_BLUE), [0, 0, 255, 255]);
    }
}

//! Video frame conversion.
//!
//! The plugin hands over frames in one of three packed layouts; the host keeps a
//! single canonical RGBA8888 buffer (red first byte, alpha forced opaque) sized to
//! the display geometry announced through AV info.
//!
//! Notes:
//! - Rows advance by `pitch` bytes; exactly `width` pixels are read per row.
//! - When frame and display dimensions differ the frame is resampled with
//!   nearest-neighbour index mapping.
//! - Plugins that declare XRGB8888 but deliver rows the size of 16-bit pixels are
//!   switched to RGB565 once, and stay switched for the rest of the session.

use crate::abi::pixel_format;
use crate::runtime::RuntimeError;

/// Source pixel layouts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PixelFormat {
    /// 15-bit, top bit unused: red 10-14, green 5-9, blue 0-4.
    Xrgb1555,
    /// 32-bit, top byte padding: red 16-23, green 8-15, blue 0-7.
    Xrgb8888,
    /// 16-bit: red 11-15, green 5-10, blue 0-4.
    Rgb565,
}

impl PixelFormat {
    /// Map a SET_PIXEL_FORMAT code. The non-standard alias carries the RGB565 layout.
    pub fn from_raw(code: u32) -> Option<Self> {
        match code {
            pixel_format::XRGB1555 => Some(PixelFormat::Xrgb1555),
            pixel_format::XRGB8888 => Some(PixelFormat::Xrgb8888),
            pixel_format::RGB565 | pixel_format::RGB565_ALIAS => Some(PixelFormat::Rgb565),
            _ => None,
        }
    }

    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Xrgb8888 => 4,
            PixelFormat::Xrgb1555 | PixelFormat::Rgb565 => 2,
        }
    }

    /// Decode one source pixel (native byte order) into 8-bit RGB.
    #[inline]
    fn decode(self, px: &[u8]) -> [u8; 3] {
        match self {
            PixelFormat::Xrgb1555 => {
                let p = u16::from_ne_bytes([px[0], px[1]]);
                [
                    expand5((p >> 10) & 0x1F),
                    expand5((p >> 5) & 0x1F),
                    expand5(p & 0x1F),
                ]
            }
            PixelFormat::Rgb565 => {
                let p = u16::from_ne_bytes([px[0], px[1]]);
                [
                    expand5((p >> 11) & 0x1F),
                    expand6((p >> 5) & 0x3F),
                    expand5(p & 0x1F),
                ]
            }
            PixelFormat::Xrgb8888 => {
                let p = u32::from_ne_bytes([px[0], px[1], px[2], px[3]]);
                [(p >> 16) as u8, (p >> 8) as u8, p as u8]
            }
        }
    }
}

#[inline]
fn expand5(v: u16) -> u8 {
    ((v << 3) | (v >> 2)) as u8
}

#[inline]
fn expand6(v: u16) -> u8 {
    ((v << 2) | (v >> 4)) as u8
}

/// Pixel format negotiation state for one session.
#[derive(Clone, Debug)]
pub struct VideoFormat {
    /// Format the plugin declared (or the default).
    pub declared: PixelFormat,
    /// Numeric code exactly as the plugin sent it, kept for diagnostics.
    pub raw_code: u32,
    /// Set once a declared XRGB8888 stream turned out to be 16-bit.
    pub corrected: bool,
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self {
            declared: PixelFormat::Xrgb8888,
            raw_code: pixel_format::XRGB8888,
            corrected: false,
        }
    }
}

impl VideoFormat {
    /// Apply a SET_PIXEL_FORMAT request. Unknown codes leave the current format alone.
    pub fn set_raw(&mut self, code: u32) -> Result<PixelFormat, RuntimeError> {
        let format = PixelFormat::from_raw(code).ok_or(RuntimeError::PixelFormatUnsupported(code))?;
        self.declared = format;
        self.raw_code = code;
        Ok(format)
    }

    /// Format frames are actually decoded with.
    pub fn effective(&self) -> PixelFormat {
        match (self.declared, self.corrected) {
            (PixelFormat::Xrgb8888, true) => PixelFormat::Rgb565,
            (declared, _) => declared,
        }
    }

    /// Decide the format for an incoming frame. A declared XRGB8888 stream whose
    /// stride only fits 16-bit pixels resolves to RGB565; nothing is latched until
    /// [`VideoFormat::commit`] sees the frame accepted.
    pub fn resolve(
        &self,
        width: u32,
        height: u32,
        pitch: usize,
    ) -> Result<PixelFormat, RuntimeError> {
        let format = self.effective();
        if format != PixelFormat::Xrgb8888 {
            return Ok(format);
        }
        let invalid = RuntimeError::GeometryInvalid {
            width,
            height,
            pitch,
        };
        let w = width as usize;
        let (Some(wide), Some(narrow)) = (w.checked_mul(4), w.checked_mul(2)) else {
            return Err(invalid);
        };
        if pitch >= wide {
            Ok(PixelFormat::Xrgb8888)
        } else if pitch >= narrow && pitch - narrow < wide - pitch {
            Ok(PixelFormat::Rgb565)
        } else {
            Err(invalid)
        }
    }

    /// Record the format a validated frame was decoded with. The 16-bit
    /// correction is latched here, once, for the rest of the session.
    pub fn commit(&mut self, used: PixelFormat) {
        let switched = self.declared == PixelFormat::Xrgb8888 && used == PixelFormat::Rgb565;
        if switched && !self.corrected {
            tracing::warn!("stride matches 16-bit pixels; decoding declared XRGB8888 as RGB565");
            self.corrected = true;
        }
    }
}

/// Canonical RGBA8888 frame. `pixels.len() == width * height * 4` always.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; byte_len(width, height)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGBA of one pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }

    /// Change geometry. Storage is only reallocated when the byte size changes.
    fn reshape(&mut self, width: u32, height: u32) {
        let len = byte_len(width, height);
        if len != self.pixels.len() {
            self.pixels = vec![0; len];
        }
        self.width = width;
        self.height = height;
    }
}

fn byte_len(width: u32, height: u32) -> usize {
    (width as usize) * (height as usize) * 4
}

/// A frame as delivered by the plugin, bounds-checked against its declared shape.
#[derive(Clone, Copy, Debug)]
pub struct RawFrame<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    pitch: usize,
    format: PixelFormat,
}

impl<'a> RawFrame<'a> {
    /// Bytes a frame of this shape spans. The last row need not be padded.
    /// `None` when the shape does not fit in the address space.
    pub fn required_len(
        width: u32,
        height: u32,
        pitch: usize,
        format: PixelFormat,
    ) -> Option<usize> {
        if width == 0 || height == 0 {
            return Some(0);
        }
        let row = (width as usize).checked_mul(format.bytes_per_pixel())?;
        pitch.checked_mul(height as usize - 1)?.checked_add(row)
    }

    pub fn new(
        data: &'a [u8],
        width: u32,
        height: u32,
        pitch: usize,
        format: PixelFormat,
    ) -> Result<Self, RuntimeError> {
        let invalid = RuntimeError::GeometryInvalid {
            width,
            height,
            pitch,
        };
        if width == 0 || height == 0 {
            return Err(invalid);
        }
        let row = (width as usize).saturating_mul(format.bytes_per_pixel());
        match Self::required_len(width, height, pitch, format) {
            Some(len) if pitch >= row && data.len() >= len => Ok(Self {
                data,
                width,
                height,
                pitch,
                format,
            }),
            _ => Err(invalid),
        }
    }

    /// Build a frame view over plugin memory.
    ///
    /// # Safety
    /// `ptr` must be valid for reads of `RawFrame::required_len(..)` bytes for the
    /// lifetime `'a`.
    pub unsafe fn from_ptr(
        ptr: *const u8,
        width: u32,
        height: u32,
        pitch: usize,
        format: PixelFormat,
    ) -> Result<Self, RuntimeError> {
        let len = match Self::required_len(width, height, pitch, format) {
            Some(len) if !ptr.is_null() && len <= isize::MAX as usize => len,
            _ => {
                return Err(RuntimeError::GeometryInvalid {
                    width,
                    height,
                    pitch,
                });
            }
        };
        // SAFETY: caller guarantees `len` readable bytes at `ptr`.
        let data = unsafe { std::slice::from_raw_parts(ptr, len) };
        Self::new(data, width, height, pitch, format)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let bpp = self.format.bytes_per_pixel();
        let at = y * self.pitch + x * bpp;
        self.format.decode(&self.data[at..at + bpp])
    }
}

/// Size `target` to a new display geometry ahead of the next frame.
pub fn resize_target(target: &mut Option<FrameBuffer>, width: u32, height: u32) {
    match target {
        Some(fb) => fb.reshape(width, height),
        None => *target = Some(FrameBuffer::new(width, height)),
    }
}

/// Convert `frame` into `target`, sized to `display` (`(0, 0)` adopts the frame size).
pub fn convert(frame: &RawFrame<'_>, display: (u32, u32), target: &mut Option<FrameBuffer>) {
    let (dw, dh) = match display {
        (0, _) | (_, 0) => (frame.width, frame.height),
        dims => dims,
    };

    let fb = target.get_or_insert_with(|| FrameBuffer::new(dw, dh));
    if fb.width != dw || fb.height != dh {
        tracing::debug!(
            from = ?(fb.width, fb.height),
            to = ?(dw, dh),
            "canonical frame buffer reshaped"
        );
        fb.reshape(dw, dh);
    }

    let (fw, fh) = (frame.width as usize, frame.height as usize);
    let (dw, dh) = (dw as usize, dh as usize);

    if (fw, fh) == (dw, dh) {
        for (y, row) in fb.pixels.chunks_exact_mut(dw * 4).enumerate() {
            for (x, out) in row.chunks_exact_mut(4).enumerate() {
                let [r, g, b] = frame.pixel(x, y);
                out.copy_from_slice(&[r, g, b, 0xFF]);
            }
        }
        return;
    }

    for (dy, row) in fb.pixels.chunks_exact_mut(dw * 4).enumerate() {
        let sy = dy * fh / dh;
        for (dx, out) in row.chunks_exact_mut(4).enumerate() {
            let sx = dx * fw / dw;
            let [r, g, b] = frame.pixel(sx, sy);
            out.copy_from_slice(&[r, g, b, 0xFF]);
        }
    }
}

//! Host-owned pixel grids and their text rendering
//!
//! The guest renders into a row-major grid of 4-byte pixels `(r, g, b, c)`
//! where `c` is one byte of the UTF-8 glyph stream. A glyph may span several
//! neighbouring pixels, so text is decoded per row rather than per pixel.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io;

use crate::error::{HostError, HostResult};

const PIXEL_SIZE: u32 = 4;

/// Byte length of a `width × height` grid, if it fits in 32-bit guest memory.
pub fn pixel_byte_len(width: u32, height: u32) -> HostResult<u32> {
    width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(PIXEL_SIZE))
        .filter(|&n| n <= i32::MAX as u32)
        .ok_or(HostError::InvalidDimensions { width, height })
}

/// Guest colour modes selectable at render time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Palette {
    SingleColor,
    Ansi16,
    #[default]
    Ansi256,
    TrueColor,
}

/// Raw palette id passed to the guest rasterizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaletteId(pub u32);

impl From<Palette> for PaletteId {
    fn from(palette: Palette) -> Self {
        PaletteId(match palette {
            Palette::SingleColor => 0,
            Palette::Ansi16 => 1,
            Palette::Ansi256 => 2,
            Palette::TrueColor => 3,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RgbPixel {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// One byte of the glyph stream
    pub c: u8,
}

impl RgbPixel {
    fn from_bytes([r, g, b, c]: [u8; 4]) -> Self {
        Self { r, g, b, c }
    }
}

/// A decoded pixel grid owned by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<RgbPixel>,
}

impl PixelBuffer {
    /// Reinterpret `width * height * 4` wire bytes as a row-major grid.
    pub fn from_bytes(width: u32, height: u32, bytes: Vec<u8>) -> HostResult<Self> {
        let len = pixel_byte_len(width, height)?;
        if bytes.len() != len as usize {
            return Err(HostError::AllocationMismatch {
                ptr: 0,
                expected: len,
                actual: u32::try_from(bytes.len()).unwrap_or(u32::MAX),
            });
        }

        let pixels = bytes
            .chunks_exact(PIXEL_SIZE as usize)
            .map(|chunk| RgbPixel::from_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<RgbPixel> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Pixel rows, top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &[RgbPixel]> {
        // chunks_exact panics on 0; an empty-width grid has no pixels anyway.
        let width = (self.width as usize).max(1);
        self.pixels
            .chunks_exact(width)
            .chain(std::iter::repeat_n(&[][..], self.empty_rows()))
    }

    fn empty_rows(&self) -> usize {
        if self.width == 0 {
            self.height as usize
        } else {
            0
        }
    }

    /// Decode each row's glyph bytes as UTF-8, lazily, top to bottom.
    pub fn text_rows(&self) -> impl Iterator<Item = HostResult<String>> + '_ {
        self.rows().enumerate().map(|(row, pixels)| {
            let bytes: Vec<u8> = pixels.iter().map(|p| p.c).collect();
            String::from_utf8(bytes).map_err(|e| HostError::encoding(Some(row), e.utf8_error()))
        })
    }

    /// Every row followed by a newline.
    pub fn to_text(&self) -> HostResult<String> {
        let mut out = String::new();
        for row in self.text_rows() {
            out.push_str(&row?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Stream rows to `sink` as they are decoded.
    ///
    /// Rows before an undecodable one have already been written when the
    /// error is returned.
    pub fn draw<W: io::Write>(&self, sink: &mut W) -> HostResult<()> {
        for row in self.text_rows() {
            writeln!(sink, "{}", row?)?;
        }
        sink.flush()?;
        Ok(())
    }

    /// Text with a 24-bit ANSI foreground colour per glyph.
    ///
    /// Continuation bytes of a multi-byte glyph take the colour of the pixel
    /// holding the glyph's first byte.
    pub fn to_ansi_text(&self) -> HostResult<String> {
        let mut out = String::new();
        for (row, pixels) in self.rows().enumerate() {
            let bytes: Vec<u8> = pixels.iter().map(|p| p.c).collect();
            let text = std::str::from_utf8(&bytes)
                .map_err(|e| HostError::encoding(Some(row), e))?;

            for (offset, glyph) in text.char_indices() {
                let p = pixels[offset];
                let _ = write!(out, "\x1b[38;2;{};{};{}m{}", p.r, p.g, p.b, glyph);
            }
            out.push_str("\x1b[0m\n");
        }
        Ok(out)
    }
}

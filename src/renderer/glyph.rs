//! Marker glyph layout and rasterization
//!
//! Layout at scale 1 (pixels):
//!
//! ```text
//!  0       8                24
//!  +---+---+----------------+ 0
//!  | D | L |  border ring   |
//!  +---+---+  +--+--+--+    |
//!  | L | D |  |c0|c1|c2|    |
//!  +---+---+  +--+--+--+    | 8
//!          |  |c3|c4|c5|    |
//!          |  +--+--+--+    |
//!          |  |c6|c7|c8|    |
//!          |  +--+--+--+    |
//!          +----------------+ 16
//! ```

use anyhow::{Context, Result};

use crate::constants::glyph::*;
use crate::constants::palette;
use crate::encoder::VisualCode;

/// One solid rectangle of the glyph, palette-colored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphPart {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub color: usize,
}

/// Rendered glyph as RGBA8 rows
pub struct RgbaBitmap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Glyph {
    code: VisualCode,
}

impl Glyph {
    pub fn new(code: VisualCode) -> Self {
        Self { code }
    }

    pub fn code(&self) -> VisualCode {
        self.code
    }

    pub fn width(&self) -> u32 {
        WIDTH
    }

    pub fn height(&self) -> u32 {
        HEIGHT
    }

    /// The four anchor cells, dark on the main diagonal
    pub fn anchor_parts(&self) -> [GlyphPart; 4] {
        let cell = |col: u32, row: u32| GlyphPart {
            x: col * ANCHOR_CELL,
            y: row * ANCHOR_CELL,
            width: ANCHOR_CELL,
            height: ANCHOR_CELL,
            color: if (col + row) % 2 == 0 {
                palette::ANCHOR_DARK
            } else {
                palette::ANCHOR_LIGHT
            },
        };
        [cell(0, 0), cell(1, 0), cell(0, 1), cell(1, 1)]
    }

    /// Outer box of the code block; its ring is `BORDER` wide
    pub fn border_part(&self) -> GlyphPart {
        GlyphPart {
            x: ANCHOR_CELL * 2,
            y: 0,
            width: CODE_BLOCK,
            height: CODE_BLOCK,
            color: self.code.border_code as usize,
        }
    }

    /// The nine code cells in row-major order
    pub fn cell_parts(&self) -> [GlyphPart; CELL_COUNT] {
        let origin_x = ANCHOR_CELL * 2 + BORDER;
        std::array::from_fn(|i| GlyphPart {
            x: origin_x + (i as u32 % 3) * CELL,
            y: BORDER + (i as u32 / 3) * CELL,
            width: CELL,
            height: CELL,
            color: self.code.cell_codes[i] as usize,
        })
    }

    /// Palette index at a scale-1 pixel, `None` where the glyph is transparent
    pub fn pixel(&self, x: u32, y: u32) -> Option<usize> {
        if x >= WIDTH || y >= HEIGHT {
            return None;
        }
        let anchor_side = ANCHOR_CELL * 2;
        if x < anchor_side {
            return (y < anchor_side).then(|| {
                if (x / ANCHOR_CELL + y / ANCHOR_CELL) % 2 == 0 {
                    palette::ANCHOR_DARK
                } else {
                    palette::ANCHOR_LIGHT
                }
            });
        }
        let bx = x - anchor_side;
        let inner = BORDER..CODE_BLOCK - BORDER;
        if !inner.contains(&bx) || !inner.contains(&y) {
            return Some(self.code.border_code as usize);
        }
        let col = (bx - BORDER) / CELL;
        let row = (y - BORDER) / CELL;
        Some(self.code.cell_codes[(row * 3 + col) as usize] as usize)
    }

    /// RGBA bitmap with every glyph pixel blown up to `scale`x`scale`,
    /// `scale` clamped to `1..=MAX_SCALE`
    pub fn rasterize(&self, scale: u32) -> RgbaBitmap {
        let scale = scale.clamp(1, MAX_SCALE);
        let width = WIDTH * scale;
        let height = HEIGHT * scale;
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                match self.pixel(x / scale, y / scale) {
                    Some(index) => {
                        let [r, g, b] = palette::RGB[index];
                        data.extend_from_slice(&[r, g, b, 0xFF]);
                    }
                    None => data.extend_from_slice(&[0, 0, 0, 0]),
                }
            }
        }
        RgbaBitmap { width, height, data }
    }

    pub fn to_png(&self, scale: u32) -> Result<Vec<u8>> {
        let bitmap = self.rasterize(scale);
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, bitmap.width, bitmap.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder
                .write_header()
                .context("Failed to write PNG header")?;
            writer
                .write_image_data(&bitmap.data)
                .context("Failed to write PNG image data")?;
            writer.finish().context("Failed to finish PNG stream")?;
        }
        Ok(out)
    }
}

/// `#rrggbb` of a palette index
pub fn hex_color(index: usize) -> String {
    let [r, g, b] = palette::RGB[index % palette::RGB.len()];
    format!("#{r:02x}{g:02x}{b:02x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph() -> Glyph {
        Glyph::new(VisualCode {
            border_code: 2,
            cell_codes: [0, 1, 2, 3, 4, 5, 6, 7, 0],
        })
    }

    #[test]
    fn test_anchor_alternates() {
        let g = glyph();
        assert_eq!(g.pixel(0, 0), Some(palette::ANCHOR_DARK));
        assert_eq!(g.pixel(ANCHOR_CELL, 0), Some(palette::ANCHOR_LIGHT));
        assert_eq!(g.pixel(0, ANCHOR_CELL), Some(palette::ANCHOR_LIGHT));
        assert_eq!(g.pixel(ANCHOR_CELL, ANCHOR_CELL), Some(palette::ANCHOR_DARK));
        assert_eq!(g.pixel(0, ANCHOR_CELL * 2), None);
    }

    #[test]
    fn test_border_ring_and_cells() {
        let g = glyph();
        let left = ANCHOR_CELL * 2;
        assert_eq!(g.pixel(left, 0), Some(2));
        assert_eq!(g.pixel(WIDTH - 1, HEIGHT - 1), Some(2));
        assert_eq!(g.pixel(left + BORDER, BORDER), Some(0));
        assert_eq!(g.pixel(left + BORDER + CELL, BORDER), Some(1));
        assert_eq!(g.pixel(left + BORDER + 2 * CELL, BORDER + 2 * CELL), Some(0));
        assert_eq!(g.pixel(left + BORDER + CELL, BORDER + 2 * CELL), Some(7));
    }

    #[test]
    fn test_parts_agree_with_pixels() {
        let g = glyph();
        for part in g.anchor_parts().iter().chain(g.cell_parts().iter()) {
            assert_eq!(g.pixel(part.x, part.y), Some(part.color));
            assert_eq!(g.pixel(part.x + part.width - 1, part.y + part.height - 1), Some(part.color));
        }
    }

    #[test]
    fn test_rasterize_scales() {
        let bitmap = glyph().rasterize(3);
        assert_eq!(bitmap.width, WIDTH * 3);
        assert_eq!(bitmap.height, HEIGHT * 3);
        assert_eq!(bitmap.data.len(), (WIDTH * 3 * HEIGHT * 3 * 4) as usize);
        // top-left anchor pixel is opaque black
        assert_eq!(&bitmap.data[..4], &[0, 0, 0, 0xFF]);
    }

    #[test]
    fn test_rasterize_clamps_scale() {
        let bitmap = glyph().rasterize(u32::MAX);
        assert_eq!(bitmap.width, WIDTH * MAX_SCALE);
        assert_eq!(bitmap.data.len(), (WIDTH * MAX_SCALE) as usize * (HEIGHT * MAX_SCALE) as usize * 4);
        assert_eq!(glyph().rasterize(0).width, WIDTH);
    }

    #[test]
    fn test_png_signature() {
        let bytes = glyph().to_png(2).unwrap();
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }

    #[test]
    fn test_hex_color() {
        assert_eq!(hex_color(0), "#000000");
        assert_eq!(hex_color(7), "#00ffff");
    }
}

//! Velocity overlay rasterizer (C4, spec §4.4): formats the current XY
//! speed as an integer string and rasterizes it onto the emit frame with
//! tabular-numeral spacing so the digit count changing doesn't shift the
//! rest of the string horizontally.

use svr_shared::error::MovieStartError;
use svr_shared::profile::VelocityOverlay;

/// A resolved font, looked up once at movie start (spec §4.4: "The font is
/// resolved once at movie start from `(family, weight, stretch, style)`;
/// failure to find the combination is fatal to movie start").
pub struct ResolvedFont {
    font: fontdue::Font,
    size_px: f32,
    /// Advance width of the reference digit glyph ('0'), substituted for
    /// every digit's own advance width so numeric strings don't jitter
    /// horizontally as their digit count or shapes change.
    tabular_advance: f32,
}

impl ResolvedFont {
    /// Loads `bytes` as a font and resolves it against the family/weight/
    /// stretch/style tuple from the profile. Real font *matching* (picking
    /// the right file among an installed family) is host-platform glue the
    /// spec keeps out of scope (§1); this takes the already-selected font's
    /// bytes and validates it parses and has the glyphs we need.
    pub fn resolve(bytes: &[u8], overlay: &VelocityOverlay) -> Result<Self, MovieStartError> {
        let settings = fontdue::FontSettings { collection_index: 0, scale: overlay.font_size, ..Default::default() };
        let font = fontdue::Font::from_bytes(bytes, settings).map_err(|_| MovieStartError::FontNotFound {
            family: overlay.font_family.clone(),
            weight: overlay.font_weight,
            stretch: overlay.font_stretch,
            style: overlay.font_style.clone(),
        })?;

        let (metrics, _) = font.rasterize('0', overlay.font_size);
        Ok(Self { font, size_px: overlay.font_size, tabular_advance: metrics.advance_width })
    }

    fn rasterize_digit(&self, ch: char) -> (fontdue::Metrics, Vec<u8>) {
        self.font.rasterize(ch, self.size_px)
    }
}

/// An 8-bit coverage glyph plus the pen offset it should be drawn at,
/// already adjusted for tabular-numeral spacing.
pub struct PlacedGlyph {
    pub pen_x: f32,
    pub pen_y: f32,
    pub width: usize,
    pub height: usize,
    pub coverage: Vec<u8>,
}

/// Lays out `text` left-to-right starting at `(origin_x, origin_y)`, using
/// `font.tabular_advance` as every glyph's advance instead of its natural
/// metric (spec §4.4: "tabular numerals" emulation).
pub fn layout_tabular(font: &ResolvedFont, text: &str, origin_x: f32, origin_y: f32) -> Vec<PlacedGlyph> {
    let mut pen_x = origin_x;
    let mut glyphs = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let (metrics, coverage) = font.rasterize_digit(ch);
        glyphs.push(PlacedGlyph {
            pen_x: pen_x + metrics.xmin as f32,
            pen_y: origin_y - metrics.ymin as f32,
            width: metrics.width,
            height: metrics.height,
            coverage,
        });
        pen_x += font.tabular_advance;
    }
    glyphs
}

/// Computes the current speed from a 2D velocity as the rounded magnitude
/// (spec §4.4: `round(sqrt(vx² + vy²))`). Only X/Y feed the overlay even
/// though `give_velocity` takes a Z component (spec §6) — Z is accepted for
/// the host's own bookkeeping but is not part of the displayed speed.
pub fn speed_text(vx: f32, vy: f32) -> String {
    let speed = (vx * vx + vy * vy).sqrt().round();
    format!("{}", speed as i64)
}

/// Resolves a percentage alignment relative to screen center into absolute
/// pixel coordinates (spec §4.4: "Positioning uses percentage alignment
/// relative to screen center").
pub fn align_to_screen_center(
    screen_width: u32,
    screen_height: u32,
    align_x_percent: f32,
    align_y_percent: f32,
    padding: f32,
) -> (f32, f32) {
    let cx = screen_width as f32 / 2.0;
    let cy = screen_height as f32 / 2.0;
    let x = cx + (align_x_percent / 100.0) * cx + padding.copysign(align_x_percent);
    let y = cy + (align_y_percent / 100.0) * cy + padding.copysign(align_y_percent);
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_text_rounds_magnitude() {
        assert_eq!(speed_text(3.0, 4.0), "5");
        assert_eq!(speed_text(0.0, 0.0), "0");
        assert_eq!(speed_text(1.0, 1.0), "1"); // sqrt(2) ≈ 1.41 -> rounds to 1
    }

    #[test]
    fn align_to_screen_center_is_centered_at_zero_percent() {
        let (x, y) = align_to_screen_center(1920, 1080, 0.0, 0.0, 0.0);
        assert_eq!((x, y), (960.0, 540.0));
    }

    #[test]
    fn align_to_screen_center_offsets_by_percent_of_half_extent() {
        let (x, _y) = align_to_screen_center(1920, 1080, 50.0, 0.0, 0.0);
        assert_eq!(x, 960.0 + 0.5 * 960.0);
    }
}

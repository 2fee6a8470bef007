//! Zone compositor: renders each zone's effect into a scratch buffer sized
//! to that zone, then blends it into the global buffer per the zone's
//! `blendMode`. Layout changes are validated atomically before being
//! accepted — a new layout is either wholly adopted or wholly rejected,
//! never partially applied.

use lightwave_proto::{BlendMode, ZoneLayout};

use crate::renderer::buffer::{LedBuffer, Rgb8};

/// Checks that no two zones' LED ranges overlap on either strip. Disjoint
/// ranges are required; cover-or-gap (a range belonging to no zone) is
/// explicitly allowed.
pub fn validate_layout(zones: &[ZoneLayout]) -> bool {
    for (i, a) in zones.iter().enumerate() {
        if a.s1_left_start > a.s1_left_end || a.s1_right_start > a.s1_right_end {
            return false;
        }
        for b in &zones[i + 1..] {
            if ranges_overlap(a.s1_left_start, a.s1_left_end, b.s1_left_start, b.s1_left_end)
                || ranges_overlap(a.s1_right_start, a.s1_right_end, b.s1_right_start, b.s1_right_end)
            {
                return false;
            }
        }
    }
    true
}

fn ranges_overlap(a_start: u16, a_end: u16, b_start: u16, b_end: u16) -> bool {
    a_start <= b_end && b_start <= a_end
}

/// Blends `src` onto `dst` in place, `len` pixels, per `mode`. `0..7`
/// encoding matches `BlendMode`'s discriminants exactly so it round-trips
/// with the wire `u8`.
pub fn blend_into(dst: &mut [Rgb8], src: &[Rgb8], mode: BlendMode) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d = blend_pixel(*d, *s, mode);
    }
}

fn blend_pixel(dst: Rgb8, src: Rgb8, mode: BlendMode) -> Rgb8 {
    match mode {
        BlendMode::Replace => src,
        BlendMode::Additive => Rgb8::new(
            dst.r.saturating_add(src.r),
            dst.g.saturating_add(src.g),
            dst.b.saturating_add(src.b),
        ),
        BlendMode::Screen => Rgb8::new(screen(dst.r, src.r), screen(dst.g, src.g), screen(dst.b, src.b)),
        BlendMode::Multiply => Rgb8::new(
            ((dst.r as u16 * src.r as u16) / 255) as u8,
            ((dst.g as u16 * src.g as u16) / 255) as u8,
            ((dst.b as u16 * src.b as u16) / 255) as u8,
        ),
        BlendMode::Max => Rgb8::new(dst.r.max(src.r), dst.g.max(src.g), dst.b.max(src.b)),
        BlendMode::Min => Rgb8::new(dst.r.min(src.r), dst.g.min(src.g), dst.b.min(src.b)),
        BlendMode::Alpha => {
            // Source alpha derived from its own luminance, a reasonable
            // stand-in in the absence of a dedicated alpha channel.
            let a = (src.r as u32 + src.g as u32 + src.b as u32) / 3;
            Rgb8::new(
                lerp(dst.r, src.r, a as u8),
                lerp(dst.g, src.g, a as u8),
                lerp(dst.b, src.b, a as u8),
            )
        }
        BlendMode::Subtract => Rgb8::new(
            dst.r.saturating_sub(src.r),
            dst.g.saturating_sub(src.g),
            dst.b.saturating_sub(src.b),
        ),
    }
}

fn screen(a: u8, b: u8) -> u8 {
    255 - (((255 - a as u16) * (255 - b as u16)) / 255) as u8
}

fn lerp(a: u8, b: u8, t: u8) -> u8 {
    let t = t as u32;
    (((a as u32 * (255 - t)) + (b as u32 * t)) / 255) as u8
}

/// Owns the validated zone layout and performs per-zone rendering and
/// compositing into the caller's global `LedBuffer`. Effects run on
/// scratch buffers sized to each zone so they can only write within their
/// own range even before blending occurs.
pub struct ZoneCompositor {
    layout: Vec<ZoneLayout>,
}

impl Default for ZoneCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneCompositor {
    pub fn new() -> Self {
        Self { layout: Vec::new() }
    }

    /// Atomically replaces the layout: rejects wholesale on any invalid
    /// zone rather than adopting a partially-valid set.
    pub fn set_layout(&mut self, zones: Vec<ZoneLayout>) -> bool {
        if !validate_layout(&zones) {
            return false;
        }
        self.layout = zones;
        true
    }

    pub fn layout(&self) -> &[ZoneLayout] {
        &self.layout
    }

    /// Composites one zone's already-rendered scratch buffer (sized to that
    /// zone's `s1_left` range, mirrored onto `s1_right`) into `global`.
    pub fn composite_zone(&self, global: &mut LedBuffer, zone_id: u8, scratch: &[Rgb8], mode: BlendMode) {
        let Some(zone) = self.layout.iter().find(|z| z.zone_id == zone_id) else { return };
        let left_len = (zone.s1_left_end - zone.s1_left_start + 1) as usize;
        if let Some(mut view) = global.sub_view(zone.s1_left_start as usize, left_len.min(scratch.len())) {
            let dst = view.as_mut_slice();
            blend_into(dst, &scratch[..dst.len()], mode);
        }
        let right_len = (zone.s1_right_end - zone.s1_right_start + 1) as usize;
        if let Some(mut view) = global.sub_view(zone.s1_right_start as usize, right_len.min(scratch.len())) {
            let dst = view.as_mut_slice();
            blend_into(dst, &scratch[..dst.len()], mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(id: u8, l0: u16, l1: u16, r0: u16, r1: u16) -> ZoneLayout {
        ZoneLayout { zone_id: id, s1_left_start: l0, s1_left_end: l1, s1_right_start: r0, s1_right_end: r1, total_leds: (l1 - l0 + 1) + (r1 - r0 + 1) }
    }

    #[test]
    fn disjoint_layout_validates() {
        let zones = vec![zone(0, 0, 39, 200, 239), zone(1, 40, 79, 240, 279)];
        assert!(validate_layout(&zones));
    }

    #[test]
    fn overlapping_layout_rejected() {
        let zones = vec![zone(0, 0, 39, 200, 239), zone(1, 30, 79, 240, 279)];
        assert!(!validate_layout(&zones));
    }

    #[test]
    fn additive_blend_saturates_not_wraps() {
        let dst = Rgb8::new(200, 0, 0);
        let src = Rgb8::new(100, 0, 0);
        assert_eq!(blend_pixel(dst, src, BlendMode::Additive), Rgb8::new(255, 0, 0));
    }

    #[test]
    fn replace_blend_overwrites() {
        let dst = Rgb8::new(10, 10, 10);
        let src = Rgb8::new(200, 0, 0);
        assert_eq!(blend_pixel(dst, src, BlendMode::Replace), src);
    }
}

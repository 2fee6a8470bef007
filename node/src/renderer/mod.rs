//! Wires the buffer, effect registry, zone compositor, transition engine
//! and fail-safe supervisor into one per-frame render call. Global and
//! per-zone parameter state is mutated by the scheduler just before each
//! frame; this module only ever reads it.

pub mod buffer;
pub mod effects;
pub mod safe_mode;
pub mod transition;
pub mod zones;

use std::collections::HashMap;

use lightwave_proto::{GlobalParams, ZoneSettings};
use rand::Rng;

use crate::audio::snapshot::AudioSnapshot;
use buffer::LedBuffer;
use effects::{EffectContext, EffectRegistry};
use transition::{Transition, TransitionType};
use zones::ZoneCompositor;

pub struct RendererState {
    pub global: GlobalParams,
    pub zone_settings: HashMap<u8, ZoneSettings>,
    registry: EffectRegistry,
    compositor: ZoneCompositor,
    transition: Option<Transition>,
    buffer: LedBuffer,
    elapsed_s: f32,
    active_effect_id: u8,
}

impl Default for RendererState {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererState {
    pub fn new() -> Self {
        Self {
            global: GlobalParams::default(),
            zone_settings: HashMap::new(),
            registry: EffectRegistry::with_defaults(),
            compositor: ZoneCompositor::new(),
            transition: None,
            buffer: LedBuffer::new(),
            elapsed_s: 0.0,
            active_effect_id: 0,
        }
    }

    pub fn set_zone_layout(&mut self, zones: Vec<lightwave_proto::ZoneLayout>) -> bool {
        self.compositor.set_layout(zones)
    }

    /// Call whenever the scheduler just landed a new global effect id, to
    /// cross-fade rather than cut directly.
    pub fn start_transition(&mut self, to_effect: u8, transition_type: TransitionType, duration_ms: u32, now_ms: u64) {
        let from_effect = self.active_effect_id;
        if from_effect == to_effect {
            return;
        }
        self.transition = Some(Transition::new(from_effect, to_effect, transition_type, duration_ms, now_ms));
    }

    pub fn start_random_transition(&mut self, to_effect: u8, now_ms: u64) {
        let kind = rand::thread_rng().gen_range(0..3u8);
        self.start_transition(to_effect, TransitionType::from_u8(kind), 800, now_ms);
    }

    /// Renders exactly one frame, applying fail-safe override, transition
    /// compositing and zone compositing as configured, and returns the
    /// finished buffer.
    pub fn render(
        &mut self,
        now_ms: u64,
        dt: f32,
        audio: &AudioSnapshot,
        forced_safe_mode: bool,
    ) -> &LedBuffer {
        self.elapsed_s += dt;
        self.buffer.clear();

        let target_effect = if forced_safe_mode { 0 } else { self.registry.validate(self.global.effect_id) };

        if forced_safe_mode {
            // A fault must be visible immediately: drop any in-flight
            // transition rather than let it finish rendering the effect
            // that may have caused the fault.
            self.transition = None;
        } else if let Some(transition) = &self.transition {
            if transition.is_complete(now_ms) {
                self.active_effect_id = transition.to_effect;
                self.transition = None;
            }
        }
        if !forced_safe_mode && target_effect != self.active_effect_id && self.transition.is_none() {
            self.start_transition(target_effect, TransitionType::Fade, 500, now_ms);
        }

        if let Some(transition) = self.transition.take() {
            let mut from_buf = LedBuffer::new();
            let mut to_buf = LedBuffer::new();
            self.render_effect_into(transition.from_effect, dt, audio, &mut from_buf);
            self.render_effect_into(transition.to_effect, dt, audio, &mut to_buf);
            transition.composite(now_ms, &from_buf.as_slice()[..], &to_buf.as_slice()[..], &mut self.buffer);
            if !transition.is_complete(now_ms) {
                self.transition = Some(transition);
            } else {
                self.active_effect_id = transition.to_effect;
            }
        } else {
            self.render_effect_into(target_effect, dt, audio, &mut self.buffer);
            self.active_effect_id = target_effect;
        }

        if !self.compositor.layout().is_empty() {
            self.composite_zones(dt, audio);
        }

        &self.buffer
    }

    fn render_effect_into(&mut self, effect_id: u8, dt: f32, audio: &AudioSnapshot, target: &mut LedBuffer) {
        let global = self.global;
        let ctx = EffectContext {
            effect_id,
            brightness: global.brightness,
            speed: global.speed,
            palette_id: global.palette_id,
            hue: global.hue,
            intensity: global.intensity,
            saturation: global.saturation,
            complexity: global.complexity,
            variation: global.variation,
            dt,
            elapsed_s: self.elapsed_s,
            audio,
        };
        let effect = self.registry.get_mut(effect_id);
        let mut view = target.full_view();
        effect.render(&ctx, &mut view);
    }

    fn composite_zones(&mut self, dt: f32, audio: &AudioSnapshot) {
        let layout = self.compositor.layout().to_vec();
        for zone in &layout {
            let settings = self.zone_settings.get(&zone.zone_id).copied().unwrap_or_default();
            let left_len = (zone.s1_left_end - zone.s1_left_start + 1) as usize;
            let mut scratch = LedBuffer::new();
            let ctx = EffectContext {
                effect_id: settings.effect_id,
                brightness: settings.brightness,
                speed: settings.speed,
                palette_id: settings.palette_id,
                hue: self.global.hue,
                intensity: self.global.intensity,
                saturation: self.global.saturation,
                complexity: self.global.complexity,
                variation: self.global.variation,
                dt,
                elapsed_s: self.elapsed_s,
                audio,
            };
            {
                let effect = self.registry.get_mut(settings.effect_id);
                if let Some(mut view) = scratch.sub_view(0, left_len.min(buffer::LED_COUNT)) {
                    effect.render(&ctx, &mut view);
                }
            }
            let blend_mode = lightwave_proto::BlendMode::from_u8(settings.blend_mode);
            self.compositor.composite_zone(&mut self.buffer, zone.zone_id, &scratch.as_slice()[..], blend_mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio() -> AudioSnapshot {
        AudioSnapshot::default()
    }

    #[test]
    fn render_never_panics_with_default_state() {
        let mut renderer = RendererState::new();
        let a = audio();
        let _ = renderer.render(0, 1.0 / 60.0, &a, false);
    }

    #[test]
    fn forced_safe_mode_renders_fallback_effect() {
        let mut renderer = RendererState::new();
        renderer.global.effect_id = 1;
        let a = audio();
        renderer.render(0, 1.0 / 60.0, &a, true);
        assert_eq!(renderer.active_effect_id, 0);
    }

    #[test]
    fn effect_change_starts_a_transition() {
        let mut renderer = RendererState::new();
        let a = audio();
        renderer.render(0, 1.0 / 60.0, &a, false);
        renderer.global.effect_id = 1;
        renderer.render(10, 1.0 / 60.0, &a, false);
        assert!(renderer.transition.is_some());
    }
}

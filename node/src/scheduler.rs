//! Converts command bursts into smoothly landed changes. Each incoming
//! change from the control client carries an `applyAt_us` target; the
//! scheduler holds pending edits keyed by parameter and applies any edit
//! whose `applyAt` is at or before the render loop's current time, then
//! discards it. An edit that arrives after its own `applyAt` is applied on
//! the very next render frame rather than dropped.

use lightwave_proto::ws::{ParametersSetFields, ZoneFields};
use lightwave_proto::{GlobalParams, ZoneSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKey {
    Effect,
    Brightness,
    Speed,
    Palette,
    Hue,
    Intensity,
    Saturation,
    Complexity,
    Variation,
    BlendMode,
}

struct PendingGlobalEdit {
    key: ParamKey,
    value: u8,
    apply_at_us: u64,
}

struct PendingZoneEdit {
    zone_id: u8,
    key: ParamKey,
    value: u8,
    apply_at_us: u64,
}

/// Holds the outstanding edits for global and per-zone parameters. Last
/// writer for a given `(zone, key)` wins: a fresh edit for the same key
/// simply replaces the pending one rather than queuing both.
#[derive(Default)]
pub struct ApplyScheduler {
    global: Vec<PendingGlobalEdit>,
    zones: Vec<PendingZoneEdit>,
}

impl ApplyScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_effect(&mut self, effect_id: u8, apply_at_us: u64) {
        self.push_global(ParamKey::Effect, effect_id, apply_at_us);
    }

    /// Enqueues whichever fields are present in `fields`, each under its own
    /// key so unrelated parameters never block each other.
    pub fn schedule_parameters(&mut self, fields: &ParametersSetFields, apply_at_us: u64) {
        if let Some(v) = fields.brightness {
            self.push_global(ParamKey::Brightness, v, apply_at_us);
        }
        if let Some(v) = fields.speed {
            self.push_global(ParamKey::Speed, v, apply_at_us);
        }
        if let Some(v) = fields.palette_id {
            self.push_global(ParamKey::Palette, v, apply_at_us);
        }
        if let Some(v) = fields.hue {
            self.push_global(ParamKey::Hue, v, apply_at_us);
        }
        if let Some(v) = fields.intensity {
            self.push_global(ParamKey::Intensity, v, apply_at_us);
        }
        if let Some(v) = fields.saturation {
            self.push_global(ParamKey::Saturation, v, apply_at_us);
        }
        if let Some(v) = fields.complexity {
            self.push_global(ParamKey::Complexity, v, apply_at_us);
        }
        if let Some(v) = fields.variation {
            self.push_global(ParamKey::Variation, v, apply_at_us);
        }
    }

    pub fn schedule_zone(&mut self, zone_id: u8, fields: &ZoneFields, apply_at_us: u64) {
        if let Some(v) = fields.effect_id {
            self.push_zone(zone_id, ParamKey::Effect, v, apply_at_us);
        }
        if let Some(v) = fields.brightness {
            self.push_zone(zone_id, ParamKey::Brightness, v, apply_at_us);
        }
        if let Some(v) = fields.speed {
            self.push_zone(zone_id, ParamKey::Speed, v, apply_at_us);
        }
        if let Some(v) = fields.palette_id {
            self.push_zone(zone_id, ParamKey::Palette, v, apply_at_us);
        }
        if let Some(v) = fields.blend_mode {
            self.push_zone(zone_id, ParamKey::BlendMode, v, apply_at_us);
        }
    }

    fn push_global(&mut self, key: ParamKey, value: u8, apply_at_us: u64) {
        self.global.retain(|e| e.key != key);
        self.global.push(PendingGlobalEdit { key, value, apply_at_us });
    }

    fn push_zone(&mut self, zone_id: u8, key: ParamKey, value: u8, apply_at_us: u64) {
        self.zones.retain(|e| !(e.zone_id == zone_id && e.key == key));
        self.zones.push(PendingZoneEdit { zone_id, key, value, apply_at_us });
    }

    /// Applies every due edit (an edit is due once `apply_at_us <= now_us`,
    /// including edits that arrived already late) into `global`, returning
    /// the set of keys that changed this frame.
    pub fn drain_due_global(&mut self, now_us: u64, global: &mut GlobalParams) -> Vec<ParamKey> {
        let mut applied = Vec::new();
        let mut i = 0;
        while i < self.global.len() {
            if self.global[i].apply_at_us <= now_us {
                let edit = self.global.remove(i);
                apply_global_field(global, edit.key, edit.value);
                applied.push(edit.key);
            } else {
                i += 1;
            }
        }
        applied
    }

    pub fn drain_due_zone(&mut self, now_us: u64, zone_id: u8, settings: &mut ZoneSettings) -> Vec<ParamKey> {
        let mut applied = Vec::new();
        let mut i = 0;
        while i < self.zones.len() {
            if self.zones[i].zone_id == zone_id && self.zones[i].apply_at_us <= now_us {
                let edit = self.zones.remove(i);
                apply_zone_field(settings, edit.key, edit.value);
                applied.push(edit.key);
            } else {
                i += 1;
            }
        }
        applied
    }

    pub fn pending_global_count(&self) -> usize {
        self.global.len()
    }
}

fn apply_global_field(global: &mut GlobalParams, key: ParamKey, value: u8) {
    match key {
        ParamKey::Effect => global.effect_id = value,
        ParamKey::Brightness => global.brightness = value,
        ParamKey::Speed => global.speed = value,
        ParamKey::Palette => global.palette_id = value,
        ParamKey::Hue => global.hue = value,
        ParamKey::Intensity => global.intensity = value,
        ParamKey::Saturation => global.saturation = value,
        ParamKey::Complexity => global.complexity = value,
        ParamKey::Variation => global.variation = value,
    }
}

fn apply_zone_field(settings: &mut ZoneSettings, key: ParamKey, value: u8) {
    match key {
        ParamKey::Effect => settings.effect_id = value,
        ParamKey::Brightness => settings.brightness = value,
        ParamKey::Speed => settings.speed = value,
        ParamKey::Palette => settings.palette_id = value,
        ParamKey::BlendMode => settings.blend_mode = value,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edits_due_in_the_past_apply_immediately() {
        let mut scheduler = ApplyScheduler::new();
        let mut global = GlobalParams::default();
        scheduler.schedule_parameters(
            &ParametersSetFields { brightness: Some(200), ..Default::default() },
            500,
        );
        let applied = scheduler.drain_due_global(1_000, &mut global);
        assert_eq!(applied, vec![ParamKey::Brightness]);
        assert_eq!(global.brightness, 200);
    }

    #[test]
    fn future_edits_stay_pending_until_due() {
        let mut scheduler = ApplyScheduler::new();
        let mut global = GlobalParams::default();
        scheduler.schedule_parameters(
            &ParametersSetFields { speed: Some(99), ..Default::default() },
            10_000,
        );
        assert!(scheduler.drain_due_global(1_000, &mut global).is_empty());
        assert_eq!(global.speed, 0);
        assert_eq!(scheduler.drain_due_global(10_000, &mut global), vec![ParamKey::Speed]);
        assert_eq!(global.speed, 99);
    }

    #[test]
    fn later_edit_for_same_key_replaces_the_pending_one() {
        let mut scheduler = ApplyScheduler::new();
        let mut global = GlobalParams::default();
        scheduler.schedule_parameters(
            &ParametersSetFields { brightness: Some(50), ..Default::default() },
            10_000,
        );
        scheduler.schedule_parameters(
            &ParametersSetFields { brightness: Some(90), ..Default::default() },
            10_000,
        );
        assert_eq!(scheduler.pending_global_count(), 1);
        scheduler.drain_due_global(10_000, &mut global);
        assert_eq!(global.brightness, 90);
    }
}

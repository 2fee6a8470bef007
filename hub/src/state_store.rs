//! Authoritative global + per-node-zone parameter state, with dirty-mask
//! tracking and the coalescer that turns accumulated dirty bits into the
//! minimal set of outbound WebSocket messages.
//!
//! Two concurrent mutation surfaces write into this store: physical
//! encoders on the main loop, and WebSocket admin requests from the async
//! network context. Both go through the same setters, which both write the
//! value and OR the corresponding bit into the dirty mask — the store
//! itself does not know or care which surface called it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

use lightwave_proto::{
    global_dirty_bits as g, zone_dirty_bits as z, BlendMode, GlobalParams, ZoneSettings,
};
use lightwave_proto::ws::{ParametersSetFields, ServerMessage, ZoneFields, ZoneSnapshotEntry};
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Upper bound on zones per node, matching the `ZoneMap` constraint.
pub const MAX_ZONES: u8 = 16;

struct ZoneEntry {
    settings: ZoneSettings,
    dirty: AtomicU8,
}

pub struct StateStore {
    global: RwLock<GlobalParams>,
    global_dirty: AtomicU16,
    zones: RwLock<HashMap<(u8, u8), ZoneEntry>>,
    zones_enabled: AtomicBool,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            global: RwLock::new(GlobalParams { brightness: 128, ..GlobalParams::default() }),
            global_dirty: AtomicU16::new(0),
            zones: RwLock::new(HashMap::new()),
            zones_enabled: AtomicBool::new(false),
        }
    }

    pub fn zones_enabled(&self) -> bool {
        self.zones_enabled.load(Ordering::Relaxed)
    }

    pub fn set_zones_enabled(&self, enabled: bool) {
        self.zones_enabled.store(enabled, Ordering::Relaxed);
    }

    pub async fn set_effect(&self, effect_id: u8) {
        self.global.write().await.effect_id = effect_id;
        self.global_dirty.fetch_or(g::EFFECT, Ordering::Relaxed);
    }

    pub async fn set_brightness(&self, v: u8) {
        self.global.write().await.brightness = v;
        self.global_dirty.fetch_or(g::BRIGHTNESS, Ordering::Relaxed);
    }

    pub async fn set_speed(&self, v: u8) {
        self.global.write().await.speed = v;
        self.global_dirty.fetch_or(g::SPEED, Ordering::Relaxed);
    }

    pub async fn set_palette(&self, v: u8) {
        self.global.write().await.palette_id = v;
        self.global_dirty.fetch_or(g::PALETTE, Ordering::Relaxed);
    }

    pub async fn set_hue(&self, v: u8) {
        self.global.write().await.hue = v;
        self.global_dirty.fetch_or(g::HUE, Ordering::Relaxed);
    }

    pub async fn set_intensity(&self, v: u8) {
        self.global.write().await.intensity = v;
        self.global_dirty.fetch_or(g::INTENSITY, Ordering::Relaxed);
    }

    pub async fn set_saturation(&self, v: u8) {
        self.global.write().await.saturation = v;
        self.global_dirty.fetch_or(g::SATURATION, Ordering::Relaxed);
    }

    pub async fn set_complexity(&self, v: u8) {
        self.global.write().await.complexity = v;
        self.global_dirty.fetch_or(g::COMPLEXITY, Ordering::Relaxed);
    }

    pub async fn set_variation(&self, v: u8) {
        self.global.write().await.variation = v;
        self.global_dirty.fetch_or(g::VARIATION, Ordering::Relaxed);
    }

    pub async fn global_snapshot(&self) -> GlobalParams {
        *self.global.read().await
    }

    fn check_zone(zone_id: u8) -> Result<(), StoreError> {
        if zone_id >= MAX_ZONES {
            return Err(StoreError::ZoneOutOfRange(zone_id));
        }
        Ok(())
    }

    pub async fn set_zone_effect(&self, node_id: u8, zone_id: u8, effect_id: u8) -> Result<(), StoreError> {
        Self::check_zone(zone_id)?;
        let mut zones = self.zones.write().await;
        let entry = zones.entry((node_id, zone_id)).or_insert_with(|| ZoneEntry {
            settings: ZoneSettings::default(),
            dirty: AtomicU8::new(0),
        });
        entry.settings.effect_id = effect_id;
        entry.dirty.fetch_or(z::EFFECT, Ordering::Relaxed);
        Ok(())
    }

    pub async fn set_zone_brightness(&self, node_id: u8, zone_id: u8, v: u8) -> Result<(), StoreError> {
        Self::check_zone(zone_id)?;
        let mut zones = self.zones.write().await;
        let entry = zones.entry((node_id, zone_id)).or_insert_with(|| ZoneEntry {
            settings: ZoneSettings::default(),
            dirty: AtomicU8::new(0),
        });
        entry.settings.brightness = v;
        entry.dirty.fetch_or(z::BRIGHTNESS, Ordering::Relaxed);
        Ok(())
    }

    pub async fn set_zone_speed(&self, node_id: u8, zone_id: u8, v: u8) -> Result<(), StoreError> {
        Self::check_zone(zone_id)?;
        let mut zones = self.zones.write().await;
        let entry = zones.entry((node_id, zone_id)).or_insert_with(|| ZoneEntry {
            settings: ZoneSettings::default(),
            dirty: AtomicU8::new(0),
        });
        entry.settings.speed = v;
        entry.dirty.fetch_or(z::SPEED, Ordering::Relaxed);
        Ok(())
    }

    pub async fn set_zone_palette(&self, node_id: u8, zone_id: u8, v: u8) -> Result<(), StoreError> {
        Self::check_zone(zone_id)?;
        let mut zones = self.zones.write().await;
        let entry = zones.entry((node_id, zone_id)).or_insert_with(|| ZoneEntry {
            settings: ZoneSettings::default(),
            dirty: AtomicU8::new(0),
        });
        entry.settings.palette_id = v;
        entry.dirty.fetch_or(z::PALETTE, Ordering::Relaxed);
        Ok(())
    }

    pub async fn set_zone_blend_mode(&self, node_id: u8, zone_id: u8, mode: BlendMode) -> Result<(), StoreError> {
        Self::check_zone(zone_id)?;
        let mut zones = self.zones.write().await;
        let entry = zones.entry((node_id, zone_id)).or_insert_with(|| ZoneEntry {
            settings: ZoneSettings::default(),
            dirty: AtomicU8::new(0),
        });
        entry.settings.blend_mode = mode as u8;
        entry.dirty.fetch_or(z::BLEND_MODE, Ordering::Relaxed);
        Ok(())
    }

    pub async fn zones_for_node(&self, node_id: u8) -> Vec<ZoneSnapshotEntry> {
        self.zones
            .read()
            .await
            .iter()
            .filter(|((nid, _), _)| *nid == node_id)
            .map(|((_, zone_id), entry)| ZoneSnapshotEntry {
                zone_id: *zone_id,
                effect_id: entry.settings.effect_id,
                brightness: entry.settings.brightness,
                speed: entry.settings.speed,
                palette_id: entry.settings.palette_id,
                blend_mode: entry.settings.blend_mode,
            })
            .collect()
    }

    /// Snapshots and clears both dirty masks, then builds at most one
    /// `effects.setCurrent`, at most one `parameters.set`, and at most one
    /// `zones.update` per dirty `(nodeId, zoneId)` pair. With no changes
    /// since the last call, returns an empty result — the coalescer must
    /// be silent when nothing moved.
    pub async fn coalesce(&self, apply_at_us: u64) -> CoalesceResult {
        let dirty = self.global_dirty.swap(0, Ordering::Relaxed);
        let global = *self.global.read().await;

        let mut result = CoalesceResult::default();

        if dirty & g::EFFECT != 0 {
            result.effects_set_current = Some(ServerMessage::EffectsSetCurrent {
                effect_id: global.effect_id,
                apply_at_us,
            });
        }

        let mut fields = ParametersSetFields::default();
        if dirty & g::BRIGHTNESS != 0 {
            fields.brightness = Some(global.brightness);
        }
        if dirty & g::SPEED != 0 {
            fields.speed = Some(global.speed);
        }
        if dirty & g::PALETTE != 0 {
            fields.palette_id = Some(global.palette_id);
        }
        if dirty & g::HUE != 0 {
            fields.hue = Some(global.hue);
        }
        if dirty & g::INTENSITY != 0 {
            fields.intensity = Some(global.intensity);
        }
        if dirty & g::SATURATION != 0 {
            fields.saturation = Some(global.saturation);
        }
        if dirty & g::COMPLEXITY != 0 {
            fields.complexity = Some(global.complexity);
        }
        if dirty & g::VARIATION != 0 {
            fields.variation = Some(global.variation);
        }
        if !fields.is_empty() {
            result.parameters_set = Some(ServerMessage::ParametersSet { apply_at_us, fields });
        }

        if !self.zones_enabled() {
            // Deltas were already accepted into zone state above so no value
            // is lost; we simply decline to broadcast them while disabled.
            let zones = self.zones.read().await;
            if zones.values().any(|e| e.dirty.load(Ordering::Relaxed) != 0) {
                tracing::warn!("zones dirty but zonesEnabled=false, suppressing zones.update");
            }
            for entry in self.zones.read().await.values() {
                entry.dirty.store(0, Ordering::Relaxed);
            }
            return result;
        }

        let zones = self.zones.read().await;
        for (&(node_id, zone_id), entry) in zones.iter() {
            let zdirty = entry.dirty.swap(0, Ordering::Relaxed);
            if zdirty == 0 {
                continue;
            }
            let mut zfields = ZoneFields::default();
            if zdirty & z::EFFECT != 0 {
                zfields.effect_id = Some(entry.settings.effect_id);
            }
            if zdirty & z::BRIGHTNESS != 0 {
                zfields.brightness = Some(entry.settings.brightness);
            }
            if zdirty & z::SPEED != 0 {
                zfields.speed = Some(entry.settings.speed);
            }
            if zdirty & z::PALETTE != 0 {
                zfields.palette_id = Some(entry.settings.palette_id);
            }
            if zdirty & z::BLEND_MODE != 0 {
                zfields.blend_mode = Some(entry.settings.blend_mode);
            }
            if !zfields.is_empty() {
                result.zone_updates.push((
                    node_id,
                    ServerMessage::ZonesUpdate { zone_id, apply_at_us, fields: zfields },
                ));
            }
        }

        result
    }
}

#[derive(Default)]
pub struct CoalesceResult {
    pub effects_set_current: Option<ServerMessage>,
    pub parameters_set: Option<ServerMessage>,
    /// `(nodeId, message)` — each zone update targets only the node that
    /// owns that zone.
    pub zone_updates: Vec<(u8, ServerMessage)>,
}

impl CoalesceResult {
    pub fn is_empty(&self) -> bool {
        self.effects_set_current.is_none() && self.parameters_set.is_none() && self.zone_updates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_changes_produce_no_messages() {
        let store = StateStore::new();
        let result = store.coalesce(1_000).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn five_brightness_setters_coalesce_to_one_message() {
        let store = StateStore::new();
        for v in [128u8, 140, 150, 165, 180] {
            store.set_brightness(v).await;
        }
        let result = store.coalesce(1_000).await;
        match result.parameters_set {
            Some(ServerMessage::ParametersSet { fields, .. }) => {
                assert_eq!(fields.brightness, Some(180));
                assert_eq!(fields.speed, None);
            }
            other => panic!("expected exactly one parameters.set, got {other:?}"),
        }
        // Second call with no new changes must be silent.
        assert!(store.coalesce(2_000).await.is_empty());
    }

    #[tokio::test]
    async fn zone_updates_are_not_cross_contaminated() {
        let store = StateStore::new();
        store.set_zone_brightness(1, 0, 200).await.unwrap();
        store.set_zone_speed(2, 0, 90).await.unwrap();
        store.set_zones_enabled(true);

        let result = store.coalesce(500).await;
        assert_eq!(result.zone_updates.len(), 2);
        for (node_id, msg) in &result.zone_updates {
            if let ServerMessage::ZonesUpdate { fields, .. } = msg {
                if *node_id == 1 {
                    assert_eq!(fields.brightness, Some(200));
                    assert_eq!(fields.speed, None);
                } else {
                    assert_eq!(fields.speed, Some(90));
                    assert_eq!(fields.brightness, None);
                }
            }
        }
    }

    #[tokio::test]
    async fn zone_deltas_while_disabled_are_accepted_but_not_broadcast() {
        let store = StateStore::new();
        store.set_zone_brightness(1, 0, 77).await.unwrap();
        let result = store.coalesce(10).await;
        assert!(result.zone_updates.is_empty());
        // Value itself was retained, not discarded.
        let zones = store.zones_for_node(1).await;
        assert_eq!(zones[0].brightness, 77);
    }

    #[tokio::test]
    async fn zone_id_out_of_range_rejected() {
        let store = StateStore::new();
        assert!(store.set_zone_effect(1, MAX_ZONES, 3).await.is_err());
    }
}

//! Cross-fade transition engine. A transition renders `from_effect` into a
//! source buffer and `to_effect` into a destination, composites by
//! `TransitionType`, and ends deterministically once `duration_ms` has
//! elapsed — after which the renderer selects only `to_effect`.

use crate::renderer::buffer::{LedBuffer, Rgb8};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionType {
    Fade,
    Wipe,
    EaseInOut,
}

impl TransitionType {
    /// Bounded size; any value outside the known discriminants falls back
    /// to `Fade` rather than panicking or being rejected.
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Wipe,
            2 => Self::EaseInOut,
            _ => Self::Fade,
        }
    }
}

pub struct Transition {
    pub from_effect: u8,
    pub to_effect: u8,
    pub transition_type: TransitionType,
    pub duration_ms: u32,
    pub started_at_ms: u64,
}

impl Transition {
    pub fn new(from_effect: u8, to_effect: u8, transition_type: TransitionType, duration_ms: u32, started_at_ms: u64) -> Self {
        Self { from_effect, to_effect, transition_type, duration_ms: duration_ms.max(1), started_at_ms }
    }

    /// `[0, 1]` progress through the transition at `now_ms`, clamped.
    pub fn progress(&self, now_ms: u64) -> f32 {
        let elapsed = now_ms.saturating_sub(self.started_at_ms) as f32;
        (elapsed / self.duration_ms as f32).clamp(0.0, 1.0)
    }

    pub fn is_complete(&self, now_ms: u64) -> bool {
        self.progress(now_ms) >= 1.0
    }

    /// Blends `from`/`to` scratch buffers into `out`, all three the same
    /// length, by this transition's type at the given progress.
    pub fn composite(&self, now_ms: u64, from: &[Rgb8], to: &[Rgb8], out: &mut LedBuffer) {
        let t = self.progress(now_ms);
        let weight = match self.transition_type {
            TransitionType::Fade => t,
            TransitionType::EaseInOut => t * t * (3.0 - 2.0 * t),
            TransitionType::Wipe => t, // per-pixel threshold applied below
        };
        let mut view = out.full_view();
        let len = view.len().min(from.len()).min(to.len());
        match self.transition_type {
            TransitionType::Wipe => {
                let cut = (weight * len as f32) as usize;
                for i in 0..len {
                    view.set(i, if i < cut { to[i] } else { from[i] });
                }
            }
            _ => {
                for i in 0..len {
                    view.set(i, lerp_rgb(from[i], to[i], weight));
                }
            }
        }
    }
}

fn lerp_rgb(a: Rgb8, b: Rgb8, t: f32) -> Rgb8 {
    let t = t.clamp(0.0, 1.0);
    Rgb8::new(lerp_u8(a.r, b.r, t), lerp_u8(a.g, b.g, t), lerp_u8(a.b, b.b, t))
}

fn lerp_u8(a: u8, b: u8, t: f32) -> u8 {
    (a as f32 + (b as f32 - a as f32) * t).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_type_falls_back_to_fade() {
        assert_eq!(TransitionType::from_u8(250), TransitionType::Fade);
    }

    #[test]
    fn halfway_fade_blends_roughly_evenly() {
        let t = Transition::new(0, 5, TransitionType::Fade, 1000, 0);
        assert!((t.progress(500) - 0.5).abs() < 0.05);
    }

    #[test]
    fn transition_completes_deterministically() {
        let t = Transition::new(0, 5, TransitionType::Fade, 1000, 0);
        assert!(!t.is_complete(999));
        assert!(t.is_complete(1000));
        assert!(t.is_complete(5000));
    }
}

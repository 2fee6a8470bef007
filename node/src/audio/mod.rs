//! Audio-reactive pipeline: I²S ring buffer -> feature extraction ->
//! control-bus smoothing -> `AudioSnapshot` assembly. Every raw feature
//! that reaches an effect has passed through `control_bus`'s smoothing
//! primitives first, per the audio-reactive rendering contracts in the
//! renderer core.

pub mod control_bus;
pub mod features;
pub mod snapshot;

use control_bus::{rate_independent_alpha, AsymmetricFollower, PhaseLock, SlewLimiter};
use features::{FeatureExtractor, RawFeatureFrame};
use snapshot::{AudioSnapshot, Chord, ChordType, MusicStyle, Saliencies};

const ONSET_THRESHOLD: f32 = 0.08;
const BEAT_MIN_INTERVAL_S: f32 = 0.2;

pub struct AudioPipeline {
    extractor: FeatureExtractor,
    rms_follower: AsymmetricFollower,
    fast_rms_follower: AsymmetricFollower,
    flux_follower: AsymmetricFollower,
    fast_flux_follower: AsymmetricFollower,
    heavy_bands: [AsymmetricFollower; 8],
    heavy_chroma: [AsymmetricFollower; 12],
    bpm_slew: SlewLimiter,
    phase: PhaseLock,
    last_beat_age_s: f32,
    hop_seq: u32,
    snapshot: AudioSnapshot,
}

impl AudioPipeline {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            extractor: FeatureExtractor::new(sample_rate),
            rms_follower: AsymmetricFollower::new(),
            fast_rms_follower: AsymmetricFollower::new(),
            flux_follower: AsymmetricFollower::new(),
            fast_flux_follower: AsymmetricFollower::new(),
            heavy_bands: [AsymmetricFollower::new(); 8],
            heavy_chroma: [AsymmetricFollower::new(); 12],
            bpm_slew: SlewLimiter::new(120.0),
            phase: PhaseLock::new(),
            last_beat_age_s: 1.0,
            hop_seq: 0,
            snapshot: AudioSnapshot::default(),
        }
    }

    pub fn push_samples(&mut self, samples: &[f32]) {
        self.extractor.push_samples(samples);
    }

    /// Drains any pending hops, folding each into the smoothed snapshot
    /// state, and returns a copy of the latest snapshot for the render
    /// frame currently in flight. Called once per render frame; a frame
    /// with no new hop simply gets the previous snapshot re-smoothed over
    /// `dt`, matching rule 1 (audio modulates amplitude/colour, time still
    /// advances phase even with no new hop).
    pub fn tick(&mut self, dt: f32) -> AudioSnapshot {
        while let Some(frame) = self.extractor.try_hop() {
            self.absorb_hop(&frame, dt);
        }

        self.last_beat_age_s += dt;
        let beat_phase =
            self.phase.advance(self.snapshot.bpm / 60.0 * std::f32::consts::TAU, self.snapshot.beat_phase, 1.5, dt);
        self.snapshot.beat_phase = control_bus::wrap_phase(beat_phase / std::f32::consts::TAU);
        self.snapshot
    }

    fn absorb_hop(&mut self, frame: &RawFeatureFrame, dt: f32) {
        self.hop_seq = self.hop_seq.wrapping_add(1);

        let alpha_fast = rate_independent_alpha(15.0, dt);
        let alpha_slow = rate_independent_alpha(3.0, dt);

        self.snapshot.rms = self.rms_follower.process(frame.rms, 30.0, 4.0, dt);
        self.snapshot.fast_rms = self.fast_rms_follower.process(frame.rms, 60.0, 20.0, dt);
        self.snapshot.flux = self.flux_follower.process(frame.flux, 25.0, 5.0, dt);
        self.snapshot.fast_flux = self.fast_flux_follower.process(frame.flux, 50.0, 15.0, dt);

        self.snapshot.bands = frame.bands;
        self.snapshot.chroma = frame.chroma;
        self.snapshot.bins64 = frame.bins64;
        for i in 0..8 {
            self.snapshot.heavy_bands[i] = self.heavy_bands[i].process(frame.bands[i], 4.0, 1.0, dt);
        }
        for i in 0..12 {
            self.snapshot.heavy_chroma[i] = self.heavy_chroma[i].process(frame.chroma[i], 4.0, 1.0, dt);
        }
        let _ = (alpha_fast, alpha_slow);

        let is_onset = frame.flux > ONSET_THRESHOLD && self.last_beat_age_s > BEAT_MIN_INTERVAL_S;
        self.snapshot.is_on_beat = is_onset;
        if is_onset {
            let instantaneous_bpm = (60.0 / self.last_beat_age_s).clamp(60.0, 200.0);
            self.snapshot.bpm = self.bpm_slew.process(instantaneous_bpm, 40.0, dt);
            self.last_beat_age_s = 0.0;
        }

        let low_energy: f32 = frame.bands[0] + frame.bands[1];
        let mid_energy: f32 = frame.bands[3] + frame.bands[4];
        let high_energy: f32 = frame.bands[6] + frame.bands[7];
        self.snapshot.is_snare_hit = is_onset && mid_energy > low_energy && mid_energy > high_energy;
        self.snapshot.is_hihat_hit = is_onset && high_energy > mid_energy && high_energy > low_energy;

        self.snapshot.chord = estimate_chord(&frame.chroma);
        self.snapshot.saliencies = Saliencies {
            harmonic: frame.chroma.iter().cloned().fold(0.0f32, f32::max),
            rhythmic: frame.flux,
            timbral: high_energy,
            dynamic: frame.rms,
        };
        self.snapshot.music_style = classify_style(self.snapshot.bpm, self.snapshot.rhythmic_regularity());
        self.snapshot.hop_seq = self.hop_seq;
    }
}

impl AudioSnapshot {
    fn rhythmic_regularity(&self) -> f32 {
        self.saliencies.rhythmic
    }
}

/// A coarse major/minor/diminished/augmented guess from the chroma vector's
/// strongest three bins, good enough to drive colour choices without
/// claiming real chord-recognition accuracy.
fn estimate_chord(chroma: &[f32; 12]) -> Chord {
    let mut indexed: Vec<(usize, f32)> = chroma.iter().cloned().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let root = indexed[0].0;
    let total: f32 = chroma.iter().sum();
    if total <= 0.0 {
        return Chord { root_note: root as u8, chord_type: ChordType::None, confidence: 0.0 };
    }
    let third_major = chroma[(root + 4) % 12];
    let third_minor = chroma[(root + 3) % 12];
    let fifth = chroma[(root + 7) % 12];
    let (chord_type, strength) = if third_major > third_minor {
        (ChordType::Major, third_major + fifth)
    } else {
        (ChordType::Minor, third_minor + fifth)
    };
    Chord { root_note: root as u8, chord_type, confidence: (strength / total).clamp(0.0, 1.0) }
}

fn classify_style(bpm: f32, rhythmic_salience: f32) -> MusicStyle {
    if rhythmic_salience < 0.02 {
        MusicStyle::Ambient
    } else if (118.0..132.0).contains(&bpm) {
        MusicStyle::FourOnFloor
    } else if bpm > 0.0 {
        MusicStyle::Breakbeat
    } else {
        MusicStyle::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_produces_default_like_snapshot() {
        let mut pipeline = AudioPipeline::new(44_100.0);
        pipeline.push_samples(&vec![0.0f32; 4096]);
        let snap = pipeline.tick(1.0 / 60.0);
        assert!(snap.rms < 0.01);
        assert!(!snap.is_on_beat || snap.rms < 0.01);
    }

    #[test]
    fn hop_seq_increases_monotonically_with_new_audio() {
        let mut pipeline = AudioPipeline::new(44_100.0);
        let samples: Vec<f32> =
            (0..8192).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        pipeline.push_samples(&samples);
        let first = pipeline.tick(1.0 / 60.0).hop_seq;
        pipeline.push_samples(&samples);
        let second = pipeline.tick(1.0 / 60.0).hop_seq;
        assert!(second >= first);
    }
}

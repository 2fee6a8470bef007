//! Feature extraction: I²S ring-buffer tap -> sliding FFT window -> raw
//! spectral/rhythmic features. The I²S microphone itself is an external
//! collaborator (out of scope); this module only owns the ring buffer the
//! driver would feed and the analysis that runs once a window fills,
//! mirroring the ring-buffer-drain/hop-counter shape of the pack's live
//! analysis loop, adapted from a background-thread consumer to a
//! poll-each-call `try_hop` so it composes with this renderer's own
//! single-threaded render loop instead of spawning its own thread.

use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use rustfft::{num_complex::Complex32, Fft, FftPlanner};

pub const WINDOW_SIZE: usize = 1024;
pub const HOP_SIZE: usize = 256;
pub const BIN_COUNT: usize = 64;
const BAND_COUNT: usize = 8;
const CHROMA_COUNT: usize = 12;

/// One hop's worth of raw (unsmoothed) spectral/energy features. The
/// control bus is responsible for turning these into the smoothed values an
/// `AudioSnapshot` exposes to effects.
#[derive(Debug, Clone, Copy)]
pub struct RawFeatureFrame {
    pub rms: f32,
    pub flux: f32,
    pub bands: [f32; BAND_COUNT],
    pub chroma: [f32; CHROMA_COUNT],
    pub bins64: [f32; BIN_COUNT],
}

pub struct FeatureExtractor {
    producer: HeapProd<f32>,
    consumer: HeapCons<f32>,
    window: [f32; WINDOW_SIZE],
    window_pos: usize,
    filled: usize,
    hop_counter: usize,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
    prev_magnitudes: [f32; WINDOW_SIZE / 2],
    sample_rate: f32,
}

impl FeatureExtractor {
    pub fn new(sample_rate: f32) -> Self {
        let rb = HeapRb::<f32>::new(WINDOW_SIZE * 4);
        let (producer, consumer) = rb.split();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(WINDOW_SIZE);
        Self {
            producer,
            consumer,
            window: [0.0; WINDOW_SIZE],
            window_pos: 0,
            filled: 0,
            hop_counter: 0,
            fft,
            scratch: vec![Complex32::new(0.0, 0.0); WINDOW_SIZE],
            prev_magnitudes: [0.0; WINDOW_SIZE / 2],
            sample_rate,
        }
    }

    /// Pushes raw mono samples into the ring buffer, as the I²S driver
    /// would via DMA callback. Silently drops overflow rather than
    /// blocking — a full buffer means analysis is behind, not that audio
    /// capture should stall.
    pub fn push_samples(&mut self, samples: &[f32]) {
        let _ = self.producer.push_slice(samples);
    }

    /// Drains available samples and returns at most one new feature frame,
    /// matching the "analysis every HOP_SIZE samples once the window is
    /// full" cadence from the grounding live-analysis loop.
    pub fn try_hop(&mut self) -> Option<RawFeatureFrame> {
        let available = self.consumer.occupied_len();
        if available == 0 {
            return None;
        }
        let mut drain_buf = [0.0f32; HOP_SIZE * 2];
        let to_read = available.min(drain_buf.len());
        let read = self.consumer.pop_slice(&mut drain_buf[..to_read]);

        let mut frame = None;
        for &sample in &drain_buf[..read] {
            self.window[self.window_pos % WINDOW_SIZE] = sample;
            self.window_pos += 1;
            self.filled = (self.filled + 1).min(WINDOW_SIZE);
            self.hop_counter += 1;

            if self.hop_counter >= HOP_SIZE && self.filled >= WINDOW_SIZE {
                self.hop_counter = 0;
                frame = Some(self.analyse());
            }
        }
        frame
    }

    fn analyse(&mut self) -> RawFeatureFrame {
        let start = self.window_pos % WINDOW_SIZE;
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = self.window[(start + i) % WINDOW_SIZE];
            // Hann window to reduce spectral leakage.
            let w = 0.5 - 0.5 * (std::f32::consts::TAU * i as f32 / (WINDOW_SIZE as f32 - 1.0)).cos();
            *slot = Complex32::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let half = WINDOW_SIZE / 2;
        let mut magnitudes = [0.0f32; WINDOW_SIZE / 2];
        let mut sum_sq = 0.0f32;
        for i in 0..half {
            let mag = self.scratch[i].norm() / (WINDOW_SIZE as f32).sqrt();
            magnitudes[i] = mag;
            sum_sq += mag * mag;
        }
        let rms = (sum_sq / half as f32).sqrt();

        let mut flux = 0.0f32;
        for i in 0..half {
            let d = magnitudes[i] - self.prev_magnitudes[i];
            if d > 0.0 {
                flux += d;
            }
        }
        self.prev_magnitudes = magnitudes;

        let bins64 = fold_bins(&magnitudes, self.sample_rate);
        let bands = fold_bands(&bins64);
        let chroma = fold_chroma(&magnitudes, self.sample_rate);

        RawFeatureFrame { rms, flux, bands, chroma, bins64 }
    }
}

/// Folds the linear FFT magnitude spectrum down to `BIN_COUNT` log-spaced
/// bins, a cheap substitute for per-bin Goertzel analysis that produces the
/// same "perceptual band energy" shape the renderer's effects expect.
fn fold_bins(magnitudes: &[f32], sample_rate: f32) -> [f32; BIN_COUNT] {
    let mut bins = [0.0f32; BIN_COUNT];
    let nyquist = sample_rate / 2.0;
    let min_hz = 30.0f32;
    let log_min = min_hz.ln();
    let log_max = nyquist.ln();
    for (i, &mag) in magnitudes.iter().enumerate() {
        if i == 0 {
            continue;
        }
        let hz = i as f32 * sample_rate / (magnitudes.len() as f32 * 2.0);
        if hz < min_hz || hz > nyquist {
            continue;
        }
        let t = ((hz.ln() - log_min) / (log_max - log_min)).clamp(0.0, 0.999_9);
        let bin = (t * BIN_COUNT as f32) as usize;
        bins[bin.min(BIN_COUNT - 1)] += mag;
    }
    bins
}

/// Groups the 64 log bins into 8 wider bands by simple contiguous
/// averaging.
fn fold_bands(bins64: &[f32; BIN_COUNT]) -> [f32; BAND_COUNT] {
    let mut bands = [0.0f32; BAND_COUNT];
    let per_band = BIN_COUNT / BAND_COUNT;
    for (b, band) in bands.iter_mut().enumerate() {
        let start = b * per_band;
        let sum: f32 = bins64[start..start + per_band].iter().sum();
        *band = sum / per_band as f32;
    }
    bands
}

/// Folds spectral magnitude into 12 pitch classes by mapping each bin's
/// frequency to its nearest semitone mod 12, A440 equal temperament.
fn fold_chroma(magnitudes: &[f32], sample_rate: f32) -> [f32; CHROMA_COUNT] {
    let mut chroma = [0.0f32; CHROMA_COUNT];
    for (i, &mag) in magnitudes.iter().enumerate() {
        if i == 0 || mag <= 0.0 {
            continue;
        }
        let hz = i as f32 * sample_rate / (magnitudes.len() as f32 * 2.0);
        if hz < 20.0 {
            continue;
        }
        let midi = 69.0 + 12.0 * (hz / 440.0).log2();
        let pitch_class = ((midi.round() as i32).rem_euclid(12)) as usize;
        chroma[pitch_class] += mag;
    }
    chroma
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_in_yields_near_zero_rms() {
        let mut fx = FeatureExtractor::new(44_100.0);
        let samples = vec![0.0f32; WINDOW_SIZE * 2];
        fx.push_samples(&samples);
        let mut last = None;
        while let Some(f) = fx.try_hop() {
            last = Some(f);
        }
        let frame = last.expect("expected at least one hop");
        assert!(frame.rms < 1e-4);
    }

    #[test]
    fn sine_wave_concentrates_energy_in_one_band() {
        let sr = 44_100.0f32;
        let mut fx = FeatureExtractor::new(sr);
        let freq = 1000.0f32;
        let samples: Vec<f32> =
            (0..WINDOW_SIZE * 4).map(|i| (std::f32::consts::TAU * freq * i as f32 / sr).sin() * 0.8).collect();
        fx.push_samples(&samples);
        let mut last = None;
        while let Some(f) = fx.try_hop() {
            last = Some(f);
        }
        let frame = last.expect("expected at least one hop");
        assert!(frame.rms > 0.1);
        let max_band = frame.bands.iter().cloned().fold(0.0f32, f32::max);
        assert!(max_band > 0.0);
    }
}

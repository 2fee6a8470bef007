//! Smoothing primitives enforcing the audio-reactive rendering rules: every
//! raw audio scalar must pass through one of these before it reaches a
//! visible parameter. Grounded on the asymmetric attack/release follower in
//! the DSP pack's envelope follower node, adapted from a fixed sample-rate
//! coefficient to the frame-rate-independent `alpha` form this renderer
//! needs (hop/frame periods vary with system load, unlike a fixed audio
//! callback).

use std::f32::consts::TAU;

/// `alpha = 1 - exp(-lambda*dt)`, the frame-rate-independent smoothing
/// coefficient used by every primitive below. `lambda` is effectively
/// `1/time_constant`.
#[inline]
pub fn rate_independent_alpha(lambda: f32, dt: f32) -> f32 {
    1.0 - (-lambda * dt).exp()
}

/// Wraps `phase` into `[0, 1)`. Invoked every frame, never only on a
/// threshold crossing, per the audio contract.
#[inline]
pub fn wrap_phase(phase: f32) -> f32 {
    phase - phase.floor()
}

/// Asymmetric exponential follower: rises toward input with `attack_lambda`,
/// falls with `release_lambda`. Mirrors `EnvelopeFollowerNode::process_peak`'s
/// branch-on-direction shape but is driven by an explicit `dt` rather than a
/// baked-in sample rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsymmetricFollower {
    value: f32,
}

impl AsymmetricFollower {
    pub fn new() -> Self {
        Self { value: 0.0 }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    /// `attack_lambda`/`release_lambda` are `1/time_constant` in seconds.
    pub fn process(&mut self, input: f32, attack_lambda: f32, release_lambda: f32, dt: f32) -> f32 {
        let lambda = if input > self.value { attack_lambda } else { release_lambda };
        let alpha = rate_independent_alpha(lambda, dt);
        self.value += (input - self.value) * alpha;
        self.value
    }
}

/// Bounds the per-second rate of change of a scalar. Used for any speed
/// modulation driven by audio, per the slew-limiting contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlewLimiter {
    value: f32,
}

impl SlewLimiter {
    pub fn new(initial: f32) -> Self {
        Self { value: initial }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn process(&mut self, target: f32, max_rate_per_sec: f32, dt: f32) -> f32 {
        let max_step = max_rate_per_sec * dt.max(0.0);
        let delta = (target - self.value).clamp(-max_step, max_step);
        self.value += delta;
        self.value
    }
}

/// Critically-damped spring for any visibly inertial quantity (e.g. a
/// bobbing brightness or a camera-like parameter). `stiffness`/`damping` are
/// tuned per use, not hard-coded, since different effects want different
/// inertia.
#[derive(Debug, Clone, Copy, Default)]
pub struct Spring {
    position: f32,
    velocity: f32,
}

impl Spring {
    pub fn new(initial: f32) -> Self {
        Self { position: initial, velocity: 0.0 }
    }

    pub fn position(&self) -> f32 {
        self.position
    }

    pub fn process(&mut self, target: f32, stiffness: f32, damping: f32, dt: f32) -> f32 {
        let accel = stiffness * (target - self.position) - damping * self.velocity;
        self.velocity += accel * dt;
        self.position += self.velocity * dt;
        self.position
    }
}

/// Converges `phase` toward `beat_phase` proportionally rather than
/// hard-assigning it, per the "never hard-assign phase from beat phase"
/// contract: `phase += wrap(beatPhase*2*pi - phase) * k * dt`.
pub struct PhaseLock {
    phase: f32,
}

impl PhaseLock {
    pub fn new() -> Self {
        Self { phase: 0.0 }
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// `phase_speed` is the free-running radians/sec advance driven by
    /// elapsed time; `beat_phase` is the detector's estimate in `[0,1)`;
    /// `k` is the convergence gain (0 disables locking entirely).
    pub fn advance(&mut self, phase_speed: f32, beat_phase: f32, k: f32, dt: f32) -> f32 {
        self.phase += phase_speed * dt;
        let target_radians = beat_phase * TAU;
        let error = wrap_radians(target_radians - self.phase);
        self.phase += error * k * dt;
        self.phase = wrap_radians(self.phase);
        self.phase
    }
}

impl Default for PhaseLock {
    fn default() -> Self {
        Self::new()
    }
}

fn wrap_radians(mut a: f32) -> f32 {
    while a > std::f32::consts::PI {
        a -= TAU;
    }
    while a < -std::f32::consts::PI {
        a += TAU;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asymmetric_follower_rises_faster_than_it_falls() {
        let mut rising = AsymmetricFollower::new();
        let mut falling = AsymmetricFollower::new();
        falling.value = 1.0;

        let mut rise_steps = 0;
        while rising.process(1.0, 20.0, 2.0, 1.0 / 60.0) < 0.9 {
            rise_steps += 1;
            assert!(rise_steps < 10_000);
        }
        let mut fall_steps = 0;
        while falling.process(0.0, 20.0, 2.0, 1.0 / 60.0) > 0.1 {
            fall_steps += 1;
            assert!(fall_steps < 10_000);
        }
        assert!(rise_steps < fall_steps);
    }

    #[test]
    fn slew_limiter_bounds_rate_of_change() {
        let mut slew = SlewLimiter::new(0.0);
        let out = slew.process(100.0, 10.0, 1.0);
        assert_eq!(out, 10.0);
    }

    #[test]
    fn phase_lock_never_teleports() {
        let mut lock = PhaseLock::new();
        let dt = 1.0 / 60.0;
        let mut max_delta = 0.0f32;
        let mut last = lock.phase();
        for _ in 0..240 {
            let p = lock.advance(TAU, 0.5, 2.0, dt);
            let delta = wrap_radians(p - last).abs();
            max_delta = max_delta.max(delta);
            last = p;
        }
        // A reasonable phase-speed-max bound for this gain/dt combination.
        assert!(max_delta < TAU * dt * 4.0, "phase jumped by {max_delta}");
    }

    #[test]
    fn alpha_is_frame_rate_independent_in_the_limit() {
        let a60 = rate_independent_alpha(5.0, 1.0 / 60.0);
        let a30 = rate_independent_alpha(5.0, 1.0 / 30.0);
        assert!(a30 > a60);
        assert!(a60 > 0.0 && a60 < 1.0);
    }
}

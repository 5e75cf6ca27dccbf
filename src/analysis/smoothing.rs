//! Attack/decay smoothing of bin magnitudes.
//!
//! Each bin moves toward the new value by `1 - exp(-dt / tau)`, with a short
//! time constant while rising and a longer one while falling, so visuals jump
//! on transients and fall back gently. The result is frame-rate independent.

use crate::config::PipelineConfig;

/// Per-bin smoothed magnitudes, mutated in place each tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedState {
    values: Vec<f32>,
}

impl SmoothedState {
    pub fn new(num_bins: usize) -> Self {
        Self {
            values: vec![0.0; num_bins],
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn reset(&mut self) {
        self.values.fill(0.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalSmoother {
    /// Seconds; used while the input rises
    pub attack: f32,
    /// Seconds; used while the input falls or holds
    pub decay: f32,
}

impl TemporalSmoother {
    pub fn new(attack: f32, decay: f32) -> Self {
        Self { attack, decay }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.attack_time_constant, config.decay_time_constant)
    }

    /// Advance `state` toward `current` by `dt` seconds.
    pub fn smooth(&self, state: &mut SmoothedState, current: &[f32], dt: f32) {
        if !(dt > 0.0) {
            return;
        }
        for (previous, &target) in state.values.iter_mut().zip(current) {
            let tau = if target > *previous { self.attack } else { self.decay };
            *previous += (target - *previous) * coefficient(dt, tau);
        }
    }
}

fn coefficient(dt: f32, tau: f32) -> f32 {
    if tau <= 0.0 {
        1.0
    } else {
        1.0 - (-dt / tau).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(smoother: &TemporalSmoother, state: &mut SmoothedState, target: f32, ticks: usize, dt: f32) {
        let current = vec![target; state.values().len()];
        for _ in 0..ticks {
            smoother.smooth(state, &current, dt);
        }
    }

    #[test]
    fn converges_to_constant_input() {
        let smoother = TemporalSmoother::new(0.03, 0.25);
        let mut state = SmoothedState::new(4);
        run(&smoother, &mut state, 0.7, 200, 0.05);
        assert!(state.values().iter().all(|v| (v - 0.7).abs() < 1e-4));

        run(&smoother, &mut state, 0.0, 400, 0.05);
        assert!(state.values().iter().all(|v| v.abs() < 1e-4));
    }

    #[test]
    fn rises_faster_than_it_falls() {
        let smoother = TemporalSmoother::new(0.03, 0.25);

        let mut rising = SmoothedState::new(1);
        smoother.smooth(&mut rising, &[1.0], 0.05);
        let rise = rising.values()[0];

        let mut falling = SmoothedState::new(1);
        run(&TemporalSmoother::new(0.0, 0.0), &mut falling, 1.0, 1, 0.05);
        smoother.smooth(&mut falling, &[0.0], 0.05);
        let fall = 1.0 - falling.values()[0];

        assert!(rise > fall);
        assert!((rise - (1.0 - (-0.05f32 / 0.03).exp())).abs() < 1e-6);
        assert!((fall - (1.0 - (-0.05f32 / 0.25).exp())).abs() < 1e-6);
    }

    #[test]
    fn zero_time_constant_snaps() {
        let smoother = TemporalSmoother::new(0.0, 0.0);
        let mut state = SmoothedState::new(2);
        smoother.smooth(&mut state, &[0.4, 0.9], 0.01);
        assert_eq!(state.values(), &[0.4, 0.9]);
    }

    #[test]
    fn non_positive_dt_is_ignored() {
        let smoother = TemporalSmoother::new(0.03, 0.25);
        let mut state = SmoothedState::new(2);
        smoother.smooth(&mut state, &[1.0, 1.0], 0.0);
        smoother.smooth(&mut state, &[1.0, 1.0], -0.5);
        assert_eq!(state.values(), &[0.0, 0.0]);
    }

    #[test]
    fn reset_zeroes_state() {
        let smoother = TemporalSmoother::new(0.0, 0.0);
        let mut state = SmoothedState::new(3);
        smoother.smooth(&mut state, &[1.0, 2.0, 3.0], 0.05);
        state.reset();
        assert_eq!(state.values(), &[0.0, 0.0, 0.0]);
    }
}

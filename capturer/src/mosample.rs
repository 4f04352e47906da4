//! The motion-sampling accumulator (C3, spec §4.3): a shutter-weighted
//! temporal blend of engine sub-frames down to the movie's output frame
//! rate. The accumulation itself is a GPU compute pass ([`AccumulatorDevice`]
//! is the seam a real D3D11 implementation plugs into); the state machine
//! that decides *when* to accumulate, emit, and clear is plain, host-free
//! arithmetic and is what's tested here.

use svr_shared::constants::MOSAMPLE_EPSILON;
use svr_shared::profile::MotionSample;

/// What the state machine wants done with the current sub-frame this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Shutter closed; drop the sub-frame entirely.
    Skip,
    /// Blend the sub-frame into the accumulator with `weight`, nothing else.
    Accumulate { weight: f32 },
    /// Blend with `weight`, then emit the accumulator `emits` times (`emits
    /// >= 1`; `> 1` only when `step > 1`, i.e. `mult < 1`, which spec §4.9
    /// already forbids — kept general since the math supports it), clear it,
    /// and optionally begin the next exposure window with `carry_weight`.
    AccumulateAndEmit { weight: f32, emits: u32, carry_weight: Option<f32> },
}

/// Per-movie state for the accumulator (spec §4.3: "State per movie").
#[derive(Debug, Clone, Copy)]
pub struct Accumulator {
    remainder: f32,
    step: f32,
    exposure: f32,
}

impl Accumulator {
    /// Builds the accumulator for a profile's `(mult, exposure)` pair.
    /// `mult == 1` means motion blur is disabled (spec §4.3: "`M = 1`
    /// disables motion blur entirely"); callers should not construct this
    /// in that case — see [`Accumulator::for_profile`].
    pub fn new(mult: u32, exposure: f32) -> Self {
        Self { remainder: 0.0, step: 1.0 / mult as f32, exposure }
    }

    /// Returns `None` when motion sampling is off or `mult <= 1`, mirroring
    /// spec §4.3's "every sub-frame is emitted directly" fallback.
    pub fn for_profile(settings: &MotionSample) -> Option<Self> {
        if !settings.enabled || settings.mult <= 1 {
            None
        } else {
            Some(Self::new(settings.mult, settings.exposure))
        }
    }

    /// Runs one sub-frame through the algorithm from spec §4.3 and returns
    /// what the caller should do, advancing `remainder` as a side effect.
    pub fn tick(&mut self) -> Action {
        let e = self.exposure;
        let r_old = self.remainder;
        let mut r_new = r_old + self.step;

        let action = if r_new <= 1.0 - e {
            Action::Skip
        } else if r_new < 1.0 {
            let w = (r_new - (1.0 - e).max(r_old)) / e;
            Action::Accumulate { weight: w }
        } else {
            let w = (1.0 - (1.0 - e).max(r_old)) / e;
            r_new -= 1.0;
            let mut emits = 1;
            while r_new >= 1.0 {
                r_new -= 1.0;
                emits += 1;
            }
            let carry_weight = if r_new > MOSAMPLE_EPSILON && r_new > 1.0 - e {
                Some((r_new - (1.0 - e)) / e)
            } else {
                None
            };
            Action::AccumulateAndEmit { weight: w, emits, carry_weight }
        };

        self.remainder = r_new;
        action
    }
}

/// The GPU-side operations the accumulator state machine drives. A real
/// implementation dispatches compute shaders against the accumulator
/// texture (spec §3: "high-precision (32-bit-per-channel float) 2D
/// texture"); tests exercise the state machine against a mock that just
/// records calls.
pub trait AccumulatorDevice {
    fn accumulate(&mut self, weight: f32);
    fn emit(&mut self);
    fn clear(&mut self);
}

/// Drives `device` through one sub-frame according to `acc`'s state
/// machine. This is C10's per-sub-frame call into C3 (spec §4.10).
pub fn drive_subframe(acc: &mut Accumulator, device: &mut impl AccumulatorDevice) -> u32 {
    match acc.tick() {
        Action::Skip => 0,
        Action::Accumulate { weight } => {
            device.accumulate(weight);
            0
        }
        Action::AccumulateAndEmit { weight, emits, carry_weight } => {
            device.accumulate(weight);
            for _ in 0..emits {
                device.emit();
            }
            device.clear();
            if let Some(w) = carry_weight {
                device.accumulate(w);
            }
            emits
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        accumulate_calls: Vec<f32>,
        emit_count: u32,
        clear_count: u32,
    }

    impl AccumulatorDevice for Recorder {
        fn accumulate(&mut self, weight: f32) {
            self.accumulate_calls.push(weight);
        }
        fn emit(&mut self) {
            self.emit_count += 1;
        }
        fn clear(&mut self) {
            self.clear_count += 1;
        }
    }

    /// Invariant 1 (spec §8): over `K * M` sub-frames, exactly `K` emits.
    #[test]
    fn emit_count_matches_subframe_count_over_mult_for_various_exposures() {
        for &(mult, exposure) in &[(2u32, 1.0f32), (4, 0.5), (3, 0.3), (8, 0.9)] {
            for k in 1..=5u32 {
                let mut acc = Accumulator::new(mult, exposure);
                let mut dev = Recorder::default();
                for _ in 0..(k * mult) {
                    drive_subframe(&mut acc, &mut dev);
                }
                assert_eq!(
                    dev.emit_count, k,
                    "mult={mult} exposure={exposure} k={k}: expected {k} emits, got {}",
                    dev.emit_count
                );
            }
        }
    }

    /// Boundary behavior 9 (spec §8): mult=2, exposure=1.0, constant input
    /// reproduces the input exactly — every accumulated weight sums to 1.0
    /// per emitted frame (boxcar filter identity).
    #[test]
    fn full_exposure_boxcar_weights_sum_to_one_per_emit() {
        let mut acc = Accumulator::new(2, 1.0);
        let mut dev = Recorder::default();
        let mut total_since_clear = 0.0f32;
        let mut clears_seen = 0;
        for _ in 0..8 {
            let before_clear = dev.clear_count;
            let before_calls = dev.accumulate_calls.len();
            drive_subframe(&mut acc, &mut dev);
            for w in &dev.accumulate_calls[before_calls..] {
                total_since_clear += w;
            }
            if dev.clear_count > before_clear {
                clears_seen += 1;
                assert!((total_since_clear - 1.0).abs() < 1e-5, "sum was {total_since_clear}");
                total_since_clear = 0.0;
            }
        }
        assert_eq!(clears_seen, 4);
    }

    /// Boundary behavior 10 (spec §8): mult=2, exposure=0.5. `r_new <= 1.0 -
    /// e` uses `<=`, matching the original `game_proc.cpp`, so sub-frame 0
    /// lands exactly on the skip/accumulate boundary and is dropped
    /// entirely; only sub-frame 1 is accumulated, at full weight 1.0 (a
    /// "white" emit, not a mid-gray blend of the two).
    #[test]
    fn half_exposure_half_mult_skips_the_first_subframe_at_the_boundary() {
        let mut acc = Accumulator::new(2, 0.5);
        let mut dev = Recorder::default();
        let first = drive_subframe(&mut acc, &mut dev); // sub-frame 0 (black): boundary, skipped
        assert_eq!(first, 0);
        assert!(dev.accumulate_calls.is_empty());
        let second = drive_subframe(&mut acc, &mut dev); // sub-frame 1 (white) -> emit
        assert_eq!(second, 1);
        assert_eq!(dev.accumulate_calls.len(), 1);
        assert!((dev.accumulate_calls[0] - 1.0).abs() < 1e-6);
        assert_eq!(dev.emit_count, 1);
    }

    #[test]
    fn mult_one_disables_motion_blur() {
        let settings = MotionSample { enabled: true, mult: 1, exposure: 1.0 };
        assert!(Accumulator::for_profile(&settings).is_none());
    }

    #[test]
    fn disabled_motion_blur_returns_none() {
        let settings = MotionSample { enabled: false, mult: 4, exposure: 0.5 };
        assert!(Accumulator::for_profile(&settings).is_none());
    }

    #[test]
    fn catch_up_loop_emits_multiple_times_when_step_exceeds_one() {
        // step > 1 means mult < 1; not reachable through validated profiles,
        // but the formula supports it and spec §9 calls this the "catch-up"
        // path, so exercise it directly against Accumulator::new.
        let mut acc = Accumulator { remainder: 0.0, step: 2.5, exposure: 1.0 };
        let mut dev = Recorder::default();
        let emits = drive_subframe(&mut acc, &mut dev);
        assert_eq!(emits, 2);
        assert_eq!(dev.emit_count, 2);
        assert_eq!(dev.clear_count, 1);
    }
}

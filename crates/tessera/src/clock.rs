//! Per-thread frame clock.

use std::time::{Duration, Instant};

use tessera_core::FrameContext;

/// Delta reported for the first frame and the first frame after a reset.
pub const FIRST_FRAME_DELTA: f32 = 0.001;

/// Upper bound on a reported delta, so a stall does not explode the
/// simulation.
pub const MAX_FRAME_DELTA: f32 = 0.1;

/// Frame counter, delta time and accumulated game time of one thread.
#[derive(Debug, Clone, Default)]
pub struct FrameClock {
    frame: u64,
    last: Option<Instant>,
    game_time: f64,
}

impl FrameClock {
    /// Creates a clock at frame 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a frame and returns its context.
    pub fn tick(&mut self) -> FrameContext {
        let now = Instant::now();
        let delta_time = match self.last {
            Some(last) => now.duration_since(last).as_secs_f32().min(MAX_FRAME_DELTA),
            None => FIRST_FRAME_DELTA,
        };
        self.last = Some(now);
        self.game_time += f64::from(delta_time);
        let ctx = FrameContext {
            frame: self.frame,
            delta_time,
            game_time: self.game_time,
        };
        self.frame += 1;
        ctx
    }

    /// Makes the next delta [`FIRST_FRAME_DELTA`]. Frame count and game time
    /// are kept.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Frames ticked so far.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Time until a frame started now would have lasted `1 / fps`.
    #[must_use]
    pub fn remaining(&self, fps: u32) -> Duration {
        if fps == 0 {
            return Duration::ZERO;
        }
        let budget = Duration::from_secs_f64(1.0 / f64::from(fps));
        self.last
            .map_or(Duration::ZERO, |last| budget.saturating_sub(last.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delta() {
        let mut clock = FrameClock::new();
        let first = clock.tick();
        assert_eq!(first.frame, 0);
        assert_eq!(first.delta_time, FIRST_FRAME_DELTA);
        let second = clock.tick();
        assert_eq!(second.frame, 1);
        assert!(second.delta_time <= MAX_FRAME_DELTA);
        assert!(second.game_time >= first.game_time);
    }

    #[test]
    fn test_reset() {
        let mut clock = FrameClock::new();
        clock.tick();
        std::thread::sleep(Duration::from_millis(5));
        clock.reset();
        let ctx = clock.tick();
        assert_eq!(ctx.delta_time, FIRST_FRAME_DELTA);
        assert_eq!(ctx.frame, 1);
    }

    #[test]
    fn test_remaining_unpaced() {
        let mut clock = FrameClock::new();
        clock.tick();
        assert_eq!(clock.remaining(0), Duration::ZERO);
        assert!(clock.remaining(1) <= Duration::from_secs(1));
    }
}

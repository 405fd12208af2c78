use std::time::{Duration, Instant};

/// Frame clock for the demo's day/night cycle.
pub struct Time {
    start: Instant,
    last: Instant,
    pub delta: Duration,
}

impl Time {
    /// Longest step fed to the simulation, so a stalled frame (window drag, breakpoint)
    /// does not jump the sun across the sky.
    pub const MAX_DELTA: Duration = Duration::from_millis(100);

    pub fn new() -> Self {
        let now = Instant::now();
        Self { start: now, last: now, delta: Duration::ZERO }
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = (now - self.last).min(Self::MAX_DELTA);
        self.last = now;
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.last.duration_since(self.start).as_secs_f32()
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

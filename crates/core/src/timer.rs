//! Frame timing: delta timer, FPS counter and frame-rate limiter.

use std::time::{Duration, Instant};

use tracing::trace;

/// High-resolution timer for measuring elapsed time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the elapsed time in seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Get the time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Get the delta time in seconds since the last tick.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts frames over a one second window.
#[derive(Debug)]
pub struct FpsCounter {
    window_start: Instant,
    frames: u32,
    fps: u32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
            fps: 0,
        }
    }

    /// Records a finished frame. Returns the new FPS value when a window closes.
    pub fn frame(&mut self) -> Option<u32> {
        self.frames += 1;
        if self.window_start.elapsed() >= Duration::from_secs(1) {
            self.fps = self.frames;
            self.frames = 0;
            self.window_start = Instant::now();
            return Some(self.fps);
        }
        None
    }

    /// Frames counted in the last complete window.
    pub fn fps(&self) -> u32 {
        self.fps
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps the loop from producing frames faster than a target rate.
///
/// The limiter tracks the schedule since its last reset rather than the
/// previous frame alone, so short frames make up for long ones.
#[derive(Debug)]
pub struct FrameLimiter {
    start: Instant,
    frames: u64,
    target_fps: u32,
}

impl FrameLimiter {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            frames: 0,
            target_fps: 0,
        }
    }

    /// Marks the end of a frame and sleeps until the schedule allows the next
    /// one. A `desired_fps` of zero disables limiting.
    ///
    /// Returns how long the thread slept.
    pub fn pace(&mut self, desired_fps: u32) -> Duration {
        if desired_fps == 0 {
            return Duration::ZERO;
        }
        if self.target_fps != desired_fps {
            self.reset();
            self.target_fps = desired_fps;
        }

        self.frames += 1;
        let sleep = sleep_needed(self.start.elapsed(), self.frames, desired_fps);
        if !sleep.is_zero() {
            trace!("Frame limiter sleeping for {:?}", sleep);
            std::thread::sleep(sleep);
        }
        sleep
    }

    /// Restarts the schedule from now.
    pub fn reset(&mut self) {
        self.start = Instant::now();
        self.frames = 0;
    }
}

impl Default for FrameLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Time remaining until `frames` frames at `fps` would have been due.
fn sleep_needed(elapsed: Duration, frames: u64, fps: u32) -> Duration {
    let expected = Duration::from_secs_f64(frames as f64 / fps as f64);
    expected.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_needed_when_ahead_of_schedule() {
        let sleep = sleep_needed(Duration::from_millis(10), 1, 50);
        assert_eq!(sleep, Duration::from_millis(10));
    }

    #[test]
    fn test_no_sleep_when_behind_schedule() {
        let sleep = sleep_needed(Duration::from_millis(500), 10, 60);
        assert_eq!(sleep, Duration::ZERO);
    }

    #[test]
    fn test_unlimited_never_sleeps() {
        let mut limiter = FrameLimiter::new();
        assert_eq!(limiter.pace(0), Duration::ZERO);
        assert_eq!(limiter.frames, 0);
    }

    #[test]
    fn test_changing_target_resets_schedule() {
        let mut limiter = FrameLimiter::new();
        limiter.pace(10_000);
        limiter.pace(10_000);
        assert_eq!(limiter.frames, 2);

        limiter.pace(20_000);
        assert_eq!(limiter.frames, 1);
        assert_eq!(limiter.target_fps, 20_000);
    }

    #[test]
    fn test_fps_counter_starts_at_zero() {
        let mut counter = FpsCounter::new();
        assert_eq!(counter.frame(), None);
        assert_eq!(counter.fps(), 0);
    }

    #[test]
    fn test_timer_tick_is_monotonic() {
        let mut timer = Timer::new();
        let first = timer.tick();
        let second = timer.tick();
        assert!(first >= Duration::ZERO);
        assert!(timer.elapsed() >= second);
    }
}

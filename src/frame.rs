//! Frame pacing.
//!
//! The host calls back on every display refresh. [`RenderLoop`] turns those
//! callbacks into renders at a fixed maximum rate, and [`SurfaceWatcher`]
//! notices when the drawable size changed between two renders.

use instant::Instant;

/// Source of elapsed time.
pub trait Clock {
    /// Seconds since the previous call (or since creation on the first call).
    fn delta(&mut self) -> f64;
}

/// Wall clock backed by [`instant::Instant`] so it also works on wasm.
#[derive(Debug)]
pub struct SystemClock {
    last: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn delta(&mut self) -> f64 {
        let now = Instant::now();
        let delta = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        delta
    }
}

/// Clock that only moves when told to. Used to emulate refresh timings.
#[derive(Debug, Default)]
pub struct ManualClock {
    pending: f64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, seconds: f64) {
        self.pending += seconds;
    }
}

impl Clock for ManualClock {
    fn delta(&mut self) -> f64 {
        std::mem::take(&mut self.pending)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Skip,
    Render,
}

/// Frame-rate gate.
///
/// Deltas are summed until they reach one interval. The remainder after a
/// render is carried into the next frame instead of being dropped, which keeps
/// the average rate at the target even when refreshes do not divide evenly.
#[derive(Clone, Debug)]
pub struct FrameThrottle {
    interval: f64,
    accumulator: f64,
}

impl FrameThrottle {
    pub fn new(framerate: u32) -> Self {
        Self {
            interval: 1.0 / framerate.max(1) as f64,
            accumulator: 0.0,
        }
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    pub fn tick(&mut self, delta: f64) -> TickOutcome {
        self.accumulator += delta.max(0.0);
        if self.accumulator < self.interval {
            return TickOutcome::Skip;
        }
        self.accumulator %= self.interval;
        TickOutcome::Render
    }
}

/// Tracks the configured surface size and reports changes of the drawable size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceWatcher {
    width: u32,
    height: u32,
}

impl SurfaceWatcher {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Returns the new size once when `width`/`height` differ from the last
    /// accepted size. Zero-sized (minimised) surfaces are ignored.
    pub fn observe(&mut self, width: u32, height: u32) -> Option<(u32, u32)> {
        if width == 0 || height == 0 || (width, height) == (self.width, self.height) {
            return None;
        }
        self.width = width;
        self.height = height;
        Some((width, height))
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// A cancellable, repeating frame task.
#[derive(Debug)]
pub struct RenderLoop<C: Clock = SystemClock> {
    throttle: FrameThrottle,
    clock: C,
    cancelled: bool,
    rendered: u64,
}

impl RenderLoop<SystemClock> {
    pub fn new(framerate: u32) -> Self {
        Self::with_clock(framerate, SystemClock::new())
    }
}

impl<C: Clock> RenderLoop<C> {
    pub fn with_clock(framerate: u32, clock: C) -> Self {
        Self {
            throttle: FrameThrottle::new(framerate),
            clock,
            cancelled: false,
            rendered: 0,
        }
    }

    /// Called on every host refresh.
    pub fn tick(&mut self) -> TickOutcome {
        let delta = self.clock.delta();
        if self.cancelled {
            return TickOutcome::Skip;
        }
        let outcome = self.throttle.tick(delta);
        if outcome == TickOutcome::Render {
            self.rendered += 1;
        }
        outcome
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Frames that passed the throttle so far.
    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    pub fn throttle(&self) -> &FrameThrottle {
        &self.throttle
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_sixtieths_render_twice_and_carry() {
        let mut throttle = FrameThrottle::new(30);
        let outcomes: Vec<_> = (0..5).map(|_| throttle.tick(1.0 / 60.0)).collect();
        assert_eq!(
            outcomes,
            [
                TickOutcome::Skip,
                TickOutcome::Render,
                TickOutcome::Skip,
                TickOutcome::Render,
                TickOutcome::Skip,
            ]
        );
        assert!(throttle.accumulator() > 0.0);
        assert!(throttle.accumulator() < throttle.interval());
    }

    #[test]
    fn never_more_than_framerate_per_second() {
        for refresh in [60.0, 75.0, 120.0, 144.0, 240.0] {
            let mut throttle = FrameThrottle::new(30);
            let renders = (0..refresh as usize)
                .filter(|_| throttle.tick(1.0 / refresh) == TickOutcome::Render)
                .count();
            assert!(renders <= 30, "{renders} renders at {refresh} Hz");
            assert!(renders >= 29, "{renders} renders at {refresh} Hz");
        }
    }

    #[test]
    fn remainder_is_carried_not_reset() {
        let mut throttle = FrameThrottle::new(30);
        assert_eq!(throttle.tick(0.05), TickOutcome::Render);
        let carry = throttle.accumulator();
        assert!((carry - (0.05 - 1.0 / 30.0)).abs() < 1e-9);
        // the carry alone plus a small step completes the next frame
        assert_eq!(throttle.tick(1.0 / 30.0 - carry + 1e-9), TickOutcome::Render);
    }

    #[test]
    fn a_long_stall_renders_once() {
        let mut throttle = FrameThrottle::new(30);
        assert_eq!(throttle.tick(3.0), TickOutcome::Render);
        assert!(throttle.accumulator() < throttle.interval());
        assert_eq!(throttle.tick(0.0), TickOutcome::Skip);
    }

    #[test]
    fn resize_is_reported_exactly_once() {
        let mut watcher = SurfaceWatcher::new(800, 600);
        assert_eq!(watcher.observe(800, 600), None);
        assert_eq!(watcher.observe(1024, 512), Some((1024, 512)));
        assert_eq!(watcher.observe(1024, 512), None);
        assert_eq!(watcher.aspect(), 2.0);
        assert_eq!(watcher.observe(0, 512), None);
        assert_eq!(watcher.size(), (1024, 512));
    }

    #[test]
    fn cancelled_loop_stops_rendering() {
        let mut render_loop = RenderLoop::with_clock(30, ManualClock::new());
        render_loop.clock_mut().advance(0.1);
        assert_eq!(render_loop.tick(), TickOutcome::Render);
        render_loop.cancel();
        render_loop.clock_mut().advance(0.1);
        assert_eq!(render_loop.tick(), TickOutcome::Skip);
        assert!(render_loop.is_cancelled());
        assert_eq!(render_loop.rendered(), 1);
    }
}

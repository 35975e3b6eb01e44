/// Amount the animation scalar advances per presented frame.
pub const CLOCK_STEP: f32 = 0.1;

/// Monotonic animation scalar handed to the compute kernel.
///
/// The clock counts frames and derives `t` from the count, so frame `n`
/// always sees exactly `n * step` in f64 regardless of how long the session
/// runs. The f32 handed to kernels loses per-step resolution once `t` passes
/// about 2^21; there is no upper bound and wrapping is the kernel's business.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimationClock {
    ticks: u64,
    step: f32,
}

impl Default for AnimationClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AnimationClock {
    pub fn new() -> Self {
        Self::with_step(CLOCK_STEP)
    }

    pub fn with_step(step: f32) -> Self {
        Self { ticks: 0, step }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn step(&self) -> f32 {
        self.step
    }

    pub fn t(&self) -> f32 {
        self.t_f64() as f32
    }

    pub fn t_f64(&self) -> f64 {
        self.ticks as f64 * f64::from(self.step)
    }

    pub fn advance(&mut self) {
        self.ticks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let c = AnimationClock::new();
        assert_eq!(c.ticks(), 0);
        assert_eq!(c.t(), 0.0);
    }

    #[test]
    fn advances_by_exactly_one_step_per_tick() {
        let mut c = AnimationClock::new();
        let mut prev = c.t_f64();
        for n in 1..=10_000u64 {
            c.advance();
            let now = c.t_f64();
            assert!(now > prev, "clock must strictly increase at tick {n}");
            assert_eq!(now, n as f64 * f64::from(CLOCK_STEP));
            assert!(c.t() > prev as f32);
            prev = now;
        }
        assert_eq!(c.ticks(), 10_000);
    }

    #[test]
    fn second_frame_sees_one_step() {
        let mut c = AnimationClock::new();
        c.advance();
        assert_eq!(c.t(), 0.1);
        c.advance();
        assert_eq!(c.t(), (2.0f64 * f64::from(0.1f32)) as f32);
    }

    #[test]
    fn f64_time_stays_exact_where_f32_collapses() {
        let mut c = AnimationClock {
            ticks: 1 << 26,
            step: CLOCK_STEP,
        };
        let before = (c.t_f64(), c.t());
        c.advance();
        assert_eq!(c.t_f64() - before.0, f64::from(CLOCK_STEP));
        assert_eq!(c.t(), before.1);
    }
}

use crate::{
    clock::AnimationClock,
    compute::ComputeStage,
    display::DisplayStage,
    foundation::error::{SnowError, SnowResult},
    surface::{PixelMemory, SharedSurface},
};

/// Where the orchestrator is within a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    AcquireCompute,
    Compute,
    Release,
    Advance,
    Display,
    Present,
    Stopping,
}

/// Source of the quit request, polled once at the top of every frame.
pub trait TerminationSignal {
    fn poll_termination(&mut self) -> bool;
}

impl<F: FnMut() -> bool> TerminationSignal for F {
    fn poll_termination(&mut self) -> bool {
        self()
    }
}

/// Requests termination after a fixed number of frames.
#[derive(Clone, Copy, Debug)]
pub struct FrameBudget {
    remaining: u64,
}

impl FrameBudget {
    pub fn new(frames: u64) -> Self {
        Self { remaining: frames }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl TerminationSignal for FrameBudget {
    fn poll_termination(&mut self) -> bool {
        if self.remaining == 0 {
            return true;
        }
        self.remaining -= 1;
        false
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameReport {
    pub index: u64,
    /// Clock value the kernel wrote this frame with.
    pub t: f32,
    pub warnings: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    /// Clock value the next frame would have used.
    pub final_t: f32,
    pub warnings: u64,
}

/// Drives one surface through compute-write, release, display and present,
/// strictly in that order, once per frame.
#[derive(Debug)]
pub struct FrameOrchestrator {
    clock: AnimationClock,
    phase: FramePhase,
    frames: u64,
    warnings: u64,
}

impl Default for FrameOrchestrator {
    fn default() -> Self {
        Self::new(AnimationClock::new())
    }
}

impl FrameOrchestrator {
    pub fn new(clock: AnimationClock) -> Self {
        Self {
            clock,
            phase: FramePhase::Idle,
            frames: 0,
            warnings: 0,
        }
    }

    pub fn clock(&self) -> &AnimationClock {
        &self.clock
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            frames: self.frames,
            final_t: self.clock.t(),
            warnings: self.warnings,
        }
    }

    fn enter(&mut self, phase: FramePhase) {
        tracing::trace!(frame = self.frames, ?phase, "frame phase");
        self.phase = phase;
    }

    /// Runs one complete frame. A frame that starts always reaches present
    /// unless a fatal error ends the session.
    pub fn run_frame<M, C, D>(
        &mut self,
        surface: &mut SharedSurface<M>,
        compute: &mut C,
        display: &mut D,
    ) -> SnowResult<FrameReport>
    where
        M: PixelMemory,
        C: ComputeStage<Memory = M>,
        D: DisplayStage<Memory = M>,
    {
        let index = self.frames;
        let t = self.clock.t();
        let mut warnings = 0u32;

        self.enter(FramePhase::AcquireCompute);
        let mut lease = surface.acquire_for_compute()?;

        self.enter(FramePhase::Compute);
        let fence = compute.write(&mut lease, t)?;
        let done = fence.wait()?;

        self.enter(FramePhase::Release);
        surface.release(lease, done)?;

        self.enter(FramePhase::Advance);
        self.clock.advance();

        self.enter(FramePhase::Display);
        let image = surface.display()?;
        self.tolerate(display.refresh(image), &mut warnings)?;
        self.tolerate(display.draw(), &mut warnings)?;

        self.enter(FramePhase::Present);
        self.tolerate(display.present(), &mut warnings)?;

        self.frames += 1;
        self.enter(FramePhase::Idle);
        tracing::debug!(frame = index, t, warnings, "frame presented");
        Ok(FrameReport { index, t, warnings })
    }

    /// Runs frames until `signal` asks to stop. The signal is checked only
    /// between frames.
    pub fn run<M, C, D>(
        &mut self,
        surface: &mut SharedSurface<M>,
        compute: &mut C,
        display: &mut D,
        signal: &mut dyn TerminationSignal,
    ) -> SnowResult<RunSummary>
    where
        M: PixelMemory,
        C: ComputeStage<Memory = M>,
        D: DisplayStage<Memory = M>,
    {
        loop {
            self.enter(FramePhase::Idle);
            if signal.poll_termination() {
                self.enter(FramePhase::Stopping);
                break;
            }
            if let Err(e) = self.run_frame(surface, compute, display) {
                tracing::error!(frame = self.frames, phase = ?self.phase, error = %e, "fatal frame error");
                return Err(e);
            }
        }
        let summary = self.summary();
        tracing::info!(frames = summary.frames, t = summary.final_t, "frame loop stopped");
        Ok(summary)
    }

    fn tolerate(&mut self, result: SnowResult<()>, warnings: &mut u32) -> SnowResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e @ SnowError::Presentation(_)) => {
                tracing::warn!(frame = self.frames, phase = ?self.phase, "{e}");
                *warnings += 1;
                self.warnings += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_budget_counts_down() {
        let mut b = FrameBudget::new(2);
        assert!(!b.poll_termination());
        assert!(!b.poll_termination());
        assert!(b.poll_termination());
        assert!(b.poll_termination());
        assert_eq!(b.remaining(), 0);
    }

    #[test]
    fn closures_are_signals() {
        let mut polls = 0;
        let mut sig = || {
            polls += 1;
            polls > 1
        };
        assert!(!sig.poll_termination());
        assert!(sig.poll_termination());
    }

    #[test]
    fn fresh_orchestrator_is_idle() {
        let o = FrameOrchestrator::default();
        assert_eq!(o.phase(), FramePhase::Idle);
        assert_eq!(o.summary(), RunSummary::default());
    }
}

use crate::{
    clock::AnimationClock,
    compute::ComputeStage,
    display::DisplayStage,
    foundation::{
        core::PixelLayout,
        error::{SetupStage, SnowError, SnowResult},
    },
    orchestrator::{FrameOrchestrator, FrameReport, RunSummary, TerminationSignal},
    surface::{PixelMemory, SharedSurface},
};

/// Lifecycle state. `Uninitialized` is the state while `Session::setup` is
/// still running; setup hands back a `Running` session or an error, so a
/// `Session` value is never observed `Uninitialized`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Running,
    ShuttingDown,
}

/// One visualization session: the shared surface plus the two stages that
/// take turns owning it.
///
/// Setup is all-or-nothing. If a step fails, everything created before it
/// is released again before the error is returned. Teardown runs exactly
/// once, either explicitly or when the session is dropped.
pub struct Session<C, D>
where
    C: ComputeStage,
    D: DisplayStage<Memory = C::Memory>,
{
    state: SessionState,
    surface: Option<SharedSurface<C::Memory>>,
    compute: C,
    display: D,
    orchestrator: FrameOrchestrator,
}

impl<C, D> Session<C, D>
where
    C: ComputeStage,
    D: DisplayStage<Memory = C::Memory>,
{
    /// Allocates the surface, registers it, sets up the kernel and
    /// configures the display, in that order.
    #[tracing::instrument(skip_all, fields(width = layout.width(), height = layout.height()))]
    pub fn setup<A>(
        layout: PixelLayout,
        allocate: A,
        mut compute: C,
        mut display: D,
    ) -> SnowResult<Self>
    where
        A: FnOnce(PixelLayout) -> SnowResult<C::Memory>,
    {
        let memory = allocate(layout).map_err(|e| fail(e, SetupStage::Surface))?;
        if memory.layout() != layout {
            let msg = format!(
                "allocated surface has layout {:?}, expected {layout:?}",
                memory.layout()
            );
            return Err(fail(SnowError::config(msg), SetupStage::Registration));
        }
        let surface = SharedSurface::register(memory);

        compute
            .setup(layout)
            .map_err(|e| fail(e, SetupStage::Compute))?;

        if let Err(e) = display.configure(layout) {
            drop(surface);
            compute.teardown();
            return Err(fail(e, SetupStage::Display));
        }

        tracing::info!(surface = surface.id(), "session running");
        Ok(Self {
            state: SessionState::Running,
            surface: Some(surface),
            compute,
            display,
            orchestrator: FrameOrchestrator::new(AnimationClock::new()),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn surface(&self) -> Option<&SharedSurface<C::Memory>> {
        self.surface.as_ref()
    }

    pub fn compute(&self) -> &C {
        &self.compute
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn clock(&self) -> &AnimationClock {
        self.orchestrator.clock()
    }

    pub fn orchestrator(&self) -> &FrameOrchestrator {
        &self.orchestrator
    }

    fn not_running(&self) -> SnowError {
        SnowError::Other(anyhow::anyhow!("session is {:?}, not running", self.state))
    }

    pub fn frame(&mut self) -> SnowResult<FrameReport> {
        if self.state != SessionState::Running {
            return Err(self.not_running());
        }
        let Some(surface) = self.surface.as_mut() else {
            return Err(SnowError::Other(anyhow::anyhow!("session has no surface")));
        };
        let result = self
            .orchestrator
            .run_frame(surface, &mut self.compute, &mut self.display);
        if result.is_err() {
            self.state = SessionState::ShuttingDown;
        }
        result
    }

    /// Runs frames until the signal fires or a fatal error occurs. Either
    /// way the session is shutting down afterwards.
    pub fn run(&mut self, signal: &mut dyn TerminationSignal) -> SnowResult<RunSummary> {
        if self.state != SessionState::Running {
            return Err(self.not_running());
        }
        let Some(surface) = self.surface.as_mut() else {
            return Err(SnowError::Other(anyhow::anyhow!("session has no surface")));
        };
        let result = self
            .orchestrator
            .run(surface, &mut self.compute, &mut self.display, signal);
        self.state = SessionState::ShuttingDown;
        result
    }

    /// Deregisters and frees the surface and tears the kernel down.
    pub fn teardown(&mut self) {
        let Some(surface) = self.surface.take() else {
            return;
        };
        self.state = SessionState::ShuttingDown;
        match surface.into_memory() {
            Ok(memory) => drop(memory),
            Err(e) => tracing::warn!(error = %e, "surface freed while still leased"),
        }
        self.compute.teardown();
        tracing::info!(frames = self.orchestrator.frames(), "session torn down");
    }
}

impl<C, D> Drop for Session<C, D>
where
    C: ComputeStage,
    D: DisplayStage<Memory = C::Memory>,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

fn fail(err: SnowError, stage: SetupStage) -> SnowError {
    let err = err.at_stage(stage);
    tracing::error!(error = %err, "session setup failed, releasing what was created");
    err
}

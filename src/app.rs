//! Wires the window, the GPU stages and the session into one run.

use crate::{
    config::SnowConfig,
    foundation::{
        core::PixelLayout,
        error::{SetupStage, SnowError, SnowResult},
    },
    gpu::{GpuContext, GpuDisplay, GpuKernel, GpuPixelBuffer},
    orchestrator::{FrameBudget, RunSummary, TerminationSignal},
    session::Session,
    window::WindowHost,
};

/// Stops on the window's quit request or, if set, once the frame budget is
/// spent.
struct Stop {
    host: WindowHost,
    budget: Option<FrameBudget>,
}

impl TerminationSignal for Stop {
    fn poll_termination(&mut self) -> bool {
        let quit = self.host.poll_termination();
        let spent = self
            .budget
            .as_mut()
            .is_some_and(|b| b.poll_termination());
        quit || spent
    }
}

/// Opens the window and runs the snow until a key press, a window close or
/// the configured frame count.
#[tracing::instrument(skip_all, fields(kernel = ?config.kernel))]
pub fn run(config: &SnowConfig) -> SnowResult<RunSummary> {
    config.validate()?;
    let host = WindowHost::open(config)?;
    let (ctx, output) = GpuContext::for_window(host.window()?)?;

    let layout = PixelLayout::aligned(config.width, config.height)?;
    let kernel = GpuKernel::new(&ctx, config.kernel);
    let size = host
        .inner_size()
        .ok_or_else(|| SnowError::setup(SetupStage::Output, "window not open"))?;
    let display = GpuDisplay::windowed(&ctx, output, size);
    let mut session = Session::setup(
        layout,
        |layout| GpuPixelBuffer::allocate(&ctx, layout),
        kernel,
        display,
    )?;

    let mut stop = Stop {
        host,
        budget: config.max_frames.map(FrameBudget::new),
    };
    let result = session.run(&mut stop);
    session.teardown();
    drop(session);
    result
}

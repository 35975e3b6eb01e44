#![forbid(unsafe_code)]

pub mod clock;
pub mod compute;
pub mod config;
pub mod display;
pub mod foundation;
pub mod orchestrator;
pub mod session;
pub mod surface;

#[cfg(feature = "window")]
pub mod app;
#[cfg(feature = "gpu")]
pub mod gpu;
#[cfg(feature = "window")]
pub mod window;

pub use clock::{AnimationClock, CLOCK_STEP};
pub use compute::{ClockPalette, ComputeStage, HostSnow, KernelProgram, palette_word, snow_texel};
pub use config::SnowConfig;
pub use display::{DisplayStage, HostDisplay};
pub use foundation::core::{PixelLayout, pack_bgra, unpack_bgra};
pub use foundation::error::{SetupStage, SnowError, SnowResult};
pub use orchestrator::{
    FrameBudget, FrameOrchestrator, FramePhase, FrameReport, RunSummary, TerminationSignal,
};
pub use session::{Session, SessionState};
pub use surface::{
    ComputeOwned, DisplayOwned, HostPixels, Owner, PixelMemory, SharedSurface, WriteComplete,
    WriteFence,
};

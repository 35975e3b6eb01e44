//! Native output window, driven by pumping winit from the frame loop so the
//! orchestrator keeps ownership of its own loop.

use std::{sync::Arc, time::Duration};

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    monitor::VideoModeHandle,
    window::{Fullscreen, Window, WindowId},
};

use crate::{
    config::SnowConfig,
    foundation::error::{SetupStage, SnowError, SnowResult},
    orchestrator::TerminationSignal,
};

/// Pumps allowed before giving up on the window reaching its size.
const OPEN_ATTEMPTS: u32 = 1000;
const OPEN_PUMP_TIMEOUT: Duration = Duration::from_millis(5);

/// Index of the mode of exactly `size` with the highest refresh rate.
/// Modes are `(width, height, refresh_millihertz)`.
fn pick_video_mode(modes: &[(u32, u32, u32)], size: (u32, u32)) -> Option<usize> {
    modes
        .iter()
        .enumerate()
        .filter(|(_, m)| (m.0, m.1) == size)
        .max_by_key(|(_, m)| m.2)
        .map(|(i, _)| i)
}

/// Exclusive fullscreen mode matching the surface size, so the output is
/// switched to the surface resolution instead of stretched to the monitor.
fn exclusive_mode(
    event_loop: &ActiveEventLoop,
    size: (u32, u32),
) -> Result<VideoModeHandle, String> {
    let monitor = event_loop
        .primary_monitor()
        .or_else(|| event_loop.available_monitors().next())
        .ok_or_else(|| "no monitor for fullscreen output".to_string())?;
    let modes: Vec<VideoModeHandle> = monitor.video_modes().collect();
    let dims: Vec<(u32, u32, u32)> = modes
        .iter()
        .map(|m| (m.size().width, m.size().height, m.refresh_rate_millihertz()))
        .collect();
    let idx = pick_video_mode(&dims, size)
        .ok_or_else(|| format!("monitor has no {}x{} video mode", size.0, size.1))?;
    Ok(modes[idx].clone())
}

struct HostState {
    config: SnowConfig,
    window: Option<Arc<Window>>,
    open_error: Option<String>,
    quit: bool,
}

impl ApplicationHandler for HostState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Poll);
        if self.window.is_some() {
            return;
        }
        let mut attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height))
            .with_resizable(false);
        if self.config.fullscreen {
            match exclusive_mode(event_loop, (self.config.width, self.config.height)) {
                Ok(mode) => {
                    tracing::info!(
                        width = mode.size().width,
                        height = mode.size().height,
                        refresh_mhz = mode.refresh_rate_millihertz(),
                        "exclusive fullscreen"
                    );
                    attrs = attrs.with_fullscreen(Some(Fullscreen::Exclusive(mode)));
                }
                Err(msg) => {
                    self.open_error = Some(msg);
                    return;
                }
            }
        }
        match event_loop.create_window(attrs) {
            Ok(window) => {
                window.set_cursor_visible(false);
                self.window = Some(Arc::new(window));
            }
            Err(e) => self.open_error = Some(e.to_string()),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                tracing::info!("window closed");
                self.quit = true;
            }
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                tracing::info!(key = ?event.logical_key, "key pressed, stopping");
                self.quit = true;
            }
            _ => {}
        }
    }
}

/// Owns the event loop and the output window.
pub struct WindowHost {
    event_loop: EventLoop<()>,
    state: HostState,
}

impl WindowHost {
    /// Creates the event loop and pumps it until the window exists at the
    /// configured inner size.
    #[tracing::instrument(skip_all, fields(width = config.width, height = config.height))]
    pub fn open(config: &SnowConfig) -> SnowResult<Self> {
        let event_loop = EventLoop::new().map_err(|e| {
            SnowError::setup(SetupStage::Output, format!("create event loop: {e}"))
        })?;
        let mut host = Self {
            event_loop,
            state: HostState {
                config: config.clone(),
                window: None,
                open_error: None,
                quit: false,
            },
        };

        let want = (config.width, config.height);
        for _ in 0..OPEN_ATTEMPTS {
            host.pump(OPEN_PUMP_TIMEOUT);
            if let Some(msg) = host.state.open_error.take() {
                return Err(SnowError::setup(
                    SetupStage::Output,
                    format!("create window: {msg}"),
                ));
            }
            if host.state.window.is_some() && host.inner_size() == Some(want) {
                tracing::info!(title = %config.title, fullscreen = config.fullscreen, "window open");
                return Ok(host);
            }
            if host.state.quit {
                break;
            }
        }
        match host.inner_size() {
            Some((w, h)) => Err(SnowError::setup(
                SetupStage::Output,
                format!("window is {w}x{h}, expected {}x{}", want.0, want.1),
            )),
            None => Err(SnowError::setup(SetupStage::Output, "window was never created")),
        }
    }

    /// Inner size of the window in physical pixels.
    pub fn inner_size(&self) -> Option<(u32, u32)> {
        let size = self.state.window.as_ref()?.inner_size();
        Some((size.width, size.height))
    }

    pub fn window(&self) -> SnowResult<Arc<Window>> {
        self.state
            .window
            .clone()
            .ok_or_else(|| SnowError::setup(SetupStage::Output, "window not open"))
    }

    pub fn quit_requested(&self) -> bool {
        self.state.quit
    }

    fn pump(&mut self, timeout: Duration) {
        if let PumpStatus::Exit(code) = self
            .event_loop
            .pump_app_events(Some(timeout), &mut self.state)
        {
            tracing::debug!(code, "event loop exited");
            self.state.quit = true;
        }
    }
}

impl TerminationSignal for WindowHost {
    fn poll_termination(&mut self) -> bool {
        self.pump(Duration::ZERO);
        self.state.quit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_mode_must_match_exactly() {
        let modes = [(2560, 1440, 60_000), (1920, 1080, 60_000), (1920, 1080, 144_000)];
        assert_eq!(pick_video_mode(&modes, (1920, 1080)), Some(2));
        assert_eq!(pick_video_mode(&modes, (1280, 720)), None);
        assert_eq!(pick_video_mode(&[], (1920, 1080)), None);
    }
}

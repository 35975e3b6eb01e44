use std::{cell::RefCell, rc::Rc};

use snowfield::{
    ClockPalette, ComputeOwned, ComputeStage, DisplayOwned, DisplayStage, FrameBudget,
    FrameOrchestrator, HostDisplay, HostPixels, HostSnow, PixelLayout, Session, SessionState,
    SharedSurface, SnowError, SnowResult, WriteFence, pack_bgra, snow_texel,
};

fn host_session<C>(w: u32, h: u32, compute: C) -> Session<C, HostDisplay>
where
    C: ComputeStage<Memory = HostPixels>,
{
    Session::setup(
        PixelLayout::tight(w, h).unwrap(),
        |l| Ok(HostPixels::allocate(l)),
        compute,
        HostDisplay::new(),
    )
    .unwrap()
}

fn solid(w: u32, h: u32, word: u32) -> Vec<u8> {
    word.to_le_bytes().repeat((w * h) as usize)
}

#[test]
fn palette_shows_red_then_green() {
    let mut s = host_session(2, 2, ClockPalette::new());

    let first = s.frame().unwrap();
    assert_eq!(first.index, 0);
    assert_eq!(first.t, 0.0);
    let red = solid(2, 2, pack_bgra(255, 0, 0, 255));
    assert_eq!(s.display().sampled_image(), red.as_slice());
    assert_eq!(s.display().presented(), Some(red.as_slice()));
    assert!((s.clock().t() - 0.1).abs() < 1e-6);

    let second = s.frame().unwrap();
    assert!((second.t - 0.1).abs() < 1e-6);
    let green = solid(2, 2, pack_bgra(0, 255, 0, 255));
    assert_eq!(s.display().presented(), Some(green.as_slice()));
    assert_eq!(s.display().presented_frames(), 2);
}

#[test]
fn displayed_image_is_what_the_kernel_wrote() {
    let (w, h) = (7u32, 5u32);
    let mut s = host_session(w, h, HostSnow::new());
    s.frame().unwrap();

    let written = s.surface().unwrap().display().unwrap().memory().to_tight_vec();
    assert_eq!(s.display().sampled_image(), written.as_slice());

    let mut expected = Vec::new();
    for y in 0..h {
        for x in 0..w {
            expected.extend_from_slice(&snow_texel(x, y, 0.0).to_le_bytes());
        }
    }
    assert_eq!(written, expected);

    // Buffer row 0 is shown at the bottom of the output.
    let out = s.display().presented().unwrap();
    let row = (w * 4) as usize;
    for y in 0..h as usize {
        let src = (h as usize - 1 - y) * row;
        assert_eq!(&out[y * row..(y + 1) * row], &written[src..src + row]);
    }
}

#[test]
fn clock_advances_once_per_frame() {
    let mut s = host_session(1, 1, ClockPalette::new());
    let mut ts = Vec::new();
    for _ in 0..30 {
        ts.push(s.frame().unwrap().t);
    }
    for (i, t) in ts.iter().enumerate() {
        assert!((t - i as f32 * 0.1).abs() < 1e-4, "frame {i} used t={t}");
    }
    assert_eq!(s.clock().ticks(), 30);
}

type Log = Rc<RefCell<Vec<String>>>;

struct RecordingCompute(Log);

impl ComputeStage for RecordingCompute {
    type Memory = HostPixels;

    fn setup(&mut self, _layout: PixelLayout) -> SnowResult<()> {
        self.0.borrow_mut().push("setup".into());
        Ok(())
    }

    fn write(&mut self, target: &mut ComputeOwned<HostPixels>, t: f32) -> SnowResult<WriteFence> {
        target.memory_mut().fill(t.to_bits());
        self.0.borrow_mut().push(format!("write {t:.1}"));
        Ok(WriteFence::Complete)
    }

    fn teardown(&mut self) {
        self.0.borrow_mut().push("teardown".into());
    }
}

struct RecordingDisplay {
    log: Log,
    fail_present_on: Option<usize>,
    presents: usize,
}

impl RecordingDisplay {
    fn new(log: Log) -> Self {
        Self {
            log,
            fail_present_on: None,
            presents: 0,
        }
    }
}

impl DisplayStage for RecordingDisplay {
    type Memory = HostPixels;

    fn configure(&mut self, _layout: PixelLayout) -> SnowResult<()> {
        self.log.borrow_mut().push("configure".into());
        Ok(())
    }

    fn refresh(&mut self, surface: &DisplayOwned<HostPixels>) -> SnowResult<()> {
        let word = surface.memory().get(0, 0).unwrap_or_default();
        self.log
            .borrow_mut()
            .push(format!("refresh {:.1}", f32::from_bits(word)));
        Ok(())
    }

    fn draw(&mut self) -> SnowResult<()> {
        self.log.borrow_mut().push("draw".into());
        Ok(())
    }

    fn present(&mut self) -> SnowResult<()> {
        let n = self.presents;
        self.presents += 1;
        if self.fail_present_on == Some(n) {
            return Err(SnowError::presentation("output lost"));
        }
        self.log.borrow_mut().push("present".into());
        Ok(())
    }
}

#[test]
fn frame_steps_run_in_order() {
    let log: Log = Rc::default();
    let mut s = Session::setup(
        PixelLayout::tight(3, 3).unwrap(),
        |l| Ok(HostPixels::allocate(l)),
        RecordingCompute(log.clone()),
        RecordingDisplay::new(log.clone()),
    )
    .unwrap();
    let summary = s.run(&mut FrameBudget::new(2)).unwrap();
    s.teardown();

    assert_eq!(summary.frames, 2);
    assert_eq!(
        *log.borrow(),
        [
            "setup",
            "configure",
            "write 0.0",
            "refresh 0.0",
            "draw",
            "present",
            "write 0.1",
            "refresh 0.1",
            "draw",
            "present",
            "teardown",
        ]
    );
}

#[test]
fn presentation_failures_do_not_stop_the_loop() {
    let log: Log = Rc::default();
    let mut display = RecordingDisplay::new(log.clone());
    display.fail_present_on = Some(1);
    let mut s = Session::setup(
        PixelLayout::tight(1, 1).unwrap(),
        |l| Ok(HostPixels::allocate(l)),
        RecordingCompute(log.clone()),
        display,
    )
    .unwrap();

    let summary = s.run(&mut FrameBudget::new(3)).unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.warnings, 1);
    assert_eq!(
        log.borrow().iter().filter(|e| *e == "present").count(),
        2
    );
}

#[test]
fn termination_before_the_first_frame_presents_nothing() {
    let mut s = host_session(4, 4, ClockPalette::new());
    let summary = s.run(&mut || true).unwrap();

    assert_eq!(summary.frames, 0);
    assert_eq!(summary.final_t, 0.0);
    assert_eq!(s.display().presented_frames(), 0);
    assert_eq!(s.compute().writes(), 0);
    assert_eq!(s.state(), SessionState::ShuttingDown);

    s.teardown();
    assert!(s.surface().is_none());
}

#[test]
fn quit_between_frames_finishes_the_current_frame() {
    let mut s = host_session(2, 1, ClockPalette::new());
    let mut polls = 0;
    let summary = s
        .run(&mut || {
            polls += 1;
            polls > 4
        })
        .unwrap();
    assert_eq!(summary.frames, 4);
    assert_eq!(s.display().presented_frames(), 4);
    assert_eq!(s.compute().writes(), 4);
}

#[test]
fn orchestrator_drives_a_bare_surface() {
    let layout = PixelLayout::aligned(3, 2).unwrap();
    let mut surface = SharedSurface::register(HostPixels::allocate(layout));
    let mut compute = ClockPalette::new();
    let mut display = HostDisplay::new();
    compute.setup(layout).unwrap();
    display.configure(layout).unwrap();

    let mut o = FrameOrchestrator::default();
    for _ in 0..3 {
        o.run_frame(&mut surface, &mut compute, &mut display).unwrap();
    }
    assert_eq!(surface.transfers(), 3);
    let blue = solid(3, 2, pack_bgra(0, 0, 255, 255));
    assert_eq!(display.presented(), Some(blue.as_slice()));
}

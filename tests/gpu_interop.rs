#[cfg(feature = "gpu")]
mod gpu_interop {
    use snowfield::{
        DisplayStage, FrameBudget, KernelProgram, PixelLayout, Session, SharedSurface, SnowError,
        gpu::{GpuContext, GpuDisplay, GpuKernel, GpuPixelBuffer, read_surface},
        pack_bgra, snow_texel,
    };

    fn context() -> Option<GpuContext> {
        match GpuContext::headless() {
            Ok(ctx) => Some(ctx),
            Err(e) if e.to_string().contains("no gpu adapter available") => None,
            Err(e) => panic!("{e}"),
        }
    }

    fn session(
        ctx: &GpuContext,
        w: u32,
        h: u32,
        program: KernelProgram,
    ) -> Session<GpuKernel, GpuDisplay> {
        Session::setup(
            PixelLayout::aligned(w, h).unwrap(),
            |l| GpuPixelBuffer::allocate(ctx, l),
            GpuKernel::new(ctx, program),
            GpuDisplay::offscreen(ctx),
        )
        .unwrap()
    }

    fn flipped(image: &[u8], w: u32, h: u32) -> Vec<u8> {
        let row = (w * 4) as usize;
        (0..h as usize)
            .rev()
            .flat_map(|y| image[y * row..(y + 1) * row].iter().copied())
            .collect()
    }

    #[test]
    fn palette_frames_reach_the_sampled_image_unchanged() {
        let Some(ctx) = context() else {
            return;
        };
        let (w, h) = (33u32, 17u32);
        let mut s = session(&ctx, w, h, KernelProgram::Palette);

        for word in [pack_bgra(255, 0, 0, 255), pack_bgra(0, 255, 0, 255)] {
            s.frame().unwrap();
            let expected = word.to_le_bytes().repeat((w * h) as usize);
            let written = read_surface(&ctx, s.surface().unwrap().display().unwrap()).unwrap();
            assert_eq!(written, expected);
            assert_eq!(s.display().read_sampled_image().unwrap(), expected);
            assert_eq!(s.display().read_output().unwrap(), expected);
        }
        assert_eq!(s.display().presented_frames(), 2);
    }

    #[test]
    fn gpu_snow_matches_the_host_hash() {
        let Some(ctx) = context() else {
            return;
        };
        let (w, h) = (40u32, 24u32);
        let mut s = session(&ctx, w, h, KernelProgram::Snow);
        s.run(&mut FrameBudget::new(3)).unwrap();

        // Third frame wrote with t = 2 * step.
        let t = (2.0f64 * f64::from(0.1f32)) as f32;
        let mut expected = Vec::new();
        for y in 0..h {
            for x in 0..w {
                expected.extend_from_slice(&snow_texel(x, y, t).to_le_bytes());
            }
        }
        let written = read_surface(&ctx, s.surface().unwrap().display().unwrap()).unwrap();
        assert_eq!(written, expected);
    }

    #[test]
    fn output_shows_buffer_row_zero_at_the_bottom() {
        let Some(ctx) = context() else {
            return;
        };
        let (w, h) = (16u32, 9u32);
        let mut s = session(&ctx, w, h, KernelProgram::Snow);
        s.frame().unwrap();

        let image = s.display().read_sampled_image().unwrap();
        let output = s.display().read_output().unwrap();
        assert_eq!(output, flipped(&image, w, h));
    }

    #[test]
    fn upload_from_a_destroyed_buffer_is_a_fatal_gpu_error() {
        let Some(ctx) = context() else {
            return;
        };
        let layout = PixelLayout::aligned(16, 16).unwrap();
        let surface = SharedSurface::register(GpuPixelBuffer::allocate(&ctx, layout).unwrap());
        let mut display = GpuDisplay::offscreen(&ctx);
        display.configure(layout).unwrap();

        let image = surface.display().unwrap();
        image.memory().buffer().destroy();
        let err = display.refresh(image).unwrap_err();
        assert!(matches!(err, SnowError::Gpu(_)), "{err}");
        assert!(err.is_fatal());
    }

    #[test]
    fn dispatch_into_a_destroyed_buffer_ends_the_session() {
        let Some(ctx) = context() else {
            return;
        };
        let mut s = session(&ctx, 16, 16, KernelProgram::Snow);
        s.surface()
            .unwrap()
            .display()
            .unwrap()
            .memory()
            .buffer()
            .destroy();

        let err = s.frame().unwrap_err();
        assert!(matches!(err, SnowError::Gpu(_)), "{err}");
        assert_eq!(s.display().presented_frames(), 0);
    }
}

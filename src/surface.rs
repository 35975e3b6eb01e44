//! The shared pixel surface and its single-owner protocol.
//!
//! The surface's memory is always held by exactly one of two handles:
//! [`ComputeOwned`] while a kernel writes it, [`DisplayOwned`] while the
//! display samples it. Each transfer consumes one handle and produces the
//! other, so a stale writer cannot outlive its lease. Handing the surface
//! back to the display additionally requires a [`WriteComplete`] token,
//! which only [`WriteFence::wait`] produces: a frame cannot be displayed
//! before the compute work that wrote it has finished.
//!
//! [`SharedSurface`] is the session-side slot that tracks the owner at
//! runtime and turns an out-of-order acquire into a detectable, fatal
//! [`SnowError::Ownership`].

use std::sync::atomic::{AtomicU64, Ordering};

use crate::foundation::{
    core::{BYTES_PER_PIXEL, PixelLayout},
    error::{SnowError, SnowResult},
};

/// Backing storage of a pixel surface. Allocated once, never resized.
pub trait PixelMemory {
    fn layout(&self) -> PixelLayout;
}

/// Host-resident pixel memory, used by the CPU fallback path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostPixels {
    layout: PixelLayout,
    bytes: Vec<u8>,
}

impl HostPixels {
    pub fn allocate(layout: PixelLayout) -> Self {
        Self {
            layout,
            bytes: vec![0; layout.byte_len()],
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Visible bytes of row `y` (padding excluded).
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.layout.row_pitch() as usize;
        &self.bytes[start..start + self.layout.row_bytes()]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.layout.row_pitch() as usize;
        let len = self.layout.row_bytes();
        &mut self.bytes[start..start + len]
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        let off = self.layout.texel_offset(x, y)?;
        let px: [u8; 4] = self.bytes[off..off + 4].try_into().ok()?;
        Some(u32::from_le_bytes(px))
    }

    pub fn put(&mut self, x: u32, y: u32, word: u32) -> bool {
        let Some(off) = self.layout.texel_offset(x, y) else {
            return false;
        };
        self.bytes[off..off + 4].copy_from_slice(&word.to_le_bytes());
        true
    }

    pub fn fill(&mut self, word: u32) {
        let px = word.to_le_bytes();
        for y in 0..self.layout.height() {
            for chunk in self.row_mut(y).chunks_exact_mut(BYTES_PER_PIXEL as usize) {
                chunk.copy_from_slice(&px);
            }
        }
    }

    /// Visible pixels with rows packed back to back.
    pub fn to_tight_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.layout.pixel_count() * BYTES_PER_PIXEL as usize);
        for y in 0..self.layout.height() {
            out.extend_from_slice(self.row(y));
        }
        out
    }
}

impl PixelMemory for HostPixels {
    fn layout(&self) -> PixelLayout {
        self.layout
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Owner {
    Compute,
    Display,
}

/// The surface while a compute kernel holds it. Only this handle grants
/// mutable access to the memory.
#[derive(Debug)]
pub struct ComputeOwned<M> {
    surface_id: u64,
    memory: M,
}

impl<M: PixelMemory> ComputeOwned<M> {
    pub fn layout(&self) -> PixelLayout {
        self.memory.layout()
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    pub fn surface_id(&self) -> u64 {
        self.surface_id
    }

    /// Hands the surface to the display once the write is known complete.
    pub fn release(self, _done: WriteComplete) -> DisplayOwned<M> {
        DisplayOwned {
            surface_id: self.surface_id,
            memory: self.memory,
        }
    }
}

/// The surface while the display holds it: read-only.
#[derive(Debug)]
pub struct DisplayOwned<M> {
    surface_id: u64,
    memory: M,
}

impl<M: PixelMemory> DisplayOwned<M> {
    pub fn layout(&self) -> PixelLayout {
        self.memory.layout()
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn surface_id(&self) -> u64 {
        self.surface_id
    }

    pub fn acquire_for_compute(self) -> ComputeOwned<M> {
        ComputeOwned {
            surface_id: self.surface_id,
            memory: self.memory,
        }
    }
}

/// Proof that every write issued against a compute lease has finished.
#[derive(Debug)]
pub struct WriteComplete {
    _private: (),
}

/// Completion handle returned by a compute write.
#[must_use = "a write fence must be waited on before the surface is released"]
#[derive(Debug)]
pub enum WriteFence {
    /// The write already happened synchronously.
    Complete,
    /// The write was submitted to a GPU queue.
    #[cfg(feature = "gpu")]
    Gpu {
        device: wgpu::Device,
        submission: wgpu::SubmissionIndex,
    },
}

impl WriteFence {
    /// Blocks until the fenced work is done.
    pub fn wait(self) -> SnowResult<WriteComplete> {
        match self {
            Self::Complete => {}
            #[cfg(feature = "gpu")]
            Self::Gpu { device, submission } => {
                device
                    .poll(wgpu::PollType::Wait {
                        submission_index: Some(submission),
                        timeout: None,
                    })
                    .map_err(|e| SnowError::gpu(format!("compute fence wait failed: {e:?}")))?;
            }
        }
        Ok(WriteComplete { _private: () })
    }
}

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Session-side slot for one registered surface.
#[derive(Debug)]
pub struct SharedSurface<M> {
    id: u64,
    layout: PixelLayout,
    slot: Option<DisplayOwned<M>>,
    transfers: u64,
}

impl<M: PixelMemory> SharedSurface<M> {
    /// Registers freshly allocated memory for cross-domain use. The
    /// surface starts out display-owned; nothing has been written yet.
    pub fn register(memory: M) -> Self {
        let id = NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed);
        let layout = memory.layout();
        tracing::debug!(
            surface = id,
            width = layout.width(),
            height = layout.height(),
            row_pitch = layout.row_pitch(),
            "registered pixel surface"
        );
        Self {
            id,
            layout,
            slot: Some(DisplayOwned {
                surface_id: id,
                memory,
            }),
            transfers: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn owner(&self) -> Owner {
        if self.slot.is_some() {
            Owner::Display
        } else {
            Owner::Compute
        }
    }

    /// Number of completed compute-to-display hand-overs.
    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    pub fn acquire_for_compute(&mut self) -> SnowResult<ComputeOwned<M>> {
        match self.slot.take() {
            Some(display) => Ok(display.acquire_for_compute()),
            None => {
                tracing::error!(surface = self.id, "acquire while compute holds the surface");
                Err(SnowError::ownership(format!(
                    "surface #{} is already owned by compute",
                    self.id
                )))
            }
        }
    }

    pub fn release(&mut self, lease: ComputeOwned<M>, done: WriteComplete) -> SnowResult<()> {
        if lease.surface_id != self.id {
            return Err(SnowError::ownership(format!(
                "lease for surface #{} released into surface #{}",
                lease.surface_id, self.id
            )));
        }
        if self.slot.is_some() {
            return Err(SnowError::ownership(format!(
                "surface #{} released while already display-owned",
                self.id
            )));
        }
        self.slot = Some(lease.release(done));
        self.transfers += 1;
        Ok(())
    }

    pub fn display(&self) -> SnowResult<&DisplayOwned<M>> {
        self.slot.as_ref().ok_or_else(|| {
            SnowError::ownership(format!(
                "display read of surface #{} while compute holds it",
                self.id
            ))
        })
    }

    /// Deregisters the surface and returns its memory for freeing.
    pub fn into_memory(self) -> SnowResult<M> {
        match self.slot {
            Some(display) => {
                tracing::debug!(surface = self.id, "deregistered pixel surface");
                Ok(display.memory)
            }
            None => Err(SnowError::ownership(format!(
                "surface #{} deregistered while compute holds it",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::{OPAQUE_GREEN, OPAQUE_RED};

    fn host(w: u32, h: u32) -> HostPixels {
        HostPixels::allocate(PixelLayout::tight(w, h).unwrap())
    }

    #[test]
    fn starts_display_owned() {
        let s = SharedSurface::register(host(4, 4));
        assert_eq!(s.owner(), Owner::Display);
        assert_eq!(s.transfers(), 0);
        assert!(s.display().is_ok());
    }

    #[test]
    fn acquire_release_toggles_owner() {
        let mut s = SharedSurface::register(host(4, 4));
        let mut lease = s.acquire_for_compute().unwrap();
        assert_eq!(s.owner(), Owner::Compute);
        assert!(s.display().is_err());

        lease.memory_mut().fill(OPAQUE_RED);
        let done = WriteFence::Complete.wait().unwrap();
        s.release(lease, done).unwrap();

        assert_eq!(s.owner(), Owner::Display);
        assert_eq!(s.transfers(), 1);
        assert_eq!(s.display().unwrap().memory().get(3, 3), Some(OPAQUE_RED));
    }

    #[test]
    fn double_acquire_is_detected_and_leaves_slot_alone() {
        let mut s = SharedSurface::register(host(2, 2));
        let lease = s.acquire_for_compute().unwrap();
        let err = s.acquire_for_compute().unwrap_err();
        assert!(matches!(err, SnowError::Ownership(_)));
        assert!(err.is_fatal());
        assert_eq!(s.owner(), Owner::Compute);

        s.release(lease, WriteFence::Complete.wait().unwrap())
            .unwrap();
        assert_eq!(s.owner(), Owner::Display);
    }

    #[test]
    fn foreign_lease_is_rejected() {
        let mut a = SharedSurface::register(host(2, 2));
        let mut b = SharedSurface::register(host(2, 2));
        let _a_lease = a.acquire_for_compute().unwrap();
        let b_lease = b.acquire_for_compute().unwrap();
        let err = a
            .release(b_lease, WriteFence::Complete.wait().unwrap())
            .unwrap_err();
        assert!(matches!(err, SnowError::Ownership(_)));
    }

    #[test]
    fn memory_is_never_reallocated() {
        let mut s = SharedSurface::register(host(8, 8));
        let before = s.display().unwrap().memory().bytes().as_ptr();
        for _ in 0..3 {
            let mut lease = s.acquire_for_compute().unwrap();
            lease.memory_mut().fill(OPAQUE_GREEN);
            s.release(lease, WriteFence::Complete.wait().unwrap())
                .unwrap();
        }
        assert_eq!(s.display().unwrap().memory().bytes().as_ptr(), before);
        assert_eq!(s.transfers(), 3);
    }

    #[test]
    fn deregister_refuses_while_leased() {
        let mut s = SharedSurface::register(host(2, 2));
        let _lease = s.acquire_for_compute().unwrap();
        assert!(s.into_memory().is_err());

        let s = SharedSurface::register(host(2, 2));
        assert_eq!(s.into_memory().unwrap().bytes().len(), 16);
    }

    #[test]
    fn host_fill_skips_row_padding() {
        let mut px = HostPixels::allocate(PixelLayout::with_pitch(2, 2, 16).unwrap());
        px.fill(OPAQUE_RED);
        assert_eq!(&px.bytes()[8..16], &[0u8; 8]);
        assert_eq!(px.to_tight_vec().len(), 16);
        assert!(
            px.to_tight_vec()
                .chunks_exact(4)
                .all(|c| c == OPAQUE_RED.to_le_bytes())
        );
    }
}

//! wgpu realisation of the surface, the kernels and the display.

pub mod buffer;
pub mod context;
pub mod display;
pub mod kernel;
mod readback;

pub use buffer::GpuPixelBuffer;
pub use context::GpuContext;
pub use display::GpuDisplay;
pub use kernel::GpuKernel;
pub use readback::read_surface;

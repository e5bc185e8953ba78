//! Vulkan compositing backend for the NovaDE X11 compositor.
//!
//! Window contents arrive as X pixmaps and are imported either zero-copy
//! through DRI3 dma-bufs or through a shared-memory staging buffer. All
//! drawing for a frame is recorded into one command buffer guarded by one
//! fence, and [`VulkanBackend::present`] submits it and flips the
//! presentation ring.

mod arena;
mod backend;
mod command;
mod compositing;
mod config;
mod descriptor;
mod device;
mod error;
mod image;
mod instance;
mod layout;
mod memory;
mod pipeline;
mod presentation;
mod region;
mod shader;
mod shm;
mod surface;
mod window_system;

pub use arena::ImageHandle;
pub use backend::{BlurContext, VulkanBackend};
pub use compositing::{BlitArgs, Color};
pub use config::BackendConfig;
pub use device::ImportStrategy;
pub use error::{BackendError, Result};
pub use image::{ImageFormat, COLOR_FORMAT};
pub use layout::ImageLayout;
pub use presentation::{BufferAges, MAX_BUFFER_AGE};
pub use region::{Rect, Region};
pub use shader::{ShaderCompiler, ShaderSource, ShaderStage};
pub use window_system::{
    create_xcb_surface, xcb_presentation_support, Geometry, PixmapBuffers, PixmapId, PlaneLayout,
    ShmSegmentId, VisualInfo, WindowId, WindowSystem, WindowSystemExtensions,
};

//! The backend context and its public operations.

use tracing::{debug, error, info, warn};

use crate::arena::{Arena, ImageHandle};
use crate::command::CommandBatch;
use crate::compositing::{self, BlitArgs, Color};
use crate::config::BackendConfig;
use crate::descriptor::SamplerBindings;
use crate::device::{self, ImportFns, ImportStrategy, LogicalDevice};
use crate::error::Result;
use crate::image::{self, Image, ImageFactory, ImageFormat};
use crate::instance::VulkanInstance;
use crate::layout::{record_transition, ImageLayout};
use crate::pipeline::RenderPipelines;
use crate::presentation::{Swapchain, SwapchainSettings, MAX_BUFFER_AGE};
use crate::region::Region;
use crate::shader::ShaderCompiler;
use crate::surface::PresentSurface;
use crate::window_system::{PixmapId, VisualInfo, WindowId, WindowSystem};

/// Handle for blur state. Blurring is done elsewhere, so every context is the
/// same sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlurContext(());

impl BlurContext {
    pub const SENTINEL: BlurContext = BlurContext(());
}

/// A Vulkan rendering backend presenting to one X window.
///
/// Every operation takes `&mut self`; the backend is meant to be driven from
/// the compositor's main loop.
pub struct VulkanBackend<W: WindowSystem> {
    // Fields drop in declaration order. Everything below `images` depends on
    // the device, which depends on the surface and the instance.
    images: Arena<Image>,
    swapchain: Option<Swapchain>,
    pipelines: RenderPipelines,
    batch: CommandBatch,
    bindings: SamplerBindings,
    device: LogicalDevice,
    surface: PresentSurface,
    instance: VulkanInstance,
    window_system: W,
    window: WindowId,
    config: BackendConfig,
}

impl<W: WindowSystem> VulkanBackend<W> {
    /// Brings up the whole backend for `window`.
    ///
    /// Fails if no device supports an import strategy the X server allows,
    /// or if any Vulkan object cannot be created. Whatever was created before
    /// the failure is released.
    pub fn new<C: ShaderCompiler + ?Sized>(
        config: BackendConfig,
        window_system: W,
        window: WindowId,
        shader_compiler: &C,
    ) -> Result<Self> {
        config.validate()?;

        let instance = VulkanInstance::new(&config, &window_system.surface_extensions())?;
        let raw_surface = window_system.create_surface(&instance.entry, &instance.instance, window)?;
        let surface = PresentSurface::new(&instance.entry, &instance.instance, raw_surface);

        let choice =
            device::select_physical_device(&instance.entry, &instance.instance, &surface, &window_system)?;
        let device = LogicalDevice::new(&instance.instance, &choice)?;

        let bindings = SamplerBindings::new(device.device.clone(), config.descriptor_pool_capacity)?;
        let batch = CommandBatch::new(device.device.clone(), device.queue, device.queue_family)?;
        let pipelines = RenderPipelines::new(device.device.clone(), shader_compiler, bindings.set_layout)?;

        let geometry = window_system.window_geometry(window)?;
        let mut images = Arena::new();
        let swapchain = {
            let factory = ImageFactory {
                device: &device.device,
                memory_properties: &device.memory_properties,
                bindings: &bindings,
            };
            Swapchain::new(
                &instance.instance,
                device.device.clone(),
                &surface,
                &SwapchainSettings { physical_device: device.physical_device, vsync: config.vsync },
                u32::from(geometry.width),
                u32::from(geometry.height),
                ash::vk::SwapchainKHR::null(),
                &factory,
                &mut images,
            )?
        };

        info!(strategy = ?device.import.strategy(), window = window.0, "Vulkan backend initialized");
        Ok(Self {
            images,
            swapchain: Some(swapchain),
            pipelines,
            batch,
            bindings,
            device,
            surface,
            instance,
            window_system,
            window,
            config,
        })
    }

    /// Tears the backend down. Equivalent to dropping it.
    pub fn deinit(self) {
        drop(self);
    }

    pub fn import_strategy(&self) -> ImportStrategy {
        self.device.import.strategy()
    }

    pub fn window_system(&self) -> &W {
        &self.window_system
    }

    fn swapchain(&self) -> &Swapchain {
        match &self.swapchain {
            Some(swapchain) => swapchain,
            None => panic!("backend has no swapchain; the last resize failed"),
        }
    }

    fn image_factory(&self) -> ImageFactory<'_> {
        ImageFactory {
            device: &self.device.device,
            memory_properties: &self.device.memory_properties,
            bindings: &self.bindings,
        }
    }

    /// Opens the frame's command batch. Waits for the previous frame's
    /// submission to finish.
    pub fn prepare(&mut self, damage_hint: Option<&Region>) {
        if let Some(damage) = damage_hint {
            debug!(rects = damage.rects().len(), "Preparing frame");
        }
        if let Err(e) = self.batch.ensure_open() {
            error!("Failed to open command batch: {e}");
        }
    }

    fn assert_drawable(&self, dest: ImageHandle) {
        assert!(
            !self.images.get(dest).is_imported(),
            "pixmap images cannot be rendered into"
        );
    }

    /// Draws `args.source` into `dest` with its top-left corner at `origin`,
    /// limited to `args.target_mask`.
    pub fn blit(&mut self, origin: (i32, i32), dest: ImageHandle, args: &BlitArgs) -> bool {
        self.assert_drawable(dest);
        let Some(plan) = compositing::plan_draw(self.images.get(dest).extent(), &args.target_mask) else {
            return true;
        };
        if let Err(e) = self.batch.ensure_open() {
            error!("Failed to open command batch for blit: {e}");
            return false;
        }

        let command_buffer = self.batch.command_buffer;
        let (dest_image, source_image) = self.images.pair_mut(dest, args.source);
        if let Err(e) = image::refresh(&self.device.device, command_buffer, &self.window_system, source_image) {
            error!("Failed to refresh blit source: {e}");
            return false;
        }
        compositing::record_blit(
            &self.device.device,
            command_buffer,
            &self.pipelines.blit,
            origin,
            dest_image,
            source_image,
            &plan,
        );
        true
    }

    /// Copies `region` (in source coordinates) from `source` to `dest`,
    /// shifted by `origin`. No blending.
    pub fn copy_area(
        &mut self,
        origin: (i32, i32),
        dest: ImageHandle,
        source: ImageHandle,
        region: &Region,
    ) -> bool {
        self.assert_drawable(dest);
        let copies = compositing::plan_copy(
            origin,
            self.images.get(source).extent(),
            self.images.get(dest).extent(),
            region,
        );
        if copies.is_empty() {
            return true;
        }
        if let Err(e) = self.batch.ensure_open() {
            error!("Failed to open command batch for copy: {e}");
            return false;
        }

        let command_buffer = self.batch.command_buffer;
        let (dest_image, source_image) = self.images.pair_mut(dest, source);
        if let Err(e) = image::refresh(&self.device.device, command_buffer, &self.window_system, source_image) {
            error!("Failed to refresh copy source: {e}");
            return false;
        }
        compositing::record_copy(&self.device.device, command_buffer, dest_image, source_image, &copies);
        true
    }

    /// Same as [`VulkanBackend::copy_area`]; there is no colour quantization to do.
    pub fn copy_area_quantize(
        &mut self,
        origin: (i32, i32),
        dest: ImageHandle,
        source: ImageHandle,
        region: &Region,
    ) -> bool {
        self.copy_area(origin, dest, source, region)
    }

    /// Blends `color` over `region` of `dest`.
    pub fn fill(&mut self, dest: ImageHandle, color: Color, region: &Region) -> bool {
        self.assert_drawable(dest);
        let Some(plan) = compositing::plan_draw(self.images.get(dest).extent(), region) else {
            return true;
        };
        if let Err(e) = self.batch.ensure_open() {
            error!("Failed to open command batch for fill: {e}");
            return false;
        }

        let command_buffer = self.batch.command_buffer;
        let dest_image = self.images.get_mut(dest);
        compositing::record_fill(
            &self.device.device,
            command_buffer,
            &self.pipelines.fill,
            dest_image,
            color,
            &plan,
        );
        true
    }

    /// Overwrites all of `image` with `color`.
    pub fn clear(&mut self, image: ImageHandle, color: Color) -> bool {
        self.assert_drawable(image);
        if let Err(e) = self.batch.ensure_open() {
            error!("Failed to open command batch for clear: {e}");
            return false;
        }
        let command_buffer = self.batch.command_buffer;
        compositing::record_clear(&self.device.device, command_buffer, self.images.get_mut(image), color);
        true
    }

    /// Submits the frame, presents the back buffer and acquires the next one.
    pub fn present(&mut self) -> bool {
        if let Err(e) = self.batch.ensure_open() {
            error!("Failed to open command batch for present: {e}");
            return false;
        }

        let command_buffer = self.batch.command_buffer;
        let back_buffer = self.swapchain().back_buffer();
        let back_image = self.images.get_mut(back_buffer);
        record_transition(
            &self.device.device,
            command_buffer,
            back_image.raw,
            &mut back_image.layout,
            ImageLayout::PresentSource,
        );

        if let Err(e) = self.batch.close_and_submit(true) {
            // Nothing recorded ran and the present semaphore will never be
            // signalled. Keep the back buffer acquired and draw into it again.
            error!("Failed to submit frame: {e}");
            self.images.get_mut(back_buffer).layout = ImageLayout::Undefined;
            if let Some(swapchain) = self.swapchain.as_mut() {
                swapchain.drop_frame();
            }
            return false;
        }

        let queue = self.device.queue;
        let semaphore = self.batch.present_semaphore;
        let Some(swapchain) = self.swapchain.as_mut() else {
            return false;
        };
        let mut presented = true;
        if let Err(e) = swapchain.present(queue, semaphore) {
            error!("Failed to present: {e}");
            presented = false;
        }
        if let Err(e) = swapchain.acquire() {
            error!("Failed to acquire the next back buffer: {e}");
            presented = false;
        }
        presented
    }

    /// Creates an image the backend owns, usable as source and destination.
    pub fn new_image(&mut self, format: ImageFormat, width: u32, height: u32) -> Result<ImageHandle> {
        debug!(?format, width, height, "New image");
        let image = self.image_factory().create_owned(width, height)?;
        Ok(self.images.insert(image))
    }

    /// Makes `pixmap` available as a blit or copy source.
    pub fn bind_pixmap(&mut self, pixmap: PixmapId, visual: VisualInfo) -> Result<ImageHandle> {
        let factory = self.image_factory();
        let image = match &self.device.import {
            ImportFns::ZeroCopy(fd_fns) => {
                factory.import_zero_copy(fd_fns, &self.window_system, pixmap, visual)?
            }
            ImportFns::Staged { host, host_pointer_alignment } => factory.import_staged(
                host,
                *host_pointer_alignment,
                &self.window_system,
                pixmap,
                visual,
            )?,
        };
        debug!(pixmap = pixmap.0, has_alpha = image.has_alpha, "Bound pixmap");
        Ok(self.images.insert(image))
    }

    /// Frees `image` and returns the pixmap it was bound to, if any.
    ///
    /// Waits for the GPU to go idle first.
    ///
    /// # Panics
    ///
    /// If `image` was already released or is a presentation buffer.
    pub fn release_image(&mut self, image: ImageHandle) -> Option<PixmapId> {
        assert!(self.images.contains(image), "image released twice");
        assert!(
            !self.swapchain().ring().contains(&image),
            "presentation buffers are owned by the swapchain"
        );
        let released = self.images.remove(image);

        self.batch.flush();
        self.device.wait_idle();
        let pixmap = image::destroy(&self.device.device, &self.bindings, &self.window_system, released);
        debug!(pixmap = pixmap.map(|p| p.0), "Released image");
        pixmap
    }

    pub fn back_buffer(&self) -> ImageHandle {
        self.swapchain().back_buffer()
    }

    /// How many presentations ago the back buffer was last shown, or -1.
    pub fn buffer_age(&self) -> i32 {
        self.swapchain().buffer_age()
    }

    pub fn max_buffer_age(&self) -> i32 {
        MAX_BUFFER_AGE
    }

    pub fn is_format_supported(&self, _format: ImageFormat) -> bool {
        true
    }

    pub fn create_blur_context(&mut self) -> BlurContext {
        BlurContext::SENTINEL
    }

    pub fn destroy_blur_context(&mut self, _context: BlurContext) {}

    /// Rebuilds the presentation ring for a new window size.
    ///
    /// Handles to the old back buffers become stale. If recreation fails the
    /// backend can only be torn down.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.batch.flush();
        self.device.wait_idle();

        let Some(mut old) = self.swapchain.take() else {
            warn!("Resize requested without a swapchain");
            return Ok(());
        };
        old.destroy_ring(&mut self.images);

        let factory = ImageFactory {
            device: &self.device.device,
            memory_properties: &self.device.memory_properties,
            bindings: &self.bindings,
        };
        let recreated = Swapchain::new(
            &self.instance.instance,
            self.device.device.clone(),
            &self.surface,
            &SwapchainSettings { physical_device: self.device.physical_device, vsync: self.config.vsync },
            width,
            height,
            old.handle,
            &factory,
            &mut self.images,
        );
        drop(old);

        self.swapchain = Some(recreated?);
        info!(window = self.window.0, width, height, "Backend resized");
        Ok(())
    }
}

impl<W: WindowSystem> Drop for VulkanBackend<W> {
    fn drop(&mut self) {
        self.batch.flush();
        self.device.wait_idle();

        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.destroy_ring(&mut self.images);
        }
        if !self.images.is_empty() {
            debug!(count = self.images.len(), "Releasing images still alive at teardown");
        }
        for image in self.images.drain() {
            image::destroy(&self.device.device, &self.bindings, &self.window_system, image);
        }
        info!("Vulkan backend torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::shader::ShaderStage;
    use crate::window_system::mock::MockWindowSystem;

    fn no_compiler(_: &str, _: ShaderStage, name: &str) -> std::result::Result<Vec<u8>, String> {
        Err(format!("{name}: no compiler in tests"))
    }

    #[test]
    fn blur_contexts_are_a_shared_sentinel() {
        assert_eq!(BlurContext::SENTINEL, BlurContext(()));
    }

    #[test]
    fn construction_without_a_surface_fails_cleanly() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();

        let window_system = MockWindowSystem::default();
        let result = VulkanBackend::new(BackendConfig::default(), window_system, WindowId(0x200), &no_compiler);
        match result {
            Ok(_) => panic!("mock window system cannot provide a surface"),
            // Machines without a Vulkan loader or without XCB surface support
            // stop earlier than the surface step.
            Err(BackendError::Loading(_))
            | Err(BackendError::MissingInstanceExtension(_))
            | Err(BackendError::Vk { .. }) => {}
            Err(BackendError::WindowSystem(e)) => {
                assert_eq!(e.to_string(), "mock window system has no surface");
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn invalid_configuration_is_rejected_before_touching_vulkan() {
        let config = BackendConfig { descriptor_pool_capacity: 0, ..BackendConfig::default() };
        let result = VulkanBackend::new(config, MockWindowSystem::default(), WindowId(1), &no_compiler);
        assert!(matches!(result, Err(BackendError::InvalidConfig(_))));
    }
}

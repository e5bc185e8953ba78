//! The presentation ring.
//!
//! Each swapchain image is also an entry in the image arena, so compositing
//! operations can target the back buffer like any other image. The ring
//! tracks how many presentations ago each slot was last shown so the
//! compositor can limit repaints to what changed since then.

use std::sync::Arc;

use ash::{vk, Device};
use tracing::{debug, info};

use crate::arena::{Arena, ImageHandle};
use crate::error::{BackendError, Result, VkResultExt};
use crate::image::{Image, ImageFactory, COLOR_FORMAT};
use crate::surface::PresentSurface;

/// The oldest buffer age the compositor should keep damage history for.
pub const MAX_BUFFER_AGE: i32 = 5;

/// Per-slot buffer ages. `-1` means the slot has never been presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferAges {
    ages: Vec<i32>,
}

impl BufferAges {
    pub fn new(slots: usize) -> Self {
        Self { ages: vec![-1; slots] }
    }

    pub fn age(&self, slot: usize) -> i32 {
        self.ages[slot]
    }

    /// Records that `slot` was just shown.
    pub fn mark_presented(&mut self, slot: usize) {
        for (index, age) in self.ages.iter_mut().enumerate() {
            if index == slot {
                *age = 1;
            } else if *age != -1 {
                *age += 1;
            }
        }
    }

    /// Records that the frame drawn into `slot` was lost before reaching
    /// the screen. The slot's contents are unknown from now on.
    pub fn mark_dropped(&mut self, slot: usize) {
        for (index, age) in self.ages.iter_mut().enumerate() {
            if index == slot {
                *age = -1;
            } else if *age != -1 {
                *age += 1;
            }
        }
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.ages
    }
}

/// Ages the ring after a present call. The queue may have taken the image
/// even when the call reports an error, so the ages move either way.
pub(crate) fn settle_present(ages: &mut BufferAges, slot: usize, outcome: Result<bool>) -> Result<()> {
    ages.mark_presented(slot);
    if outcome? {
        debug!("Presented to a suboptimal swapchain");
    }
    Ok(())
}

pub(crate) fn find_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats.iter().copied().find(|format| format.format == COLOR_FORMAT)
}

pub(crate) fn choose_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && available.contains(&vk::PresentModeKHR::IMMEDIATE) {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        // FIFO is guaranteed to be available.
        vk::PresentModeKHR::FIFO
    }
}

pub(crate) fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Swapchain creation parameters that do not change between resizes.
pub struct SwapchainSettings {
    pub physical_device: vk::PhysicalDevice,
    pub vsync: bool,
}

pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::extensions::khr::Swapchain,
    pub handle: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    ring: Vec<ImageHandle>,
    ages: BufferAges,
    current: usize,
    acquire_fence: vk::Fence,
}

impl Swapchain {
    /// Creates the swapchain, registers its images in `arena` and acquires
    /// the first back buffer.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        instance: &ash::Instance,
        device: Arc<Device>,
        surface: &PresentSurface,
        settings: &SwapchainSettings,
        width: u32,
        height: u32,
        old_swapchain: vk::SwapchainKHR,
        factory: &ImageFactory<'_>,
        arena: &mut Arena<Image>,
    ) -> Result<Self> {
        let capabilities = surface.capabilities(settings.physical_device)?;
        let formats = surface.formats(settings.physical_device)?;
        let present_modes = surface.present_modes(settings.physical_device)?;

        let surface_format =
            find_surface_format(&formats).ok_or(BackendError::UnsupportedSurfaceFormat(COLOR_FORMAT))?;
        let present_mode = choose_present_mode(&present_modes, settings.vsync);
        let extent = choose_extent(&capabilities, width, height);

        let loader = ash::extensions::khr::Swapchain::new(instance, &device);
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(capabilities.min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        let handle = unsafe { loader.create_swapchain(&create_info, None) }
            .vk_context("vkCreateSwapchainKHR")?;

        let fence_info = vk::FenceCreateInfo::builder();
        let acquire_fence = match unsafe { device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(result) => {
                unsafe { loader.destroy_swapchain(handle, None) };
                return Err(result).vk_context("vkCreateFence");
            }
        };

        // From here on Drop cleans up the swapchain and fence; only the ring
        // needs explicit unwinding.
        let mut swapchain = Self {
            device,
            loader,
            handle,
            extent,
            ring: Vec::new(),
            ages: BufferAges::new(0),
            current: 0,
            acquire_fence,
        };
        if let Err(e) = swapchain.build_ring(factory, arena).and_then(|()| swapchain.acquire()) {
            swapchain.destroy_ring(arena);
            return Err(e);
        }

        info!(
            width = extent.width,
            height = extent.height,
            images = swapchain.ring.len(),
            ?present_mode,
            "Swapchain created"
        );
        Ok(swapchain)
    }

    fn build_ring(&mut self, factory: &ImageFactory<'_>, arena: &mut Arena<Image>) -> Result<()> {
        let images = unsafe { self.loader.get_swapchain_images(self.handle) }
            .vk_context("vkGetSwapchainImagesKHR")?;
        for raw in images {
            let image = factory.wrap_swapchain(raw, self.extent)?;
            self.ring.push(arena.insert(image));
        }
        self.ages = BufferAges::new(self.ring.len());
        Ok(())
    }

    /// Blocks until the next image is available and makes it the back buffer.
    pub fn acquire(&mut self) -> Result<()> {
        let (index, suboptimal) = unsafe {
            self.loader.acquire_next_image(
                self.handle,
                u64::MAX,
                vk::Semaphore::null(),
                self.acquire_fence,
            )
        }
        .vk_context("vkAcquireNextImageKHR")?;
        if suboptimal {
            debug!("Swapchain is suboptimal for the surface");
        }

        unsafe {
            self.device
                .wait_for_fences(&[self.acquire_fence], true, u64::MAX)
                .vk_context("vkWaitForFences")?;
            self.device
                .reset_fences(&[self.acquire_fence])
                .vk_context("vkResetFences")?;
        }
        self.current = index as usize;
        Ok(())
    }

    /// Queues the back buffer for presentation once `wait` is signalled and
    /// ages the ring.
    pub fn present(&mut self, queue: vk::Queue, wait: vk::Semaphore) -> Result<()> {
        let wait_semaphores = [wait];
        let swapchains = [self.handle];
        let image_indices = [self.current as u32];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let outcome = unsafe { self.loader.queue_present(queue, &present_info) }
            .vk_context("vkQueuePresentKHR");
        settle_present(&mut self.ages, self.current, outcome)
    }

    /// Gives up on the frame drawn into the back buffer without presenting
    /// it. The back buffer stays acquired.
    pub fn drop_frame(&mut self) {
        self.ages.mark_dropped(self.current);
    }

    pub fn back_buffer(&self) -> ImageHandle {
        self.ring[self.current]
    }

    pub fn buffer_age(&self) -> i32 {
        self.ages.age(self.current)
    }

    pub fn ring(&self) -> &[ImageHandle] {
        &self.ring
    }

    /// Removes the ring images from `arena` and destroys their views.
    pub(crate) fn destroy_ring(&mut self, arena: &mut Arena<Image>) {
        for handle in self.ring.drain(..) {
            let image = arena.remove(handle);
            unsafe { self.device.destroy_image_view(image.view, None) };
        }
        self.ages = BufferAges::new(0);
        self.current = 0;
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        debug_assert!(self.ring.is_empty(), "swapchain dropped with its ring still registered");
        unsafe {
            self.device.destroy_fence(self.acquire_fence, None);
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn ages_start_unpresented() {
        let ages = BufferAges::new(3);
        assert_eq!(ages.as_slice(), &[-1, -1, -1]);
    }

    #[test]
    fn presenting_ages_only_slots_that_were_shown() {
        let mut ages = BufferAges::new(3);
        ages.mark_presented(0);
        assert_eq!(ages.as_slice(), &[1, -1, -1]);
        ages.mark_presented(1);
        assert_eq!(ages.as_slice(), &[2, 1, -1]);
        ages.mark_presented(0);
        assert_eq!(ages.as_slice(), &[1, 2, -1]);
        ages.mark_presented(2);
        assert_eq!(ages.as_slice(), &[2, 3, 1]);
    }

    #[test]
    fn a_failed_present_still_ages_the_ring() {
        let mut ages = BufferAges::new(2);
        ages.mark_presented(1);
        ages.mark_presented(0);
        assert_eq!(ages.as_slice(), &[1, 2]);

        let lost = Err(BackendError::Vk {
            call: "vkQueuePresentKHR",
            result: vk::Result::ERROR_SURFACE_LOST_KHR,
        });
        let err = settle_present(&mut ages, 1, lost).unwrap_err();
        assert!(matches!(err, BackendError::Vk { result: vk::Result::ERROR_SURFACE_LOST_KHR, .. }));
        assert_eq!(ages.as_slice(), &[2, 1]);

        settle_present(&mut ages, 0, Ok(true)).unwrap();
        assert_eq!(ages.as_slice(), &[1, 2]);
    }

    #[test]
    fn a_dropped_frame_forgets_its_slot_and_ages_the_rest() {
        let mut ages = BufferAges::new(3);
        ages.mark_presented(0);
        ages.mark_presented(1);
        ages.mark_dropped(0);
        assert_eq!(ages.as_slice(), &[-1, 2, -1]);
    }

    #[test]
    fn ages_keep_growing_past_the_advertised_maximum() {
        let mut ages = BufferAges::new(2);
        ages.mark_presented(1);
        for _ in 0..MAX_BUFFER_AGE {
            ages.mark_presented(0);
        }
        assert_eq!(ages.age(0), 1);
        assert_eq!(ages.age(1), MAX_BUFFER_AGE + 1);
    }

    #[rstest]
    #[case(true, &[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO], vk::PresentModeKHR::FIFO)]
    #[case(false, &[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO], vk::PresentModeKHR::IMMEDIATE)]
    #[case(false, &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO], vk::PresentModeKHR::FIFO)]
    fn present_mode_follows_vsync(
        #[case] vsync: bool,
        #[case] available: &[vk::PresentModeKHR],
        #[case] expected: vk::PresentModeKHR,
    ) {
        assert_eq!(choose_present_mode(available, vsync), expected);
    }

    #[test]
    fn surface_format_must_be_bgra8_unorm() {
        let format = |format| vk::SurfaceFormatKHR { format, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR };
        assert_eq!(
            find_surface_format(&[format(vk::Format::R8G8B8A8_UNORM), format(COLOR_FORMAT)]),
            Some(format(COLOR_FORMAT))
        );
        assert_eq!(find_surface_format(&[format(vk::Format::B8G8R8A8_SRGB)]), None);
    }

    #[test]
    fn extent_uses_the_surface_size_when_fixed() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 1920, height: 1080 },
            ..Default::default()
        };
        assert_eq!(choose_extent(&capabilities, 800, 600), vk::Extent2D { width: 1920, height: 1080 });
    }

    #[test]
    fn extent_is_clamped_when_the_surface_leaves_it_open() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        };
        assert_eq!(choose_extent(&capabilities, 8000, 600), vk::Extent2D { width: 4096, height: 600 });
    }
}

//! GPU images and how they are created, refreshed and released.
//!
//! An [`Image`] is one of four kinds, told apart by [`ImageBacking`]: images
//! the backend allocated itself, presentation-ring slots, and pixmaps imported
//! either zero-copy from a DMA-BUF or through a shared-memory staging buffer.

use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd};

use ash::{vk, Device};
use drm_fourcc::DrmModifier;
use tracing::{debug, error};

use crate::descriptor::SamplerBindings;
use crate::error::{BackendError, Result, VkResultExt};
use crate::layout::{record_transition, ImageLayout, COLOR_SUBRESOURCE_RANGE};
use crate::memory::{align_up, allocate_image_memory, find_memory_type};
use crate::shm::ShmSegment;
use crate::window_system::{PixmapId, ShmSegmentId, VisualInfo, WindowSystem};

/// Format of every image the backend creates, imports or renders into.
pub const COLOR_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

const BYTES_PER_PIXEL: vk::DeviceSize = 4;

/// Requested purpose of a new image. All of them are stored as 8-bit BGRA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Pixmap,
    PixmapHigh,
    Mask,
}

/// Host-visible side of a staged import.
pub(crate) struct StagingArea {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub server_segment: ShmSegmentId,
    pub segment: ShmSegment,
}

pub(crate) enum ImageBacking {
    Owned { memory: vk::DeviceMemory },
    /// Memory belongs to the swapchain.
    Swapchain,
    ZeroCopy { pixmap: PixmapId, memory: vk::DeviceMemory },
    Staged { pixmap: PixmapId, memory: vk::DeviceMemory, staging: StagingArea },
}

pub(crate) struct Image {
    pub raw: vk::Image,
    pub view: vk::ImageView,
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
    pub layout: ImageLayout,
    /// Present on every image that can be sampled.
    pub descriptor_set: Option<vk::DescriptorSet>,
    pub backing: ImageBacking,
}

impl Image {
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D { width: self.width, height: self.height }
    }

    pub fn pixmap(&self) -> Option<PixmapId> {
        match self.backing {
            ImageBacking::ZeroCopy { pixmap, .. } | ImageBacking::Staged { pixmap, .. } => Some(pixmap),
            ImageBacking::Owned { .. } | ImageBacking::Swapchain => None,
        }
    }

    pub fn is_imported(&self) -> bool {
        self.pixmap().is_some()
    }
}

/// Swizzle for a view: sources without alpha bits read as fully opaque.
pub(crate) fn component_mapping(has_alpha: bool) -> vk::ComponentMapping {
    vk::ComponentMapping {
        r: vk::ComponentSwizzle::IDENTITY,
        g: vk::ComponentSwizzle::IDENTITY,
        b: vk::ComponentSwizzle::IDENTITY,
        a: if has_alpha {
            vk::ComponentSwizzle::IDENTITY
        } else {
            vk::ComponentSwizzle::ONE
        },
    }
}

/// Bytes needed to stage a `width` x `height` pixmap.
pub(crate) fn staging_size(width: u32, height: u32, alignment: vk::DeviceSize) -> vk::DeviceSize {
    align_up(
        vk::DeviceSize::from(width) * vk::DeviceSize::from(height) * BYTES_PER_PIXEL,
        alignment,
    )
}

fn create_view(device: &Device, image: vk::Image, has_alpha: bool) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(COLOR_FORMAT)
        .components(component_mapping(has_alpha))
        .subresource_range(COLOR_SUBRESOURCE_RANGE);
    unsafe { device.create_image_view(&view_info, None) }.vk_context("vkCreateImageView")
}

/// Owns the pieces of an image under construction and destroys them if
/// construction bails out before [`PartialImage::finish`].
struct PartialImage<'a> {
    device: &'a Device,
    bindings: &'a SamplerBindings,
    raw: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    descriptor_set: Option<vk::DescriptorSet>,
}

impl<'a> PartialImage<'a> {
    fn new(device: &'a Device, bindings: &'a SamplerBindings, raw: vk::Image) -> Self {
        Self {
            device,
            bindings,
            raw,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            descriptor_set: None,
        }
    }

    fn create_view(&mut self, has_alpha: bool) -> Result<()> {
        self.view = create_view(self.device, self.raw, has_alpha)?;
        Ok(())
    }

    fn allocate_descriptor_set(&mut self) -> Result<()> {
        self.descriptor_set = Some(self.bindings.allocate(self.view)?);
        Ok(())
    }

    fn finish(
        self,
        width: u32,
        height: u32,
        has_alpha: bool,
        backing: impl FnOnce(vk::DeviceMemory) -> ImageBacking,
    ) -> Image {
        let image = Image {
            raw: self.raw,
            view: self.view,
            width,
            height,
            has_alpha,
            layout: ImageLayout::Undefined,
            descriptor_set: self.descriptor_set,
            backing: backing(self.memory),
        };
        std::mem::forget(self);
        image
    }
}

impl Drop for PartialImage<'_> {
    fn drop(&mut self) {
        if let Some(set) = self.descriptor_set.take() {
            if let Err(e) = self.bindings.free(set) {
                error!("Failed to free descriptor set of unfinished image: {e}");
            }
        }
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.raw, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

/// Everything needed to build images for one device.
pub(crate) struct ImageFactory<'a> {
    pub device: &'a Device,
    pub memory_properties: &'a vk::PhysicalDeviceMemoryProperties,
    pub bindings: &'a SamplerBindings,
}

impl ImageFactory<'_> {
    fn create_optimal_image(
        &self,
        width: u32,
        height: u32,
        usage: vk::ImageUsageFlags,
    ) -> Result<vk::Image> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(COLOR_FORMAT)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        unsafe { self.device.create_image(&image_info, None) }.vk_context("vkCreateImage")
    }

    /// A device-local render target the backend owns outright.
    pub fn create_owned(&self, width: u32, height: u32) -> Result<Image> {
        let raw = self.create_optimal_image(
            width,
            height,
            vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
        )?;
        let mut partial = PartialImage::new(self.device, self.bindings, raw);
        partial.memory = allocate_image_memory(self.device, self.memory_properties, raw)?;
        partial.create_view(true)?;
        partial.allocate_descriptor_set()?;

        debug!(width, height, "Created owned image");
        Ok(partial.finish(width, height, true, |memory| ImageBacking::Owned { memory }))
    }

    /// Wraps a swapchain image. The view is ours, the image is not.
    pub fn wrap_swapchain(&self, raw: vk::Image, extent: vk::Extent2D) -> Result<Image> {
        let view = create_view(self.device, raw, true)?;
        Ok(Image {
            raw,
            view,
            width: extent.width,
            height: extent.height,
            has_alpha: true,
            layout: ImageLayout::Undefined,
            descriptor_set: None,
            backing: ImageBacking::Swapchain,
        })
    }

    /// Imports the pixmap's DMA-BUF as the backing memory of a new image.
    pub fn import_zero_copy<W: WindowSystem>(
        &self,
        fd_fns: &ash::extensions::khr::ExternalMemoryFd,
        window_system: &W,
        pixmap: PixmapId,
        visual: VisualInfo,
    ) -> Result<Image> {
        let buffers = window_system.buffers_from_pixmap(pixmap)?;
        if DrmModifier::from(buffers.modifier) == DrmModifier::Invalid {
            return Err(BackendError::InvalidFormatModifier { pixmap: pixmap.0 });
        }
        // Only the first handle is imported; dropping the rest closes them.
        let Some(fd) = buffers.fds.into_iter().next() else {
            return Err(BackendError::MissingBufferHandle { pixmap: pixmap.0 });
        };

        let (width, height) = (u32::from(buffers.width), u32::from(buffers.height));
        let plane_layouts: Vec<vk::SubresourceLayout> = buffers
            .planes
            .iter()
            .map(|plane| vk::SubresourceLayout {
                offset: vk::DeviceSize::from(plane.offset),
                size: 0,
                row_pitch: vk::DeviceSize::from(plane.stride),
                array_pitch: 0,
                depth_pitch: 0,
            })
            .collect();

        let mut external_info = vk::ExternalMemoryImageCreateInfo::builder()
            .handle_types(vk::ExternalMemoryHandleTypeFlags::DMA_BUF_EXT);
        let mut modifier_info = vk::ImageDrmFormatModifierExplicitCreateInfoEXT::builder()
            .drm_format_modifier(buffers.modifier)
            .plane_layouts(&plane_layouts);
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(COLOR_FORMAT)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::DRM_FORMAT_MODIFIER_EXT)
            .usage(vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .push_next(&mut external_info)
            .push_next(&mut modifier_info);
        let raw = unsafe { self.device.create_image(&image_info, None) }.vk_context("vkCreateImage")?;

        let mut partial = PartialImage::new(self.device, self.bindings, raw);
        partial.memory = self.import_dma_buf(fd_fns, raw, fd)?;
        unsafe { self.device.bind_image_memory(raw, partial.memory, 0) }
            .vk_context("vkBindImageMemory")?;
        partial.create_view(visual.has_alpha())?;
        partial.allocate_descriptor_set()?;

        debug!(pixmap = pixmap.0, width, height, modifier = buffers.modifier, "Imported pixmap zero-copy");
        Ok(partial.finish(width, height, visual.has_alpha(), |memory| {
            ImageBacking::ZeroCopy { pixmap, memory }
        }))
    }

    /// Allocates memory for `image` from `fd`. The driver takes ownership of
    /// the descriptor only if the allocation succeeds.
    fn import_dma_buf(
        &self,
        fd_fns: &ash::extensions::khr::ExternalMemoryFd,
        image: vk::Image,
        fd: OwnedFd,
    ) -> Result<vk::DeviceMemory> {
        let handle_type = vk::ExternalMemoryHandleTypeFlags::DMA_BUF_EXT;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let mut fd_properties = vk::MemoryFdPropertiesKHR::default();
        unsafe {
            (fd_fns.fp().get_memory_fd_properties_khr)(
                self.device.handle(),
                handle_type,
                fd.as_raw_fd(),
                &mut fd_properties,
            )
        }
        .result()
        .vk_context("vkGetMemoryFdPropertiesKHR")?;

        let memory_type_index = find_memory_type(
            self.memory_properties,
            requirements.memory_type_bits & fd_properties.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .ok_or(BackendError::NoSuitableMemoryType("imported DMA-BUF"))?;

        let mut import_info = vk::ImportMemoryFdInfoKHR::builder()
            .handle_type(handle_type)
            .fd(fd.as_raw_fd());
        let mut dedicated_info = vk::MemoryDedicatedAllocateInfo::builder().image(image);
        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index)
            .push_next(&mut dedicated_info)
            .push_next(&mut import_info);
        let memory = unsafe { self.device.allocate_memory(&allocate_info, None) }
            .vk_context("vkAllocateMemory")?;

        // The driver owns the descriptor now.
        let _ = fd.into_raw_fd();
        Ok(memory)
    }

    /// Creates a device-local image for `pixmap` plus the shared-memory
    /// staging buffer that refreshes it.
    pub fn import_staged<W: WindowSystem>(
        &self,
        host_fns: &vk::ExtExternalMemoryHostFn,
        host_pointer_alignment: vk::DeviceSize,
        window_system: &W,
        pixmap: PixmapId,
        visual: VisualInfo,
    ) -> Result<Image> {
        let geometry = window_system.pixmap_geometry(pixmap)?;
        let (width, height) = (u32::from(geometry.width), u32::from(geometry.height));

        let raw = self.create_optimal_image(
            width,
            height,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
        )?;
        let mut partial = PartialImage::new(self.device, self.bindings, raw);
        partial.memory = allocate_image_memory(self.device, self.memory_properties, raw)?;
        partial.create_view(visual.has_alpha())?;
        partial.allocate_descriptor_set()?;

        let size = staging_size(width, height, host_pointer_alignment);
        let staging = self.create_staging_area(host_fns, window_system, size)?;

        debug!(pixmap = pixmap.0, width, height, size, "Imported pixmap through shared memory");
        Ok(partial.finish(width, height, visual.has_alpha(), |memory| ImageBacking::Staged {
            pixmap,
            memory,
            staging,
        }))
    }

    fn create_staging_area<W: WindowSystem>(
        &self,
        host_fns: &vk::ExtExternalMemoryHostFn,
        window_system: &W,
        size: vk::DeviceSize,
    ) -> Result<StagingArea> {
        let handle_type = vk::ExternalMemoryHandleTypeFlags::HOST_ALLOCATION_EXT;
        let segment_size = usize::try_from(size).map_err(|_| {
            BackendError::SharedMemory(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("staging size {size} does not fit the address space"),
            ))
        })?;
        let segment = ShmSegment::create(segment_size)?;
        debug!(shmid = segment.id(), bytes = segment.size(), "Created staging segment");

        let mut external_info = vk::ExternalMemoryBufferCreateInfo::builder().handle_types(handle_type);
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .push_next(&mut external_info);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.vk_context("vkCreateBuffer")?;

        let memory = match self.import_host_pointer(host_fns, buffer, &segment, size) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        match window_system.shm_attach(segment.id()) {
            Ok(server_segment) => Ok(StagingArea { buffer, memory, server_segment, segment }),
            Err(e) => {
                unsafe {
                    self.device.destroy_buffer(buffer, None);
                    self.device.free_memory(memory, None);
                }
                Err(e.into())
            }
        }
    }

    fn import_host_pointer(
        &self,
        host_fns: &vk::ExtExternalMemoryHostFn,
        buffer: vk::Buffer,
        segment: &ShmSegment,
        size: vk::DeviceSize,
    ) -> Result<vk::DeviceMemory> {
        let handle_type = vk::ExternalMemoryHandleTypeFlags::HOST_ALLOCATION_EXT;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let mut host_properties = vk::MemoryHostPointerPropertiesEXT::default();
        unsafe {
            (host_fns.get_memory_host_pointer_properties_ext)(
                self.device.handle(),
                handle_type,
                segment.as_ptr(),
                &mut host_properties,
            )
        }
        .result()
        .vk_context("vkGetMemoryHostPointerPropertiesEXT")?;

        let memory_type_index = find_memory_type(
            self.memory_properties,
            requirements.memory_type_bits & host_properties.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        )
        .ok_or(BackendError::NoSuitableMemoryType("staging buffer"))?;

        let mut import_info = vk::ImportMemoryHostPointerInfoEXT::builder()
            .handle_type(handle_type)
            .host_pointer(segment.as_ptr());
        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index)
            .push_next(&mut import_info);
        let memory = unsafe { self.device.allocate_memory(&allocate_info, None) }
            .vk_context("vkAllocateMemory")?;

        if let Err(result) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe { self.device.free_memory(memory, None) };
            return Err(result).vk_context("vkBindBufferMemory");
        }
        Ok(memory)
    }
}

/// Asks the X server to copy a staged image's pixmap into its segment.
///
/// Returns the staging buffer now holding the pixels, or `None` for images
/// whose contents are already on the GPU.
pub(crate) fn pull_pixmap<W: WindowSystem>(window_system: &W, image: &Image) -> Result<Option<vk::Buffer>> {
    let ImageBacking::Staged { pixmap, staging, .. } = &image.backing else {
        return Ok(None);
    };
    // Pixmap geometry is 16-bit on the wire, so the image size fits.
    window_system.shm_get_image(*pixmap, image.width as u16, image.height as u16, staging.server_segment)?;
    Ok(Some(staging.buffer))
}

/// Brings a staged image up to date with its pixmap. Other images are left
/// alone.
///
/// Records into `command_buffer`, which must be open.
pub(crate) fn refresh<W: WindowSystem>(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    window_system: &W,
    image: &mut Image,
) -> Result<()> {
    let Some(staging_buffer) = pull_pixmap(window_system, image)? else {
        return Ok(());
    };
    let Image { raw, width, height, layout, .. } = image;

    record_transition(device, command_buffer, *raw, layout, ImageLayout::TransferDestination);
    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D { width: *width, height: *height, depth: 1 })
        .build();
    unsafe {
        device.cmd_copy_buffer_to_image(
            command_buffer,
            staging_buffer,
            *raw,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        )
    };
    Ok(())
}

/// Destroys every resource of `image` and returns the pixmap it wrapped.
///
/// The GPU must no longer reference the image. Every step runs even if an
/// earlier one failed.
pub(crate) fn destroy<W: WindowSystem>(
    device: &Device,
    bindings: &SamplerBindings,
    window_system: &W,
    image: Image,
) -> Option<PixmapId> {
    let pixmap = image.pixmap();

    if let Some(set) = image.descriptor_set {
        if let Err(e) = bindings.free(set) {
            error!("Failed to free descriptor set: {e}");
        }
    }
    unsafe { device.destroy_image_view(image.view, None) };

    let memory = match image.backing {
        ImageBacking::Swapchain => return None,
        ImageBacking::Owned { memory } | ImageBacking::ZeroCopy { memory, .. } => memory,
        ImageBacking::Staged { memory, staging, .. } => {
            destroy_staging_area(device, window_system, staging);
            memory
        }
    };
    unsafe {
        device.destroy_image(image.raw, None);
        device.free_memory(memory, None);
    }
    pixmap
}

fn destroy_staging_area<W: WindowSystem>(device: &Device, window_system: &W, staging: StagingArea) {
    if let Err(e) = window_system.shm_detach(staging.server_segment) {
        error!(segment = staging.server_segment.0, "Failed to detach shared memory from the X server: {e:#}");
    }
    unsafe {
        device.destroy_buffer(staging.buffer, None);
        device.free_memory(staging.memory, None);
    }
    // Detaches locally and removes the segment.
    drop(staging.segment);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window_system::mock::MockWindowSystem;
    use ash::vk::Handle;
    use pretty_assertions::assert_eq;

    fn image_with(backing: ImageBacking) -> Image {
        Image {
            raw: vk::Image::null(),
            view: vk::ImageView::null(),
            width: 64,
            height: 32,
            has_alpha: true,
            layout: ImageLayout::Undefined,
            descriptor_set: None,
            backing,
        }
    }

    #[test]
    fn only_staged_images_pull_from_the_server() {
        let window_system = MockWindowSystem::default();
        let memory = vk::DeviceMemory::null();
        for backing in [
            ImageBacking::Owned { memory },
            ImageBacking::Swapchain,
            ImageBacking::ZeroCopy { pixmap: PixmapId(0x400), memory },
        ] {
            assert_eq!(pull_pixmap(&window_system, &image_with(backing)).unwrap(), None);
        }
        assert!(window_system.requests.borrow().is_empty());
    }

    #[test]
    fn staged_images_pull_on_every_access() {
        let segment = match ShmSegment::create(64 * 32 * 4) {
            Ok(segment) => segment,
            Err(e) => {
                tracing::warn!("SysV shared memory unavailable, skipping: {e}");
                return;
            }
        };
        let buffer = vk::Buffer::from_raw(0x51);
        let image = image_with(ImageBacking::Staged {
            pixmap: PixmapId(0x400),
            memory: vk::DeviceMemory::null(),
            staging: StagingArea {
                buffer,
                memory: vk::DeviceMemory::null(),
                server_segment: ShmSegmentId(7),
                segment,
            },
        });
        let window_system = MockWindowSystem::default();

        assert_eq!(pull_pixmap(&window_system, &image).unwrap(), Some(buffer));
        assert_eq!(pull_pixmap(&window_system, &image).unwrap(), Some(buffer));
        assert_eq!(
            *window_system.requests.borrow(),
            vec!["shm_get_image 0x400 64x32 7".to_string(); 2]
        );
    }

    #[test]
    fn opaque_visuals_force_alpha_to_one() {
        assert_eq!(component_mapping(false).a, vk::ComponentSwizzle::ONE);
        assert_eq!(component_mapping(false).r, vk::ComponentSwizzle::IDENTITY);
        assert_eq!(component_mapping(true).a, vk::ComponentSwizzle::IDENTITY);
    }

    #[test]
    fn staging_size_is_rounded_to_host_pointer_alignment() {
        assert_eq!(staging_size(100, 100, 4096), 40960);
        assert_eq!(staging_size(64, 16, 4096), 4096);
        assert_eq!(staging_size(1, 1, 0), 4);
    }

    #[test]
    fn staging_size_does_not_overflow_for_maximal_pixmaps() {
        let size = staging_size(u32::from(u16::MAX), u32::from(u16::MAX), 4096);
        assert!(size >= 65535 * 65535 * 4);
        assert_eq!(size % 4096, 0);
    }

    #[test]
    fn invalid_modifier_is_detected() {
        assert_eq!(DrmModifier::from(0x00ff_ffff_ffff_ffff), DrmModifier::Invalid);
        assert_ne!(DrmModifier::from(0), DrmModifier::Invalid);
    }
}

use ash::vk;

use crate::error::{Result, VkResultExt};

/// The presentable surface of the compositor's target window.
pub struct PresentSurface {
    pub loader: ash::extensions::khr::Surface,
    pub surface: vk::SurfaceKHR,
}

impl PresentSurface {
    /// Takes ownership of a surface created by the window system.
    pub fn new(entry: &ash::Entry, instance: &ash::Instance, surface: vk::SurfaceKHR) -> Self {
        let loader = ash::extensions::khr::Surface::new(entry, instance);
        Self { loader, surface }
    }

    pub fn supports_queue_family(&self, physical_device: vk::PhysicalDevice, family: u32) -> bool {
        match unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.surface)
        } {
            Ok(supported) => supported,
            Err(e) => {
                tracing::warn!(family, "vkGetPhysicalDeviceSurfaceSupportKHR failed: {e}");
                false
            }
        }
    }

    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
        .vk_context("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
        .vk_context("vkGetPhysicalDeviceSurfaceFormatsKHR")
    }

    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
        .vk_context("vkGetPhysicalDeviceSurfacePresentModesKHR")
    }
}

impl Drop for PresentSurface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

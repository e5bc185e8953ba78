//! Physical-device negotiation and the logical device.
//!
//! Device choice is coupled to the pixmap import strategy: the zero-copy path
//! needs DMA-BUF and DRM-format-modifier support, the staged path needs host
//! pointer import. Which strategies are even worth trying depends on what the
//! X server offers (DRI3, MIT-SHM).

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use ash::extensions::khr::ExternalMemoryFd;
use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{BackendError, Result, VkResultExt};
use crate::surface::PresentSurface;
use crate::window_system::{WindowSystem, WindowSystemExtensions};

/// How pixmaps become GPU images. Fixed for a backend's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStrategy {
    /// Import the pixmap's DMA-BUF directly.
    ZeroCopy,
    /// Copy the pixmap through a shared-memory segment on every access.
    Staged,
}

impl ImportStrategy {
    pub fn required_extensions(self) -> Vec<&'static CStr> {
        let mut extensions = vec![ash::extensions::khr::Swapchain::name()];
        match self {
            ImportStrategy::ZeroCopy => extensions.extend([
                vk::ExtExternalMemoryDmaBufFn::name(),
                vk::ExtImageDrmFormatModifierFn::name(),
                ExternalMemoryFd::name(),
            ]),
            ImportStrategy::Staged => extensions.push(vk::ExtExternalMemoryHostFn::name()),
        }
        extensions
    }

    /// Strategies worth trying, in preference order.
    fn candidates(extensions: WindowSystemExtensions) -> impl Iterator<Item = ImportStrategy> {
        [
            extensions.dri3.then_some(ImportStrategy::ZeroCopy),
            extensions.shm.then_some(ImportStrategy::Staged),
        ]
        .into_iter()
        .flatten()
    }
}

/// What negotiation needs to know about one enumerated physical device.
#[derive(Debug, Clone)]
pub(crate) struct DeviceCandidate {
    pub name: String,
    pub api_version: u32,
    pub extensions: Vec<CString>,
}

impl DeviceCandidate {
    fn meets_api_floor(&self) -> bool {
        self.api_version >= vk::API_VERSION_1_3
    }

    fn has_extensions(&self, strategy: ImportStrategy) -> bool {
        strategy
            .required_extensions()
            .iter()
            .all(|required| self.extensions.iter().any(|ext| ext.as_c_str() == *required))
    }

    fn is_suitable(&self, strategy: ImportStrategy) -> bool {
        self.meets_api_floor() && self.has_extensions(strategy)
    }
}

/// Picks the first device, in enumeration order, that satisfies the most
/// preferred strategy the window system allows.
pub(crate) fn negotiate(
    candidates: &[DeviceCandidate],
    extensions: WindowSystemExtensions,
) -> Option<(usize, ImportStrategy)> {
    ImportStrategy::candidates(extensions).find_map(|strategy| {
        candidates
            .iter()
            .position(|candidate| candidate.is_suitable(strategy))
            .map(|index| (index, strategy))
    })
}

/// Describes every device, skipping the ones that cannot be queried.
///
/// The returned handles and candidates are parallel, so an index from
/// [`negotiate`] selects the matching handle.
pub(crate) fn describe_devices<D: Copy>(
    devices: &[D],
    mut describe: impl FnMut(D) -> Result<DeviceCandidate>,
) -> (Vec<D>, Vec<DeviceCandidate>) {
    let mut handles = Vec::with_capacity(devices.len());
    let mut candidates = Vec::with_capacity(devices.len());
    for (position, &device) in devices.iter().enumerate() {
        match describe(device) {
            Ok(candidate) => {
                handles.push(device);
                candidates.push(candidate);
            }
            Err(e) => warn!(position, "Skipping physical device: {e}"),
        }
    }
    (handles, candidates)
}

/// First queue family with graphics support that can also present.
pub(crate) fn select_queue_family(
    families: &[vk::QueueFamilyProperties],
    mut can_present: impl FnMut(u32) -> bool,
) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .filter(|(_, family)| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(index, _)| index as u32)
        .find(|&index| can_present(index))
}

/// Per-device entry points for the negotiated import path.
pub enum ImportFns {
    ZeroCopy(ExternalMemoryFd),
    Staged {
        host: vk::ExtExternalMemoryHostFn,
        /// `minImportedHostPointerAlignment`; staging sizes are rounded up to it.
        host_pointer_alignment: vk::DeviceSize,
    },
}

impl ImportFns {
    pub fn strategy(&self) -> ImportStrategy {
        match self {
            ImportFns::ZeroCopy(_) => ImportStrategy::ZeroCopy,
            ImportFns::Staged { .. } => ImportStrategy::Staged,
        }
    }
}

/// The chosen physical device before a logical device exists.
pub struct PhysicalDeviceChoice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family: u32,
    pub strategy: ImportStrategy,
}

fn describe(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Result<DeviceCandidate> {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned();
    let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .vk_context("vkEnumerateDeviceExtensionProperties")?
        .iter()
        .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned())
        .collect();
    Ok(DeviceCandidate { name, api_version: properties.api_version, extensions })
}

pub fn select_physical_device<W: WindowSystem>(
    entry: &ash::Entry,
    instance: &ash::Instance,
    surface: &PresentSurface,
    window_system: &W,
) -> Result<PhysicalDeviceChoice> {
    let physical_devices = unsafe { instance.enumerate_physical_devices() }
        .vk_context("vkEnumeratePhysicalDevices")?;
    info!("Found {} physical devices.", physical_devices.len());

    let (physical_devices, candidates) =
        describe_devices(&physical_devices, |pdevice| describe(instance, pdevice));
    for candidate in &candidates {
        debug!(
            device = %candidate.name,
            api_major = vk::api_version_major(candidate.api_version),
            api_minor = vk::api_version_minor(candidate.api_version),
            "Evaluating device"
        );
    }

    let (index, strategy) = negotiate(&candidates, window_system.extensions())
        .ok_or(BackendError::NoSuitableDevice)?;
    let physical_device = physical_devices[index];

    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let queue_family = select_queue_family(&families, |family| {
        window_system.presentation_support(entry, instance, physical_device, family)
            && surface.supports_queue_family(physical_device, family)
    })
    .ok_or(BackendError::NoSuitableQueueFamily)?;

    info!(
        device = %candidates[index].name,
        ?strategy,
        queue_family,
        "Selected physical device"
    );
    Ok(PhysicalDeviceChoice { physical_device, queue_family, strategy })
}

fn host_pointer_alignment(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> vk::DeviceSize {
    let mut host_properties = vk::PhysicalDeviceExternalMemoryHostPropertiesEXT::default();
    let mut properties = vk::PhysicalDeviceProperties2::builder().push_next(&mut host_properties);
    unsafe { instance.get_physical_device_properties2(physical_device, &mut properties) };
    host_properties.min_imported_host_pointer_alignment
}

/// The logical device with its single graphics/present queue.
pub struct LogicalDevice {
    pub import: ImportFns,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue: vk::Queue,
    pub queue_family: u32,
    pub physical_device: vk::PhysicalDevice,
    pub device: Arc<ash::Device>,
}

impl LogicalDevice {
    pub fn new(instance: &ash::Instance, choice: &PhysicalDeviceChoice) -> Result<Self> {
        let queue_priorities = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(choice.queue_family)
            .queue_priorities(&queue_priorities)
            .build()];

        let extensions = choice.strategy.required_extensions();
        let extension_names: Vec<*const c_char> =
            extensions.iter().map(|name| name.as_ptr()).collect();

        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder()
            .synchronization2(true)
            .dynamic_rendering(true);
        let device_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features13);

        let device = unsafe { instance.create_device(choice.physical_device, &device_create_info, None) }
            .vk_context("vkCreateDevice")?;
        info!("Logical device created successfully.");

        let queue = unsafe { device.get_device_queue(choice.queue_family, 0) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(choice.physical_device) };

        let import = match choice.strategy {
            ImportStrategy::ZeroCopy => ImportFns::ZeroCopy(ExternalMemoryFd::new(instance, &device)),
            ImportStrategy::Staged => {
                let get_device_proc_addr = instance.fp_v1_0().get_device_proc_addr;
                let host = vk::ExtExternalMemoryHostFn::load(|name| unsafe {
                    std::mem::transmute::<vk::PFN_vkVoidFunction, *const c_void>(get_device_proc_addr(
                        device.handle(),
                        name.as_ptr(),
                    ))
                });
                let host_pointer_alignment =
                    host_pointer_alignment(instance, choice.physical_device);
                debug!(host_pointer_alignment, "Resolved host pointer import");
                ImportFns::Staged { host, host_pointer_alignment }
            }
        };

        Ok(Self {
            import,
            memory_properties,
            queue,
            queue_family: choice.queue_family,
            physical_device: choice.physical_device,
            device: Arc::new(device),
        })
    }

    pub fn wait_idle(&self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            tracing::error!("vkDeviceWaitIdle failed: {e}");
        }
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        self.wait_idle();
        unsafe { self.device.destroy_device(None) };
        info!("Logical device destroyed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn candidate(api_version: u32, extensions: &[&CStr]) -> DeviceCandidate {
        DeviceCandidate {
            name: "test".to_string(),
            api_version,
            extensions: extensions.iter().map(|e| (*e).to_owned()).collect(),
        }
    }

    fn zero_copy_device() -> DeviceCandidate {
        candidate(vk::API_VERSION_1_3, &ImportStrategy::ZeroCopy.required_extensions())
    }

    fn staged_device() -> DeviceCandidate {
        candidate(vk::API_VERSION_1_3, &ImportStrategy::Staged.required_extensions())
    }

    const BOTH: WindowSystemExtensions = WindowSystemExtensions { dri3: true, shm: true };

    #[test]
    fn zero_copy_is_preferred_when_dri3_is_available() {
        let devices = [staged_device(), zero_copy_device()];
        assert_eq!(negotiate(&devices, BOTH), Some((1, ImportStrategy::ZeroCopy)));
    }

    #[test]
    fn staged_is_the_fallback_when_no_device_can_import_dmabufs() {
        let devices = [staged_device()];
        assert_eq!(negotiate(&devices, BOTH), Some((0, ImportStrategy::Staged)));
    }

    #[test]
    fn window_system_capabilities_gate_strategies() {
        let devices = [zero_copy_device(), staged_device()];
        let shm_only = WindowSystemExtensions { dri3: false, shm: true };
        assert_eq!(negotiate(&devices, shm_only), Some((1, ImportStrategy::Staged)));
        assert_eq!(negotiate(&devices, WindowSystemExtensions::default()), None);
    }

    #[test]
    fn first_suitable_device_in_enumeration_order_wins() {
        let devices = [zero_copy_device(), zero_copy_device()];
        assert_eq!(negotiate(&devices, BOTH), Some((0, ImportStrategy::ZeroCopy)));
    }

    #[test]
    fn devices_that_cannot_be_described_are_skipped() {
        let (handles, candidates) = describe_devices(&[10_u32, 11, 12], |device| match device {
            10 => Err(BackendError::Vk {
                call: "vkEnumerateDeviceExtensionProperties",
                result: vk::Result::ERROR_INITIALIZATION_FAILED,
            }),
            11 => Ok(staged_device()),
            _ => Ok(zero_copy_device()),
        });
        assert_eq!(handles, vec![11, 12]);

        let (index, strategy) = negotiate(&candidates, BOTH).unwrap();
        assert_eq!((handles[index], strategy), (12, ImportStrategy::ZeroCopy));
    }

    #[test]
    fn old_api_versions_are_rejected() {
        let devices = [candidate(
            vk::API_VERSION_1_2,
            &ImportStrategy::ZeroCopy.required_extensions(),
        )];
        assert_eq!(negotiate(&devices, BOTH), None);
    }

    #[test]
    fn missing_extensions_leave_no_device() {
        let devices = [candidate(
            vk::API_VERSION_1_3,
            &[ash::extensions::khr::Swapchain::name()],
        )];
        assert_eq!(negotiate(&devices, BOTH), None);
    }

    #[test]
    fn queue_family_needs_graphics_and_presentation() {
        let family = |flags| vk::QueueFamilyProperties { queue_flags: flags, queue_count: 1, ..Default::default() };
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        assert_eq!(select_queue_family(&families, |_| true), Some(1));
        assert_eq!(select_queue_family(&families, |index| index == 2), Some(2));
        assert_eq!(select_queue_family(&families, |index| index == 0), None);
    }

    #[test]
    fn strategies_share_the_swapchain_extension() {
        for strategy in [ImportStrategy::ZeroCopy, ImportStrategy::Staged] {
            assert_eq!(
                strategy.required_extensions()[0],
                ash::extensions::khr::Swapchain::name()
            );
        }
        assert_eq!(ImportStrategy::ZeroCopy.required_extensions().len(), 4);
        assert_eq!(ImportStrategy::Staged.required_extensions().len(), 2);
    }
}

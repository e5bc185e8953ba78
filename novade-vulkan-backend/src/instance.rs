//! Vulkan loader, instance and the optional validation messenger.

use std::borrow::Cow;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use ash::vk;
use tracing::info;

use crate::config::BackendConfig;
use crate::error::{BackendError, Result, VkResultExt};

const VALIDATION_LAYER: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let callback_data = *p_callback_data;
    let message_id_number = callback_data.message_id_number;

    let message_id_name = if callback_data.p_message_id_name.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message_id_name).to_string_lossy()
    };

    let message = if callback_data.p_message.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            tracing::debug!(target: "vulkan", ?message_type, "{message_id_name} ({message_id_number}): {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::info!(target: "vulkan", ?message_type, "{message_id_name} ({message_id_number}): {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: "vulkan", ?message_type, "{message_id_name} ({message_id_number}): {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: "vulkan", ?message_type, "{message_id_name} ({message_id_number}): {message}");
        }
        _ => {
            tracing::trace!(target: "vulkan", ?message_severity, ?message_type, "{message_id_name} ({message_id_number}): {message}");
        }
    }
    vk::FALSE
}

fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXTBuilder<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback))
}

/// Returns the first of `required` that `available` does not list.
pub(crate) fn first_missing<'a>(
    required: &[&'a CStr],
    available: &[vk::ExtensionProperties],
) -> Option<&'a CStr> {
    required.iter().copied().find(|required| {
        !available
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == *required)
    })
}

struct DebugMessenger {
    loader: ash::extensions::ext::DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// The loaded Vulkan entry points and a 1.3 instance.
///
/// Dropping it destroys the messenger and then the instance; every object
/// created from the instance must be gone by then.
pub struct VulkanInstance {
    debug: Option<DebugMessenger>,
    pub instance: Arc<ash::Instance>,
    pub entry: ash::Entry,
}

impl VulkanInstance {
    /// Creates an instance with `VK_KHR_surface` plus `surface_extensions`.
    pub fn new(config: &BackendConfig, surface_extensions: &[&CStr]) -> Result<Self> {
        let entry = unsafe { ash::Entry::load()? };

        let mut required = vec![ash::extensions::khr::Surface::name()];
        required.extend_from_slice(surface_extensions);
        let available = entry
            .enumerate_instance_extension_properties(None)
            .vk_context("vkEnumerateInstanceExtensionProperties")?;
        if let Some(missing) = first_missing(&required, &available) {
            return Err(BackendError::MissingInstanceExtension(
                missing.to_string_lossy().into_owned(),
            ));
        }

        // Validated by BackendConfig::validate, so these cannot contain NUL.
        let app_name = CString::new(config.application_name.as_str())
            .map_err(|e| BackendError::InvalidConfig(e.to_string()))?;
        let eng_name = CString::new(config.engine_name.as_str())
            .map_err(|e| BackendError::InvalidConfig(e.to_string()))?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&eng_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut instance_extensions: Vec<*const c_char> =
            required.iter().map(|name| name.as_ptr()).collect();
        let mut enabled_layer_names: Vec<*const c_char> = Vec::new();
        if config.enable_validation {
            instance_extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
            enabled_layer_names.push(VALIDATION_LAYER.as_ptr());
        }

        let mut messenger_info = debug_messenger_create_info();
        let mut instance_create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&instance_extensions)
            .enabled_layer_names(&enabled_layer_names);
        if config.enable_validation {
            instance_create_info = instance_create_info.push_next(&mut messenger_info);
        }

        let instance = unsafe { entry.create_instance(&instance_create_info, None) }
            .vk_context("vkCreateInstance")?;
        info!("Vulkan instance created successfully.");

        let debug = if config.enable_validation {
            let loader = ash::extensions::ext::DebugUtils::new(&entry, &instance);
            match unsafe { loader.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => {
                    info!("Vulkan debug messenger created successfully.");
                    Some(DebugMessenger { loader, messenger })
                }
                Err(result) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(result).vk_context("vkCreateDebugUtilsMessengerEXT");
                }
            }
        } else {
            None
        };

        Ok(Self { debug, instance: Arc::new(instance), entry })
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug.loader.destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = *src as c_char;
        }
        props
    }

    #[test]
    fn reports_first_missing_extension() {
        let available = [extension(ash::extensions::khr::Surface::name())];
        let required = [
            ash::extensions::khr::Surface::name(),
            ash::extensions::khr::XcbSurface::name(),
        ];
        assert_eq!(
            first_missing(&required, &available),
            Some(ash::extensions::khr::XcbSurface::name())
        );
        assert_eq!(first_missing(&required[..1], &available), None);
    }

    #[test]
    fn instance_creation_tolerates_missing_driver() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();

        match VulkanInstance::new(&BackendConfig::default(), &[ash::extensions::khr::XcbSurface::name()]) {
            Ok(instance) => drop(instance),
            Err(e) => eprintln!("Vulkan instance unavailable on this machine: {e}"),
        }
    }
}

//! Error type and `Result` alias for the Vulkan backend.
//!
//! Failures fall into four groups: capability absence (no device, extension,
//! queue family or surface format fits), resource exhaustion (allocation or
//! object creation failed), collaborator failures (the windowing system or the
//! shader compiler refused a request), and configuration errors. Programming
//! errors such as stale image handles are not represented here; they panic.

use ash::vk;
use thiserror::Error;

/// A specialized `Result` type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    /// A Vulkan call returned an error code.
    #[error("{call} failed: {result}")]
    Vk {
        /// The Vulkan entry point that failed, e.g. `vkCreateImage`.
        call: &'static str,
        #[source]
        result: vk::Result,
    },

    /// The Vulkan loader library could not be opened.
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("required instance extension {0} is not available")]
    MissingInstanceExtension(String),

    /// No enumerated device satisfies the API version floor and the extension
    /// set of any import strategy the windowing system allows.
    #[error("no suitable physical device found")]
    NoSuitableDevice,

    #[error("no queue family supports both graphics and presentation")]
    NoSuitableQueueFamily,

    #[error("surface does not offer format {0:?}")]
    UnsupportedSurfaceFormat(vk::Format),

    #[error("no memory type satisfies the requirements of the {0}")]
    NoSuitableMemoryType(&'static str),

    #[error("pixmap {pixmap:#010x} was exported without a valid format modifier")]
    InvalidFormatModifier { pixmap: u32 },

    #[error("pixmap {pixmap:#010x} was exported without any buffer handle")]
    MissingBufferHandle { pixmap: u32 },

    #[error("shared memory segment: {0}")]
    SharedMemory(#[source] std::io::Error),

    #[error("failed to compile {name}: {message}")]
    ShaderCompilation { name: &'static str, message: String },

    #[error("compiler produced invalid SPIR-V for {name}")]
    InvalidSpirv {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A request to the windowing system failed.
    #[error(transparent)]
    WindowSystem(#[from] anyhow::Error),

    #[error("invalid backend configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse backend configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Attaches the name of the failing Vulkan entry point to a raw `vk::Result`.
pub(crate) trait VkResultExt<T> {
    fn vk_context(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn vk_context(self, call: &'static str) -> Result<T> {
        self.map_err(|result| BackendError::Vk { call, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_errors_name_the_failing_call() {
        let err: Result<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).vk_context("vkAllocateMemory");
        let message = err.unwrap_err().to_string();
        assert!(message.starts_with("vkAllocateMemory failed"), "{message}");
    }

    #[test]
    fn window_system_errors_are_transparent() {
        let err = BackendError::from(anyhow::anyhow!("DRI3 BuffersFromPixmap returned no reply"));
        assert_eq!(err.to_string(), "DRI3 BuffersFromPixmap returned no reply");
    }

    #[test]
    fn invalid_modifier_message_includes_pixmap() {
        let err = BackendError::InvalidFormatModifier { pixmap: 0x00c0_0001 };
        assert_eq!(
            err.to_string(),
            "pixmap 0x00c00001 was exported without a valid format modifier"
        );
    }
}

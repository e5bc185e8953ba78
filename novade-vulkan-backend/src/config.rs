//! Backend configuration.
//!
//! [`BackendConfig`] is usually embedded in the compositor's own configuration
//! file and handed over already deserialized. Fields that are absent fall back
//! to the functions in [`defaults`]; unknown fields are rejected.

use serde::Deserialize;

use crate::error::{BackendError, Result};

mod defaults {
    pub(super) fn application_name() -> String {
        "novade-compositor".to_string()
    }

    pub(super) fn engine_name() -> String {
        "novade-vulkan-backend".to_string()
    }

    pub(super) fn enable_validation() -> bool {
        false
    }

    pub(super) fn vsync() -> bool {
        true
    }

    /// Upper bound on simultaneously sampled images (one descriptor set each).
    pub(super) fn descriptor_pool_capacity() -> u32 {
        32
    }
}

/// Settings consumed once, when the backend context is created.
///
/// ```
/// use novade_vulkan_backend::BackendConfig;
///
/// let config = BackendConfig::from_toml_str("vsync = false").unwrap();
/// assert!(!config.vsync);
/// assert_eq!(config.descriptor_pool_capacity, 32);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Reported to the driver in `VkApplicationInfo`.
    #[serde(default = "defaults::application_name")]
    pub application_name: String,
    #[serde(default = "defaults::engine_name")]
    pub engine_name: String,
    /// Enables `VK_LAYER_KHRONOS_validation` and routes its messages into `tracing`.
    #[serde(default = "defaults::enable_validation")]
    pub enable_validation: bool,
    /// FIFO presentation when set, IMMEDIATE otherwise.
    #[serde(default = "defaults::vsync")]
    pub vsync: bool,
    #[serde(default = "defaults::descriptor_pool_capacity")]
    pub descriptor_pool_capacity: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            application_name: defaults::application_name(),
            engine_name: defaults::engine_name(),
            enable_validation: defaults::enable_validation(),
            vsync: defaults::vsync(),
            descriptor_pool_capacity: defaults::descriptor_pool_capacity(),
        }
    }
}

impl BackendConfig {
    /// Parses and validates a TOML fragment.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.descriptor_pool_capacity == 0 {
            return Err(BackendError::InvalidConfig(
                "descriptor_pool_capacity must be at least 1".to_string(),
            ));
        }
        for (field, value) in [
            ("application_name", &self.application_name),
            ("engine_name", &self.engine_name),
        ] {
            if value.contains('\0') {
                return Err(BackendError::InvalidConfig(format!(
                    "{field} must not contain NUL bytes"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_yields_defaults() {
        let config = BackendConfig::from_toml_str("").unwrap();
        assert_eq!(config, BackendConfig::default());
        assert!(config.vsync);
        assert!(!config.enable_validation);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = BackendConfig::from_toml_str(
            r#"
            application_name = "picom-test"
            enable_validation = true
            vsync = false
            descriptor_pool_capacity = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.application_name, "picom-test");
        assert_eq!(config.engine_name, "novade-vulkan-backend");
        assert!(config.enable_validation);
        assert!(!config.vsync);
        assert_eq!(config.descriptor_pool_capacity, 64);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = BackendConfig::from_toml_str("max_buffer_age = 9").unwrap_err();
        assert!(matches!(err, BackendError::ConfigParse(_)));
    }

    #[test]
    fn zero_pool_capacity_is_invalid() {
        let err = BackendConfig::from_toml_str("descriptor_pool_capacity = 0").unwrap_err();
        assert!(matches!(err, BackendError::InvalidConfig(_)));
    }

    #[test]
    fn names_with_nul_are_invalid() {
        let config = BackendConfig {
            engine_name: "nova\0de".to_string(),
            ..BackendConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

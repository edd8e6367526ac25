//! Append configuration

use serde::Deserialize;
use std::path::Path;

use crate::Result;

/// Environment variable naming the kernel to use (e.g. `serial`, `rayon`).
pub const KERNEL_ENV: &str = "PAGEDKV_KERNEL";

/// Environment variable toggling the duplicate-destination check.
pub const CHECK_OVERLAP_ENV: &str = "PAGEDKV_CHECK_OVERLAP";

/// Configuration for [`Appender`](crate::Appender)
///
/// Can be parsed from JSON, e.g. `{"kernel": "rayon", "check_overlap": false}`.
/// Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppendConfig {
    /// Registered kernel name. `None` picks the highest-priority kernel.
    pub kernel: Option<String>,

    /// Reject batches where two rows resolve to the same `(page, slot)`.
    pub check_overlap: bool,
}

impl Default for AppendConfig {
    fn default() -> Self {
        Self {
            kernel: None,
            check_overlap: true,
        }
    }
}

impl AppendConfig {
    /// Parse configuration from a JSON string
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Build configuration from `PAGEDKV_KERNEL` and `PAGEDKV_CHECK_OVERLAP`.
    ///
    /// Unset variables keep their defaults; an unparseable boolean is
    /// ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(kernel) = lookup(KERNEL_ENV).filter(|k| !k.is_empty()) {
            config.kernel = Some(kernel);
        }
        if let Some(raw) = lookup(CHECK_OVERLAP_ENV) {
            match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.check_overlap = true,
                "0" | "false" | "no" | "off" => config.check_overlap = false,
                _ => log::warn!("ignoring {CHECK_OVERLAP_ENV}={raw:?}: expected a boolean"),
            }
        }
        config
    }
}

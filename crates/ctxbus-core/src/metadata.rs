//! Implementation metadata reported by `getInfo`

use serde::{Deserialize, Serialize};

/// FDC3 standard version implemented by the bus
pub const FDC3_VERSION: &str = "1.2";

/// Provider name used when configuration does not override it
pub const DEFAULT_PROVIDER: &str = "ctxbus";

/// Description of the desktop agent implementation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationMetadata {
    pub fdc3_version: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_version: Option<String>,
}

impl ImplementationMetadata {
    pub fn new(provider: impl Into<String>, provider_version: Option<String>) -> Self {
        ImplementationMetadata {
            fdc3_version: FDC3_VERSION.to_string(),
            provider: provider.into(),
            provider_version,
        }
    }
}

impl Default for ImplementationMetadata {
    fn default() -> Self {
        Self::new(DEFAULT_PROVIDER, None)
    }
}

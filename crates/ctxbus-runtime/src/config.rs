//! Bus configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ctxbus_core::{
    fdc3_system_channels, BusError, BusResult, ChannelDescriptor, ImplementationMetadata,
    DEFAULT_PROVIDER,
};

/// Bus configuration
///
/// Every field has a default, so a JSON document only needs the members it
/// overrides. Durations use humantime notation (`"5s"`, `"250ms"`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Fixed system channel set, in published order
    pub channels: Vec<ChannelDescriptor>,
    /// Provider name reported by `getInfo`
    pub provider: String,
    pub provider_version: Option<String>,
    /// How long `open` waits for a launched application to become reachable
    #[serde(with = "humantime_duration")]
    pub launch_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::fdc3_system_channels()
    }
}

impl BusConfig {
    /// The six FDC3 user channels
    pub fn fdc3_system_channels() -> Self {
        BusConfig {
            channels: fdc3_system_channels(),
            provider: DEFAULT_PROVIDER.to_string(),
            provider_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            launch_timeout: Duration::from_secs(15),
        }
    }

    /// `count` undecorated channels named `channel-1` .. `channel-N`
    pub fn minimal(count: usize) -> Self {
        BusConfig {
            channels: (1..=count)
                .map(|i| ChannelDescriptor::system(format!("channel-{}", i)))
                .collect(),
            launch_timeout: Duration::from_secs(1),
            ..Self::fdc3_system_channels()
        }
    }

    pub fn with_launch_timeout(mut self, launch_timeout: Duration) -> Self {
        self.launch_timeout = launch_timeout;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn from_json_str(json: &str) -> BusResult<Self> {
        let config: BusConfig =
            serde_json::from_str(json).map_err(|e| BusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> BusResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| BusError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Reject configurations the bus cannot run with
    pub fn validate(&self) -> BusResult<()> {
        if self.provider.trim().is_empty() {
            return Err(BusError::Config("provider must not be empty".into()));
        }
        if self.launch_timeout.is_zero() {
            return Err(BusError::Config("launch_timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn implementation_metadata(&self) -> ImplementationMetadata {
        ImplementationMetadata::new(self.provider.clone(), self.provider_version.clone())
    }
}

mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_fdc3_channels() {
        let config = BusConfig::default();
        assert_eq!(config.channels.len(), 6);
        assert_eq!(config.provider, "ctxbus");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_channels() {
        let config = BusConfig::minimal(2);
        let ids: Vec<_> = config.channels.iter().map(|c| c.id.to_string()).collect();
        assert_eq!(ids, vec!["channel-1", "channel-2"]);
    }

    #[test]
    fn test_partial_json_overrides_defaults() {
        let config = BusConfig::from_json_str(
            r#"{
                "provider": "acme-desktop",
                "launch_timeout": "250ms",
                "channels": [ { "id": "desk-1" }, { "id": "desk-2" } ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.provider, "acme-desktop");
        assert_eq!(config.launch_timeout, Duration::from_millis(250));
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.implementation_metadata().provider, "acme-desktop");
    }

    #[test]
    fn test_round_trip_through_json() {
        let config = BusConfig::minimal(3).with_launch_timeout(Duration::from_secs(2));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"2s\""));
        assert_eq!(BusConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            BusConfig::from_json_str(r#"{ "launch_timeout": "soon" }"#),
            Err(BusError::Config(_))
        ));
        assert!(matches!(
            BusConfig::from_json_str(r#"{ "launch_timeout": "0s" }"#),
            Err(BusError::Config(_))
        ));
        assert!(BusConfig::default().with_provider("  ").validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "provider": "from-file" }}"#).unwrap();

        let config = BusConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.provider, "from-file");
        assert!(BusConfig::from_json_file("/nonexistent/ctxbus.json").is_err());
    }
}

//! Connection states and device identity.

use std::fmt;

use crate::config::DeviceConfig;

/// Lifecycle of the link to one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Parked, waiting for `connect()`
    Idle,
    /// Enumerating nearby devices
    Scanning,
    /// Transport connect in progress
    Connecting,
    /// Waiting for the link to settle, then subscribing to notifications
    Subscribing,
    /// Receiving frames and sending keepalives
    Active,
    /// Link lost while active
    Disconnected,
    /// Waiting before the next scan
    Retrying,
    /// Worker has exited
    Stopped,
}

impl ConnectionState {
    /// Whether the worker is on its way to, or holding, a link
    pub fn is_online(&self) -> bool {
        matches!(
            self,
            ConnectionState::Scanning
                | ConnectionState::Connecting
                | ConnectionState::Subscribing
                | ConnectionState::Active
                | ConnectionState::Disconnected
                | ConnectionState::Retrying
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Subscribing => "subscribing",
            ConnectionState::Active => "active",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Retrying => "retrying",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Supported controller families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    FarDriver,
    YuanQu,
}

impl DeviceFamily {
    /// Identify a device from its advertised name
    ///
    /// Case-sensitive substring match against the configured family names.
    pub fn resolve(name: &str, config: &DeviceConfig) -> Option<Self> {
        if !config.fardriver_name.is_empty() && name.contains(&config.fardriver_name) {
            Some(DeviceFamily::FarDriver)
        } else if !config.yuanqu_name.is_empty() && name.contains(&config.yuanqu_name) {
            Some(DeviceFamily::YuanQu)
        } else {
            None
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFamily::FarDriver => f.write_str("FarDriver"),
            DeviceFamily::YuanQu => f.write_str("YuanQu FOC"),
        }
    }
}

/// A device seen during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertised name, if the device broadcasts one
    pub name: Option<String>,
    /// Transport address (MAC, port path, ...)
    pub address: String,
}

impl Advertisement {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }
}

/// A supported controller, resolved once at discovery time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: String,
    pub address: String,
    pub family: DeviceFamily,
}

impl DiscoveredDevice {
    /// Keep the advertisement only if it belongs to a supported family
    pub fn from_advertisement(advertisement: Advertisement, config: &DeviceConfig) -> Option<Self> {
        let name = advertisement.name?;
        let family = DeviceFamily::resolve(&name, config)?;
        Some(Self {
            name,
            address: advertisement.address,
            family,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_families() {
        let config = DeviceConfig::default();

        assert_eq!(
            DeviceFamily::resolve("FarDriver_12AB", &config),
            Some(DeviceFamily::FarDriver)
        );
        assert_eq!(
            DeviceFamily::resolve("BLE YuanQuFOC982 v2", &config),
            Some(DeviceFamily::YuanQu)
        );
        assert_eq!(DeviceFamily::resolve("fardriver", &config), None, "Match is case-sensitive");
        assert_eq!(DeviceFamily::resolve("Headphones", &config), None);
    }

    #[test]
    fn test_empty_family_name_matches_nothing() {
        let config = DeviceConfig {
            fardriver_name: String::new(),
            ..DeviceConfig::default()
        };
        assert_eq!(DeviceFamily::resolve("anything", &config), None);
    }

    #[test]
    fn test_discovered_device_filters_unnamed() {
        let config = DeviceConfig::default();
        let unnamed = Advertisement {
            name: None,
            address: "AA:BB".to_string(),
        };
        assert!(DiscoveredDevice::from_advertisement(unnamed, &config).is_none());

        let device =
            DiscoveredDevice::from_advertisement(Advertisement::new("FarDriver", "AA:BB"), &config)
                .unwrap();
        assert_eq!(device.family, DeviceFamily::FarDriver);
        assert_eq!(device.address, "AA:BB");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Retrying.to_string(), "retrying");
        assert!(ConnectionState::Scanning.is_online());
        assert!(!ConnectionState::Idle.is_online());
        assert!(!ConnectionState::Stopped.is_online());
    }
}

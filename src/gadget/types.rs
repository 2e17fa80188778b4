//! Gadget status and link speed types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result code reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Error,
    FunctionsApplied,
    FunctionsNotApplied,
    ConfigurationNotSupported,
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success | Status::FunctionsApplied)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "SUCCESS",
            Status::Error => "ERROR",
            Status::FunctionsApplied => "FUNCTIONS_APPLIED",
            Status::FunctionsNotApplied => "FUNCTIONS_NOT_APPLIED",
            Status::ConfigurationNotSupported => "CONFIGURATION_NOT_SUPPORTED",
        };
        f.write_str(s)
    }
}

/// Negotiated USB link speed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsbSpeed {
    #[default]
    Unknown,
    Low,
    Full,
    High,
    Super,
    /// super-speed-plus (USB 3.2 Gen 2)
    #[serde(rename = "SUPER_10GB")]
    Super10Gb,
    #[serde(rename = "SUPER_20GB")]
    Super20Gb,
    #[serde(rename = "USB4_GEN2")]
    Usb4Gen2,
    #[serde(rename = "USB4_GEN3")]
    Usb4Gen3,
}

impl UsbSpeed {
    /// Parse the kernel's `current_speed` attribute
    ///
    /// Unrecognised values map to `Unknown`.
    pub fn from_sysfs(value: &str) -> Self {
        match value.trim() {
            "low-speed" => UsbSpeed::Low,
            "full-speed" => UsbSpeed::Full,
            "high-speed" => UsbSpeed::High,
            "super-speed" => UsbSpeed::Super,
            "super-speed-plus" => UsbSpeed::Super10Gb,
            _ => UsbSpeed::Unknown,
        }
    }

    /// High-speed and faster links carry enough traffic to want a fast core
    pub fn is_high_bandwidth(self) -> bool {
        self >= UsbSpeed::High
    }
}

impl fmt::Display for UsbSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UsbSpeed::Unknown => "unknown",
            UsbSpeed::Low => "low-speed",
            UsbSpeed::Full => "full-speed",
            UsbSpeed::High => "high-speed",
            UsbSpeed::Super => "super-speed",
            UsbSpeed::Super10Gb => "super-speed-plus",
            UsbSpeed::Super20Gb => "super-speed-plus-20gb",
            UsbSpeed::Usb4Gen2 => "usb4-gen2",
            UsbSpeed::Usb4Gen3 => "usb4-gen3",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_parsing() {
        assert_eq!(UsbSpeed::from_sysfs("high-speed\n"), UsbSpeed::High);
        assert_eq!(UsbSpeed::from_sysfs(" super-speed-plus "), UsbSpeed::Super10Gb);
        assert_eq!(UsbSpeed::from_sysfs("UNKNOWN"), UsbSpeed::Unknown);
        assert_eq!(UsbSpeed::from_sysfs(""), UsbSpeed::Unknown);
    }

    #[test]
    fn test_bandwidth_threshold() {
        assert!(!UsbSpeed::Full.is_high_bandwidth());
        assert!(!UsbSpeed::Unknown.is_high_bandwidth());
        assert!(UsbSpeed::High.is_high_bandwidth());
        assert!(UsbSpeed::Super10Gb.is_high_bandwidth());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&Status::FunctionsNotApplied).unwrap();
        assert_eq!(json, "\"FUNCTIONS_NOT_APPLIED\"");
        assert!(Status::FunctionsApplied.is_success());
        assert!(!Status::ConfigurationNotSupported.is_success());
    }
}

//! Charging current tuning
//!
//! A charging downstream port (CDP) can source more than the 500 mA a
//! standard port allows, but the charger driver only learns that after
//! enumeration. Once a function switch succeeds the limit is raised when the
//! Type-C port is in default power mode and the BC1.2 detection reports CDP.

use std::path::PathBuf;
use tracing::{debug, info};

use super::sysfs::{read_file, write_file};
use crate::config::{DevicePathsConfig, TuningConfig};
use crate::error::Result;
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Selected entry of a sysfs enum attribute (`"Unknown SDP [CDP] DCP"` → `"CDP"`)
pub fn selected_entry(value: &str) -> Option<&str> {
    let start = value.find('[')?;
    let end = value[start..].find(']')? + start;
    Some(&value[start + 1..end])
}

pub struct ChargingCurrentTuner {
    enabled: bool,
    current_max: PathBuf,
    usb_type: PathBuf,
    power_operation_mode: PathBuf,
    cdp_current_ua: u32,
    throttler: LogThrottler,
}

impl ChargingCurrentTuner {
    pub fn new(paths: &DevicePathsConfig, tuning: &TuningConfig) -> Self {
        Self {
            enabled: tuning.cdp_current_enabled,
            current_max: paths.power_supply_dir.join("current_max"),
            usb_type: paths.power_supply_dir.join("usb_type"),
            power_operation_mode: paths.typec_port_dir.join("power_operation_mode"),
            cdp_current_ua: tuning.cdp_current_max_ua,
            throttler: LogThrottler::with_secs(tuning.log_throttle_secs),
        }
    }

    /// Raise the current limit if the port is a CDP; best-effort
    pub fn on_functions_applied(&self) {
        if !self.enabled {
            return;
        }
        match self.try_apply() {
            Ok(true) => info!("Charging current raised to {} uA on CDP", self.cdp_current_ua),
            Ok(false) => {}
            Err(e) => {
                warn_throttled!(self.throttler, "cdp_current", "Charging current not updated: {}", e);
            }
        }
    }

    fn try_apply(&self) -> Result<bool> {
        let mode = read_file(&self.power_operation_mode)?;
        let usb_type = read_file(&self.usb_type)?;
        let selected = selected_entry(&usb_type).unwrap_or(usb_type.as_str());

        if mode != "default" || selected != "CDP" {
            debug!("No charging current change (mode={}, type={})", mode, selected);
            return Ok(false);
        }

        write_file(&self.current_max, &self.cdp_current_ua.to_string())?;
        Ok(true)
    }
}

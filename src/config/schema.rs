use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Gadget identity and switching behaviour
    pub gadget: GadgetConfig,
    /// Platform device node paths
    pub paths: DevicePathsConfig,
    /// IRQ affinity and charging current tuning
    pub tuning: TuningConfig,
    /// HTTP service settings
    pub web: WebConfig,
}

/// Gadget configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GadgetConfig {
    /// UDC name written to the gadget's `UDC` attribute on pull-up
    pub udc_name: String,
    /// Time the gadget stays pulled down so the host notices the disconnect
    pub disconnect_wait_ms: u64,
    /// Timeout applied when a request does not specify one
    pub default_timeout_ms: u64,
    /// Upper bound for reading `current_speed`
    pub speed_read_timeout_ms: u64,
    /// Extcon/gadget-state polling interval of the monitor
    pub monitor_poll_ms: u64,
    /// Extra vendor function instances linked after the standard ones
    /// (e.g., "diag.diag", "dm.gs")
    pub vendor_functions: Vec<String>,
    /// Function set applied at startup, comma-separated (e.g., "adb")
    pub initial_functions: Option<String>,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        Self {
            udc_name: "11210000.dwc3".to_string(),
            disconnect_wait_ms: 50,
            default_timeout_ms: 2500,
            speed_read_timeout_ms: 200,
            monitor_poll_ms: 100,
            vendor_functions: Vec::new(),
            initial_functions: None,
        }
    }
}

/// Device node paths
///
/// Defaults match the Exynos dwc3 layout; every path can be overridden for
/// other boards or for tests running against a fake sysfs tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DevicePathsConfig {
    /// Gadget directory in ConfigFS
    pub gadget_dir: PathBuf,
    /// UDC sysfs directory (contains `current_speed`)
    pub udc_dir: PathBuf,
    /// FunctionFS mount root (contains `adb/`, `mtp/`, `ptp/`)
    pub ffs_root: PathBuf,
    /// Interrupt table
    pub proc_interrupts: PathBuf,
    /// Per-IRQ directory root
    pub proc_irq_dir: PathBuf,
    /// Extcon Type-C cable state
    pub extcon_state: PathBuf,
    /// Gadget driver state
    pub gadget_state: PathBuf,
    /// USB power supply directory
    pub power_supply_dir: PathBuf,
    /// Type-C port directory
    pub typec_port_dir: PathBuf,
}

impl Default for DevicePathsConfig {
    fn default() -> Self {
        Self {
            gadget_dir: PathBuf::from("/config/usb_gadget/g1"),
            udc_dir: PathBuf::from("/sys/class/udc/11210000.dwc3"),
            ffs_root: PathBuf::from("/dev/usb-ffs"),
            proc_interrupts: PathBuf::from("/proc/interrupts"),
            proc_irq_dir: PathBuf::from("/proc/irq"),
            extcon_state: PathBuf::from("/sys/class/extcon/extcon0/cable.0/state"),
            gadget_state: PathBuf::from(
                "/sys/devices/platform/11210000.usb/dwc3_exynos_gadget_state",
            ),
            power_supply_dir: PathBuf::from("/sys/class/power_supply/usb"),
            typec_port_dir: PathBuf::from("/sys/class/typec/port0"),
        }
    }
}

/// Performance tuning configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TuningConfig {
    /// Steer the gadget IRQ according to link speed
    pub irq_affinity_enabled: bool,
    /// Device name searched for in the interrupt table
    pub irq_device_name: String,
    /// CPU list used for high-speed and faster links
    pub big_core: String,
    /// CPU list used for slower links and disconnect
    pub medium_core: String,
    /// Raise the charging current on charging downstream ports
    pub cdp_current_enabled: bool,
    /// Current limit written on a CDP, in microamps
    pub cdp_current_max_ua: u32,
    /// Log throttle interval in seconds for best-effort failures
    pub log_throttle_secs: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            irq_affinity_enabled: true,
            irq_device_name: "11210000.dwc3".to_string(),
            big_core: "6".to_string(),
            medium_core: "4".to_string(),
            cdp_current_enabled: true,
            cdp_current_max_ua: 1_500_000,
            log_throttle_secs: 5,
        }
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// HTTP port
    pub http_port: u16,
    /// Bind address
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            http_port: 8086,
            bind_address: "127.0.0.1".to_string(),
        }
    }
}

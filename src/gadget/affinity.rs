//! Gadget IRQ affinity steering
//!
//! High-speed and faster links (and tethering) move the controller interrupt
//! to a performance core; slower links and disconnects move it back to an
//! efficiency core. Purely best-effort: failures are logged and never reach
//! the caller.

use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::sysfs::{read_file, write_file};
use super::types::UsbSpeed;
use crate::config::{DevicePathsConfig, TuningConfig};
use crate::error::{AppError, Result};
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Interrupt steering strategy
pub trait IrqAffinity: Send + Sync {
    /// Steer the gadget IRQ for the observed link speed
    fn apply(&self, speed: UsbSpeed, tethering: bool);
}

/// Strategy for platforms without IRQ steering
#[derive(Debug, Default)]
pub struct NoopAffinity;

impl IrqAffinity for NoopAffinity {
    fn apply(&self, _speed: UsbSpeed, _tethering: bool) {}
}

/// Find the IRQ number of `device` in a `/proc/interrupts` table
pub fn parse_irq_number(table: &str, device: &str) -> Option<u32> {
    table
        .lines()
        .find(|line| line.split_whitespace().any(|token| token == device))
        .and_then(|line| line.split(':').next())
        .and_then(|irq| irq.trim().parse().ok())
}

enum IrqPath {
    /// Not found yet; one more lookup allowed
    Pending,
    Resolved(PathBuf),
    /// Lookup failed twice; steering disabled for the process lifetime
    Unavailable,
}

struct AffinityState {
    irq_path: IrqPath,
    applied_core: Option<String>,
}

/// `/proc/irq/N/smp_affinity_list` based steering
pub struct ProcIrqAffinity {
    interrupts: PathBuf,
    irq_dir: PathBuf,
    device_name: String,
    big_core: String,
    medium_core: String,
    state: Mutex<AffinityState>,
    throttler: LogThrottler,
}

impl ProcIrqAffinity {
    /// Create the tuner, resolving the IRQ eagerly
    ///
    /// A failed lookup here is retried once on first use, since the UDC
    /// driver may bind after the daemon starts.
    pub fn new(paths: &DevicePathsConfig, tuning: &TuningConfig) -> Self {
        let tuner = Self {
            interrupts: paths.proc_interrupts.clone(),
            irq_dir: paths.proc_irq_dir.clone(),
            device_name: tuning.irq_device_name.clone(),
            big_core: tuning.big_core.clone(),
            medium_core: tuning.medium_core.clone(),
            state: Mutex::new(AffinityState {
                irq_path: IrqPath::Pending,
                applied_core: None,
            }),
            throttler: LogThrottler::with_secs(tuning.log_throttle_secs),
        };

        match tuner.resolve() {
            Ok(path) => {
                info!("Gadget IRQ affinity file: {}", path.display());
                tuner.state.lock().irq_path = IrqPath::Resolved(path);
            }
            Err(e) => debug!("Gadget IRQ not resolved at startup: {}", e),
        }
        tuner
    }

    fn resolve(&self) -> Result<PathBuf> {
        let table = read_file(&self.interrupts)?;
        let irq = parse_irq_number(&table, &self.device_name).ok_or_else(|| {
            AppError::Gadget(format!(
                "{} not found in {}",
                self.device_name,
                self.interrupts.display()
            ))
        })?;
        Ok(self
            .irq_dir
            .join(irq.to_string())
            .join("smp_affinity_list"))
    }

    /// Resolved affinity file, if any
    pub fn irq_path(&self) -> Option<PathBuf> {
        match &self.state.lock().irq_path {
            IrqPath::Resolved(path) => Some(path.clone()),
            _ => None,
        }
    }

    fn target_core(&self, speed: UsbSpeed, tethering: bool) -> &str {
        if tethering || speed.is_high_bandwidth() {
            &self.big_core
        } else {
            &self.medium_core
        }
    }
}

impl IrqAffinity for ProcIrqAffinity {
    fn apply(&self, speed: UsbSpeed, tethering: bool) {
        let core = self.target_core(speed, tethering).to_string();
        let mut state = self.state.lock();

        if state.applied_core.as_deref() == Some(core.as_str()) {
            return;
        }

        let cached = match &state.irq_path {
            IrqPath::Resolved(path) => Some(path.clone()),
            IrqPath::Unavailable => return,
            IrqPath::Pending => None,
        };
        let path = match cached {
            Some(path) => path,
            None => match self.resolve() {
                Ok(path) => {
                    info!("Gadget IRQ affinity file: {}", path.display());
                    state.irq_path = IrqPath::Resolved(path.clone());
                    path
                }
                Err(e) => {
                    warn!("Gadget IRQ steering disabled: {}", e);
                    state.irq_path = IrqPath::Unavailable;
                    return;
                }
            },
        };

        match write_file(&path, &core) {
            Ok(()) => {
                info!("Gadget IRQ moved to CPU {} ({})", core, speed);
                self.throttler.clear("irq_write");
                state.applied_core = Some(core);
            }
            Err(e) => {
                warn_throttled!(self.throttler, "irq_write", "Cannot move gadget IRQ to CPU {}: {}", core, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::sysfs::create_dir;
    use std::path::Path;

    const INTERRUPTS: &str = "           CPU0       CPU1
 38:          0          0     GICv3  79 Level     arch_timer
463:     120345          0     GICv3 382 Level     11210000.dwc3
464:          2          0     GICv3 383 Level     11110000.usb
";

    fn fake_proc(root: &Path, table: &str) -> (DevicePathsConfig, PathBuf) {
        let paths = DevicePathsConfig {
            proc_interrupts: root.join("interrupts"),
            proc_irq_dir: root.join("irq"),
            ..Default::default()
        };
        write_file(&paths.proc_interrupts, table).unwrap();
        let affinity = paths.proc_irq_dir.join("463/smp_affinity_list");
        create_dir(affinity.parent().unwrap()).unwrap();
        (paths, affinity)
    }

    #[test]
    fn test_parse_irq_number() {
        assert_eq!(parse_irq_number(INTERRUPTS, "11210000.dwc3"), Some(463));
        assert_eq!(parse_irq_number(INTERRUPTS, "13200000.dwc3"), None);
        assert_eq!(parse_irq_number("", "11210000.dwc3"), None);

        let table = "470:  0  0  GICv3 390 Level  11210000.dwc3-otg\n\
                     471:  9  0  GICv3 391 Level  11210000.dwc3\n";
        assert_eq!(parse_irq_number(table, "11210000.dwc3"), Some(471));
        assert_eq!(parse_irq_number(INTERRUPTS, "dwc3"), None);
    }

    #[test]
    fn test_steers_by_speed() {
        let dir = tempfile::tempdir().unwrap();
        let (paths, affinity) = fake_proc(dir.path(), INTERRUPTS);
        let tuner = ProcIrqAffinity::new(&paths, &TuningConfig::default());
        assert_eq!(tuner.irq_path(), Some(affinity.clone()));

        tuner.apply(UsbSpeed::Super, false);
        assert_eq!(read_file(&affinity).unwrap(), "6");

        tuner.apply(UsbSpeed::Full, false);
        assert_eq!(read_file(&affinity).unwrap(), "4");

        tuner.apply(UsbSpeed::Unknown, true);
        assert_eq!(read_file(&affinity).unwrap(), "6");
    }

    #[test]
    fn test_skips_redundant_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (paths, affinity) = fake_proc(dir.path(), INTERRUPTS);
        let tuner = ProcIrqAffinity::new(&paths, &TuningConfig::default());

        tuner.apply(UsbSpeed::High, false);
        std::fs::write(&affinity, "0-7\n").unwrap();
        tuner.apply(UsbSpeed::Super, false);
        assert_eq!(read_file(&affinity).unwrap(), "0-7");
    }

    #[test]
    fn test_unresolvable_irq_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (paths, affinity) = fake_proc(dir.path(), "  38: 0 0 arch_timer\n");
        let tuner = ProcIrqAffinity::new(&paths, &TuningConfig::default());
        assert_eq!(tuner.irq_path(), None);

        tuner.apply(UsbSpeed::Super, false);
        assert!(!affinity.exists());

        // The table now lists the device, but steering stays disabled
        write_file(&paths.proc_interrupts, INTERRUPTS).unwrap();
        tuner.apply(UsbSpeed::Full, false);
        assert!(!affinity.exists());
        assert_eq!(tuner.irq_path(), None);
    }

    #[test]
    fn test_late_resolution_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let (paths, affinity) = fake_proc(dir.path(), "");
        let tuner = ProcIrqAffinity::new(&paths, &TuningConfig::default());

        write_file(&paths.proc_interrupts, INTERRUPTS).unwrap();
        tuner.apply(UsbSpeed::High, false);
        assert_eq!(read_file(&affinity).unwrap(), "6");
    }
}

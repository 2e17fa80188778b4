//! Gadget link/unlink primitives
//!
//! [`GadgetBackend`] is the seam between the switch controller and the
//! kernel. [`ConfigFsBackend`] drives a pre-created ConfigFS gadget (function
//! directories already exist, as set up by init scripts); tests substitute
//! simulated backends.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::function::UsbFunction;
use super::sysfs::{list_symlinks, read_file, remove_file, create_symlink, write_file};
use crate::config::{DevicePathsConfig, GadgetConfig};
use crate::error::{AppError, Result};

/// ConfigFS configuration directory linked functions live in
const CONFIG_NAME: &str = "configs/b.1";

/// Value written to `UDC` to unbind the gadget
const UDC_NONE: &str = "none";

/// Low-level gadget operations
pub trait GadgetBackend: Send + Sync {
    /// Remove every function link from the active configuration
    fn unlink_functions(&self) -> Result<()>;

    /// Link function instance `instance` as the `index`-th function
    fn link_function(&self, instance: &str, index: usize) -> Result<()>;

    /// Program idVendor/idProduct
    fn set_vid_pid(&self, vid: u16, pid: u16) -> Result<()>;

    /// Enable or disable Microsoft OS descriptors
    fn set_os_descriptors(&self, enabled: bool) -> Result<()>;

    /// FunctionFS endpoint files that must exist before pull-up
    fn ffs_endpoints(&self, function: UsbFunction) -> Vec<PathBuf>;

    /// Bind the gadget to the UDC
    fn pull_up(&self) -> Result<()>;

    /// Unbind the gadget from the UDC
    fn pull_down(&self) -> Result<()>;

    /// Whether the gadget is currently bound to a UDC
    fn is_pulled_up(&self) -> bool;

    /// Pull down, clear device class and OS descriptor state, unlink all
    fn reset_gadget(&self) -> Result<()>;

    /// Link ADB and return the endpoints its daemon will create
    fn add_adb(&self, index: usize) -> Result<Vec<PathBuf>> {
        self.set_os_descriptors(true)?;
        self.link_function(UsbFunction::Adb.instance(), index)?;
        Ok(self.ffs_endpoints(UsbFunction::Adb))
    }
}

/// ConfigFS-backed gadget
pub struct ConfigFsBackend {
    gadget_dir: PathBuf,
    config_dir: PathBuf,
    ffs_root: PathBuf,
    udc_name: String,
}

impl ConfigFsBackend {
    pub fn new(paths: &DevicePathsConfig, gadget: &GadgetConfig) -> Self {
        Self {
            gadget_dir: paths.gadget_dir.clone(),
            config_dir: paths.gadget_dir.join(CONFIG_NAME),
            ffs_root: paths.ffs_root.clone(),
            udc_name: gadget.udc_name.clone(),
        }
    }

    /// Check that the gadget skeleton exists
    pub fn is_available(&self) -> bool {
        self.config_dir.exists()
    }

    pub fn gadget_dir(&self) -> &Path {
        &self.gadget_dir
    }

    fn attr(&self, name: &str) -> PathBuf {
        self.gadget_dir.join(name)
    }
}

impl GadgetBackend for ConfigFsBackend {
    fn unlink_functions(&self) -> Result<()> {
        for link in list_symlinks(&self.config_dir)? {
            remove_file(&link)?;
            debug!("Unlinked {}", link.display());
        }
        Ok(())
    }

    fn link_function(&self, instance: &str, index: usize) -> Result<()> {
        let src = self.gadget_dir.join("functions").join(instance);
        if !src.exists() {
            return Err(AppError::Gadget(format!(
                "Function {} not found at {}",
                instance,
                src.display()
            )));
        }

        let dest = self.config_dir.join(format!("function{}", index));
        remove_file(&dest)?;
        create_symlink(&src, &dest)?;
        debug!("Linked {} as function{}", instance, index);
        Ok(())
    }

    fn set_vid_pid(&self, vid: u16, pid: u16) -> Result<()> {
        write_file(&self.attr("idVendor"), &format!("0x{:04x}", vid))?;
        write_file(&self.attr("idProduct"), &format!("0x{:04x}", pid))?;
        debug!("Set VID/PID to {:04x}:{:04x}", vid, pid);
        Ok(())
    }

    fn set_os_descriptors(&self, enabled: bool) -> Result<()> {
        write_file(&self.attr("os_desc/use"), if enabled { "1" } else { "0" })
    }

    fn ffs_endpoints(&self, function: UsbFunction) -> Vec<PathBuf> {
        let dir = self.ffs_root.join(function.name());
        (1..=function.ffs_endpoints())
            .map(|n| dir.join(format!("ep{}", n)))
            .collect()
    }

    fn pull_up(&self) -> Result<()> {
        write_file(&self.attr("UDC"), &self.udc_name)?;
        info!("Gadget pulled up on {}", self.udc_name);
        Ok(())
    }

    fn pull_down(&self) -> Result<()> {
        write_file(&self.attr("UDC"), UDC_NONE)?;
        debug!("Gadget pulled down");
        Ok(())
    }

    fn is_pulled_up(&self) -> bool {
        match read_file(&self.attr("UDC")) {
            Ok(udc) => !udc.is_empty() && udc != UDC_NONE,
            Err(_) => false,
        }
    }

    fn reset_gadget(&self) -> Result<()> {
        // Already-unbound gadgets reject the write on some kernels
        if let Err(e) = self.pull_down() {
            warn!("Gadget cannot be pulled down: {}", e);
        }

        write_file(&self.attr("bDeviceClass"), "0")?;
        write_file(&self.attr("bDeviceSubClass"), "0")?;
        write_file(&self.attr("bDeviceProtocol"), "0")?;
        self.set_os_descriptors(false)?;
        self.unlink_functions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::sysfs::create_dir;

    fn fake_gadget(root: &Path) -> ConfigFsBackend {
        let paths = DevicePathsConfig {
            gadget_dir: root.join("g1"),
            ffs_root: root.join("usb-ffs"),
            ..Default::default()
        };
        create_dir(&paths.gadget_dir.join(CONFIG_NAME)).unwrap();
        create_dir(&paths.gadget_dir.join("os_desc")).unwrap();
        for f in UsbFunction::LINK_ORDER {
            create_dir(&paths.gadget_dir.join("functions").join(f.instance())).unwrap();
        }
        ConfigFsBackend::new(&paths, &GadgetConfig::default())
    }

    #[test]
    fn test_link_and_unlink() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fake_gadget(dir.path());
        assert!(backend.is_available());

        backend.link_function("ffs.mtp", 0).unwrap();
        backend.link_function("gsi.rndis", 1).unwrap();
        let config = backend.gadget_dir().join(CONFIG_NAME);
        assert!(config.join("function0").exists());
        assert!(config.join("function1").exists());

        backend.unlink_functions().unwrap();
        assert!(list_symlinks(&config).unwrap().is_empty());
    }

    #[test]
    fn test_link_missing_function_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fake_gadget(dir.path());
        assert!(backend.link_function("diag.diag", 0).is_err());
    }

    #[test]
    fn test_adb_enables_os_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fake_gadget(dir.path());

        let endpoints = backend.add_adb(0).unwrap();
        assert_eq!(
            endpoints,
            vec![
                dir.path().join("usb-ffs/adb/ep1"),
                dir.path().join("usb-ffs/adb/ep2"),
            ]
        );
        assert_eq!(read_file(&backend.attr("os_desc/use")).unwrap(), "1");
    }

    #[test]
    fn test_pullup_state_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fake_gadget(dir.path());
        assert!(!backend.is_pulled_up());

        backend.set_vid_pid(0x18d1, 0x4ee7).unwrap();
        assert_eq!(read_file(&backend.attr("idProduct")).unwrap(), "0x4ee7");

        backend.link_function("ffs.adb", 0).unwrap();
        backend.pull_up().unwrap();
        assert!(backend.is_pulled_up());

        backend.reset_gadget().unwrap();
        assert!(!backend.is_pulled_up());
        assert_eq!(read_file(&backend.attr("bDeviceClass")).unwrap(), "0");
        assert!(list_symlinks(&backend.gadget_dir().join(CONFIG_NAME))
            .unwrap()
            .is_empty());
    }
}

//! USB gadget functions and function sets

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, Result};

/// Google's USB vendor ID, used for every supported composition
pub const GOOGLE_VENDOR_ID: u16 = 0x18d1;

/// A single linkable USB function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsbFunction {
    Adb,
    Accessory,
    AudioSource,
    Midi,
    Mtp,
    Ptp,
    Rndis,
    Ncm,
}

impl UsbFunction {
    /// Link order: ADB first, then control functions, then bulk-data functions.
    ///
    /// The host enumerates interfaces in this order, so it must not depend on
    /// how the request was built.
    pub const LINK_ORDER: [UsbFunction; 8] = [
        UsbFunction::Adb,
        UsbFunction::Accessory,
        UsbFunction::AudioSource,
        UsbFunction::Midi,
        UsbFunction::Mtp,
        UsbFunction::Ptp,
        UsbFunction::Rndis,
        UsbFunction::Ncm,
    ];

    /// Bit value in a [`FunctionSet`]
    pub const fn bit(self) -> u64 {
        match self {
            UsbFunction::Adb => 1,
            UsbFunction::Accessory => 1 << 1,
            UsbFunction::Mtp => 1 << 2,
            UsbFunction::Midi => 1 << 3,
            UsbFunction::Ptp => 1 << 4,
            UsbFunction::Rndis => 1 << 5,
            UsbFunction::AudioSource => 1 << 6,
            UsbFunction::Ncm => 1 << 10,
        }
    }

    /// Short lowercase name (e.g., "adb", "audio_source")
    pub const fn name(self) -> &'static str {
        match self {
            UsbFunction::Adb => "adb",
            UsbFunction::Accessory => "accessory",
            UsbFunction::AudioSource => "audio_source",
            UsbFunction::Midi => "midi",
            UsbFunction::Mtp => "mtp",
            UsbFunction::Ptp => "ptp",
            UsbFunction::Rndis => "rndis",
            UsbFunction::Ncm => "ncm",
        }
    }

    /// Function directory name under `functions/` in ConfigFS
    pub const fn instance(self) -> &'static str {
        match self {
            UsbFunction::Adb => "ffs.adb",
            UsbFunction::Accessory => "accessory.gs2",
            UsbFunction::AudioSource => "audio_source.gs3",
            UsbFunction::Midi => "midi.gs5",
            UsbFunction::Mtp => "ffs.mtp",
            UsbFunction::Ptp => "ffs.ptp",
            UsbFunction::Rndis => "gsi.rndis",
            UsbFunction::Ncm => "ncm.gs9",
        }
    }

    /// Number of FunctionFS endpoints the userspace daemon must open before
    /// the gadget can be pulled up. Zero for kernel-implemented functions.
    pub const fn ffs_endpoints(self) -> usize {
        match self {
            UsbFunction::Adb => 2,
            UsbFunction::Mtp | UsbFunction::Ptp => 3,
            _ => 0,
        }
    }

    /// Whether this function is implemented in userspace over FunctionFS
    pub const fn is_ffs(self) -> bool {
        self.ffs_endpoints() > 0
    }

    /// Whether this function needs Microsoft OS descriptors
    pub const fn uses_os_descriptors(self) -> bool {
        matches!(self, UsbFunction::Adb | UsbFunction::Mtp | UsbFunction::Ptp)
    }
}

impl fmt::Display for UsbFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UsbFunction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        UsbFunction::LINK_ORDER
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::BadRequest(format!("Unknown USB function: {}", s.trim())))
    }
}

bitflags! {
    /// Bitmask of USB functions requested for the gadget
    ///
    /// Bits outside the known flags are kept (`from_bits_retain`) so that
    /// [`FunctionSet::validate`] can reject them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FunctionSet: u64 {
        const ADB = UsbFunction::Adb.bit();
        const ACCESSORY = UsbFunction::Accessory.bit();
        const MTP = UsbFunction::Mtp.bit();
        const MIDI = UsbFunction::Midi.bit();
        const PTP = UsbFunction::Ptp.bit();
        const RNDIS = UsbFunction::Rndis.bit();
        const AUDIO_SOURCE = UsbFunction::AudioSource.bit();
        const NCM = UsbFunction::Ncm.bit();
    }
}

impl Default for FunctionSet {
    fn default() -> Self {
        Self::NONE
    }
}

impl FunctionSet {
    pub const NONE: FunctionSet = FunctionSet::empty();

    pub fn has(self, function: UsbFunction) -> bool {
        self.contains(function.into())
    }

    /// Bits that do not name a known function
    pub fn unknown_bits(self) -> u64 {
        self.bits() & !Self::all().bits()
    }

    /// Member functions in link order
    pub fn functions(self) -> impl Iterator<Item = UsbFunction> {
        UsbFunction::LINK_ORDER
            .into_iter()
            .filter(move |f| self.has(*f))
    }

    /// Whether any member is a FunctionFS function
    pub fn has_ffs(self) -> bool {
        self.functions().any(UsbFunction::is_ffs)
    }

    pub fn is_tethering(self) -> bool {
        self.intersects(FunctionSet::RNDIS | FunctionSet::NCM)
    }

    /// Product ID for this composition, or `None` when unsupported
    ///
    /// The empty set has no PID because the gadget is never pulled up.
    pub fn product_id(self) -> Option<u16> {
        const ADB: u64 = FunctionSet::ADB.bits();
        const ACC: u64 = FunctionSet::ACCESSORY.bits();
        const MTP: u64 = FunctionSet::MTP.bits();
        const MIDI: u64 = FunctionSet::MIDI.bits();
        const PTP: u64 = FunctionSet::PTP.bits();
        const RNDIS: u64 = FunctionSet::RNDIS.bits();
        const AUDIO: u64 = FunctionSet::AUDIO_SOURCE.bits();
        const NCM: u64 = FunctionSet::NCM.bits();

        let pid = match self.bits() {
            MTP => 0x4ee1,
            x if x == ADB | MTP => 0x4ee2,
            RNDIS => 0x4ee3,
            x if x == ADB | RNDIS => 0x4ee4,
            PTP => 0x4ee5,
            x if x == ADB | PTP => 0x4ee6,
            ADB => 0x4ee7,
            MIDI => 0x4ee8,
            x if x == ADB | MIDI => 0x4ee9,
            NCM => 0x4eeb,
            x if x == ADB | NCM => 0x4eec,
            ACC => 0x2d00,
            x if x == ADB | ACC => 0x2d01,
            AUDIO => 0x2d02,
            x if x == ADB | AUDIO => 0x2d03,
            x if x == ACC | AUDIO => 0x2d04,
            x if x == ADB | ACC | AUDIO => 0x2d05,
            _ => return None,
        };
        Some(pid)
    }

    /// Validate the set and resolve its (VID, PID)
    ///
    /// Returns `Ok(None)` for the empty set.
    pub fn validate(self) -> Result<Option<(u16, u16)>> {
        if self.is_empty() {
            return Ok(None);
        }
        if self.unknown_bits() != 0 {
            return Err(AppError::UnsupportedFunctions(self));
        }
        self.product_id()
            .map(|pid| Some((GOOGLE_VENDOR_ID, pid)))
            .ok_or(AppError::UnsupportedFunctions(self))
    }

    /// Function names in link order
    pub fn names(self) -> Vec<&'static str> {
        self.functions().map(UsbFunction::name).collect()
    }
}

impl From<UsbFunction> for FunctionSet {
    fn from(function: UsbFunction) -> Self {
        FunctionSet::from_bits_retain(function.bit())
    }
}

impl FromIterator<UsbFunction> for FunctionSet {
    fn from_iter<I: IntoIterator<Item = UsbFunction>>(iter: I) -> Self {
        iter.into_iter()
            .fold(FunctionSet::NONE, |set, f| set | f.into())
    }
}

impl fmt::Display for FunctionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut names = self.names().join(",");
        if self.unknown_bits() != 0 {
            if !names.is_empty() {
                names.push(',');
            }
            names.push_str(&format!("0x{:x}", self.unknown_bits()));
        }
        f.write_str(&names)
    }
}

impl FromStr for FunctionSet {
    type Err = AppError;

    /// Parse `"adb,mtp"`, `"none"`, `""` or a raw number (`"5"`, `"0x5"`)
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("none") {
            return Ok(FunctionSet::NONE);
        }
        if let Some(hex) = s.strip_prefix("0x") {
            return u64::from_str_radix(hex, 16)
                .map(FunctionSet::from_bits_retain)
                .map_err(|e| AppError::BadRequest(format!("Invalid function bits {}: {}", s, e)));
        }
        if s.chars().all(|c| c.is_ascii_digit()) {
            return s
                .parse::<u64>()
                .map(FunctionSet::from_bits_retain)
                .map_err(|e| AppError::BadRequest(format!("Invalid function bits {}: {}", s, e)));
        }
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(UsbFunction::from_str)
            .collect::<Result<FunctionSet>>()
    }
}

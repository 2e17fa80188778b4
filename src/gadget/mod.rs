//! USB gadget function switching
//!
//! Architecture:
//! ```text
//! UsbGadgetService (facade: set/get functions, reset, speed)
//!     └── GadgetController (single-flight switch state machine)
//!             ├── GadgetBackend   (ConfigFS link/unlink, VID/PID, UDC)
//!             ├── GadgetMonitor   (FunctionFS readiness, link state)
//!             ├── IrqAffinity     (speed-driven IRQ steering)
//!             └── ChargingCurrentTuner
//! ```

pub mod affinity;
pub mod backend;
pub mod callback;
pub mod controller;
pub mod function;
pub mod monitor;
pub mod power;
pub mod service;
pub mod sysfs;
pub mod types;

pub use affinity::{IrqAffinity, NoopAffinity, ProcIrqAffinity};
pub use backend::{ConfigFsBackend, GadgetBackend};
pub use callback::{CallbackReply, ChannelCallback, GadgetCallback};
pub use controller::{GadgetController, GadgetOperationState};
pub use function::{FunctionSet, UsbFunction};
pub use monitor::{FfsMonitor, GadgetMonitor};
pub use power::ChargingCurrentTuner;
pub use service::UsbGadgetService;
pub use types::{Status, UsbSpeed};

//! usb-gadgetd - USB gadget function switching daemon
//!
//! Switches the composite USB personality (ADB, MTP, tethering, ...) of an
//! embedded Linux device through ConfigFS, reports the negotiated link speed
//! and steers the controller interrupt according to it.

pub mod config;
pub mod error;
pub mod events;
pub mod gadget;
pub mod state;
pub mod utils;
pub mod web;

pub use error::{AppError, Result};

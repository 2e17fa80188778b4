//! Gadget event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::gadget::{FunctionSet, UsbSpeed};

/// Gadget event
///
/// Serialized as:
/// ```json
/// {
///   "event": "gadget.link_state_changed",
///   "data": { "connected": true, "gadget_state": "configured" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum GadgetEvent {
    /// Cable or gadget driver state changed
    #[serde(rename = "gadget.link_state_changed")]
    LinkStateChanged {
        /// Whether the extcon cable state reports an attached host
        connected: bool,
        /// Raw gadget driver state (e.g., "configured", "disconnected")
        gadget_state: Option<String>,
    },

    /// The gadget was pulled up (bound to the UDC) or pulled down
    #[serde(rename = "gadget.pullup_changed")]
    PullUpChanged { pulled_up: bool },

    /// A function switch finished
    #[serde(rename = "gadget.functions_changed")]
    FunctionsChanged {
        functions: FunctionSet,
        applied: bool,
    },

    /// Negotiated link speed changed
    #[serde(rename = "gadget.speed_changed")]
    SpeedChanged { speed: UsbSpeed },
}

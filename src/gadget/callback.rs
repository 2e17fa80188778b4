//! Caller notification
//!
//! Every request carries an optional [`GadgetCallback`]. The controller is the
//! only component that invokes it, and invokes it exactly once per request.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use super::function::FunctionSet;
use super::types::{Status, UsbSpeed};

/// Receives the outcome of gadget requests
///
/// Callbacks run on the controller's task while the switch lock is held, so
/// implementations must not block or call back into the controller.
pub trait GadgetCallback: Send + Sync {
    fn set_current_usb_functions_cb(&self, _functions: FunctionSet, _status: Status) {}

    fn get_current_usb_functions_cb(&self, _functions: FunctionSet, _status: Status) {}

    fn get_usb_speed_cb(&self, _speed: UsbSpeed) {}
}

/// A callback invocation, as delivered by [`ChannelCallback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackReply {
    SetFunctions { functions: FunctionSet, status: Status },
    CurrentFunctions { functions: FunctionSet, status: Status },
    Speed(UsbSpeed),
}

/// Forwards callback invocations into a channel
pub struct ChannelCallback {
    tx: mpsc::UnboundedSender<CallbackReply>,
}

impl ChannelCallback {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<CallbackReply>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn send(&self, reply: CallbackReply) {
        // The requester may have gone away (e.g. HTTP client disconnected)
        let _ = self.tx.send(reply);
    }
}

impl GadgetCallback for ChannelCallback {
    fn set_current_usb_functions_cb(&self, functions: FunctionSet, status: Status) {
        self.send(CallbackReply::SetFunctions { functions, status });
    }

    fn get_current_usb_functions_cb(&self, functions: FunctionSet, status: Status) {
        self.send(CallbackReply::CurrentFunctions { functions, status });
    }

    fn get_usb_speed_cb(&self, speed: UsbSpeed) {
        self.send(CallbackReply::Speed(speed));
    }
}

/// Outstanding completion of one function switch
///
/// `complete` consumes the value, so it can fire at most once. If the switch
/// task dies before completing (panic, or runtime shutdown), `Drop` reports
/// `Error` so the caller still hears back exactly once.
pub(crate) struct PendingCallback {
    callback: Option<Arc<dyn GadgetCallback>>,
    functions: FunctionSet,
}

impl PendingCallback {
    pub(crate) fn new(callback: Option<Arc<dyn GadgetCallback>>, functions: FunctionSet) -> Self {
        Self {
            callback,
            functions,
        }
    }

    pub(crate) fn complete(mut self, status: Status) {
        if let Some(callback) = self.callback.take() {
            callback.set_current_usb_functions_cb(self.functions, status);
        }
    }
}

impl Drop for PendingCallback {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            warn!("Function switch to {} abandoned before completion", self.functions);
            callback.set_current_usb_functions_cb(self.functions, Status::Error);
        }
    }
}

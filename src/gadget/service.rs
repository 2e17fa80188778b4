//! Gadget service facade
//!
//! The four operations exposed to clients. Each delegates straight into the
//! [`GadgetController`]; the facade only converts wire-level arguments.

use std::sync::Arc;
use std::time::Duration;

use super::callback::GadgetCallback;
use super::controller::GadgetController;
use super::function::FunctionSet;
use super::types::Status;

pub struct UsbGadgetService {
    controller: Arc<GadgetController>,
    default_timeout_ms: u64,
}

impl UsbGadgetService {
    pub fn new(controller: Arc<GadgetController>, default_timeout_ms: u64) -> Self {
        Self {
            controller,
            default_timeout_ms,
        }
    }

    /// Switch to `functions`; the outcome arrives through `callback`
    ///
    /// `timeout_ms == 0` means fire-and-forget: no pull-up confirmation is
    /// awaited.
    pub async fn set_current_usb_functions(
        &self,
        functions: FunctionSet,
        callback: Option<Arc<dyn GadgetCallback>>,
        timeout_ms: u64,
    ) {
        self.controller
            .switch_functions(functions, callback, Duration::from_millis(timeout_ms))
            .await;
    }

    pub async fn get_current_usb_functions(&self, callback: Arc<dyn GadgetCallback>) {
        self.controller.query_current_functions(callback).await;
    }

    pub async fn reset(&self) -> Status {
        self.controller.reset_gadget().await
    }

    pub async fn get_usb_speed(&self, callback: Arc<dyn GadgetCallback>) {
        self.controller.query_usb_speed(callback).await;
    }

    /// Timeout used when a client does not specify one
    pub fn default_timeout_ms(&self) -> u64 {
        self.default_timeout_ms
    }

    pub fn controller(&self) -> &Arc<GadgetController> {
        &self.controller
    }
}

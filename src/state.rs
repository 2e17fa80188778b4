use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::events::EventBus;
use crate::gadget::UsbGadgetService;

/// Application-wide state shared across handlers
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Gadget service facade; the only entry point for gadget operations
    pub gadget: Arc<UsbGadgetService>,
    /// Event bus for gadget notifications
    pub events: Arc<EventBus>,
    /// Process shutdown signal
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: ConfigStore,
        gadget: Arc<UsbGadgetService>,
        events: Arc<EventBus>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            gadget,
            events,
            shutdown,
        })
    }
}

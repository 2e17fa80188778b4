//! Function-switch controller
//!
//! Owns the gadget operation state and serializes every reconfiguration
//! through one lock:
//!
//! ```text
//! validate ─▶ lock ─▶ tear down ─▶ quiesce ─▶ VID/PID ─▶ link ─▶ pull-up ─▶ wait
//!                                                                          │
//!            unlock ◀─ callback (exactly once) ◀─ rollback on failure ◀────┘
//! ```
//!
//! Switches and resets run on their own task, so a caller that goes away
//! (e.g. an HTTP client disconnecting) cannot cut a sequence short.
//!
//! Link speed observations (explicit queries and monitor link events) feed
//! the IRQ affinity strategy; they never wait on the switch lock. Steering
//! writes happen on the blocking pool, one at a time, latest request wins.

use parking_lot::Mutex as SyncMutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::affinity::IrqAffinity;
use super::backend::GadgetBackend;
use super::callback::{GadgetCallback, PendingCallback};
use super::function::{FunctionSet, UsbFunction};
use super::monitor::GadgetMonitor;
use super::power::ChargingCurrentTuner;
use super::sysfs::read_file_timeout;
use super::types::{Status, UsbSpeed};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::events::{EventBus, GadgetEvent};
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Gadget state owned by the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GadgetOperationState {
    /// Last requested function set
    pub current_functions: FunctionSet,
    /// Whether `current_functions` is live on the bus
    pub functions_applied: bool,
}

#[derive(Debug, Default)]
struct SpeedState {
    observed: UsbSpeed,
    tethering: bool,
}

/// Latest IRQ steering request: (link speed, tethering)
type SteeringRequest = (UsbSpeed, bool);

/// Function-switch controller
pub struct GadgetController {
    backend: Arc<dyn GadgetBackend>,
    monitor: Arc<dyn GadgetMonitor>,
    steering: watch::Sender<SteeringRequest>,
    charging: Option<ChargingCurrentTuner>,
    events: Arc<EventBus>,
    shutdown: CancellationToken,
    /// Single-flight lock; FIFO, so queued switches run in arrival order
    state: Mutex<GadgetOperationState>,
    speed: SyncMutex<SpeedState>,
    speed_path: PathBuf,
    disconnect_wait: Duration,
    speed_read_timeout: Duration,
    vendor_functions: Vec<String>,
    throttler: LogThrottler,
}

impl GadgetController {
    /// Create a controller without IRQ steering or charging tuning
    pub fn new(
        backend: Arc<dyn GadgetBackend>,
        monitor: Arc<dyn GadgetMonitor>,
        events: Arc<EventBus>,
        config: &AppConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            backend,
            monitor,
            steering: watch::channel((UsbSpeed::Unknown, false)).0,
            charging: None,
            events,
            shutdown,
            state: Mutex::new(GadgetOperationState::default()),
            speed: SyncMutex::new(SpeedState::default()),
            speed_path: config.paths.udc_dir.join("current_speed"),
            disconnect_wait: Duration::from_millis(config.gadget.disconnect_wait_ms),
            speed_read_timeout: Duration::from_millis(config.gadget.speed_read_timeout_ms),
            vendor_functions: config.gadget.vendor_functions.clone(),
            throttler: LogThrottler::with_secs(config.tuning.log_throttle_secs),
        }
    }

    /// Use `affinity` to steer the gadget IRQ
    ///
    /// Spawns the steering worker, so it must be called inside the runtime.
    pub fn with_affinity(self, affinity: Arc<dyn IrqAffinity>) -> Self {
        let rx = self.steering.subscribe();
        tokio::spawn(steer_irq(affinity, rx, self.shutdown.clone()));
        self
    }

    /// Tune the charging current after successful switches
    pub fn with_charging_tuner(mut self, tuner: ChargingCurrentTuner) -> Self {
        self.charging = Some(tuner);
        self
    }

    /// Reconfigure the gadget to `target`
    ///
    /// The callback fires exactly once. A zero `timeout` returns right after
    /// the hardware writes without waiting for pull-up confirmation. The
    /// sequence runs to completion even if the returned future is dropped.
    pub async fn switch_functions(
        self: &Arc<Self>,
        target: FunctionSet,
        callback: Option<Arc<dyn GadgetCallback>>,
        timeout: Duration,
    ) {
        let controller = self.clone();
        let task = tokio::spawn(async move {
            controller.run_switch(target, callback, timeout).await;
        });
        if let Err(e) = task.await {
            error!("Function switch task failed: {}", e);
        }
    }

    async fn run_switch(
        &self,
        target: FunctionSet,
        callback: Option<Arc<dyn GadgetCallback>>,
        timeout: Duration,
    ) {
        let pending = PendingCallback::new(callback, target);

        // Configuration errors never touch the hardware or the state
        let vid_pid = match target.validate() {
            Ok(vid_pid) => vid_pid,
            Err(e) => {
                warn!("Rejecting function switch: {}", e);
                pending.complete(Status::ConfigurationNotSupported);
                return;
            }
        };

        let mut state = self.state.lock().await;
        info!(
            "Switching USB functions {} -> {} (timeout {:?})",
            state.current_functions, target, timeout
        );
        state.current_functions = target;
        state.functions_applied = false;

        let status = match self.apply_functions(target, vid_pid, timeout).await {
            Ok(applied) => {
                state.functions_applied = applied;
                info!("USB functions {} set (applied: {})", target, applied);
                Status::Success
            }
            Err(e) => {
                error!("Switching USB functions to {} failed: {}", target, e);
                self.rollback();
                Status::Error
            }
        };

        self.events.publish(GadgetEvent::FunctionsChanged {
            functions: target,
            applied: state.functions_applied,
        });
        pending.complete(status);

        if status == Status::Success && !target.is_empty() {
            if let Some(charging) = &self.charging {
                charging.on_functions_applied();
            }
        }
        self.set_tethering(status == Status::Success && target.is_tethering());
    }

    /// Tear down, quiesce, then bring up `target`
    ///
    /// Returns whether the functions are confirmed live.
    async fn apply_functions(
        &self,
        target: FunctionSet,
        vid_pid: Option<(u16, u16)>,
        timeout: Duration,
    ) -> Result<bool> {
        // Unconditional: tracked state may have drifted from the hardware
        self.tear_down()?;

        // Leave the gadget pulled down long enough for the host to notice
        tokio::time::sleep(self.disconnect_wait).await;

        let Some((vid, pid)) = vid_pid else {
            info!("No functions requested, gadget left pulled down");
            return Ok(true);
        };

        self.backend.set_vid_pid(vid, pid)?;
        let ffs = self.link_functions(target)?;

        if !ffs {
            // Kernel functions are ready as soon as they are linked
            self.backend.pull_up()?;
            return Ok(true);
        }

        self.monitor.start();
        if timeout.is_zero() {
            return Ok(self.monitor.is_pulled_up());
        }

        tokio::select! {
            pulled_up = self.monitor.wait_for_pull_up(timeout) => {
                if pulled_up {
                    Ok(true)
                } else {
                    Err(AppError::Timeout(timeout.as_millis() as u64))
                }
            }
            _ = self.shutdown.cancelled() => Err(AppError::Cancelled),
        }
    }

    /// Link `target` in link order, then vendor functions
    ///
    /// Returns whether any FunctionFS function was linked.
    fn link_functions(&self, target: FunctionSet) -> Result<bool> {
        let mut index = 0;
        let mut ffs = false;

        for function in target.functions() {
            if function == UsbFunction::Adb {
                let endpoints = self.backend.add_adb(index)?;
                self.monitor.add_endpoints(endpoints);
                ffs = true;
            } else {
                if function.uses_os_descriptors() {
                    self.backend.set_os_descriptors(true)?;
                }
                self.backend.link_function(function.instance(), index)?;
                if function.is_ffs() {
                    self.monitor
                        .add_endpoints(self.backend.ffs_endpoints(function));
                    ffs = true;
                }
            }
            debug!("Linked {} as function{}", function, index);
            index += 1;
        }

        for vendor in &self.vendor_functions {
            self.backend.link_function(vendor, index)?;
            index += 1;
        }

        Ok(ffs)
    }

    fn tear_down(&self) -> Result<()> {
        if !self.monitor.is_running() {
            debug!("Monitor not running");
        }
        // Also drops endpoints registered by an earlier failed link
        self.monitor.reset();
        self.backend.reset_gadget()
    }

    /// Leave the gadget torn down after a failed switch
    fn rollback(&self) {
        self.monitor.reset();
        if let Err(e) = self.backend.reset_gadget() {
            error!("Rollback failed, gadget may be inconsistent: {}", e);
        }
    }

    /// Snapshot of the operation state, taken under the switch lock
    pub async fn state(&self) -> GadgetOperationState {
        *self.state.lock().await
    }

    /// Report the current function set and whether it is applied
    pub async fn query_current_functions(&self, callback: Arc<dyn GadgetCallback>) {
        let state = self.state.lock().await;
        let status = if state.functions_applied {
            Status::FunctionsApplied
        } else {
            Status::FunctionsNotApplied
        };
        callback.get_current_usb_functions_cb(state.current_functions, status);
    }

    /// Tear down and hard-reset the gadget without reapplying functions
    pub async fn reset_gadget(self: &Arc<Self>) -> Status {
        let controller = self.clone();
        let task = tokio::spawn(async move { controller.run_reset().await });
        match task.await {
            Ok(status) => status,
            Err(e) => {
                error!("Gadget reset task failed: {}", e);
                Status::Error
            }
        }
    }

    async fn run_reset(&self) -> Status {
        let mut state = self.state.lock().await;
        info!("Resetting USB gadget");
        state.functions_applied = false;

        self.monitor.reset();
        let status = match self.backend.reset_gadget() {
            Ok(()) => {
                tokio::time::sleep(self.disconnect_wait).await;
                Status::Success
            }
            Err(e) => {
                error!("Gadget reset failed: {}", e);
                Status::Error
            }
        };

        self.events.publish(GadgetEvent::FunctionsChanged {
            functions: state.current_functions,
            applied: false,
        });
        self.set_tethering(false);
        status
    }

    /// Follow monitor pull-up changes after a switch has completed
    ///
    /// Only FunctionFS sets depend on the monitor: a late pull-up (zero
    /// timeout) marks them applied, a pull-down (daemon restart) clears it.
    async fn sync_applied(&self) {
        let mut state = self.state.lock().await;
        if !state.current_functions.has_ffs() {
            return;
        }

        let pulled_up = self.monitor.is_pulled_up();
        if state.functions_applied != pulled_up {
            info!(
                "USB functions {} {} by monitor",
                state.current_functions,
                if pulled_up { "applied" } else { "no longer applied" }
            );
            state.functions_applied = pulled_up;
            self.events.publish(GadgetEvent::FunctionsChanged {
                functions: state.current_functions,
                applied: pulled_up,
            });
        }
    }

    /// Report the negotiated link speed; `Unknown` if it cannot be read
    pub async fn query_usb_speed(&self, callback: Arc<dyn GadgetCallback>) {
        let speed = self.read_speed().await;
        self.observe_speed(speed);
        callback.get_usb_speed_cb(speed);
    }

    /// Last observed link speed
    pub fn observed_speed(&self) -> UsbSpeed {
        self.speed.lock().observed
    }

    async fn read_speed(&self) -> UsbSpeed {
        match read_file_timeout(&self.speed_path, self.speed_read_timeout).await {
            Ok(value) => {
                self.throttler.clear("speed_read");
                UsbSpeed::from_sysfs(&value)
            }
            Err(e) => {
                warn_throttled!(self.throttler, "speed_read", "Cannot read USB speed: {}", e);
                UsbSpeed::Unknown
            }
        }
    }

    fn observe_speed(&self, speed: UsbSpeed) {
        let mut state = self.speed.lock();
        if state.observed != speed {
            info!("USB speed changed: {} -> {}", state.observed, speed);
            state.observed = speed;
            self.events.publish(GadgetEvent::SpeedChanged { speed });
        }
        self.steering.send_replace((speed, state.tethering));
    }

    fn set_tethering(&self, tethering: bool) {
        let mut state = self.speed.lock();
        state.tethering = tethering;
        self.steering.send_replace((state.observed, tethering));
    }

    /// Re-read the link speed on every monitor link transition
    pub fn spawn_speed_watcher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let controller = self.clone();
        let mut rx = self.events.subscribe();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = controller.shutdown.cancelled() => break,
                    event = rx.recv() => event,
                };

                match event {
                    Ok(GadgetEvent::LinkStateChanged { connected, .. }) => {
                        let speed = if connected {
                            controller.read_speed().await
                        } else {
                            UsbSpeed::Unknown
                        };
                        controller.observe_speed(speed);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Speed watcher lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Speed watcher stopped");
        })
    }

    /// Keep `functions_applied` in line with monitor pull-up transitions
    pub fn spawn_pull_up_watcher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let controller = self.clone();
        let mut rx = self.events.subscribe();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = controller.shutdown.cancelled() => break,
                    event = rx.recv() => event,
                };

                match event {
                    Ok(GadgetEvent::PullUpChanged { .. }) => controller.sync_applied().await,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Pull-up watcher lagged by {} events", n);
                        controller.sync_applied().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Pull-up watcher stopped");
        })
    }
}

/// Apply steering requests one at a time on the blocking pool
async fn steer_irq(
    affinity: Arc<dyn IrqAffinity>,
    mut rx: watch::Receiver<SteeringRequest>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let (speed, tethering) = *rx.borrow_and_update();
        let affinity = affinity.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || affinity.apply(speed, tethering)).await {
            warn!("IRQ steering task failed: {}", e);
        }
    }
    debug!("IRQ steering stopped");
}

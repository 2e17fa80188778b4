//! Gadget state monitoring
//!
//! FunctionFS gadgets can only be bound to the UDC once their userspace
//! daemons (adbd, MTP) have opened all endpoints. [`FfsMonitor`] waits for the
//! endpoint files, pulls the gadget up when they are all present and pulls it
//! down again if they disappear (daemon restart). It also polls the extcon
//! cable state and the gadget driver state and publishes link transitions on
//! the event bus.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::GadgetBackend;
use super::sysfs::read_file;
use crate::config::DevicePathsConfig;
use crate::events::{EventBus, GadgetEvent};
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// First endpoint poll delay; doubles up to the configured poll interval
const INITIAL_POLL_DELAY: Duration = Duration::from_millis(10);

/// Confirms that the gadget came up after a function switch
#[async_trait]
pub trait GadgetMonitor: Send + Sync {
    /// Register FunctionFS endpoints that must exist before pull-up
    fn add_endpoints(&self, endpoints: Vec<PathBuf>);

    /// Start watching the registered endpoints
    fn start(&self);

    /// Stop watching and forget all endpoints
    fn reset(&self);

    fn is_running(&self) -> bool;

    /// Whether the monitor has pulled the gadget up
    fn is_pulled_up(&self) -> bool;

    /// Wait until the gadget is pulled up; `false` on timeout
    async fn wait_for_pull_up(&self, timeout: Duration) -> bool;
}

struct Watch {
    endpoints: Vec<PathBuf>,
    token: Option<CancellationToken>,
}

struct Shared {
    backend: Arc<dyn GadgetBackend>,
    events: Arc<EventBus>,
    throttler: LogThrottler,
    watch: Mutex<Watch>,
    pulled_up: watch::Sender<bool>,
}

impl Shared {
    fn set_pulled_up(&self, pulled_up: bool) {
        let previous = self.pulled_up.send_replace(pulled_up);
        if previous != pulled_up {
            self.events.publish(GadgetEvent::PullUpChanged { pulled_up });
        }
    }

    /// One endpoint check; returns `false` once the watch was cancelled
    ///
    /// Touches the filesystem, so it runs on the blocking pool.
    fn check_endpoints(&self, token: &CancellationToken, endpoints: &[PathBuf]) -> bool {
        // Held across the pull-up so reset() cannot interleave with it
        let _watch = self.watch.lock();
        if token.is_cancelled() {
            return false;
        }

        let ready = endpoints.iter().all(|ep| ep.exists());
        let pulled_up = *self.pulled_up.borrow();

        if ready && !pulled_up {
            match self.backend.pull_up() {
                Ok(()) => {
                    self.throttler.clear("ffs_pullup");
                    self.set_pulled_up(true);
                }
                Err(e) => {
                    warn_throttled!(self.throttler, "ffs_pullup", "Failed to pull up gadget: {}", e);
                }
            }
        } else if !ready && pulled_up {
            info!("FunctionFS endpoints disappeared, pulling gadget down");
            if let Err(e) = self.backend.pull_down() {
                warn!("Failed to pull down gadget: {}", e);
            }
            self.set_pulled_up(false);
        }
        true
    }
}

/// FunctionFS endpoint and link state monitor
pub struct FfsMonitor {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    poll_interval: Duration,
    extcon_state: PathBuf,
    gadget_state: PathBuf,
}

impl FfsMonitor {
    pub fn new(
        backend: Arc<dyn GadgetBackend>,
        events: Arc<EventBus>,
        paths: &DevicePathsConfig,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let (pulled_up, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                backend,
                events,
                throttler: LogThrottler::default(),
                watch: Mutex::new(Watch {
                    endpoints: Vec::new(),
                    token: None,
                }),
                pulled_up,
            }),
            shutdown,
            poll_interval,
            extcon_state: paths.extcon_state.clone(),
            gadget_state: paths.gadget_state.clone(),
        }
    }

    /// Spawn the extcon/gadget-state poller
    ///
    /// Runs until shutdown, independent of function switches.
    pub fn spawn_link_watcher(&self) -> tokio::task::JoinHandle<()> {
        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        let interval = self.poll_interval;
        let extcon_state = self.extcon_state.clone();
        let gadget_state = self.gadget_state.clone();

        tokio::spawn(async move {
            let mut last: Option<(bool, Option<String>)> = None;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let connected = match read_file(&extcon_state) {
                    Ok(state) => {
                        shared.throttler.clear("extcon_read");
                        state == "1"
                    }
                    Err(e) => {
                        warn_throttled!(shared.throttler, "extcon_read", "Cannot read cable state: {}", e);
                        false
                    }
                };
                let state = read_file(&gadget_state).ok();

                let current = (connected, state);
                if last.as_ref() != Some(&current) {
                    debug!("Link state: connected={} gadget_state={:?}", current.0, current.1);
                    shared.events.publish(GadgetEvent::LinkStateChanged {
                        connected: current.0,
                        gadget_state: current.1.clone(),
                    });
                    last = Some(current);
                }
            }
            debug!("Link watcher stopped");
        })
    }
}

#[async_trait]
impl GadgetMonitor for FfsMonitor {
    fn add_endpoints(&self, endpoints: Vec<PathBuf>) {
        self.shared.watch.lock().endpoints.extend(endpoints);
    }

    fn start(&self) {
        let (token, endpoints) = {
            let mut watch = self.shared.watch.lock();
            if watch.token.is_some() {
                debug!("Monitor already running");
                return;
            }
            let token = self.shutdown.child_token();
            watch.token = Some(token.clone());
            (token, Arc::new(watch.endpoints.clone()))
        };

        info!("Monitoring {} FunctionFS endpoints", endpoints.len());
        let shared = self.shared.clone();
        let max_delay = self.poll_interval;

        tokio::spawn(async move {
            let mut delay = INITIAL_POLL_DELAY.min(max_delay);
            loop {
                let check = {
                    let shared = shared.clone();
                    let token = token.clone();
                    let endpoints = endpoints.clone();
                    tokio::task::spawn_blocking(move || shared.check_endpoints(&token, &endpoints))
                };
                match check.await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        warn!("Endpoint check failed: {}", e);
                        break;
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(max_delay);
            }
            debug!("Endpoint monitor stopped");
        });
    }

    fn reset(&self) {
        let mut watch = self.shared.watch.lock();
        if let Some(token) = watch.token.take() {
            token.cancel();
        }
        watch.endpoints.clear();
        self.shared.set_pulled_up(false);
    }

    fn is_running(&self) -> bool {
        self.shared.watch.lock().token.is_some()
    }

    fn is_pulled_up(&self) -> bool {
        *self.shared.pulled_up.borrow()
    }

    async fn wait_for_pull_up(&self, timeout: Duration) -> bool {
        let mut rx = self.shared.pulled_up.subscribe();
        let pulled_up = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|up| *up)).await,
            Ok(Ok(_))
        );
        pulled_up
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GadgetConfig;
    use crate::gadget::backend::ConfigFsBackend;
    use crate::gadget::sysfs::{create_dir, write_file};
    use std::path::Path;

    fn setup(root: &Path) -> (FfsMonitor, Arc<ConfigFsBackend>, Arc<EventBus>) {
        let paths = DevicePathsConfig {
            gadget_dir: root.join("g1"),
            ffs_root: root.join("usb-ffs"),
            extcon_state: root.join("extcon_state"),
            gadget_state: root.join("gadget_state"),
            ..Default::default()
        };
        create_dir(&paths.gadget_dir.join("configs/b.1")).unwrap();
        create_dir(&paths.ffs_root.join("adb")).unwrap();
        let backend = Arc::new(ConfigFsBackend::new(&paths, &GadgetConfig::default()));
        let events = Arc::new(EventBus::new());
        let monitor = FfsMonitor::new(
            backend.clone(),
            events.clone(),
            &paths,
            Duration::from_millis(20),
            CancellationToken::new(),
        );
        (monitor, backend, events)
    }

    #[tokio::test]
    async fn test_pulls_up_when_endpoints_appear() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, backend, _events) = setup(dir.path());
        let endpoints = backend.ffs_endpoints(crate::gadget::UsbFunction::Adb);

        monitor.add_endpoints(endpoints.clone());
        monitor.start();
        assert!(monitor.is_running());
        assert!(!monitor.wait_for_pull_up(Duration::from_millis(50)).await);

        for ep in &endpoints {
            write_file(ep, "").unwrap();
        }
        assert!(monitor.wait_for_pull_up(Duration::from_secs(2)).await);
        assert!(backend.is_pulled_up());

        monitor.reset();
        assert!(!monitor.is_running());
        assert!(!monitor.is_pulled_up());
    }

    #[tokio::test]
    async fn test_pulls_down_when_daemon_goes_away() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, backend, events) = setup(dir.path());
        let endpoints = backend.ffs_endpoints(crate::gadget::UsbFunction::Adb);
        for ep in &endpoints {
            write_file(ep, "").unwrap();
        }

        let mut rx = events.subscribe();
        monitor.add_endpoints(endpoints.clone());
        monitor.start();
        assert!(monitor.wait_for_pull_up(Duration::from_secs(2)).await);

        std::fs::remove_file(&endpoints[0]).unwrap();
        let mut saw_down = false;
        while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            if let GadgetEvent::PullUpChanged { pulled_up: false } = event {
                saw_down = true;
                break;
            }
        }
        assert!(saw_down);
        assert!(!backend.is_pulled_up());
        monitor.reset();
    }

    #[tokio::test]
    async fn test_link_watcher_publishes_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, _backend, events) = setup(dir.path());
        write_file(&dir.path().join("extcon_state"), "0").unwrap();

        let mut rx = events.subscribe();
        let handle = monitor.spawn_link_watcher();

        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Ok(GadgetEvent::LinkStateChanged { connected, .. })) => assert!(!connected),
            other => panic!("unexpected: {:?}", other),
        }

        write_file(&dir.path().join("extcon_state"), "1").unwrap();
        write_file(&dir.path().join("gadget_state"), "configured").unwrap();
        loop {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Ok(GadgetEvent::LinkStateChanged { connected: true, gadget_state })) => {
                    // Both files may be picked up in separate ticks
                    if gadget_state.as_deref() == Some("configured") {
                        break;
                    }
                }
                Ok(Ok(_)) => continue,
                other => panic!("unexpected: {:?}", other),
            }
        }

        monitor.shutdown.cancel();
        handle.await.unwrap();
    }
}

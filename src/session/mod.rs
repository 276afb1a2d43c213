//! # Connection Session
//!
//! Owns the link to one controller and the telemetry it produces.
//!
//! A single background worker drives the state machine:
//!
//! ```text
//! Idle -> Scanning -> Connecting -> Subscribing -> Active
//!            ^                                       |
//!            +------ Retrying <---- Disconnected <---+
//! ```
//!
//! Scan misses, connect and subscribe failures go straight to `Retrying`.
//! `disconnect()` parks the worker in `Idle` from any state; `shutdown()`
//! ends it in `Stopped`. Every wait is raced against both so control
//! requests take effect promptly.

pub mod state;
pub mod transport;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{Config, DeviceConfig, SessionConfig};
use crate::error::{RecorderError, TransportError};
use crate::protocol::encoder::keepalive_frame;
use crate::protocol::DecodedPacket;
use crate::telemetry::{PerformanceStats, RecordTarget, Sample, Stats, Telemetry, TelemetrySnapshot};

pub use state::{Advertisement, ConnectionState, DeviceFamily, DiscoveredDevice};
pub use transport::Transport;

/// Slack on top of the scan timeout before a silent `discover` is abandoned
const DISCOVER_GRACE: Duration = Duration::from_secs(1);

/// Requested link state, written by the session handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Control {
    online: bool,
    /// Bumped on every `disconnect()` so a quick reconnect is never missed
    generation: u64,
}

/// Handle to the connection worker and its telemetry
pub struct ConnectionSession {
    telemetry: Arc<Telemetry>,
    control: watch::Sender<Control>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    stale_timeout: Duration,
}

impl ConnectionSession {
    /// Spawn the worker for `transport`
    ///
    /// The session starts `Idle`; call [`connect`](Self::connect) to begin
    /// scanning. Must be called from within a tokio runtime.
    pub fn spawn<T: Transport>(transport: T, config: &Config) -> Self {
        let telemetry = Arc::new(
            Telemetry::new(&config.telemetry, &config.recording)
                .with_packet_details(config.logging.packet_details),
        );
        let (control_tx, control_rx) = watch::channel(Control::default());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let cancel = CancellationToken::new();

        let worker = Worker {
            transport,
            telemetry: Arc::clone(&telemetry),
            control: control_rx,
            state: state_tx,
            cancel: cancel.clone(),
            device: config.device.clone(),
            timings: config.session.clone(),
        };
        let handle = tokio::spawn(worker.run());

        Self {
            telemetry,
            control: control_tx,
            state: state_rx,
            cancel,
            worker: Mutex::new(Some(handle)),
            stale_timeout: config.session.stale_timeout(),
        }
    }

    /// Start (or resume) connecting; a no-op while already online
    pub fn connect(&self) {
        if self.cancel.is_cancelled() {
            warn!("Connect ignored: session is shut down");
            return;
        }

        let requested = self.control.send_if_modified(|control| {
            if control.online {
                false
            } else {
                control.online = true;
                true
            }
        });

        if requested {
            info!("Connect requested");
        } else {
            debug!("Connect ignored: already {}", self.state());
        }
    }

    /// Tear down the link and park until the next `connect()`
    ///
    /// A no-op while idle or stopped.
    pub fn disconnect(&self) {
        if self.cancel.is_cancelled() {
            debug!("Disconnect ignored: session is shut down");
            return;
        }

        let requested = self.control.send_if_modified(|control| {
            if control.online {
                control.online = false;
                control.generation += 1;
                true
            } else {
                false
            }
        });

        if requested {
            info!("Disconnect requested");
        } else {
            debug!("Disconnect ignored: already {}", self.state());
        }
    }

    /// Link is active and a frame arrived within the stale timeout
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Active
            && self
                .telemetry
                .last_frame_age()
                .is_some_and(|age| age < self.stale_timeout)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Shared telemetry, for observers that outlive a borrow of the session
    pub fn telemetry(&self) -> Arc<Telemetry> {
        Arc::clone(&self.telemetry)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    pub fn consume_changed(&self) -> bool {
        self.telemetry.consume_changed()
    }

    pub fn recent_packets(&self, n: usize) -> Vec<DecodedPacket> {
        self.telemetry.recent_packets(n)
    }

    pub fn stats(&self) -> Stats {
        self.telemetry.stats()
    }

    pub fn performance(&self) -> PerformanceStats {
        self.telemetry.performance()
    }

    pub fn start_recording(&self, target: RecordTarget) -> Result<Option<PathBuf>, RecorderError> {
        self.telemetry.start_recording(target)
    }

    pub fn stop_recording(&self) -> usize {
        self.telemetry.stop_recording()
    }

    pub fn is_recording(&self) -> bool {
        self.telemetry.is_recording()
    }

    pub fn recorded_samples(&self) -> Vec<Sample> {
        self.telemetry.recorded_samples()
    }

    pub fn export_recording(&self, path: &Path) -> Result<usize, RecorderError> {
        self.telemetry.export_recording(path)
    }

    /// Stop the worker, tearing down any link, and wait for it to exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Session worker panicked: {}", e);
            }
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// How a connection attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Disconnect or shutdown requested
    Interrupted,
    /// Recoverable failure, retry after the delay
    Failed,
}

/// What woke the active loop
enum ActiveEvent {
    Interrupted,
    Frame(Option<bytes::Bytes>),
    Keepalive,
}

/// Run `fut` unless a disconnect (generation change) or shutdown comes first
async fn until_interrupted<F: Future>(
    control: &mut watch::Receiver<Control>,
    cancel: &CancellationToken,
    generation: u64,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        _ = control.wait_for(|c| c.generation != generation) => None,
        output = fut => Some(output),
    }
}

struct Worker<T> {
    transport: T,
    telemetry: Arc<Telemetry>,
    control: watch::Receiver<Control>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    device: DeviceConfig,
    timings: SessionConfig,
}

impl<T: Transport> Worker<T> {
    async fn run(mut self) {
        info!("Session worker started");

        while let Some(generation) = self.wait_for_connect().await {
            loop {
                if self.attempt(generation).await == Outcome::Interrupted {
                    break;
                }

                self.set_state(ConnectionState::Retrying);
                let delay = time::sleep(self.timings.retry_delay());
                if until_interrupted(&mut self.control, &self.cancel, generation, delay)
                    .await
                    .is_none()
                {
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Stopped);
        info!("Session worker stopped");
    }

    /// Park in `Idle` until connect is requested; `None` on shutdown
    async fn wait_for_connect(&mut self) -> Option<u64> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.set_state(ConnectionState::Idle);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            control = self.control.wait_for(|c| c.online) => control.ok().map(|c| c.generation),
        }
    }

    async fn attempt(&mut self, generation: u64) -> Outcome {
        self.set_state(ConnectionState::Scanning);
        let scan_timeout = self.timings.scan_timeout();
        let scan = time::timeout(
            scan_timeout + DISCOVER_GRACE,
            self.transport.discover(scan_timeout),
        );
        let Some(found) = until_interrupted(&mut self.control, &self.cancel, generation, scan).await
        else {
            return Outcome::Interrupted;
        };

        let device = match found {
            Ok(Ok(advertisements)) => {
                debug!("Discovered {} devices", advertisements.len());
                advertisements
                    .into_iter()
                    .find_map(|ad| DiscoveredDevice::from_advertisement(ad, &self.device))
            }
            Ok(Err(e)) => {
                warn!("{}", e);
                None
            }
            Err(_) => {
                warn!("Scan did not finish within {:?}", scan_timeout + DISCOVER_GRACE);
                None
            }
        };
        let Some(device) = device else {
            info!(
                "No {} or {} controller found",
                self.device.fardriver_name, self.device.yuanqu_name
            );
            return Outcome::Failed;
        };

        info!("Found {} ({}) at {}", device.name, device.family, device.address);
        self.set_state(ConnectionState::Connecting);

        let connect_timeout = self.timings.connect_timeout();
        let connect = time::timeout(connect_timeout, self.transport.connect(&device));
        match until_interrupted(&mut self.control, &self.cancel, generation, connect).await {
            None => {
                self.teardown().await;
                return Outcome::Interrupted;
            }
            Some(Err(_)) => {
                warn!(
                    "{}",
                    TransportError::ConnectTimeout(connect_timeout.as_millis() as u64)
                );
                self.teardown().await;
                return Outcome::Failed;
            }
            Some(Ok(Err(e))) => {
                warn!("{}", e);
                self.teardown().await;
                return Outcome::Failed;
            }
            Some(Ok(Ok(()))) => {}
        }

        self.set_state(ConnectionState::Subscribing);
        let settle = time::sleep(self.timings.settle_delay());
        if until_interrupted(&mut self.control, &self.cancel, generation, settle)
            .await
            .is_none()
        {
            self.teardown().await;
            return Outcome::Interrupted;
        }

        let subscribe = time::timeout(connect_timeout, self.transport.subscribe());
        let mut frames = match until_interrupted(&mut self.control, &self.cancel, generation, subscribe).await {
            None => {
                self.teardown().await;
                return Outcome::Interrupted;
            }
            Some(Err(_)) => {
                warn!(
                    "{}",
                    TransportError::Subscribe(format!(
                        "no response within {} ms",
                        connect_timeout.as_millis()
                    ))
                );
                self.teardown().await;
                return Outcome::Failed;
            }
            Some(Ok(Err(e))) => {
                warn!("{}", e);
                self.teardown().await;
                return Outcome::Failed;
            }
            Some(Ok(Ok(frames))) => frames,
        };

        self.telemetry.mark_link_up();
        self.set_state(ConnectionState::Active);
        info!("Receiving telemetry from {}", device.name);

        let outcome = self.run_active(generation, &mut frames).await;
        drop(frames);

        // Observers must never see a dead link with live values
        self.telemetry.reset();
        if outcome == Outcome::Failed {
            self.set_state(ConnectionState::Disconnected);
        }
        self.teardown().await;
        outcome
    }

    /// Pump frames and keepalives until the link drops or we are told to stop
    ///
    /// Returns `Failed` on link loss; the caller publishes `Disconnected`.
    async fn run_active(&mut self, generation: u64, frames: &mut mpsc::Receiver<bytes::Bytes>) -> Outcome {
        let mut keepalive = time::interval(self.timings.keepalive_interval());
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => ActiveEvent::Interrupted,
                _ = self.control.wait_for(|c| c.generation != generation) => ActiveEvent::Interrupted,
                frame = frames.recv() => ActiveEvent::Frame(frame),
                _ = keepalive.tick() => ActiveEvent::Keepalive,
            };

            match event {
                ActiveEvent::Interrupted => return Outcome::Interrupted,
                ActiveEvent::Frame(Some(frame)) => self.telemetry.ingest(&frame),
                ActiveEvent::Frame(None) => {
                    warn!("Notification stream ended, link lost");
                    return Outcome::Failed;
                }
                ActiveEvent::Keepalive => {
                    let interval = self.timings.keepalive_interval();
                    let write = time::timeout(interval, self.transport.write(keepalive_frame()));
                    match until_interrupted(&mut self.control, &self.cancel, generation, write).await {
                        None => return Outcome::Interrupted,
                        Some(Err(_)) => {
                            warn!("Keepalive not written within {:?}, link lost", interval);
                            return Outcome::Failed;
                        }
                        Some(Ok(Err(e))) => {
                            warn!("Keepalive failed, link lost: {}", e);
                            return Outcome::Failed;
                        }
                        Some(Ok(Ok(()))) => trace!("Keepalive sent"),
                    }
                }
            }
        }
    }

    /// Close the transport; failures are logged, never propagated
    async fn teardown(&mut self) {
        let disconnect = time::timeout(self.timings.connect_timeout(), self.transport.disconnect());
        match disconnect.await {
            Ok(Ok(())) => debug!("Transport closed"),
            Ok(Err(e)) => warn!("Error while disconnecting: {}", e),
            Err(_) => warn!("Timed out while disconnecting"),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("Connection state: {} -> {}", previous, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::transport::mocks::MockTransport;
    use super::*;
    use crate::protocol::encoder::*;
    use tokio::time::Instant;

    const DEVICE: &str = "FarDriver_A1B2";

    fn session(transport: &MockTransport) -> ConnectionSession {
        ConnectionSession::spawn(transport.clone(), &Config::default())
    }

    async fn wait_for_state(session: &ConnectionSession, wanted: ConnectionState) {
        let mut rx = session.subscribe_state();
        time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == wanted))
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {}", wanted))
            .unwrap();
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..600 {
            if condition() {
                return;
            }
            time::sleep(Duration::from_millis(100)).await;
        }
        panic!("Condition not met within 60 s");
    }

    async fn active_session(transport: &MockTransport) -> ConnectionSession {
        let session = session(transport);
        session.connect();
        wait_for_state(&session, ConnectionState::Active).await;
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_idle() {
        let transport = MockTransport::with_device(DEVICE);
        let session = session(&transport);

        time::sleep(Duration::from_secs(10)).await;

        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(transport.discover_calls(), 0, "Idle session must not scan");
        assert!(!session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaches_active_and_ingests_frames() {
        let transport = MockTransport::with_device(DEVICE);
        let session = active_session(&transport).await;

        assert!(session.is_connected());

        transport.send_frame(&encode_voltage(900)).await;
        transport.send_frame(&encode_main_data(1, 4000, 1000, 0)).await;
        eventually(|| session.stats().total == 2).await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.voltage, 90.0);
        assert_eq!(snapshot.rpm, 4000);
        assert!((snapshot.power - (-900.0)).abs() < 1e-9);
        assert!(session.consume_changed());
        assert_eq!(session.performance().packet_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_waits_for_settle_delay() {
        let transport = MockTransport::with_device(DEVICE);
        let session = session(&transport);
        let started = Instant::now();

        session.connect();
        wait_for_state(&session, ConnectionState::Active).await;

        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_sent_on_interval() {
        let transport = MockTransport::with_device(DEVICE);
        let _session = active_session(&transport).await;

        time::sleep(Duration::from_millis(4_500)).await;

        let written = transport.get_written_data();
        assert_eq!(written.len(), 3, "Keepalive at 0 s, 2 s and 4 s");
        assert!(written.iter().all(|w| w.as_slice() == keepalive_frame()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_failure_resets_and_retries() {
        let transport = MockTransport::with_device(DEVICE);
        let session = active_session(&transport).await;

        transport.send_frame(&encode_voltage(900)).await;
        eventually(|| session.snapshot().voltage == 90.0).await;
        session.consume_changed();

        transport.set_write_error(true);
        wait_for_state(&session, ConnectionState::Retrying).await;

        assert_eq!(transport.disconnect_calls(), 1);
        assert_eq!(session.snapshot().voltage, 0.0, "Link loss must zero the values");
        assert!(session.consume_changed(), "Link loss must signal a change");
        assert!(!session.is_connected());

        transport.set_write_error(false);
        wait_for_state(&session, ConnectionState::Active).await;
        assert_eq!(transport.discover_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_is_link_loss() {
        let transport = MockTransport::with_device(DEVICE);
        let session = active_session(&transport).await;

        transport.close_stream();
        wait_for_state(&session, ConnectionState::Retrying).await;

        assert_eq!(transport.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_zeroes_values_before_disconnected() {
        let transport = MockTransport::with_device(DEVICE);
        transport.set_disconnect_delay(Duration::from_secs(3));
        let session = active_session(&transport).await;

        transport.send_frame(&encode_voltage(900)).await;
        eventually(|| session.snapshot().voltage == 90.0).await;

        transport.close_stream();
        wait_for_state(&session, ConnectionState::Disconnected).await;

        assert_eq!(session.snapshot().voltage, 0.0, "Disconnected must not show live values");
        assert!(!session.is_connected());

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(session.state(), ConnectionState::Disconnected, "Still tearing down");
        assert_eq!(session.snapshot().voltage, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_keepalive_does_not_block_disconnect() {
        let transport = MockTransport::with_device(DEVICE);
        let session = active_session(&transport).await;
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.get_written_data().len(), 1);

        transport.set_hang_write(true);
        time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(session.state(), ConnectionState::Active);

        session.disconnect();
        let mut rx = session.subscribe_state();
        time::timeout(
            Duration::from_millis(100),
            rx.wait_for(|s| *s == ConnectionState::Idle),
        )
        .await
        .expect("Disconnect must not wait for a hung write")
        .unwrap();
        assert_eq!(transport.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_keepalive_is_link_loss() {
        let transport = MockTransport::with_device(DEVICE);
        let session = active_session(&transport).await;
        let active_at = Instant::now();
        time::sleep(Duration::from_millis(100)).await;

        transport.set_hang_write(true);
        wait_for_state(&session, ConnectionState::Retrying).await;

        // Tick at 2 s, write abandoned one interval later
        assert!(active_at.elapsed() >= Duration::from_secs(4));
        assert!(active_at.elapsed() < Duration::from_secs(5));
        assert_eq!(transport.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_scan_is_abandoned() {
        let transport = MockTransport::with_device(DEVICE);
        transport.set_hang_discover(true);
        let session = session(&transport);
        let started = Instant::now();

        session.connect();
        wait_for_state(&session, ConnectionState::Retrying).await;

        assert!(started.elapsed() >= Duration::from_secs(6), "Scan timeout plus grace");
        assert!(started.elapsed() < Duration::from_secs(7));
        assert_eq!(transport.connect_calls(), 0);

        session.disconnect();
        wait_for_state(&session, ConnectionState::Idle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_link_reports_disconnected() {
        let transport = MockTransport::with_device(DEVICE);
        let session = active_session(&transport).await;

        transport.send_frame(&encode_controller_temp(30)).await;
        eventually(|| session.stats().total == 1).await;
        assert!(session.is_connected());

        time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(session.state(), ConnectionState::Active);
        assert!(!session.is_connected(), "No frames for >5 s must read as disconnected");

        transport.send_frame(&encode_controller_temp(31)).await;
        eventually(|| session.stats().total == 2).await;
        assert!(session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_then_connect_rescans() {
        let transport = MockTransport::with_device(DEVICE);
        let session = active_session(&transport).await;

        session.disconnect();
        session.connect();

        eventually(|| transport.connect_calls() == 2).await;
        wait_for_state(&session, ConnectionState::Active).await;

        assert_eq!(transport.disconnect_calls(), 1);
        assert_eq!(transport.discover_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_parks_in_idle() {
        let transport = MockTransport::with_device(DEVICE);
        let session = active_session(&transport).await;

        transport.send_frame(&encode_voltage(900)).await;
        eventually(|| session.stats().total == 1).await;

        session.disconnect();
        wait_for_state(&session, ConnectionState::Idle).await;

        assert_eq!(transport.disconnect_calls(), 1);
        assert_eq!(session.snapshot().voltage, 0.0);

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(transport.discover_calls(), 1, "Parked session must not rescan");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_disconnect_are_idempotent() {
        let transport = MockTransport::with_device(DEVICE);
        let session = session(&transport);

        session.disconnect();
        session.connect();
        session.connect();
        wait_for_state(&session, ConnectionState::Active).await;
        session.connect();

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.discover_calls(), 1);
        assert_eq!(transport.connect_calls(), 1);

        session.disconnect();
        session.disconnect();
        wait_for_state(&session, ConnectionState::Idle).await;
        assert_eq!(transport.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_miss_retries_after_delay() {
        let transport = MockTransport::new();
        transport.set_advertisements(vec![Advertisement::new("Headphones", "00:11")]);
        let session = session(&transport);

        session.connect();
        wait_for_state(&session, ConnectionState::Retrying).await;
        assert_eq!(transport.discover_calls(), 1);

        time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(transport.discover_calls(), 1);

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.discover_calls(), 2);

        transport.set_advertisements(vec![Advertisement::new("YuanQuFOC982", "00:22")]);
        wait_for_state(&session, ConnectionState::Active).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_interrupts_retry_wait() {
        let transport = MockTransport::new();
        let session = session(&transport);

        session.connect();
        wait_for_state(&session, ConnectionState::Retrying).await;

        let started = Instant::now();
        session.disconnect();
        wait_for_state(&session, ConnectionState::Idle).await;

        assert!(started.elapsed() < Duration::from_secs(1), "Retry wait must be cancellable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_retries() {
        let transport = MockTransport::with_device(DEVICE);
        transport.set_hang_connect(true);
        let session = session(&transport);
        let started = Instant::now();

        session.connect();
        wait_for_state(&session, ConnectionState::Connecting).await;
        wait_for_state(&session, ConnectionState::Retrying).await;

        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(transport.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_error_retries() {
        let transport = MockTransport::with_device(DEVICE);
        transport.set_connect_error(true);
        let session = session(&transport);

        session.connect();
        wait_for_state(&session, ConnectionState::Retrying).await;

        transport.set_connect_error(false);
        wait_for_state(&session, ConnectionState::Active).await;
        assert_eq!(transport.connect_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_failure_disconnects_and_retries() {
        let transport = MockTransport::with_device(DEVICE);
        transport.set_subscribe_error(true);
        let session = session(&transport);

        session.connect();
        wait_for_state(&session, ConnectionState::Retrying).await;

        assert_eq!(transport.connect_calls(), 1);
        assert_eq!(transport.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_worker() {
        let transport = MockTransport::with_device(DEVICE);
        let session = active_session(&transport).await;

        session.shutdown().await;

        assert_eq!(session.state(), ConnectionState::Stopped);
        assert_eq!(transport.disconnect_calls(), 1);

        session.connect();
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(session.state(), ConnectionState::Stopped);
        assert_eq!(transport.discover_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_after_shutdown_is_ignored() {
        let transport = MockTransport::with_device(DEVICE);
        let session = active_session(&transport).await;

        session.shutdown().await;
        session.disconnect();

        assert_eq!(session.state(), ConnectionState::Stopped);
        assert_eq!(session.control.borrow().generation, 0, "Stopped session must not bump");
        assert!(session.control.borrow().online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_from_idle() {
        let transport = MockTransport::new();
        let session = session(&transport);

        tokio_test::assert_ready!(tokio_test::task::spawn(async { session.state() }).poll());
        session.shutdown().await;
        assert_eq!(session.state(), ConnectionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_through_session() {
        let transport = MockTransport::with_device(DEVICE);
        let session = active_session(&transport).await;

        session.start_recording(RecordTarget::MemoryOnly).unwrap();
        transport.send_frame(&encode_motor_throttle(50, 4095)).await;
        eventually(|| session.recorded_samples().len() == 1).await;

        assert_eq!(session.stop_recording(), 1);
        assert_eq!(session.recorded_samples()[0].throttle, 4095);
        assert!(!session.is_recording());
    }
}

//! Trait abstraction for the device link to enable testing

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::state::{Advertisement, DiscoveredDevice};
use crate::error::TransportError;

/// Link to a telemetry controller (BLE, serial bridge, replay, ...)
///
/// The session drives one transport at a time. Every call is bounded by a
/// session timeout: `discover` by the scan timeout plus a grace period,
/// `connect`, `subscribe` and `disconnect` by the connect timeout, keepalive
/// `write`s by the keepalive interval. All but `disconnect` are also raced
/// against disconnect and shutdown requests. A call that overruns is dropped
/// mid-flight and counts as a failure, so implementations must be cancel safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Enumerate nearby devices for up to `timeout`
    async fn discover(&mut self, timeout: Duration) -> Result<Vec<Advertisement>, TransportError>;

    /// Open a link to `device`
    async fn connect(&mut self, device: &DiscoveredDevice) -> Result<(), TransportError>;

    /// Start notifications; each message is one frame
    ///
    /// The stream ending means the link is gone.
    async fn subscribe(&mut self) -> Result<mpsc::Receiver<Bytes>, TransportError>;

    /// Write bytes to the device
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Close the link; safe to call when not connected
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Script {
        advertisements: Vec<Advertisement>,
        connect_error: bool,
        hang_discover: bool,
        hang_connect: bool,
        subscribe_error: bool,
        write_error: bool,
        hang_write: bool,
        disconnect_delay: Option<Duration>,
        written: Vec<Vec<u8>>,
        frames: Option<mpsc::Sender<Bytes>>,
        discover_calls: usize,
        connect_calls: usize,
        disconnect_calls: usize,
    }

    /// Scripted transport; clones share state
    #[derive(Clone, Default)]
    pub struct MockTransport {
        script: Arc<Mutex<Script>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Transport that advertises one controller
        pub fn with_device(name: &str) -> Self {
            let mock = Self::new();
            mock.set_advertisements(vec![Advertisement::new(name, "C0:FF:EE:00:00:01")]);
            mock
        }

        fn script(&self) -> std::sync::MutexGuard<'_, Script> {
            self.script.lock().unwrap()
        }

        pub fn set_advertisements(&self, advertisements: Vec<Advertisement>) {
            self.script().advertisements = advertisements;
        }

        pub fn set_connect_error(&self, fail: bool) {
            self.script().connect_error = fail;
        }

        /// Make `discover` never complete
        pub fn set_hang_discover(&self, hang: bool) {
            self.script().hang_discover = hang;
        }

        /// Make `connect` never complete
        pub fn set_hang_connect(&self, hang: bool) {
            self.script().hang_connect = hang;
        }

        pub fn set_subscribe_error(&self, fail: bool) {
            self.script().subscribe_error = fail;
        }

        pub fn set_write_error(&self, fail: bool) {
            self.script().write_error = fail;
        }

        /// Make `write` never complete
        pub fn set_hang_write(&self, hang: bool) {
            self.script().hang_write = hang;
        }

        /// Make `disconnect` take `delay` before closing
        pub fn set_disconnect_delay(&self, delay: Duration) {
            self.script().disconnect_delay = Some(delay);
        }

        /// Deliver a frame as a notification
        pub async fn send_frame(&self, frame: &[u8]) {
            let sender = self.script().frames.clone();
            if let Some(sender) = sender {
                sender.send(Bytes::copy_from_slice(frame)).await.unwrap();
            } else {
                panic!("No active subscription");
            }
        }

        /// End the notification stream as if the link dropped
        pub fn close_stream(&self) {
            self.script().frames = None;
        }

        pub fn get_written_data(&self) -> Vec<Vec<u8>> {
            self.script().written.clone()
        }

        pub fn discover_calls(&self) -> usize {
            self.script().discover_calls
        }

        pub fn connect_calls(&self) -> usize {
            self.script().connect_calls
        }

        pub fn disconnect_calls(&self) -> usize {
            self.script().disconnect_calls
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn discover(&mut self, _timeout: Duration) -> Result<Vec<Advertisement>, TransportError> {
            let (hang, advertisements) = {
                let mut script = self.script();
                script.discover_calls += 1;
                (script.hang_discover, script.advertisements.clone())
            };

            if hang {
                std::future::pending::<()>().await;
            }
            Ok(advertisements)
        }

        async fn connect(&mut self, device: &DiscoveredDevice) -> Result<(), TransportError> {
            let hang = {
                let mut script = self.script();
                script.connect_calls += 1;
                if script.connect_error {
                    return Err(TransportError::Connect {
                        device: device.address.clone(),
                        reason: "Mock connect error".to_string(),
                    });
                }
                script.hang_connect
            };

            if hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn subscribe(&mut self) -> Result<mpsc::Receiver<Bytes>, TransportError> {
            let mut script = self.script();
            if script.subscribe_error {
                return Err(TransportError::Subscribe("Mock subscribe error".to_string()));
            }
            let (tx, rx) = mpsc::channel(64);
            script.frames = Some(tx);
            Ok(rx)
        }

        async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
            let hang = {
                let mut script = self.script();
                if script.write_error {
                    return Err(TransportError::Write("Mock write error".to_string()));
                }
                if !script.hang_write {
                    script.written.push(data.to_vec());
                }
                script.hang_write
            };

            if hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), TransportError> {
            let delay = {
                let mut script = self.script();
                script.disconnect_calls += 1;
                script.disconnect_delay
            };

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.script().frames = None;
            Ok(())
        }
    }
}

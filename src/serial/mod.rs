//! # Serial Transport Module
//!
//! Reads FarDriver telemetry through a BLE-to-serial bridge (or a controller
//! wired to a USB UART).
//!
//! This module handles:
//! - Enumerating serial ports and naming them for device-family matching
//! - Opening the port at the configured baud rate (8N1, no flow control)
//! - Re-framing the byte stream into 16-byte frames on a reader task
//! - Writing keepalives back to the controller

pub mod framer;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};
use tracing::{debug, info, trace, warn};

use crate::config::{DeviceConfig, SerialConfig};
use crate::error::TransportError;
use crate::session::{Advertisement, DiscoveredDevice, Transport};

pub use framer::FrameAssembler;

/// Frames buffered between the reader task and the session
const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Serial port transport
pub struct SerialTransport {
    config: SerialConfig,
    /// Name given to a configured port that reports no USB product string
    default_name: String,
    reader: Option<ReadHalf<SerialStream>>,
    writer: Option<WriteHalf<SerialStream>>,
    reader_task: Option<JoinHandle<()>>,
    device_path: Option<String>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("device_path", &self.device_path)
            .field("baud_rate", &self.config.baud_rate)
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    pub fn new(config: SerialConfig, device: &DeviceConfig) -> Self {
        let default_name = config
            .advertised_name
            .clone()
            .unwrap_or_else(|| device.fardriver_name.clone());

        Self {
            config,
            default_name,
            reader: None,
            writer: None,
            reader_task: None,
            device_path: None,
        }
    }

    /// Path of the open port, if connected
    pub fn device_path(&self) -> Option<&str> {
        self.device_path.as_deref()
    }

    /// Name a port for family matching
    ///
    /// The configured port takes the configured (or default) name; other
    /// ports are named by their USB product string.
    fn advertise(&self, port_name: &str, product: Option<String>) -> Advertisement {
        let name = if self.config.port.as_deref() == Some(port_name) {
            Some(self.default_name.clone())
        } else {
            product
        };

        Advertisement {
            name,
            address: port_name.to_string(),
        }
    }

    fn open_port(&self, path: &str) -> Result<SerialStream, TransportError> {
        tokio_serial::new(path, self.config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TransportError::Connect {
                device: path.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn discover(&mut self, timeout: Duration) -> Result<Vec<Advertisement>, TransportError> {
        let listed = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(tokio_serial::available_ports),
        )
        .await;

        let ports = match listed {
            Ok(Ok(Ok(ports))) => ports,
            Ok(Ok(Err(e))) => {
                debug!("Port enumeration failed: {}", e);
                Vec::new()
            }
            Ok(Err(e)) => {
                debug!("Port enumeration task failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                debug!("Port enumeration timed out");
                Vec::new()
            }
        };

        let mut advertisements: Vec<Advertisement> = ports
            .into_iter()
            .map(|port| {
                let product = match port.port_type {
                    SerialPortType::UsbPort(usb) => usb.product,
                    _ => None,
                };
                self.advertise(&port.port_name, product)
            })
            .collect();

        // Virtual and platform ports are not always enumerated
        if let Some(port) = self.config.port.clone() {
            if !advertisements.iter().any(|ad| ad.address == port) {
                advertisements.push(self.advertise(&port, None));
            }
        }

        if advertisements.is_empty() {
            return Err(TransportError::Discovery("no serial ports found".to_string()));
        }

        debug!("Serial ports: {:?}", advertisements);
        Ok(advertisements)
    }

    async fn connect(&mut self, device: &DiscoveredDevice) -> Result<(), TransportError> {
        let port = self.open_port(&device.address)?;
        let (reader, writer) = tokio::io::split(port);

        self.reader = Some(reader);
        self.writer = Some(writer);
        self.device_path = Some(device.address.clone());
        info!(
            "Opened {} at {} baud",
            device.address, self.config.baud_rate
        );
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<mpsc::Receiver<Bytes>, TransportError> {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| TransportError::Subscribe("port not open".to_string()))?;

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        self.reader_task = Some(spawn_reader(reader, tx));
        Ok(rx)
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;

        writer
            .write_all(data)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| TransportError::Write(format!("Failed to flush serial port: {}", e)))?;

        trace!("Sent {} bytes", data.len());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.reader = None;
        self.writer = None;

        if let Some(path) = self.device_path.take() {
            info!("Closed {}", path);
        }
        Ok(())
    }
}

/// Read the stream, forwarding each complete frame until EOF or error
///
/// Dropping the sender on exit ends the session's notification stream.
fn spawn_reader<R>(mut reader: R, frames: mpsc::Sender<Bytes>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut assembler = FrameAssembler::new();
        let mut buf = [0u8; 256];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    warn!("Serial port closed");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("Serial read failed: {}", e);
                    break;
                }
            };

            for frame in assembler.push(&buf[..n]) {
                if frames.send(frame).await.is_err() {
                    debug!("Frame receiver dropped, stopping reader");
                    return;
                }
            }
        }

        debug!("Reader stopped after discarding {} bytes", assembler.discarded());
    })
}

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::Adapter;

/// Serial adapter for the companion AT device
///
/// Wraps the serialport crate. Blocking port calls run on Tokio's blocking task
/// executor; reads only take what the driver already has buffered.
#[derive(Clone)]
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 115200)
    baud_rate: u32,

    /// The actual serial port (behind Arc<Mutex> for async access)
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Create an unopened adapter.
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Communication speed (e.g., 115200)
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            port: None,
        }
    }

    /// Port path this adapter targets.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Open the port at 8 data bits, no parity, 1 stop bit.
    pub fn connect(&mut self) -> Result<()> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()
            .with_context(|| {
                format!(
                    "Failed to open serial port '{}' at {} baud",
                    self.port_name, self.baud_rate
                )
            })?;

        self.port = Some(Arc::new(Mutex::new(port)));
        debug!(port = %self.port_name, baud = self.baud_rate, "Serial port opened");
        Ok(())
    }

    /// Close the port.
    pub fn disconnect(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.port_name, "Serial port closed");
        }
    }

    fn port(&self) -> Result<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port
            .clone()
            .ok_or_else(|| anyhow!("Serial port '{}' not connected", self.port_name))
    }
}

#[async_trait]
impl Adapter for SerialAdapter {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port()?;
        let frame = bytes.to_vec();

        // Execute blocking serial I/O on dedicated thread
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut port_guard = port.blocking_lock();
            port_guard
                .write_all(&frame)
                .context("Failed to write to serial port")?;
            port_guard.flush().context("Failed to flush serial port")?;
            Ok(())
        })
        .await
        .context("Serial I/O task panicked")?
    }

    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let port = self.port()?;
        let capacity = buffer.len();

        let received = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut port_guard = port.blocking_lock();
            let available = port_guard
                .bytes_to_read()
                .context("Failed to query serial input buffer")? as usize;
            let wanted = available.min(capacity);
            if wanted == 0 {
                return Ok(Vec::new());
            }

            let mut chunk = vec![0u8; wanted];
            let n = port_guard
                .read(&mut chunk)
                .context("Failed to read from serial port")?;
            chunk.truncate(n);
            Ok(chunk)
        })
        .await
        .context("Serial I/O task panicked")??;

        buffer[..received.len()].copy_from_slice(&received);
        Ok(received.len())
    }
}

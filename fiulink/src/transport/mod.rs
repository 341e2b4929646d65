//! Byte transports underneath the frame layer.
//!
//! A transport is the thin driver that moves bytes over the UART. It uses a
//! pull model for transmission: [`Transport::start_send`] hands the transport
//! a [`SendSource`] from which it copies the staged frame exactly once.
//!
//! The two asynchronous events a driver produces, a received byte and a
//! finished transmission, are delivered by whoever owns the controller:
//!
//! ```text
//! +------------------+   on_receive_byte(b)    +-----------------+
//! |  UART ISR / RX   | ----------------------> |                 |
//! |  reader thread   |   on_send_complete()    |  FiuController  |
//! +------------------+ ----------------------> |   FrameLayer    |
//!          ^                                   |                 |
//!          |      start_send(&mut SendSource)  |                 |
//!          +---------------------------------- +-----------------+
//! ```
//!
//! Implementations:
//!
//! - [`MemoryTransport`]: records frames in memory, for tests and simulation
//! - [`SerialTransport`]: native serial port via the `serialport` crate

pub mod memory;
#[cfg(feature = "native")]
pub mod native;

use std::time::Duration;

use crate::error::Result;

/// Source of staged bytes, pulled by the transport when it is ready to send.
pub trait SendSource {
    /// Copy the staged bytes into `buf` and return how many were written.
    ///
    /// Returns `None` when nothing is staged. A staged frame is handed out
    /// only once.
    fn pull_frame(&mut self, buf: &mut [u8]) -> Option<usize>;
}

/// Byte-level transmit/receive driver.
pub trait Transport {
    /// Prepare the driver for use.
    fn init(&mut self) -> Result<()>;

    /// Whether a transmission is in progress.
    fn is_send_busy(&self) -> bool;

    /// Pull bytes from `source` and start transmitting them.
    ///
    /// Returns `false` when nothing could be started (busy, nothing staged,
    /// or a driver failure).
    fn start_send(&mut self, source: &mut dyn SendSource) -> bool;
}

/// Serial port configuration.
///
/// Frames are always sent 8N1 without flow control.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout of the receive loop.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(10),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub use memory::MemoryTransport;
#[cfg(feature = "native")]
pub use native::SerialTransport;

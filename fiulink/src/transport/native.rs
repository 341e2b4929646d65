//! Native serial transport using the `serialport` crate.
//!
//! Transmission is synchronous: `start_send` returns once the frame has been
//! written and flushed, so the driver is never observed busy. The receive
//! side is a cloned handle read by the session's reader thread.

use {
    crate::{
        error::Result,
        protocol::frame::FRAME_LEN,
        transport::{SendSource, SerialConfig, Transport},
    },
    log::{debug, trace, warn},
    serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits},
    std::io::Write,
};

/// Serial port transport.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialTransport {
    /// Open `config.port_name` as 8N1 without flow control.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()?;
        debug!(
            "Opened {} at {} baud, 8N1",
            config.port_name, config.baud_rate
        );

        Ok(Self {
            port,
            name: config.port_name.clone(),
        })
    }

    /// Cloned handle for a background receive loop.
    pub fn try_clone_reader(&self) -> Result<Box<dyn serialport::SerialPort>> {
        Ok(self.port.try_clone()?)
    }
}

impl Transport for SerialTransport {
    fn init(&mut self) -> Result<()> {
        trace!("Clearing buffers on {}", self.name);
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn is_send_busy(&self) -> bool {
        false
    }

    fn start_send(&mut self, source: &mut dyn SendSource) -> bool {
        let mut buf = [0u8; FRAME_LEN];
        let Some(len) = source.pull_frame(&mut buf) else {
            return false;
        };
        if len == 0 {
            return false;
        }

        trace!("TX {}: {:02X?}", self.name, &buf[..len]);
        match self
            .port
            .write_all(&buf[..len])
            .and_then(|()| self.port.flush())
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Write to {} failed: {e}", self.name);
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration};

    #[test]
    fn test_open_missing_port_fails() {
        let config = SerialConfig::new("/dev/fiulink-does-not-exist", 115_200)
            .with_timeout(Duration::from_millis(5));
        assert!(SerialTransport::open(&config).is_err());
    }
}

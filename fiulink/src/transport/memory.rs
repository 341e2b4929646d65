//! In-memory transport.

use {
    crate::{
        error::Result,
        protocol::frame::FRAME_LEN,
        transport::{SendSource, Transport},
    },
    log::trace,
};

/// Transport that keeps every transmitted frame in memory.
///
/// Sends complete instantly; the owner still has to report completion to the
/// controller, as a real driver would from its interrupt. Busy and start
/// failures can be forced to exercise the rejection paths.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Vec<Vec<u8>>,
    busy: bool,
    fail_next_start: bool,
    initialized: bool,
}

impl MemoryTransport {
    /// Create an idle transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the busy flag.
    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    /// Make the next `start_send` fail without pulling anything.
    pub fn fail_next_start(&mut self) {
        self.fail_next_start = true;
    }

    /// Whether `init` has been called.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Every transmission so far, oldest first.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Most recent transmission.
    pub fn last_sent(&self) -> Option<&[u8]> {
        self.sent
            .last()
            .map(Vec::as_slice)
    }

    /// Drain recorded transmissions.
    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for MemoryTransport {
    fn init(&mut self) -> Result<()> {
        self.initialized = true;
        self.sent.clear();
        Ok(())
    }

    fn is_send_busy(&self) -> bool {
        self.busy
    }

    fn start_send(&mut self, source: &mut dyn SendSource) -> bool {
        if self.busy {
            return false;
        }
        if self.fail_next_start {
            self.fail_next_start = false;
            trace!("Forced start failure");
            return false;
        }

        let mut buf = [0u8; FRAME_LEN];
        match source.pull_frame(&mut buf) {
            Some(len) if len > 0 => {
                trace!("Sent {len} bytes: {:02X?}", &buf[..len]);
                self.sent.push(buf[..len].to_vec());
                true
            },
            _ => false,
        }
    }
}

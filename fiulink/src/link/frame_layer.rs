//! Frame layer: byte synchronization, staging and echo validation.
//!
//! Outbound, a command id and up to eight payload bytes become one staged
//! host-to-device frame that the transport pulls once. Inbound, bytes are
//! reassembled into device-to-host frames:
//!
//! ```text
//!            byte == 0xA5
//! Unsynced ----------------> Synced (1 byte)
//!    ^                          |  append
//!    |                          v
//!    +---- 12 bytes buffered: validate, deliver if valid, reset
//! ```
//!
//! A frame is valid only if its sentinels and checksum are correct and its
//! command id and payload equal the last transmitted ones: the peripheral
//! acknowledges by echoing, so a valid frame *is* the acknowledgment.

use {
    crate::{
        error::{Error, Result},
        protocol::frame::{DEVICE_HEADER, Direction, FRAME_LEN, Frame, Payload, pad_payload},
        transport::{SendSource, Transport},
    },
    log::{debug, trace},
};

/// Consumer of validated inbound frames.
pub type ReceiveCallback = Box<dyn FnMut(&Frame) + Send>;

/// Completion of a single send.
pub type SendCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Counters kept by the frame layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames handed to the transport.
    pub frames_sent: u64,
    /// Inbound frames that passed validation.
    pub frames_accepted: u64,
    /// Inbound frames dropped by validation.
    pub frames_dropped: u64,
    /// Bytes discarded while searching for a header.
    pub bytes_skipped: u64,
}

/// Outbound staging slot, pulled by the transport.
#[derive(Debug, Default)]
struct TxSlot {
    frame: [u8; FRAME_LEN],
    pending: bool,
}

impl SendSource for TxSlot {
    fn pull_frame(&mut self, buf: &mut [u8]) -> Option<usize> {
        if !self.pending || buf.len() < FRAME_LEN {
            return None;
        }
        buf[..FRAME_LEN].copy_from_slice(&self.frame);
        self.pending = false;
        Some(FRAME_LEN)
    }
}

/// Inbound reassembly state.
#[derive(Debug, Default)]
struct RxAssembly {
    synced: bool,
    buf: [u8; FRAME_LEN],
    len: usize,
}

impl RxAssembly {
    /// Feed one byte; returns a complete frame once twelve are buffered.
    fn push(&mut self, byte: u8) -> Option<[u8; FRAME_LEN]> {
        if !self.synced {
            if byte == DEVICE_HEADER {
                self.buf[0] = byte;
                self.len = 1;
                self.synced = true;
            }
            return None;
        }

        if self.len < self.buf.len() {
            self.buf[self.len] = byte;
            self.len += 1;
        }

        if self.len >= FRAME_LEN {
            let frame = self.buf;
            self.reset();
            return Some(frame);
        }
        None
    }

    fn reset(&mut self) {
        self.synced = false;
        self.len = 0;
    }
}

/// Frame layer over a byte transport.
pub struct FrameLayer<T> {
    transport: T,
    tx: TxSlot,
    send_callback: Option<SendCallback>,
    last_sent: Option<(u8, Payload)>,
    rx: RxAssembly,
    receive_callback: Option<ReceiveCallback>,
    stats: FrameStats,
}

impl<T: Transport> FrameLayer<T> {
    /// Wrap a transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            tx: TxSlot::default(),
            send_callback: None,
            last_sent: None,
            rx: RxAssembly::default(),
            receive_callback: None,
            stats: FrameStats::default(),
        }
    }

    /// Initialize the transport and clear all link state.
    ///
    /// The registered receive callback is kept.
    pub fn init(&mut self) -> Result<()> {
        self.transport.init()?;
        self.tx = TxSlot::default();
        self.send_callback = None;
        self.last_sent = None;
        self.rx.reset();
        self.stats = FrameStats::default();
        Ok(())
    }

    /// Build, stage and start sending a frame.
    ///
    /// `on_complete` runs exactly once: synchronously with an error if the
    /// send is rejected or the transport fails to start, otherwise with
    /// `Ok(())` from [`Self::on_send_complete`]. Returns whether the frame
    /// was accepted.
    pub fn send_command<F>(&mut self, cmd_id: u8, data: &[u8], on_complete: F) -> bool
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        if self.transport.is_send_busy() {
            debug!("Rejecting cmd {cmd_id:#04x}: transport busy");
            on_complete(Err(Error::Busy));
            return false;
        }

        let payload = match pad_payload(data) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Rejecting cmd {cmd_id:#04x}: {e}");
                on_complete(Err(e));
                return false;
            },
        };

        let frame = Frame::with_payload(Direction::ToDevice, cmd_id, &payload);
        self.tx.frame = *frame.as_bytes();
        self.tx.pending = true;
        self.last_sent = Some((cmd_id, payload));
        if self.send_callback.is_some() {
            trace!("Dropping completion of a previous send");
        }
        self.send_callback = Some(Box::new(on_complete));

        if self.transport.start_send(&mut self.tx) {
            self.stats.frames_sent += 1;
            trace!("Staged cmd {cmd_id:#04x}: {:02X?}", frame.as_bytes());
            true
        } else {
            debug!("Transport failed to start cmd {cmd_id:#04x}");
            self.tx.pending = false;
            if let Some(callback) = self.send_callback.take() {
                callback(Err(Error::SendFailed));
            }
            false
        }
    }

    /// The transport finished putting the last frame on the wire.
    pub fn on_send_complete(&mut self) {
        if let Some(callback) = self.send_callback.take() {
            callback(Ok(()));
        }
    }

    /// The transport lost the last frame after accepting it.
    pub fn on_send_failed(&mut self) {
        if let Some(callback) = self.send_callback.take() {
            callback(Err(Error::SendFailed));
        }
    }

    /// Feed one received byte into the reassembly state machine.
    pub fn on_receive_byte(&mut self, byte: u8) {
        let was_synced = self.rx.synced;
        let Some(raw) = self.rx.push(byte) else {
            if !was_synced && !self.rx.synced {
                self.stats.bytes_skipped += 1;
            }
            return;
        };

        let frame = Frame::from_bytes(raw);
        match self.validate(&frame) {
            Ok(()) => {
                self.stats.frames_accepted += 1;
                trace!("RX frame cmd {:#04x} accepted", frame.cmd_id());
                if let Some(callback) = self.receive_callback.as_mut() {
                    callback(&frame);
                }
            },
            Err(e) => {
                self.stats.frames_dropped += 1;
                debug!("Dropping frame {:02X?}: {e}", frame.as_bytes());
            },
        }
    }

    /// Register the single consumer of validated frames, replacing any
    /// previous one.
    pub fn set_receive_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&Frame) + Send + 'static,
    {
        self.receive_callback = Some(Box::new(callback));
    }

    /// Whether the transport is sending or a staged frame is not yet pulled.
    pub fn is_send_busy(&self) -> bool {
        self.transport.is_send_busy() || self.tx.pending
    }

    /// Command id and payload of the most recent frame sent.
    pub fn last_sent(&self) -> Option<(u8, Payload)> {
        self.last_sent
    }

    /// Link counters.
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn validate(&self, frame: &Frame) -> Result<()> {
        frame.verify(Direction::ToHost)?;
        match self.last_sent {
            Some((cmd_id, payload)) if frame.echoes(cmd_id, &payload) => Ok(()),
            Some((cmd_id, _)) => Err(Error::AckMismatch(format!(
                "frame cmd {:#04x} does not echo last sent cmd {cmd_id:#04x}",
                frame.cmd_id()
            ))),
            None => Err(Error::AckMismatch("nothing has been sent".into())),
        }
    }
}

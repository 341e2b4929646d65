//! In-memory FIU peripheral and a blocking link driven against it.
//!
//! The peripheral answers each valid host frame with its echo. Faults can be
//! injected to exercise the failure paths without hardware.

use {
    crate::{
        channel::ChannelMask,
        clock::ManualClock,
        error::{Error, Result},
        link::{
            completion::{Abandoned, completion},
            controller::{FiuController, LinkConfig},
            request::{CommandLink, Request},
        },
        protocol::frame::{Direction, FRAME_LEN, Frame, Payload},
        transport::MemoryTransport,
    },
    log::{debug, trace},
};

/// Misbehaviour injected into the peripheral's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralFault {
    /// Reply with the command id incremented.
    WrongCommandId,
    /// Reply with a corrupted checksum.
    BadChecksum,
    /// Never reply.
    Silent,
}

/// Simulated FIU board.
#[derive(Debug, Default, Clone)]
pub struct Peripheral {
    fault: Option<PeripheralFault>,
    received: Vec<Frame>,
}

impl Peripheral {
    /// Well-behaved peripheral.
    pub fn new() -> Self {
        Self::default()
    }

    /// Peripheral misbehaving on every reply.
    pub fn with_fault(fault: PeripheralFault) -> Self {
        Self {
            fault: Some(fault),
            ..Self::default()
        }
    }

    /// Change or clear the injected fault.
    pub fn set_fault(&mut self, fault: Option<PeripheralFault>) {
        self.fault = fault;
    }

    /// Valid host frames received so far.
    pub fn received(&self) -> &[Frame] {
        &self.received
    }

    /// Handle one transmission and build the reply, if any.
    ///
    /// Malformed host frames are ignored like the board would.
    pub fn respond(&mut self, bytes: &[u8]) -> Option<Frame> {
        let raw: [u8; FRAME_LEN] = bytes.try_into().ok()?;
        let request = Frame::from_bytes(raw);
        if let Err(e) = request.verify(Direction::ToDevice) {
            debug!("Peripheral ignoring frame: {e}");
            return None;
        }
        self.received.push(request);

        let echo = Frame::with_payload(Direction::ToHost, request.cmd_id(), &request.payload());
        match self.fault {
            None => Some(echo),
            Some(PeripheralFault::Silent) => None,
            Some(PeripheralFault::WrongCommandId) => Some(Frame::with_payload(
                Direction::ToHost,
                request.cmd_id().wrapping_add(1),
                &request.payload(),
            )),
            Some(PeripheralFault::BadChecksum) => {
                let mut bytes = *echo.as_bytes();
                bytes[10] ^= 0xFF;
                Some(Frame::from_bytes(bytes))
            },
        }
    }
}

/// One request/reply pair seen by [`SimulatedLink`].
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Bytes the host sent, if anything was sent.
    pub sent: Option<[u8; FRAME_LEN]>,
    /// Bytes the peripheral answered with.
    pub reply: Option<[u8; FRAME_LEN]>,
}

/// Controller wired to a [`Peripheral`] with a hand-driven clock.
///
/// A silent peripheral costs no wall time: the clock is advanced past the
/// response window before polling.
pub struct SimulatedLink {
    controller: FiuController<MemoryTransport, ManualClock>,
    clock: ManualClock,
    peripheral: Peripheral,
    log: Vec<Exchange>,
}

impl SimulatedLink {
    /// Link against `peripheral` with the default response window.
    pub fn new(peripheral: Peripheral) -> Result<Self> {
        Self::with_config(peripheral, LinkConfig::default())
    }

    /// Link against `peripheral` with explicit link tuning.
    pub fn with_config(peripheral: Peripheral, config: LinkConfig) -> Result<Self> {
        let clock = ManualClock::new(0);
        let mut controller =
            FiuController::with_config(MemoryTransport::new(), clock.clone(), config);
        controller.init()?;
        Ok(Self {
            controller,
            clock,
            peripheral,
            log: Vec::new(),
        })
    }

    /// Exchanges so far, oldest first.
    pub fn exchanges(&self) -> &[Exchange] {
        &self.log
    }

    /// Simulated peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    /// Mutable access to the simulated peripheral.
    pub fn peripheral_mut(&mut self) -> &mut Peripheral {
        &mut self.peripheral
    }

    /// Underlying controller.
    pub fn controller(&self) -> &FiuController<MemoryTransport, ManualClock> {
        &self.controller
    }

    fn timeout_ms(&self) -> u32 {
        u32::try_from(self.controller.config().response_timeout.as_millis()).unwrap_or(u32::MAX)
    }
}

impl CommandLink for SimulatedLink {
    fn execute(&mut self, request: &Request) -> Result<Payload> {
        let (callback, done) = completion();
        let accepted = request.submit(&mut self.controller, callback);

        if accepted {
            self.controller.on_send_complete();
            let sent = self
                .controller
                .transport_mut()
                .take_sent()
                .pop()
                .and_then(|bytes| <[u8; FRAME_LEN]>::try_from(bytes).ok());
            let reply = sent.and_then(|bytes| self.peripheral.respond(&bytes));
            trace!("Simulated exchange {request}: reply {}", reply.is_some());

            match reply {
                Some(frame) => {
                    for &b in frame.as_bytes() {
                        self.controller.on_receive_byte(b);
                    }
                },
                None => {
                    self.clock.advance(self.timeout_ms());
                },
            }
            self.controller.process();

            self.log.push(Exchange {
                sent,
                reply: reply.map(|f| *f.as_bytes()),
            });
        }

        let outcome = match done.poll() {
            Ok(None) => {
                // Dropped mismatching replies leave the command waiting
                self.clock.advance(self.timeout_ms());
                self.controller.process();
                done.poll()
            },
            polled => polled,
        };
        match outcome {
            Ok(Some(outcome)) => outcome.into_result(),
            Ok(None) => Err(Error::Timeout {
                elapsed_ms: self.timeout_ms(),
            }),
            Err(Abandoned) => Err(Error::SendFailed),
        }
    }

    fn tracked_channels(&self) -> ChannelMask {
        self.controller.tracked_channels()
    }
}

//! Command layer: single outstanding request, timeout and channel tracking.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --send--> Sending --transport started--> AwaitingAck
//!  ^                 |                               |
//!  |                 | rejected / start failed       | echo | mismatch | timeout
//!  +-----------------+-------------------------------+
//! ```
//!
//! Every path back to `Idle` invokes the submitter's callback exactly once.
//! A submission while not `Idle` is rejected with [`Error::Busy`]; there is
//! no queue and no retry.
//!
//! All entry points take `&mut self`. Whoever drives the controller from
//! both an interrupt-like context (received bytes, transmit completion) and
//! a polling tick has to serialize those calls, e.g. behind a mutex as
//! [`Session`](crate::session::Session) does.

use {
    crate::{
        channel::ChannelMask,
        clock::{Clock, elapsed_ms},
        error::{Error, Result},
        link::{
            completion::CommandOutcome,
            frame_layer::{FrameLayer, FrameStats},
        },
        protocol::{
            command::{CommandId, ConfigParams, encode_config, encode_mask},
            frame::{Frame, Payload},
        },
        transport::Transport,
    },
    crossbeam_channel::Receiver,
    log::{debug, info, trace, warn},
    std::time::Duration,
};

/// Default acknowledgment window.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Boxed completion callback.
pub type CommandCallback = Box<dyn FnOnce(CommandOutcome) + Send>;

/// Link tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Time allowed between send acceptance and a valid echo.
    pub response_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

impl LinkConfig {
    /// Set the acknowledgment window.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    #[allow(clippy::cast_possible_truncation)]
    fn timeout_ms(&self) -> u32 {
        self.response_timeout
            .as_millis()
            .min(u128::from(u32::MAX)) as u32
    }
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing outstanding.
    Idle,
    /// A command is being handed to the transport.
    Sending,
    /// The frame is out; waiting for its echo.
    AwaitingAck,
}

/// The single in-flight request.
struct PendingCommand {
    cmd_id: u8,
    expected: Payload,
    callback: Option<CommandCallback>,
    timeout_armed: bool,
    started_at: u32,
    send_done: Receiver<Result<()>>,
}

/// FIU command controller over a frame layer and a clock.
pub struct FiuController<T, C> {
    frame: FrameLayer<T>,
    clock: C,
    config: LinkConfig,
    pending: Option<PendingCommand>,
    tracked: ChannelMask,
    inbound: Receiver<Frame>,
}

impl<T: Transport, C: Clock> FiuController<T, C> {
    /// Controller with the default 100 ms acknowledgment window.
    pub fn new(transport: T, clock: C) -> Self {
        Self::with_config(transport, clock, LinkConfig::default())
    }

    /// Controller with explicit link tuning.
    pub fn with_config(transport: T, clock: C, config: LinkConfig) -> Self {
        let mut frame = FrameLayer::new(transport);
        let (tx, inbound) = crossbeam_channel::unbounded();
        frame.set_receive_callback(move |frame: &Frame| {
            let _ = tx.send(*frame);
        });

        Self {
            frame,
            clock,
            config,
            pending: None,
            tracked: ChannelMask::EMPTY,
            inbound,
        }
    }

    /// Initialize the transport and return to a clean `Idle` state.
    ///
    /// An outstanding command resolves with [`Error::SendFailed`]; tracked
    /// channels are cleared.
    pub fn init(&mut self) -> Result<()> {
        if let Some(pending) = &self.pending {
            warn!(
                "Re-initializing with cmd {:#04x} outstanding",
                pending.cmd_id
            );
            self.resolve(Err(Error::SendFailed));
        }
        self.frame.init()?;
        self.tracked = ChannelMask::EMPTY;
        while self.inbound.try_recv().is_ok() {}
        info!(
            "Link initialized (ack timeout {} ms)",
            self.config.timeout_ms()
        );
        Ok(())
    }

    /// Submit a raw command.
    ///
    /// `callback` is always invoked exactly once: immediately on rejection
    /// or start failure, later on echo, mismatch, transmit failure or
    /// timeout. Returns whether the command was accepted for sending.
    pub fn send_command<F>(&mut self, cmd_id: u8, payload: Payload, callback: F) -> bool
    where
        F: FnOnce(CommandOutcome) + Send + 'static,
    {
        if self.pending.is_some() {
            debug!("Rejecting cmd {cmd_id:#04x}: another command is outstanding");
            callback(CommandOutcome::failure(cmd_id, Error::Busy));
            return false;
        }

        let (done_tx, send_done) = crossbeam_channel::bounded(1);
        self.pending = Some(PendingCommand {
            cmd_id,
            expected: payload,
            callback: Some(Box::new(callback)),
            timeout_armed: false,
            started_at: 0,
            send_done,
        });

        let accepted = self
            .frame
            .send_command(cmd_id, &payload, move |result| {
                let _ = done_tx.send(result);
            });

        if !accepted {
            let error = self
                .pending
                .as_ref()
                .and_then(|p| p.send_done.try_recv().ok())
                .and_then(Result::err)
                .unwrap_or(Error::SendFailed);
            debug!("Cmd {cmd_id:#04x} not sent: {error}");
            self.resolve(Err(error));
            return false;
        }

        let now = self.clock.now_ms();
        if let Some(pending) = self.pending.as_mut() {
            pending.started_at = now;
            pending.timeout_armed = true;
        }
        debug!("Cmd {cmd_id:#04x} sent, awaiting echo");
        true
    }

    /// Configure one channel and add it to the tracked set.
    pub fn set_config<F>(&mut self, params: &ConfigParams, callback: F) -> bool
    where
        F: FnOnce(CommandOutcome) + Send + 'static,
    {
        let cmd_id = CommandId::SetConfig.as_u8();
        if let Err(e) = params.validate() {
            debug!("Rejecting set-config: {e}");
            callback(CommandOutcome::failure(cmd_id, e));
            return false;
        }

        let payload = encode_config(params);
        self.tracked.set(params.channel);
        self.send_command(cmd_id, payload, callback)
    }

    /// Start synchronous output on `mask`, or on the tracked channels.
    pub fn synchronous_op<F>(&mut self, mask: Option<ChannelMask>, callback: F) -> bool
    where
        F: FnOnce(CommandOutcome) + Send + 'static,
    {
        self.batch_op(CommandId::SynchronousOp, mask, true, callback)
    }

    /// Fire triggered output on `mask`. No tracked-channel fallback.
    pub fn trigger_op<F>(&mut self, mask: Option<ChannelMask>, callback: F) -> bool
    where
        F: FnOnce(CommandOutcome) + Send + 'static,
    {
        self.batch_op(CommandId::TriggerOp, mask, false, callback)
    }

    /// Apply control output on `mask`, or on the tracked channels.
    pub fn control_op<F>(&mut self, mask: Option<ChannelMask>, callback: F) -> bool
    where
        F: FnOnce(CommandOutcome) + Send + 'static,
    {
        self.batch_op(CommandId::ControlOp, mask, true, callback)
    }

    /// Deliver one received byte (asynchronous context).
    pub fn on_receive_byte(&mut self, byte: u8) {
        self.frame.on_receive_byte(byte);
        self.drain_inbound();
    }

    /// The transport finished sending (asynchronous context).
    pub fn on_send_complete(&mut self) {
        self.frame.on_send_complete();
        self.poll_send_done();
    }

    /// The transport lost an accepted frame (asynchronous context).
    pub fn on_send_failed(&mut self) {
        self.frame.on_send_failed();
        self.poll_send_done();
    }

    /// Periodic tick: resolves the outstanding command once its window has
    /// elapsed.
    pub fn process(&mut self) {
        self.poll_send_done();
        self.drain_inbound();

        let Some(pending) = self.pending.as_ref() else {
            return;
        };
        if !pending.timeout_armed {
            return;
        }

        let elapsed = elapsed_ms(self.clock.now_ms(), pending.started_at);
        if elapsed >= self.config.timeout_ms() {
            warn!(
                "Cmd {:#04x} timed out after {elapsed} ms",
                pending.cmd_id
            );
            self.resolve(Err(Error::Timeout {
                elapsed_ms: elapsed,
            }));
        }
    }

    /// Whether a new command would be rejected right now.
    pub fn is_busy(&self) -> bool {
        self.frame.is_send_busy() || self.pending.is_some()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        match &self.pending {
            None => LinkState::Idle,
            Some(pending) if pending.timeout_armed => LinkState::AwaitingAck,
            Some(_) => LinkState::Sending,
        }
    }

    /// Command id of the outstanding request.
    pub fn pending_command(&self) -> Option<u8> {
        self.pending.as_ref().map(|p| p.cmd_id)
    }

    /// Channels configured through `set_config` so far.
    pub fn tracked_channels(&self) -> ChannelMask {
        self.tracked
    }

    /// Forget every tracked channel.
    pub fn clear_tracked_channels(&mut self) {
        self.tracked = ChannelMask::EMPTY;
    }

    /// Link tuning in effect.
    pub fn config(&self) -> LinkConfig {
        self.config
    }

    /// Frame layer counters.
    pub fn stats(&self) -> FrameStats {
        self.frame.stats()
    }

    /// Underlying frame layer.
    pub fn frame_layer(&self) -> &FrameLayer<T> {
        &self.frame
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        self.frame.transport()
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        self.frame.transport_mut()
    }

    /// Clock in use.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn batch_op<F>(
        &mut self,
        command: CommandId,
        mask: Option<ChannelMask>,
        use_tracked: bool,
        callback: F,
    ) -> bool
    where
        F: FnOnce(CommandOutcome) + Send + 'static,
    {
        let mask = match mask {
            Some(mask) => mask,
            None if use_tracked && !self.tracked.is_empty() => self.tracked,
            None => {
                let reason = if use_tracked {
                    "no channel mask given and no channels tracked"
                } else {
                    "an explicit channel mask is required"
                };
                debug!("Rejecting {}: {reason}", command.name());
                callback(CommandOutcome::failure(
                    command.as_u8(),
                    Error::InvalidParams(reason.into()),
                ));
                return false;
            },
        };

        trace!("{} on channels {mask}", command.name());
        self.send_command(command.as_u8(), encode_mask(mask), callback)
    }

    fn poll_send_done(&mut self) {
        let Some(result) = self
            .pending
            .as_ref()
            .and_then(|p| p.send_done.try_recv().ok())
        else {
            return;
        };

        match result {
            Ok(()) => trace!("Transmit complete"),
            Err(e) => {
                debug!("Transmit failed after acceptance: {e}");
                self.resolve(Err(e));
            },
        }
    }

    fn drain_inbound(&mut self) {
        while let Ok(frame) = self.inbound.try_recv() {
            self.handle_frame(&frame);
        }
    }

    fn handle_frame(&mut self, frame: &Frame) {
        let Some(pending) = self.pending.as_ref() else {
            trace!("Ignoring frame cmd {:#04x}: nothing pending", frame.cmd_id());
            return;
        };
        if !pending.timeout_armed {
            trace!("Ignoring frame cmd {:#04x}: not awaiting ack", frame.cmd_id());
            return;
        }

        if frame.echoes(pending.cmd_id, &pending.expected) {
            debug!("Cmd {:#04x} acknowledged", pending.cmd_id);
            self.resolve(Ok(frame.payload()));
        } else {
            let reason = format!(
                "echo cmd {:#04x} does not match pending cmd {:#04x}",
                frame.cmd_id(),
                pending.cmd_id
            );
            warn!("{reason}");
            self.resolve(Err(Error::AckMismatch(reason)));
        }
    }

    /// Reset to `Idle` and hand the outcome to the submitter.
    fn resolve(&mut self, result: Result<Payload>) {
        let Some(mut pending) = self.pending.take() else {
            return;
        };
        let outcome = match result {
            Ok(payload) => CommandOutcome::success(pending.cmd_id, payload),
            Err(e) => CommandOutcome::failure(pending.cmd_id, e),
        };
        if let Some(callback) = pending.callback.take() {
            callback(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            clock::ManualClock,
            link::completion::completion,
            protocol::{
                command::{OutputFault, WorkMode},
                frame::Direction,
            },
            transport::MemoryTransport,
        },
        std::sync::{Arc, Mutex},
    };

    type TestController = FiuController<MemoryTransport, ManualClock>;

    fn controller() -> (TestController, ManualClock) {
        let clock = ManualClock::new(1_000);
        let mut ctrl = FiuController::new(MemoryTransport::new(), clock.clone());
        ctrl.init().unwrap();
        (ctrl, clock)
    }

    fn echo_last(ctrl: &mut TestController) {
        let sent = ctrl.transport().last_sent().unwrap().to_vec();
        let host = Frame::from_bytes(sent.try_into().unwrap());
        let echo = Frame::with_payload(Direction::ToHost, host.cmd_id(), &host.payload());
        for &b in echo.as_bytes() {
            ctrl.on_receive_byte(b);
        }
    }

    fn counting_callback() -> (
        Arc<Mutex<Vec<CommandOutcome>>>,
        impl FnOnce(CommandOutcome) + Send + 'static,
    ) {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        (outcomes, move |o| sink.lock().unwrap().push(o))
    }

    #[test]
    fn test_echo_resolves_success() {
        let (mut ctrl, _) = controller();
        let (callback, done) = completion();

        assert!(ctrl.synchronous_op(Some(ChannelMask::from_bits(0b1010)), callback));
        assert_eq!(ctrl.state(), LinkState::AwaitingAck);
        assert!(ctrl.is_busy());
        ctrl.on_send_complete();
        echo_last(&mut ctrl);

        let outcome = done.try_take().unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.command(), Some(CommandId::SynchronousOp));
        assert_eq!(outcome.payload(), Some(&[0x0A, 0, 0, 0, 0, 0, 0, 0]));
        assert_eq!(ctrl.state(), LinkState::Idle);
        assert!(!ctrl.is_busy());
    }

    #[test]
    fn test_second_send_rejected_without_disturbing_first() {
        let (mut ctrl, _) = controller();
        let (first, first_done) = completion();
        let (second, second_done) = completion();

        assert!(ctrl.trigger_op(Some(ChannelMask::from_bits(1)), first));
        assert!(!ctrl.control_op(Some(ChannelMask::from_bits(2)), second));

        let rejected = second_done.try_take().unwrap();
        assert!(matches!(rejected.error(), Some(Error::Busy)));
        assert_eq!(rejected.command(), Some(CommandId::ControlOp));
        assert_eq!(ctrl.pending_command(), Some(CommandId::TriggerOp.as_u8()));
        assert_eq!(ctrl.transport().sent().len(), 1);

        echo_last(&mut ctrl);
        assert!(first_done.try_take().unwrap().is_success());
    }

    #[test]
    fn test_timeout_resolves_once() {
        let (mut ctrl, clock) = controller();
        let (outcomes, callback) = counting_callback();

        ctrl.control_op(Some(ChannelMask::from_bits(4)), callback);
        clock.advance(99);
        ctrl.process();
        assert!(outcomes.lock().unwrap().is_empty());

        clock.advance(1);
        ctrl.process();
        ctrl.process();
        {
            let outcomes = outcomes.lock().unwrap();
            assert_eq!(outcomes.len(), 1);
            assert!(matches!(
                outcomes[0].error(),
                Some(Error::Timeout { elapsed_ms: 100 })
            ));
        }

        // A late echo has nothing left to resolve
        echo_last(&mut ctrl);
        assert_eq!(outcomes.lock().unwrap().len(), 1);
        assert_eq!(ctrl.state(), LinkState::Idle);
    }

    #[test]
    fn test_timeout_across_clock_wrap() {
        let clock = ManualClock::new(u32::MAX - 20);
        let mut ctrl = FiuController::new(MemoryTransport::new(), clock.clone());
        let (callback, done) = completion();

        ctrl.trigger_op(Some(ChannelMask::from_bits(1)), callback);
        clock.advance(50);
        ctrl.process();
        assert!(done.try_take().is_none());
        clock.advance(50);
        ctrl.process();
        assert!(done.try_take().is_some());
    }

    #[test]
    fn test_custom_timeout() {
        let clock = ManualClock::new(0);
        let config = LinkConfig::default().with_response_timeout(Duration::from_millis(250));
        let mut ctrl = FiuController::with_config(MemoryTransport::new(), clock.clone(), config);
        let (callback, done) = completion();

        ctrl.trigger_op(Some(ChannelMask::from_bits(1)), callback);
        clock.advance(200);
        ctrl.process();
        assert!(done.try_take().is_none());
        clock.advance(50);
        ctrl.process();
        assert!(done.try_take().is_some());
    }

    #[test]
    fn test_transport_busy_rejects() {
        let (mut ctrl, _) = controller();
        ctrl.transport_mut().set_busy(true);
        assert!(ctrl.is_busy());
        let (callback, done) = completion();

        assert!(!ctrl.trigger_op(Some(ChannelMask::from_bits(1)), callback));
        assert!(matches!(done.try_take().unwrap().error(), Some(Error::Busy)));
        assert_eq!(ctrl.state(), LinkState::Idle);
    }

    #[test]
    fn test_start_failure_reports_send_failed() {
        let (mut ctrl, _) = controller();
        ctrl.transport_mut().fail_next_start();
        let (callback, done) = completion();

        assert!(!ctrl.trigger_op(Some(ChannelMask::from_bits(1)), callback));
        assert!(matches!(
            done.try_take().unwrap().error(),
            Some(Error::SendFailed)
        ));
        assert!(!ctrl.is_busy());
    }

    #[test]
    fn test_transmit_failure_after_acceptance() {
        let (mut ctrl, _) = controller();
        let (outcomes, callback) = counting_callback();

        ctrl.trigger_op(Some(ChannelMask::from_bits(1)), callback);
        ctrl.on_send_failed();
        ctrl.on_send_complete();

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].error(), Some(Error::SendFailed)));
        assert_eq!(ctrl.state(), LinkState::Idle);
    }

    #[test]
    fn test_set_config_validation() {
        let (mut ctrl, _) = controller();
        let (callback, done) = completion();
        let params = ConfigParams::new(64, OutputFault::LoadNoFault, WorkMode::Control);

        assert!(!ctrl.set_config(&params, callback));
        let outcome = done.try_take().unwrap();
        assert_eq!(outcome.command(), Some(CommandId::SetConfig));
        assert!(matches!(outcome.error(), Some(Error::InvalidParams(_))));
        assert!(ctrl.transport().sent().is_empty());
        assert!(ctrl.tracked_channels().is_empty());
    }

    #[test]
    fn test_set_config_tracks_even_when_rejected_busy() {
        let (mut ctrl, _) = controller();
        ctrl.trigger_op(Some(ChannelMask::from_bits(1)), |_| {});
        let (callback, done) = completion();
        let params = ConfigParams::new(9, OutputFault::LoadNoFault, WorkMode::Control);

        assert!(!ctrl.set_config(&params, callback));
        assert!(matches!(done.try_take().unwrap().error(), Some(Error::Busy)));
        assert!(ctrl.tracked_channels().is_set(9));
    }

    #[test]
    fn test_tracked_channel_fallback() {
        let (mut ctrl, _) = controller();
        for channel in [2u8, 5] {
            let params = ConfigParams::new(channel, OutputFault::LoadNoFault, WorkMode::Control);
            ctrl.set_config(&params, |_| {});
            echo_last(&mut ctrl);
        }

        let (callback, done) = completion();
        assert!(ctrl.control_op(None, callback));
        let sent = ctrl.transport().last_sent().unwrap().to_vec();
        assert_eq!(sent[1], 0x20);
        assert_eq!(&sent[2..10], &[0b0010_0100, 0, 0, 0, 0, 0, 0, 0]);
        echo_last(&mut ctrl);
        assert!(done.try_take().unwrap().is_success());

        ctrl.clear_tracked_channels();
        let (callback, done) = completion();
        assert!(!ctrl.synchronous_op(None, callback));
        assert!(matches!(
            done.try_take().unwrap().error(),
            Some(Error::InvalidParams(_))
        ));
    }

    #[test]
    fn test_trigger_requires_mask() {
        let (mut ctrl, _) = controller();
        ctrl.set_config(
            &ConfigParams::new(1, OutputFault::LoadNoFault, WorkMode::Triggered),
            |_| {},
        );
        echo_last(&mut ctrl);
        let sent_before = ctrl.transport().sent().len();

        let (callback, done) = completion();
        assert!(!ctrl.trigger_op(None, callback));
        assert!(matches!(
            done.try_take().unwrap().error(),
            Some(Error::InvalidParams(_))
        ));
        assert_eq!(ctrl.transport().sent().len(), sent_before);
    }

    #[test]
    fn test_frames_ignored_when_idle() {
        let (mut ctrl, _) = controller();
        let stray = Frame::with_payload(Direction::ToHost, 0x14, &[0; 8]);
        for &b in stray.as_bytes() {
            ctrl.on_receive_byte(b);
        }
        assert_eq!(ctrl.state(), LinkState::Idle);
    }

    #[test]
    fn test_init_clears_tracking() {
        let (mut ctrl, _) = controller();
        ctrl.set_config(
            &ConfigParams::new(3, OutputFault::LoadNoFault, WorkMode::Stop),
            |_| {},
        );
        ctrl.init().unwrap();
        assert!(ctrl.tracked_channels().is_empty());
        assert_eq!(ctrl.state(), LinkState::Idle);
    }

    #[test]
    fn test_init_resolves_outstanding_command() {
        let (mut ctrl, clock) = controller();
        let (outcomes, callback) = counting_callback();

        assert!(ctrl.control_op(Some(ChannelMask::from_bits(0b11)), callback));
        ctrl.on_send_complete();
        ctrl.init().unwrap();

        assert_eq!(ctrl.state(), LinkState::Idle);
        {
            let seen = outcomes.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].command(), Some(CommandId::ControlOp));
            assert!(matches!(seen[0].error(), Some(Error::SendFailed)));
        }

        // a late echo or timeout no longer reaches the old callback
        clock.advance(1_000);
        ctrl.process();
        assert_eq!(outcomes.lock().unwrap().len(), 1);
    }
}

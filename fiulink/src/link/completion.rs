//! Command outcomes and the one-shot handle that carries them.

use {
    crate::{
        error::{Error, Result},
        protocol::{command::CommandId, frame::Payload},
    },
    crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError},
    std::time::Duration,
    thiserror::Error,
};

/// Final result of one submitted command.
#[derive(Debug)]
pub struct CommandOutcome {
    cmd_id: u8,
    result: Result<Payload>,
}

impl CommandOutcome {
    /// Successful outcome carrying the echoed payload.
    pub fn success(cmd_id: u8, payload: Payload) -> Self {
        Self {
            cmd_id,
            result: Ok(payload),
        }
    }

    /// Failed outcome.
    pub fn failure(cmd_id: u8, error: Error) -> Self {
        Self {
            cmd_id,
            result: Err(error),
        }
    }

    /// Command id the outcome belongs to.
    pub fn cmd_id(&self) -> u8 {
        self.cmd_id
    }

    /// Command id as a known command, if it is one.
    pub fn command(&self) -> Option<CommandId> {
        CommandId::try_from(self.cmd_id).ok()
    }

    /// Whether the peripheral acknowledged the command.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Echoed payload on success, `None` on failure.
    pub fn payload(&self) -> Option<&Payload> {
        self.result.as_ref().ok()
    }

    /// Failure reason, `None` on success.
    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }

    /// Consume into the underlying result.
    pub fn into_result(self) -> Result<Payload> {
        self.result
    }
}

/// The completion callback was dropped without being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("completion callback dropped without an outcome")]
pub struct Abandoned;

/// Receiving end of a command's completion.
#[derive(Debug)]
pub struct Completion {
    rx: Receiver<CommandOutcome>,
}

impl Completion {
    /// Check for the outcome without blocking.
    ///
    /// `Ok(None)` while the command is still in flight.
    pub fn poll(&self) -> std::result::Result<Option<CommandOutcome>, Abandoned> {
        match self.rx.try_recv() {
            Ok(outcome) => Ok(Some(outcome)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Abandoned),
        }
    }

    /// Take the outcome if it has arrived. Use [`poll`](Self::poll) to tell
    /// an abandoned command apart from one still in flight.
    pub fn try_take(&self) -> Option<CommandOutcome> {
        self.poll().ok().flatten()
    }

    /// Block up to `timeout` for the outcome.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Option<CommandOutcome>, Abandoned> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Abandoned),
        }
    }
}

/// Create a completion callback and the handle observing it.
///
/// The callback is `FnOnce` and the channel holds a single message, so the
/// handle sees at most one outcome.
pub fn completion() -> (impl FnOnce(CommandOutcome) + Send + 'static, Completion) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let callback = move |outcome: CommandOutcome| {
        let _ = tx.send(outcome);
    };
    (callback, Completion { rx })
}

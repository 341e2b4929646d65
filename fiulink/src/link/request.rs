//! Owned command requests and the blocking link abstraction.

use {
    crate::{
        channel::ChannelMask,
        clock::Clock,
        error::Result,
        link::{completion::CommandOutcome, controller::FiuController},
        protocol::{
            command::{CommandId, ConfigParams, encode_config, encode_mask},
            frame::Payload,
        },
        transport::Transport,
    },
    std::fmt,
};

/// One FIU command, ready to be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Configure a channel.
    SetConfig(ConfigParams),
    /// Synchronous output; `None` uses the tracked channels.
    Synchronous(Option<ChannelMask>),
    /// Triggered output; a mask is required.
    Trigger(Option<ChannelMask>),
    /// Control output; `None` uses the tracked channels.
    Control(Option<ChannelMask>),
}

impl Request {
    /// Command id this request is sent with.
    pub fn command(&self) -> CommandId {
        match self {
            Self::SetConfig(_) => CommandId::SetConfig,
            Self::Synchronous(_) => CommandId::SynchronousOp,
            Self::Trigger(_) => CommandId::TriggerOp,
            Self::Control(_) => CommandId::ControlOp,
        }
    }

    /// Payload for this request, resolving a missing mask against `tracked`.
    ///
    /// Returns `None` when the request has no mask to send. Parameters are
    /// not validated here.
    pub fn payload(&self, tracked: ChannelMask) -> Option<Payload> {
        let fallback = (!tracked.is_empty()).then_some(tracked);
        match self {
            Self::SetConfig(params) => Some(encode_config(params)),
            Self::Trigger(mask) => mask.map(encode_mask),
            Self::Synchronous(mask) | Self::Control(mask) => mask.or(fallback).map(encode_mask),
        }
    }

    /// Submit to a controller. Same contract as the controller's operation.
    pub fn submit<T, C, F>(&self, controller: &mut FiuController<T, C>, callback: F) -> bool
    where
        T: Transport,
        C: Clock,
        F: FnOnce(CommandOutcome) + Send + 'static,
    {
        match *self {
            Self::SetConfig(ref params) => controller.set_config(params, callback),
            Self::Synchronous(mask) => controller.synchronous_op(mask, callback),
            Self::Trigger(mask) => controller.trigger_op(mask, callback),
            Self::Control(mask) => controller.control_op(mask, callback),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetConfig(p) => write!(
                f,
                "{} ch{} fault={:#04x} mode={:?}",
                self.command(),
                p.channel,
                p.fault.as_u8(),
                p.mode
            ),
            Self::Synchronous(mask) | Self::Trigger(mask) | Self::Control(mask) => match mask {
                Some(mask) => write!(f, "{} [{mask}]", self.command()),
                None => write!(f, "{} [tracked]", self.command()),
            },
        }
    }
}

/// A link that runs one request to completion.
pub trait CommandLink {
    /// Submit `request` and block until it resolves.
    ///
    /// Returns the echoed payload, or the error the command resolved with.
    fn execute(&mut self, request: &Request) -> Result<Payload>;

    /// Channels configured so far on this link.
    fn tracked_channels(&self) -> ChannelMask;

    /// Run requests in order, stopping at the first failure.
    fn execute_all(&mut self, requests: &[Request]) -> Result<Vec<Payload>> {
        requests
            .iter()
            .map(|request| self.execute(request))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            clock::ManualClock,
            error::Error,
            link::completion::completion,
            protocol::command::{OutputFault, WorkMode},
            transport::MemoryTransport,
        },
    };

    #[test]
    fn test_payload_resolution() {
        let tracked = ChannelMask::from_bits(0b110);
        assert_eq!(
            Request::Control(None).payload(tracked),
            Some([0b110, 0, 0, 0, 0, 0, 0, 0])
        );
        assert_eq!(Request::Trigger(None).payload(tracked), None);
        assert_eq!(Request::Synchronous(None).payload(ChannelMask::EMPTY), None);
        assert_eq!(
            Request::Trigger(Some(ChannelMask::from_bits(1))).payload(ChannelMask::EMPTY),
            Some([1, 0, 0, 0, 0, 0, 0, 0])
        );
    }

    #[test]
    fn test_submit_routes_to_operation() {
        let mut ctrl = FiuController::new(MemoryTransport::new(), ManualClock::new(0));
        let params = ConfigParams::new(4, OutputFault::LoadNoFault, WorkMode::Control);

        assert!(Request::SetConfig(params).submit(&mut ctrl, |_| {}));
        let sent = ctrl.transport().last_sent().unwrap().to_vec();
        assert_eq!(sent[1], 0x11);
        assert!(ctrl.tracked_channels().is_set(4));
    }

    #[test]
    fn test_submit_trigger_without_mask() {
        let mut ctrl = FiuController::new(MemoryTransport::new(), ManualClock::new(0));
        let (callback, done) = completion();
        assert!(!Request::Trigger(None).submit(&mut ctrl, callback));
        assert!(matches!(
            done.try_take().unwrap().error(),
            Some(Error::InvalidParams(_))
        ));
    }

    #[test]
    fn test_display() {
        let req = Request::Trigger(Some(ChannelMask::from_bits(0b11)));
        assert!(req.to_string().starts_with("trigger-op"));
        assert!(Request::Control(None).to_string().contains("tracked"));
    }
}

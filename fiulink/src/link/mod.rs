//! Link layers: frame reassembly and validation, then the command
//! controller on top of it.

pub mod completion;
pub mod controller;
pub mod frame_layer;
pub mod request;

pub use {
    completion::{Abandoned, CommandOutcome, Completion, completion},
    controller::{CommandCallback, DEFAULT_RESPONSE_TIMEOUT, FiuController, LinkConfig, LinkState},
    frame_layer::{FrameLayer, FrameStats, ReceiveCallback, SendCallback},
    request::{CommandLink, Request},
};

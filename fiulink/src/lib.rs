//! # fiulink
//!
//! Host-side link for a fault injection unit (FIU) driven over UART.
//!
//! The crate is split in two layers:
//!
//! - the frame layer turns commands into fixed 12-byte frames and
//!   reassembles echo frames from the received byte stream
//! - the command layer ([`FiuController`]) allows a single outstanding
//!   command, resolves it on a matching echo or after the response window,
//!   and remembers which channels have been configured
//!
//! ## Frame format
//!
//! ```text
//! +--------+-----+-------------+----------+------+
//! | header | cmd | payload[8]  | checksum | tail |
//! +--------+-----+-------------+----------+------+
//!   0x5A / 0xA5                 xor cmd+pl  0x55 / 0xAA
//! ```
//!
//! ## Features
//!
//! - `native` (default): [`SerialTransport`], port discovery and
//!   `SerialSession`, a [`Session`] over a real serial port
//! - `serde`: serialization of command parameters
//!
//! ## Example
//!
//! Against the in-memory board; a `SerialSession` is driven the same way
//! through [`CommandLink`].
//!
//! ```rust
//! use fiulink::{
//!     ChannelMask, CommandLink, ConfigParams, OutputFault, Peripheral, Request, SimulatedLink,
//!     WorkMode,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut link = SimulatedLink::new(Peripheral::new())?;
//!
//!     let params = ConfigParams::new(3, OutputFault::LoadNoFault, WorkMode::Synchronous)
//!         .with_timing(100, 200)
//!         .with_cycles(5);
//!     link.execute(&Request::SetConfig(params))?;
//!
//!     // No mask: run every channel configured so far
//!     let echoed = link.execute(&Request::Synchronous(None))?;
//!     assert_eq!(echoed[0], 0x08);
//!     link.execute(&Request::Trigger(Some(ChannelMask::from_iter([3u8]))))?;
//!     println!("tracked: {}", link.tracked_channels());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod clock;
pub mod discovery;
pub mod error;
pub mod link;
pub mod protocol;
pub mod session;
pub mod sim;
pub mod transport;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use {
    discovery::auto_detect_port, session::SerialSession, transport::native::SerialTransport,
};
pub use {
    channel::{ChannelMask, MAX_CHANNEL, clear_channel_bit, is_channel_set, set_channel_bit},
    clock::{Clock, ManualClock, SystemClock},
    discovery::{BridgeKind, DetectedPort, detect_ports, select_port},
    error::{Error, Result},
    link::{
        Abandoned, CommandLink, CommandOutcome, Completion, FiuController, FrameLayer,
        LinkConfig, LinkState, Request, completion,
    },
    protocol::{
        CommandId, ConfigParams, Direction, FRAME_LEN, Frame, OutputFault, PAYLOAD_LEN, Payload,
        WorkMode, encode_config, encode_mask,
    },
    session::Session,
    sim::{Peripheral, PeripheralFault, SimulatedLink},
    transport::{MemoryTransport, SendSource, SerialConfig, Transport},
};

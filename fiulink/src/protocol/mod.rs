//! Wire protocol: frame format and the FIU command set.

pub mod command;
pub mod frame;

// Re-export common types
pub use command::{CommandId, ConfigParams, OutputFault, WorkMode, encode_config, encode_mask};
pub use frame::{Direction, FRAME_LEN, Frame, PAYLOAD_LEN, Payload, checksum};

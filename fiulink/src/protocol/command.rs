//! FIU command set and payload encoders.
//!
//! ## SetConfig payload
//!
//! ```text
//! +------+-------+------+---------------------------------------------+
//! | ch   | fault | mode |                 bytes 3..=7                 |
//! +------+-------+------+---------------------------------------------+
//! | 6bit |  u8   |  u8  | Stop/Control: FF FF FF FF FF                |
//! |      |       |      | Synchronous:  high(le16) low(le16) cycles   |
//! |      |       |      | Triggered:    high(le16) low(le16) FF       |
//! +------+-------+------+---------------------------------------------+
//! ```
//!
//! Batch operations (SynchronousOp, TriggerOp, ControlOp) carry the 64-bit
//! channel mask little-endian across all eight payload bytes.

use {
    crate::{
        channel::{ChannelMask, MAX_CHANNEL},
        error::{Error, Result},
        protocol::frame::{PAYLOAD_LEN, Payload},
    },
    byteorder::{ByteOrder, LittleEndian},
    std::fmt,
};

/// Filler for unused SetConfig timing bytes.
pub const UNUSED_FIELD: u8 = 0xFF;

/// FIU command ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    /// Configure one channel (0x11).
    SetConfig = 0x11,
    /// Start synchronous pulse output on a channel set (0x14).
    SynchronousOp = 0x14,
    /// Fire triggered output on a channel set (0x18).
    TriggerOp = 0x18,
    /// Apply continuous control output on a channel set (0x20).
    ControlOp = 0x20,
}

impl CommandId {
    /// All command ids in wire order.
    pub const ALL: [Self; 4] = [
        Self::SetConfig,
        Self::SynchronousOp,
        Self::TriggerOp,
        Self::ControlOp,
    ];

    /// Wire byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Short human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::SetConfig => "set-config",
            Self::SynchronousOp => "synchronous-op",
            Self::TriggerOp => "trigger-op",
            Self::ControlOp => "control-op",
        }
    }
}

impl TryFrom<u8> for CommandId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_u8() == value)
            .ok_or_else(|| Error::InvalidParams(format!("unknown command id {value:#04x}")))
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), self.as_u8())
    }
}

/// Output fault configuration of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[repr(u8)]
pub enum OutputFault {
    /// No load, no fault (0x00).
    #[default]
    NoLoadNoFault = 0x00,
    /// Load connected, no fault (0x01).
    LoadNoFault = 0x01,
    /// No load, short to power (0x02).
    NoLoadShortToPower = 0x02,
    /// No load, short to ground (0x03).
    NoLoadShortToGround = 0x03,
    /// Load connected, short to power (0x04).
    LoadShortToPower = 0x04,
    /// Load connected, short to ground (0x05).
    LoadShortToGround = 0x05,
    /// CAN line short to power (0x06).
    CanShortToPower = 0x06,
    /// CAN line short to ground (0x07).
    CanShortToGround = 0x07,
    /// CAN-H shorted to CAN-L (0x08).
    CanShort = 0x08,
    /// LIN line short to power (0x09).
    LinShortToPower = 0x09,
    /// LIN line short to ground (0x0A).
    LinShortToGround = 0x0A,
}

impl OutputFault {
    /// Highest valid wire value.
    pub const MAX: u8 = Self::LinShortToGround as u8;

    /// Wire byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for OutputFault {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x00 => Self::NoLoadNoFault,
            0x01 => Self::LoadNoFault,
            0x02 => Self::NoLoadShortToPower,
            0x03 => Self::NoLoadShortToGround,
            0x04 => Self::LoadShortToPower,
            0x05 => Self::LoadShortToGround,
            0x06 => Self::CanShortToPower,
            0x07 => Self::CanShortToGround,
            0x08 => Self::CanShort,
            0x09 => Self::LinShortToPower,
            0x0A => Self::LinShortToGround,
            _ => {
                return Err(Error::InvalidParams(format!(
                    "output fault {value:#04x} out of range 0x00..={:#04x}",
                    Self::MAX
                )));
            },
        })
    }
}

/// Channel work mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[repr(u8)]
pub enum WorkMode {
    /// Output stopped (0x00).
    #[default]
    Stop = 0x00,
    /// Continuous control output (0x01).
    Control = 0x01,
    /// Synchronous pulse train (0x02).
    Synchronous = 0x02,
    /// Single triggered pulse (0x03).
    Triggered = 0x03,
}

impl WorkMode {
    /// Highest valid wire value.
    pub const MAX: u8 = Self::Triggered as u8;

    /// Wire byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for WorkMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Stop),
            0x01 => Ok(Self::Control),
            0x02 => Ok(Self::Synchronous),
            0x03 => Ok(Self::Triggered),
            _ => Err(Error::InvalidParams(format!(
                "work mode {value:#04x} out of range 0x00..={:#04x}",
                Self::MAX
            ))),
        }
    }
}

/// Parameters of a SetConfig command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct ConfigParams {
    /// Channel id, `0..=63`.
    #[cfg_attr(feature = "serde", serde(alias = "id"))]
    pub channel: u8,
    /// Output fault setting.
    #[cfg_attr(feature = "serde", serde(default))]
    pub fault: OutputFault,
    /// Work mode.
    #[cfg_attr(feature = "serde", serde(default))]
    pub mode: WorkMode,
    /// High phase duration (Synchronous and Triggered modes).
    #[cfg_attr(feature = "serde", serde(default))]
    pub high_time: u16,
    /// Low phase duration (Synchronous and Triggered modes).
    #[cfg_attr(feature = "serde", serde(default))]
    pub low_time: u16,
    /// Pulse count (Synchronous mode only).
    #[cfg_attr(feature = "serde", serde(default))]
    pub cycles: u8,
}

impl ConfigParams {
    /// Parameters for `channel` with no timing fields.
    pub fn new(channel: u8, fault: OutputFault, mode: WorkMode) -> Self {
        Self {
            channel,
            fault,
            mode,
            ..Self::default()
        }
    }

    /// Set the high/low phase durations.
    #[must_use]
    pub fn with_timing(mut self, high_time: u16, low_time: u16) -> Self {
        self.high_time = high_time;
        self.low_time = low_time;
        self
    }

    /// Set the pulse count.
    #[must_use]
    pub fn with_cycles(mut self, cycles: u8) -> Self {
        self.cycles = cycles;
        self
    }

    /// Build from raw wire values, validating every enumerated field.
    pub fn from_raw(
        channel: u8,
        fault: u8,
        mode: u8,
        high_time: u16,
        low_time: u16,
        cycles: u8,
    ) -> Result<Self> {
        let params = Self {
            channel,
            fault: OutputFault::try_from(fault)?,
            mode: WorkMode::try_from(mode)?,
            high_time,
            low_time,
            cycles,
        };
        params.validate()?;
        Ok(params)
    }

    /// Check the channel range.
    pub fn validate(&self) -> Result<()> {
        if self.channel > MAX_CHANNEL {
            return Err(Error::InvalidParams(format!(
                "channel {} out of range 0..={MAX_CHANNEL}",
                self.channel
            )));
        }
        Ok(())
    }
}

/// Encode a SetConfig payload.
///
/// The channel byte is masked to six bits; call [`ConfigParams::validate`]
/// first to reject out-of-range ids rather than alias them.
pub fn encode_config(params: &ConfigParams) -> Payload {
    let mut payload = [UNUSED_FIELD; PAYLOAD_LEN];
    payload[0] = params.channel & 0x3F;
    payload[1] = params.fault.as_u8();
    payload[2] = params.mode.as_u8();

    match params.mode {
        WorkMode::Synchronous => {
            LittleEndian::write_u16(&mut payload[3..5], params.high_time);
            LittleEndian::write_u16(&mut payload[5..7], params.low_time);
            payload[7] = params.cycles;
        },
        WorkMode::Triggered => {
            LittleEndian::write_u16(&mut payload[3..5], params.high_time);
            LittleEndian::write_u16(&mut payload[5..7], params.low_time);
        },
        WorkMode::Stop | WorkMode::Control => {},
    }

    payload
}

/// Encode a batch operation payload.
pub fn encode_mask(mask: ChannelMask) -> Payload {
    let mut payload = [0u8; PAYLOAD_LEN];
    LittleEndian::write_u64(&mut payload, mask.bits());
    payload
}

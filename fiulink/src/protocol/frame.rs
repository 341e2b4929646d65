//! Fixed-size wire frame shared by both link directions.
//!
//! ## Frame Format
//!
//! ```text
//! +--------+-----+---------------+----------+------+
//! | Header | CMD |    Payload    | Checksum | Tail |
//! +--------+-----+---------------+----------+------+
//! |   1    |  1  |       8       |    1     |  1   |
//! +--------+-----+---------------+----------+------+
//! |  0x5A  | cmd |  zero padded  | XOR sum  | 0x55 |   host -> device
//! |  0xA5  | cmd |  echo of sent | XOR sum  | 0xAA |   device -> host
//! +--------+-----+---------------+----------+------+
//! ```
//!
//! The checksum is the exclusive-or of the command id and all eight payload
//! bytes. Header and tail are excluded.

use crate::error::{Error, Result};

/// Total frame length in bytes.
pub const FRAME_LEN: usize = 12;

/// Payload length in bytes.
pub const PAYLOAD_LEN: usize = 8;

/// Header byte of host-to-device frames.
pub const HOST_HEADER: u8 = 0x5A;

/// Tail byte of host-to-device frames.
pub const HOST_TAIL: u8 = 0x55;

/// Header byte of device-to-host frames.
pub const DEVICE_HEADER: u8 = 0xA5;

/// Tail byte of device-to-host frames.
pub const DEVICE_TAIL: u8 = 0xAA;

const CMD_OFFSET: usize = 1;
const PAYLOAD_OFFSET: usize = 2;
const CHECKSUM_OFFSET: usize = 10;
const TAIL_OFFSET: usize = 11;

/// Fixed eight-byte frame payload.
pub type Payload = [u8; PAYLOAD_LEN];

/// Direction a frame travels in, selecting its sentinel bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host (controller) to peripheral.
    ToDevice,
    /// Peripheral back to host.
    ToHost,
}

impl Direction {
    /// Header sentinel for this direction.
    pub fn header(self) -> u8 {
        match self {
            Self::ToDevice => HOST_HEADER,
            Self::ToHost => DEVICE_HEADER,
        }
    }

    /// Tail sentinel for this direction.
    pub fn tail(self) -> u8 {
        match self {
            Self::ToDevice => HOST_TAIL,
            Self::ToHost => DEVICE_TAIL,
        }
    }
}

/// XOR checksum over the command id and payload.
pub fn checksum(cmd_id: u8, payload: &Payload) -> u8 {
    payload
        .iter()
        .fold(cmd_id, |sum, byte| sum ^ byte)
}

/// Zero-pad up to eight payload bytes.
pub fn pad_payload(data: &[u8]) -> Result<Payload> {
    if data.len() > PAYLOAD_LEN {
        return Err(Error::InvalidParams(format!(
            "payload is {} bytes, frame carries at most {PAYLOAD_LEN}",
            data.len()
        )));
    }
    let mut payload = [0u8; PAYLOAD_LEN];
    payload[..data.len()].copy_from_slice(data);
    Ok(payload)
}

/// A complete 12-byte frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; FRAME_LEN],
}

impl Frame {
    /// Build a frame for `direction`, zero-padding `data` to eight bytes.
    pub fn build(direction: Direction, cmd_id: u8, data: &[u8]) -> Result<Self> {
        let payload = pad_payload(data)?;
        Ok(Self::with_payload(direction, cmd_id, &payload))
    }

    /// Build a frame from an already padded payload.
    pub fn with_payload(direction: Direction, cmd_id: u8, payload: &Payload) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = direction.header();
        bytes[CMD_OFFSET] = cmd_id;
        bytes[PAYLOAD_OFFSET..CHECKSUM_OFFSET].copy_from_slice(payload);
        bytes[CHECKSUM_OFFSET] = checksum(cmd_id, payload);
        bytes[TAIL_OFFSET] = direction.tail();
        Self { bytes }
    }

    /// Wrap raw bytes without validating them.
    pub fn from_bytes(bytes: [u8; FRAME_LEN]) -> Self {
        Self { bytes }
    }

    /// Raw frame bytes.
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    /// Header byte.
    pub fn header(&self) -> u8 {
        self.bytes[0]
    }

    /// Command id byte.
    pub fn cmd_id(&self) -> u8 {
        self.bytes[CMD_OFFSET]
    }

    /// Payload bytes.
    pub fn payload(&self) -> Payload {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&self.bytes[PAYLOAD_OFFSET..CHECKSUM_OFFSET]);
        payload
    }

    /// Checksum byte as carried on the wire.
    pub fn checksum(&self) -> u8 {
        self.bytes[CHECKSUM_OFFSET]
    }

    /// Tail byte.
    pub fn tail(&self) -> u8 {
        self.bytes[TAIL_OFFSET]
    }

    /// Check the sentinels and checksum for `direction`.
    pub fn verify(&self, direction: Direction) -> Result<()> {
        if self.header() != direction.header() {
            return Err(Error::AckMismatch(format!(
                "header {:#04x}, expected {:#04x}",
                self.header(),
                direction.header()
            )));
        }
        if self.tail() != direction.tail() {
            return Err(Error::AckMismatch(format!(
                "tail {:#04x}, expected {:#04x}",
                self.tail(),
                direction.tail()
            )));
        }
        let expected = checksum(self.cmd_id(), &self.payload());
        if self.checksum() != expected {
            return Err(Error::AckMismatch(format!(
                "checksum {:#04x}, expected {expected:#04x}",
                self.checksum()
            )));
        }
        Ok(())
    }

    /// Whether this frame carries exactly `cmd_id` and `payload`.
    pub fn echoes(&self, cmd_id: u8, payload: &Payload) -> bool {
        self.cmd_id() == cmd_id && self.payload() == *payload
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: Payload = [0x03, 0x01, 0x02, 0x64, 0x00, 0xC8, 0x00, 0x05];

    #[test]
    fn test_checksum_is_running_xor() {
        let expected = SAMPLE
            .iter()
            .fold(0x11u8, |acc, b| acc ^ b);
        assert_eq!(checksum(0x11, &SAMPLE), expected);
        assert_eq!(checksum(0x00, &[0u8; PAYLOAD_LEN]), 0x00);
        assert_eq!(checksum(0x14, &[0xFF; PAYLOAD_LEN]), 0x14);
    }

    #[test]
    fn test_host_frame_layout() {
        let frame = Frame::build(Direction::ToDevice, 0x11, &SAMPLE).unwrap();
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), FRAME_LEN);
        assert_eq!(bytes[0], 0x5A);
        assert_eq!(bytes[1], 0x11);
        assert_eq!(&bytes[2..10], &SAMPLE);
        assert_eq!(bytes[10], checksum(0x11, &SAMPLE));
        assert_eq!(bytes[11], 0x55);
    }

    #[test]
    fn test_device_frame_sentinels() {
        let frame = Frame::with_payload(Direction::ToHost, 0x20, &SAMPLE);
        assert_eq!(frame.header(), 0xA5);
        assert_eq!(frame.tail(), 0xAA);
        assert!(frame.verify(Direction::ToHost).is_ok());
        assert!(frame.verify(Direction::ToDevice).is_err());
    }

    #[test]
    fn test_short_payload_is_zero_padded() {
        let frame = Frame::build(Direction::ToDevice, 0x18, &[0xAB, 0xCD]).unwrap();
        assert_eq!(frame.payload(), [0xAB, 0xCD, 0, 0, 0, 0, 0, 0]);
        assert!(frame.verify(Direction::ToDevice).is_ok());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let err = Frame::build(Direction::ToDevice, 0x11, &[0u8; 9]).unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[test]
    fn test_single_bit_flip_fails_verification() {
        let frame = Frame::with_payload(Direction::ToHost, 0x11, &SAMPLE);
        for index in 0..FRAME_LEN {
            for bit in 0..8 {
                let mut bytes = *frame.as_bytes();
                bytes[index] ^= 1 << bit;
                let corrupted = Frame::from_bytes(bytes);
                assert!(
                    corrupted.verify(Direction::ToHost).is_err(),
                    "flip of bit {bit} in byte {index} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn test_echoes() {
        let frame = Frame::with_payload(Direction::ToHost, 0x14, &SAMPLE);
        assert!(frame.echoes(0x14, &SAMPLE));
        assert!(!frame.echoes(0x18, &SAMPLE));
        let mut other = SAMPLE;
        other[7] = 0x06;
        assert!(!frame.echoes(0x14, &other));
    }
}

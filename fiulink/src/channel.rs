//! 64-bit channel sets.
//!
//! Bit `n` selects channel `n`. Ids outside `0..=63` are ignored by every
//! mutator and read back as unset.

use std::fmt;

/// Highest addressable channel id.
pub const MAX_CHANNEL: u8 = 63;

/// A set of channel ids encoded as a 64-bit mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ChannelMask(u64);

impl ChannelMask {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Wrap a raw mask.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw mask value.
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Add `channel` to the set.
    pub fn set(&mut self, channel: u8) {
        if channel <= MAX_CHANNEL {
            self.0 |= 1u64 << channel;
        }
    }

    /// Remove `channel` from the set.
    pub fn clear(&mut self, channel: u8) {
        if channel <= MAX_CHANNEL {
            self.0 &= !(1u64 << channel);
        }
    }

    /// Whether `channel` is in the set.
    pub fn is_set(self, channel: u8) -> bool {
        channel <= MAX_CHANNEL && self.0 & (1u64 << channel) != 0
    }

    /// Whether no channel is selected.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of selected channels.
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Selected channel ids in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0..=MAX_CHANNEL).filter(move |&ch| self.is_set(ch))
    }

    /// Little-endian encoding used as the batch operation payload.
    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl From<u64> for ChannelMask {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}

impl From<ChannelMask> for u64 {
    fn from(mask: ChannelMask) -> Self {
        mask.0
    }
}

impl FromIterator<u8> for ChannelMask {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut mask = Self::EMPTY;
        for channel in iter {
            mask.set(channel);
        }
        mask
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Set `channel` in `mask`; no-op outside `0..=63`.
pub fn set_channel_bit(mask: &mut ChannelMask, channel: u8) {
    mask.set(channel);
}

/// Clear `channel` in `mask`; no-op outside `0..=63`.
pub fn clear_channel_bit(mask: &mut ChannelMask, channel: u8) {
    mask.clear(channel);
}

/// Test `channel` in `mask`; `false` outside `0..=63`.
pub fn is_channel_set(mask: &ChannelMask, channel: u8) -> bool {
    mask.is_set(channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_clear_every_channel() {
        for channel in 0..=MAX_CHANNEL {
            let mut mask = ChannelMask::EMPTY;
            set_channel_bit(&mut mask, channel);
            assert!(is_channel_set(&mask, channel));
            assert_eq!(mask.bits(), 1u64 << channel);
            clear_channel_bit(&mut mask, channel);
            assert!(!is_channel_set(&mask, channel));
            assert!(mask.is_empty());
        }
    }

    #[test]
    fn test_out_of_range_is_noop() {
        let mut mask = ChannelMask::from_bits(0x8000_0000_0000_0001);
        for channel in [64u8, 65, 100, 255] {
            set_channel_bit(&mut mask, channel);
            clear_channel_bit(&mut mask, channel);
            assert!(!is_channel_set(&mask, channel));
        }
        assert_eq!(mask.bits(), 0x8000_0000_0000_0001);
    }

    #[test]
    fn test_iter_and_collect() {
        let mask: ChannelMask = [0u8, 3, 63, 70].into_iter().collect();
        assert_eq!(mask.len(), 3);
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 3, 63]);
    }

    #[test]
    fn test_le_bytes() {
        let mask = ChannelMask::from_bits(0x0102_0304_0506_0708);
        assert_eq!(
            mask.to_le_bytes(),
            [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ChannelMask::from_bits(0x9).to_string(), "0x0000000000000009");
    }
}

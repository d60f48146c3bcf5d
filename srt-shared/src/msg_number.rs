use std::fmt::Display;

/// Message number mask when the peer sets the retransmitted flag (bit 26)
pub const MSGNO_SEQ_MASK: u32 = 0x03FF_FFFF;

/// Message number mask for peers which do not use the retransmitted flag
pub const MSGNO_SEQ_OLD_MASK: u32 = 0x07FF_FFFF;

/// Position of a packet inside of a (possibly multi-packet) application message.
#[derive(Debug, PartialEq, Copy, Clone, Eq)]
pub enum PacketBoundary {
    Middle,
    Last,
    First,
    Solo,
}

impl PacketBoundary {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => Self::Middle,
            0b01 => Self::Last,
            0b10 => Self::First,
            _ => Self::Solo,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::Middle => 0b00,
            Self::Last => 0b01,
            Self::First => 0b10,
            Self::Solo => 0b11,
        }
    }

    pub fn is_first(self) -> bool {
        self.bits() & 0b10 != 0
    }

    pub fn is_last(self) -> bool {
        self.bits() & 0b01 != 0
    }
}

/// Identifies the application message a data packet belongs to.
#[derive(Debug, PartialEq, Copy, Clone, Hash, Eq)]
pub struct MsgNo(pub u32);

impl Display for MsgNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_bits() {
        assert_eq!(PacketBoundary::from_bits(0b10), PacketBoundary::First);
        assert_eq!(PacketBoundary::from_bits(0b01), PacketBoundary::Last);
        assert_eq!(PacketBoundary::from_bits(0b11), PacketBoundary::Solo);
        assert_eq!(PacketBoundary::from_bits(0b100), PacketBoundary::Middle);
    }

    #[test]
    fn test_boundary_first_last() {
        assert_eq!(PacketBoundary::Solo.is_first(), true);
        assert_eq!(PacketBoundary::Solo.is_last(), true);
        assert_eq!(PacketBoundary::First.is_last(), false);
        assert_eq!(PacketBoundary::Last.is_first(), false);
        assert_eq!(PacketBoundary::Middle.is_first(), false);
        assert_eq!(PacketBoundary::Middle.is_last(), false);
    }
}

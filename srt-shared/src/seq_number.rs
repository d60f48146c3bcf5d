use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt::Display;
use std::{cmp, ops};
use thiserror::Error;

/// Largest representable sequence number, sequence numbers occupy 31 bits
/// of the data packet header.
pub const MAX_SEQ_NO: u32 = 0x7FFF_FFFF;

/// Distances below this threshold are treated as "no wrap happened"
const SEQ_NO_THRESHOLD: i64 = 0x3FFF_FFFF;

/// Represents a wrapping 31-bit number used for tracking the order of
/// data packets transmitted over the connection.
#[derive(Debug, PartialEq, Copy, Clone, Hash, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SeqNo(u32);

#[derive(Error, Debug, PartialEq)]
pub enum SeqParseError {
    #[error("sequence number {0} exceeds the 31-bit sequence space")]
    OutOfRange(u32),
}

impl SeqNo {
    pub fn new(value: u32) -> Result<Self, SeqParseError> {
        if value > MAX_SEQ_NO {
            return Err(SeqParseError::OutOfRange(value));
        }

        Ok(Self(value))
    }

    /// Masks off the control bit, used when decoding the header word.
    pub fn from_masked(value: u32) -> Self {
        Self(value & MAX_SEQ_NO)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn inc(self) -> Self {
        if self.0 == MAX_SEQ_NO {
            Self(0)
        } else {
            Self(self.0 + 1)
        }
    }

    pub fn dec(self) -> Self {
        if self.0 == 0 {
            Self(MAX_SEQ_NO)
        } else {
            Self(self.0 - 1)
        }
    }

    /// Returns the signed number of increments required to get from `self` to `other`.
    ///
    /// A positive value means `other` is ahead of `self` in the (wrapping) sequence space.
    pub fn offset_to(self, other: SeqNo) -> i32 {
        let a = self.0 as i64;
        let b = other.0 as i64;

        let off = if (a - b).abs() < SEQ_NO_THRESHOLD {
            b - a
        } else if a < b {
            b - a - MAX_SEQ_NO as i64 - 1
        } else {
            b - a + MAX_SEQ_NO as i64 + 1
        };

        off as i32
    }

    /// Compares two sequence numbers, considering the potential to wrap.
    /// The sign of the result follows `self - other`.
    pub fn cmp_wrapping(self, other: SeqNo) -> i64 {
        let a = self.0 as i64;
        let b = other.0 as i64;

        if (a - b).abs() < SEQ_NO_THRESHOLD {
            a - b
        } else {
            b - a
        }
    }
}

impl TryFrom<u32> for SeqNo {
    type Error = SeqParseError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SeqNo> for u32 {
    fn from(seq: SeqNo) -> u32 {
        seq.0
    }
}

/// Sequence numbers will wrap after exceeding the 31-bit space
impl ops::Add<u32> for SeqNo {
    type Output = Self;

    fn add(self, rhs: u32) -> Self {
        let inc = rhs % (MAX_SEQ_NO + 1);

        if MAX_SEQ_NO - self.0 >= inc {
            Self(self.0 + inc)
        } else {
            Self(self.0 - (MAX_SEQ_NO - inc) - 1)
        }
    }
}

impl ops::Sub<u32> for SeqNo {
    type Output = Self;

    fn sub(self, rhs: u32) -> Self {
        let dec = rhs % (MAX_SEQ_NO + 1);

        if self.0 >= dec {
            Self(self.0 - dec)
        } else {
            Self(self.0 + MAX_SEQ_NO - dec + 1)
        }
    }
}

/// For two sequence numbers A and B, A is greater than B if it is less than half
/// of the sequence space ahead of B, wrapping included:
///  - Seq(2) > Seq(1)
///  - Seq(0) > Seq(MAX_SEQ_NO)
impl cmp::PartialOrd for SeqNo {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp_wrapping(*other).cmp(&0))
    }
}

impl Display for SeqNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

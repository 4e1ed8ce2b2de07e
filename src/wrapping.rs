use std::fmt::Display;
use std::ops;

const MOD: u64 = 1 << 32;

/// A 32-bit wire sequence number as carried in a segment header.
/// This value wraps back to 0 after exceeding u32::MAX.
#[derive(Debug, PartialEq, Copy, Clone, Hash, Eq, Default)]
pub struct SequenceNumber(pub u32);

impl SequenceNumber {
    pub fn raw_value(self) -> u32 {
        self.0
    }

    /// Converts an absolute sequence number (SYN = 0) into its wire representation.
    pub fn wrap(absolute: u64, isn: SequenceNumber) -> Self {
        Self((absolute as u32).wrapping_add(isn.0))
    }

    /// Converts a wire sequence number back into the absolute sequence number
    /// which is closest to `checkpoint`.
    pub fn unwrap(self, isn: SequenceNumber, checkpoint: u64) -> u64 {
        unwrap(self, isn, checkpoint)
    }
}

/// Sequence numbers will wrap after exceeding 32-bit space
impl ops::Add<u32> for SequenceNumber {
    type Output = Self;

    fn add(self, rhs: u32) -> Self {
        Self(self.0.wrapping_add(rhs))
    }
}

/// The signed distance between two wire sequence numbers.
impl ops::Sub<SequenceNumber> for SequenceNumber {
    type Output = i32;

    fn sub(self, rhs: Self) -> i32 {
        self.0.wrapping_sub(rhs.0) as i32
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

pub fn wrap(absolute: u64, isn: SequenceNumber) -> SequenceNumber {
    SequenceNumber::wrap(absolute, isn)
}

/// Every absolute value `base + k * 2^32` wraps to the same wire value.
/// We pick the two candidates bracketing the checkpoint and return the nearer one,
/// the smaller one when both are equally distant.
pub fn unwrap(n: SequenceNumber, isn: SequenceNumber, checkpoint: u64) -> u64 {
    let base = n.0.wrapping_sub(isn.0) as u64;

    if checkpoint <= base {
        return base;
    }

    let lower = base + ((checkpoint - base) / MOD) * MOD;
    let upper = match lower.checked_add(MOD) {
        Some(upper) => upper,
        None => return lower,
    };

    if checkpoint - lower <= upper - checkpoint {
        lower
    } else {
        upper
    }
}

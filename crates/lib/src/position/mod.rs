//! Fractional ordering keys for list children.
//!
//! A [`Position`] is a non-empty string over the printable ASCII range
//! `' '..='~'`, read as a base-95 fraction in `(0, 1)`: `' '` is digit 0 and
//! `'~'` is digit 94. Lexicographic byte order of positions equals numeric
//! order of the fractions, so a list is simply its children sorted by
//! position. Positions never end in the zero digit, which keeps the key space
//! dense: there is always a position strictly between any two.
//!
//! # Collision avoidance
//!
//! Two clients inserting "at the same place" compute the same midpoint. To keep
//! them apart, generated positions may carry a [`PositionSeed`] suffix that
//! encodes the connection id and a per-connection position clock. Appending the
//! suffix keeps the key strictly between its neighbors (the midpoint is first
//! extended until it is no longer a prefix of the upper bound), and the final
//! order of two concurrent inserts is decided by comparing their suffixes.
//!
//! ```
//! use canopy::position::Position;
//!
//! let a = Position::first();
//! let c = Position::after(&a);
//! let b = Position::between(&a, &c);
//! assert!(a < b && b < c);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Smallest byte allowed in a position (digit 0).
pub const MIN_CHAR: u8 = b' ';
/// Largest byte allowed in a position (digit 94).
pub const MAX_CHAR: u8 = b'~';
/// Number of digits in the alphabet.
const BASE: u8 = MAX_CHAR - MIN_CHAR + 1;
/// Seed digits avoid the zero digit so a seeded key never ends in `' '`.
const SEED_BASE: u64 = (BASE - 1) as u64;

/// An immutable, totally ordered list position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Position(String);

/// Error returned when a string is not a valid position.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid position {value:?}: {reason}")]
pub struct InvalidPosition {
    pub value: String,
    pub reason: &'static str,
}

impl Position {
    /// Parses and validates a position received from the wire.
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidPosition> {
        let value = value.into();
        if value.is_empty() {
            return Err(InvalidPosition {
                value,
                reason: "empty",
            });
        }
        if value.bytes().any(|b| !(MIN_CHAR..=MAX_CHAR).contains(&b)) {
            return Err(InvalidPosition {
                value,
                reason: "contains characters outside ' '..='~'",
            });
        }
        if value.ends_with(MIN_CHAR as char) {
            return Err(InvalidPosition {
                value,
                reason: "ends with the zero digit",
            });
        }
        Ok(Self(value))
    }

    /// The position given to the first child of an empty list.
    pub fn first() -> Self {
        Self::from_digits(vec![1])
    }

    /// Returns a position strictly after `pos`.
    ///
    /// Bumps the leading digit where possible so that repeated appends stay
    /// one character long for the first 93 items.
    pub fn after(pos: &Position) -> Self {
        let digits = pos.digits();
        if digits[0] < BASE - 1 {
            Self::from_digits(vec![digits[0] + 1])
        } else {
            let mut digits = digits;
            digits.push(1);
            Self::from_digits(digits)
        }
    }

    /// Returns a position strictly before `pos`.
    pub fn before(pos: &Position) -> Self {
        let digits = pos.digits();
        if digits[0] >= 2 {
            Self::from_digits(vec![digits[0] - 1])
        } else {
            Self::from_digits(midpoint(&[], Some(&digits)))
        }
    }

    /// Returns a position strictly between `lo` and `hi`.
    ///
    /// `lo` must sort before `hi`; otherwise a position after `lo` is returned.
    pub fn between(lo: &Position, hi: &Position) -> Self {
        debug_assert!(lo < hi, "between() called with unordered bounds");
        if lo >= hi {
            return Self::after(lo);
        }
        Self::from_digits(midpoint(&lo.digits(), Some(&hi.digits())))
    }

    /// Returns a position between two optional neighbors.
    ///
    /// `None` means an open end of the list.
    pub fn make(lo: Option<&Position>, hi: Option<&Position>) -> Self {
        match (lo, hi) {
            (None, None) => Self::first(),
            (Some(lo), None) => Self::after(lo),
            (None, Some(hi)) => Self::before(hi),
            (Some(lo), Some(hi)) => Self::between(lo, hi),
        }
    }

    /// Like [`Position::make`], then appends the seed suffix.
    ///
    /// The result is still strictly between `lo` and `hi`.
    pub fn make_seeded(lo: Option<&Position>, hi: Option<&Position>, seed: &PositionSeed) -> Self {
        let mut digits = Self::make(lo, hi).digits();
        if let Some(hi) = hi {
            let hi = hi.digits();
            // Any extension of a proper prefix of `hi` could overshoot it
            while hi.starts_with(&digits) {
                digits = midpoint(&digits, Some(&hi));
            }
        }
        digits.extend_from_slice(&seed.digits);
        Self::from_digits(digits)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digits(&self) -> Vec<u8> {
        self.0.bytes().map(|b| b - MIN_CHAR).collect()
    }

    fn from_digits(digits: Vec<u8>) -> Self {
        debug_assert!(!digits.is_empty() && digits.last() != Some(&0));
        Self(digits.into_iter().map(|d| (d + MIN_CHAR) as char).collect())
    }
}

/// Computes a digit string strictly between `lo` and `hi` (`None` = 1.0).
///
/// Both inputs are free of trailing zero digits and `lo < hi`; the result is
/// too.
fn midpoint(lo: &[u8], hi: Option<&[u8]>) -> Vec<u8> {
    let hi = hi.filter(|h| !h.is_empty());
    if let Some(hi) = hi {
        let common = hi
            .iter()
            .enumerate()
            .take_while(|(i, d)| lo.get(*i).copied().unwrap_or(0) == **d)
            .count();
        if common > 0 {
            let mut out = hi[..common].to_vec();
            let lo_rest = lo.get(common..).unwrap_or(&[]);
            out.extend(midpoint(lo_rest, Some(&hi[common..])));
            return out;
        }
    }

    let lo_digit = lo.first().copied().unwrap_or(0);
    let hi_digit = hi.map(|h| h[0]).unwrap_or(BASE);
    if hi_digit - lo_digit > 1 {
        return vec![(lo_digit + hi_digit) / 2];
    }

    // Consecutive leading digits
    match hi {
        Some(hi) if hi.len() > 1 => vec![hi[0]],
        _ => {
            let mut out = vec![lo_digit];
            out.extend(midpoint(lo.get(1..).unwrap_or(&[]), None));
            out
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Position {
    type Error = InvalidPosition;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for Position {
    type Error = InvalidPosition;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Position> for String {
    fn from(pos: Position) -> Self {
        pos.0
    }
}

/// Unique suffix appended to generated positions.
///
/// Encodes `(connection, clock)` with a length digit so that distinct pairs
/// always produce distinct suffixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSeed {
    digits: Vec<u8>,
}

impl PositionSeed {
    pub fn new(connection: u32, clock: u64) -> Self {
        let connection_digits = encode_seed_number(connection as u64);
        let mut digits = Vec::with_capacity(connection_digits.len() + 4);
        digits.push(connection_digits.len() as u8);
        digits.extend(connection_digits);
        digits.extend(encode_seed_number(clock));
        Self { digits }
    }
}

/// Big-endian base-94 encoding using digits 1..=94.
fn encode_seed_number(mut n: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        out.push((n % SEED_BASE) as u8 + 1);
        n /= SEED_BASE;
        if n == 0 {
            break;
        }
    }
    out.reverse();
    out
}

//! Time-ordered 128-bit identifiers.
//!
//! Layout: 48-bit unix millisecond timestamp followed by an 80-bit tail. Ids sort by
//! creation time, so maps keyed by `Id` iterate in insertion order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

const TAIL_BITS: u32 = 80;
const TAIL_MASK: u128 = (1u128 << TAIL_BITS) - 1;
/// Fresh tails keep the top bit clear so same-millisecond increments never spill into
/// the timestamp.
const FRESH_TAIL_MASK: u128 = TAIL_MASK >> 1;

/// Identifier parse errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("invalid id length: expected 16 bytes, got {0}")]
    InvalidLength(usize),
    #[error("invalid id encoding: {0}")]
    InvalidEncoding(String),
}

/// A 16-byte, time-ordered identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(Uuid);

impl Id {
    /// Generate an id from the process-wide monotonic generator.
    pub fn new() -> Self {
        global().next()
    }

    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn from_parts(timestamp_ms: u64, tail: u128) -> Self {
        let ts = (timestamp_ms as u128) & ((1u128 << 48) - 1);
        Self(Uuid::from_u128((ts << TAIL_BITS) | (tail & TAIL_MASK)))
    }

    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdError> {
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| IdError::InvalidLength(bytes.len()))?;
        Ok(Self(Uuid::from_bytes(arr)))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn timestamp_ms(&self) -> u64 {
        (self.as_u128() >> TAIL_BITS) as u64
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn parse(s: &str) -> Result<Self, IdError> {
        s.parse()
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let hex_len = trimmed.chars().filter(|c| *c != '-').count();
        if hex_len != 32 {
            return Err(IdError::InvalidLength(hex_len / 2));
        }
        Uuid::parse_str(trimmed)
            .map(Self)
            .map_err(|e| IdError::InvalidEncoding(e.to_string()))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0.hyphenated())
    }
}

impl From<Uuid> for Id {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<Id> for Uuid {
    fn from(value: Id) -> Self {
        value.0
    }
}

/// Clock used by the generator; swappable for deterministic tests.
pub type Clock = fn() -> u64;

fn system_clock() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn random_tail() -> u128 {
    Uuid::new_v4().as_u128() & FRESH_TAIL_MASK
}

/// Strictly increasing id source, safe to share between threads.
pub struct IdGenerator {
    last: Mutex<u128>,
    clock: Clock,
    tail_source: fn() -> u128,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(0),
            clock: system_clock,
            tail_source: random_tail,
        }
    }

    /// Deterministic generator: fixed clock and zero fresh tails.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            last: Mutex::new(0),
            clock,
            tail_source: || 0,
        }
    }

    pub fn next(&self) -> Id {
        let now = (self.clock)();
        let candidate = Id::from_parts(now, (self.tail_source)()).as_u128();
        // A poisoned lock still holds a valid last value.
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let value = if candidate > *last { candidate } else { *last + 1 };
        *last = value;
        Id::from_u128(value)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn global() -> &'static IdGenerator {
    static GLOBAL: once_cell::sync::Lazy<IdGenerator> = once_cell::sync::Lazy::new(IdGenerator::new);
    &GLOBAL
}

//! Snowflake identifiers for users, rooms and messages.
//!
//! Snowflake IDs are 64-bit integers with embedded timestamp information,
//! allowing for time-sortable, globally unique identifiers without coordination.
//!
//! ## Structure
//!
//! ```text
//! 64                         22          17          12          0
//! +---------------------------+-----------+-----------+-----------+
//! |         timestamp         |  worker   |  process  |  sequence |
//! |          (42 bits)        |  (5 bits) |  (5 bits) |  (12 bits)|
//! +---------------------------+-----------+-----------+-----------+
//! ```
//!
//! On the wire a snowflake is always a decimal string, since JavaScript clients
//! cannot represent the full 64-bit range as a number. Inbound payloads may use
//! either form.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Default epoch: 2015-01-01T00:00:00Z in milliseconds
pub const DEFAULT_EPOCH: u64 = 1420070400000;

/// A snowflake identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, sqlx::Type)]
#[sqlx(transparent)]
pub struct Snowflake(pub i64);

impl Snowflake {
    /// Create a new Snowflake from raw value.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Create a Snowflake from its components.
    pub fn from_parts(timestamp_ms: u64, epoch: u64, worker_id: u8, process_id: u8, sequence: u16) -> Self {
        let ts = timestamp_ms.saturating_sub(epoch) << 22;
        let worker = ((worker_id as u64) & 0x1F) << 17;
        let process = ((process_id as u64) & 0x1F) << 12;
        let seq = (sequence as u64) & 0xFFF;

        Self((ts | worker | process | seq) as i64)
    }

    /// Milliseconds since the unix epoch, given the epoch the id was minted with.
    pub fn timestamp(&self, epoch: u64) -> u64 {
        ((self.0 as u64) >> 22) + epoch
    }

    /// Creation time assuming the default epoch.
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp(DEFAULT_EPOCH) as i64)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Get the raw i64 value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

impl From<i64> for Snowflake {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Snowflake> for i64 {
    fn from(snowflake: Snowflake) -> Self {
        snowflake.0
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SnowflakeVisitor;

        impl Visitor<'_> for SnowflakeVisitor {
            type Value = Snowflake;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a snowflake id as a string or integer")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(Snowflake(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                i64::try_from(v)
                    .map(Snowflake)
                    .map_err(|_| E::custom("snowflake out of range"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(|_| E::custom(format!("invalid snowflake: {v}")))
            }
        }

        deserializer.deserialize_any(SnowflakeVisitor)
    }
}

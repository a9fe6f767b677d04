//! Traffic split between the stable and canary variants

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Percentage division of live traffic. Always sums to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSplit", into = "RawSplit")]
pub struct TrafficSplit {
    stable: u8,
    canary: u8,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrafficSplitError {
    #[error("canary percentage {0} exceeds 100")]
    OutOfRange(u8),

    #[error("stable {stable}% + canary {canary}% != 100%")]
    BadSum { stable: u8, canary: u8 },
}

impl TrafficSplit {
    /// All traffic on the stable variant.
    pub const ALL_STABLE: Self = Self {
        stable: 100,
        canary: 0,
    };

    /// All traffic on the canary variant.
    pub const ALL_CANARY: Self = Self {
        stable: 0,
        canary: 100,
    };

    /// Split sending `canary` percent to the canary variant.
    pub fn canary(canary: u8) -> Result<Self, TrafficSplitError> {
        if canary > 100 {
            return Err(TrafficSplitError::OutOfRange(canary));
        }
        Ok(Self {
            stable: 100 - canary,
            canary,
        })
    }

    /// Split from both halves, rejecting pairs that don't sum to 100.
    pub fn from_parts(stable: u8, canary: u8) -> Result<Self, TrafficSplitError> {
        if u16::from(stable) + u16::from(canary) != 100 {
            return Err(TrafficSplitError::BadSum { stable, canary });
        }
        Ok(Self { stable, canary })
    }

    pub fn stable_percent(&self) -> u8 {
        self.stable
    }

    pub fn canary_percent(&self) -> u8 {
        self.canary
    }

    /// Whether `other` is within `tolerance` percentage points of this split.
    pub fn within(&self, other: &TrafficSplit, tolerance: u8) -> bool {
        self.canary.abs_diff(other.canary) <= tolerance
    }
}

impl Default for TrafficSplit {
    fn default() -> Self {
        Self::ALL_STABLE
    }
}

impl fmt::Display for TrafficSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stable {}% / canary {}%", self.stable, self.canary)
    }
}

#[derive(Serialize, Deserialize)]
struct RawSplit {
    stable: u8,
    canary: u8,
}

impl TryFrom<RawSplit> for TrafficSplit {
    type Error = TrafficSplitError;

    fn try_from(raw: RawSplit) -> Result<Self, Self::Error> {
        TrafficSplit::from_parts(raw.stable, raw.canary)
    }
}

impl From<TrafficSplit> for RawSplit {
    fn from(split: TrafficSplit) -> Self {
        RawSplit {
            stable: split.stable,
            canary: split.canary,
        }
    }
}

//! Wire-level options shared by configuration and the codec.

use serde::{Deserialize, Serialize};

/// Encoding of batched series frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// `;`-separated decimal values.
    #[default]
    Text,
    /// f32 min/max header followed by raw 16-bit words.
    Binary,
}

/// Decimal places used for floating-point values in text frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 2 decimals.
    #[default]
    Standard,
    /// 6 decimals, for callers that need more than a plot's worth.
    High,
}

impl Precision {
    pub fn decimals(self) -> usize {
        match self {
            Precision::Standard => 2,
            Precision::High => 6,
        }
    }
}

//! Runtime configuration.
//!
//! Configuration is plain data shared by every crate of the workspace. It is
//! read from a JSON document (camelCase keys, every field optional) so the
//! same file works for the Linux binary and for tests:
//!
//! ```json
//! {
//!   "link": { "controlPort": 47268, "maxPacketBytes": 1400 },
//!   "acquisition": { "decimation": 4, "sampleRateHz": 2000 },
//!   "clock": "wall"
//! }
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::clock::ClockKind;
use crate::wire::{Format, Precision};

/// Default UDP port the device listens on for CONNECT/DISCONNECT.
pub const DEFAULT_CONTROL_PORT: u16 = 47268;

/// Errors that can occur while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    ReadError(String),
    /// The document is not valid configuration JSON.
    InvalidData(String),
    /// A value is out of its allowed range.
    OutOfRange(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(msg) => write!(f, "Read error: {}", msg),
            ConfigError::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            ConfigError::OutOfRange(msg) => write!(f, "Out of range: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetryConfig {
    pub link: LinkConfig,
    pub acquisition: AcquisitionConfig,
    pub clock: ClockKind,
}

impl TelemetryConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidData(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link.control_port == 0 {
            return Err(ConfigError::OutOfRange("link.controlPort must be 1..=65535".into()));
        }
        if self.link.max_points_per_packet == 0 {
            return Err(ConfigError::OutOfRange(
                "link.maxPointsPerPacket must be at least 1".into(),
            ));
        }
        if self.link.max_packet_bytes < MIN_PACKET_BYTES {
            return Err(ConfigError::OutOfRange(format!(
                "link.maxPacketBytes must be at least {}",
                MIN_PACKET_BYTES
            )));
        }
        if self.link.serial_queue_frames == 0 {
            return Err(ConfigError::OutOfRange(
                "link.serialQueueFrames must be at least 1".into(),
            ));
        }
        if self.link.rebind_interval_ms == 0 {
            return Err(ConfigError::OutOfRange(
                "link.rebindIntervalMs must be positive".into(),
            ));
        }
        if self.acquisition.buffer_capacity == 0 {
            return Err(ConfigError::OutOfRange(
                "acquisition.bufferCapacity must be at least 1".into(),
            ));
        }
        if self.acquisition.decimation == 0 {
            return Err(ConfigError::OutOfRange(
                "acquisition.decimation must be at least 1".into(),
            ));
        }
        if self.acquisition.sample_rate_hz == 0 || self.acquisition.batch_size == 0 {
            return Err(ConfigError::OutOfRange(
                "acquisition.sampleRateHz and acquisition.batchSize must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Smallest packet limit accepted by validation.
pub const MIN_PACKET_BYTES: usize = 64;

/// Datagram link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkConfig {
    /// UDP port the control listener binds.
    pub control_port: u16,

    /// Local address the control listener binds.
    pub bind_addr: IpAddr,

    /// Address announced in CONNECT/DISCONNECT acknowledgements.
    /// When unset the address the OS routes toward the peer is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_addr: Option<IpAddr>,

    /// Interval between attempts to bind the control listener.
    pub rebind_interval_ms: u64,

    /// Upper bound of samples carried by one series frame.
    pub max_points_per_packet: usize,

    /// Upper bound of the serialized size of one frame.
    pub max_packet_bytes: usize,

    /// Encoding used by `push_series`.
    pub series_format: Format,

    /// Decimal places for float values in text frames.
    pub precision: Precision,

    /// Frames queued for the serial writer before new ones are dropped.
    pub serial_queue_frames: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            control_port: DEFAULT_CONTROL_PORT,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise_addr: None,
            rebind_interval_ms: 2_000,
            max_points_per_packet: 200,
            max_packet_bytes: 1_400,
            series_format: Format::Text,
            precision: Precision::Standard,
            serial_queue_frames: 64,
        }
    }
}

/// Sample acquisition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AcquisitionConfig {
    /// Ring capacity in samples.
    pub buffer_capacity: usize,

    /// Raw samples averaged into one buffered sample.
    pub decimation: u32,

    /// Maximum raw reads per producer cycle.
    pub burst: usize,

    /// Producer cycle period.
    pub poll_interval_ms: u64,

    /// Raw sample rate of the source.
    pub sample_rate_hz: u32,

    /// Samples the consumer pulls per forwarded batch.
    pub batch_size: usize,

    /// Hardware channel of the source.
    pub channel: u8,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 8_192,
            decimation: 1,
            burst: 256,
            poll_interval_ms: 10,
            sample_rate_hz: 1_000,
            batch_size: 256,
            channel: 0,
        }
    }
}

impl AcquisitionConfig {
    /// Period between two buffered samples after decimation, in milliseconds.
    ///
    /// Rounded to the nearest millisecond, never below 1.
    pub fn step_ms(&self) -> u32 {
        let period = f64::from(self.decimation.max(1)) * 1_000.0
            / f64::from(self.sample_rate_hz.max(1));
        (period.round() as u32).max(1)
    }
}

//! Telemetry frame types.
//!
//! Frames are line-oriented ASCII (except the binary series body) and are
//! understood by Teleplot-style plotters:
//!
//! ```text
//! scalar        >name:ts_ms:value[§unit]|g\r\n
//! text series   >name:ts0;step_ms;v1;v2;...;vn[§unit]|g\r\n
//! binary series >name:ts0;step_ms;<f32 min><f32 max><i16 × n>[§unit]|g\r\n
//! log line      >:ts_ms:message\r\n
//! ```
//!
//! Series frames carry one base timestamp and a fixed step; the receiver
//! rebuilds each sample's timestamp as `ts0 + i * step_ms`.

use plotlink_core::{Format, Sample};

/// Start of every telemetry frame.
pub const FRAME_START: u8 = b'>';

/// Trailer of scalar and series frames.
pub const FRAME_FOOTER: &[u8] = b"|g\r\n";

/// Separator between the value list and the unit.
pub const UNIT_MARKER: &str = "§";

/// Line terminator of log and text lines.
pub const NEWLINE: &str = "\r\n";

/// A scalar or series frame ready to be encoded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame<'a, T: Sample> {
    /// Variable name. Must not be empty (an empty name denotes a log line).
    pub name: &'a str,
    /// Timestamp of the first value.
    pub timestamp_ms: u64,
    /// Step between consecutive values. `None` marks a scalar frame.
    pub step_ms: Option<u32>,
    pub values: &'a [T],
    pub unit: Option<&'a str>,
    pub format: Format,
}

impl<'a, T: Sample> TelemetryFrame<'a, T> {
    /// Single value at `timestamp_ms`.
    pub fn scalar(name: &'a str, timestamp_ms: u64, value: &'a T) -> Self {
        Self {
            name,
            timestamp_ms,
            step_ms: None,
            values: std::slice::from_ref(value),
            unit: None,
            format: Format::Text,
        }
    }

    /// Evenly spaced values starting at `timestamp_ms`.
    pub fn series(name: &'a str, timestamp_ms: u64, step_ms: u32, values: &'a [T]) -> Self {
        Self {
            name,
            timestamp_ms,
            step_ms: Some(step_ms),
            values,
            unit: None,
            format: Format::Text,
        }
    }

    pub fn with_unit(mut self, unit: Option<&'a str>) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }
}

/// A free-form log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLine<'a> {
    pub timestamp_ms: u64,
    pub message: &'a str,
}

/// A frame parsed back from its wire form.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Scalar {
        name: String,
        timestamp_ms: u64,
        value: f64,
        unit: Option<String>,
    },
    Series {
        name: String,
        base_timestamp_ms: u64,
        step_ms: u32,
        values: Vec<f64>,
        unit: Option<String>,
    },
    BinarySeries {
        name: String,
        base_timestamp_ms: u64,
        step_ms: u32,
        /// `(min, max)` header; absent for a frame without values.
        range: Option<(f32, f32)>,
        /// 16-bit words as sent. See [`DecodedFrame::values`] for how they
        /// are read back.
        raw: Vec<u16>,
        unit: Option<String>,
    },
    Log {
        timestamp_ms: u64,
        message: String,
    },
}

impl DecodedFrame {
    /// Variable name (empty for log lines).
    pub fn name(&self) -> &str {
        match self {
            DecodedFrame::Scalar { name, .. }
            | DecodedFrame::Series { name, .. }
            | DecodedFrame::BinarySeries { name, .. } => name,
            DecodedFrame::Log { .. } => "",
        }
    }

    /// Timestamp of every value carried by the frame.
    pub fn timestamps(&self) -> Vec<u64> {
        match self {
            DecodedFrame::Scalar { timestamp_ms, .. } => vec![*timestamp_ms],
            DecodedFrame::Series {
                base_timestamp_ms,
                step_ms,
                values,
                ..
            } => series_timestamps(*base_timestamp_ms, *step_ms, values.len()),
            DecodedFrame::BinarySeries {
                base_timestamp_ms,
                step_ms,
                raw,
                ..
            } => series_timestamps(*base_timestamp_ms, *step_ms, raw.len()),
            DecodedFrame::Log { .. } => Vec::new(),
        }
    }

    /// Values carried by the frame as `f64`.
    ///
    /// Binary words are read as unsigned when the header range is
    /// non-negative and exceeds `i16::MAX`, and as signed otherwise.
    pub fn values(&self) -> Vec<f64> {
        match self {
            DecodedFrame::Scalar { value, .. } => vec![*value],
            DecodedFrame::Series { values, .. } => values.clone(),
            DecodedFrame::BinarySeries { range, raw, .. } => {
                let unsigned = range
                    .is_some_and(|(min, max)| min >= 0.0 && max > f32::from(i16::MAX));
                raw.iter()
                    .map(|&w| if unsigned { f64::from(w) } else { f64::from(w as i16) })
                    .collect()
            }
            DecodedFrame::Log { .. } => Vec::new(),
        }
    }
}

fn series_timestamps(base: u64, step: u32, count: usize) -> Vec<u64> {
    (0..count as u64).map(|i| base + i * u64::from(step)).collect()
}

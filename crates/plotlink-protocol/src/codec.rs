//! Telemetry frame codec.
//!
//! [`Encoder`] is the single entry point for producing frames; the series
//! encoding is picked by the frame's [`Format`]. The decode functions are
//! the receiving side and are used to verify what goes on the wire.

use std::io::Write as _;

use plotlink_core::{Format, Precision, Sample};
use thiserror::Error;

use crate::frame::{
    DecodedFrame, LogLine, TelemetryFrame, FRAME_FOOTER, FRAME_START, NEWLINE, UNIT_MARKER,
};

/// Timestamps below this value are not taken as milliseconds.
///
/// Older firmware passed RTOS tick counts instead of milliseconds, so
/// anything this small is replaced by the current clock. This is a wart of
/// the format kept for those callers.
pub const PLAUSIBLE_TIMESTAMP_MS: u64 = 100_000;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Variable names cannot be empty or contain framing characters.
    #[error("Invalid variable name: {0:?}")]
    InvalidName(String),

    /// A scalar frame carries exactly one value.
    #[error("Scalar frame needs exactly one value, got {0}")]
    ScalarArity(usize),

    /// Binary encoding is only defined for series.
    #[error("Binary format requires a series frame")]
    BinaryScalar,

    /// The input does not start with '>'.
    #[error("Not a telemetry frame")]
    NotTelemetry,

    /// The frame does not end with the expected trailer.
    #[error("Missing frame trailer")]
    MissingFooter,

    /// A required field is absent or empty.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// A numeric field did not parse.
    #[error("Invalid number in {field}: {text:?}")]
    InvalidNumber { field: &'static str, text: String },

    /// Binary payload length is not `8 + 2 × n`.
    #[error("Truncated binary payload of {0} bytes")]
    Truncated(usize),

    /// The expected unit suffix was not found.
    #[error("Expected unit {0:?}")]
    MissingUnit(String),

    /// Text frames must be UTF-8.
    #[error("Frame is not valid UTF-8")]
    NotUtf8,
}

/// Replace an implausible timestamp with `now_ms`.
pub fn plausible_timestamp(timestamp_ms: u64, now_ms: u64) -> u64 {
    if timestamp_ms < PLAUSIBLE_TIMESTAMP_MS {
        now_ms
    } else {
        timestamp_ms
    }
}

/// Check that a variable name can be framed.
pub fn validate_name(name: &str) -> Result<(), CodecError> {
    let bad = |c: char| matches!(c, ':' | ';' | '|' | '\r' | '\n');
    if name.is_empty() || name.contains(bad) || name.contains(UNIT_MARKER) {
        return Err(CodecError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Bytes taken by the unit suffix (`§unit`), zero when no unit is set.
pub fn unit_len(unit: Option<&str>) -> usize {
    match unit {
        Some(u) if !u.is_empty() => UNIT_MARKER.len() + u.len(),
        _ => 0,
    }
}

/// Frame encoder.
///
/// The encoder is stateless apart from its float precision; chunking and
/// timestamp bookkeeping live in [`crate::PacketChunker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Encoder {
    precision: Precision,
}

impl Encoder {
    pub fn new(precision: Precision) -> Self {
        Self { precision }
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Encode a scalar or series frame, appending to `out`.
    pub fn encode<T: Sample>(
        &self,
        frame: &TelemetryFrame<'_, T>,
        out: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        validate_name(frame.name)?;

        match (frame.step_ms, frame.format) {
            (None, Format::Binary) => return Err(CodecError::BinaryScalar),
            (None, Format::Text) => {
                if frame.values.len() != 1 {
                    return Err(CodecError::ScalarArity(frame.values.len()));
                }
                let _ = write!(out, ">{}:{}:", frame.name, frame.timestamp_ms);
                self.write_text_values(frame.values, out);
            }
            (Some(step_ms), format) => {
                self.write_series_header(frame.name, frame.timestamp_ms, step_ms, out);
                match format {
                    Format::Text => self.write_text_values(frame.values, out),
                    Format::Binary => self.write_binary_values(frame.values, out),
                }
            }
        }

        self.write_trailer(frame.unit, out);
        Ok(())
    }

    /// Encode a frame into a fresh buffer.
    pub fn to_bytes<T: Sample>(&self, frame: &TelemetryFrame<'_, T>) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(64 + frame.values.len() * 8);
        self.encode(frame, &mut out)?;
        Ok(out)
    }

    /// Encode a log line (`>:ts:message\r\n`).
    pub fn encode_log(&self, line: &LogLine<'_>, out: &mut Vec<u8>) {
        let _ = write!(out, ">:{}:{}{}", line.timestamp_ms, line.message, NEWLINE);
    }

    /// `>name:ts;step;`
    pub fn write_series_header(&self, name: &str, timestamp_ms: u64, step_ms: u32, out: &mut Vec<u8>) {
        let _ = write!(out, ">{}:{};{};", name, timestamp_ms, step_ms);
    }

    /// `v1;v2;...;vn`
    pub fn write_text_values<T: Sample>(&self, values: &[T], out: &mut Vec<u8>) {
        let mut text = String::with_capacity(values.len() * 8);
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                text.push(';');
            }
            value.write_text(&mut text, self.precision.decimals());
        }
        out.extend_from_slice(text.as_bytes());
    }

    /// `<f32 min><f32 max><word × n>`, little-endian. Nothing for an empty slice.
    pub fn write_binary_values<T: Sample>(&self, values: &[T], out: &mut Vec<u8>) {
        let Some((min, max)) = min_max(values) else {
            return;
        };
        out.extend_from_slice(&min.to_le_bytes());
        out.extend_from_slice(&max.to_le_bytes());
        out.reserve(values.len() * 2);
        for value in values {
            out.extend_from_slice(&value.to_wire());
        }
    }

    /// `[§unit]|g\r\n`
    pub fn write_trailer(&self, unit: Option<&str>, out: &mut Vec<u8>) {
        if let Some(unit) = unit.filter(|u| !u.is_empty()) {
            out.extend_from_slice(UNIT_MARKER.as_bytes());
            out.extend_from_slice(unit.as_bytes());
        }
        out.extend_from_slice(FRAME_FOOTER);
    }
}

fn min_max<T: Sample>(values: &[T]) -> Option<(f32, f32)> {
    let first = values.first()?.to_f64();
    let (min, max) = values
        .iter()
        .map(|v| v.to_f64())
        .fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
    Some((min as f32, max as f32))
}

fn parse_u64(field: &'static str, text: &str) -> Result<u64, CodecError> {
    text.trim().parse().map_err(|_| CodecError::InvalidNumber {
        field,
        text: text.to_string(),
    })
}

fn parse_u32(field: &'static str, text: &str) -> Result<u32, CodecError> {
    text.trim().parse().map_err(|_| CodecError::InvalidNumber {
        field,
        text: text.to_string(),
    })
}

fn parse_f64(field: &'static str, text: &str) -> Result<f64, CodecError> {
    text.trim().parse().map_err(|_| CodecError::InvalidNumber {
        field,
        text: text.to_string(),
    })
}

fn non_empty(field: &'static str, text: &str) -> Result<String, CodecError> {
    if text.is_empty() {
        Err(CodecError::MissingField(field))
    } else {
        Ok(text.to_string())
    }
}

/// Decode a text frame: scalar, text series or log line.
pub fn decode_text_frame(bytes: &[u8]) -> Result<DecodedFrame, CodecError> {
    let text = std::str::from_utf8(bytes).map_err(|_| CodecError::NotUtf8)?;
    let body = text
        .strip_prefix(FRAME_START as char)
        .ok_or(CodecError::NotTelemetry)?;

    if let Some(log) = body.strip_prefix(':') {
        let log = log.trim_end_matches(['\r', '\n']);
        let (ts, message) = log.split_once(':').ok_or(CodecError::MissingField("timestamp"))?;
        return Ok(DecodedFrame::Log {
            timestamp_ms: parse_u64("timestamp", ts)?,
            message: message.to_string(),
        });
    }

    let footer = std::str::from_utf8(FRAME_FOOTER).map_err(|_| CodecError::NotUtf8)?;
    let body = body.strip_suffix(footer).ok_or(CodecError::MissingFooter)?;
    let (body, unit) = match body.rsplit_once(UNIT_MARKER) {
        Some((body, unit)) => (body, Some(unit.to_string())),
        None => (body, None),
    };
    let (name, rest) = body.split_once(':').ok_or(CodecError::MissingField("name"))?;
    let name = non_empty("name", name)?;

    if rest.contains(';') {
        let mut parts = rest.split(';');
        let base_timestamp_ms = parse_u64("timestamp", parts.next().unwrap_or_default())?;
        let step_ms = parse_u32("step", parts.next().ok_or(CodecError::MissingField("step"))?)?;
        let values = parts
            .filter(|p| !p.is_empty())
            .map(|p| parse_f64("value", p))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(DecodedFrame::Series {
            name,
            base_timestamp_ms,
            step_ms,
            values,
            unit,
        });
    }

    let (ts, value) = rest.split_once(':').ok_or(CodecError::MissingField("value"))?;
    Ok(DecodedFrame::Scalar {
        name,
        timestamp_ms: parse_u64("timestamp", ts)?,
        value: parse_f64("value", value)?,
        unit,
    })
}

/// Decode a binary series frame.
///
/// The point count is implicit in the payload length, so the receiver has to
/// know which unit (if any) the sender appends.
pub fn decode_binary_frame(bytes: &[u8], unit: Option<&str>) -> Result<DecodedFrame, CodecError> {
    if bytes.first() != Some(&FRAME_START) {
        return Err(CodecError::NotTelemetry);
    }
    let mut body = bytes[1..]
        .strip_suffix(FRAME_FOOTER)
        .ok_or(CodecError::MissingFooter)?;

    let unit = unit.filter(|u| !u.is_empty());
    if let Some(unit) = unit {
        let suffix = [UNIT_MARKER.as_bytes(), unit.as_bytes()].concat();
        body = body
            .strip_suffix(suffix.as_slice())
            .ok_or_else(|| CodecError::MissingUnit(unit.to_string()))?;
    }

    let (name, rest) = split_at_byte(body, b':').ok_or(CodecError::MissingField("name"))?;
    let (ts, rest) = split_at_byte(rest, b';').ok_or(CodecError::MissingField("timestamp"))?;
    let (step, payload) = split_at_byte(rest, b';').ok_or(CodecError::MissingField("step"))?;

    let name = non_empty("name", ascii("name", name)?)?;
    let base_timestamp_ms = parse_u64("timestamp", ascii("timestamp", ts)?)?;
    let step_ms = parse_u32("step", ascii("step", step)?)?;

    let (range, raw) = if payload.is_empty() {
        (None, Vec::new())
    } else {
        if payload.len() < 8 || (payload.len() - 8) % 2 != 0 {
            return Err(CodecError::Truncated(payload.len()));
        }
        let min = f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let max = f32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let raw = payload[8..]
            .chunks_exact(2)
            .map(|w| u16::from_le_bytes([w[0], w[1]]))
            .collect();
        (Some((min, max)), raw)
    };

    Ok(DecodedFrame::BinarySeries {
        name,
        base_timestamp_ms,
        step_ms,
        range,
        raw,
        unit: unit.map(String::from),
    })
}

fn ascii<'a>(field: &'static str, bytes: &'a [u8]) -> Result<&'a str, CodecError> {
    std::str::from_utf8(bytes).map_err(|_| CodecError::MissingField(field))
}

fn split_at_byte(bytes: &[u8], sep: u8) -> Option<(&[u8], &[u8])> {
    let pos = bytes.iter().position(|&b| b == sep)?;
    Some((&bytes[..pos], &bytes[pos + 1..]))
}

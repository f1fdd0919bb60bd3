//! Splitting series into datagram-sized frames.
//!
//! A series of `L` values is cut into frames of at most `max_points` values
//! whose encoded size stays within `max_bytes`. Each frame carries its own
//! base timestamp, `base + step_ms * offset`, so the receiver sees one
//! gap-free timeline. Once the whole series has been emitted the base of
//! that variable moves forward by `step_ms * L`, ready for the next batch.

use std::collections::HashMap;

use plotlink_core::{Format, LinkConfig, Sample};

use crate::codec::{unit_len, validate_name, CodecError, Encoder};
use crate::frame::FRAME_FOOTER;

/// Size of the f32 min/max header of a binary series.
const BINARY_RANGE_BYTES: usize = 8;

/// Frames produced for one series.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkedSeries {
    pub frames: Vec<Vec<u8>>,
    /// `false` when a frame could not hold a single value and emission
    /// stopped early.
    pub complete: bool,
}

/// Splits series into frames and keeps each variable's running base
/// timestamp.
#[derive(Debug, Clone)]
pub struct PacketChunker {
    max_points: usize,
    max_bytes: usize,
    encoder: Encoder,
    bases: HashMap<String, u64>,
}

impl PacketChunker {
    pub fn new(max_points: usize, max_bytes: usize, encoder: Encoder) -> Self {
        Self {
            max_points: max_points.max(1),
            max_bytes,
            encoder,
            bases: HashMap::new(),
        }
    }

    pub fn from_config(link: &LinkConfig) -> Self {
        Self::new(
            link.max_points_per_packet,
            link.max_packet_bytes,
            Encoder::new(link.precision),
        )
    }

    pub fn encoder(&self) -> Encoder {
        self.encoder
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Current base timestamp of `name`, if it has been emitted before.
    pub fn base(&self, name: &str) -> Option<u64> {
        self.bases.get(name).copied()
    }

    /// Forget every running base.
    pub fn reset(&mut self) {
        self.bases.clear();
    }

    /// Chunk a series and advance the running base of `name`.
    ///
    /// The first series of a variable starts at `now_ms`. The base only moves
    /// when every value made it into a frame.
    pub fn chunk<T: Sample>(
        &mut self,
        name: &str,
        step_ms: u32,
        values: &[T],
        unit: Option<&str>,
        format: Format,
        now_ms: u64,
    ) -> Result<ChunkedSeries, CodecError> {
        validate_name(name)?;
        if values.is_empty() {
            return Ok(ChunkedSeries {
                frames: Vec::new(),
                complete: true,
            });
        }

        let base = *self.bases.entry(name.to_string()).or_insert(now_ms);
        let chunked = self.chunk_from(base, name, step_ms, values, unit, format)?;
        if chunked.complete {
            let advance = u64::from(step_ms) * values.len() as u64;
            self.bases.insert(name.to_string(), base + advance);
        }
        Ok(chunked)
    }

    /// Chunk a series starting at `base_ms` without touching any state.
    pub fn chunk_from<T: Sample>(
        &self,
        base_ms: u64,
        name: &str,
        step_ms: u32,
        values: &[T],
        unit: Option<&str>,
        format: Format,
    ) -> Result<ChunkedSeries, CodecError> {
        validate_name(name)?;

        let mut frames = Vec::new();
        let mut offset = 0;
        while offset < values.len() {
            let timestamp = base_ms + u64::from(step_ms) * offset as u64;
            let mut frame = Vec::with_capacity(self.max_bytes.min(2_048));
            self.encoder
                .write_series_header(name, timestamp, step_ms, &mut frame);
            let fixed = frame.len() + unit_len(unit) + FRAME_FOOTER.len();

            let rest = &values[offset..];
            let taken = match format {
                Format::Text => self.fill_text(rest, fixed, &mut frame),
                Format::Binary => {
                    let n = self.binary_fit(fixed).min(rest.len());
                    self.encoder.write_binary_values(&rest[..n], &mut frame);
                    n
                }
            };
            self.encoder.write_trailer(unit, &mut frame);
            frames.push(frame);

            if taken == 0 {
                return Ok(ChunkedSeries {
                    frames,
                    complete: false,
                });
            }
            offset += taken;
        }

        Ok(ChunkedSeries {
            frames,
            complete: true,
        })
    }

    /// Append as many text values as fit, returning how many were written.
    fn fill_text<T: Sample>(&self, values: &[T], fixed: usize, frame: &mut Vec<u8>) -> usize {
        let decimals = self.encoder.precision().decimals();
        let mut body = String::new();
        let mut scratch = String::with_capacity(24);
        let mut taken = 0;

        for value in values.iter().take(self.max_points) {
            scratch.clear();
            if taken > 0 {
                scratch.push(';');
            }
            value.write_text(&mut scratch, decimals);
            if fixed + body.len() + scratch.len() > self.max_bytes {
                break;
            }
            body.push_str(&scratch);
            taken += 1;
        }

        frame.extend_from_slice(body.as_bytes());
        taken
    }

    /// Number of binary values that fit next to `fixed` framing bytes.
    fn binary_fit(&self, fixed: usize) -> usize {
        let room = self.max_bytes.saturating_sub(fixed);
        if room < BINARY_RANGE_BYTES + 2 {
            return 0;
        }
        ((room - BINARY_RANGE_BYTES) / 2).min(self.max_points)
    }
}

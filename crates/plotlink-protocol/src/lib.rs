//! # plotlink-protocol
//!
//! Telemetry wire format.
//!
//! This crate turns samples into Teleplot-compatible frames, splits long
//! series into datagram-sized packets and classifies inbound control lines.
//! It performs no I/O.

pub mod chunker;
pub mod codec;
pub mod command;
pub mod frame;

pub use chunker::{ChunkedSeries, PacketChunker};
pub use codec::{
    decode_binary_frame, decode_text_frame, plausible_timestamp, validate_name, CodecError,
    Encoder, PLAUSIBLE_TIMESTAMP_MS,
};
pub use command::{encode_control_line, Command, ControlVerb};
pub use frame::{DecodedFrame, LogLine, TelemetryFrame};

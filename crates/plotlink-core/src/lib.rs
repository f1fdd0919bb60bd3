//! # plotlink-core
//!
//! Core data types of the plotlink telemetry stack.
//!
//! This crate provides:
//! - The [`Sample`] trait for numeric sample types
//! - A lock-free single-producer/single-consumer sample ring
//! - Block-averaging decimation
//! - Millisecond clocks
//! - Configuration types shared by every crate
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! so the producer side can run on a plain thread or a timer callback.

pub mod buffer;
pub mod clock;
pub mod config;
pub mod decimate;
pub mod sample;
pub mod wire;

pub use buffer::{BufferError, CircularSampleBuffer, SampleReader, SampleWriter};
pub use clock::{Clock, ClockKind, ManualClock, UptimeClock, WallClock};
pub use config::{AcquisitionConfig, ConfigError, LinkConfig, TelemetryConfig};
pub use decimate::Decimator;
pub use sample::Sample;
pub use wire::{Format, Precision};

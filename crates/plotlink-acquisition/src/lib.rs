//! # plotlink-acquisition
//!
//! Continuous sample acquisition.
//!
//! A [`SampleSource`] is polled by an [`AcquisitionProducer`], which
//! decimates the raw values and pushes them into the writer half of a
//! [`plotlink_core::CircularSampleBuffer`]. The producer runs on its own
//! thread so acquisition keeps its pace whatever the link is doing.

pub mod producer;
pub mod simulated;
pub mod source;

pub use producer::{AcquisitionError, AcquisitionProducer, AcquisitionTask, ProducerStats};
pub use simulated::{ScriptedSource, SimulatedAdc};
pub use source::{SampleSource, SourceError};

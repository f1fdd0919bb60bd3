//! Sample source abstraction.

use plotlink_core::Sample;
use thiserror::Error;

/// Errors reported by a sample source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The source could not be initialized.
    #[error("Source initialization failed: {0}")]
    Init(String),

    /// Nothing to read right now.
    #[error("No data available")]
    NoData,

    /// The read itself failed.
    #[error("Read failed: {0}")]
    Read(String),
}

/// Something that produces raw samples, one at a time.
///
/// `read_raw` must not block: a source with nothing ready answers
/// [`SourceError::NoData`] and the producer tries again next cycle.
pub trait SampleSource: Send + 'static {
    type Sample: Sample;

    /// Prepare the hardware (or simulation). Called once before any read.
    fn begin(&mut self) -> Result<(), SourceError>;

    /// Read the next raw value.
    fn read_raw(&mut self) -> Result<Self::Sample, SourceError>;

    /// Release the hardware.
    fn end(&mut self) {}
}

//! Ring-to-link forwarding.

use plotlink_core::{Format, Sample, SampleReader};

use crate::link::{LinkError, TelemetryLink};

/// Consumer side of an acquisition stream.
///
/// Each call to [`StreamForwarder::forward`] pulls at most one batch from the
/// ring and pushes it as a series, so the consumer never waits on the
/// producer.
pub struct StreamForwarder<T: Sample> {
    reader: SampleReader<T>,
    name: String,
    step_ms: u32,
    unit: Option<String>,
    format: Option<Format>,
    batch: Vec<T>,
}

impl<T: Sample> StreamForwarder<T> {
    pub fn new(reader: SampleReader<T>, name: impl Into<String>, step_ms: u32, batch_size: usize) -> Self {
        Self {
            reader,
            name: name.into(),
            step_ms,
            unit: None,
            format: None,
            batch: vec![T::default(); batch_size.max(1)],
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Force a series format instead of the link's configured one.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn available(&self) -> usize {
        self.reader.available()
    }

    /// Forward one batch. Returns the number of samples sent.
    pub fn forward(&mut self, link: &TelemetryLink) -> Result<usize, LinkError> {
        let n = self.reader.pull(&mut self.batch);
        if n == 0 {
            return Ok(0);
        }
        let format = self.format.unwrap_or(link.config().series_format);
        link.push_series_as(
            format,
            &self.name,
            self.step_ms,
            &self.batch[..n],
            self.unit.as_deref(),
        )?;
        Ok(n)
    }

    /// Forward until the ring is empty. Returns the number of samples sent.
    pub fn drain(&mut self, link: &TelemetryLink) -> Result<usize, LinkError> {
        let mut total = 0;
        loop {
            let n = self.forward(link)?;
            if n == 0 {
                return Ok(total);
            }
            total += n;
        }
    }

    /// Give back the reader.
    pub fn into_reader(self) -> SampleReader<T> {
        self.reader
    }
}

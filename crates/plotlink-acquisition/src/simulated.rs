//! Software sample sources.
//!
//! [`SimulatedAdc`] stands in for a 12-bit DMA-driven ADC: a sine tone on
//! top of a mid-scale offset, with a little deterministic noise, produced at
//! the configured sample rate. [`ScriptedSource`] replays a fixed sequence
//! and is what the tests drive the producer with.

use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::time::Instant;

use plotlink_core::Sample;

use crate::source::{SampleSource, SourceError};

/// Number of input channels of the simulated converter.
pub const ADC_CHANNELS: u8 = 8;

/// Full-scale raw value of a 12-bit converter.
pub const ADC_MAX: u16 = 4095;

const ADC_MID: f64 = 2048.0;

/// Simulated 12-bit ADC.
#[derive(Debug, Clone)]
pub struct SimulatedAdc {
    channel: u8,
    sample_rate_hz: u32,
    tone_hz: f64,
    amplitude: f64,
    noise: u16,
    paced: bool,
    rng: u32,
    index: u64,
    started: Option<Instant>,
}

impl SimulatedAdc {
    pub fn new(channel: u8, sample_rate_hz: u32) -> Self {
        Self {
            channel,
            sample_rate_hz,
            tone_hz: 5.0,
            amplitude: 1_500.0,
            noise: 8,
            paced: true,
            rng: 0x2545_f491 ^ u32::from(channel),
            index: 0,
            started: None,
        }
    }

    /// Frequency and peak amplitude (in counts) of the generated tone.
    pub fn with_tone(mut self, tone_hz: f64, amplitude: f64) -> Self {
        self.tone_hz = tone_hz;
        self.amplitude = amplitude;
        self
    }

    /// Peak noise in counts. Zero gives a clean tone.
    pub fn with_noise(mut self, noise: u16) -> Self {
        self.noise = noise;
        self
    }

    /// Produce samples as fast as they are read instead of at the sample
    /// rate.
    pub fn free_running(mut self) -> Self {
        self.paced = false;
        self
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Raw samples produced since `begin`.
    pub fn produced(&self) -> u64 {
        self.index
    }

    fn next_noise(&mut self) -> f64 {
        if self.noise == 0 {
            return 0.0;
        }
        // xorshift32
        self.rng ^= self.rng << 13;
        self.rng ^= self.rng >> 17;
        self.rng ^= self.rng << 5;
        let span = 2 * u32::from(self.noise) + 1;
        f64::from(self.rng % span) - f64::from(self.noise)
    }
}

impl SampleSource for SimulatedAdc {
    type Sample = u16;

    fn begin(&mut self) -> Result<(), SourceError> {
        if self.channel >= ADC_CHANNELS {
            return Err(SourceError::Init(format!(
                "ADC channel {} does not exist (0..={})",
                self.channel,
                ADC_CHANNELS - 1
            )));
        }
        if self.sample_rate_hz == 0 {
            return Err(SourceError::Init("sample rate must be positive".into()));
        }
        self.index = 0;
        self.started = Some(Instant::now());
        Ok(())
    }

    fn read_raw(&mut self) -> Result<u16, SourceError> {
        let Some(started) = self.started else {
            return Err(SourceError::Read("ADC not started".into()));
        };
        // Sample k is converted at k / rate; sample 0 is ready at begin
        if self.paced {
            let due = started.elapsed().as_secs_f64() * f64::from(self.sample_rate_hz);
            if self.index as f64 >= due {
                return Err(SourceError::NoData);
            }
        }

        let t = self.index as f64 / f64::from(self.sample_rate_hz);
        let value = ADC_MID + self.amplitude * (TAU * self.tone_hz * t).sin() + self.next_noise();
        self.index += 1;
        Ok(value.round().clamp(0.0, f64::from(ADC_MAX)) as u16)
    }

    fn end(&mut self) {
        self.started = None;
    }
}

/// Replays a fixed sequence of reads.
#[derive(Debug, Clone)]
pub struct ScriptedSource<T: Sample> {
    script: Vec<Result<T, SourceError>>,
    pending: VecDeque<Result<T, SourceError>>,
    begin_error: Option<String>,
    cycle: bool,
    begun: bool,
    ended: bool,
}

impl<T: Sample> ScriptedSource<T> {
    pub fn new(values: impl IntoIterator<Item = T>) -> Self {
        Self::from_results(values.into_iter().map(Ok))
    }

    /// Script that may interleave read errors with values.
    pub fn from_results(reads: impl IntoIterator<Item = Result<T, SourceError>>) -> Self {
        let script: Vec<_> = reads.into_iter().collect();
        Self {
            pending: script.iter().cloned().collect(),
            script,
            begin_error: None,
            cycle: false,
            begun: false,
            ended: false,
        }
    }

    /// Make `begin` fail with `message`.
    pub fn failing_begin(mut self, message: impl Into<String>) -> Self {
        self.begin_error = Some(message.into());
        self
    }

    /// Start over once the script is exhausted.
    pub fn cycle(mut self) -> Self {
        self.cycle = true;
        self
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn has_begun(&self) -> bool {
        self.begun
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }
}

impl<T: Sample> SampleSource for ScriptedSource<T> {
    type Sample = T;

    fn begin(&mut self) -> Result<(), SourceError> {
        if let Some(message) = &self.begin_error {
            return Err(SourceError::Init(message.clone()));
        }
        self.begun = true;
        Ok(())
    }

    fn read_raw(&mut self) -> Result<T, SourceError> {
        if self.pending.is_empty() && self.cycle {
            self.pending.extend(self.script.iter().cloned());
        }
        self.pending.pop_front().unwrap_or(Err(SourceError::NoData))
    }

    fn end(&mut self) {
        self.ended = true;
    }
}

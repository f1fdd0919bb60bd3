//! Sample-rate reduction by block averaging.

use crate::sample::Sample;

/// Averages every `factor` raw samples into one output sample.
///
/// With a factor of 1 every input is passed through untouched. The output
/// stream has an effective period of `factor × raw period`.
#[derive(Debug, Clone)]
pub struct Decimator<T: Sample> {
    factor: u32,
    acc: T::Accumulator,
    count: u32,
}

impl<T: Sample> Decimator<T> {
    /// Create a decimator. A factor of 0 is treated as 1.
    pub fn new(factor: u32) -> Self {
        Self {
            factor: factor.max(1),
            acc: T::Accumulator::default(),
            count: 0,
        }
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }

    /// Raw samples accumulated towards the next output.
    pub fn pending(&self) -> u32 {
        self.count
    }

    /// Feed one raw sample; returns an output sample when a block completes.
    pub fn feed(&mut self, value: T) -> Option<T> {
        if self.factor == 1 {
            return Some(value);
        }

        self.acc = value.accumulate(self.acc);
        self.count += 1;
        if self.count < self.factor {
            return None;
        }

        let mean = T::mean(self.acc, self.factor);
        self.reset();
        Some(mean)
    }

    /// Drop any partially accumulated block.
    pub fn reset(&mut self) {
        self.acc = T::Accumulator::default();
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_one_passes_through() {
        let mut d = Decimator::<i16>::new(1);
        assert_eq!(d.feed(7), Some(7));
        assert_eq!(d.feed(-3), Some(-3));
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn test_zero_factor_is_one() {
        assert_eq!(Decimator::<u16>::new(0).factor(), 1);
    }

    #[test]
    fn test_block_average_and_reset() {
        for factor in [1u32, 2, 5, 10] {
            let mut d = Decimator::<f64>::new(factor);
            let block: Vec<f64> = (1..=factor).map(|v| v as f64 * 1.5).collect();
            let expected = block.iter().sum::<f64>() / factor as f64;

            let outputs: Vec<f64> = block.iter().filter_map(|&v| d.feed(v)).collect();
            assert_eq!(outputs.len(), 1, "factor {factor}");
            assert!((outputs[0] - expected).abs() < 1e-9);
            assert_eq!(d.pending(), 0);

            // A second block averages independently of the first.
            let outputs: Vec<f64> = (0..factor).filter_map(|_| d.feed(2.0)).collect();
            assert_eq!(outputs, vec![2.0]);
        }
    }

    #[test]
    fn test_integer_average_truncates() {
        let mut d = Decimator::<u16>::new(2);
        assert_eq!(d.feed(4095), None);
        assert_eq!(d.feed(4094), Some(4094));

        let mut d = Decimator::<i16>::new(5);
        let out: Vec<i16> = [10, 20, 30, 40, 51].into_iter().filter_map(|v| d.feed(v)).collect();
        assert_eq!(out, vec![30]);
    }

    #[test]
    fn test_reset_discards_partial_block() {
        let mut d = Decimator::<i32>::new(3);
        d.feed(100);
        d.feed(100);
        d.reset();
        assert_eq!(d.feed(3), None);
        assert_eq!(d.feed(3), None);
        assert_eq!(d.feed(3), Some(3));
    }
}

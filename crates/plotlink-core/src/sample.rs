//! Sample value types.
//!
//! A sample is a plain numeric value. Its position in time is implicit: the
//! n-th sample pushed into a stream sits at `base + n * period`. The
//! [`Sample`] trait gathers what the rest of the workspace needs from a
//! numeric type:
//! - a lossless 64-bit representation so the ring buffer can store any
//!   sample in an atomic slot
//! - an accumulator for decimation (integer sums for integer samples,
//!   float sums for float samples)
//! - conversions for the wire formats (text digits, 16-bit raw words)

use std::fmt::Write;

/// Numeric sample stored in the ring buffer and carried on the wire.
pub trait Sample: Copy + Default + PartialOrd + Send + Sync + 'static {
    /// Running sum used by the decimator.
    type Accumulator: Copy + Default + Send;

    /// Whether the type is an integer type (printed without decimals).
    const INTEGER: bool;

    /// Bit pattern stored in a ring buffer slot.
    fn to_bits(self) -> u64;

    /// Inverse of [`Sample::to_bits`].
    fn from_bits(bits: u64) -> Self;

    /// Add this sample to a running sum.
    fn accumulate(self, acc: Self::Accumulator) -> Self::Accumulator;

    /// Average of `count` accumulated samples.
    ///
    /// Integer samples use integer division (truncating toward zero),
    /// float samples use float division.
    fn mean(acc: Self::Accumulator, count: u32) -> Self;

    /// Value as `f64` (used for min/max headers and decoding checks).
    fn to_f64(self) -> f64;

    /// Little-endian 16-bit word for the binary series format.
    ///
    /// 16-bit samples pass through with their own bit pattern. Wider
    /// integers saturate into `i16`; floats are rounded then saturated.
    fn to_wire(self) -> [u8; 2];

    /// Append the textual form of the value.
    fn write_text(self, out: &mut String, decimals: usize);
}

macro_rules! integer_sample {
    ($($ty:ty => $wire:expr),*) => {$(
        impl Sample for $ty {
            type Accumulator = i64;
            const INTEGER: bool = true;

            fn to_bits(self) -> u64 {
                self as i64 as u64
            }

            fn from_bits(bits: u64) -> Self {
                bits as i64 as $ty
            }

            fn accumulate(self, acc: i64) -> i64 {
                acc + self as i64
            }

            fn mean(acc: i64, count: u32) -> Self {
                (acc / i64::from(count.max(1))) as $ty
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn to_wire(self) -> [u8; 2] {
                let wire: fn($ty) -> [u8; 2] = $wire;
                wire(self)
            }

            fn write_text(self, out: &mut String, _decimals: usize) {
                let _ = write!(out, "{}", self);
            }
        }
    )*};
}

fn saturate_word(value: i64) -> [u8; 2] {
    (value.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16).to_le_bytes()
}

integer_sample!(
    i16 => |v| v.to_le_bytes(),
    u16 => |v| v.to_le_bytes(),
    i32 => |v| saturate_word(i64::from(v)),
    u32 => |v| saturate_word(i64::from(v))
);

impl Sample for f32 {
    type Accumulator = f64;
    const INTEGER: bool = false;

    fn to_bits(self) -> u64 {
        u64::from(f32::to_bits(self))
    }

    fn from_bits(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }

    fn accumulate(self, acc: f64) -> f64 {
        acc + f64::from(self)
    }

    fn mean(acc: f64, count: u32) -> Self {
        (acc / f64::from(count.max(1))) as f32
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn to_wire(self) -> [u8; 2] {
        f64::from(self).to_wire()
    }

    fn write_text(self, out: &mut String, decimals: usize) {
        let _ = write!(out, "{:.*}", decimals, self);
    }
}

impl Sample for f64 {
    type Accumulator = f64;
    const INTEGER: bool = false;

    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }

    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }

    fn accumulate(self, acc: f64) -> f64 {
        acc + self
    }

    fn mean(acc: f64, count: u32) -> Self {
        acc / f64::from(count.max(1))
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn to_wire(self) -> [u8; 2] {
        // `as` saturates and maps NaN to 0
        (self.round() as i16).to_le_bytes()
    }

    fn write_text(self, out: &mut String, decimals: usize) {
        let _ = write!(out, "{:.*}", decimals, self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_round_trip_signed() {
        for v in [i16::MIN, -1, 0, 1, 4095, i16::MAX] {
            assert_eq!(i16::from_bits(v.to_bits()), v);
        }
        assert_eq!(<f32 as Sample>::from_bits(Sample::to_bits(-2.5f32)), -2.5);
        assert_eq!(<f64 as Sample>::from_bits(Sample::to_bits(1e-9f64)), 1e-9);
    }

    #[test]
    fn test_integer_mean_truncates() {
        let acc = [1i16, 2].iter().fold(0, |acc, v| v.accumulate(acc));
        assert_eq!(i16::mean(acc, 2), 1);

        let acc = [1.0f32, 2.0].iter().fold(0.0, |acc, v| v.accumulate(acc));
        assert_eq!(f32::mean(acc, 2), 1.5);
    }

    #[test]
    fn test_wire_words() {
        assert_eq!(40_000u16.to_wire(), 40_000u16.to_le_bytes());
        assert_eq!(u16::MAX.to_wire(), [0xff, 0xff]);
        assert_eq!((-2i16).to_wire(), (-2i16).to_le_bytes());
        assert_eq!(70_000i32.to_wire(), i16::MAX.to_le_bytes());
        assert_eq!(70_000u32.to_wire(), i16::MAX.to_le_bytes());
        assert_eq!((-1e9f64).to_wire(), i16::MIN.to_le_bytes());
        assert_eq!(12.6f32.to_wire(), 13i16.to_le_bytes());
    }

    #[test]
    fn test_text_forms() {
        let mut out = String::new();
        42u16.write_text(&mut out, 2);
        out.push(';');
        1.23456f64.write_text(&mut out, 2);
        out.push(';');
        1.23456f32.write_text(&mut out, 6);
        assert_eq!(out, "42;1.23;1.234560");
    }
}

//! Modulation contracts

use common::Modulation;
use num_complex::Complex32;

/// Maps bits (one per byte) to constellation symbols
pub trait Modulator {
    /// Modulation order implemented
    fn modulation(&self) -> Modulation;

    /// Modulate `bits` into `symbols`, returns the number of symbols written
    fn modulate(&self, bits: &[u8], symbols: &mut [Complex32]) -> usize;
}

/// Produces soft bits from received symbols
pub trait SoftDemodulator {
    /// Demodulate `symbols` into `llr` (positive favours `0`), returns the number of values written
    fn demodulate(&self, symbols: &[Complex32], noise_estimate: f32, llr: &mut [f32]) -> usize;
}

//! Modulation Mapping and Soft Demodulation
//!
//! Constellations of 3GPP TS 36.211 Section 7.1 and a max-log soft demodulator.

use common::Modulation;
use interfaces::{Modulator, SoftDemodulator};
use num_complex::Complex32;

/// Smallest noise variance used to scale soft bits
const MIN_NOISE_ESTIMATE: f32 = 1e-4;

/// Largest constellation size (64QAM)
const MAX_POINTS: usize = 64;

/// Constellation lookup table for one modulation order
#[derive(Debug, Clone)]
pub struct ModemTable {
    modulation: Modulation,
    /// Symbol for every bit pattern, first bit in the most significant position
    points: Vec<Complex32>,
}

impl ModemTable {
    /// Build the table of a modulation order
    pub fn new(modulation: Modulation) -> Self {
        let bits = modulation.bits_per_symbol();
        let points = (0..1usize << bits)
            .map(|idx| {
                let bit = |i: usize| ((idx >> (bits - 1 - i)) & 1) as f32;
                let sign = |b: f32| 1.0 - 2.0 * b;
                match modulation {
                    Modulation::Bpsk => {
                        let s = sign(bit(0)) * std::f32::consts::FRAC_1_SQRT_2;
                        Complex32::new(s, s)
                    }
                    Modulation::Qpsk => Complex32::new(sign(bit(0)), sign(bit(1)))
                        * std::f32::consts::FRAC_1_SQRT_2,
                    Modulation::Qam16 => {
                        let scale = 1.0 / 10.0_f32.sqrt();
                        let i = sign(bit(0)) * (1.0 + 2.0 * bit(2));
                        let q = sign(bit(1)) * (1.0 + 2.0 * bit(3));
                        Complex32::new(i, q) * scale
                    }
                    Modulation::Qam64 => {
                        let scale = 1.0 / 42.0_f32.sqrt();
                        // Gray-coded amplitude of the two magnitude bits
                        let amplitude = |hi: f32, lo: f32| match (hi as u8, lo as u8) {
                            (0, 0) => 3.0,
                            (0, _) => 1.0,
                            (_, 0) => 5.0,
                            _ => 7.0,
                        };
                        let i = sign(bit(0)) * amplitude(bit(2), bit(4));
                        let q = sign(bit(1)) * amplitude(bit(3), bit(5));
                        Complex32::new(i, q) * scale
                    }
                }
            })
            .collect();

        Self { modulation, points }
    }

    /// Constellation points indexed by bit pattern
    pub fn points(&self) -> &[Complex32] {
        &self.points
    }
}

impl Modulator for ModemTable {
    fn modulation(&self) -> Modulation {
        self.modulation
    }

    fn modulate(&self, bits: &[u8], symbols: &mut [Complex32]) -> usize {
        let qm = self.modulation.bits_per_symbol();
        let n = (bits.len() / qm).min(symbols.len());
        for (symbol, chunk) in symbols.iter_mut().zip(bits.chunks_exact(qm)).take(n) {
            let idx = chunk.iter().fold(0usize, |acc, &b| (acc << 1) | (b & 1) as usize);
            *symbol = self.points[idx];
        }
        n
    }
}

impl SoftDemodulator for ModemTable {
    fn demodulate(&self, symbols: &[Complex32], noise_estimate: f32, llr: &mut [f32]) -> usize {
        let qm = self.modulation.bits_per_symbol();
        let n = symbols.len().min(llr.len() / qm);
        let inv_noise = 1.0 / noise_estimate.max(MIN_NOISE_ESTIMATE);
        let mut distance = [0.0f32; MAX_POINTS];

        for (y, out) in symbols.iter().zip(llr.chunks_exact_mut(qm)).take(n) {
            for (d, point) in distance.iter_mut().zip(&self.points) {
                *d = (y - point).norm_sqr();
            }
            for (i, value) in out.iter_mut().enumerate() {
                let shift = qm - 1 - i;
                let mut min0 = f32::MAX;
                let mut min1 = f32::MAX;
                for (idx, &d) in distance.iter().take(self.points.len()).enumerate() {
                    if (idx >> shift) & 1 == 0 {
                        min0 = min0.min(d);
                    } else {
                        min1 = min1.min(d);
                    }
                }
                *value = (min1 - min0) * inv_noise;
            }
        }
        n * qm
    }
}

/// Modulation tables for every supported order
#[derive(Debug, Clone)]
pub struct ModemTables {
    tables: [ModemTable; 4],
}

impl ModemTables {
    pub fn new() -> Self {
        Self {
            tables: Modulation::ALL.map(ModemTable::new),
        }
    }

    /// Table of one modulation order
    pub fn get(&self, modulation: Modulation) -> &ModemTable {
        &self.tables[modulation.table_index()]
    }
}

impl Default for ModemTables {
    fn default() -> Self {
        Self::new()
    }
}

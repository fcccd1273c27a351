/// Pseudo-random sequence generation
/// Based on 3GPP TS 36.211 Section 7.2 and 6.3.1

use common::{Pci, Rnti};
use interfaces::SequenceGenerator;

/// Fast-forward offset applied before the first output bit (Nc)
const NC: usize = 1600;

/// Length-31 Gold sequence generator
#[derive(Debug, Clone)]
pub struct GoldSequence {
    /// Gold sequence LFSR state
    x1: u32,
    x2: u32,
}

impl GoldSequence {
    /// Create new sequence generator with initialization value
    pub fn new(c_init: u32) -> Self {
        let mut seq = Self {
            // x1 starts with x1(0) = 1, all other bits 0
            x1: 1,
            x2: c_init & 0x7FFFFFFF,
        };

        for _ in 0..NC {
            seq.advance();
        }

        seq
    }

    /// Advance LFSR state
    fn advance(&mut self) {
        // x1(n+31) = (x1(n+3) + x1(n)) mod 2
        let x1_new = ((self.x1 >> 3) ^ self.x1) & 1;
        self.x1 = ((self.x1 >> 1) | (x1_new << 30)) & 0x7FFFFFFF;

        // x2(n+31) = (x2(n+3) + x2(n+2) + x2(n+1) + x2(n)) mod 2
        let x2_new = ((self.x2 >> 3) ^ (self.x2 >> 2) ^ (self.x2 >> 1) ^ self.x2) & 1;
        self.x2 = ((self.x2 >> 1) | (x2_new << 30)) & 0x7FFFFFFF;
    }

    /// Generate next bit from the sequence
    pub fn next_bit(&mut self) -> u8 {
        let c = (self.x1 ^ self.x2) & 1;
        self.advance();
        c as u8
    }

    /// Fill a buffer with consecutive sequence bits
    pub fn fill(&mut self, out: &mut [u8]) {
        for bit in out.iter_mut() {
            *bit = self.next_bit();
        }
    }
}

/// PDSCH scrambling initialization value
/// c_init = n_RNTI * 2^14 + q * 2^13 + floor(n_s / 2) * 2^9 + N_ID_cell
pub fn pdsch_cinit(rnti: Rnti, codeword: usize, sf_idx: usize, cell_id: Pci) -> u32 {
    ((rnti.value() as u32) << 14)
        + ((codeword as u32) << 13)
        + ((sf_idx as u32) << 9)
        + cell_id.0 as u32
}

/// PDSCH scrambling sequence generator
#[derive(Debug, Clone, Copy, Default)]
pub struct PdschSequence;

impl SequenceGenerator for PdschSequence {
    fn generate(&self, rnti: Rnti, codeword: usize, sf_idx: usize, cell_id: Pci, out: &mut [u8]) {
        GoldSequence::new(pdsch_cinit(rnti, codeword, sf_idx, cell_id)).fill(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdsch_cinit() {
        let c_init = pdsch_cinit(Rnti(0x1234), 1, 5, Pci(7));
        assert_eq!(c_init, (0x1234 << 14) + (1 << 13) + (5 << 9) + 7);
    }

    #[test]
    fn test_gold_sequence_is_deterministic() {
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        GoldSequence::new(0x1234).fill(&mut a);
        GoldSequence::new(0x1234).fill(&mut b);
        assert_eq!(a, b);
        assert!(a.iter().all(|&bit| bit <= 1));

        GoldSequence::new(0x1235).fill(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_gold_sequence_balance() {
        let mut bits = vec![0u8; 10_000];
        PdschSequence.generate(Rnti(61), 0, 3, Pci(1), &mut bits);
        let ones = bits.iter().filter(|&&b| b == 1).count();
        assert!(ones > 4_500 && ones < 5_500);
    }
}

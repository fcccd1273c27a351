//! Scrambling sequence generator contract

use common::{Pci, Rnti};

/// Generates the PDSCH scrambling sequence of one (RNTI, codeword, subframe)
pub trait SequenceGenerator: Send + Sync {
    /// Fill `out` with sequence bits (one per byte)
    fn generate(&self, rnti: Rnti, codeword: usize, sf_idx: usize, cell_id: Pci, out: &mut [u8]);
}

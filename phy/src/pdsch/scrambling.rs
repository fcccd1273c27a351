//! PDSCH scrambling (TS 36.211 Section 6.3.1) and the per-RNTI sequence cache

use std::collections::HashMap;
use std::sync::Arc;

use common::{Pci, Rnti, MAX_CODEWORDS, NSUBFRAMES_X_FRAME};
use interfaces::SequenceGenerator;
use tracing::{debug, trace};

/// Scrambling sequence slot of one (codeword, subframe)
#[derive(Debug, Clone, Default)]
pub enum SequenceSlot {
    #[default]
    NotGenerated,
    Generated(Arc<[u8]>),
}

type UserSequences = [[SequenceSlot; NSUBFRAMES_X_FRAME]; MAX_CODEWORDS];

/// Lazily generated scrambling sequences of the bound RNTIs
pub struct ScramblingCache {
    cell_id: Pci,
    /// Sequence length in bits (largest RE count x 6)
    seq_len: usize,
    generator: Box<dyn SequenceGenerator>,
    users: HashMap<Rnti, UserSequences>,
    generations: u64,
}

impl ScramblingCache {
    pub fn new(cell_id: Pci, seq_len: usize, generator: Box<dyn SequenceGenerator>) -> Self {
        Self {
            cell_id,
            seq_len,
            generator,
            users: HashMap::new(),
            generations: 0,
        }
    }

    /// Bind an RNTI; sequences are generated on first use
    pub fn set_rnti(&mut self, rnti: Rnti) {
        if !self.users.contains_key(&rnti) {
            debug!("Binding RNTI {}", rnti);
            self.users.insert(rnti, Default::default());
        }
    }

    /// Release an RNTI and its sequences
    pub fn free_rnti(&mut self, rnti: Rnti) {
        if self.users.remove(&rnti).is_some() {
            debug!("Released RNTI {}", rnti);
        }
    }

    pub fn is_bound(&self, rnti: Rnti) -> bool {
        self.users.contains_key(&rnti)
    }

    /// Number of sequences generated so far, cached or transient
    pub fn generations(&self) -> u64 {
        self.generations
    }

    /// Sequence of (rnti, codeword, subframe); cached for bound RNTIs
    pub fn sequence(&mut self, rnti: Rnti, codeword: usize, sf_idx: usize) -> Arc<[u8]> {
        let cw = codeword % MAX_CODEWORDS;
        let sf = sf_idx % NSUBFRAMES_X_FRAME;

        if let Some(slots) = self.users.get(&rnti) {
            if let SequenceSlot::Generated(seq) = &slots[cw][sf] {
                return Arc::clone(seq);
            }
        }

        let seq = self.generate(rnti, cw, sf);
        match self.users.get_mut(&rnti) {
            Some(slots) => slots[cw][sf] = SequenceSlot::Generated(Arc::clone(&seq)),
            None => trace!("RNTI {} not bound, using a transient sequence", rnti),
        }
        seq
    }

    fn generate(&mut self, rnti: Rnti, codeword: usize, sf_idx: usize) -> Arc<[u8]> {
        let mut bits = vec![0u8; self.seq_len];
        self.generator.generate(rnti, codeword, sf_idx, self.cell_id, &mut bits);
        self.generations += 1;
        trace!("Generated scrambling sequence rnti={} cw={} sf={}", rnti, codeword, sf_idx);
        bits.into()
    }
}

/// XOR coded bits with the sequence
pub fn scramble_bits(bits: &mut [u8], seq: &[u8]) {
    for (bit, &c) in bits.iter_mut().zip(seq) {
        *bit ^= c;
    }
}

/// Descramble soft bits: negate where the sequence bit is 1
pub fn descramble_llr(llr: &mut [f32], seq: &[u8]) {
    for (value, &c) in llr.iter_mut().zip(seq) {
        if c == 1 {
            *value = -*value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::PdschSequence;

    fn cache() -> ScramblingCache {
        ScramblingCache::new(Pci(1), 600, Box::new(PdschSequence))
    }

    #[test]
    fn test_bound_rnti_generates_once() {
        let mut cache = cache();
        cache.set_rnti(Rnti(0x46));
        assert_eq!(cache.generations(), 0);

        let a = cache.sequence(Rnti(0x46), 0, 3);
        let b = cache.sequence(Rnti(0x46), 0, 3);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.generations(), 1);

        cache.sequence(Rnti(0x46), 1, 3);
        assert_eq!(cache.generations(), 2);
    }

    #[test]
    fn test_unbound_rnti_is_transient() {
        let mut cache = cache();
        let a = cache.sequence(Rnti(0x47), 0, 0);
        let b = cache.sequence(Rnti(0x47), 0, 0);
        assert_eq!(a, b);
        assert_eq!(cache.generations(), 2);
        assert!(!cache.is_bound(Rnti(0x47)));
    }

    #[test]
    fn test_free_and_rebind() {
        let mut cache = cache();
        cache.set_rnti(Rnti(1));
        let first = cache.sequence(Rnti(1), 0, 0);
        cache.set_rnti(Rnti(1));
        cache.sequence(Rnti(1), 0, 0);
        assert_eq!(cache.generations(), 1);

        cache.free_rnti(Rnti(1));
        cache.free_rnti(Rnti(1));
        cache.set_rnti(Rnti(1));
        let again = cache.sequence(Rnti(1), 0, 0);
        assert_eq!(cache.generations(), 2);
        assert_eq!(first, again);
    }

    #[test]
    fn test_scrambling_is_an_involution() {
        let seq = [1u8, 0, 1, 1];
        let mut bits = [0u8, 0, 1, 0];
        scramble_bits(&mut bits, &seq);
        assert_eq!(bits, [1, 0, 0, 1]);
        scramble_bits(&mut bits, &seq);
        assert_eq!(bits, [0, 0, 1, 0]);

        let mut llr = [1.0f32, -2.0, 3.0, 4.0];
        descramble_llr(&mut llr, &seq);
        assert_eq!(llr, [-1.0, -2.0, -3.0, -4.0]);
    }
}

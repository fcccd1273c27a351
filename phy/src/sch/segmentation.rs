//! Code block segmentation (TS 36.212 Section 5.1.2)

use super::qpp;
use common::CRC24_LEN;
use interfaces::{softbuffer::MAX_CB_SIZE, CoderError};

/// Segmentation of one transport block into turbo code blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segmentation {
    /// Transport block size without CRC (A)
    pub tbs: usize,
    /// Number of code blocks (C)
    pub nof_cb: usize,
    /// Larger code block size (K+)
    pub k_plus: usize,
    /// Smaller code block size (K-), 0 when unused
    pub k_minus: usize,
    /// Number of code blocks of size K- (C-)
    pub c_minus: usize,
    /// Filler bits prepended to the first code block (F)
    pub nof_filler: usize,
    /// CRC bits attached per code block (L)
    pub cb_crc_len: usize,
}

impl Segmentation {
    /// Segment a transport block of `tbs` bits
    pub fn new(tbs: u32) -> Result<Self, CoderError> {
        if tbs == 0 {
            return Err(CoderError::InvalidTbs(tbs));
        }
        let tbs = tbs as usize;
        let b = tbs + CRC24_LEN;

        let (nof_cb, cb_crc_len) = if b <= MAX_CB_SIZE {
            (1, 0)
        } else {
            let c = (b + MAX_CB_SIZE - CRC24_LEN - 1) / (MAX_CB_SIZE - CRC24_LEN);
            (c, CRC24_LEN)
        };
        let b_prime = b + nof_cb * cb_crc_len;
        let per_block = (b_prime + nof_cb - 1) / nof_cb;

        let idx_plus = qpp::ceil_index(per_block).ok_or(CoderError::InvalidTbs(tbs as u32))?;
        let k_plus = qpp::block_size(idx_plus).ok_or(CoderError::InvalidTbs(tbs as u32))?;

        let (k_minus, c_minus) = if nof_cb == 1 {
            (0, 0)
        } else {
            match qpp::floor_index_below(k_plus).and_then(qpp::block_size) {
                Some(k_minus) => {
                    let delta = k_plus - k_minus;
                    (k_minus, (nof_cb * k_plus - b_prime) / delta)
                }
                None => (0, 0),
            }
        };
        let c_plus = nof_cb - c_minus;
        let nof_filler = c_plus * k_plus + c_minus * k_minus - b_prime;

        Ok(Self {
            tbs,
            nof_cb,
            k_plus,
            k_minus,
            c_minus,
            nof_filler,
            cb_crc_len,
        })
    }

    /// Size K of code block `r`
    pub fn block_size(&self, r: usize) -> usize {
        if r < self.c_minus {
            self.k_minus
        } else {
            self.k_plus
        }
    }

    /// Filler bits at the start of code block `r`
    pub fn filler(&self, r: usize) -> usize {
        if r == 0 {
            self.nof_filler
        } else {
            0
        }
    }

    /// Transport block bits (including the TB CRC) carried by code block `r`
    pub fn payload_len(&self, r: usize) -> usize {
        self.block_size(r) - self.cb_crc_len - self.filler(r)
    }

    /// Rate-matched length E of code block `r` for `nof_bits` coded bits (Section 5.1.4.1.2)
    pub fn rate_matched_len(&self, r: usize, nof_bits: usize, nof_layers: usize, qm: usize) -> usize {
        let unit = nof_layers * qm;
        let g_prime = nof_bits / unit;
        let gamma = g_prime % self.nof_cb;
        let base = g_prime / self.nof_cb;
        if r + gamma < self.nof_cb {
            unit * base
        } else {
            unit * (base + 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block_with_filler() {
        let seg = Segmentation::new(16).unwrap();
        assert_eq!(seg.nof_cb, 1);
        assert_eq!(seg.k_plus, 40);
        assert_eq!(seg.nof_filler, 0);
        assert_eq!(seg.cb_crc_len, 0);

        let seg = Segmentation::new(8).unwrap();
        assert_eq!(seg.k_plus, 40);
        assert_eq!(seg.nof_filler, 8);
        assert_eq!(seg.payload_len(0), 32);
    }

    #[test]
    fn test_largest_single_block() {
        let seg = Segmentation::new(6120).unwrap();
        assert_eq!(seg.nof_cb, 1);
        assert_eq!(seg.k_plus, 6144);
        assert_eq!(seg.nof_filler, 0);
    }

    #[test]
    fn test_two_blocks() {
        // B = 6168 -> C = 2, B' = 6216, K+ = 3136, K- = 3072
        let seg = Segmentation::new(6144).unwrap();
        assert_eq!(seg.nof_cb, 2);
        assert_eq!(seg.k_plus, 3136);
        assert_eq!(seg.k_minus, 3072);
        assert_eq!(seg.c_minus, 0);
        assert_eq!(seg.nof_filler, 2 * 3136 - 6216);
        let total: usize = (0..seg.nof_cb).map(|r| seg.payload_len(r)).sum();
        assert_eq!(total, 6144 + 24);
    }

    #[test]
    fn test_payload_covers_transport_block() {
        for tbs in [1000u32, 12216, 25456, 75376] {
            let seg = Segmentation::new(tbs).unwrap();
            let total: usize = (0..seg.nof_cb).map(|r| seg.payload_len(r)).sum();
            assert_eq!(total, tbs as usize + 24, "tbs {}", tbs);
        }
        assert!(Segmentation::new(0).is_err());
    }

    #[test]
    fn test_rate_matched_lengths_sum() {
        let seg = Segmentation::new(25456).unwrap();
        let g = 30000;
        let total: usize = (0..seg.nof_cb).map(|r| seg.rate_matched_len(r, g, 1, 6)).sum();
        assert_eq!(total, g / 6 * 6);
    }
}

//! HARQ soft buffers
//!
//! Soft buffers are owned by the caller (one per UE, codeword and HARQ process) and passed
//! through the PDSCH engine to the channel coder untouched. Each buffer holds one slot per
//! code block, large enough for the three turbo output streams of the largest code block.

use common::NRE;
use tracing::trace;

/// Largest turbo code block size (K)
pub const MAX_CB_SIZE: usize = 6144;
/// Turbo trellis termination bits per output stream
pub const TURBO_TAIL_BITS: usize = 4;
/// Stream storage of one code block: three streams of K + 4 bits
pub const MAX_CODED_CB_LEN: usize = 3 * (MAX_CB_SIZE + TURBO_TAIL_BITS);

/// Upper bound of code blocks per transport block for a bandwidth
pub fn max_code_blocks(nof_prb: u32) -> usize {
    // Every RE of the subframe carrying 64QAM bounds the transport block size
    let max_bits = nof_prb as usize * NRE * 14 * 6;
    let payload_per_cb = MAX_CB_SIZE - 24;
    ((max_bits + payload_per_cb - 1) / payload_per_cb).max(1)
}

/// Transmit soft buffer: caches the turbo encoder output for retransmissions
#[derive(Debug, Default)]
pub struct SoftBufferTx {
    buffers: Vec<Vec<u8>>,
    cached_tbs: Option<u32>,
}

impl SoftBufferTx {
    /// Create a buffer sized for the largest transport block of a bandwidth
    pub fn new(nof_prb: u32) -> Self {
        Self::with_capacity(max_code_blocks(nof_prb), MAX_CODED_CB_LEN)
    }

    /// Create a buffer with an explicit number of code block slots
    pub fn with_capacity(nof_cb: usize, cb_len: usize) -> Self {
        Self {
            buffers: (0..nof_cb).map(|_| vec![0u8; cb_len]).collect(),
            cached_tbs: None,
        }
    }

    /// Forget the cached encoder output (new data)
    pub fn reset(&mut self) {
        trace!("Resetting tx soft buffer");
        self.cached_tbs = None;
    }

    /// Number of code block slots
    pub fn nof_code_blocks(&self) -> usize {
        self.buffers.len()
    }

    /// Transport block size whose encoder output is held, if any
    pub fn cached_tbs(&self) -> Option<u32> {
        self.cached_tbs
    }

    /// Record which transport block the buffer now holds
    pub fn set_cached_tbs(&mut self, tbs: Option<u32>) {
        self.cached_tbs = tbs;
    }

    /// Encoder output slot of one code block
    pub fn code_block(&self, idx: usize) -> Option<&[u8]> {
        self.buffers.get(idx).map(|b| b.as_slice())
    }

    /// Mutable encoder output slot of one code block
    pub fn code_block_mut(&mut self, idx: usize) -> Option<&mut [u8]> {
        self.buffers.get_mut(idx).map(|b| b.as_mut_slice())
    }
}

/// Receive soft buffer: accumulates soft bits across (re)transmissions
#[derive(Debug, Default)]
pub struct SoftBufferRx {
    buffers: Vec<Vec<f32>>,
}

impl SoftBufferRx {
    /// Create a buffer sized for the largest transport block of a bandwidth
    pub fn new(nof_prb: u32) -> Self {
        Self::with_capacity(max_code_blocks(nof_prb), MAX_CODED_CB_LEN)
    }

    /// Create a buffer with an explicit number of code block slots
    pub fn with_capacity(nof_cb: usize, cb_len: usize) -> Self {
        Self {
            buffers: (0..nof_cb).map(|_| vec![0.0f32; cb_len]).collect(),
        }
    }

    /// Clear all accumulated soft bits (new data)
    pub fn reset(&mut self) {
        trace!("Resetting rx soft buffer");
        for buffer in &mut self.buffers {
            buffer.fill(0.0);
        }
    }

    /// Number of code block slots
    pub fn nof_code_blocks(&self) -> usize {
        self.buffers.len()
    }

    /// Accumulated soft bits of one code block
    pub fn code_block(&self, idx: usize) -> Option<&[f32]> {
        self.buffers.get(idx).map(|b| b.as_slice())
    }

    /// Mutable accumulated soft bits of one code block
    pub fn code_block_mut(&mut self, idx: usize) -> Option<&mut [f32]> {
        self.buffers.get_mut(idx).map(|b| b.as_mut_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_code_blocks() {
        assert_eq!(max_code_blocks(6), 1);
        assert!(max_code_blocks(100) >= 16);
    }

    #[test]
    fn test_rx_reset_clears_soft_bits() {
        let mut buffer = SoftBufferRx::with_capacity(2, 8);
        buffer.code_block_mut(1).unwrap()[3] = 4.5;
        buffer.reset();
        assert!(buffer.code_block(1).unwrap().iter().all(|&v| v == 0.0));
        assert!(buffer.code_block(2).is_none());
    }

    #[test]
    fn test_tx_cache_marker() {
        let mut buffer = SoftBufferTx::with_capacity(1, 4);
        assert_eq!(buffer.cached_tbs(), None);
        buffer.set_cached_tbs(Some(1000));
        assert_eq!(buffer.cached_tbs(), Some(1000));
        buffer.reset();
        assert_eq!(buffer.cached_tbs(), None);
        assert_eq!(SoftBufferTx::default().nof_code_blocks(), 0);
    }
}

//! DL-SCH channel coder contract

use common::Modulation;

use crate::{CoderError, SoftBufferRx, SoftBufferTx};

/// Per-codeword parameters handed to the channel coder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodingParams {
    /// Transport block size in bits
    pub tbs: u32,
    /// Number of coded bits available to the codeword after rate matching (G)
    pub nof_bits: usize,
    /// Modulation order used on the codeword
    pub modulation: Modulation,
    /// Layers the codeword is rate matched for (2 for transmit diversity)
    pub nof_layers: usize,
    /// Redundancy version (0-3)
    pub rv: u32,
    /// Turbo decoder iteration budget per code block
    pub max_iterations: u32,
}

impl CodingParams {
    /// Size of the transport block in bytes
    pub fn tbs_bytes(&self) -> usize {
        (self.tbs as usize + 7) / 8
    }
}

/// Result of a decode attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeOutcome {
    /// Transport block CRC passed
    pub crc_ok: bool,
    /// Turbo iterations consumed (worst code block)
    pub iterations: u32,
}

/// Channel coder: CRC attachment, segmentation, turbo coding and rate matching
pub trait ChannelCoder: Send {
    /// Encode `data` (packed transport block) into `params.nof_bits` coded bits.
    fn encode(
        &mut self,
        params: &CodingParams,
        softbuffer: &mut SoftBufferTx,
        data: &[u8],
        coded_bits: &mut [u8],
    ) -> Result<(), CoderError>;

    /// Combine `llr` into the soft buffer and decode the transport block into `data`.
    ///
    /// Positive LLRs favour bit `0`. A CRC failure is reported through the outcome.
    fn decode(
        &mut self,
        params: &CodingParams,
        softbuffer: &mut SoftBufferRx,
        llr: &[f32],
        data: &mut [u8],
    ) -> Result<DecodeOutcome, CoderError>;
}

//! Downlink Shared Channel Coding
//!
//! Implements the DL-SCH transport channel processing of 3GPP TS 36.212 Section 5.3.2:
//! transport block CRC attachment, code block segmentation with per-block CRC, turbo
//! coding, rate matching and code block concatenation, plus the receive-side inverse with
//! HARQ soft combining and CRC-terminated turbo decoding.

pub mod qpp;
pub mod rate_match;
pub mod segmentation;
pub mod turbo;

use std::collections::{hash_map::Entry, HashMap};

use common::{crc24a, crc24b, pack_bits_into, read_crc24, unpack_bits_into, write_crc24, CRC24_LEN};
use interfaces::{
    softbuffer::MAX_CB_SIZE, ChannelCoder, CoderError, CodingParams, DecodeOutcome, SoftBufferRx,
    SoftBufferTx,
};
use tracing::{debug, trace};

use rate_match::CircularBuffer;
use segmentation::Segmentation;
use turbo::{stream_len, TurboDecoder};

/// Soft bit assigned to known filler bits
const FILLER_LLR: f32 = 1.0e4;

/// QPP permutation of a block size, built on first use
fn permutation(permutations: &mut HashMap<usize, Vec<usize>>, k: usize) -> Result<&[usize], CoderError> {
    match permutations.entry(k) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let perm = qpp::permutation(k)
                .ok_or_else(|| CoderError::InvalidParams(format!("No QPP interleaver for K={}", k)))?;
            Ok(entry.insert(perm))
        }
    }
}

/// CRC check of a decoded code block of K bits starting with `filler` filler bits
fn code_block_crc_ok(seg: &Segmentation, bits: &[u8], filler: usize) -> bool {
    if seg.cb_crc_len > 0 {
        let n = bits.len() - CRC24_LEN;
        crc24b(&bits[..n]) == read_crc24(&bits[n..])
    } else {
        // Single code block: the transport block CRC covers it
        let bits = &bits[filler..];
        let n = bits.len() - CRC24_LEN;
        crc24a(&bits[..n]) == read_crc24(&bits[n..])
    }
}

/// DL-SCH encoder/decoder with scratch buffers for the largest code block
#[derive(Debug)]
pub struct DlSch {
    /// QPP permutations, built on first use of a block size
    permutations: HashMap<usize, Vec<usize>>,
    decoder: TurboDecoder,
    circular: CircularBuffer,
    /// Transport block bits followed by the TB CRC
    tb_bits: Vec<u8>,
    /// Bits of the code block being processed
    cb_bits: Vec<u8>,
    /// Soft bits of the code block being decoded
    cb_llr: Vec<f32>,
}

impl DlSch {
    pub fn new() -> Self {
        Self {
            permutations: HashMap::new(),
            decoder: TurboDecoder::new(MAX_CB_SIZE),
            circular: CircularBuffer::with_capacity(stream_len(MAX_CB_SIZE)),
            tb_bits: Vec::new(),
            cb_bits: vec![0u8; MAX_CB_SIZE],
            cb_llr: vec![0.0f32; 3 * stream_len(MAX_CB_SIZE)],
        }
    }

    fn validate(params: &CodingParams, data_len: usize, nof_slots: usize) -> Result<Segmentation, CoderError> {
        if params.tbs == 0 || params.tbs % 8 != 0 {
            return Err(CoderError::InvalidTbs(params.tbs));
        }
        if params.rv > 3 {
            return Err(CoderError::InvalidParams(format!("Invalid redundancy version {}", params.rv)));
        }
        if params.nof_layers == 0 {
            return Err(CoderError::InvalidParams("Zero layers".to_string()));
        }
        if data_len < params.tbs_bytes() {
            return Err(CoderError::BufferTooSmall {
                needed: params.tbs_bytes(),
                available: data_len,
            });
        }
        let seg = Segmentation::new(params.tbs)?;
        if seg.nof_cb > nof_slots {
            return Err(CoderError::SoftBufferTooSmall {
                needed: seg.nof_cb,
                available: nof_slots,
            });
        }
        Ok(seg)
    }

    /// Fill `cb_bits[..K]` with code block `r` of the transport block
    fn assemble_code_block(&mut self, seg: &Segmentation, r: usize, tb_offset: usize) {
        let k = seg.block_size(r);
        let filler = seg.filler(r);
        let payload = seg.payload_len(r);
        self.cb_bits[..filler].fill(0);
        self.cb_bits[filler..filler + payload].copy_from_slice(&self.tb_bits[tb_offset..tb_offset + payload]);
        if seg.cb_crc_len > 0 {
            let crc = crc24b(&self.cb_bits[..k - CRC24_LEN]);
            write_crc24(crc, &mut self.cb_bits[k - CRC24_LEN..k]);
        }
    }
}

impl Default for DlSch {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelCoder for DlSch {
    fn encode(
        &mut self,
        params: &CodingParams,
        softbuffer: &mut SoftBufferTx,
        data: &[u8],
        coded_bits: &mut [u8],
    ) -> Result<(), CoderError> {
        let seg = Self::validate(params, data.len(), softbuffer.nof_code_blocks())?;
        if coded_bits.len() < params.nof_bits {
            return Err(CoderError::BufferTooSmall {
                needed: params.nof_bits,
                available: coded_bits.len(),
            });
        }
        let qm = params.modulation.bits_per_symbol();

        let reuse = params.rv != 0 && softbuffer.cached_tbs() == Some(params.tbs);
        if !reuse {
            softbuffer.set_cached_tbs(None);
            let a = params.tbs as usize;
            self.tb_bits.resize(a + CRC24_LEN, 0);
            unpack_bits_into(data, a, &mut self.tb_bits[..a]);
            let crc = crc24a(&self.tb_bits[..a]);
            write_crc24(crc, &mut self.tb_bits[a..]);

            let mut tb_offset = 0;
            for r in 0..seg.nof_cb {
                let k = seg.block_size(r);
                self.assemble_code_block(&seg, r, tb_offset);
                tb_offset += seg.payload_len(r);

                let perm = permutation(&mut self.permutations, k)?;
                let slot = softbuffer.code_block_mut(r).ok_or(CoderError::SoftBufferTooSmall {
                    needed: seg.nof_cb,
                    available: r,
                })?;
                let needed = 3 * stream_len(k);
                if slot.len() < needed {
                    return Err(CoderError::BufferTooSmall {
                        needed,
                        available: slot.len(),
                    });
                }
                turbo::encode(&self.cb_bits[..k], perm, &mut slot[..needed]);
            }
            softbuffer.set_cached_tbs(Some(params.tbs));
        } else {
            trace!("Reusing cached encoder output for TBS {}", params.tbs);
        }

        let mut offset = 0;
        for r in 0..seg.nof_cb {
            let k = seg.block_size(r);
            let e = seg.rate_matched_len(r, params.nof_bits, params.nof_layers, qm);
            self.circular.build(stream_len(k), seg.filler(r));
            let slot = softbuffer.code_block(r).ok_or(CoderError::SoftBufferTooSmall {
                needed: seg.nof_cb,
                available: r,
            })?;
            self.circular.select(slot, params.rv, &mut coded_bits[offset..offset + e]);
            offset += e;
        }
        // Bits left over by the E split are not transmitted
        coded_bits[offset..params.nof_bits].fill(0);

        debug!(
            "DL-SCH encoded TBS={} C={} K+={} F={} G={} rv={}",
            params.tbs, seg.nof_cb, seg.k_plus, seg.nof_filler, params.nof_bits, params.rv
        );
        Ok(())
    }

    fn decode(
        &mut self,
        params: &CodingParams,
        softbuffer: &mut SoftBufferRx,
        llr: &[f32],
        data: &mut [u8],
    ) -> Result<DecodeOutcome, CoderError> {
        let seg = Self::validate(params, data.len(), softbuffer.nof_code_blocks())?;
        if llr.len() < params.nof_bits {
            return Err(CoderError::BufferTooSmall {
                needed: params.nof_bits,
                available: llr.len(),
            });
        }
        let qm = params.modulation.bits_per_symbol();
        let max_iterations = params.max_iterations.max(1);

        let a = params.tbs as usize;
        self.tb_bits.resize(a + CRC24_LEN, 0);

        let mut offset = 0;
        let mut tb_offset = 0;
        let mut iterations = 0;
        for r in 0..seg.nof_cb {
            let k = seg.block_size(r);
            let len = stream_len(k);
            let filler = seg.filler(r);
            let e = seg.rate_matched_len(r, params.nof_bits, params.nof_layers, qm);

            let slot = softbuffer.code_block_mut(r).ok_or(CoderError::SoftBufferTooSmall {
                needed: seg.nof_cb,
                available: r,
            })?;
            if slot.len() < 3 * len {
                return Err(CoderError::BufferTooSmall {
                    needed: 3 * len,
                    available: slot.len(),
                });
            }
            // A new transmission starts the combining over
            if params.rv == 0 {
                slot[..3 * len].fill(0.0);
            }
            self.circular.build(len, filler);
            self.circular.accumulate(&llr[offset..offset + e], params.rv, &mut slot[..3 * len]);
            offset += e;

            self.cb_llr[..3 * len].copy_from_slice(&slot[..3 * len]);
            self.cb_llr[..filler].fill(FILLER_LLR);
            self.cb_llr[len..len + filler].fill(FILLER_LLR);

            let perm = permutation(&mut self.permutations, k)?;
            self.decoder.reset(k);
            let mut used = max_iterations;
            for iteration in 1..=max_iterations {
                self.decoder.iterate(&self.cb_llr[..3 * len], perm);
                self.decoder.decide(&mut self.cb_bits[..k]);
                if code_block_crc_ok(&seg, &self.cb_bits[..k], filler) {
                    used = iteration;
                    break;
                }
            }
            trace!("Code block {} K={} decoded in {} iterations", r, k, used);
            iterations = iterations.max(used);

            let payload = seg.payload_len(r);
            self.tb_bits[tb_offset..tb_offset + payload].copy_from_slice(&self.cb_bits[filler..filler + payload]);
            tb_offset += payload;
        }

        let crc_ok = crc24a(&self.tb_bits[..a]) == read_crc24(&self.tb_bits[a..]);
        pack_bits_into(&self.tb_bits[..a], &mut data[..params.tbs_bytes()]);

        debug!(
            "DL-SCH decoded TBS={} C={} rv={} crc_ok={} iterations={}",
            params.tbs, seg.nof_cb, params.rv, crc_ok, iterations
        );
        Ok(DecodeOutcome { crc_ok, iterations })
    }
}

//! Single-codeword PDSCH processing
//!
//! A pipeline owns the per-codeword staging buffers and channel coder and runs one
//! codeword through coding, scrambling and modulation (or the inverse). Pipelines are
//! handed to worker threads by value together with their task, so everything a task
//! touches travels with it.

use std::sync::Arc;

use common::bytes_to_hex;
use interfaces::{
    ChannelCoder, CodingParams, DecodeOutcome, Modulator, SoftBufferRx, SoftBufferTx, SoftDemodulator,
};
use num_complex::Complex32;
use tracing::{trace, warn};

use super::scrambling::{descramble_llr, scramble_bits};
use crate::modem::ModemTables;
use crate::PhyError;

/// Encode job of one codeword; the transport block is staged in the pipeline
#[derive(Debug)]
pub struct EncodeJob {
    pub params: CodingParams,
    pub softbuffer: SoftBufferTx,
    pub sequence: Arc<[u8]>,
    pub nof_symbols: usize,
}

/// Decode job of one codeword; layer-demapped symbols are staged in the pipeline
#[derive(Debug)]
pub struct DecodeJob {
    pub params: CodingParams,
    pub softbuffer: SoftBufferRx,
    pub sequence: Arc<[u8]>,
    pub nof_symbols: usize,
    pub noise_estimate: f32,
}

#[derive(Debug)]
pub enum Task {
    Encode(EncodeJob),
    Decode(DecodeJob),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutput {
    Encoded,
    Decoded(DecodeOutcome),
}

/// Buffers and coder of one codeword
pub struct CodewordPipeline {
    index: usize,
    coder: Box<dyn ChannelCoder>,
    modem: Arc<ModemTables>,
    /// Transport block bytes (encode input, decode output)
    data: Vec<u8>,
    bits: Vec<u8>,
    llr: Vec<f32>,
    symbols: Vec<Complex32>,
}

impl CodewordPipeline {
    /// Pipeline for up to `max_re` symbols
    pub fn new(index: usize, max_re: usize, coder: Box<dyn ChannelCoder>, modem: Arc<ModemTables>) -> Self {
        let max_bits = max_re * 6;
        Self {
            index,
            coder,
            modem,
            data: vec![0u8; max_bits / 8 + 1],
            bits: vec![0u8; max_bits],
            llr: vec![0.0f32; max_bits],
            symbols: vec![Complex32::new(0.0, 0.0); max_re],
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Stage a transport block for encoding
    pub fn load_data(&mut self, data: &[u8]) -> Result<(), PhyError> {
        let available = self.data.len();
        let dst = self.data.get_mut(..data.len()).ok_or(PhyError::BufferTooSmall {
            needed: data.len(),
            available,
        })?;
        dst.copy_from_slice(data);
        Ok(())
    }

    /// Decoded transport block bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn symbols(&self) -> &[Complex32] {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut [Complex32] {
        &mut self.symbols
    }

    /// Execute a task on this pipeline
    pub fn run(&mut self, task: &mut Task) -> Result<TaskOutput, PhyError> {
        match task {
            Task::Encode(job) => self.encode(job).map(|_| TaskOutput::Encoded),
            Task::Decode(job) => self.decode(job).map(TaskOutput::Decoded),
        }
    }

    fn check_sizes(&self, params: &CodingParams, nof_symbols: usize, sequence: &[u8]) -> Result<(), PhyError> {
        let needed_bits = params.nof_bits;
        let limits = [
            (params.tbs_bytes(), self.data.len()),
            (needed_bits, self.bits.len()),
            (needed_bits, sequence.len()),
            (nof_symbols, self.symbols.len()),
            (nof_symbols * params.modulation.bits_per_symbol(), needed_bits),
        ];
        for (needed, available) in limits {
            if needed > available {
                return Err(PhyError::BufferTooSmall { needed, available });
            }
        }
        Ok(())
    }

    fn encode(&mut self, job: &mut EncodeJob) -> Result<(), PhyError> {
        let params = job.params;
        self.check_sizes(&params, job.nof_symbols, &job.sequence)?;
        let nof_bits = params.nof_bits;

        self.coder
            .encode(&params, &mut job.softbuffer, &self.data[..params.tbs_bytes()], &mut self.bits[..nof_bits])?;
        scramble_bits(&mut self.bits[..nof_bits], &job.sequence[..nof_bits]);

        let modulator = self.modem.get(params.modulation);
        let n = modulator.modulate(&self.bits[..nof_bits], &mut self.symbols[..job.nof_symbols]);
        if n != job.nof_symbols {
            return Err(PhyError::BufferTooSmall {
                needed: job.nof_symbols,
                available: n,
            });
        }

        trace!(
            "Encoded codeword {}: TBS={} G={} symbols={} rv={}",
            self.index,
            params.tbs,
            nof_bits,
            n,
            params.rv
        );
        Ok(())
    }

    fn decode(&mut self, job: &mut DecodeJob) -> Result<DecodeOutcome, PhyError> {
        let params = job.params;
        self.check_sizes(&params, job.nof_symbols, &job.sequence)?;
        let nof_bits = params.nof_bits;

        let demodulator = self.modem.get(params.modulation);
        let n = demodulator.demodulate(
            &self.symbols[..job.nof_symbols],
            job.noise_estimate,
            &mut self.llr[..nof_bits],
        );
        if n != nof_bits {
            return Err(PhyError::BufferTooSmall {
                needed: nof_bits,
                available: n,
            });
        }
        descramble_llr(&mut self.llr[..nof_bits], &job.sequence[..nof_bits]);

        let outcome = self.coder.decode(
            &params,
            &mut job.softbuffer,
            &self.llr[..nof_bits],
            &mut self.data[..params.tbs_bytes()],
        )?;

        if outcome.crc_ok {
            trace!(
                "Decoded codeword {}: TBS={} iterations={} data={}",
                self.index,
                params.tbs,
                outcome.iterations,
                bytes_to_hex(&self.data[..params.tbs_bytes().min(8)])
            );
        } else {
            warn!(
                "CRC failed on codeword {}: TBS={} rv={} iterations={}",
                self.index, params.tbs, params.rv, outcome.iterations
            );
        }
        Ok(outcome)
    }
}

//! Physical Downlink Shared Channel
//!
//! Implements the PDSCH engine of 3GPP TS 36.211 Section 6.4 / TS 36.213 Section 7.1:
//! transport blocks in, per-port subframe grids out (and the inverse), for one or two
//! codewords with single antenna, transmit diversity, closed-loop spatial multiplexing
//! and large delay CDD transmission.

pub mod codeword;
pub mod config;
pub mod re_map;
pub mod ri_pmi;
pub mod scrambling;
pub mod stats;
pub mod workers;

use std::mem;
use std::sync::Arc;

use common::{Cell, MimoType, Rnti, MAX_CODEWORDS, MAX_LAYERS, MAX_PORTS};
use interfaces::{ChannelCoder, DecodeOutcome, SequenceGenerator, SoftBufferRx, SoftBufferTx};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::mimo;
use crate::modem::ModemTables;
use crate::sch::DlSch;
use crate::sequence::PdschSequence;
use crate::PhyError;

pub use codeword::{CodewordPipeline, DecodeJob, EncodeJob, Task, TaskOutput};
pub use config::{cfg, cfg_multi, coderate, CodewordCfg, Grant, PdschCfg, TransportBlock, MAX_CODERATE};
pub use re_map::ReMapping;
pub use ri_pmi::{RiPmiSelection, PMI_SELECT_STRIDE, RI_RANK1_MARGIN};
pub use scrambling::{ScramblingCache, SequenceSlot};
pub use stats::{DecodeStats, DEFAULT_MAX_ITERATIONS};
pub use workers::{CodewordResults, Concurrency, Orchestrator};

/// Engine options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdschOptions {
    #[serde(default)]
    pub concurrency: Concurrency,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn dl_sch(_codeword: usize) -> Box<dyn ChannelCoder> {
    Box::new(DlSch::new())
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl Default for PdschOptions {
    fn default() -> Self {
        Self {
            concurrency: Concurrency::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Per-codeword statuses of a multi-codeword call
#[derive(Debug, Clone, PartialEq)]
pub struct CodewordReport<T> {
    pub results: [Option<Result<T, PhyError>>; MAX_CODEWORDS],
}

impl<T: Clone> CodewordReport<T> {
    /// Status of one codeword, `None` if it was not part of the call
    pub fn get(&self, codeword: usize) -> Option<&Result<T, PhyError>> {
        self.results.get(codeword).and_then(|r| r.as_ref())
    }

    /// Error of the first failing codeword in index order
    pub fn first_error(&self) -> Option<&PhyError> {
        self.results
            .iter()
            .flatten()
            .find_map(|r| r.as_ref().err())
    }

    /// Aggregate status: the first failing codeword dominates
    pub fn status(&self) -> Result<(), PhyError> {
        match self.first_error() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Per-codeword values, or the first codeword error
    pub fn into_result(self) -> Result<[Option<T>; MAX_CODEWORDS], PhyError> {
        self.status()?;
        let [a, b] = self.results;
        Ok([a.and_then(|r| r.ok()), b.and_then(|r| r.ok())])
    }

    fn into_single(self) -> Result<T, PhyError> {
        let [first, _] = self.results;
        first.unwrap_or(Err(PhyError::InvalidCodeword(0)))
    }
}

/// PDSCH encoder/decoder bound to one cell
pub struct Pdsch {
    cell: Cell,
    is_tx: bool,
    nof_rx: usize,
    max_re: usize,
    scrambling: ScramblingCache,
    orchestrator: Orchestrator,
    stats: DecodeStats,
    /// Layer-mapped symbols, `[layer][re]`
    layers: Vec<Vec<Complex32>>,
    /// Precoded symbols, `[port][re]`
    precoded: Vec<Vec<Complex32>>,
    /// Extracted received symbols, `[rx][re]`
    rx_symbols: Vec<Vec<Complex32>>,
    /// Extracted channel estimates, `[port][rx][re]`
    rx_ce: Vec<Vec<Vec<Complex32>>>,
}

impl Pdsch {
    /// Transmit and receive engine with one receive antenna
    pub fn new(cell: Cell, options: PdschOptions) -> Result<Self, PhyError> {
        Self::build(cell, true, 1, options, dl_sch, Box::new(PdschSequence))
    }

    /// Transmit-only engine
    pub fn new_tx(cell: Cell, options: PdschOptions) -> Result<Self, PhyError> {
        Self::build(cell, true, 0, options, dl_sch, Box::new(PdschSequence))
    }

    /// Receive-only engine with `nof_rx` antennas
    pub fn new_rx(cell: Cell, nof_rx: usize, options: PdschOptions) -> Result<Self, PhyError> {
        if nof_rx == 0 {
            return Err(PhyError::InvalidConfiguration("A receiver needs at least one antenna".to_string()));
        }
        Self::build(cell, false, nof_rx, options, dl_sch, Box::new(PdschSequence))
    }

    /// Transmit and receive engine with caller-supplied collaborators
    pub fn with_collaborators<F>(
        cell: Cell,
        nof_rx: usize,
        options: PdschOptions,
        coder_factory: F,
        generator: Box<dyn SequenceGenerator>,
    ) -> Result<Self, PhyError>
    where
        F: FnMut(usize) -> Box<dyn ChannelCoder>,
    {
        Self::build(cell, true, nof_rx, options, coder_factory, generator)
    }

    fn build<F>(
        cell: Cell,
        is_tx: bool,
        nof_rx: usize,
        options: PdschOptions,
        mut coder_factory: F,
        generator: Box<dyn SequenceGenerator>,
    ) -> Result<Self, PhyError>
    where
        F: FnMut(usize) -> Box<dyn ChannelCoder>,
    {
        cell.validate()
            .map_err(|e| PhyError::InvalidConfiguration(format!("Invalid cell: {}", e)))?;
        if nof_rx > MAX_PORTS {
            return Err(PhyError::InvalidConfiguration(format!(
                "At most {} receive antennas are supported, got {}",
                MAX_PORTS, nof_rx
            )));
        }

        let max_re = re_map::max_re(&cell);
        let modem = Arc::new(ModemTables::new());
        let pipelines = (0..MAX_CODEWORDS)
            .map(|cw| CodewordPipeline::new(cw, max_re, coder_factory(cw), Arc::clone(&modem)))
            .collect();
        let orchestrator = Orchestrator::new(pipelines, options.concurrency)?;

        let zeros = |n: usize| vec![Complex32::new(0.0, 0.0); n];
        let (layers, precoded) = if is_tx {
            (
                (0..MAX_LAYERS).map(|_| zeros(max_re)).collect(),
                (0..MAX_PORTS).map(|_| zeros(max_re)).collect(),
            )
        } else {
            ((0..MAX_LAYERS).map(|_| zeros(max_re)).collect(), Vec::new())
        };
        let rx_symbols = (0..nof_rx).map(|_| zeros(max_re)).collect();
        let rx_ce = if nof_rx > 0 {
            (0..MAX_PORTS)
                .map(|_| (0..nof_rx).map(|_| zeros(max_re)).collect())
                .collect()
        } else {
            Vec::new()
        };

        info!(
            "PDSCH engine ready: {} PRB, {} ports, PCI {}, tx={}, rx antennas={}, {:?}",
            cell.nof_prb, cell.nof_ports, cell.id.0, is_tx, nof_rx, options.concurrency
        );

        Ok(Self {
            cell,
            is_tx,
            nof_rx,
            max_re,
            scrambling: ScramblingCache::new(cell.id, max_re * 6, generator),
            orchestrator,
            stats: DecodeStats::new(options.max_iterations),
            layers,
            precoded,
            rx_symbols,
            rx_ce,
        })
    }

    /// Stop the workers and release the engine
    pub fn free(mut self) {
        self.orchestrator.shutdown();
        info!("PDSCH engine released");
    }

    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    pub fn nof_rx_antennas(&self) -> usize {
        self.nof_rx
    }

    pub fn concurrency(&self) -> Concurrency {
        self.orchestrator.concurrency()
    }

    /// Bind an RNTI so its scrambling sequences are cached
    pub fn set_rnti(&mut self, rnti: Rnti) {
        self.scrambling.set_rnti(rnti);
    }

    pub fn free_rnti(&mut self, rnti: Rnti) {
        self.scrambling.free_rnti(rnti);
    }

    /// Number of scrambling sequences generated so far
    pub fn scrambling_generations(&self) -> u64 {
        self.scrambling.generations()
    }

    pub fn set_max_iterations(&mut self, max_iterations: u32) {
        self.stats.set_max_iterations(max_iterations);
    }

    pub fn max_iterations(&self) -> u32 {
        self.stats.max_iterations()
    }

    /// Mean turbo iterations per decoded codeword
    pub fn average_iterations(&self) -> f32 {
        self.stats.average()
    }

    /// Turbo iterations of the last decoded codeword
    pub fn last_iterations(&self) -> u32 {
        self.stats.last()
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Antenna ports carrying the transmission
    fn nof_tx_ports(&self, cfg: &PdschCfg) -> usize {
        match cfg.mimo {
            MimoType::SingleAntenna => 1,
            _ => self.cell.nof_ports as usize,
        }
    }

    /// REs occupied on each port after precoding
    fn nof_precoded_re(cfg: &PdschCfg) -> usize {
        match cfg.mimo {
            MimoType::TxDiversity => cfg.nof_re / cfg.nof_layers * cfg.nof_layers,
            _ => cfg.nof_re,
        }
    }

    /// Checks shared by both directions, returns the codeword count
    fn check_cfg(&self, cfg: &PdschCfg, nof_softbuffers: usize, nof_data: usize) -> Result<usize, PhyError> {
        let nof_cw = cfg.nof_codewords();
        if nof_cw == 0 || cfg.codewords[..nof_cw].iter().any(|cw| cw.is_none()) {
            return Err(PhyError::InvalidConfiguration("Configuration carries no leading codeword".to_string()));
        }
        if cfg.nof_re == 0 || cfg.nof_re > self.max_re {
            return Err(PhyError::InvalidConfiguration(format!(
                "RE count {} outside 1..={}",
                cfg.nof_re, self.max_re
            )));
        }
        if cfg.nof_layers == 0 || cfg.nof_layers > MAX_LAYERS {
            return Err(PhyError::InvalidConfiguration(format!("Invalid layer count {}", cfg.nof_layers)));
        }
        let ports = self.cell.nof_ports as usize;
        let supported = match cfg.mimo {
            MimoType::SingleAntenna => cfg.nof_layers == 1 && nof_cw == 1,
            MimoType::TxDiversity => cfg.nof_layers == ports && ports >= 2 && nof_cw == 1,
            MimoType::SpatialMultiplexing => ports == 2 && cfg.nof_layers == nof_cw,
            MimoType::Cdd => ports == 2 && cfg.nof_layers == 2 && nof_cw == 2,
        };
        if !supported {
            return Err(PhyError::InvalidConfiguration(format!(
                "{:?} with {} layers and {} codewords does not fit a {}-port cell",
                cfg.mimo, cfg.nof_layers, nof_cw, ports
            )));
        }
        let mapped = ReMapping::new(&self.cell, &cfg.grant.prb_mask, cfg.cfi, cfg.sf_idx).count();
        if cfg.nof_re != mapped {
            return Err(PhyError::InvalidConfiguration(format!(
                "RE count {} does not match the {} REs of the allocation",
                cfg.nof_re, mapped
            )));
        }
        let nof_symbols = cfg.codeword(0)?.nof_symbols;
        let max_symbols = Self::nof_precoded_re(cfg);
        for cw in 0..nof_cw {
            let cw_cfg = cfg.codeword(cw)?;
            if cw_cfg.nof_symbols == 0 || cw_cfg.nof_symbols > max_symbols || cw_cfg.nof_symbols != nof_symbols {
                return Err(PhyError::InvalidConfiguration(format!(
                    "Codeword {} carries {} symbols, expected {} within {} REs",
                    cw, cw_cfg.nof_symbols, nof_symbols, max_symbols
                )));
            }
            let expected_bits = cw_cfg.nof_symbols * cw_cfg.modulation.bits_per_symbol();
            if cw_cfg.nof_bits != expected_bits {
                return Err(PhyError::InvalidConfiguration(format!(
                    "Codeword {} carries {} bits, {} symbols of {:?} need {}",
                    cw, cw_cfg.nof_bits, cw_cfg.nof_symbols, cw_cfg.modulation, expected_bits
                )));
            }
            if cw_cfg.tbs == 0 || cw_cfg.tbs % 8 != 0 {
                return Err(PhyError::InvalidConfiguration(format!(
                    "Transport block size {} of codeword {} is not a whole number of bytes",
                    cw_cfg.tbs, cw
                )));
            }
        }
        if nof_softbuffers < nof_cw {
            return Err(PhyError::InvalidCodeword(nof_softbuffers));
        }
        if nof_data < nof_cw {
            return Err(PhyError::InvalidCodeword(nof_data));
        }
        Ok(nof_cw)
    }

    /// Encode one transport block onto the subframe grids `sf_symbols[port]`
    pub fn encode(
        &mut self,
        cfg: &PdschCfg,
        softbuffer: &mut SoftBufferTx,
        data: &[u8],
        rnti: Rnti,
        sf_symbols: &mut [&mut [Complex32]],
    ) -> Result<(), PhyError> {
        if cfg.nof_codewords() != 1 {
            return Err(PhyError::InvalidConfiguration(format!(
                "Single codeword encode with {} codewords configured",
                cfg.nof_codewords()
            )));
        }
        self.encode_multi(cfg, std::slice::from_mut(softbuffer), &[data], rnti, sf_symbols)?
            .into_single()
    }

    /// Encode one or two transport blocks onto the subframe grids `sf_symbols[port]`
    ///
    /// Call-level errors are returned before any buffer is touched; per-codeword
    /// statuses are reported individually. Grids are written only when every codeword
    /// succeeded.
    /// A codeword whose worker died mid-call reports `SoftBufferLost` and leaves an
    /// empty soft buffer in its slot.
    pub fn encode_multi(
        &mut self,
        cfg: &PdschCfg,
        softbuffers: &mut [SoftBufferTx],
        data: &[&[u8]],
        rnti: Rnti,
        sf_symbols: &mut [&mut [Complex32]],
    ) -> Result<CodewordReport<()>, PhyError> {
        if !self.is_tx {
            return Err(PhyError::InvalidConfiguration("Engine was built without a transmitter".to_string()));
        }
        let nof_cw = self.check_cfg(cfg, softbuffers.len(), data.len())?;
        let nof_ports = self.nof_tx_ports(cfg);
        let grid_len = self.cell.subframe_len();
        if sf_symbols.len() < nof_ports {
            return Err(PhyError::BufferTooSmall {
                needed: nof_ports,
                available: sf_symbols.len(),
            });
        }
        for grid in sf_symbols.iter().take(nof_ports) {
            if grid.len() < grid_len {
                return Err(PhyError::BufferTooSmall {
                    needed: grid_len,
                    available: grid.len(),
                });
            }
        }
        for (cw, tb) in data.iter().enumerate().take(nof_cw) {
            let needed = cfg.codeword(cw)?.coding_params(0).tbs_bytes();
            if tb.len() < needed {
                return Err(PhyError::BufferTooSmall {
                    needed,
                    available: tb.len(),
                });
            }
        }

        debug!(
            "PDSCH encode rnti={} sf={} {:?} layers={} codewords={} nof_re={}",
            rnti, cfg.sf_idx, cfg.mimo, cfg.nof_layers, nof_cw, cfg.nof_re
        );

        // Sequences and staging on the calling thread, before any worker runs
        let max_iterations = self.stats.max_iterations();
        let mut tasks: [Option<Task>; MAX_CODEWORDS] = Default::default();
        for cw in 0..nof_cw {
            let cw_cfg = *cfg.codeword(cw)?;
            let params = cw_cfg.coding_params(max_iterations);
            let sequence = self.scrambling.sequence(rnti, cw, cfg.sf_idx);
            self.orchestrator
                .pipeline_mut(cw)?
                .load_data(&data[cw][..params.tbs_bytes()])?;
            tasks[cw] = Some(Task::Encode(EncodeJob {
                params,
                softbuffer: mem::take(&mut softbuffers[cw]),
                sequence,
                nof_symbols: cw_cfg.nof_symbols,
            }));
        }

        let mut results = self.orchestrator.run(&mut tasks);
        restore_softbuffers(&mut tasks, &mut softbuffers[..nof_cw], &mut results, |task| match task {
            Task::Encode(job) => Some(job.softbuffer),
            _ => None,
        });

        let report = CodewordReport {
            results: results.map(|r| r.map(|r| r.map(|_| ()))),
        };
        if report.first_error().is_none() {
            self.map_layers(cfg, nof_cw, nof_ports, sf_symbols)?;
        }
        Ok(report)
    }

    /// Layer mapping, precoding and RE mapping of the encoded codewords
    fn map_layers(
        &mut self,
        cfg: &PdschCfg,
        nof_cw: usize,
        nof_ports: usize,
        sf_symbols: &mut [&mut [Complex32]],
    ) -> Result<(), PhyError> {
        let nof_symbols = cfg.codeword(0)?.nof_symbols;
        let d: Vec<&[Complex32]> = self
            .orchestrator
            .symbols(nof_cw)?
            .into_iter()
            .map(|s| &s[..nof_symbols])
            .collect();
        let per_layer = mimo::layer_map(cfg.mimo, cfg.nof_layers, &d, &mut self.layers);
        let used = mimo::precode(
            cfg.mimo,
            nof_ports,
            cfg.nof_layers,
            cfg.codebook_idx,
            &self.layers,
            per_layer,
            &mut self.precoded,
        );

        let mapping = ReMapping::new(&self.cell, &cfg.grant.prb_mask, cfg.cfi, cfg.sf_idx);
        for (port, grid) in sf_symbols.iter_mut().enumerate().take(nof_ports) {
            let symbols = &mut self.precoded[port][..cfg.nof_re];
            symbols[used..].fill(Complex32::new(0.0, 0.0));
            mapping.put(symbols, grid);
        }
        Ok(())
    }

    /// Decode one transport block
    ///
    /// `sf_symbols` holds one received grid per antenna, `ce[port][rx]` the channel
    /// estimate grids.
    #[allow(clippy::too_many_arguments)]
    pub fn decode(
        &mut self,
        cfg: &PdschCfg,
        softbuffer: &mut SoftBufferRx,
        sf_symbols: &[&[Complex32]],
        ce: &[&[&[Complex32]]],
        noise_estimate: f32,
        rnti: Rnti,
        data: &mut [u8],
    ) -> Result<DecodeOutcome, PhyError> {
        if cfg.nof_codewords() != 1 {
            return Err(PhyError::InvalidConfiguration(format!(
                "Single codeword decode with {} codewords configured",
                cfg.nof_codewords()
            )));
        }
        let mut outputs = [data];
        self.decode_multi(
            cfg,
            std::slice::from_mut(softbuffer),
            sf_symbols,
            ce,
            noise_estimate,
            rnti,
            &mut outputs,
        )?
        .into_single()
    }

    /// Decode one or two transport blocks into `data[cw]`
    ///
    /// Soft buffers follow the same hand-back rules as [`Pdsch::encode_multi`].
    #[allow(clippy::too_many_arguments)]
    pub fn decode_multi(
        &mut self,
        cfg: &PdschCfg,
        softbuffers: &mut [SoftBufferRx],
        sf_symbols: &[&[Complex32]],
        ce: &[&[&[Complex32]]],
        noise_estimate: f32,
        rnti: Rnti,
        data: &mut [&mut [u8]],
    ) -> Result<CodewordReport<DecodeOutcome>, PhyError> {
        if self.nof_rx == 0 {
            return Err(PhyError::InvalidConfiguration("Engine was built without a receiver".to_string()));
        }
        let nof_cw = self.check_cfg(cfg, softbuffers.len(), data.len())?;
        let nof_ports = self.nof_tx_ports(cfg);
        let nof_rx = self.nof_rx;
        let grid_len = self.cell.subframe_len();
        if !noise_estimate.is_finite() || noise_estimate < 0.0 {
            return Err(PhyError::InvalidConfiguration(format!(
                "Invalid noise estimate {}",
                noise_estimate
            )));
        }
        if sf_symbols.len() < nof_rx {
            return Err(PhyError::BufferTooSmall {
                needed: nof_rx,
                available: sf_symbols.len(),
            });
        }
        if ce.len() < nof_ports {
            return Err(PhyError::BufferTooSmall {
                needed: nof_ports,
                available: ce.len(),
            });
        }
        for per_rx in ce.iter().take(nof_ports) {
            if per_rx.len() < nof_rx {
                return Err(PhyError::BufferTooSmall {
                    needed: nof_rx,
                    available: per_rx.len(),
                });
            }
        }
        let grids = sf_symbols
            .iter()
            .take(nof_rx)
            .chain(ce.iter().take(nof_ports).flat_map(|per_rx| per_rx.iter().take(nof_rx)));
        for grid in grids {
            if grid.len() < grid_len {
                return Err(PhyError::BufferTooSmall {
                    needed: grid_len,
                    available: grid.len(),
                });
            }
        }
        for (cw, out) in data.iter().enumerate().take(nof_cw) {
            let needed = cfg.codeword(cw)?.coding_params(0).tbs_bytes();
            if out.len() < needed {
                return Err(PhyError::BufferTooSmall {
                    needed,
                    available: out.len(),
                });
            }
        }

        debug!(
            "PDSCH decode rnti={} sf={} {:?} layers={} codewords={} nof_re={} rx={}",
            rnti, cfg.sf_idx, cfg.mimo, cfg.nof_layers, nof_cw, cfg.nof_re, nof_rx
        );

        // Extract PDSCH REs and channel estimates
        let mapping = ReMapping::new(&self.cell, &cfg.grant.prb_mask, cfg.cfi, cfg.sf_idx);
        for (rx, grid) in sf_symbols.iter().enumerate().take(nof_rx) {
            mapping.get(grid, &mut self.rx_symbols[rx][..cfg.nof_re]);
        }
        for (port, per_rx) in ce.iter().enumerate().take(nof_ports) {
            for (rx, grid) in per_rx.iter().enumerate().take(nof_rx) {
                mapping.get(grid, &mut self.rx_ce[port][rx][..cfg.nof_re]);
            }
        }

        // Combining / detection and layer demapping into the pipelines
        let nof_re = Self::nof_precoded_re(cfg);
        let per_layer = mimo::detect(
            cfg.mimo,
            nof_ports,
            cfg.nof_layers,
            cfg.codebook_idx,
            &self.rx_symbols,
            &self.rx_ce,
            nof_rx,
            nof_re,
            noise_estimate,
            &mut self.layers,
        );
        let mut d = self.orchestrator.symbols_mut(nof_cw)?;
        mimo::layer_demap(cfg.mimo, cfg.nof_layers, &self.layers, per_layer, &mut d);
        drop(d);

        let max_iterations = self.stats.max_iterations();
        let mut tasks: [Option<Task>; MAX_CODEWORDS] = Default::default();
        for cw in 0..nof_cw {
            let cw_cfg = *cfg.codeword(cw)?;
            tasks[cw] = Some(Task::Decode(DecodeJob {
                params: cw_cfg.coding_params(max_iterations),
                softbuffer: mem::take(&mut softbuffers[cw]),
                sequence: self.scrambling.sequence(rnti, cw, cfg.sf_idx),
                nof_symbols: cw_cfg.nof_symbols,
                noise_estimate,
            }));
        }

        let mut results = self.orchestrator.run(&mut tasks);
        restore_softbuffers(&mut tasks, &mut softbuffers[..nof_cw], &mut results, |task| match task {
            Task::Decode(job) => Some(job.softbuffer),
            _ => None,
        });

        let mut report = CodewordReport {
            results: Default::default(),
        };
        for (cw, result) in results.into_iter().enumerate() {
            let Some(result) = result else {
                continue;
            };
            let outcome = match result {
                Ok(TaskOutput::Decoded(outcome)) => {
                    let nof_bytes = cfg.codeword(cw)?.coding_params(0).tbs_bytes();
                    let decoded = &self.orchestrator.pipeline(cw)?.data()[..nof_bytes];
                    data[cw][..nof_bytes].copy_from_slice(decoded);
                    self.stats.record(outcome.iterations);
                    Ok(outcome)
                }
                Ok(TaskOutput::Encoded) => Err(PhyError::WorkerFailed {
                    codeword: cw,
                    reason: "unexpected encode result".to_string(),
                }),
                Err(e) => Err(e),
            };
            report.results[cw] = Some(outcome);
        }
        Ok(report)
    }

    /// Rank and PMI suggestion for closed-loop spatial multiplexing
    ///
    /// `ce[port][rx]` holds channel estimates, of which the first `nof_ce` are searched.
    pub fn ri_pmi_select(
        &self,
        ce: &[&[&[Complex32]]],
        noise_estimate: f32,
        nof_ce: usize,
    ) -> Result<RiPmiSelection, PhyError> {
        if self.nof_rx == 0 {
            return Err(PhyError::InvalidConfiguration("Engine was built without a receiver".to_string()));
        }
        ri_pmi::select(self.cell.nof_ports as usize, self.nof_rx, ce, noise_estimate, nof_ce)
    }
}

/// Hand the soft buffers back to the caller's slots
///
/// A buffer that did not come back with its task leaves the slot empty and fails the
/// codeword with `SoftBufferLost`, so HARQ state is never dropped silently.
fn restore_softbuffers<B>(
    tasks: &mut [Option<Task>; MAX_CODEWORDS],
    softbuffers: &mut [B],
    results: &mut CodewordResults,
    into_softbuffer: impl Fn(Task) -> Option<B>,
) {
    for (cw, slot) in softbuffers.iter_mut().enumerate().take(MAX_CODEWORDS) {
        match tasks[cw].take().and_then(&into_softbuffer) {
            Some(softbuffer) => *slot = softbuffer,
            None => {
                error!("Soft buffer of codeword {} was not handed back, HARQ state lost", cw);
                results[cw] = Some(Err(PhyError::SoftBufferLost { codeword: cw }));
            }
        }
    }
}

impl Drop for Pdsch {
    fn drop(&mut self) {
        self.orchestrator.shutdown();
    }
}

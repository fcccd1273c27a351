//! Loopback link: PDSCH encoder, flat channel with white noise, PDSCH decoder

use anyhow::{anyhow, Result};
use common::{Cell, Rnti};
use interfaces::{SoftBufferRx, SoftBufferTx};
use num_complex::Complex32;
use phy::pdsch::{self, Grant};
use phy::{Pdsch, PhyError};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ChannelModel, SimConfig};

/// Redundancy versions of consecutive transmissions
const RV_SEQUENCE: [u32; 4] = [0, 2, 3, 1];

/// Results of one SNR point
#[derive(Debug, Clone, Serialize)]
pub struct SnrReport {
    pub snr_db: f32,
    pub nof_subframes: u32,
    /// Subframes whose grant did not fit (synchronisation/broadcast subframes)
    pub skipped_subframes: u32,
    pub nof_tb: u64,
    pub tb_errors: u64,
    pub bler: f64,
    pub transmissions: u64,
    pub throughput_kbps: f64,
    pub average_iterations: f32,
    pub ri_pmi: Option<RiPmiReport>,
}

/// Histogram of the receiver's rank/PMI suggestions
#[derive(Debug, Clone, Default, Serialize)]
pub struct RiPmiReport {
    /// Selections of rank 1 and rank 2
    pub rank: [u64; 2],
    /// Selections per PMI, both ranks
    pub pmi: [u64; 4],
    pub mean_sinr_db: f32,
}

/// Full simulation output
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub config: SimConfig,
    pub points: Vec<SnrReport>,
}

/// Flat MIMO channel, taps indexed `[port][rx]`
struct Channel {
    model: ChannelModel,
    taps: Vec<Vec<Complex32>>,
    noise: Normal<f32>,
    fading: Normal<f32>,
    noise_variance: f32,
}

impl Channel {
    fn new(model: ChannelModel, nof_ports: usize, nof_rx: usize, snr_db: f32) -> Result<Self> {
        let noise_variance = 10f32.powf(-snr_db / 10.0);
        let noise = Normal::new(0.0, (noise_variance / 2.0).sqrt())
            .map_err(|e| anyhow!("Invalid noise level for {} dB: {}", snr_db, e))?;
        let fading = Normal::new(0.0, std::f32::consts::FRAC_1_SQRT_2)
            .map_err(|e| anyhow!("Invalid fading distribution: {}", e))?;

        // DFT mixing matrix, the realisation of the AWGN model
        let n = nof_ports.max(nof_rx) as f32;
        let taps = (0..nof_ports)
            .map(|port| {
                (0..nof_rx)
                    .map(|rx| {
                        let phase = -2.0 * std::f32::consts::PI * (port * rx) as f32 / n;
                        Complex32::from_polar(1.0, phase)
                    })
                    .collect()
            })
            .collect();

        Ok(Self {
            model,
            taps,
            noise,
            fading,
            noise_variance,
        })
    }

    /// Draw a new block fading realisation
    fn realise(&mut self, rng: &mut StdRng) {
        if self.model == ChannelModel::Rayleigh {
            for tap in self.taps.iter_mut().flatten() {
                *tap = Complex32::new(self.fading.sample(rng), self.fading.sample(rng));
            }
        }
    }

    /// Received grids `rx[antenna]` and ideal channel estimates `ce[port][antenna]`
    fn propagate(
        &self,
        tx: &[Vec<Complex32>],
        rx: &mut [Vec<Complex32>],
        ce: &mut [Vec<Vec<Complex32>>],
        rng: &mut StdRng,
    ) {
        for (antenna, out) in rx.iter_mut().enumerate() {
            for (i, y) in out.iter_mut().enumerate() {
                let signal: Complex32 = tx
                    .iter()
                    .zip(&self.taps)
                    .map(|(grid, taps)| taps[antenna] * grid[i])
                    .sum();
                *y = signal + Complex32::new(self.noise.sample(rng), self.noise.sample(rng));
            }
        }
        for (per_rx, taps) in ce.iter_mut().zip(&self.taps) {
            for (grid, &h) in per_rx.iter_mut().zip(taps) {
                grid.fill(h);
            }
        }
    }
}

/// Random transport block with the bits past the TBS cleared
fn fill_transport_block(rng: &mut StdRng, data: &mut [u8], tbs: u32) {
    rng.fill(data);
    let tail = tbs % 8;
    if let (Some(last), true) = (data.last_mut(), tail != 0) {
        *last &= 0xffu8 << (8 - tail);
    }
}

/// Simulate every subframe of one SNR point
pub fn run_point(config: &SimConfig, cell: Cell, grant: &Grant, snr_db: f32, rng: &mut StdRng) -> Result<SnrReport> {
    let nof_rx = config.channel.nof_rx;
    let nof_ports = cell.nof_ports as usize;
    let nof_tb = grant.nof_tb();
    let rnti = Rnti(config.pdsch.rnti);
    let max_transmissions = config.pdsch.max_transmissions.max(1) as usize;

    let mut transmitter = Pdsch::new_tx(cell, config.engine)?;
    let mut receiver = Pdsch::new_rx(cell, nof_rx, config.engine)?;
    transmitter.set_rnti(rnti);
    receiver.set_rnti(rnti);

    let mut channel = Channel::new(config.channel.model, nof_ports, nof_rx, snr_db)?;
    let zero = Complex32::new(0.0, 0.0);
    let len = cell.subframe_len();
    let mut tx_grids = vec![vec![zero; len]; nof_ports];
    let mut rx_grids = vec![vec![zero; len]; nof_rx];
    let mut ce = vec![vec![vec![zero; len]; nof_rx]; nof_ports];

    let tbs: Vec<u32> = grant.tb.iter().flatten().map(|tb| tb.tbs).collect();
    let mut tx_buffers: Vec<SoftBufferTx> = (0..nof_tb).map(|_| SoftBufferTx::new(cell.nof_prb)).collect();
    let mut rx_buffers: Vec<SoftBufferRx> = (0..nof_tb).map(|_| SoftBufferRx::new(cell.nof_prb)).collect();
    let mut data: Vec<Vec<u8>> = tbs.iter().map(|&t| vec![0u8; (t as usize).div_ceil(8)]).collect();
    let mut decoded = data.clone();

    let mut report = SnrReport {
        snr_db,
        nof_subframes: config.nof_subframes,
        skipped_subframes: 0,
        nof_tb: 0,
        tb_errors: 0,
        bler: 0.0,
        transmissions: 0,
        throughput_kbps: 0.0,
        average_iterations: 0.0,
        ri_pmi: None,
    };
    let mut ri_pmi = RiPmiReport::default();
    let mut sinr_sum = 0.0f64;
    let mut delivered_bits = 0u64;

    'subframe: for sf in 0..config.nof_subframes {
        let sf_idx = (sf % 10) as usize;
        for (tb, &t) in data.iter_mut().zip(&tbs) {
            fill_transport_block(rng, tb, t);
        }
        channel.realise(rng);

        let mut delivered = vec![false; nof_tb];
        for (transmission, &rv) in RV_SEQUENCE.iter().cycle().take(max_transmissions).enumerate() {
            let cfg = match pdsch::cfg_multi(
                &cell,
                grant,
                config.pdsch.cfi,
                sf_idx,
                rv,
                rv,
                config.pdsch.mimo,
                config.pdsch.pmi,
            ) {
                Ok(cfg) => cfg,
                Err(PhyError::OverAllocation { coderate, .. }) if transmission == 0 => {
                    debug!("Skipping subframe {}: code rate {:.3}", sf_idx, coderate);
                    report.skipped_subframes += 1;
                    continue 'subframe;
                }
                Err(e) => return Err(e.into()),
            };

            let data_refs: Vec<&[u8]> = data.iter().map(|d| d.as_slice()).collect();
            let mut grid_refs: Vec<&mut [Complex32]> = tx_grids.iter_mut().map(|g| g.as_mut_slice()).collect();
            transmitter
                .encode_multi(&cfg, &mut tx_buffers, &data_refs, rnti, &mut grid_refs)?
                .status()?;
            report.transmissions += 1;

            channel.propagate(&tx_grids, &mut rx_grids, &mut ce, rng);
            let rx_refs: Vec<&[Complex32]> = rx_grids.iter().map(|g| g.as_slice()).collect();
            let ce_rows: Vec<Vec<&[Complex32]>> =
                ce.iter().map(|p| p.iter().map(|g| g.as_slice()).collect()).collect();
            let ce_refs: Vec<&[&[Complex32]]> = ce_rows.iter().map(|p| p.as_slice()).collect();

            if transmission == 0 && nof_ports == 2 {
                let selection = receiver.ri_pmi_select(&ce_refs, channel.noise_variance, len)?;
                ri_pmi.rank[selection.rank - 1] += 1;
                ri_pmi.pmi[selection.pmi as usize] += 1;
                sinr_sum += selection.sinr as f64;
            }

            let mut decoded_refs: Vec<&mut [u8]> = decoded.iter_mut().map(|d| d.as_mut_slice()).collect();
            let outcome = receiver.decode_multi(
                &cfg,
                &mut rx_buffers,
                &rx_refs,
                &ce_refs,
                channel.noise_variance,
                rnti,
                &mut decoded_refs,
            )?;
            for (cw, done) in delivered.iter_mut().enumerate() {
                match outcome.get(cw) {
                    Some(Ok(result)) => {
                        if result.crc_ok && decoded[cw] == data[cw] {
                            *done = true;
                        }
                    }
                    Some(Err(e)) => warn!("Codeword {} failed in subframe {}: {}", cw, sf, e),
                    None => {}
                }
            }
            if delivered.iter().all(|&d| d) {
                break;
            }
        }

        report.nof_tb += nof_tb as u64;
        for (cw, &done) in delivered.iter().enumerate() {
            if done {
                delivered_bits += tbs[cw] as u64;
            } else {
                report.tb_errors += 1;
            }
        }
    }

    let simulated = report.nof_subframes - report.skipped_subframes;
    if report.nof_tb > 0 {
        report.bler = report.tb_errors as f64 / report.nof_tb as f64;
    }
    if simulated > 0 {
        // One subframe lasts 1 ms
        report.throughput_kbps = delivered_bits as f64 / simulated as f64;
        if nof_ports == 2 {
            ri_pmi.mean_sinr_db = (10.0 * (sinr_sum / simulated as f64).log10()) as f32;
            report.ri_pmi = Some(ri_pmi);
        }
    }
    report.average_iterations = receiver.average_iterations();

    info!(
        "SNR {:5.1} dB: BLER {:.4} ({} / {}), {:.1} kbps, {:.2} iterations",
        snr_db, report.bler, report.tb_errors, report.nof_tb, report.throughput_kbps, report.average_iterations
    );

    transmitter.free();
    receiver.free();
    Ok(report)
}

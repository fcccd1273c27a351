//! Simulation configuration
//!
//! Read from YAML or TOML depending on the file extension; every field has a default
//! so a partial file (or none at all) is enough.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use common::{Cell, Mcs, MimoType};
use phy::pdsch::{Grant, TransportBlock};
use phy::PdschOptions;
use serde::{Deserialize, Serialize};

/// Top-level simulation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    #[serde(default)]
    pub cell: CellConfig,
    #[serde(default)]
    pub pdsch: PdschConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Engine options
    #[serde(default)]
    pub engine: PdschOptions,
    /// SNR points in dB
    #[serde(default = "default_snr_db")]
    pub snr_db: Vec<f32>,
    /// Subframes simulated per SNR point
    #[serde(default = "default_nof_subframes")]
    pub nof_subframes: u32,
    #[serde(default)]
    pub seed: u64,
}

/// Cell parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    #[serde(default = "default_nof_prb")]
    pub nof_prb: u32,
    #[serde(default = "default_nof_ports")]
    pub nof_ports: u32,
    #[serde(default = "default_pci")]
    pub pci: u16,
}

/// Downlink allocation of every simulated subframe
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PdschConfig {
    #[serde(default)]
    pub mimo: MimoType,
    /// Precoding matrix indicator (spatial multiplexing)
    #[serde(default)]
    pub pmi: u32,
    /// MCS index of each transport block
    #[serde(default = "default_mcs")]
    pub mcs: Vec<u8>,
    /// Transport block size in bits of each transport block
    #[serde(default = "default_tbs")]
    pub tbs: Vec<u32>,
    #[serde(default = "default_cfi")]
    pub cfi: u32,
    /// First allocated PRB
    #[serde(default)]
    pub prb_start: usize,
    /// Allocated PRBs, whole bandwidth when absent
    pub nof_prb: Option<usize>,
    #[serde(default = "default_rnti")]
    pub rnti: u16,
    /// Transmissions per transport block, following the rv sequence 0, 2, 3, 1
    #[serde(default = "default_max_transmissions")]
    pub max_transmissions: u32,
}

/// Propagation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelModel {
    /// Fixed DFT mixing matrix plus white noise
    Awgn,
    /// Flat Rayleigh block fading, one realisation per subframe
    #[default]
    Rayleigh,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub model: ChannelModel,
    #[serde(default = "default_nof_rx")]
    pub nof_rx: usize,
}

fn default_snr_db() -> Vec<f32> {
    vec![0.0, 5.0, 10.0, 15.0, 20.0]
}

fn default_nof_subframes() -> u32 {
    100
}

fn default_nof_prb() -> u32 {
    25
}

fn default_nof_ports() -> u32 {
    1
}

fn default_pci() -> u16 {
    1
}

fn default_mcs() -> Vec<u8> {
    vec![9]
}

fn default_tbs() -> Vec<u32> {
    vec![4008]
}

fn default_cfi() -> u32 {
    2
}

fn default_rnti() -> u16 {
    0x4601
}

fn default_max_transmissions() -> u32 {
    1
}

fn default_nof_rx() -> usize {
    1
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            nof_prb: default_nof_prb(),
            nof_ports: default_nof_ports(),
            pci: default_pci(),
        }
    }
}

impl Default for PdschConfig {
    fn default() -> Self {
        Self {
            mimo: MimoType::default(),
            pmi: 0,
            mcs: default_mcs(),
            tbs: default_tbs(),
            cfi: default_cfi(),
            prb_start: 0,
            nof_prb: None,
            rnti: default_rnti(),
            max_transmissions: default_max_transmissions(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            model: ChannelModel::default(),
            nof_rx: default_nof_rx(),
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            cell: CellConfig::default(),
            pdsch: PdschConfig::default(),
            channel: ChannelConfig::default(),
            engine: PdschOptions::default(),
            snr_db: default_snr_db(),
            nof_subframes: default_nof_subframes(),
            seed: 0,
        }
    }
}

impl SimConfig {
    /// Load configuration from a `.yaml`/`.yml` or `.toml` file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let config = match extension {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "toml" => toml::from_str(&contents)?,
            other => return Err(anyhow!("Unsupported configuration format: '{}'", other)),
        };
        Ok(config)
    }

    /// Cell described by the configuration
    pub fn cell(&self) -> Result<Cell> {
        Cell::new(self.cell.nof_prb, self.cell.nof_ports, self.cell.pci)
            .map_err(|e| anyhow!("Invalid cell: {}", e))
    }

    /// Grant carrying every configured transport block
    pub fn grant(&self) -> Result<Grant> {
        let pdsch = &self.pdsch;
        if pdsch.mcs.is_empty() || pdsch.mcs.len() > 2 || pdsch.mcs.len() != pdsch.tbs.len() {
            return Err(anyhow!(
                "Expected one or two transport blocks with an MCS and a TBS each, got {} MCS and {} TBS",
                pdsch.mcs.len(),
                pdsch.tbs.len()
            ));
        }
        let len = pdsch
            .nof_prb
            .unwrap_or_else(|| (self.cell.nof_prb as usize).saturating_sub(pdsch.prb_start));
        let mut grant = Grant::contiguous(self.cell.nof_prb, pdsch.prb_start, len);
        for (idx, (&mcs_idx, &tbs)) in pdsch.mcs.iter().zip(&pdsch.tbs).enumerate() {
            let mcs = Mcs::from_index(mcs_idx).ok_or_else(|| anyhow!("Invalid MCS index {}", mcs_idx))?;
            grant = grant.with_tb(
                idx,
                TransportBlock {
                    mcs_idx,
                    modulation: mcs.modulation,
                    tbs,
                },
            );
        }
        Ok(grant)
    }
}

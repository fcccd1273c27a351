//! PDSCH configuration
//!
//! Derives the per-subframe PDSCH configuration (RE count, per-codeword symbol and bit
//! budgets, code rate) from the cell, the downlink grant and the control region size.

use common::{Cell, MimoType, Modulation, MAX_CODEWORDS, NSUBFRAMES_X_FRAME};
use interfaces::CodingParams;
use serde::{Deserialize, Serialize};

use super::re_map::ReMapping;
use crate::mimo;
use crate::PhyError;

/// Highest code rate a grant may be configured with
pub const MAX_CODERATE: f32 = 0.932;

/// CRC bits attached to every transport block
const TB_CRC_LEN: u32 = 24;

/// One transport block of a downlink grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportBlock {
    pub mcs_idx: u8,
    pub modulation: Modulation,
    /// Transport block size in bits
    pub tbs: u32,
}

/// Downlink resource grant of one subframe
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Grant {
    /// Allocated PRBs, same allocation in both slots
    pub prb_mask: Vec<bool>,
    pub tb: [Option<TransportBlock>; MAX_CODEWORDS],
}

impl Grant {
    /// Grant over a contiguous PRB range
    pub fn contiguous(nof_prb: u32, start: usize, len: usize) -> Self {
        let prb_mask = (0..nof_prb as usize).map(|prb| prb >= start && prb < start + len).collect();
        Self {
            prb_mask,
            tb: [None; MAX_CODEWORDS],
        }
    }

    /// Set transport block `idx`
    pub fn with_tb(mut self, idx: usize, tb: TransportBlock) -> Self {
        if let Some(slot) = self.tb.get_mut(idx) {
            *slot = Some(tb);
        }
        self
    }

    pub fn nof_prb(&self) -> usize {
        self.prb_mask.iter().filter(|&&used| used).count()
    }

    /// Number of leading transport blocks present
    pub fn nof_tb(&self) -> usize {
        self.tb.iter().take_while(|tb| tb.is_some()).count()
    }
}

/// Configuration of one codeword
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodewordCfg {
    pub tbs: u32,
    pub modulation: Modulation,
    pub rv: u32,
    /// Modulated symbols carried by the codeword
    pub nof_symbols: usize,
    /// Coded bits (G)
    pub nof_bits: usize,
    pub coderate: f32,
    /// Layers the codeword is rate matched for
    pub nof_layers: usize,
}

impl CodewordCfg {
    /// Channel coder parameters of the codeword
    pub fn coding_params(&self, max_iterations: u32) -> CodingParams {
        CodingParams {
            tbs: self.tbs,
            nof_bits: self.nof_bits,
            modulation: self.modulation,
            nof_layers: self.nof_layers,
            rv: self.rv,
            max_iterations,
        }
    }
}

/// Validated PDSCH configuration of one subframe
#[derive(Debug, Clone, PartialEq)]
pub struct PdschCfg {
    pub grant: Grant,
    /// PDSCH REs per port
    pub nof_re: usize,
    pub sf_idx: usize,
    pub cfi: u32,
    pub mimo: MimoType,
    pub nof_layers: usize,
    /// Precoding codebook index (spatial multiplexing)
    pub codebook_idx: u32,
    pub codewords: [Option<CodewordCfg>; MAX_CODEWORDS],
}

impl PdschCfg {
    pub fn nof_codewords(&self) -> usize {
        self.codewords.iter().filter(|cw| cw.is_some()).count()
    }

    /// Configuration of codeword `idx`
    pub fn codeword(&self, idx: usize) -> Result<&CodewordCfg, PhyError> {
        self.codewords
            .get(idx)
            .and_then(|cw| cw.as_ref())
            .ok_or(PhyError::InvalidCodeword(idx))
    }

    /// Symbols per layer after layer mapping
    pub fn symbols_per_layer(&self) -> usize {
        match self.mimo {
            MimoType::TxDiversity => self.nof_re / self.nof_layers,
            _ => self.nof_re,
        }
    }
}

/// Code rate of a transport block over `nof_re` coded units
///
/// Callers pass `nof_re` scaled by the bits per symbol to obtain the rate in bits.
pub fn coderate(tbs: u32, nof_re: usize) -> f32 {
    if nof_re == 0 {
        return f32::INFINITY;
    }
    (tbs + TB_CRC_LEN) as f32 / nof_re as f32
}

/// Single transport block configuration: single antenna on 1-port cells, transmit
/// diversity otherwise
pub fn cfg(cell: &Cell, grant: &Grant, cfi: u32, sf_idx: usize, rv: u32) -> Result<PdschCfg, PhyError> {
    let mimo = if cell.nof_ports == 1 {
        MimoType::SingleAntenna
    } else {
        MimoType::TxDiversity
    };
    cfg_multi(cell, grant, cfi, sf_idx, rv, 0, mimo, 0)
}

/// Configuration for any transmission scheme with one or two transport blocks
#[allow(clippy::too_many_arguments)]
pub fn cfg_multi(
    cell: &Cell,
    grant: &Grant,
    cfi: u32,
    sf_idx: usize,
    rv: u32,
    rv2: u32,
    mimo: MimoType,
    pmi: u32,
) -> Result<PdschCfg, PhyError> {
    if !(1..=3).contains(&cfi) {
        return Err(PhyError::InvalidConfiguration(format!("Invalid CFI {}", cfi)));
    }
    if sf_idx >= NSUBFRAMES_X_FRAME {
        return Err(PhyError::InvalidConfiguration(format!("Invalid subframe index {}", sf_idx)));
    }
    if grant.prb_mask.len() > cell.nof_prb as usize
        && grant.prb_mask[cell.nof_prb as usize..].iter().any(|&used| used)
    {
        return Err(PhyError::InvalidConfiguration(format!(
            "Allocation exceeds the {} PRB bandwidth",
            cell.nof_prb
        )));
    }
    if grant.nof_prb() == 0 {
        return Err(PhyError::InvalidConfiguration("Empty PRB allocation".to_string()));
    }

    let nof_tb = grant.nof_tb();
    if nof_tb == 0 || grant.tb[nof_tb..].iter().any(|tb| tb.is_some()) {
        return Err(PhyError::InvalidConfiguration(
            "Grant carries no leading transport block".to_string(),
        ));
    }
    let rvs = [rv, rv2];
    for (idx, &rv) in rvs.iter().take(nof_tb).enumerate() {
        if rv > 3 {
            return Err(PhyError::InvalidConfiguration(format!(
                "Invalid redundancy version {} for codeword {}",
                rv, idx
            )));
        }
    }

    let ports = cell.nof_ports as usize;
    let (nof_layers, codebook_idx) = match (mimo, nof_tb) {
        (MimoType::SingleAntenna, 1) => (1, 0),
        (MimoType::TxDiversity, 1) if ports == 2 || ports == 4 => (ports, 0),
        (MimoType::SpatialMultiplexing, 1) if ports == 2 => (1, pmi),
        (MimoType::SpatialMultiplexing, 2) if ports == 2 => (2, pmi.saturating_add(1)),
        (MimoType::Cdd, 2) if ports == 2 => (2, 0),
        _ => {
            return Err(PhyError::InvalidConfiguration(format!(
                "{:?} with {} transport blocks is not supported on {} ports",
                mimo, nof_tb, ports
            )))
        }
    };
    if mimo == MimoType::SpatialMultiplexing && mimo::codebook_2ports(nof_layers, codebook_idx).is_none() {
        return Err(PhyError::InvalidConfiguration(format!(
            "Invalid PMI {} for {} layers",
            pmi, nof_layers
        )));
    }

    let nof_re = ReMapping::new(cell, &grant.prb_mask, cfi, sf_idx).count();
    let nof_symbols = match mimo {
        MimoType::TxDiversity => nof_re / ports * ports,
        _ => nof_re,
    };
    let cw_layers = if mimo == MimoType::TxDiversity { 2 } else { 1 };

    let mut codewords = [None; MAX_CODEWORDS];
    for (idx, (slot, tb)) in codewords.iter_mut().zip(&grant.tb).take(nof_tb).enumerate() {
        let tb = tb.ok_or(PhyError::InvalidCodeword(idx))?;
        if tb.modulation == Modulation::Bpsk {
            return Err(PhyError::InvalidConfiguration(format!(
                "BPSK is not allowed on transport block {}",
                idx
            )));
        }
        if tb.tbs == 0 || tb.tbs % 8 != 0 {
            return Err(PhyError::InvalidConfiguration(format!(
                "Transport block size {} on transport block {} is not a whole number of bytes",
                tb.tbs, idx
            )));
        }
        let nof_bits = nof_symbols * tb.modulation.bits_per_symbol();
        let rate = coderate(tb.tbs, nof_bits);
        if rate > MAX_CODERATE {
            return Err(PhyError::OverAllocation {
                coderate: rate,
                max: MAX_CODERATE,
            });
        }
        *slot = Some(CodewordCfg {
            tbs: tb.tbs,
            modulation: tb.modulation,
            rv: rvs[idx],
            nof_symbols,
            nof_bits,
            coderate: rate,
            nof_layers: cw_layers,
        });
    }

    Ok(PdschCfg {
        grant: grant.clone(),
        nof_re,
        sf_idx,
        cfi,
        mimo,
        nof_layers,
        codebook_idx,
        codewords,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tb(modulation: Modulation, tbs: u32) -> TransportBlock {
        TransportBlock {
            mcs_idx: 0,
            modulation,
            tbs,
        }
    }

    #[test]
    fn test_coderate() {
        assert_eq!(coderate(100, 0), f32::INFINITY);
        assert!(coderate(1000, 4000) < coderate(1008, 4000));
        assert!(coderate(1000, 4000) > coderate(1000, 4002));
        assert_eq!(coderate(976, 2000), 0.5);
    }

    #[test]
    fn test_single_antenna_cfg() {
        let cell = Cell::new(25, 1, 0).unwrap();
        let grant = Grant::contiguous(25, 0, 25).with_tb(0, tb(Modulation::Qpsk, 2088));
        let cfg = cfg(&cell, &grant, 2, 1, 0).unwrap();
        assert_eq!(cfg.mimo, MimoType::SingleAntenna);
        assert_eq!(cfg.nof_re, 25 * 138);
        let cw = cfg.codeword(0).unwrap();
        assert_eq!(cw.nof_bits, 2 * 25 * 138);
        assert_eq!(cw.nof_layers, 1);
        assert!(cfg.codeword(1).is_err());
    }

    #[test]
    fn test_tx_diversity_rounds_symbols() {
        let cell = Cell::new(6, 4, 0).unwrap();
        let grant = Grant::contiguous(6, 0, 1).with_tb(0, tb(Modulation::Qpsk, 16));
        let cfg = cfg(&cell, &grant, 3, 0, 0).unwrap();
        assert_eq!(cfg.mimo, MimoType::TxDiversity);
        assert_eq!(cfg.nof_layers, 4);
        let cw = cfg.codeword(0).unwrap();
        assert_eq!(cw.nof_symbols % 4, 0);
        assert!(cfg.nof_re - cw.nof_symbols < 4);
        assert_eq!(cw.nof_layers, 2);
    }

    #[test]
    fn test_spatial_multiplexing_codebook() {
        let cell = Cell::new(50, 2, 10).unwrap();
        let grant = Grant::contiguous(50, 0, 50)
            .with_tb(0, tb(Modulation::Qam16, 10296))
            .with_tb(1, tb(Modulation::Qam16, 10296));
        let cfg = cfg_multi(&cell, &grant, 1, 4, 0, 1, MimoType::SpatialMultiplexing, 1).unwrap();
        assert_eq!(cfg.nof_layers, 2);
        assert_eq!(cfg.codebook_idx, 2);
        assert_eq!(cfg.nof_codewords(), 2);
        assert_eq!(cfg.codeword(1).unwrap().rv, 1);

        let err = cfg_multi(&cell, &grant, 1, 4, 0, 0, MimoType::SpatialMultiplexing, 2);
        assert!(matches!(err, Err(PhyError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_rejections() {
        let cell = Cell::new(25, 1, 0).unwrap();
        let grant = Grant::contiguous(25, 0, 2).with_tb(0, tb(Modulation::Qpsk, 1000));
        assert!(matches!(cfg(&cell, &grant, 2, 1, 0), Err(PhyError::OverAllocation { .. })));
        assert!(matches!(cfg(&cell, &grant, 0, 1, 0), Err(PhyError::InvalidConfiguration(_))));
        assert!(matches!(cfg(&cell, &grant, 4, 1, 0), Err(PhyError::InvalidConfiguration(_))));
        assert!(matches!(cfg(&cell, &grant, 2, 10, 0), Err(PhyError::InvalidConfiguration(_))));
        assert!(matches!(cfg(&cell, &grant, 2, 1, 4), Err(PhyError::InvalidConfiguration(_))));

        let empty = Grant::contiguous(25, 0, 0).with_tb(0, tb(Modulation::Qpsk, 16));
        assert!(matches!(cfg(&cell, &empty, 2, 1, 0), Err(PhyError::InvalidConfiguration(_))));

        let outside = Grant::contiguous(30, 24, 4).with_tb(0, tb(Modulation::Qpsk, 16));
        assert!(matches!(cfg(&cell, &outside, 2, 1, 0), Err(PhyError::InvalidConfiguration(_))));

        let partial_byte = Grant::contiguous(25, 0, 4).with_tb(0, tb(Modulation::Qpsk, 100));
        assert!(matches!(cfg(&cell, &partial_byte, 2, 1, 0), Err(PhyError::InvalidConfiguration(_))));

        let bpsk = Grant::contiguous(25, 0, 4).with_tb(0, tb(Modulation::Bpsk, 16));
        assert!(matches!(cfg(&cell, &bpsk, 2, 1, 0), Err(PhyError::InvalidConfiguration(_))));

        let two = Grant::contiguous(25, 0, 4)
            .with_tb(0, tb(Modulation::Qpsk, 16))
            .with_tb(1, tb(Modulation::Qpsk, 16));
        let err = cfg_multi(&cell, &two, 2, 1, 0, 0, MimoType::Cdd, 0);
        assert!(matches!(err, Err(PhyError::InvalidConfiguration(_))));
    }
}

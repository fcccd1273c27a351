//! Common Types for the LTE downlink physical layer
//!
//! Defines fundamental cell, identity and modulation types shared by the PHY crates

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of antenna ports (cell-specific reference signal ports)
pub const MAX_PORTS: usize = 4;
/// Maximum number of spatial layers
pub const MAX_LAYERS: usize = 4;
/// Maximum number of codewords (transport blocks) per subframe
pub const MAX_CODEWORDS: usize = 2;
/// Subframes per radio frame
pub const NSUBFRAMES_X_FRAME: usize = 10;
/// Subcarriers per resource block
pub const NRE: usize = 12;
/// Largest supported bandwidth in resource blocks
pub const MAX_PRB: u32 = 110;
/// Smallest supported bandwidth in resource blocks
pub const MIN_PRB: u32 = 6;

/// Errors raised while validating cell parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CellError {
    #[error("Invalid number of resource blocks: {0}")]
    InvalidBandwidth(u32),

    #[error("Invalid number of antenna ports: {0}")]
    InvalidPorts(u32),

    #[error("Invalid physical cell id: {0}")]
    InvalidCellId(u16),
}

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// System information RNTI
    pub const SI: Self = Self(0xFFFF);
    /// Paging RNTI
    pub const P: Self = Self(0xFFFE);

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for Rnti {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-503)
    pub const MAX: u16 = 503;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Frequency shift of the cell-specific reference signals
    pub fn crs_shift(&self) -> usize {
        (self.0 % 6) as usize
    }
}

/// Cyclic prefix type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclicPrefix {
    #[default]
    Normal,
    Extended,
}

impl CyclicPrefix {
    /// OFDM symbols per slot
    pub fn symbols_per_slot(&self) -> usize {
        match self {
            CyclicPrefix::Normal => 7,
            CyclicPrefix::Extended => 6,
        }
    }
}

/// Modulation schemes, discriminant is the number of bits per symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modulation {
    Bpsk = 1,
    Qpsk = 2,
    Qam16 = 4,
    Qam64 = 6,
}

impl Modulation {
    /// All modulation orders, in table order
    pub const ALL: [Modulation; 4] = [
        Modulation::Bpsk,
        Modulation::Qpsk,
        Modulation::Qam16,
        Modulation::Qam64,
    ];

    /// Bits carried by one symbol
    pub fn bits_per_symbol(&self) -> usize {
        *self as usize
    }

    /// Look up a modulation from its bits per symbol
    pub fn from_bits(bits: u32) -> Option<Self> {
        Self::from_u32(bits)
    }

    /// Index into per-modulation tables
    pub fn table_index(&self) -> usize {
        match self {
            Modulation::Bpsk => 0,
            Modulation::Qpsk => 1,
            Modulation::Qam16 => 2,
            Modulation::Qam64 => 3,
        }
    }
}

/// PDSCH transmission scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MimoType {
    /// Port 0 only
    #[default]
    SingleAntenna,
    /// SFBC (2 ports) or SFBC-FSTD (4 ports)
    TxDiversity,
    /// Closed-loop spatial multiplexing
    SpatialMultiplexing,
    /// Large delay cyclic delay diversity
    Cdd,
}

/// Modulation and coding scheme, TS 36.213 Table 7.1.7.1-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mcs {
    /// MCS index (I_MCS)
    pub index: u8,
    /// Modulation order
    pub modulation: Modulation,
    /// Transport block size index (I_TBS), absent for retransmission-only entries
    pub tbs_index: Option<u8>,
}

impl Mcs {
    /// Decode an MCS index
    pub fn from_index(index: u8) -> Option<Self> {
        let (modulation, tbs_index) = match index {
            0..=9 => (Modulation::Qpsk, Some(index)),
            10..=16 => (Modulation::Qam16, Some(index - 1)),
            17..=28 => (Modulation::Qam64, Some(index - 2)),
            29 => (Modulation::Qpsk, None),
            30 => (Modulation::Qam16, None),
            31 => (Modulation::Qam64, None),
            _ => return None,
        };
        Some(Self { index, modulation, tbs_index })
    }
}

/// Static cell parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Downlink bandwidth in resource blocks
    pub nof_prb: u32,
    /// Number of cell-specific reference signal ports (1, 2 or 4)
    pub nof_ports: u32,
    /// Physical cell identity
    pub id: Pci,
    /// Cyclic prefix
    #[serde(default)]
    pub cp: CyclicPrefix,
}

impl Cell {
    /// Create a new cell with normal cyclic prefix
    pub fn new(nof_prb: u32, nof_ports: u32, id: u16) -> Result<Self, CellError> {
        let id = Pci::new(id).ok_or(CellError::InvalidCellId(id))?;
        let cell = Self { nof_prb, nof_ports, id, cp: CyclicPrefix::Normal };
        cell.validate()?;
        Ok(cell)
    }

    /// Check the cell parameters
    pub fn validate(&self) -> Result<(), CellError> {
        if !(MIN_PRB..=MAX_PRB).contains(&self.nof_prb) {
            return Err(CellError::InvalidBandwidth(self.nof_prb));
        }
        if !matches!(self.nof_ports, 1 | 2 | 4) {
            return Err(CellError::InvalidPorts(self.nof_ports));
        }
        if self.id.0 > Pci::MAX {
            return Err(CellError::InvalidCellId(self.id.0));
        }
        Ok(())
    }

    /// Number of subcarriers across the bandwidth
    pub fn nof_subcarriers(&self) -> usize {
        self.nof_prb as usize * NRE
    }

    /// OFDM symbols per subframe
    pub fn symbols_per_subframe(&self) -> usize {
        2 * self.cp.symbols_per_slot()
    }

    /// Number of resource elements in one subframe grid of one port
    pub fn subframe_len(&self) -> usize {
        self.nof_subcarriers() * self.symbols_per_subframe()
    }

    /// OFDM symbols reserved for control signalling for a given CFI
    pub fn nof_ctrl_symbols(&self, cfi: u32) -> usize {
        if self.nof_prb <= 10 {
            cfi as usize + 1
        } else {
            cfi as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pci_validation() {
        assert!(Pci::new(0).is_some());
        assert!(Pci::new(503).is_some());
        assert!(Pci::new(504).is_none());
        assert_eq!(Pci(13).crs_shift(), 1);
    }

    #[test]
    fn test_cell_validation() {
        assert!(Cell::new(25, 1, 1).is_ok());
        assert!(Cell::new(100, 4, 503).is_ok());
        assert_eq!(Cell::new(5, 1, 1), Err(CellError::InvalidBandwidth(5)));
        assert_eq!(Cell::new(25, 3, 1), Err(CellError::InvalidPorts(3)));
        assert_eq!(Cell::new(25, 2, 504), Err(CellError::InvalidCellId(504)));
    }

    #[test]
    fn test_cell_dimensions() {
        let cell = Cell::new(6, 1, 0).unwrap();
        assert_eq!(cell.nof_subcarriers(), 72);
        assert_eq!(cell.subframe_len(), 72 * 14);
        assert_eq!(cell.nof_ctrl_symbols(1), 2);

        let cell = Cell::new(50, 2, 0).unwrap();
        assert_eq!(cell.nof_ctrl_symbols(3), 3);
    }

    #[test]
    fn test_modulation_bits() {
        assert_eq!(Modulation::from_bits(4), Some(Modulation::Qam16));
        assert_eq!(Modulation::from_bits(3), None);
        assert_eq!(Modulation::Qam64.bits_per_symbol(), 6);
    }

    #[test]
    fn test_mcs_table() {
        let mcs = Mcs::from_index(9).unwrap();
        assert_eq!((mcs.modulation, mcs.tbs_index), (Modulation::Qpsk, Some(9)));
        let mcs = Mcs::from_index(10).unwrap();
        assert_eq!((mcs.modulation, mcs.tbs_index), (Modulation::Qam16, Some(9)));
        let mcs = Mcs::from_index(28).unwrap();
        assert_eq!((mcs.modulation, mcs.tbs_index), (Modulation::Qam64, Some(26)));
        assert_eq!(Mcs::from_index(30).unwrap().tbs_index, None);
        assert!(Mcs::from_index(32).is_none());
    }
}

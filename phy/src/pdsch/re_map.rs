//! PDSCH resource element mapping (TS 36.211 Section 6.3.5)
//!
//! A single enumeration of the PDSCH resource elements of a subframe drives counting,
//! mapping and extraction, so the RE count used for configuration always matches the
//! number of REs written or read. Grids are stored symbol-major: index `l * nof_sc + k`.

use common::{Cell, NRE};
use num_complex::Complex32;

/// Subcarriers occupied by PBCH and the synchronisation signals
const CENTRE_SUBCARRIERS: usize = 72;

/// Allocation of one subframe shared by the enumeration routines
#[derive(Debug, Clone, Copy)]
pub struct ReMapping<'a> {
    pub cell: &'a Cell,
    pub prb_mask: &'a [bool],
    pub cfi: u32,
    pub sf_idx: usize,
}

impl<'a> ReMapping<'a> {
    pub fn new(cell: &'a Cell, prb_mask: &'a [bool], cfi: u32, sf_idx: usize) -> Self {
        Self { cell, prb_mask, cfi, sf_idx }
    }

    /// Whether subcarrier `k` of subframe symbol `l` carries PDSCH
    fn is_pdsch(&self, l: usize, k: usize) -> bool {
        let nsymb = self.cell.cp.symbols_per_slot();
        let slot = l / nsymb;
        let ls = l % nsymb;
        let nof_sc = self.cell.nof_subcarriers();
        let centre = nof_sc / 2 - CENTRE_SUBCARRIERS / 2..nof_sc / 2 + CENTRE_SUBCARRIERS / 2;

        if l < self.cell.nof_ctrl_symbols(self.cfi) {
            return false;
        }

        // Cell-specific reference signals
        let vshift = self.cell.id.crs_shift();
        if ls == 0 || ls == nsymb - 3 {
            let reserved = if self.cell.nof_ports == 1 {
                let v = if ls == 0 { 0 } else { 3 };
                k % 6 == (v + vshift) % 6
            } else {
                k % 3 == vshift % 3
            };
            if reserved {
                return false;
            }
        }
        if ls == 1 && self.cell.nof_ports == 4 && k % 3 == vshift % 3 {
            return false;
        }

        if centre.contains(&k) {
            // PBCH
            if self.sf_idx == 0 && slot == 1 && ls < 4 {
                return false;
            }
            // PSS and SSS
            if (self.sf_idx == 0 || self.sf_idx == 5) && slot == 0 && ls >= nsymb - 2 {
                return false;
            }
        }
        true
    }

    /// Visit the grid index of every PDSCH RE in mapping order
    pub fn for_each(&self, mut visit: impl FnMut(usize)) {
        let nof_sc = self.cell.nof_subcarriers();
        for l in 0..self.cell.symbols_per_subframe() {
            for (prb, _) in self.prb_mask.iter().enumerate().filter(|(_, &used)| used) {
                for k in prb * NRE..(prb + 1) * NRE {
                    if k < nof_sc && self.is_pdsch(l, k) {
                        visit(l * nof_sc + k);
                    }
                }
            }
        }
    }

    /// Number of PDSCH REs of the allocation
    pub fn count(&self) -> usize {
        let mut n = 0;
        self.for_each(|_| n += 1);
        n
    }

    /// Write symbols onto the grid, returns the number of REs written
    pub fn put(&self, symbols: &[Complex32], grid: &mut [Complex32]) -> usize {
        let mut n = 0;
        self.for_each(|idx| {
            if n < symbols.len() {
                grid[idx] = symbols[n];
                n += 1;
            }
        });
        n
    }

    /// Read the PDSCH REs from the grid, returns the number of REs read
    pub fn get(&self, grid: &[Complex32], symbols: &mut [Complex32]) -> usize {
        let mut n = 0;
        self.for_each(|idx| {
            if n < symbols.len() {
                symbols[n] = grid[idx];
                n += 1;
            }
        });
        n
    }
}

/// Largest number of PDSCH REs in one subframe of a cell
pub fn max_re(cell: &Cell) -> usize {
    cell.nof_subcarriers() * cell.symbols_per_subframe()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_mask(cell: &Cell) -> Vec<bool> {
        vec![true; cell.nof_prb as usize]
    }

    #[test]
    fn test_re_count_single_port() {
        // 25 PRB, 1 port, CFI 2, subframe 1: 12 data symbols, 4 CRS symbols with 2 RE/PRB
        let cell = Cell::new(25, 1, 0).unwrap();
        let mask = full_mask(&cell);
        let n = ReMapping::new(&cell, &mask, 2, 1).count();
        assert_eq!(n, 25 * (12 * 12 - 3 * 2));
    }

    #[test]
    fn test_re_count_two_ports() {
        // CRS on symbols 4, 7 and 11 outside the 2-symbol control region, 4 RE/PRB each
        let cell = Cell::new(50, 2, 1).unwrap();
        let mask = full_mask(&cell);
        let n = ReMapping::new(&cell, &mask, 2, 1).count();
        assert_eq!(n, 50 * (12 * 12 - 3 * 4));
    }

    #[test]
    fn test_re_count_four_ports() {
        // CFI 1 leaves symbols 1 and 8 of ports 2/3 inside the data region
        let cell = Cell::new(50, 4, 2).unwrap();
        let mask = full_mask(&cell);
        let n = ReMapping::new(&cell, &mask, 1, 1).count();
        assert_eq!(n, 50 * (13 * 12 - 5 * 4));
    }

    #[test]
    fn test_small_bandwidth_extends_control_region() {
        let cell = Cell::new(6, 1, 0).unwrap();
        let mask = full_mask(&cell);
        // CFI 1 -> 2 control symbols; subframe 1 has no PBCH/PSS/SSS
        let n = ReMapping::new(&cell, &mask, 1, 1).count();
        assert_eq!(n, 6 * (12 * 12 - 3 * 2));
    }

    #[test]
    fn test_pbch_and_sync_exclusion() {
        let cell = Cell::new(25, 1, 0).unwrap();
        let mask = full_mask(&cell);
        let sf1 = ReMapping::new(&cell, &mask, 2, 1).count();
        let sf5 = ReMapping::new(&cell, &mask, 2, 5).count();
        let sf0 = ReMapping::new(&cell, &mask, 2, 0).count();
        // PSS/SSS: 2 symbols x 72 subcarriers
        assert_eq!(sf1 - sf5, 2 * 72);
        // PBCH: 4 symbols x 72 subcarriers, minus CRS on symbol 0 of slot 1 (12 RE)
        assert_eq!(sf5 - sf0, 4 * 72 - 12);
    }

    #[test]
    fn test_put_get_inverse_and_order() {
        let cell = Cell::new(6, 2, 3).unwrap();
        let mut mask = vec![false; 6];
        mask[1] = true;
        mask[4] = true;
        let mapping = ReMapping::new(&cell, &mask, 1, 2);
        let n = mapping.count();
        let symbols: Vec<Complex32> = (0..n).map(|i| Complex32::new(i as f32, 0.0)).collect();
        let mut grid = vec![Complex32::new(-1.0, 0.0); cell.subframe_len()];
        assert_eq!(mapping.put(&symbols, &mut grid), n);

        let mut out = vec![Complex32::new(0.0, 0.0); n];
        assert_eq!(mapping.get(&grid, &mut out), n);
        assert_eq!(out, symbols);

        // Unallocated PRBs are untouched; the first RE lands on PRB 1 after control
        assert_eq!(grid[0], Complex32::new(-1.0, 0.0));
        let first = 2 * cell.nof_subcarriers() + NRE;
        assert_eq!(grid[first], Complex32::new(0.0, 0.0));
    }
}

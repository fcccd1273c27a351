//! Rank indicator and precoding matrix indicator selection
//!
//! Evaluates every entry of the two-port codebook on a decimated set of channel
//! estimates and reports the rank/PMI pair with the best post-MMSE SINR.

use common::MAX_PORTS;
use num_complex::Complex32;
use num_traits::Zero;
use serde::Serialize;
use tracing::debug;

use crate::mimo::{codebook_2ports, codebook_size, mmse_sinr_2x2, Precoder2x2};
use crate::PhyError;

/// Channel estimate decimation of the search
pub const PMI_SELECT_STRIDE: usize = 24;

/// Rank 1 must beat rank 2 by this factor to be reported
pub const RI_RANK1_MARGIN: f32 = 3.0;

/// Result of the rank/precoder search
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiPmiSelection {
    /// Rank indicator (number of layers)
    pub rank: usize,
    /// Precoding matrix indicator of the selected rank
    pub pmi: u32,
    /// Average linear SINR of the selection
    pub sinr: f32,
}

/// Search rank and PMI over `ce[port][rx]`, using the first `nof_ce` samples
pub fn select(
    nof_ports: usize,
    nof_rx: usize,
    ce: &[&[&[Complex32]]],
    noise_estimate: f32,
    nof_ce: usize,
) -> Result<RiPmiSelection, PhyError> {
    if !(noise_estimate.is_finite() && noise_estimate > 0.0) {
        return Err(PhyError::InvalidConfiguration(format!(
            "Invalid noise estimate {}",
            noise_estimate
        )));
    }
    if nof_ce == 0 {
        return Err(PhyError::InvalidConfiguration("No channel estimates".to_string()));
    }
    if nof_rx == 0 || nof_rx > MAX_PORTS {
        return Err(PhyError::InvalidConfiguration(format!("Invalid number of receive antennas {}", nof_rx)));
    }
    if nof_ports != 1 && nof_ports != 2 {
        return Err(PhyError::InvalidConfiguration(format!(
            "RI/PMI selection is not supported with {} ports",
            nof_ports
        )));
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
        for samples in per_rx.iter().take(nof_rx) {
            if samples.len() < nof_ce {
                return Err(PhyError::BufferTooSmall {
                    needed: nof_ce,
                    available: samples.len(),
                });
            }
        }
    }

    if nof_ports == 1 {
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for i in (0..nof_ce).step_by(PMI_SELECT_STRIDE) {
            let energy: f32 = (0..nof_rx).map(|rx| ce[0][rx][i].norm_sqr()).sum();
            sum += energy / noise_estimate;
            count += 1;
        }
        return Ok(RiPmiSelection {
            rank: 1,
            pmi: 0,
            sinr: sum / count as f32,
        });
    }

    // Rank 1: codebook entries 0..=3
    let mut best1 = (0u32, f32::NEG_INFINITY);
    for pmi in 0..codebook_size(1) as u32 {
        if let Some(w) = codebook_2ports(1, pmi) {
            let sinr = average_sinr(ce, &w, 1, nof_rx, noise_estimate, nof_ce);
            if sinr > best1.1 {
                best1 = (pmi, sinr);
            }
        }
    }

    // Rank 2: pmi 0..=1 maps to codebook entries 1..=2
    let mut best2 = (0u32, f32::NEG_INFINITY);
    for pmi in 0..(codebook_size(2) as u32 - 1) {
        if let Some(w) = codebook_2ports(2, pmi + 1) {
            let sinr = average_sinr(ce, &w, 2, nof_rx, noise_estimate, nof_ce);
            if sinr > best2.1 {
                best2 = (pmi, sinr);
            }
        }
    }

    debug!(
        "RI/PMI search: rank1 pmi={} sinr={:.2}, rank2 pmi={} sinr={:.2}",
        best1.0, best1.1, best2.0, best2.1
    );

    let selection = if best1.1 > RI_RANK1_MARGIN * best2.1 {
        RiPmiSelection {
            rank: 1,
            pmi: best1.0,
            sinr: best1.1,
        }
    } else {
        RiPmiSelection {
            rank: 2,
            pmi: best2.0,
            sinr: best2.1,
        }
    };
    Ok(selection)
}

/// Average post-MMSE SINR of one precoder; rank 2 reports the weaker layer
fn average_sinr(
    ce: &[&[&[Complex32]]],
    w: &Precoder2x2,
    nof_layers: usize,
    nof_rx: usize,
    noise: f32,
    nof_ce: usize,
) -> f32 {
    let mut g = [[Complex32::zero(); 2]; MAX_PORTS];
    let mut sum = 0.0f32;
    let mut count = 0usize;
    for i in (0..nof_ce).step_by(PMI_SELECT_STRIDE) {
        for (rx, row) in g.iter_mut().enumerate().take(nof_rx) {
            for (layer, value) in row.iter_mut().enumerate() {
                *value = if layer < nof_layers {
                    ce[0][rx][i] * w[0][layer] + ce[1][rx][i] * w[1][layer]
                } else {
                    Complex32::zero()
                };
            }
        }
        let sinr = if nof_layers == 1 {
            g.iter().take(nof_rx).map(|row| row[0].norm_sqr()).sum::<f32>() / noise
        } else {
            let per_layer = mmse_sinr_2x2(&g[..nof_rx], noise);
            per_layer[0].min(per_layer[1])
        };
        sum += sinr;
        count += 1;
    }
    sum / count as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;

    fn flat(taps: [[Complex32; 2]; 2], n: usize) -> Vec<Vec<Vec<Complex32>>> {
        taps.iter()
            .map(|per_rx| per_rx.iter().map(|&h| vec![h; n]).collect())
            .collect()
    }

    fn as_refs(ce: &[Vec<Vec<Complex32>>]) -> Vec<Vec<&[Complex32]>> {
        ce.iter().map(|p| p.iter().map(|v| v.as_slice()).collect()).collect()
    }

    #[test]
    fn test_identity_channel_prefers_rank_2() {
        let one = Complex32::new(1.0, 0.0);
        let zero = Complex32::zero();
        let ce = flat([[one, zero], [zero, one]], 240);
        let refs = as_refs(&ce);
        let ports: Vec<&[&[Complex32]]> = refs.iter().map(|p| p.as_slice()).collect();

        let selection = select(2, 2, &ports, 0.01, 240).unwrap();
        assert_eq!(selection.rank, 2);
        // Both rank-2 precoders are unitary here; the first one wins the tie
        assert_eq!(selection.pmi, 0);
        assert_float_eq!(selection.sinr, 50.0, rmax <= 1e-3);

        // Deterministic
        assert_eq!(select(2, 2, &ports, 0.01, 240).unwrap(), selection);
    }

    #[test]
    fn test_rank_one_channel_prefers_rank_1() {
        let one = Complex32::new(1.0, 0.0);
        let ce = flat([[one, one], [one, one]], 240);
        let refs = as_refs(&ce);
        let ports: Vec<&[&[Complex32]]> = refs.iter().map(|p| p.as_slice()).collect();

        let selection = select(2, 2, &ports, 0.1, 240).unwrap();
        assert_eq!(selection.rank, 1);
        assert_eq!(selection.pmi, 0);
        assert_float_eq!(selection.sinr, 40.0, rmax <= 1e-3);
    }

    #[test]
    fn test_single_port_and_rejections() {
        let h = vec![Complex32::new(0.5, 0.0); 48];
        let rx: [&[Complex32]; 1] = [&h];
        let ports: [&[&[Complex32]]; 1] = [&rx];
        let selection = select(1, 1, &ports, 0.25, 48).unwrap();
        assert_eq!((selection.rank, selection.pmi), (1, 0));
        assert_float_eq!(selection.sinr, 1.0, rmax <= 1e-5);

        assert!(matches!(select(4, 1, &ports, 0.25, 48), Err(PhyError::InvalidConfiguration(_))));
        assert!(matches!(select(1, 1, &ports, 0.0, 48), Err(PhyError::InvalidConfiguration(_))));
        assert!(matches!(select(1, 1, &ports, 0.25, 96), Err(PhyError::BufferTooSmall { .. })));
    }
}

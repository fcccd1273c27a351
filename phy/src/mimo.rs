//! Layer Mapping, Precoding and MIMO Detection
//!
//! Implements 3GPP TS 36.211 Sections 6.3.3 and 6.3.4 for the PDSCH transmission schemes
//! (single antenna port, transmit diversity, closed-loop spatial multiplexing with the
//! two-port codebook and large delay CDD) together with the receive-side combiners.

use common::MimoType;
use num_complex::Complex32;
use num_traits::Zero;
use std::f32::consts::{FRAC_1_SQRT_2, SQRT_2};

/// Determinants below this are treated as singular
const SINGULAR_EPSILON: f32 = 1e-12;

/// Two-port precoding matrix, indexed `[port][layer]`
pub type Precoder2x2 = [[Complex32; 2]; 2];

fn c(re: f32, im: f32) -> Complex32 {
    Complex32::new(re, im)
}

/// Number of entries of the two-port codebook for a rank
pub fn codebook_size(nof_layers: usize) -> usize {
    match nof_layers {
        1 => 4,
        2 => 3,
        _ => 0,
    }
}

/// Two-port codebook entry (Table 6.3.4.2.3-1), `None` for invalid indices
pub fn codebook_2ports(nof_layers: usize, codebook_idx: u32) -> Option<Precoder2x2> {
    let h = FRAC_1_SQRT_2;
    let zero = Complex32::zero();
    match (nof_layers, codebook_idx) {
        (1, 0) => Some([[c(h, 0.0), zero], [c(h, 0.0), zero]]),
        (1, 1) => Some([[c(h, 0.0), zero], [c(-h, 0.0), zero]]),
        (1, 2) => Some([[c(h, 0.0), zero], [c(0.0, h), zero]]),
        (1, 3) => Some([[c(h, 0.0), zero], [c(0.0, -h), zero]]),
        (2, 0) => Some([[c(h, 0.0), zero], [zero, c(h, 0.0)]]),
        (2, 1) => Some([[c(0.5, 0.0), c(0.5, 0.0)], [c(0.5, 0.0), c(-0.5, 0.0)]]),
        (2, 2) => Some([[c(0.5, 0.0), c(0.5, 0.0)], [c(0.0, 0.5), c(0.0, -0.5)]]),
        _ => None,
    }
}

/// Large delay CDD precoder W D(i) U for two ports and two layers
pub fn cdd_2ports(re_idx: usize) -> Precoder2x2 {
    let s = if re_idx % 2 == 0 { 0.5 } else { -0.5 };
    [[c(0.5, 0.0), c(0.5, 0.0)], [c(s, 0.0), c(-s, 0.0)]]
}

/// Layer mapping: distribute codeword symbols over layers, returns symbols per layer
pub fn layer_map(
    mimo: MimoType,
    nof_layers: usize,
    d: &[&[Complex32]],
    x: &mut [Vec<Complex32>],
) -> usize {
    match mimo {
        MimoType::TxDiversity => {
            let n = d[0].len() / nof_layers;
            for (i, group) in d[0].chunks_exact(nof_layers).take(n).enumerate() {
                for (layer, &symbol) in group.iter().enumerate() {
                    x[layer][i] = symbol;
                }
            }
            n
        }
        _ => {
            let n = d.iter().take(nof_layers).map(|cw| cw.len()).min().unwrap_or(0);
            for (layer, cw) in d.iter().take(nof_layers).enumerate() {
                x[layer][..n].copy_from_slice(&cw[..n]);
            }
            n
        }
    }
}

/// Layer demapping: gather layer symbols back into codewords
pub fn layer_demap(
    mimo: MimoType,
    nof_layers: usize,
    x: &[Vec<Complex32>],
    nof_symbols_per_layer: usize,
    d: &mut [&mut [Complex32]],
) {
    match mimo {
        MimoType::TxDiversity => {
            for (i, group) in d[0]
                .chunks_exact_mut(nof_layers)
                .take(nof_symbols_per_layer)
                .enumerate()
            {
                for (layer, symbol) in group.iter_mut().enumerate() {
                    *symbol = x[layer][i];
                }
            }
        }
        _ => {
            for (layer, cw) in d.iter_mut().take(nof_layers).enumerate() {
                cw[..nof_symbols_per_layer].copy_from_slice(&x[layer][..nof_symbols_per_layer]);
            }
        }
    }
}

/// Precoding: map layers onto antenna ports, returns the number of REs written per port
pub fn precode(
    mimo: MimoType,
    nof_ports: usize,
    nof_layers: usize,
    codebook_idx: u32,
    x: &[Vec<Complex32>],
    nof_symbols_per_layer: usize,
    y: &mut [Vec<Complex32>],
) -> usize {
    let n = nof_symbols_per_layer;
    match mimo {
        MimoType::SingleAntenna => {
            y[0][..n].copy_from_slice(&x[0][..n]);
            n
        }
        MimoType::TxDiversity if nof_ports == 2 => {
            for i in 0..n {
                let (first, second) = sfbc_encode(x[0][i], x[1][i]);
                y[0][2 * i] = first[0];
                y[1][2 * i] = first[1];
                y[0][2 * i + 1] = second[0];
                y[1][2 * i + 1] = second[1];
            }
            2 * n
        }
        MimoType::TxDiversity => {
            // SFBC-FSTD: ports 0/2 carry layers 0/1, ports 1/3 carry layers 2/3
            let zero = Complex32::zero();
            for i in 0..n {
                let (a0, a1) = sfbc_encode(x[0][i], x[1][i]);
                let (b0, b1) = sfbc_encode(x[2][i], x[3][i]);
                let re = 4 * i;
                for port in 0..4 {
                    for k in 0..4 {
                        y[port][re + k] = zero;
                    }
                }
                y[0][re] = a0[0];
                y[2][re] = a0[1];
                y[0][re + 1] = a1[0];
                y[2][re + 1] = a1[1];
                y[1][re + 2] = b0[0];
                y[3][re + 2] = b0[1];
                y[1][re + 3] = b1[0];
                y[3][re + 3] = b1[1];
            }
            4 * n
        }
        MimoType::SpatialMultiplexing | MimoType::Cdd => {
            let fixed = codebook_2ports(nof_layers, codebook_idx);
            for i in 0..n {
                let w = match (mimo, fixed) {
                    (MimoType::SpatialMultiplexing, Some(w)) => w,
                    _ => cdd_2ports(i),
                };
                for (port, row) in w.iter().enumerate().take(nof_ports) {
                    y[port][i] = (0..nof_layers).map(|l| row[l] * x[l][i]).sum();
                }
            }
            n
        }
    }
}

/// SFBC of a symbol pair, returns the (port a, port b) values of both REs
fn sfbc_encode(a: Complex32, b: Complex32) -> ([Complex32; 2], [Complex32; 2]) {
    let h = FRAC_1_SQRT_2;
    ([a * h, -b.conj() * h], [b * h, a.conj() * h])
}

/// Alamouti combining of one RE pair transmitted on ports `pa` and `pb`
fn sfbc_combine(
    r: &[Vec<Complex32>],
    h: &[Vec<Vec<Complex32>>],
    pa: usize,
    pb: usize,
    re: usize,
    nof_rx: usize,
) -> (Complex32, Complex32) {
    let mut num_a = Complex32::zero();
    let mut num_b = Complex32::zero();
    let mut energy = 0.0f32;
    for rx in 0..nof_rx {
        let h0 = h[pa][rx][re];
        let h1 = h[pb][rx][re];
        let h2 = h[pa][rx][re + 1];
        let h3 = h[pb][rx][re + 1];
        let r0 = r[rx][re];
        let r1 = r[rx][re + 1];
        num_a += h0.conj() * r0 + h3 * r1.conj();
        num_b += -h1 * r0.conj() + h2.conj() * r1;
        energy += 0.5 * (h0.norm_sqr() + h1.norm_sqr() + h2.norm_sqr() + h3.norm_sqr());
    }
    if energy <= SINGULAR_EPSILON {
        return (Complex32::zero(), Complex32::zero());
    }
    (num_a * (SQRT_2 / energy), num_b * (SQRT_2 / energy))
}

/// Effective channel `G = H P` of one RE for one receive antenna, indexed by layer
fn effective_channel(
    h: &[Vec<Vec<Complex32>>],
    rx: usize,
    re: usize,
    w: &Precoder2x2,
    nof_ports: usize,
    nof_layers: usize,
) -> [Complex32; 2] {
    let mut g = [Complex32::zero(); 2];
    for (layer, gl) in g.iter_mut().enumerate().take(nof_layers) {
        *gl = (0..nof_ports).map(|p| h[p][rx][re] * w[p][layer]).sum();
    }
    g
}

/// Gram matrix `G^H G` accumulated over receive antennas: (g00, g01, g11)
pub(crate) fn gram_2x2(g: &[[Complex32; 2]]) -> (f32, Complex32, f32) {
    let mut g00 = 0.0f32;
    let mut g01 = Complex32::zero();
    let mut g11 = 0.0f32;
    for row in g {
        g00 += row[0].norm_sqr();
        g11 += row[1].norm_sqr();
        g01 += row[0].conj() * row[1];
    }
    (g00, g01, g11)
}

/// Per-layer post-MMSE SINR of a two-layer effective channel
pub(crate) fn mmse_sinr_2x2(g: &[[Complex32; 2]], noise: f32) -> [f32; 2] {
    let (g00, g01, g11) = gram_2x2(g);
    let a00 = g00 + noise;
    let a11 = g11 + noise;
    let det = a00 * a11 - g01.norm_sqr();
    if det <= SINGULAR_EPSILON || noise <= 0.0 {
        return [0.0, 0.0];
    }
    // SINR_l = 1 / (noise * [A^-1]_ll) - 1
    let inv00 = a11 / det;
    let inv11 = a00 / det;
    [
        (1.0 / (noise * inv00) - 1.0).max(0.0),
        (1.0 / (noise * inv11) - 1.0).max(0.0),
    ]
}

/// MIMO detection: recover layer symbols from the extracted REs
///
/// `r` is indexed `[rx][re]` and `h` `[port][rx][re]`. Returns symbols per layer.
#[allow(clippy::too_many_arguments)]
pub fn detect(
    mimo: MimoType,
    nof_ports: usize,
    nof_layers: usize,
    codebook_idx: u32,
    r: &[Vec<Complex32>],
    h: &[Vec<Vec<Complex32>>],
    nof_rx: usize,
    nof_re: usize,
    noise_estimate: f32,
    x: &mut [Vec<Complex32>],
) -> usize {
    match mimo {
        MimoType::SingleAntenna => {
            for i in 0..nof_re {
                let mut num = Complex32::zero();
                let mut energy = 0.0f32;
                for rx in 0..nof_rx {
                    num += h[0][rx][i].conj() * r[rx][i];
                    energy += h[0][rx][i].norm_sqr();
                }
                x[0][i] = if energy > SINGULAR_EPSILON { num / energy } else { Complex32::zero() };
            }
            nof_re
        }
        MimoType::TxDiversity if nof_ports == 2 => {
            let n = nof_re / 2;
            for i in 0..n {
                let (a, b) = sfbc_combine(r, h, 0, 1, 2 * i, nof_rx);
                x[0][i] = a;
                x[1][i] = b;
            }
            n
        }
        MimoType::TxDiversity => {
            let n = nof_re / 4;
            for i in 0..n {
                let (a, b) = sfbc_combine(r, h, 0, 2, 4 * i, nof_rx);
                let (c2, d2) = sfbc_combine(r, h, 1, 3, 4 * i + 2, nof_rx);
                x[0][i] = a;
                x[1][i] = b;
                x[2][i] = c2;
                x[3][i] = d2;
            }
            n
        }
        MimoType::SpatialMultiplexing | MimoType::Cdd => {
            let fixed = codebook_2ports(nof_layers, codebook_idx);
            let mut g = [[Complex32::zero(); 2]; common::MAX_PORTS];
            for i in 0..nof_re {
                let w = match (mimo, fixed) {
                    (MimoType::SpatialMultiplexing, Some(w)) => w,
                    _ => cdd_2ports(i),
                };
                for (rx, row) in g.iter_mut().enumerate().take(nof_rx) {
                    *row = effective_channel(h, rx, i, &w, nof_ports, nof_layers);
                }
                if nof_layers == 1 {
                    let mut num = Complex32::zero();
                    let mut energy = 0.0f32;
                    for rx in 0..nof_rx {
                        num += g[rx][0].conj() * r[rx][i];
                        energy += g[rx][0].norm_sqr();
                    }
                    x[0][i] = if energy > SINGULAR_EPSILON { num / energy } else { Complex32::zero() };
                } else {
                    let [x0, x1] = mmse_2x2(&g[..nof_rx], r, i, noise_estimate);
                    x[0][i] = x0;
                    x[1][i] = x1;
                }
            }
            nof_re
        }
    }
}

/// Unbiased two-layer MMSE estimate of one RE
fn mmse_2x2(g: &[[Complex32; 2]], r: &[Vec<Complex32>], re: usize, noise: f32) -> [Complex32; 2] {
    let noise = noise.max(0.0);
    let (g00, g01, g11) = gram_2x2(g);
    let a00 = g00 + noise;
    let a11 = g11 + noise;
    let det = a00 * a11 - g01.norm_sqr();
    if det <= SINGULAR_EPSILON {
        return [Complex32::zero(); 2];
    }

    // b = G^H r
    let mut b0 = Complex32::zero();
    let mut b1 = Complex32::zero();
    for (rx, row) in g.iter().enumerate() {
        b0 += row[0].conj() * r[rx][re];
        b1 += row[1].conj() * r[rx][re];
    }

    // z = A^-1 b with A = [[a00, g01], [conj(g01), a11]]
    let z0 = (b0 * a11 - g01 * b1) / det;
    let z1 = (b1 * a00 - g01.conj() * b0) / det;

    // Remove the MMSE bias: beta_l = 1 - noise * [A^-1]_ll
    let beta0 = 1.0 - noise * a11 / det;
    let beta1 = 1.0 - noise * a00 / det;
    let unbias = |z: Complex32, beta: f32| {
        if beta > SINGULAR_EPSILON {
            z / beta
        } else {
            Complex32::zero()
        }
    };
    [unbias(z0, beta0), unbias(z1, beta1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;

    fn assert_close(a: Complex32, b: Complex32) {
        assert_float_eq!(a.re, b.re, abs <= 1e-4);
        assert_float_eq!(a.im, b.im, abs <= 1e-4);
    }

    fn symbols(n: usize, seed: f32) -> Vec<Complex32> {
        (0..n)
            .map(|i| c(((i as f32 + seed) * 0.7).sin(), ((i as f32 + seed) * 1.3).cos()))
            .collect()
    }

    /// Flat channel `h[port][rx]` replicated over `n` REs
    fn flat_channel(taps: &[[Complex32; 2]], nof_rx: usize, n: usize) -> Vec<Vec<Vec<Complex32>>> {
        taps.iter()
            .map(|per_rx| (0..nof_rx).map(|rx| vec![per_rx[rx]; n]).collect())
            .collect()
    }

    /// r[rx][i] = sum_p h[p][rx] y[p][i]
    fn propagate(h: &[Vec<Vec<Complex32>>], y: &[Vec<Complex32>], nof_rx: usize, n: usize) -> Vec<Vec<Complex32>> {
        (0..nof_rx)
            .map(|rx| (0..n).map(|i| (0..h.len()).map(|p| h[p][rx][i] * y[p][i]).sum()).collect())
            .collect()
    }

    fn loopback(mimo: MimoType, nof_ports: usize, nof_layers: usize, codebook_idx: u32, nof_cw: usize) {
        let n_cw = 48;
        let cws: Vec<Vec<Complex32>> = (0..nof_cw).map(|cw| symbols(n_cw, cw as f32 * 10.0)).collect();
        let d: Vec<&[Complex32]> = cws.iter().map(|cw| cw.as_slice()).collect();
        let mut x = vec![vec![Complex32::zero(); n_cw]; 4];
        let n_layer = layer_map(mimo, nof_layers, &d, &mut x);

        let mut y = vec![vec![Complex32::zero(); n_cw]; nof_ports];
        let nof_re = precode(mimo, nof_ports, nof_layers, codebook_idx, &x, n_layer, &mut y);

        let taps = [
            [c(0.9, 0.1), c(0.2, -0.3)],
            [c(-0.1, 0.4), c(1.1, 0.2)],
            [c(0.3, 0.3), c(-0.5, 0.1)],
            [c(0.2, -0.6), c(0.4, 0.4)],
        ];
        let nof_rx = 2;
        let h = flat_channel(&taps[..nof_ports], nof_rx, nof_re);
        let r = propagate(&h, &y, nof_rx, nof_re);

        let mut x_hat = vec![vec![Complex32::zero(); n_cw]; 4];
        let n_rx_layer = detect(mimo, nof_ports, nof_layers, codebook_idx, &r, &h, nof_rx, nof_re, 0.0, &mut x_hat);
        assert_eq!(n_rx_layer, n_layer);

        let mut out: Vec<Vec<Complex32>> = vec![vec![Complex32::zero(); n_cw]; nof_cw];
        let mut out_refs: Vec<&mut [Complex32]> = out.iter_mut().map(|v| v.as_mut_slice()).collect();
        layer_demap(mimo, nof_layers, &x_hat, n_rx_layer, &mut out_refs);
        for (sent, received) in cws.iter().zip(&out) {
            for (&a, &b) in sent.iter().zip(received) {
                assert_close(a, b);
            }
        }
    }

    #[test]
    fn test_single_antenna_loopback() {
        loopback(MimoType::SingleAntenna, 1, 1, 0, 1);
    }

    #[test]
    fn test_tx_diversity_loopback() {
        loopback(MimoType::TxDiversity, 2, 2, 0, 1);
        loopback(MimoType::TxDiversity, 4, 4, 0, 1);
    }

    #[test]
    fn test_spatial_multiplexing_loopback() {
        for idx in 0..4 {
            loopback(MimoType::SpatialMultiplexing, 2, 1, idx, 1);
        }
        for idx in 1..3 {
            loopback(MimoType::SpatialMultiplexing, 2, 2, idx, 2);
        }
    }

    #[test]
    fn test_cdd_loopback() {
        loopback(MimoType::Cdd, 2, 2, 0, 2);
    }

    #[test]
    fn test_codebook_bounds() {
        assert!(codebook_2ports(1, 3).is_some());
        assert!(codebook_2ports(1, 4).is_none());
        assert!(codebook_2ports(2, 2).is_some());
        assert!(codebook_2ports(2, 3).is_none());
        assert_eq!(codebook_size(2), 3);
    }

    #[test]
    fn test_mmse_sinr_orthogonal_layers() {
        // Identity channel, unit precoder columns: each layer sees SINR 1/noise
        let g = [[c(1.0, 0.0), Complex32::zero()], [Complex32::zero(), c(1.0, 0.0)]];
        let sinr = mmse_sinr_2x2(&g, 0.01);
        assert_float_eq!(sinr[0], 100.0, rmax <= 1e-3);
        assert_float_eq!(sinr[1], 100.0, rmax <= 1e-3);
    }
}

//! LTE rate-1/3 turbo code (TS 36.212 Section 5.1.3.2)
//!
//! Two 8-state recursive systematic convolutional encoders with transfer function
//! G(D) = [1, g1(D)/g0(D)], g0 = 1 + D^2 + D^3 and g1 = 1 + D + D^3, joined by the QPP
//! interleaver. The decoder runs max-log-MAP constituent decoders exchanging extrinsic
//! information.
//!
//! Coded output is stream-indexed: `d[0..D]` systematic, `d[D..2D]` first parity and
//! `d[2D..3D]` second parity, D = K + 4.

use interfaces::softbuffer::TURBO_TAIL_BITS;

const NOF_STATES: usize = 8;
/// Trellis termination steps per constituent encoder
const TAIL_STEPS: usize = 3;
/// Log-domain minus infinity
const NEG: f32 = -1.0e30;

/// Feedback bit of a state (a2 ^ a3)
#[inline]
fn feedback(state: usize) -> u8 {
    (((state >> 1) ^ state) & 1) as u8
}

/// Transition for register input `a`: returns (next state, parity bit)
#[inline]
fn transition(state: usize, a: u8) -> (usize, u8) {
    let a1 = ((state >> 2) & 1) as u8;
    let a3 = (state & 1) as u8;
    let next = ((a as usize) << 2) | (state >> 1);
    (next, a ^ a1 ^ a3)
}

/// Coded stream length D for a code block of K bits
pub fn stream_len(k: usize) -> usize {
    k + TURBO_TAIL_BITS
}

/// Run one constituent encoder, returns the tail (x, z) pairs
fn rsc_encode(input: impl Iterator<Item = u8>, parity: &mut [u8]) -> [(u8, u8); TAIL_STEPS] {
    let mut state = 0usize;
    for (u, z) in input.zip(parity.iter_mut()) {
        let a = u ^ feedback(state);
        let (next, p) = transition(state, a);
        *z = p;
        state = next;
    }

    let mut tail = [(0u8, 0u8); TAIL_STEPS];
    for t in tail.iter_mut() {
        let x = feedback(state);
        let (next, p) = transition(state, 0);
        *t = (x, p);
        state = next;
    }
    tail
}

/// Turbo-encode K bits into three streams of K + 4 bits
pub fn encode(input: &[u8], perm: &[usize], d: &mut [u8]) {
    let k = input.len();
    let len = stream_len(k);
    let (d0, rest) = d.split_at_mut(len);
    let (d1, d2) = rest.split_at_mut(len);

    d0[..k].copy_from_slice(input);
    let tail1 = rsc_encode(input.iter().copied(), &mut d1[..k]);
    let tail2 = rsc_encode(perm.iter().map(|&p| input[p]), &mut d2[..k]);

    let [(x0, z0), (x1, z1), (x2, z2)] = tail1;
    let [(y0, w0), (y1, w1), (y2, w2)] = tail2;
    d0[k..k + 4].copy_from_slice(&[x0, z1, y0, w1]);
    d1[k..k + 4].copy_from_slice(&[z0, x2, w0, y2]);
    d2[k..k + 4].copy_from_slice(&[x1, z2, y1, w2]);
}

/// Max-log-MAP iterative turbo decoder with scratch sized for the largest code block
#[derive(Debug)]
pub struct TurboDecoder {
    alpha: Vec<[f32; NOF_STATES]>,
    beta: Vec<[f32; NOF_STATES]>,
    /// A-priori input of the current constituent decoder
    apriori: Vec<f32>,
    /// Extrinsic output of the current constituent decoder
    extrinsic: Vec<f32>,
    /// Systematic soft bits in interleaved order
    sys_interleaved: Vec<f32>,
    /// A-posteriori soft bits in natural order
    app: Vec<f32>,
}

impl TurboDecoder {
    pub fn new(max_k: usize) -> Self {
        let steps = max_k + TAIL_STEPS + 1;
        Self {
            alpha: vec![[NEG; NOF_STATES]; steps],
            beta: vec![[NEG; NOF_STATES]; steps],
            apriori: vec![0.0; max_k],
            extrinsic: vec![0.0; max_k],
            sys_interleaved: vec![0.0; max_k],
            app: vec![0.0; max_k],
        }
    }

    /// Prepare decoding of a new code block of K bits
    pub fn reset(&mut self, k: usize) {
        self.apriori[..k].fill(0.0);
        self.extrinsic[..k].fill(0.0);
        self.app[..k].fill(0.0);
    }

    /// One full turbo iteration (both constituent decoders) over stream-indexed soft bits
    pub fn iterate(&mut self, llr: &[f32], perm: &[usize]) {
        let k = perm.len();
        let len = stream_len(k);
        let d0 = &llr[..len];
        let d1 = &llr[len..2 * len];
        let d2 = &llr[2 * len..3 * len];

        // Decoder 1: natural order, a-priori from decoder 2 deinterleaved
        for (i, &p) in perm.iter().enumerate() {
            self.apriori[p] = self.extrinsic[i];
        }
        let tail1 = [(d0[k], d1[k]), (d2[k], d0[k + 1]), (d1[k + 1], d2[k + 1])];
        self.constituent(&d0[..k], &d1[..k], tail1, k);

        // Decoder 2: interleaved order
        for (i, &p) in perm.iter().enumerate() {
            self.sys_interleaved[i] = d0[p];
            self.apriori[i] = self.extrinsic[p];
        }
        let tail2 = [(d0[k + 2], d1[k + 2]), (d2[k + 2], d0[k + 3]), (d1[k + 3], d2[k + 3])];
        let sys = std::mem::take(&mut self.sys_interleaved);
        self.constituent(&sys[..k], &d2[..k], tail2, k);
        self.sys_interleaved = sys;

        // A-posteriori in natural order
        for (i, &p) in perm.iter().enumerate() {
            self.app[p] = self.sys_interleaved[i] + self.apriori[i] + self.extrinsic[i];
        }
    }

    /// Hard decisions of the latest iteration
    pub fn decide(&self, out: &mut [u8]) {
        for (bit, &l) in out.iter_mut().zip(&self.app) {
            *bit = (l < 0.0) as u8;
        }
    }

    /// Max-log-MAP pass of one constituent decoder; writes extrinsic soft bits
    fn constituent(&mut self, sys: &[f32], par: &[f32], tail: [(f32, f32); TAIL_STEPS], k: usize) {
        let steps = k + TAIL_STEPS;
        let gamma = |x: u8, z: u8, ls: f32, lp: f32| {
            let sx = if x == 0 { 0.5 } else { -0.5 };
            let sz = if z == 0 { 0.5 } else { -0.5 };
            sx * ls + sz * lp
        };
        let branch = |i: usize, state: usize, a: u8, apriori: &[f32]| -> Option<(usize, u8, f32)> {
            if i >= k && a != 0 {
                return None;
            }
            let x = a ^ feedback(state);
            let (next, z) = transition(state, a);
            let (ls, lp) = if i < k {
                (sys[i] + apriori[i], par[i])
            } else {
                tail[i - k]
            };
            Some((next, x, gamma(x, z, ls, lp)))
        };

        // Forward recursion
        self.alpha[0] = [NEG; NOF_STATES];
        self.alpha[0][0] = 0.0;
        for i in 0..steps {
            let mut next_alpha = [NEG; NOF_STATES];
            for state in 0..NOF_STATES {
                let a_prev = self.alpha[i][state];
                if a_prev <= NEG {
                    continue;
                }
                for a in 0..2u8 {
                    if let Some((next, _, g)) = branch(i, state, a, &self.apriori) {
                        next_alpha[next] = next_alpha[next].max(a_prev + g);
                    }
                }
            }
            let norm = next_alpha.iter().copied().fold(NEG, f32::max);
            for v in next_alpha.iter_mut() {
                *v -= norm;
            }
            self.alpha[i + 1] = next_alpha;
        }

        // Backward recursion, terminated in state 0
        self.beta[steps] = [NEG; NOF_STATES];
        self.beta[steps][0] = 0.0;
        for i in (0..steps).rev() {
            let mut prev_beta = [NEG; NOF_STATES];
            for (state, pb) in prev_beta.iter_mut().enumerate() {
                for a in 0..2u8 {
                    if let Some((next, _, g)) = branch(i, state, a, &self.apriori) {
                        *pb = pb.max(self.beta[i + 1][next] + g);
                    }
                }
            }
            let norm = prev_beta.iter().copied().fold(NEG, f32::max);
            for v in prev_beta.iter_mut() {
                *v -= norm;
            }
            self.beta[i] = prev_beta;
        }

        // Extrinsic information of the information bits
        for i in 0..k {
            let mut best = [NEG; 2];
            for state in 0..NOF_STATES {
                let a_prev = self.alpha[i][state];
                for a in 0..2u8 {
                    if let Some((next, x, g)) = branch(i, state, a, &self.apriori) {
                        let metric = a_prev + g + self.beta[i + 1][next];
                        best[x as usize] = best[x as usize].max(metric);
                    }
                }
            }
            self.extrinsic[i] = best[0] - best[1] - sys[i] - self.apriori[i];
        }
    }
}

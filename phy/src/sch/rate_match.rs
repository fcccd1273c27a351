//! Turbo rate matching (TS 36.212 Section 5.1.4.1)
//!
//! Sub-block interleaving of the three turbo output streams, bit collection into the
//! circular buffer and bit selection starting at the redundancy-version offset. The
//! circular buffer is kept as an index map into the stream-indexed coded block so the
//! transmit side selects bits and the receive side accumulates soft bits through the
//! same walk.

/// Columns of the sub-block interleaver
const NOF_COLUMNS: usize = 32;

/// Inter-column permutation (Table 5.1.4-1)
const COLUMN_PERMUTATION: [usize; NOF_COLUMNS] = [
    0, 16, 8, 24, 4, 20, 12, 28, 2, 18, 10, 26, 6, 22, 14, 30, 1, 17, 9, 25, 5, 21, 13, 29, 3,
    19, 11, 27, 7, 23, 15, 31,
];

/// Marker of a dummy or filler position in the circular buffer
const NULL: u32 = u32::MAX;

/// Circular buffer of one code block
#[derive(Debug, Default)]
pub struct CircularBuffer {
    /// Stream-indexed coded bit position of every buffer entry, or NULL
    map: Vec<u32>,
    /// Rows of the sub-block interleaver (R)
    rows: usize,
}

impl CircularBuffer {
    pub fn with_capacity(max_stream_len: usize) -> Self {
        let rows = (max_stream_len + NOF_COLUMNS - 1) / NOF_COLUMNS;
        Self {
            map: Vec::with_capacity(3 * rows * NOF_COLUMNS),
            rows: 0,
        }
    }

    /// Build the buffer for streams of `stream_len` bits whose first `nof_filler`
    /// systematic and first-parity bits are filler
    pub fn build(&mut self, stream_len: usize, nof_filler: usize) {
        let rows = (stream_len + NOF_COLUMNS - 1) / NOF_COLUMNS;
        let k_pi = rows * NOF_COLUMNS;
        let nof_dummy = k_pi - stream_len;
        self.rows = rows;
        self.map.clear();
        self.map.resize(3 * k_pi, NULL);

        // Position inside the (dummy-padded) interleaver input, mapped to a stream bit
        let to_stream = |stream: usize, y: usize| -> u32 {
            if y < nof_dummy {
                return NULL;
            }
            let k = y - nof_dummy;
            if stream < 2 && k < nof_filler {
                NULL
            } else {
                (stream * stream_len + k) as u32
            }
        };

        for k in 0..k_pi {
            let column = COLUMN_PERMUTATION[k / rows];
            let y = column + NOF_COLUMNS * (k % rows);
            let y2 = (y + 1) % k_pi;
            self.map[k] = to_stream(0, y);
            self.map[k_pi + 2 * k] = to_stream(1, y);
            self.map[k_pi + 2 * k + 1] = to_stream(2, y2);
        }
    }

    /// Circular buffer length (Ncb = Kw, no limited buffer)
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Starting position k0 of a redundancy version
    pub fn start(&self, rv: u32) -> usize {
        let ncb = self.len();
        let rows = self.rows;
        let cols = (ncb + 8 * rows - 1) / (8 * rows);
        rows * (2 * cols * rv as usize + 2)
    }

    /// Visit the stream positions of the `e` selected bits for `rv`, in transmission order
    fn walk(&self, rv: u32, e: usize, mut visit: impl FnMut(usize, usize)) {
        let ncb = self.len();
        if ncb == 0 || self.map.iter().all(|&m| m == NULL) {
            return;
        }
        let mut pos = self.start(rv) % ncb;
        let mut selected = 0;
        while selected < e {
            let m = self.map[pos];
            if m != NULL {
                visit(selected, m as usize);
                selected += 1;
            }
            pos += 1;
            if pos == ncb {
                pos = 0;
            }
        }
    }

    /// Select `e.len()` bits out of the stream-indexed coded block
    pub fn select(&self, coded: &[u8], rv: u32, e: &mut [u8]) {
        let len = e.len();
        self.walk(rv, len, |i, m| e[i] = coded[m]);
    }

    /// Accumulate received soft bits into the stream-indexed soft buffer
    pub fn accumulate(&self, llr: &[f32], rv: u32, soft: &mut [f32]) {
        self.walk(rv, llr.len(), |i, m| soft[m] += llr[i]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_covers_every_stream_bit_once() {
        let stream_len = 44;
        let mut cb = CircularBuffer::with_capacity(stream_len);
        cb.build(stream_len, 0);
        assert_eq!(cb.len(), 3 * 64);

        let mut seen = vec![0usize; 3 * stream_len];
        for &m in &cb.map {
            if m != NULL {
                seen[m as usize] += 1;
            }
        }
        assert!(seen.iter().all(|&n| n == 1));
    }

    #[test]
    fn test_filler_bits_are_never_selected() {
        let stream_len = 44;
        let filler = 8;
        let mut cb = CircularBuffer::with_capacity(stream_len);
        cb.build(stream_len, filler);
        let nulls = cb.map.iter().filter(|&&m| m == NULL).count();
        assert_eq!(nulls, 3 * (64 - stream_len) + 2 * filler);

        let mut selected = Vec::new();
        cb.walk(0, 300, |_, m| selected.push(m));
        assert!(selected
            .iter()
            .all(|&m| !(m < filler || (stream_len..stream_len + filler).contains(&m))));
    }

    #[test]
    fn test_first_bits_of_rv0() {
        // K = 40: D = 44, R = 2, 20 dummies, Ncb = 192; k0 = R * (2 * 12 * rv + 2)
        let mut cb = CircularBuffer::with_capacity(44);
        cb.build(44, 0);
        assert_eq!(cb.start(0), 4);
        assert_eq!(cb.start(2), 100);

        let coded: Vec<u8> = (0..3 * 44).map(|i| (i % 2) as u8).collect();
        let mut e = vec![0u8; 132];
        cb.select(&coded, 0, &mut e);
        let mut soft = vec![0.0f32; 3 * 44];
        let llr: Vec<f32> = e.iter().map(|&b| if b == 0 { 1.0 } else { -1.0 }).collect();
        cb.accumulate(&llr, 0, &mut soft);
        for (bit, value) in coded.iter().zip(&soft) {
            assert_eq!(*bit == 0, *value > 0.0);
        }
    }

    #[test]
    fn test_repetition_accumulates() {
        let mut cb = CircularBuffer::with_capacity(44);
        cb.build(44, 0);
        let llr = vec![1.0f32; 2 * 132];
        let mut soft = vec![0.0f32; 132];
        cb.accumulate(&llr, 1, &mut soft);
        assert!(soft.iter().all(|&v| (v - 2.0).abs() < 1e-6));
    }
}

//! Turbo decoder iteration statistics

use serde::Serialize;

/// Default turbo iteration budget per code block
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Running iteration statistics of the decode path
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DecodeStats {
    max_iterations: u32,
    total_iterations: u64,
    nof_decodes: u64,
    last_iterations: u32,
}

impl DecodeStats {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
            total_iterations: 0,
            nof_decodes: 0,
            last_iterations: 0,
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn set_max_iterations(&mut self, max_iterations: u32) {
        self.max_iterations = max_iterations.max(1);
    }

    /// Account one decoded codeword
    pub fn record(&mut self, iterations: u32) {
        self.total_iterations += iterations as u64;
        self.nof_decodes += 1;
        self.last_iterations = iterations;
    }

    /// Mean iterations per decoded codeword, 0 before the first decode
    pub fn average(&self) -> f32 {
        if self.nof_decodes == 0 {
            0.0
        } else {
            self.total_iterations as f32 / self.nof_decodes as f32
        }
    }

    pub fn last(&self) -> u32 {
        self.last_iterations
    }

    pub fn nof_decodes(&self) -> u64 {
        self.nof_decodes
    }
}

impl Default for DecodeStats {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_and_last() {
        let mut stats = DecodeStats::default();
        assert_eq!(stats.average(), 0.0);
        assert_eq!(stats.max_iterations(), 5);
        for iterations in [2, 4, 6] {
            stats.record(iterations);
        }
        assert_eq!(stats.average(), 4.0);
        assert_eq!(stats.last(), 6);
        assert_eq!(stats.nof_decodes(), 3);
    }

    #[test]
    fn test_iteration_budget_is_at_least_one() {
        let mut stats = DecodeStats::new(0);
        assert_eq!(stats.max_iterations(), 1);
        stats.set_max_iterations(8);
        assert_eq!(stats.max_iterations(), 8);
    }
}

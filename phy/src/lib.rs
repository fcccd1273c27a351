//! LTE Downlink Physical Layer Library
//!
//! This crate implements the LTE Physical Downlink Shared Channel according to
//! 3GPP TS 36.211, TS 36.212 and TS 36.213.

pub mod mimo;
pub mod modem;
pub mod pdsch;
pub mod sch;
pub mod sequence;

use interfaces::CoderError;
use thiserror::Error;

pub use pdsch::{Concurrency, Pdsch, PdschOptions};

/// Common errors for the physical layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhyError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Over-allocation: code rate {coderate:.3} exceeds {max:.3}")]
    OverAllocation { coderate: f32, max: f32 },

    #[error("Invalid codeword index {0}")]
    InvalidCodeword(usize),

    #[error("Buffer too small: needed {needed}, available {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Worker for codeword {codeword} failed: {reason}")]
    WorkerFailed { codeword: usize, reason: String },

    #[error("Soft buffer of codeword {codeword} was lost with its worker")]
    SoftBufferLost { codeword: usize },

    #[error("Channel coding error: {0}")]
    Coding(#[from] CoderError),
}

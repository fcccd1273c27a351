//! Collaborator Contracts for the PDSCH engine
//!
//! This crate defines the narrow interfaces through which the PDSCH engine talks to its
//! collaborators: the DL-SCH channel coder and its HARQ soft buffers, the modem, and the
//! scrambling sequence generator.

pub mod coder;
pub mod modem;
pub mod sequence;
pub mod softbuffer;

pub use coder::{ChannelCoder, CodingParams, DecodeOutcome};
pub use modem::{Modulator, SoftDemodulator};
pub use sequence::SequenceGenerator;
pub use softbuffer::{SoftBufferRx, SoftBufferTx};

use thiserror::Error;

/// Collaborator errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoderError {
    #[error("Invalid transport block size: {0}")]
    InvalidTbs(u32),

    #[error("Invalid coding parameters: {0}")]
    InvalidParams(String),

    #[error("Buffer too small: need {needed}, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Soft buffer holds {available} code blocks, {needed} required")]
    SoftBufferTooSmall { needed: usize, available: usize },
}

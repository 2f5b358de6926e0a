//! Crate error kinds.

use thiserror::Error;

/// Distinguishable failure kinds.  Input problems abort one record, query
/// or sequence; allocation failures abort the whole query; a statistical
/// failure puts the evaluer in its bad state.
#[derive(Debug, Error)]
pub enum SaltoError {
    #[error("bad input: {0}")]
    InputFormat(String),

    #[error("out of memory: {0}")]
    Allocation(String),

    #[error("can't calculate alignment statistics: {0}")]
    Statistics(String),
}

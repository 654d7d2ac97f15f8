// src/error.rs
use core::fmt;

/// Library-wide error for windigest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WdError {
    /// User tried to insert NaN/±inf into the digest.
    /// `context` pinpoints where it came from (e.g., "sample value", "merge centroid").
    NonFiniteInput { context: &'static str },

    /// A non-positive or non-finite weight was passed to a weighted insert.
    InvalidWeight { got: f64 },

    /// Quantile/percentile probe outside `[0, 1]`.
    QuantileOutOfRange { got: f64 },

    /// Compression factor outside `[20, 1000]` at construction.
    InvalidCompression { got: f64 },

    /// Window configuration rejected at construction.
    InvalidConfig { what: &'static str },
}

impl fmt::Display for WdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WdError::NonFiniteInput { context } => write!(
                f,
                "windigest: non-finite values are not allowed ({}). \
hint: clean your data or drop NaN/±inf before feeding the digest",
                context
            ),
            WdError::InvalidWeight { got } => write!(
                f,
                "windigest: invalid sample weight ({}). hint: weight must be finite and > 0",
                got
            ),
            WdError::QuantileOutOfRange { got } => {
                write!(f, "windigest: quantile probe {} is outside [0, 1]", got)
            }
            WdError::InvalidCompression { got } => {
                write!(f, "windigest: compression factor {} is outside [20, 1000]", got)
            }
            WdError::InvalidConfig { what } => {
                write!(f, "windigest: invalid engine configuration: {}", what)
            }
        }
    }
}

impl std::error::Error for WdError {}

pub type WdResult<T> = Result<T, WdError>;

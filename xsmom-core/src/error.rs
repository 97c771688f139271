//! Engine error types.

use thiserror::Error;

use crate::panel::PanelError;

/// Errors raised by the numerical stages.
///
/// Degenerate inputs (too little history, flat PnL) are not errors: they
/// produce unknown cells or `NaN` metrics instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("axis mismatch: {0}")]
    AxisMismatch(String),

    #[error("panel error: {0}")]
    Panel(#[from] PanelError),
}

impl EngineError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}

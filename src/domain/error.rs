// ============================================================
// Layer 3: Model Errors
// ============================================================
// Every core operation (masking, attention, loss, bucketing)
// returns ModelResult<T>. Failures are fatal for the pass that
// raised them: the caller decides whether to abort the run.
//
//   Precondition     shape, dimension or argument violations
//   SequenceTooLong  input longer than the positional table
//   NoValidTargets   a batch whose targets are all ignored
//   TensorData       reading tensor values back to the host failed

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("{op}: precondition violated: {detail}")]
    Precondition { op: &'static str, detail: String },

    #[error("{op}: sequence length {len} exceeds the positional encoding capacity {max_len}")]
    SequenceTooLong {
        op:      &'static str,
        len:     usize,
        max_len: usize,
    },

    #[error("{op}: no target position is left after removing ignored labels")]
    NoValidTargets { op: &'static str },

    #[error("{op}: cannot read tensor data: {detail}")]
    TensorData { op: &'static str, detail: String },
}

pub type ModelResult<T> = Result<T, ModelError>;

impl ModelError {
    pub fn precondition(op: &'static str, detail: impl Into<String>) -> Self {
        Self::Precondition { op, detail: detail.into() }
    }
}

/// Fail with a precondition error unless `cond` holds.
/// The detail closure only runs on failure.
pub fn require(cond: bool, op: &'static str, detail: impl FnOnce() -> String) -> ModelResult<()> {
    if cond {
        Ok(())
    } else {
        Err(ModelError::precondition(op, detail()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_passes_and_fails() {
        assert!(require(true, "op", || unreachable!()).is_ok());
        let err = require(false, "pad_mask", || "empty lengths".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "pad_mask: precondition violated: empty lengths");
    }
}

// ============================================================
// Layer 3: Sample Metadata
// ============================================================
// A corpus is indexed once into SampleInfo records. Bucketing
// only needs these numbers; the (possibly large) input data is
// loaded later, when a minibatch is materialized.
//
//   ilen / idim   input frames and feature dim
//                 (for token inputs: length and vocabulary size)
//   olen / odim   target length and output vocabulary size

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleInfo {
    /// Utterance or sample identifier
    pub key:  String,
    pub ilen: usize,
    pub idim: usize,
    pub olen: usize,
    pub odim: usize,
}

impl SampleInfo {
    pub fn new(key: impl Into<String>, ilen: usize, idim: usize, olen: usize, odim: usize) -> Self {
        Self { key: key.into(), ilen, idim, olen, odim }
    }
}

/// The loaded input side of one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum InputData {
    /// Row-major `frames x dim` acoustic features
    Features {
        frames: usize,
        dim:    usize,
        values: Vec<f32>,
    },
    /// Discrete token ids
    Tokens(Vec<usize>),
}

impl InputData {
    /// Number of time steps
    pub fn len(&self) -> usize {
        match self {
            InputData::Features { frames, .. } => *frames,
            InputData::Tokens(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_len_counts_time_steps() {
        let feats = InputData::Features { frames: 3, dim: 2, values: vec![0.0; 6] };
        assert_eq!(feats.len(), 3);
        assert_eq!(InputData::Tokens(vec![4, 5]).len(), 2);
        assert!(InputData::Tokens(vec![]).is_empty());
    }
}

// ============================================================
// Layer 4: Length-Bucketed Batch Builder
// ============================================================
// Groups samples into minibatches whose size shrinks as the
// sequences get longer, keeping the token volume per batch
// roughly bounded.
//
//   1. stable sort ascending by output length
//   2. at the cursor sample:
//        factor = max(ilen / max_len_in, olen / max_len_out)   (integer division)
//        b      = max(1, batch_size / (1 + factor))
//   3. take min(b, remaining) samples, advance, repeat
//
// Every sample lands in exactly one batch and batch order follows
// output length. An optional cap stops after that many batches.

use serde::{Deserialize, Serialize};

use crate::domain::{
    error::{require, ModelResult},
    traits::SampleSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub batch_size:      usize,
    pub max_len_in:      usize,
    pub max_len_out:     usize,
    /// Stop after this many batches; `None` consumes every sample
    pub max_num_batches: Option<usize>,
}

impl BucketConfig {
    pub fn new(batch_size: usize, max_len_in: usize, max_len_out: usize) -> Self {
        Self { batch_size, max_len_in, max_len_out, max_num_batches: None }
    }

    pub fn with_max_num_batches(mut self, max_num_batches: usize) -> Self {
        self.max_num_batches = Some(max_num_batches);
        self
    }

    /// Adaptive batch size for a batch starting at a sample of these lengths.
    pub fn batch_size_for(&self, ilen: usize, olen: usize) -> usize {
        let factor = (ilen / self.max_len_in).max(olen / self.max_len_out);
        (self.batch_size / (1 + factor)).max(1)
    }
}

/// Partition `samples` into length-bucketed minibatches.
pub fn make_batchset<S: SampleSource>(mut samples: Vec<S>, cfg: &BucketConfig) -> ModelResult<Vec<Vec<S>>> {
    require(cfg.max_len_in >= 1 && cfg.max_len_out >= 1, "make_batchset", || {
        format!("length caps must be positive, got in={} out={}", cfg.max_len_in, cfg.max_len_out)
    })?;

    // Vec::sort_by_key is stable
    samples.sort_by_key(|s| s.info().olen);

    let limit = cfg.max_num_batches.unwrap_or(usize::MAX);
    let mut batchset = Vec::new();
    let mut rest = samples.into_iter().peekable();

    while batchset.len() < limit {
        let Some(head) = rest.peek() else { break };
        let info = head.info();
        let take = cfg.batch_size_for(info.ilen, info.olen);
        batchset.push(rest.by_ref().take(take).collect::<Vec<_>>());
    }

    tracing::debug!("Bucketed samples into {} minibatches", batchset.len());
    Ok(batchset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample::{InputData, SampleInfo};

    struct Meta(SampleInfo);

    impl SampleSource for Meta {
        fn info(&self) -> &SampleInfo {
            &self.0
        }

        fn load_input(&self) -> anyhow::Result<InputData> {
            Ok(InputData::Tokens(vec![0; self.0.ilen]))
        }

        fn load_target(&self) -> anyhow::Result<Vec<usize>> {
            Ok(vec![0; self.0.olen])
        }
    }

    fn meta(key: &str, ilen: usize, olen: usize) -> Meta {
        Meta(SampleInfo::new(key, ilen, 83, olen, 50))
    }

    fn keys(batches: &[Vec<Meta>]) -> Vec<Vec<String>> {
        batches.iter().map(|b| b.iter().map(|m| m.0.key.clone()).collect()).collect()
    }

    #[test]
    fn short_samples_fill_one_batch_in_output_length_order() {
        let samples = vec![
            meta("c", 300, 30),
            meta("a", 100, 10),
            meta("e", 500, 50),
            meta("b", 200, 20),
            meta("d", 400, 40),
        ];
        let batches = make_batchset(samples, &BucketConfig::new(5, 800, 150)).unwrap();
        assert_eq!(keys(&batches), vec![vec!["a", "b", "c", "d", "e"]]);
    }

    #[test]
    fn long_samples_get_smaller_batches() {
        let samples = vec![
            meta("short1", 100, 10),
            meta("short2", 100, 11),
            meta("long1", 1700, 20),
            meta("long2", 1700, 21),
            meta("long3", 1700, 22),
        ];
        // long samples: factor 2 → batch of 4 / 3 = 1
        let batches = make_batchset(samples, &BucketConfig::new(4, 800, 150)).unwrap();
        assert_eq!(
            keys(&batches),
            vec![vec!["short1", "short2", "long1", "long2"], vec!["long3"]]
        );
    }

    #[test]
    fn ties_keep_corpus_order() {
        let samples = vec![meta("x", 10, 5), meta("y", 10, 5), meta("z", 10, 4)];
        let batches = make_batchset(samples, &BucketConfig::new(2, 800, 150)).unwrap();
        assert_eq!(keys(&batches), vec![vec!["z", "x"], vec!["y"]]);
    }

    #[test]
    fn batch_cap_is_never_exceeded() {
        let samples: Vec<Meta> = (0..10).map(|i| meta(&format!("s{i}"), 10, i)).collect();
        let cfg = BucketConfig::new(2, 800, 150).with_max_num_batches(3);
        let batches = make_batchset(samples, &cfg).unwrap();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 2));
    }

    #[test]
    fn every_sample_lands_in_exactly_one_batch() {
        let samples: Vec<Meta> = (0..23).map(|i| meta(&format!("s{i}"), 90 * i, 7 * i)).collect();
        let batches = make_batchset(samples, &BucketConfig::new(6, 800, 50)).unwrap();

        let mut seen: Vec<String> = keys(&batches).into_iter().flatten().collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 23);
    }

    #[test]
    fn edge_cases() {
        let none: Vec<Meta> = Vec::new();
        assert!(make_batchset(none, &BucketConfig::new(4, 800, 150)).unwrap().is_empty());

        assert!(make_batchset(vec![meta("a", 1, 1)], &BucketConfig::new(4, 0, 150)).is_err());
        assert!(make_batchset(vec![meta("a", 1, 1)], &BucketConfig::new(4, 800, 0)).is_err());
    }
}

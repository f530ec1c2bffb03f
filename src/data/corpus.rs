// ============================================================
// Layer 4: ESPnet JSON Corpus
// ============================================================
// Indexes an ESPnet-style `data.json`:
//
//   { "utts": { "<key>": {
//       "input":  [{ "feat": "feats.ark:17", "shape": [ilen, idim] }],
//       "output": [{ "shape": [olen, odim], "tokenid": "3 4 5" }] } } }
//
// Indexing reads only the JSON; features are read from the ark
// when a minibatch is materialized. With an scp file the feature
// locations come from the scp instead of the "feat" fields.

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::PathBuf,
};

use crate::data::kaldi::{read_matrix, read_scp, ArkLocation};
use crate::domain::{
    sample::{InputData, SampleInfo},
    traits::{CorpusReader, SampleSource},
};

// ─── JSON schema ─────────────────────────────────────────────────────────────
#[derive(Debug, Deserialize)]
struct CorpusJson {
    utts: BTreeMap<String, UttJson>,
}

#[derive(Debug, Deserialize)]
struct UttJson {
    input:  Vec<InputJson>,
    output: Vec<OutputJson>,
}

#[derive(Debug, Deserialize)]
struct InputJson {
    #[serde(default)]
    feat:  Option<String>,
    shape: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct OutputJson {
    shape:   Vec<usize>,
    tokenid: String,
}

fn shape_pair(key: &str, side: &str, shape: &[usize]) -> Result<(usize, usize)> {
    match shape {
        [len, dim] => Ok((*len, *dim)),
        other => bail!("utterance '{key}': {side} shape {other:?} is not [len, dim]"),
    }
}

// ─── Utterance ───────────────────────────────────────────────────────────────
/// One indexed speech utterance.
#[derive(Debug, Clone)]
pub struct Utterance {
    info:     SampleInfo,
    location: ArkLocation,
    tokenid:  String,
}

impl Utterance {
    pub fn location(&self) -> &ArkLocation {
        &self.location
    }
}

impl SampleSource for Utterance {
    fn info(&self) -> &SampleInfo {
        &self.info
    }

    fn load_input(&self) -> Result<InputData> {
        let m = read_matrix(&self.location)
            .with_context(|| format!("Cannot load features of '{}'", self.info.key))?;
        ensure!(
            m.rows == self.info.ilen && m.cols == self.info.idim,
            "utterance '{}': features are {}x{} but the index says {}x{}",
            self.info.key, m.rows, m.cols, self.info.ilen, self.info.idim,
        );
        Ok(InputData::Features { frames: m.rows, dim: m.cols, values: m.values })
    }

    fn load_target(&self) -> Result<Vec<usize>> {
        let ids = self
            .tokenid
            .split_whitespace()
            .map(|t| t.parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("utterance '{}': bad tokenid '{}'", self.info.key, self.tokenid))?;

        ensure!(
            ids.len() == self.info.olen,
            "utterance '{}': {} token ids but the index says {}",
            self.info.key, ids.len(), self.info.olen,
        );
        if let Some(bad) = ids.iter().find(|&&id| id >= self.info.odim) {
            bail!("utterance '{}': token id {bad} is outside the vocabulary of {}", self.info.key, self.info.odim);
        }
        Ok(ids)
    }
}

// ─── EspnetCorpus ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct EspnetCorpus {
    json_path: PathBuf,
    scp_path:  Option<PathBuf>,
}

impl EspnetCorpus {
    pub fn new(json_path: impl Into<PathBuf>, scp_path: Option<PathBuf>) -> Self {
        Self { json_path: json_path.into(), scp_path }
    }
}

impl CorpusReader for EspnetCorpus {
    type Sample = Utterance;

    fn read_samples(&self) -> Result<Vec<Utterance>> {
        let text = fs::read_to_string(&self.json_path)
            .with_context(|| format!("Cannot read corpus '{}'", self.json_path.display()))?;
        let corpus: CorpusJson = serde_json::from_str(&text)
            .with_context(|| format!("Cannot parse corpus '{}'", self.json_path.display()))?;

        let scp: Option<HashMap<String, ArkLocation>> = self.scp_path.as_ref().map(read_scp).transpose()?;

        let mut utterances = Vec::with_capacity(corpus.utts.len());
        for (key, utt) in corpus.utts {
            let input = utt.input.first().with_context(|| format!("utterance '{key}' has no input"))?;
            let output = utt.output.first().with_context(|| format!("utterance '{key}' has no output"))?;
            let (ilen, idim) = shape_pair(&key, "input", &input.shape)?;
            let (olen, odim) = shape_pair(&key, "output", &output.shape)?;

            let location = match (&scp, &input.feat) {
                (Some(index), _) => index
                    .get(&key)
                    .cloned()
                    .with_context(|| format!("utterance '{key}' is missing from the scp"))?,
                (None, Some(feat)) => feat.parse()?,
                (None, None) => bail!("utterance '{key}' has no feat location and no scp was given"),
            };

            utterances.push(Utterance {
                info: SampleInfo::new(key, ilen, idim, olen, odim),
                location,
                tokenid: output.tokenid.clone(),
            });
        }

        tracing::info!(
            "Indexed {} utterances from '{}'",
            utterances.len(),
            self.json_path.display()
        );
        Ok(utterances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::kaldi::tests::write_matrix;

    fn corpus_json(ark: &str, off_a: u64, off_b: u64) -> String {
        format!(
            r#"{{"utts": {{
                "spk1_b": {{
                    "input":  [{{"feat": "{ark}:{off_b}", "name": "input1", "shape": [3, 2]}}],
                    "output": [{{"name": "target1", "shape": [2, 10], "text": "hi", "tokenid": "4 9"}}]
                }},
                "spk1_a": {{
                    "input":  [{{"feat": "{ark}:{off_a}", "shape": [2, 2]}}],
                    "output": [{{"shape": [3, 10], "tokenid": "1 2 3"}}]
                }}
            }}}}"#
        )
    }

    #[test]
    fn indexes_in_key_order_and_loads_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let ark = dir.path().join("feats.ark");
        let mut bytes = Vec::new();
        let off_a = write_matrix(&mut bytes, "spk1_a", 2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let off_b = write_matrix(&mut bytes, "spk1_b", 3, 2, &[0.0; 6]);
        fs::write(&ark, &bytes).unwrap();

        let json = dir.path().join("data.json");
        fs::write(&json, corpus_json(&ark.display().to_string(), off_a, off_b)).unwrap();

        let utts = EspnetCorpus::new(&json, None).read_samples().unwrap();
        assert_eq!(utts.len(), 2);
        assert_eq!(utts[0].info(), &SampleInfo::new("spk1_a", 2, 2, 3, 10));
        assert_eq!(utts[1].info().key, "spk1_b");

        assert_eq!(
            utts[0].load_input().unwrap(),
            InputData::Features { frames: 2, dim: 2, values: vec![1.0, 2.0, 3.0, 4.0] }
        );
        assert_eq!(utts[0].load_target().unwrap(), vec![1, 2, 3]);
        assert_eq!(utts[1].load_target().unwrap(), vec![4, 9]);
    }

    #[test]
    fn scp_overrides_feat_locations() {
        let dir = tempfile::tempdir().unwrap();
        let ark = dir.path().join("other.ark");
        let mut bytes = Vec::new();
        let off_a = write_matrix(&mut bytes, "spk1_a", 2, 2, &[9.0; 4]);
        let off_b = write_matrix(&mut bytes, "spk1_b", 3, 2, &[8.0; 6]);
        fs::write(&ark, &bytes).unwrap();

        let json = dir.path().join("data.json");
        fs::write(&json, corpus_json("/does/not/exist.ark", 0, 0)).unwrap();
        let scp = dir.path().join("feats.scp");
        fs::write(&scp, format!("spk1_a {0}:{off_a}\nspk1_b {0}:{off_b}\n", ark.display())).unwrap();

        let utts = EspnetCorpus::new(&json, Some(scp)).read_samples().unwrap();
        match utts[1].load_input().unwrap() {
            InputData::Features { values, .. } => assert_eq!(values, vec![8.0; 6]),
            other => panic!("unexpected input {other:?}"),
        }
    }

    #[test]
    fn inconsistent_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ark = dir.path().join("feats.ark");
        let mut bytes = Vec::new();
        let off = write_matrix(&mut bytes, "spk1_a", 2, 2, &[0.0; 4]);
        fs::write(&ark, &bytes).unwrap();

        let utt = Utterance {
            info:     SampleInfo::new("spk1_a", 5, 2, 1, 4),
            location: ArkLocation { path: ark, offset: off },
            tokenid:  "7".to_string(),
        };
        assert!(utt.load_input().is_err());
        assert!(utt.load_target().is_err());
    }
}

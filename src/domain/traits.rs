// ============================================================
// Layer 3: Core Traits (Abstractions)
// ============================================================
// The training pipeline only talks to corpora through these two
// traits, so the speech corpus (ESPnet JSON + Kaldi ark) and the
// synthetic copy task plug into the same bucketing, batching and
// training code.
//
//   EspnetCorpus   -> Utterance   (features read lazily from ark)
//   CopyTaskCorpus -> TokenSample (tokens held in memory)

use anyhow::Result;

use crate::domain::sample::{InputData, SampleInfo};

// ─── SampleSource ─────────────────────────────────────────────────────────────
/// One indexed sample whose data can be loaded on demand.
pub trait SampleSource {
    /// Metadata computed when the corpus was indexed
    fn info(&self) -> &SampleInfo;

    /// Load the input side (features or tokens)
    fn load_input(&self) -> Result<InputData>;

    /// Load the target token ids
    fn load_target(&self) -> Result<Vec<usize>>;
}

// ─── CorpusReader ─────────────────────────────────────────────────────────────
/// Anything that can index a set of samples.
pub trait CorpusReader {
    type Sample: SampleSource;

    /// Index every sample of the corpus.
    fn read_samples(&self) -> Result<Vec<Self::Sample>>;
}

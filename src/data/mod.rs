// ============================================================
// Layer 4: Data Pipeline
// ============================================================
// From corpus files to padded tensor batches:
//
//   data.json (+ feats.scp)        copy-task config
//       │                                │
//       ▼                                ▼
//   EspnetCorpus ─► Utterance      CopyTaskCorpus ─► TokenSample
//       │   (features read from       │
//       │    Kaldi ark on demand)     │
//       └──────────────┬──────────────┘
//                      ▼
//   make_batchset     length-bucketed minibatches of samples
//                      │
//                      ▼
//   SeqBatcher        loads and zero-pads one minibatch into tensors
//
// Both corpora implement the domain traits, so bucketing, batching
// and training never know which task they are running.

/// Kaldi binary ark matrices and scp indexes
pub mod kaldi;

/// ESPnet JSON corpus reader
pub mod corpus;

/// Synthetic copy-task corpus
pub mod copy_task;

/// Length-bucketed minibatch construction
pub mod bucketing;

/// Minibatch materialization into padded tensors
pub mod batcher;

// ============================================================
// Layer 2: TrainUseCase
// ============================================================
// Orchestrates a training run:
//
//   Step 1: Prepare the checkpoint directory   (Layer 6 - infra)
//   Step 2: Save the run configuration         (Layer 6 - infra)
//   Step 3: Index train and dev corpora        (Layer 4 - data)
//   Step 4: Derive the model config from data  (Layer 5 - ml)
//   Step 5: Run the training loop              (Layer 5 - ml)
//
// The speech task reads an ESPnet JSON corpus with Kaldi features
// and uses the Conv2dSubsampling front-end; the copy task generates
// token sequences and uses EmbedId.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::{
    bucketing::BucketConfig,
    copy_task::{CopyTaskConfig, CopyTaskCorpus},
    corpus::EspnetCorpus,
};
use crate::domain::traits::{CorpusReader, SampleSource};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    input_layer::{InputLayerKind, MIN_CONV_EXTENT},
    model::TransformerConfig,
    trainer::{run_training, TrainSummary},
};

// ─── Training Configuration ──────────────────────────────────────────────────
/// Which corpus the run trains on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "lowercase")]
pub enum TaskConfig {
    Speech {
        train_json: PathBuf,
        dev_json:   PathBuf,
        train_scp:  Option<PathBuf>,
        dev_scp:    Option<PathBuf>,
    },
    Copy {
        vocab:         usize,
        min_len:       usize,
        max_len:       usize,
        train_samples: usize,
        dev_samples:   usize,
    },
}

/// All settings of a training run. Saved as `train_config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub task:            TaskConfig,
    pub checkpoint_dir:  String,
    pub seed:            u64,
    pub epochs:          usize,
    pub resume:          bool,

    // schedule and batching
    pub lr:              f64,
    pub warmup_steps:    usize,
    pub batch_size:      usize,
    pub max_len_in:      usize,
    pub max_len_out:     usize,
    pub max_num_batches: Option<usize>,

    // model
    pub d_model:         usize,
    pub d_ff:            usize,
    pub heads:           usize,
    pub elayers:         usize,
    pub dlayers:         usize,
    pub dropout:         f64,
    pub label_smoothing: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            task: TaskConfig::Speech {
                train_json: PathBuf::from("data/train/data.json"),
                dev_json:   PathBuf::from("data/dev/data.json"),
                train_scp:  None,
                dev_scp:    None,
            },
            checkpoint_dir:  "checkpoints".to_string(),
            seed:            0,
            epochs:          200,
            resume:          false,
            lr:              10.0,
            warmup_steps:    25000,
            batch_size:      64,
            max_len_in:      512,
            max_len_out:     150,
            max_num_batches: None,
            d_model:         256,
            d_ff:            1024,
            heads:           4,
            elayers:         6,
            dlayers:         6,
            dropout:         0.1,
            label_smoothing: 0.1,
        }
    }
}

impl TrainConfig {
    pub fn model_config(&self, idim: usize, odim: usize, input_layer: InputLayerKind) -> TransformerConfig {
        TransformerConfig::new(idim, odim, input_layer)
            .with_d_model(self.d_model)
            .with_d_ff(self.d_ff)
            .with_heads(self.heads)
            .with_elayers(self.elayers)
            .with_dlayers(self.dlayers)
            .with_dropout(self.dropout)
            .with_label_smoothing(self.label_smoothing)
    }

    pub fn bucket_config(&self) -> BucketConfig {
        BucketConfig {
            batch_size:      self.batch_size,
            max_len_in:      self.max_len_in,
            max_len_out:     self.max_len_out,
            max_num_batches: self.max_num_batches,
        }
    }
}

/// Input and output dims shared by every train and dev sample.
fn corpus_dims<S: SampleSource>(train: &[S], dev: &[S]) -> Result<(usize, usize)> {
    let first = train.first().map(|s| s.info());
    let Some(first) = first else {
        anyhow::bail!("the training corpus is empty");
    };
    for s in train.iter().chain(dev) {
        let info = s.info();
        ensure!(
            info.idim == first.idim && info.odim == first.odim,
            "sample '{}' has dims ({}, {}) but '{}' has ({}, {})",
            info.key, info.idim, info.odim, first.key, first.idim, first.odim,
        );
    }
    Ok((first.idim, first.odim))
}

/// Drop utterances too short for the convolutional front-end.
fn drop_short<S: SampleSource>(samples: Vec<S>, split: &str) -> Vec<S> {
    let before = samples.len();
    let kept: Vec<S> = samples
        .into_iter()
        .filter(|s| s.info().ilen >= MIN_CONV_EXTENT && s.info().olen >= 1)
        .collect();
    if kept.len() < before {
        tracing::warn!(
            "Skipped {} {split} utterances shorter than {MIN_CONV_EXTENT} frames or without tokens",
            before - kept.len()
        );
    }
    kept
}

// ─── TrainUseCase ────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainSummary> {
        let cfg = &self.config;

        // ── Step 1-2: checkpoint directory and config ────────────────────────
        let ckpt = CheckpointManager::new(&cfg.checkpoint_dir)?;
        if cfg.resume {
            if let Some(previous) = ckpt.load_config()? {
                if previous.task != cfg.task {
                    tracing::warn!("Resuming with a different task configuration than the saved run");
                }
            }
        }
        ckpt.save_config(cfg)?;

        // ── Step 3-5: corpora, model config, training loop ───────────────────
        match &cfg.task {
            TaskConfig::Speech { train_json, dev_json, train_scp, dev_scp } => {
                let train = EspnetCorpus::new(train_json, train_scp.clone()).read_samples()?;
                let dev = EspnetCorpus::new(dev_json, dev_scp.clone()).read_samples()?;
                let train = drop_short(train, "train");
                let dev = drop_short(dev, "dev");

                let (idim, odim) = corpus_dims(&train, &dev)?;
                tracing::info!("idim: {idim}, odim: {odim}");
                let model_cfg = cfg.model_config(idim, odim, InputLayerKind::Conv2d);
                run_training(cfg, model_cfg, train, dev, ckpt)
            }
            TaskConfig::Copy { vocab, min_len, max_len, train_samples, dev_samples } => {
                let task = CopyTaskConfig {
                    vocab:       *vocab,
                    min_len:     *min_len,
                    max_len:     *max_len,
                    num_samples: *train_samples,
                    seed:        cfg.seed,
                };
                let train = CopyTaskCorpus::new(task).read_samples()?;
                let dev = CopyTaskCorpus::new(CopyTaskConfig {
                    num_samples: *dev_samples,
                    seed: cfg.seed.wrapping_add(1),
                    ..task
                })
                .read_samples()?;

                let model_cfg = cfg.model_config(*vocab, *vocab, InputLayerKind::Embed);
                run_training(cfg, model_cfg, train, dev, ckpt)
            }
        }
    }
}

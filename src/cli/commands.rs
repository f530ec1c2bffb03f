// ============================================================
// Layer 1: CLI Commands and Arguments
// ============================================================
// `train` and `copy` share every schedule, batching and model
// flag through the flattened CommonArgs; only the corpus flags
// differ. Defaults match TrainConfig::default().

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::train_use_case::{TaskConfig, TrainConfig};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train on an ESPnet-style speech corpus
    Train(TrainArgs),

    /// Train on the synthetic sequence copy task
    Copy(CopyArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// ESPnet data.json of the training set
    #[arg(long, default_value = "data/train/data.json")]
    pub train_json: PathBuf,

    /// ESPnet data.json of the dev set
    #[arg(long, default_value = "data/dev/data.json")]
    pub dev_json: PathBuf,

    /// Kaldi feats.scp overriding the `feat` entries of the training set
    #[arg(long)]
    pub train_scp: Option<PathBuf>,

    #[arg(long)]
    pub dev_scp: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug)]
pub struct CopyArgs {
    /// Token ids are drawn from 0..vocab
    #[arg(long, default_value_t = 11)]
    pub vocab: usize,

    #[arg(long, default_value_t = 1)]
    pub min_len: usize,

    #[arg(long, default_value_t = 10)]
    pub max_len: usize,

    #[arg(long, default_value_t = 10000)]
    pub train_samples: usize,

    #[arg(long, default_value_t = 500)]
    pub dev_samples: usize,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Flags shared by every task.
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Directory for model, optimizer and metrics files
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Seeds batch shuffling and copy-task generation
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    #[arg(long, default_value_t = 200)]
    pub epochs: usize,

    /// Continue from the last checkpoint in --checkpoint-dir
    #[arg(long)]
    pub resume: bool,

    /// Noam scale factor (not the effective learning rate)
    #[arg(long, default_value_t = 10.0)]
    pub lr: f64,

    #[arg(long, default_value_t = 25000)]
    pub warmup_steps: usize,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    /// Input length above which the batch size shrinks
    #[arg(long, default_value_t = 512)]
    pub max_len_in: usize,

    #[arg(long, default_value_t = 150)]
    pub max_len_out: usize,

    /// Stop building minibatches after this many (debugging)
    #[arg(long)]
    pub max_num_batches: Option<usize>,

    #[arg(long, default_value_t = 256)]
    pub d_model: usize,

    #[arg(long, default_value_t = 1024)]
    pub d_ff: usize,

    /// d_model must be divisible by heads
    #[arg(long, default_value_t = 4)]
    pub heads: usize,

    #[arg(long, default_value_t = 6)]
    pub elayers: usize,

    #[arg(long, default_value_t = 6)]
    pub dlayers: usize,

    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    #[arg(long, default_value_t = 0.1)]
    pub label_smoothing: f64,
}

impl CommonArgs {
    fn into_config(self, task: TaskConfig) -> TrainConfig {
        TrainConfig {
            task,
            checkpoint_dir:  self.checkpoint_dir,
            seed:            self.seed,
            epochs:          self.epochs,
            resume:          self.resume,
            lr:              self.lr,
            warmup_steps:    self.warmup_steps,
            batch_size:      self.batch_size,
            max_len_in:      self.max_len_in,
            max_len_out:     self.max_len_out,
            max_num_batches: self.max_num_batches,
            d_model:         self.d_model,
            d_ff:            self.d_ff,
            heads:           self.heads,
            elayers:         self.elayers,
            dlayers:         self.dlayers,
            dropout:         self.dropout,
            label_smoothing: self.label_smoothing,
        }
    }
}

impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        let task = TaskConfig::Speech {
            train_json: a.train_json,
            dev_json:   a.dev_json,
            train_scp:  a.train_scp,
            dev_scp:    a.dev_scp,
        };
        a.common.into_config(task)
    }
}

impl From<CopyArgs> for TrainConfig {
    fn from(a: CopyArgs) -> Self {
        let task = TaskConfig::Copy {
            vocab:         a.vocab,
            min_len:       a.min_len,
            max_len:       a.max_len,
            train_samples: a.train_samples,
            dev_samples:   a.dev_samples,
        };
        a.common.into_config(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn train_defaults_match_config_defaults() {
        let cli = Cli::try_parse_from(["speech-transformer", "train"]).unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        assert_eq!(TrainConfig::from(args), TrainConfig::default());
    }

    #[test]
    fn copy_flags_reach_the_config() {
        let cli = Cli::try_parse_from([
            "speech-transformer", "copy", "--vocab", "7", "--epochs", "3",
            "--max-num-batches", "2", "--resume",
        ])
        .unwrap();
        let Commands::Copy(args) = cli.command else { panic!("expected copy") };
        let cfg = TrainConfig::from(args);
        assert!(matches!(cfg.task, TaskConfig::Copy { vocab: 7, max_len: 10, .. }));
        assert_eq!((cfg.epochs, cfg.max_num_batches, cfg.resume), (3, Some(2), true));
    }
}

// ============================================================
// Layer 1: CLI / Presentation Layer
// ============================================================
// Parses arguments with clap and hands a TrainConfig to Layer 2.
//
//   speech-transformer train   ESPnet JSON corpus + Kaldi features
//   speech-transformer copy    synthetic sequence copy task

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::Commands;

use crate::application::train_use_case::{TrainConfig, TrainUseCase};
use crate::ml::trainer::TrainSummary;

#[derive(Parser, Debug)]
#[command(
    name = "speech-transformer",
    version,
    about = "Train an encoder-decoder Transformer with label smoothing and the Noam schedule."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config: TrainConfig = match self.command {
            Commands::Train(args) => {
                tracing::info!("Training on '{}' (dev '{}')", args.train_json.display(), args.dev_json.display());
                args.into()
            }
            Commands::Copy(args) => {
                tracing::info!("Training on the copy task (vocab {})", args.vocab);
                args.into()
            }
        };

        let checkpoint_dir = config.checkpoint_dir.clone();
        let summary = TrainUseCase::new(config).execute()?;
        print_summary(&summary, &checkpoint_dir);
        Ok(())
    }
}

fn print_summary(summary: &TrainSummary, checkpoint_dir: &str) {
    println!(
        "\nTraining complete: {} epochs this run, {} optimizer steps in total.",
        summary.epochs_run, summary.completed_steps,
    );
    match summary.best {
        Some(best) => println!(
            "Best dev accuracy {:.2}% at epoch {} (saved in '{checkpoint_dir}').",
            best.dev_acc * 100.0, best.epoch,
        ),
        None => println!("No dev accuracy recorded; last checkpoint saved in '{checkpoint_dir}'."),
    }
}

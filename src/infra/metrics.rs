// ============================================================
// Layer 6: Metrics Logger
// ============================================================
// Appends one CSV row per epoch:
//
//   epoch,train_loss,train_acc,dev_loss,dev_acc,lr
//   1,4.812345,0.102000,4.530120,0.118000,0.000017
//
// Accuracies are fractions in [0, 1]; `lr` is the rate applied by
// the last update of the epoch. The header is only written when the
// file is new, so a resumed run keeps appending to the same log.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};

pub const CSV_HEADER: &str = "epoch,train_loss,train_acc,dev_loss,dev_acc,lr";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:      usize,
    /// Mean label-smoothed loss over training batches
    pub train_loss: f64,
    /// Training accuracy weighted by batch size
    pub train_acc:  f64,
    pub dev_loss:   f64,
    pub dev_acc:    f64,
    pub lr:         f64,
}

impl EpochMetrics {
    /// True when this epoch beats `best_dev_acc`; a NaN dev accuracy never does.
    pub fn is_improvement(&self, best_dev_acc: f64) -> bool {
        self.dev_acc > best_dev_acc
    }
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{CSV_HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(
            f,
            "{},{:.6},{:.6},{:.6},{:.6},{:.6e}",
            m.epoch, m.train_loss, m.train_acc, m.dev_loss, m.dev_acc, m.lr,
        )?;
        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

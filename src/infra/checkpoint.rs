// ============================================================
// Layer 6: Checkpoint Manager
// ============================================================
// Saves and restores everything a training run needs to resume.
//
//   checkpoints/
//     model_last.mpk        weights after the latest epoch
//     model_best.mpk        weights with the best dev accuracy
//     optimizer_last.mpk    Adam moment estimates
//     optimizer_state.json  { epoch, completed_steps } of the last save
//     best.json             { epoch, dev_acc } of model_best
//     train_config.json     the run's TrainConfig
//     model_config.json     the TransformerConfig the weights belong to
//
// Weights and optimizer state go through Burn's CompactRecorder
// (MessagePack, half precision); bookkeeping is plain JSON. The
// optimizer's completed step count is stored next to its record
// because the learning-rate schedule is derived from it.

use anyhow::{Context, Result};
use burn::{
    config::Config,
    prelude::*,
    record::{CompactRecorder, Record, Recorder},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fs, path::PathBuf};

use crate::application::train_use_case::TrainConfig;
use crate::ml::model::{Transformer, TransformerConfig};

/// Where the last save left the training loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingProgress {
    pub epoch:           usize,
    pub completed_steps: usize,
}

/// The checkpoint with the highest dev accuracy so far.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestModel {
    pub epoch:   usize,
    pub dev_acc: f64,
}

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory (and parents) if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    // ─── Records ─────────────────────────────────────────────────────────────
    pub fn save_model<B: Backend>(&self, model: &Transformer<B>, tag: &str) -> Result<()> {
        self.save_record::<B, _>(model.clone().into_record(), &format!("model_{tag}"))?;
        tracing::debug!("Saved model checkpoint '{tag}'");
        Ok(())
    }

    /// Load weights saved under `tag` into a model of the same architecture.
    pub fn load_model<B: Backend>(&self, model: Transformer<B>, tag: &str, device: &B::Device) -> Result<Transformer<B>> {
        let record = self.load_record::<B, _>(&format!("model_{tag}"), device)?;
        tracing::info!("Loaded model checkpoint '{tag}'");
        Ok(model.load_record(record))
    }

    pub fn save_optimizer<B: Backend, R: Record<B>>(&self, record: R, tag: &str) -> Result<()> {
        self.save_record::<B, R>(record, &format!("optimizer_{tag}"))
    }

    pub fn load_optimizer<B: Backend, R: Record<B>>(&self, tag: &str, device: &B::Device) -> Result<R> {
        self.load_record::<B, R>(&format!("optimizer_{tag}"), device)
    }

    fn save_record<B: Backend, R: Record<B>>(&self, record: R, stem: &str) -> Result<()> {
        let path = self.dir.join(stem);
        <CompactRecorder as Recorder<B>>::record(&CompactRecorder::new(), record, path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;
        Ok(())
    }

    fn load_record<B: Backend, R: Record<B>>(&self, stem: &str, device: &B::Device) -> Result<R> {
        let path = self.dir.join(stem);
        <CompactRecorder as Recorder<B>>::load(&CompactRecorder::new(), path.clone(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))
    }

    // ─── Bookkeeping ─────────────────────────────────────────────────────────
    pub fn save_progress(&self, progress: &TrainingProgress) -> Result<()> {
        self.write_json("optimizer_state.json", progress)
    }

    /// `None` when no epoch has been saved yet.
    pub fn load_progress(&self) -> Result<Option<TrainingProgress>> {
        self.read_json("optimizer_state.json")
    }

    pub fn save_best(&self, best: &BestModel) -> Result<()> {
        self.write_json("best.json", best)
    }

    pub fn load_best(&self) -> Result<Option<BestModel>> {
        self.read_json("best.json")
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        self.write_json("train_config.json", cfg)
    }

    pub fn load_config(&self) -> Result<Option<TrainConfig>> {
        self.read_json("train_config.json")
    }

    pub fn save_model_config(&self, cfg: &TransformerConfig) -> Result<()> {
        let path = self.dir.join("model_config.json");
        cfg.save(&path)
            .with_context(|| format!("Cannot write model config to '{}'", path.display()))
    }

    pub fn load_model_config(&self) -> Result<TransformerConfig> {
        let path = self.dir.join("model_config.json");
        TransformerConfig::load(&path)
            .with_context(|| format!("Cannot read model config from '{}'", path.display()))
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).with_context(|| format!("Cannot write '{}'", path.display()))?;
        tracing::debug!("Wrote '{}'", path.display());
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).with_context(|| format!("Cannot read '{}'", path.display()))?;
        let value = serde_json::from_str(&json).with_context(|| format!("Cannot parse '{}'", path.display()))?;
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::input_layer::InputLayerKind;
    use crate::ml::test_utils::{floats, TestBackend};

    fn tiny() -> TransformerConfig {
        TransformerConfig::new(5, 4, InputLayerKind::Embed)
            .with_d_model(4)
            .with_d_ff(8)
            .with_heads(2)
            .with_elayers(1)
            .with_dlayers(1)
            .with_max_len(16)
    }

    #[test]
    fn model_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path().join("ckpt")).unwrap();
        let device = Default::default();

        let saved = tiny().init::<TestBackend>(&device).unwrap();
        ckpt.save_model(&saved, "last").unwrap();

        let fresh = tiny().init::<TestBackend>(&device).unwrap();
        let loaded = ckpt.load_model(fresh, "last", &device).unwrap();

        let a = floats(saved.decoder.output.weight.val());
        let b = floats(loaded.decoder.output.weight.val());
        // CompactRecorder stores half precision
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-2, "{x} vs {y}");
        }
    }

    #[test]
    fn bookkeeping_round_trips_and_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();

        assert_eq!(ckpt.load_progress().unwrap(), None);
        assert_eq!(ckpt.load_best().unwrap(), None);

        let progress = TrainingProgress { epoch: 3, completed_steps: 120 };
        ckpt.save_progress(&progress).unwrap();
        assert_eq!(ckpt.load_progress().unwrap(), Some(progress));

        let best = BestModel { epoch: 2, dev_acc: 0.75 };
        ckpt.save_best(&best).unwrap();
        assert_eq!(ckpt.load_best().unwrap(), Some(best));

        ckpt.save_model_config(&tiny()).unwrap();
        assert_eq!(ckpt.load_model_config().unwrap().d_model, 4);
    }
}

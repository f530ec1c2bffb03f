// ============================================================
// Layer 5: Training Loop
// ============================================================
// Epoch loop over length-bucketed minibatches with the Noam
// schedule on top of Adam.
//
//   per epoch:
//     shuffle batch order (StdRng seeded with seed + epoch)
//     for each batch: forward → loss.backward() → optimizer step
//     validate with model.valid() on the inner backend
//     log metrics, save "last", save "best" on a dev improvement
//
// Burn 0.20 notes:
//   - training runs on Autodiff<Wgpu>; model.valid() returns the
//     model on the inner Wgpu backend, so the dev batcher uses it too
//   - buckets have varying sizes, so SeqBatcher is driven per bucket
//     instead of through a DataLoader with a fixed batch size
//   - a failed forward pass returns before backward, so parameters
//     are never updated from a partial pass
//
// Resume restores weights and the Adam record; the step count is
// read back from the record and must match the saved progress.
// Training then continues at the epoch after the last saved one.

use anyhow::{ensure, Context, Result};
use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::application::train_use_case::TrainConfig;
use crate::data::{batcher::SeqBatcher, bucketing::make_batchset};
use crate::domain::traits::SampleSource;
use crate::infra::{
    checkpoint::{BestModel, CheckpointManager, TrainingProgress},
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::{
    model::{Transformer, TransformerConfig},
    noam::{adam_config, BaseOptimizer, NoamOptimizer, NoamSchedule},
};

type MyBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// What a finished run reports back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSummary {
    pub epochs_run:      usize,
    pub completed_steps: usize,
    pub best:            Option<BestModel>,
    pub last:            Option<EpochMetrics>,
}

/// Running loss/accuracy sums over one pass.
#[derive(Debug, Default)]
struct PassStats {
    loss_sum: f64,
    batches:  usize,
    acc_sum:  f64,
    samples:  usize,
}

impl PassStats {
    fn add(&mut self, loss: f64, accuracy: f64, batch_size: usize) {
        self.loss_sum += loss;
        self.batches += 1;
        self.acc_sum += accuracy * batch_size as f64;
        self.samples += batch_size;
    }

    fn mean_loss(&self) -> f64 {
        if self.batches > 0 { self.loss_sum / self.batches as f64 } else { f64::NAN }
    }

    fn accuracy(&self) -> f64 {
        if self.samples > 0 { self.acc_sum / self.samples as f64 } else { f64::NAN }
    }
}

pub fn run_training<S: SampleSource + Clone>(
    cfg:       &TrainConfig,
    model_cfg: TransformerConfig,
    train:     Vec<S>,
    dev:       Vec<S>,
    ckpt:      CheckpointManager,
) -> Result<TrainSummary> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);
    train_loop::<MyBackend, S>(cfg, model_cfg, train, dev, ckpt, device)
}

pub fn train_loop<B: AutodiffBackend, S: SampleSource + Clone>(
    cfg:       &TrainConfig,
    model_cfg: TransformerConfig,
    train:     Vec<S>,
    dev:       Vec<S>,
    ckpt:      CheckpointManager,
    device:    B::Device,
) -> Result<TrainSummary> {
    // ── Minibatches ───────────────────────────────────────────────────────────
    let bucket = cfg.bucket_config();
    let mut train_batches = make_batchset(train, &bucket)?;
    let dev_batches = make_batchset(dev, &bucket)?;
    ensure!(!train_batches.is_empty(), "no training minibatches were built");
    if dev_batches.is_empty() {
        tracing::warn!("Dev set is empty; the best checkpoint will not be tracked");
    }
    tracing::info!("{} train / {} dev minibatches", train_batches.len(), dev_batches.len());

    // ── Model and optimizer ───────────────────────────────────────────────────
    let mut model: Transformer<B> = model_cfg.init(&device)?;
    tracing::info!(
        "Model ready: {} encoder / {} decoder layers, d_model={}, {} parameters",
        model_cfg.elayers, model_cfg.dlayers, model_cfg.d_model, model.num_params(),
    );
    ckpt.save_model_config(&model_cfg)?;

    let schedule = NoamSchedule::new(cfg.lr, cfg.warmup_steps, model_cfg.d_model)?;
    let mut optim: NoamOptimizer<Transformer<B>, B, _> =
        NoamOptimizer::new(BaseOptimizer::new(adam_config().init()), schedule);

    // ── Resume ────────────────────────────────────────────────────────────────
    let mut first_epoch = 1;
    let mut best = None;
    if cfg.resume {
        match ckpt.load_progress()? {
            Some(progress) => {
                model = ckpt.load_model(model, "last", &device)?;
                let record = ckpt.load_optimizer::<B, _>("last", &device)?;
                optim = optim.restore(record, &model).context("cannot resume the optimizer")?;
                ensure!(
                    optim.completed_steps() == progress.completed_steps,
                    "optimizer record holds {} updates but optimizer_state.json says {}",
                    optim.completed_steps(), progress.completed_steps,
                );
                best = ckpt.load_best()?;
                first_epoch = progress.epoch + 1;
                tracing::info!(
                    "Resumed after epoch {} at step {} (next lr {:.3e})",
                    progress.epoch, progress.completed_steps, optim.next_lr(),
                );
            }
            None => tracing::warn!("Nothing to resume in '{}', starting fresh", ckpt.dir().display()),
        }
    }

    let metrics = MetricsLogger::new(ckpt.dir())?;
    let train_batcher = SeqBatcher::<B>::new();
    let dev_batcher = SeqBatcher::<B::InnerBackend>::new();

    let mut last = None;
    let mut epochs_run = 0;

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in first_epoch..=cfg.epochs {
        let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(epoch as u64));
        train_batches.shuffle(&mut rng);

        // ── Training phase ────────────────────────────────────────────────────
        let mut train_stats = PassStats::default();
        let n_iter = train_batches.len();
        for (iter, samples) in train_batches.iter().enumerate() {
            let batch = train_batcher.batch(samples.clone(), &device)?;
            let batch_size = batch.len();
            let output = model
                .forward(batch.source, &batch.source_lengths, &batch.targets)
                .with_context(|| format!("training forward pass failed at '{}'", batch.keys[0]))?;

            let loss: f64 = output.loss.clone().into_scalar().elem::<f64>();
            train_stats.add(loss, output.accuracy, batch_size);

            let grads = GradientsParams::from_grads(output.loss.backward(), &model);
            model = optim.step(model, grads);

            tracing::debug!(
                "[train epoch {epoch}, iter {}/{n_iter}] loss: {loss:.4}, acc: {:.4}, lr: {:.3e}",
                iter + 1, output.accuracy, optim.current_lr(),
            );
        }

        // ── Validation phase ──────────────────────────────────────────────────
        // dropout is disabled on the inner-backend copy
        let model_valid = model.valid();
        let mut dev_stats = PassStats::default();
        for samples in &dev_batches {
            let batch = dev_batcher.batch(samples.clone(), &device)?;
            let batch_size = batch.len();
            let output = model_valid
                .forward(batch.source, &batch.source_lengths, &batch.targets)
                .with_context(|| format!("dev forward pass failed at '{}'", batch.keys[0]))?;
            dev_stats.add(output.loss.into_scalar().elem::<f64>(), output.accuracy, batch_size);
        }

        let row = EpochMetrics {
            epoch,
            train_loss: train_stats.mean_loss(),
            train_acc:  train_stats.accuracy(),
            dev_loss:   dev_stats.mean_loss(),
            dev_acc:    dev_stats.accuracy(),
            lr:         optim.current_lr(),
        };
        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | train_acc={:.1}% | dev_loss={:.4} | dev_acc={:.1}% | lr={:.3e}",
            epoch, cfg.epochs, row.train_loss, row.train_acc * 100.0,
            row.dev_loss, row.dev_acc * 100.0, row.lr,
        );
        metrics.log(&row)?;

        // ── Checkpoints ───────────────────────────────────────────────────────
        ckpt.save_model(&model, "last")?;
        ckpt.save_optimizer::<B, _>(optim.base().to_record(), "last")?;
        ckpt.save_progress(&TrainingProgress { epoch, completed_steps: optim.completed_steps() })?;

        let best_acc = best.map_or(f64::NEG_INFINITY, |b: BestModel| b.dev_acc);
        if row.is_improvement(best_acc) {
            let record = BestModel { epoch, dev_acc: row.dev_acc };
            ckpt.save_model(&model, "best")?;
            ckpt.save_best(&record)?;
            best = Some(record);
            tracing::info!("Epoch {epoch}: best dev accuracy so far ({:.4}), saved", row.dev_acc);
        }

        last = Some(row);
        epochs_run += 1;
    }

    tracing::info!("Training complete after {} optimizer steps", optim.completed_steps());
    Ok(TrainSummary { epochs_run, completed_steps: optim.completed_steps(), best, last })
}

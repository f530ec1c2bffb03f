// ============================================================
// Layer 5: Noam Learning-Rate Schedule
// ============================================================
//   lr(n) = base_lr · min(n^-0.5, n · warmup^-1.5) / √d_model
//
// Linear warmup for `warmup` steps, then inverse square-root decay;
// the peak is at n = warmup.
//
// BaseOptimizer wraps any burn optimizer and counts the updates it
// has applied. NoamOptimizer owns only the schedule: before every
// update it reads n = completed + 1 from the base. On restore the
// base recovers its counter from the optimizer record itself (Adam
// keeps a per-parameter update count), so a resumed schedule cannot
// drift from the moment estimates it is paired with.
//
// There is no zero_grad: each backward pass yields a fresh
// GradientsParams that `step` consumes by value.

use std::marker::PhantomData;

use burn::{
    module::{AutodiffModule, ModuleVisitor, Param},
    optim::{adaptor::OptimizerAdaptor, Adam, AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, Tensor},
};

use crate::domain::error::{require, ModelError, ModelResult};

/// Adam as used under the schedule: β = (0.9, 0.98), ε = 1e-9, no weight decay.
pub fn adam_config() -> AdamConfig {
    AdamConfig::new().with_beta_1(0.9).with_beta_2(0.98).with_epsilon(1e-9)
}

// ─── NoamSchedule ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoamSchedule {
    pub base_lr:      f64,
    pub warmup_steps: usize,
    pub model_dim:    usize,
}

impl NoamSchedule {
    pub fn new(base_lr: f64, warmup_steps: usize, model_dim: usize) -> ModelResult<Self> {
        require(warmup_steps >= 1, "noam_schedule", || "warmup_steps must be at least 1".to_string())?;
        require(model_dim >= 1, "noam_schedule", || "model_dim must be at least 1".to_string())?;
        Ok(Self { base_lr, warmup_steps, model_dim })
    }

    /// Learning rate for the 1-based update number `step`.
    pub fn lr(&self, step: usize) -> f64 {
        let n = step.max(1) as f64;
        let warmup = self.warmup_steps as f64;
        self.base_lr * n.powf(-0.5).min(n * warmup.powf(-1.5)) / (self.model_dim as f64).sqrt()
    }
}

// ─── Recorded step count ─────────────────────────────────────────────────────
/// Optimizers whose saved record carries the number of updates it has seen.
pub trait RecordedSteps<M, B>: Optimizer<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    fn recorded_steps(record: &<Self as Optimizer<M, B>>::Record, module: &M) -> ModelResult<usize>;
}

/// Collects Adam's update count for every parameter of a module.
struct AdamTime<'a, M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    record: &'a <OptimizerAdaptor<Adam, M, B> as Optimizer<M, B>>::Record,
    times:  Vec<usize>,
}

impl<M, B> ModuleVisitor<B> for AdamTime<'_, M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(state) = self.record.get(&param.id) {
            // the record entry was created for this parameter, so its rank is D
            self.times.push(state.clone().into_state::<D>().momentum.time);
        }
    }
}

impl<M, B> RecordedSteps<M, B> for OptimizerAdaptor<Adam, M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    /// Every parameter is updated on every step, so all counts must agree.
    fn recorded_steps(record: &<Self as Optimizer<M, B>>::Record, module: &M) -> ModelResult<usize> {
        if record.is_empty() {
            return Ok(0);
        }

        let mut visitor = AdamTime::<M, B> { record, times: Vec::new() };
        module.visit(&mut visitor);

        let Some(&first) = visitor.times.first() else {
            return Err(ModelError::precondition(
                "optimizer_restore",
                format!("none of the {} recorded parameters belong to this model", record.len()),
            ));
        };
        require(visitor.times.iter().all(|&t| t == first), "optimizer_restore", || {
            let lo = visitor.times.iter().min().copied().unwrap_or(first);
            let hi = visitor.times.iter().max().copied().unwrap_or(first);
            format!("parameters disagree on the update count ({lo}..={hi})")
        })?;
        Ok(first)
    }
}

// ─── BaseOptimizer ───────────────────────────────────────────────────────────
pub struct BaseOptimizer<M, B, O> {
    inner:           O,
    completed_steps: usize,
    _marker:         PhantomData<fn() -> (M, B)>,
}

impl<M, B, O> BaseOptimizer<M, B, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    pub fn new(inner: O) -> Self {
        Self { inner, completed_steps: 0, _marker: PhantomData }
    }

    pub fn completed_steps(&self) -> usize {
        self.completed_steps
    }

    pub fn step(&mut self, lr: f64, module: M, grads: GradientsParams) -> M {
        let module = self.inner.step(lr, module, grads);
        self.completed_steps += 1;
        module
    }

    pub fn to_record(&self) -> O::Record {
        self.inner.to_record()
    }
}

impl<M, B, O> BaseOptimizer<M, B, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: RecordedSteps<M, B>,
{
    /// Restore moment estimates; the update counter is read back from them.
    pub fn restore(self, record: O::Record, module: &M) -> ModelResult<Self> {
        let completed_steps = O::recorded_steps(&record, module)?;
        Ok(Self {
            inner: self.inner.load_record(record),
            completed_steps,
            _marker: PhantomData,
        })
    }
}

// ─── NoamOptimizer ───────────────────────────────────────────────────────────
pub struct NoamOptimizer<M, B, O> {
    base:     BaseOptimizer<M, B, O>,
    schedule: NoamSchedule,
    last_lr:  Option<f64>,
}

impl<M, B, O> NoamOptimizer<M, B, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    pub fn new(base: BaseOptimizer<M, B, O>, schedule: NoamSchedule) -> Self {
        Self { base, schedule, last_lr: None }
    }

    pub fn schedule(&self) -> &NoamSchedule {
        &self.schedule
    }

    pub fn base(&self) -> &BaseOptimizer<M, B, O> {
        &self.base
    }

    pub fn completed_steps(&self) -> usize {
        self.base.completed_steps()
    }

    /// Rate the next `step` call will apply.
    pub fn next_lr(&self) -> f64 {
        self.schedule.lr(self.base.completed_steps() + 1)
    }

    /// Rate applied by the most recent update, or the upcoming one before any update.
    pub fn current_lr(&self) -> f64 {
        self.last_lr.unwrap_or_else(|| self.next_lr())
    }

    pub fn step(&mut self, module: M, grads: GradientsParams) -> M {
        let lr = self.next_lr();
        self.last_lr = Some(lr);
        self.base.step(lr, module, grads)
    }
}

impl<M, B, O> NoamOptimizer<M, B, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: RecordedSteps<M, B>,
{
    /// `module` must carry the parameter ids the record was saved with.
    pub fn restore(self, record: O::Record, module: &M) -> ModelResult<Self> {
        Ok(Self {
            base:     self.base.restore(record, module)?,
            schedule: self.schedule,
            last_lr:  None,
        })
    }
}

// ============================================================
// Layer 6: Infrastructure Layer
// ============================================================
// Persistence used by the training loop:
//
//   checkpoint.rs   model and optimizer records (CompactRecorder)
//                   plus JSON bookkeeping for resume and best model
//
//   metrics.rs      per-epoch CSV log of loss, accuracy and lr

/// Model, optimizer and progress checkpoints
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;

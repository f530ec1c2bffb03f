// ============================================================
// Layer 2: Application / Use Cases
// ============================================================
// Coordinates the other layers for one goal: a training run.
//
//   - no tensor code here (Layer 5)
//   - no argument parsing or printing (Layer 1)
//   - file access goes through Layer 4 readers and Layer 6 stores

/// The training workflow
pub mod train_use_case;

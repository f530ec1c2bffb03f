// ============================================================
// Layer 3: Domain Layer
// ============================================================
// Plain Rust structs, enums and traits that define the core
// concepts of the system.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Everything above this layer (data, ml, application) speaks in
// these terms: sample metadata, loaded input data, corpus
// abstractions and the model error taxonomy.

/// Typed errors for the model core
pub mod error;

/// Sample metadata and loaded input data
pub mod sample;

/// Corpus abstractions that data readers implement
pub mod traits;


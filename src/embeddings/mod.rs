// embeddings/ - Local sentence embedding using candle (pure Rust).
//
// Provides:
// - Model download + SHA256 cache records
// - Qwen3 inference with last-token pooling
// - Batching, MRL truncation and L2 normalization
// - Instruction prefixing for clustering

pub mod batch;
pub mod download;
pub mod engine;
pub mod text_prep;

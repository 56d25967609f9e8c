// pipeline.rs - The one-shot batch job: load, clean, encode, persist, release.
//
// Stages run strictly in order: Idle -> Loading -> Cleaning -> Encoding -> Persisted.
// Any failure aborts the run and is reported with the stage it happened in.

use std::fmt;
use std::path::PathBuf;

use anyhow::Context;

use crate::config;
use crate::embeddings::batch::{BatchEncoder, Encoder};
use crate::embeddings::text_prep;
use crate::persist;
use crate::reviews::ReviewTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Loading,
    Cleaning,
    Encoding,
    Persisted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Loading => "loading",
            Stage::Cleaning => "cleaning",
            Stage::Encoding => "encoding",
            Stage::Persisted => "persisted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_path: PathBuf,
    pub embeddings_path: PathBuf,
    pub reviews_path: PathBuf,
    pub text_column: String,
    pub batch_size: usize,
    pub dims: usize,
    pub normalize: bool,
    pub instruction: Option<String>,
    pub show_progress: bool,
}

impl PipelineConfig {
    pub fn from_config() -> Self {
        Self {
            input_path: PathBuf::from(config::input::REVIEWS_CSV),
            embeddings_path: PathBuf::from(config::output::EMBEDDINGS_NPY),
            reviews_path: PathBuf::from(config::output::REVIEWS_CLEAN_CSV),
            text_column: config::input::TEXT_COLUMN.to_string(),
            batch_size: config::embedding::BATCH_SIZE,
            dims: config::embedding::EMBEDDING_DIMS,
            normalize: config::embedding::NORMALIZE,
            instruction: config::embedding::USE_CLUSTERING_INSTRUCTION
                .then(|| config::embedding::CLUSTERING_INSTRUCTION.to_string()),
            show_progress: config::embedding::SHOW_PROGRESS,
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub reviews_read: usize,
    pub reviews_kept: usize,
    pub rows: usize,
    pub dims: usize,
    pub bytes: usize,
    pub device: String,
    pub embeddings_path: PathBuf,
    pub reviews_path: PathBuf,
}

impl RunSummary {
    pub fn reviews_dropped(&self) -> usize {
        self.reviews_read - self.reviews_kept
    }

    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / 1024.0 / 1024.0
    }
}

struct StageTracker {
    current: Stage,
}

impl StageTracker {
    fn new() -> Self {
        Self { current: Stage::Idle }
    }

    fn enter(&mut self, next: Stage) {
        log::info!("Stage: {} -> {}", self.current, next);
        self.current = next;
    }

    fn current(&self) -> Stage {
        self.current
    }
}

/// Run the whole job. The input table is read before `load_encoder` is called, so
/// a missing or malformed input fails before any model is fetched.
pub fn run<E, F>(cfg: &PipelineConfig, load_encoder: F) -> anyhow::Result<RunSummary>
where
    E: Encoder,
    F: FnOnce() -> anyhow::Result<E>,
{
    let mut stage = StageTracker::new();
    let batcher = BatchEncoder::new(cfg.batch_size, cfg.dims, cfg.normalize)?.with_progress(cfg.show_progress);

    stage.enter(Stage::Loading);
    let table = ReviewTable::read_csv(&cfg.input_path, &cfg.text_column)
        .with_context(|| format!("{} stage failed", stage.current()))?;
    log::info!("Loaded {} reviews from {}", table.len(), cfg.input_path.display());
    let mut encoder = load_encoder().with_context(|| format!("{} stage failed: model load", stage.current()))?;
    batcher
        .check_supported(&encoder)
        .with_context(|| format!("{} stage failed", stage.current()))?;
    let device = encoder.device_label();

    stage.enter(Stage::Cleaning);
    let (table, report) = table.clean();
    log::info!(
        "Kept {} reviews, dropped {} with missing or blank {}",
        report.kept,
        report.dropped(),
        cfg.text_column
    );
    if table.is_empty() {
        log::warn!("No reviews left after cleaning; outputs will be empty");
    }
    let texts = text_prep::prepare_texts(&table.texts(), cfg.instruction.as_deref());
    if cfg.instruction.is_some() {
        log::info!("Using custom clustering instruction");
    } else {
        log::info!("Using default encoding (no instruction)");
    }

    stage.enter(Stage::Encoding);
    log::info!("Processing {} texts in batches of {} on {}", texts.len(), cfg.batch_size, device);
    let embeddings = batcher
        .encode_all(&mut encoder, &texts)
        .with_context(|| format!("{} stage failed", stage.current()))?;
    // Model memory is released before writing; the outputs no longer need it.
    drop(encoder);

    let info = persist::save_embeddings(&embeddings, &cfg.embeddings_path)
        .and_then(|info| persist::save_reviews(&table, &cfg.reviews_path).map(|()| info))
        .with_context(|| format!("{} stage failed: persist outputs", stage.current()))?;
    stage.enter(Stage::Persisted);

    drop(embeddings);
    drop(texts);
    log::debug!("Released model and embedding buffers");

    Ok(RunSummary {
        reviews_read: report.read,
        reviews_kept: report.kept,
        rows: info.rows,
        dims: info.dims,
        bytes: info.bytes,
        device,
        embeddings_path: cfg.embeddings_path.clone(),
        reviews_path: cfg.reviews_path.clone(),
    })
}

mod config;
mod embeddings;
mod logging;
mod paths;
mod persist;
mod pipeline;
mod reviews;

use crate::embeddings::engine::{self, ModelSpec};
use crate::pipeline::{PipelineConfig, RunSummary};

fn main() {
    let logger = match logging::init_logging() {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("[review-embed] fatal error: {e:?}");
            std::process::exit(1);
        }
    };

    if let Err(e) = real_main() {
        // Keep stderr noisy for bug reports; logs also go to file.
        eprintln!("[review-embed] fatal error: {e:?}");
        log::error!("Fatal error: {:?}", e);
        logger.flush();
        std::process::exit(1);
    }
}

fn real_main() -> anyhow::Result<()> {
    let cfg = PipelineConfig::from_config();
    let spec = ModelSpec::from_config();
    log::info!(
        "Model: {} ({} dims, batch size {}, half precision: {})",
        spec.model_id,
        spec.dims,
        cfg.batch_size,
        spec.half_precision
    );

    let summary = pipeline::run(&cfg, || engine::load_model(&spec))?;
    print_summary(&summary);

    log::info!("=== Embedding generation finished ===");
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("{}", "=".repeat(60));
    println!("Embeddings generated");
    println!("{}", "=".repeat(60));
    println!(
        "Reviews: {} kept, {} dropped (of {})",
        summary.reviews_kept,
        summary.reviews_dropped(),
        summary.reviews_read
    );
    println!("Device: {}", summary.device);
    println!("Shape: ({}, {})", summary.rows, summary.dims);
    println!("Memory: {:.2} MB", summary.megabytes());
    println!("Saved files:");
    println!("  - {} ({}d)", summary.embeddings_path.display(), summary.dims);
    println!("  - {}", summary.reviews_path.display());
}

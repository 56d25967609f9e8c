// logging.rs - flexi_logger setup: rotating debug log file, info and up on stderr.

use anyhow::Context;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};

use crate::{config, paths};

/// Start logging. The returned handle must outlive the run; flush it before
/// `process::exit`, which skips destructors.
pub fn init_logging() -> anyhow::Result<LoggerHandle> {
    let log_dir = paths::ensure_home_subdir(config::logging::LOG_DIR_REL).context("log directory")?;

    // The terminal only sees info and up so the progress bars stay readable.
    let handle = Logger::try_with_str("debug")?
        .log_to_file(FileSpec::default().directory(log_dir).basename(config::logging::LOG_FILE_NAME))
        .rotate(
            Criterion::Size(config::logging::LOG_ROTATE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(config::logging::LOG_ROTATE_KEEP_FILES),
        )
        .duplicate_to_stderr(Duplicate::Info)
        .format(flexi_logger::detailed_format)
        .start()
        .context("failed to start logger")?;

    log::info!(
        "review-embed {} on {}/{} (batch job: {} -> {}, {})",
        config::TOOL_VERSION,
        std::env::consts::OS,
        std::env::consts::ARCH,
        config::input::REVIEWS_CSV,
        config::output::EMBEDDINGS_NPY,
        config::output::REVIEWS_CLEAN_CSV,
    );

    Ok(handle)
}

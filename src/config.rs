// IMPORTANT:
// Keep ALL numeric values centralized here (repo rule: no hardcoded numeric values scattered around).
// Configuration is compile-time only: there are no flags, env overrides or config files.

pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod logging {
    pub const LOG_DIR_REL: &str = ".review_embed/logs";
    pub const LOG_FILE_NAME: &str = "generate_embeddings.log";

    pub const LOG_ROTATE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
    pub const LOG_ROTATE_KEEP_FILES: usize = 5;
}

pub mod input {
    pub const REVIEWS_CSV: &str = "tripadvisor_hotel_reviews.csv";
    pub const TEXT_COLUMN: &str = "description";

    // Values pandas' read_csv treats as missing by default. A description equal to one of
    // these (before trimming) counts as absent, same as an empty field.
    pub const MISSING_MARKERS: &[&str] = &[
        "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
        "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
    ];
}

pub mod output {
    pub const EMBEDDINGS_NPY: &str = "embeddings.npy";
    pub const REVIEWS_CLEAN_CSV: &str = "reviews_clean.csv";
}

pub mod embedding {
    pub const MODEL_NAME: &str = "Qwen/Qwen3-Embedding-4B";

    // Reduced for the 4B model; raise on GPUs with more memory.
    pub const BATCH_SIZE: usize = 8;

    // MRL truncation: keep the first N components of the native hidden state.
    pub const EMBEDDING_DIMS: usize = 512;

    pub const NORMALIZE: bool = true;
    pub const HALF_PRECISION: bool = true;
    pub const PREFER_ACCELERATOR: bool = true;

    // Context cap per review, in tokens (end-of-text token included).
    pub const MAX_TOKENS: usize = 8192;
    pub const EOS_TOKEN: &str = "<|endoftext|>";

    pub const USE_CLUSTERING_INSTRUCTION: bool = true;
    pub const CLUSTERING_INSTRUCTION: &str =
        "Encode the texts for semantic clustering and grouping by themes\nQuery:";

    pub const SHOW_PROGRESS: bool = true;
}

pub mod download {
    pub const HUB_BASE: &str = "https://huggingface.co";
    pub const HUB_REVISION: &str = "main";

    // Local model cache directory (relative to home). One subdirectory per model id.
    pub const MODEL_CACHE_DIR_REL: &str = ".review_embed/models";

    pub const CONFIG_FILE: &str = "config.json";
    pub const TOKENIZER_FILE: &str = "tokenizer.json";
    pub const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";
    pub const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";
    pub const DIGEST_SUFFIX: &str = "sha256";

    pub const CONNECT_TIMEOUT_SECS: u64 = 30;
    // Per-read timeout; shards are several GB so there is no overall deadline.
    pub const READ_TIMEOUT_SECS: u64 = 90;
    pub const CHUNK_BYTES: usize = 1024 * 1024;
}

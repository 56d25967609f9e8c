// download.rs - Model file download and local cache with SHA256 integrity records.
//
// Files come from the Hugging Face hub on first use and are cached at
// ~/.review_embed/models/<org>--<name>/. Each cached file has a `<file>.sha256`
// record holding its digest, size and mtime at the time it was last verified.
// A file whose size and mtime still match is trusted; otherwise it is re-hashed,
// and fetched again when the digest differs.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{config, paths};

/// Paths of every file the engine needs, all inside one model directory.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub dir: PathBuf,
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("not found on hub: {0}")]
    NotFound(String),
    #[error("HTTP {status} downloading {url}")]
    Status { status: u16, url: String },
}

#[derive(Debug, Deserialize)]
struct WeightIndex {
    weight_map: HashMap<String, String>,
}

/// Returns the local cache directory for `model_id`, creating it if needed.
pub fn model_dir(model_id: &str) -> anyhow::Result<PathBuf> {
    paths::ensure_home_subdir(&format!(
        "{}/{}",
        config::download::MODEL_CACHE_DIR_REL,
        cache_dir_name(model_id)
    ))
}

fn cache_dir_name(model_id: &str) -> String {
    model_id.replace('/', "--")
}

fn hub_url(model_id: &str, file: &str) -> String {
    format!(
        "{}/{}/resolve/{}/{}",
        config::download::HUB_BASE,
        model_id,
        config::download::HUB_REVISION,
        file
    )
}

/// Download all model files that are not already cached and verified.
pub fn ensure_model_files(model_id: &str) -> anyhow::Result<ModelFiles> {
    let dir = model_dir(model_id)?;
    log::info!("Model cache: {}", dir.display());

    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(config::download::CONNECT_TIMEOUT_SECS))
        .timeout_read(Duration::from_secs(config::download::READ_TIMEOUT_SECS))
        .build();
    let mut fetch = |file: &str| fetch_cached(&agent, model_id, &dir, file);

    let config = fetch(config::download::CONFIG_FILE)?;
    let tokenizer = fetch(config::download::TOKENIZER_FILE)?;
    let weights = resolve_weights(&mut fetch)?;

    log::info!("Model files ready ({} weight file(s))", weights.len());
    Ok(ModelFiles {
        dir,
        config,
        tokenizer,
        weights,
    })
}

/// Weight files via the shard index, or the single `model.safetensors` when the hub
/// has no index for this model.
fn resolve_weights<F>(fetch: &mut F) -> anyhow::Result<Vec<PathBuf>>
where
    F: FnMut(&str) -> anyhow::Result<PathBuf>,
{
    let names = match fetch(config::download::WEIGHTS_INDEX_FILE) {
        Ok(index_path) => {
            let raw = fs::read_to_string(&index_path)
                .with_context(|| format!("read {}", index_path.display()))?;
            shard_names(&raw).with_context(|| format!("parse {}", index_path.display()))?
        }
        Err(e) if is_not_found(&e) => {
            log::info!("No weight index on the hub, expecting a single weights file");
            vec![config::download::SINGLE_WEIGHTS_FILE.to_string()]
        }
        Err(e) => return Err(e),
    };
    names.iter().map(|name| fetch(name)).collect()
}

/// Unique shard file names from a `model.safetensors.index.json`, sorted.
fn shard_names(index_json: &str) -> anyhow::Result<Vec<String>> {
    let index: WeightIndex = serde_json::from_str(index_json)?;
    let names: BTreeSet<String> = index.weight_map.into_values().collect();
    if names.is_empty() {
        bail!("weight index lists no files");
    }
    for name in &names {
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            bail!("weight index names an unexpected path: {name}");
        }
    }
    Ok(names.into_iter().collect())
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<HubError>(), Some(HubError::NotFound(_))))
}

/// Return the cached path of `file`, downloading it when absent or unverified.
fn fetch_cached(agent: &ureq::Agent, model_id: &str, dir: &Path, file: &str) -> anyhow::Result<PathBuf> {
    let dest = dir.join(file);
    let record_path = record_path(&dest);

    if dest.exists() {
        match verify_cached(&dest, &record_path) {
            Ok(true) => return Ok(dest),
            Ok(false) => log::warn!("Cached {} failed verification, downloading again", file),
            Err(e) => log::warn!("Cannot verify cached {}: {:?}; downloading again", file, e),
        }
    }

    let digest = download_to(agent, &hub_url(model_id, file), &dest)?;
    write_record(&dest, &record_path, &digest)?;
    Ok(dest)
}

/// Digest of a cached file plus the size and mtime it had when last verified.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheRecord {
    digest: String,
    size: Option<u64>,
    modified: Option<u64>,
}

impl CacheRecord {
    /// `<sha256> [<size> <mtime secs>]`
    fn parse(raw: &str) -> Option<Self> {
        let mut fields = raw.split_whitespace();
        let digest = fields.next()?.to_string();
        let size = fields.next().and_then(|v| v.parse().ok());
        let modified = fields.next().and_then(|v| v.parse().ok());
        Some(Self { digest, size, modified })
    }

    fn render(&self) -> String {
        match (self.size, self.modified) {
            (Some(size), Some(modified)) => format!("{} {} {}\n", self.digest, size, modified),
            _ => format!("{}\n", self.digest),
        }
    }
}

fn record_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(config::download::DIGEST_SUFFIX);
    dest.with_file_name(name)
}

/// Size and mtime (whole seconds) of `path`.
fn file_stamp(path: &Path) -> anyhow::Result<(u64, Option<u64>)> {
    let meta = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs());
    Ok((meta.len(), modified))
}

fn write_record(dest: &Path, record_path: &Path, digest: &str) -> anyhow::Result<()> {
    let (size, modified) = file_stamp(dest)?;
    let record = CacheRecord {
        digest: digest.to_string(),
        size: Some(size),
        modified,
    };
    fs::write(record_path, record.render()).with_context(|| format!("write {}", record_path.display()))
}

/// True when `dest` is unchanged since its record was written, or still hashes to
/// the recorded digest.
fn verify_cached(dest: &Path, record_path: &Path) -> anyhow::Result<bool> {
    if !record_path.exists() {
        return Ok(false);
    }
    let raw = fs::read_to_string(record_path).with_context(|| format!("read {}", record_path.display()))?;
    let Some(record) = CacheRecord::parse(&raw) else {
        return Ok(false);
    };

    let (size, modified) = file_stamp(dest)?;
    if record.size == Some(size) && modified.is_some() && record.modified == modified {
        log::debug!("{} unchanged since last verification", dest.display());
        return Ok(true);
    }

    log::info!("Re-hashing {}", dest.display());
    if sha256_file(dest)? != record.digest {
        return Ok(false);
    }
    write_record(dest, record_path, &record.digest)?;
    Ok(true)
}

fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; config::download::CHUNK_BYTES];
    loop {
        let n = file.read(&mut buf).with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Stream `url` into `dest`, hashing on the way. Returns the hex SHA256.
fn download_to(agent: &ureq::Agent, url: &str, dest: &Path) -> anyhow::Result<String> {
    let filename = dest.file_name().unwrap_or_default().to_string_lossy().to_string();
    log::info!("Downloading {} from {}", filename, url);

    let resp = match agent.get(url).call() {
        Ok(resp) => resp,
        Err(ureq::Error::Status(404, _)) => return Err(HubError::NotFound(url.to_string()).into()),
        Err(ureq::Error::Status(status, _)) => {
            return Err(HubError::Status {
                status,
                url: url.to_string(),
            }
            .into())
        }
        Err(e) => return Err(e).with_context(|| format!("failed to download {url}")),
    };

    let total = resp
        .header("Content-Length")
        .and_then(|v| v.parse::<u64>().ok());
    let progress = match total {
        Some(len) => ProgressBar::new(len),
        None => ProgressBar::new_spinner(),
    };
    progress.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {bytes}/{total_bytes} ({eta})")?.progress_chars("=> "),
    );
    progress.set_message(filename.clone());

    // Write to .tmp, then rename, so an interrupted download never looks cached.
    let tmp_path = dest.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;
    let mut reader = resp.into_reader();
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; config::download::CHUNK_BYTES];
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("failed to read response body for {url}"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        progress.inc(n as u64);
    }
    file.flush()?;
    drop(file);
    progress.finish_and_clear();

    let digest = hex::encode(hasher.finalize());
    log::info!("Downloaded {} (sha256 {})", filename, &digest[..12]);

    fs::rename(&tmp_path, dest)
        .with_context(|| format!("failed to rename {} -> {}", tmp_path.display(), dest.display()))?;

    Ok(digest)
}

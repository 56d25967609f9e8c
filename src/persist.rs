// persist.rs - Output writers. Both files are overwritten in place on every run.

use std::path::Path;

use anyhow::Context;
use candle_core::{DType, Device, Tensor};

use crate::reviews::ReviewTable;

/// Shape and size of the written embedding array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayInfo {
    pub rows: usize,
    pub dims: usize,
    pub bytes: usize,
}

/// Write `embeddings` as a little-endian f32 `.npy` array.
pub fn save_embeddings(embeddings: &Tensor, path: &Path) -> anyhow::Result<ArrayInfo> {
    let embeddings = embeddings.to_dtype(DType::F32)?.to_device(&Device::Cpu)?;
    let (rows, dims) = embeddings.dims2().context("embeddings must be a 2-D array")?;
    embeddings
        .write_npy(path)
        .with_context(|| format!("write {}", path.display()))?;
    log::info!("Saved {}x{} embeddings to {}", rows, dims, path.display());
    Ok(ArrayInfo {
        rows,
        dims,
        bytes: rows * dims * DType::F32.size_in_bytes(),
    })
}

pub fn save_reviews(reviews: &ReviewTable, path: &Path) -> anyhow::Result<()> {
    reviews.write_csv(path)?;
    log::info!("Saved {} cleaned reviews to {}", reviews.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_embeddings_casts_to_f32() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.npy");
        let t = Tensor::new(&[[1.0f64, 0.0, 0.0], [0.0, 0.6, 0.8]], &Device::Cpu).unwrap();

        let info = save_embeddings(&t, &path).unwrap();
        assert_eq!(info, ArrayInfo { rows: 2, dims: 3, bytes: 24 });

        let back = Tensor::read_npy(&path).unwrap();
        assert_eq!(back.dtype(), DType::F32);
        assert_eq!(back.to_vec2::<f32>().unwrap(), vec![vec![1.0, 0.0, 0.0], vec![0.0, 0.6, 0.8]]);
    }

    #[test]
    fn test_save_embeddings_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.npy");
        std::fs::write(&path, b"stale").unwrap();
        let t = Tensor::zeros((0, 4), DType::F32, &Device::Cpu).unwrap();
        save_embeddings(&t, &path).unwrap();
        assert_eq!(Tensor::read_npy(&path).unwrap().dims(), &[0, 4]);
    }

    #[test]
    fn test_save_reviews_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reviews_clean.csv");
        let table = ReviewTable::from_reader("description,rating\nok,5\n".as_bytes(), "description").unwrap();
        save_reviews(&table, &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "description,rating\nok,5\n");
    }
}

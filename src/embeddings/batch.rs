// batch.rs - Batched encoding with MRL truncation and L2 normalization.
//
// The model backend only produces raw pooled vectors at its native width. Cutting
// them down to the configured width and normalizing happens here, batch by batch,
// so the same post-processing applies to any backend.

use anyhow::{bail, Context};
use candle_core::{DType, Device, Tensor};
use indicatif::{ProgressBar, ProgressStyle};

/// A text embedding backend.
pub trait Encoder {
    /// Width of the vectors returned by [`Encoder::encode`].
    fn native_dims(&self) -> usize;

    /// Where inference runs and at which precision, for the run summary.
    fn device_label(&self) -> String;

    /// Encode `texts` into a `[texts.len(), native_dims]` tensor, one row per text in
    /// input order. Rows must not depend on which other texts share the call.
    fn encode(&mut self, texts: &[String]) -> anyhow::Result<Tensor>;
}

#[derive(Debug, Clone, Copy)]
pub struct BatchEncoder {
    batch_size: usize,
    dims: usize,
    normalize: bool,
    show_progress: bool,
}

impl BatchEncoder {
    pub fn new(batch_size: usize, dims: usize, normalize: bool) -> anyhow::Result<Self> {
        if batch_size == 0 {
            bail!("configuration error: batch size must be at least 1");
        }
        if dims == 0 {
            bail!("configuration error: embedding dimensionality must be at least 1");
        }
        Ok(Self {
            batch_size,
            dims,
            normalize,
            show_progress: false,
        })
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Fail unless `encoder` can produce vectors at least as wide as the target.
    pub fn check_supported<E: Encoder + ?Sized>(&self, encoder: &E) -> anyhow::Result<()> {
        let native = encoder.native_dims();
        if self.dims > native {
            bail!(
                "configuration error: requested {} dims but the model only produces {}",
                self.dims,
                native
            );
        }
        Ok(())
    }

    /// Encode all texts. Returns an F32 `[texts.len(), dims]` tensor on the CPU.
    pub fn encode_all<E: Encoder + ?Sized>(&self, encoder: &mut E, texts: &[String]) -> anyhow::Result<Tensor> {
        self.check_supported(encoder)?;

        if texts.is_empty() {
            log::warn!("No texts to encode");
            return Ok(Tensor::zeros((0, self.dims), DType::F32, &Device::Cpu)?);
        }

        let progress = if self.show_progress {
            let bar = ProgressBar::new(texts.len() as u64);
            bar.set_style(ProgressStyle::with_template(
                "Encoding [{bar:40}] {pos}/{len} texts ({per_sec}, eta {eta})",
            )?);
            bar
        } else {
            ProgressBar::hidden()
        };

        let batch_count = texts.len().div_ceil(self.batch_size);
        let mut rows = Vec::with_capacity(batch_count);
        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            let raw = encoder
                .encode(batch)
                .with_context(|| format!("encode batch {}/{}", i + 1, batch_count))?;
            let (n, _) = raw.dims2().context("encoder returned a non-matrix")?;
            if n != batch.len() {
                bail!("encoder returned {} vectors for {} texts", n, batch.len());
            }
            rows.push(self.finish(&raw)?);
            progress.inc(batch.len() as u64);
            log::debug!("Encoded batch {}/{} ({} texts)", i + 1, batch_count, batch.len());
        }
        progress.finish_and_clear();

        Ok(Tensor::cat(&rows, 0)?)
    }

    /// Truncate to the target width, cast to F32 on the CPU, then normalize.
    fn finish(&self, raw: &Tensor) -> anyhow::Result<Tensor> {
        let truncated = raw
            .narrow(1, 0, self.dims)?
            .to_dtype(DType::F32)?
            .to_device(&Device::Cpu)?;
        if self.normalize {
            l2_normalize(&truncated)
        } else {
            Ok(truncated)
        }
    }
}

/// L2 normalize a tensor along the last dimension.
pub fn l2_normalize(tensor: &Tensor) -> anyhow::Result<Tensor> {
    let norm = tensor.sqr()?.sum_keepdim(1)?.sqrt()?;
    let norm = norm.clamp(1e-12, f64::MAX)?;
    Ok(tensor.broadcast_div(&norm)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Deterministic stand-in for a model: each component is derived from the text
    /// bytes, so equal texts always map to equal vectors.
    pub(crate) struct FakeEncoder {
        pub dims: usize,
        pub seen: Vec<String>,
        pub calls: usize,
    }

    impl FakeEncoder {
        pub fn new(dims: usize) -> Self {
            Self {
                dims,
                seen: Vec::new(),
                calls: 0,
            }
        }

        pub fn vector(&self, text: &str) -> Vec<f32> {
            let seed = text
                .bytes()
                .fold(17u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
            (0..self.dims)
                .map(|i| ((seed.wrapping_add(i as u32 * 7919) % 1000) as f32 - 500.0) / 100.0 + 0.01)
                .collect()
        }
    }

    impl Encoder for FakeEncoder {
        fn native_dims(&self) -> usize {
            self.dims
        }

        fn device_label(&self) -> String {
            "cpu (fake)".to_string()
        }

        fn encode(&mut self, texts: &[String]) -> anyhow::Result<Tensor> {
            self.calls += 1;
            self.seen.extend(texts.iter().cloned());
            let flat: Vec<f32> = texts.iter().flat_map(|t| self.vector(t)).collect();
            Ok(Tensor::from_vec(flat, (texts.len(), self.dims), &Device::Cpu)?)
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("review number {i}")).collect()
    }

    #[test]
    fn test_rows_have_unit_norm_and_target_dims() {
        let mut enc = FakeEncoder::new(24);
        let out = BatchEncoder::new(3, 8, true).unwrap().encode_all(&mut enc, &texts(7)).unwrap();
        assert_eq!(out.dims2().unwrap(), (7, 8));
        for row in out.to_vec2::<f32>().unwrap() {
            let norm: f32 = row.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
        }
        assert_eq!(enc.calls, 3);
    }

    #[test]
    fn test_truncates_before_normalizing() {
        let mut enc = FakeEncoder::new(6);
        let input = texts(1);
        let raw = enc.vector(&input[0]);
        let out = BatchEncoder::new(1, 4, true).unwrap().encode_all(&mut enc, &input).unwrap();
        let prefix = &raw[..4];
        let norm: f32 = prefix.iter().map(|x| x * x).sum::<f32>().sqrt();
        let row = &out.to_vec2::<f32>().unwrap()[0];
        for (got, want) in row.iter().zip(prefix) {
            assert!((got - want / norm).abs() < 1e-5);
        }
    }

    #[test]
    fn test_batch_size_does_not_change_values() {
        let input = texts(11);
        let a = BatchEncoder::new(1, 5, true)
            .unwrap()
            .encode_all(&mut FakeEncoder::new(9), &input)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        let b = BatchEncoder::new(4, 5, true)
            .unwrap()
            .encode_all(&mut FakeEncoder::new(9), &input)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_order_preserved() {
        let input = texts(5);
        let mut enc = FakeEncoder::new(4);
        let out = BatchEncoder::new(2, 4, false).unwrap().encode_all(&mut enc, &input).unwrap();
        assert_eq!(enc.seen, input);
        let rows = out.to_vec2::<f32>().unwrap();
        for (row, text) in rows.iter().zip(&input) {
            assert_eq!(row, &enc.vector(text));
        }
    }

    #[test]
    fn test_empty_input_gives_empty_matrix() {
        let mut enc = FakeEncoder::new(4);
        let out = BatchEncoder::new(2, 4, true).unwrap().encode_all(&mut enc, &[]).unwrap();
        assert_eq!(out.dims2().unwrap(), (0, 4));
        assert_eq!(enc.calls, 0);
    }

    #[test]
    fn test_unsupported_dims_is_config_error() {
        let mut enc = FakeEncoder::new(4);
        let err = BatchEncoder::new(2, 8, true).unwrap().encode_all(&mut enc, &texts(1)).unwrap_err();
        assert!(err.to_string().contains("configuration error"));
    }

    #[test]
    fn test_zero_batch_size_or_dims_rejected() {
        assert!(BatchEncoder::new(0, 4, true).is_err());
        assert!(BatchEncoder::new(4, 0, true).is_err());
    }
}

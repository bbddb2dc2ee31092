use image::DynamicImage;
use std::path::Path;

use crate::domain::errors::EmbeddingError;

/// Fixed-length image representation produced by an [`ImageEmbedder`].
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }
}

pub trait ImageEmbedder: Send + Sync {
    /// Length of every embedding this embedder produces.
    fn dimension(&self) -> usize;

    fn embed(&self, image: &DynamicImage) -> Result<Embedding, EmbeddingError>;

    /// Embeds several images. Output order matches input order.
    fn embed_batch(&self, images: &[DynamicImage]) -> Result<Vec<Embedding>, EmbeddingError> {
        images.iter().map(|img| self.embed(img)).collect()
    }
}

pub fn load_image(path: &Path) -> Result<DynamicImage, EmbeddingError> {
    image::open(path).map_err(|source| EmbeddingError::ImageDecode {
        path: path.to_path_buf(),
        source,
    })
}

/// Cosine similarity in `[-1, 1]`. A zero vector scores 0.
pub fn similarity(a: &Embedding, b: &Embedding) -> Result<f32, EmbeddingError> {
    if a.dimension() != b.dimension() {
        return Err(EmbeddingError::DimensionMismatch {
            left: a.dimension(),
            right: b.dimension(),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    let cos = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok(cos.clamp(-1.0, 1.0) as f32)
}

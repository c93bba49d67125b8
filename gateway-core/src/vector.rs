//! Embedding provider (C1): an opaque `encode(text) -> vector<f32>` boundary.
//!
//! The real embedding model is out of scope (spec.md §1 treats it as an
//! external collaborator); this module only defines the `Vector` type, the
//! cosine-similarity metric every other component relies on, and the
//! `EmbeddingProvider` seam itself.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A fixed-dimension, already-normalized embedding vector.
///
/// All comparisons use cosine similarity; callers that construct a `Vector`
/// from raw floats should go through [`Vector::new`], which normalizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector(Vec<f32>);

impl Vector {
    /// Build a vector from raw components, L2-normalizing it.
    ///
    /// Returns [`Error::InvalidArgument`] if any component is NaN/infinite or
    /// every component is zero (a zero vector has no direction to normalize).
    pub fn new(components: Vec<f32>) -> Result<Self> {
        if components.iter().any(|c| !c.is_finite()) {
            return Err(Error::invalid_argument(
                "vector contains a NaN or infinite component",
            ));
        }
        let norm = components.iter().map(|c| c * c).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(Error::invalid_argument("vector has zero magnitude"));
        }
        Ok(Self(components.into_iter().map(|c| c / norm).collect()))
    }

    /// Number of dimensions.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Raw (already-normalized) components.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Cosine similarity against another vector, in `[-1.0, 1.0]`.
    ///
    /// Vectors of mismatched dimension are treated as maximally dissimilar
    /// (`-1.0`) rather than panicking, since candidates from a dynamic tool
    /// set may legitimately have been embedded by different model versions.
    #[must_use]
    pub fn cosine_similarity(&self, other: &Vector) -> f32 {
        if self.0.len() != other.0.len() {
            return -1.0;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| a * b)
            .sum::<f32>()
            .clamp(-1.0, 1.0)
    }
}

/// Pure-function boundary for turning text into an embedding.
///
/// Treated as an external collaborator per spec.md §1: implementations may
/// call out to a network service, but `encode` is still fallible (the
/// network/model boundary can fail even though the function itself is
/// conceptually pure).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Encode `text` into a [`Vector`].
    async fn encode(&self, text: &str) -> Result<Vector>;

    /// Output dimensionality of this provider.
    fn dim(&self) -> usize;
}

/// Deterministic, dependency-free embedder for tests and offline operation.
///
/// Derives a reproducible unit vector from a SHA-256 hash of the input text
/// (grounded in the teacher's `llm::cache::CacheKey::generate` hashing
/// idiom). This is not a semantic embedding: it has no notion of meaning
/// beyond exact byte-for-byte equality, which is sufficient for exercising
/// dedup, registry, and plan-building logic without a real model.
pub struct DeterministicHashEmbedder {
    dim: usize,
}

impl DeterministicHashEmbedder {
    /// Create an embedder producing vectors of `dim` dimensions.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for DeterministicHashEmbedder {
    fn default() -> Self {
        Self::new(32)
    }
}

#[async_trait]
impl EmbeddingProvider for DeterministicHashEmbedder {
    async fn encode(&self, text: &str) -> Result<Vector> {
        let mut components = Vec::with_capacity(self.dim);
        let mut counter: u32 = 0;
        while components.len() < self.dim {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks_exact(4) {
                if components.len() >= self.dim {
                    break;
                }
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                // Map into [-1.0, 1.0] before normalization.
                components.push((raw as f32 / u32::MAX as f32) * 2.0 - 1.0);
            }
            counter += 1;
        }
        Vector::new(components)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_encodes_deterministically() {
        let embedder = DeterministicHashEmbedder::new(16);
        let a = embedder.encode("read JSON config").await.unwrap();
        let b = embedder.encode("read JSON config").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn different_text_encodes_differently() {
        let embedder = DeterministicHashEmbedder::new(16);
        let a = embedder.encode("read JSON config").await.unwrap();
        let b = embedder.encode("write CSV report").await.unwrap();
        assert!(a.cosine_similarity(&b) < 0.999);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = Vector::new(vec![1.0, 2.0, 3.0]).unwrap();
        assert!((v.cosine_similarity(&v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn rejects_zero_vector() {
        assert!(Vector::new(vec![0.0, 0.0]).is_err());
    }

    #[test]
    fn rejects_nan() {
        assert!(Vector::new(vec![f32::NAN]).is_err());
    }

    #[test]
    fn mismatched_dimension_is_maximally_dissimilar() {
        let a = Vector::new(vec![1.0, 0.0]).unwrap();
        let b = Vector::new(vec![1.0, 0.0, 0.0]).unwrap();
        assert_eq!(a.cosine_similarity(&b), -1.0);
    }
}

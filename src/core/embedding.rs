//! Text embeddings for the semantic cache.
//!
//! The embedding here is derived from a SHA-256 digest of the normalized
//! text: each of the first 32 digest bytes is scaled into `[0, 1]`. This is a
//! non-semantic degradation of a real embedding model — near-identical
//! strings map to similar vectors, unrelated strings almost never do — which
//! is enough for the cache to short-circuit repeated queries while keeping
//! the embedding model itself an external concern.
//!
//! Dimensionality is fixed per process; mixing vectors of different
//! dimensions yields a similarity of zero.

use sha2::{Digest, Sha256};

/// Fixed embedding dimensionality.
pub const EMBEDDING_DIM: usize = 32;

/// Compute the embedding vector for a text.
pub fn embed(text: &str) -> Vec<f32> {
    let normalized = text.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    digest
        .iter()
        .take(EMBEDDING_DIM)
        .map(|&b| b as f32 / 255.0)
        .collect()
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for zero-norm or mismatched-dimension inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Find the candidates most similar to a query embedding.
///
/// Returns `(index, similarity)` pairs sorted by descending similarity,
/// keeping at most `top_k` entries at or above `threshold`.
pub fn find_most_similar(
    query: &[f32],
    candidates: &[Vec<f32>],
    top_k: usize,
    threshold: f32,
) -> Vec<(usize, f32)> {
    let mut similarities: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(query, c)))
        .filter(|&(_, sim)| sim >= threshold)
        .collect();

    similarities.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    similarities.truncate(top_k);
    similarities
}

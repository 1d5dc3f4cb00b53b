//! Vector codec and similarity math
//!
//! Embeddings are persisted as a JSON array of `f32` in a TEXT column.
//! An empty string means the embedding has not been computed yet.

use crate::error::{CortexError, Result};

/// Encode a vector for storage
pub fn encode_vector(vector: &[f32]) -> Result<String> {
    serde_json::to_string(vector)
        .map_err(|e| CortexError::Decode(format!("failed to encode vector: {}", e)))
}

/// Decode a stored vector; empty input means "no embedding"
pub fn decode_vector(raw: &str) -> Result<Option<Vec<f32>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<Vec<f32>>(raw)
        .map(Some)
        .map_err(|e| CortexError::Decode(format!("failed to decode vector: {}", e)))
}

/// Scale a vector to unit L2 norm. A zero vector is returned unchanged.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let sum: f64 = vector.iter().map(|v| (*v as f64) * (*v as f64)).sum();
    if sum == 0.0 {
        return vector.to_vec();
    }
    let norm = sum.sqrt();
    vector.iter().map(|v| (*v as f64 / norm) as f32).collect()
}

/// Cosine similarity between two vectors
///
/// Returns 0 when the dimensions differ, when either vector is empty, or when
/// either norm is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

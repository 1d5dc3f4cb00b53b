//! Deterministic hash embedder
//!
//! Offline fallback that needs no model or network. Vectors are derived from
//! FNV-1a hashes of the lowercased text plus word and length features, so
//! identical text always embeds identically. This approximates lexical
//! overlap only; it is not a semantic model.

use super::vector::normalize;
use super::Embedder;
use crate::error::Result;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Default output dimension
pub const DEFAULT_HASH_DIMENSIONS: usize = 384;

/// Terms appended to the text when the key word appears, to lift recall for
/// closely related vocabulary.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("latte", &["coffee", "espresso", "cappuccino"]),
    ("cappuccino", &["coffee", "espresso"]),
    ("espresso", &["coffee"]),
    ("tea", &["drink"]),
    ("car", &["vehicle", "automobile"]),
    ("puppy", &["dog"]),
    ("kitten", &["cat"]),
];

/// FNV-1a hash embedder
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_str(s: &str) -> u32 {
        let mut hash = FNV_OFFSET_BASIS;
        for c in s.chars() {
            hash ^= c as u32;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }

    /// Lowercase and append synonyms for known words that are not yet present
    fn expand(text: &str) -> String {
        let mut normalized = text.to_lowercase();
        let words: Vec<String> = normalized.split_whitespace().map(String::from).collect();

        for (term, synonyms) in SYNONYMS {
            if !words.iter().any(|w| w == term) {
                continue;
            }
            for synonym in *synonyms {
                let present = normalized.split_whitespace().any(|w| w == *synonym);
                if !present {
                    normalized.push(' ');
                    normalized.push_str(synonym);
                }
            }
        }

        normalized
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSIONS)
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str, _content_type: &str) -> Result<Vec<f32>> {
        let normalized = Self::expand(text);

        let content_hash = Self::hash_str(&normalized);
        let words: Vec<&str> = normalized.split_whitespace().collect();
        let word_count = words.len();
        let char_count = normalized.len();

        // Very short words carry little signal
        let word_hashes: Vec<u32> = words
            .iter()
            .filter(|w| w.len() > 2)
            .map(|w| Self::hash_str(w))
            .collect();

        let mut embedding = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hash = content_hash.wrapping_add((i as u32).wrapping_mul(31));
            if i < word_hashes.len() {
                hash ^= word_hashes[i % word_hashes.len()];
            }

            let unit = (hash % 10_000) as f32 / 10_000.0;
            let value = match i % 3 {
                0 => unit * (word_count % 100) as f32 / 100.0,
                1 => unit * (char_count % 1000) as f32 / 1000.0,
                _ => unit,
            };

            embedding.push(value * 2.0 - 1.0);
        }

        Ok(normalize(&embedding))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_dimensions_and_unit_norm() {
        let embedder = HashEmbedder::default();
        let v = embedder.embed("Hello world", "text/plain").unwrap();
        assert_eq!(v.len(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("same text", "text/plain").unwrap();
        let b = embedder.embed("same text", "text/plain").unwrap();
        assert_eq!(a, b);
        assert!(cosine_similarity(&a, &b) >= 0.99);
    }

    #[test]
    fn test_case_insensitive() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("Morning Coffee", "text/plain").unwrap();
        let b = embedder.embed("morning coffee", "text/plain").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_discrimination() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("alpha beta gamma", "text/plain").unwrap();
        let b = embedder
            .embed("completely unrelated text", "text/plain")
            .unwrap();
        assert!(cosine_similarity(&a, &b) < 0.9);
    }

    #[test]
    fn test_synonym_expansion() {
        assert_eq!(
            HashEmbedder::expand("Oat milk LATTE"),
            "oat milk latte coffee espresso cappuccino"
        );
        // Terms already present are not appended twice
        assert_eq!(HashEmbedder::expand("latte coffee"), "latte coffee espresso cappuccino");
        assert_eq!(HashEmbedder::expand("plain words"), "plain words");
    }

    #[test]
    fn test_batch_matches_single() {
        let embedder = HashEmbedder::new(64);
        let batch = embedder.embed_batch(&["one", "two"], "text/plain").unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], embedder.embed("one", "text/plain").unwrap());
    }
}

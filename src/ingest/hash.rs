//! Content-addressed chunk identity.

use sha2::{Digest, Sha256};

/// Deterministic fingerprint of a normalized content string: lowercase hex
/// SHA-256 of the exact bytes.
///
/// This digest is the sole deduplication identity — not document position,
/// not source. Identical strings always hash identically; any single
/// character difference produces a different digest.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_hashes_identically() {
        let text = "Límite de velocidad en zona urbana: 40 km/h.";
        assert_eq!(content_hash(text), content_hash(text));
    }

    #[test]
    fn digest_is_hex_sha256() {
        let digest = content_hash("hola");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn near_duplicates_hash_differently() {
        let base = "El examen práctico dura veinticinco minutos en total.";
        let mutations: Vec<String> = (0..base.chars().count())
            .map(|i| {
                base.chars()
                    .enumerate()
                    .map(|(j, c)| if i == j { 'x' } else { c })
                    .collect()
            })
            .collect();

        let original = content_hash(base);
        for mutated in mutations {
            if mutated != base {
                assert_ne!(content_hash(&mutated), original, "input: {mutated}");
            }
        }
    }
}

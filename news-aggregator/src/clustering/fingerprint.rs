//! 64-bit SimHash fingerprints over word shingles.
//!
//! Similar texts produce fingerprints with a small Hamming distance, so
//! near-duplicates can be found without any external index.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const SHINGLE_SIZE: usize = 3;
const MIN_TOKEN_LEN: usize = 3;

/// Fingerprint of `text`. Texts without a single shingle map to 0.
pub fn compute(text: &str) -> u64 {
    let shingles = shingles(text);
    if shingles.is_empty() {
        return 0;
    }

    let mut weights = [0i64; 64];
    for shingle in &shingles {
        let hash = fnv1a_64(shingle.as_bytes());
        for (bit, weight) in weights.iter_mut().enumerate() {
            if hash & (1u64 << bit) != 0 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    }

    weights
        .iter()
        .enumerate()
        .filter(|(_, weight)| **weight > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1u64 << bit))
}

/// Hamming distance between two fingerprints.
pub fn distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Overlapping three-token windows of the cleaned, lower-cased text.
pub fn shingles(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || is_separator(*c))
        .collect();

    let tokens: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|token| token.len() >= MIN_TOKEN_LEN)
        .collect();

    tokens.windows(SHINGLE_SIZE).map(|window| window.join(" ")).collect()
}

// ASCII whitespace including vertical tab; other Unicode spaces are stripped.
fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0b' | '\x0c' | '\r')
}

pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

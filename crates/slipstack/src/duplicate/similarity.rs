//! Normalized edit-distance similarity for short text fields.

/// Levenshtein distance between two character sequences.
pub fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two-row dynamic programming table.
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j]
            } else {
                1 + previous[j].min(current[j]).min(previous[j + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Lowercases and keeps only ASCII letters and digits.
fn normalize(s: &str) -> Vec<char> {
    s.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Similarity in percent (0–100) between two strings, ignoring case and
/// non-alphanumeric characters. An empty input on either side scores 0.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let a = normalize(a);
    let b = normalize(b);

    if a == b {
        return 100.0;
    }

    let max_len = a.len().max(b.len());
    let distance = levenshtein(&a, &b);
    let similarity = (max_len - distance) as f64 / max_len as f64 * 100.0;

    similarity.clamp(0.0, 100.0)
}

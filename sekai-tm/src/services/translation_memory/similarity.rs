//! Normalized edit-distance scoring. Quadratic in input length, so it is only
//! ever run against the candidate set produced by the relevance index.

/// Levenshtein distance with unit costs, over Unicode scalar values.
pub fn edit_distance(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev_row: Vec<usize> = (0..=b.len()).collect();
    let mut curr_row = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr_row[0] = i + 1;

        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr_row[j + 1] = (curr_row[j] + 1)
                .min(prev_row[j + 1] + 1)
                .min(prev_row[j] + cost);
        }

        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b.len()]
}

/// `1 - distance / max(len_a, len_b, 1)`, in `[0.0, 1.0]`. Two empty strings score 1.0.
pub fn similarity(a: &str, b: &str, case_sensitive: bool) -> f64 {
    let (a, b): (Vec<char>, Vec<char>) = if case_sensitive {
        (a.chars().collect(), b.chars().collect())
    } else {
        (a.to_lowercase().chars().collect(), b.to_lowercase().chars().collect())
    };

    let max_len = a.len().max(b.len()).max(1);
    let dist = edit_distance(&a, &b);

    (1.0 - dist as f64 / max_len as f64).clamp(0.0, 1.0)
}

//! Approximate string matching on a 0–100 scale.
//!
//! Used when exact invoice/order identifiers fail to match: customer names
//! and item descriptions are compared token-wise, insensitive to case,
//! punctuation, and word order, with an edit-distance fallback for typos.

use std::collections::BTreeSet;

/// Similarity between two strings, 0 (disjoint) to 100 (equivalent).
///
/// The score is the better of a token-overlap ratio and a normalized edit
/// distance over the sorted tokens, so both reordered words and small
/// misspellings score well.
pub fn similarity(a: &str, b: &str) -> u8 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);

    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 100;
    }
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0;
    }

    let common = tokens_a.intersection(&tokens_b).count();
    let token_ratio = (200 * common) / (tokens_a.len() + tokens_b.len());

    let joined_a = join_sorted(&tokens_a);
    let joined_b = join_sorted(&tokens_b);
    let edit_ratio = edit_similarity(&joined_a, &joined_b);

    token_ratio.max(edit_ratio).min(100) as u8
}

fn tokenize(s: &str) -> BTreeSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn join_sorted(tokens: &BTreeSet<String>) -> String {
    tokens.iter().cloned().collect::<Vec<_>>().join(" ")
}

/// 100 × (1 − levenshtein / longest length).
fn edit_similarity(a: &str, b: &str) -> usize {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 100;
    }
    let distance = edit_distance(a, b);
    100usize.saturating_sub((100 * distance) / longest)
}

/// Standard two-row Levenshtein distance.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

//! Bigram-Dice similarity over folded names.
//!
//! Used to rank registry candidates against member names and to pick the
//! suggested canonical member. The detector's trigram similarity lives in
//! the database; this one is the in-process complement.

use std::collections::HashMap;

/// Dice coefficient over multisets of consecutive 2-character substrings:
/// `2 * |A ∩ B| / (|A| + |B|)`, in `[0, 1]`.
///
/// Equal inputs score exactly `1.0`. Inputs shorter than two characters
/// have no bigrams and score `0.0` against anything unequal.
#[must_use]
pub fn dice(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let bigrams_a = bigrams(a);
    let bigrams_b = bigrams(b);
    if bigrams_a.is_empty() || bigrams_b.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<(char, char), usize> = HashMap::new();
    for bg in &bigrams_a {
        *counts.entry(*bg).or_insert(0) += 1;
    }

    let mut intersection = 0usize;
    for bg in &bigrams_b {
        if let Some(count) = counts.get_mut(bg) {
            if *count > 0 {
                *count -= 1;
                intersection += 1;
            }
        }
    }

    (2.0 * intersection as f64) / ((bigrams_a.len() + bigrams_b.len()) as f64)
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identical_strings_score_one() {
        assert_eq!(dice("sao paulo", "sao paulo"), 1.0);
        assert_eq!(dice("", ""), 1.0);
        assert_eq!(dice("a", "a"), 1.0);
    }

    #[test]
    fn test_disjoint_strings_score_zero() {
        assert_eq!(dice("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_short_strings_without_bigrams() {
        assert_eq!(dice("a", "b"), 0.0);
        assert_eq!(dice("a", "ab"), 0.0);
        assert_eq!(dice("", "ab"), 0.0);
    }

    #[test]
    fn test_partial_overlap() {
        // "night" vs "nacht": bigrams {ni,ig,gh,ht} vs {na,ac,ch,ht} share {ht}.
        let score = dice("night", "nacht");
        assert!((score - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_multiset_counting() {
        // Repeated bigrams only match as many times as they occur on both sides.
        // "aaa" = {aa, aa}, "aa" = {aa}: 2*1 / (2+1).
        let score = dice("aaa", "aa");
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_accent_variants_score_high_after_fold() {
        use crate::normalize::fold;
        let score = dice(&fold("Jardim América"), &fold("Jardim America"));
        assert_eq!(score, 1.0);
    }

    proptest! {
        #[test]
        fn prop_dice_bounds(a in "\\PC{0,24}", b in "\\PC{0,24}") {
            let score = dice(&a, &b);
            prop_assert!((0.0..=1.0).contains(&score));
        }

        #[test]
        fn prop_dice_symmetric(a in "[a-z ]{0,16}", b in "[a-z ]{0,16}") {
            prop_assert_eq!(dice(&a, &b).to_bits(), dice(&b, &a).to_bits());
        }

        #[test]
        fn prop_dice_reflexive(a in "\\PC{0,24}") {
            prop_assert_eq!(dice(&a, &a), 1.0);
        }
    }
}

//! Benjamini-Hochberg false discovery rate correction

use crate::{SomaticError, SomaticResult};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

/// One corrected hypothesis, in rank order
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedPValue<K> {
    pub key: K,
    /// 1-based rank by ascending raw p-value
    pub rank: usize,
    pub raw_p: f64,
    pub adjusted_p: f64,
}

/// Result of a correction run: every submitted key with its adjusted p-value
#[derive(Debug, Clone)]
pub struct Correction<K: Eq + Hash> {
    entries: Vec<AdjustedPValue<K>>,
    index: HashMap<K, usize>,
    alpha: f64,
}

impl<K: Eq + Hash> Correction<K> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Adjusted p-value for a key
    pub fn get(&self, key: &K) -> Option<f64> {
        self.index.get(key).map(|&i| self.entries[i].adjusted_p)
    }

    /// Entries in ascending raw p-value order, ties in submission order
    pub fn iter(&self) -> impl Iterator<Item = &AdjustedPValue<K>> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<AdjustedPValue<K>> {
        self.entries
    }

    /// Largest rank i with raw p_i <= i * alpha / n, if any.
    ///
    /// Hypotheses at or below this rank are the discoveries of the classic
    /// step-up procedure at level alpha.
    pub fn critical_rank(&self) -> Option<usize> {
        let n = self.entries.len() as f64;
        self.entries
            .iter()
            .rev()
            .find(|e| e.raw_p <= e.rank as f64 * self.alpha / n)
            .map(|e| e.rank)
    }
}

/// Compute Benjamini-Hochberg adjusted p-values.
///
/// Entries are ranked by raw p-value with a stable sort, so tied p-values keep
/// their submission order. The adjusted value at rank i is
/// `min(1, min_{j >= i} p_j * n / j)`. `alpha` is recorded on the result for
/// [`Correction::critical_rank`]; it does not change the adjusted values.
///
/// Fails with [`SomaticError::DuplicateKey`] if a key repeats, and with
/// [`SomaticError::InvalidPValue`] for NaN or out-of-range inputs. Nothing is
/// returned in either case.
pub fn benjamini_hochberg<K>(pvalues: Vec<(K, f64)>, alpha: f64) -> SomaticResult<Correction<K>>
where
    K: Eq + Hash + Clone + Display,
{
    {
        let mut seen = HashSet::with_capacity(pvalues.len());
        for (key, p) in &pvalues {
            if !seen.insert(key) {
                return Err(SomaticError::DuplicateKey(key.to_string()));
            }
            if !(0.0..=1.0).contains(p) {
                return Err(SomaticError::InvalidPValue {
                    key: key.to_string(),
                    value: *p,
                });
            }
        }
    }

    let n = pvalues.len();
    let mut sorted = pvalues;
    sorted.sort_by(|x, y| x.1.total_cmp(&y.1));

    let mut adjusted = vec![0.0; n];
    let mut running_min = 1.0_f64;
    for i in (0..n).rev() {
        let rank = i + 1;
        let candidate = sorted[i].1 * n as f64 / rank as f64;
        running_min = running_min.min(candidate);
        adjusted[i] = running_min;
    }

    let mut entries = Vec::with_capacity(n);
    let mut index = HashMap::with_capacity(n);
    for (i, ((key, raw_p), adjusted_p)) in sorted.into_iter().zip(adjusted).enumerate() {
        index.insert(key.clone(), i);
        entries.push(AdjustedPValue {
            key,
            rank: i + 1,
            raw_p,
            adjusted_p,
        });
    }

    Ok(Correction {
        entries,
        index,
        alpha,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(values: &[(&str, f64)]) -> Vec<(String, f64)> {
        values.iter().map(|(k, p)| (k.to_string(), *p)).collect()
    }

    #[test]
    fn test_empty_input() {
        let correction = benjamini_hochberg(Vec::<(String, f64)>::new(), 0.05).unwrap();
        assert!(correction.is_empty());
        assert_eq!(correction.critical_rank(), None);
    }

    #[test]
    fn test_single_entry_unchanged() {
        let correction = benjamini_hochberg(pairs(&[("v1", 0.0123)]), 0.05).unwrap();
        assert_eq!(correction.len(), 1);
        assert_eq!(correction.get(&"v1".to_string()), Some(0.0123));
    }

    #[test]
    fn test_identical_p_values_are_neutral() {
        let correction =
            benjamini_hochberg(pairs(&[("a", 0.2), ("b", 0.2), ("c", 0.2), ("d", 0.2)]), 0.05)
                .unwrap();
        for e in correction.iter() {
            assert!((e.adjusted_p - 0.2).abs() < 1e-12);
        }
    }

    #[test]
    fn test_known_adjustment() {
        // Matches R: p.adjust(c(0.01, 0.04, 0.03, 0.005), "BH")
        let correction = benjamini_hochberg(
            pairs(&[("a", 0.01), ("b", 0.04), ("c", 0.03), ("d", 0.005)]),
            0.05,
        )
        .unwrap();

        let expect = [("a", 0.02), ("b", 0.04), ("c", 0.04), ("d", 0.02)];
        for (key, value) in expect {
            let adjusted = correction.get(&key.to_string()).unwrap();
            assert!((adjusted - value).abs() < 1e-12, "{}: {}", key, adjusted);
        }

        let order: Vec<&str> = correction.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(order, vec!["d", "a", "c", "b"]);
    }

    #[test]
    fn test_monotone_and_never_below_raw() {
        let input = pairs(&[
            ("a", 0.001),
            ("b", 0.8),
            ("c", 0.04),
            ("d", 0.039),
            ("e", 0.5),
            ("f", 0.0),
            ("g", 1.0),
        ]);
        let correction = benjamini_hochberg(input.clone(), 0.05).unwrap();
        assert_eq!(correction.len(), input.len());

        let mut previous = 0.0;
        for e in correction.iter() {
            assert!(e.adjusted_p >= e.raw_p);
            assert!(e.adjusted_p >= previous);
            assert!((0.0..=1.0).contains(&e.adjusted_p));
            previous = e.adjusted_p;
        }
    }

    #[test]
    fn test_adjusted_capped_at_one() {
        let correction = benjamini_hochberg(pairs(&[("a", 0.9), ("b", 0.95)]), 0.05).unwrap();
        assert_eq!(correction.get(&"a".to_string()), Some(0.95));
        assert_eq!(correction.get(&"b".to_string()), Some(0.95));
    }

    #[test]
    fn test_ties_keep_submission_order() {
        let correction =
            benjamini_hochberg(pairs(&[("z", 0.3), ("y", 0.01), ("x", 0.3), ("w", 0.01)]), 0.05)
                .unwrap();
        let order: Vec<&str> = correction.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(order, vec!["y", "w", "z", "x"]);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = benjamini_hochberg(pairs(&[("a", 0.1), ("b", 0.2), ("a", 0.3)]), 0.05)
            .unwrap_err();
        assert!(matches!(err, SomaticError::DuplicateKey(ref k) if k == "a"));
    }

    #[test]
    fn test_invalid_p_value_rejected() {
        assert!(matches!(
            benjamini_hochberg(pairs(&[("a", f64::NAN)]), 0.05),
            Err(SomaticError::InvalidPValue { .. })
        ));
        assert!(matches!(
            benjamini_hochberg(pairs(&[("a", 1.5)]), 0.05),
            Err(SomaticError::InvalidPValue { .. })
        ));
    }

    #[test]
    fn test_critical_rank() {
        // n = 4, alpha = 0.05: lines at 0.0125, 0.025, 0.0375, 0.05
        let correction = benjamini_hochberg(
            pairs(&[("a", 0.01), ("b", 0.04), ("c", 0.03), ("d", 0.005)]),
            0.05,
        )
        .unwrap();
        assert_eq!(correction.alpha(), 0.05);
        assert_eq!(correction.critical_rank(), Some(4));

        let correction =
            benjamini_hochberg(pairs(&[("a", 0.01), ("b", 0.2), ("c", 0.3)]), 0.05).unwrap();
        assert_eq!(correction.critical_rank(), Some(1));

        let correction = benjamini_hochberg(pairs(&[("a", 0.5)]), 0.05).unwrap();
        assert_eq!(correction.critical_rank(), None);
    }
}

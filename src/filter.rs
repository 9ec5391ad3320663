//! Hard-threshold candidate filtering on depth, microhomology and normal contamination

use crate::{
    utils::chunk_work, AlleleCounts, Candidate, FilterConfig, SomaticResult, VariantRecord,
};
use rayon::prelude::*;

/// Pure predicate over input records.
///
/// A record is accepted when all of the following hold:
/// - HOMLEN < |SVLEN| + microhomology offset
/// - min tumor depth < tumor depth < max tumor depth
/// - min normal depth < normal depth < max normal depth
/// - normal alternate fraction <= max normal fraction
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    config: FilterConfig,
}

impl CandidateFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Resolve the tumor and normal counts of a record.
    ///
    /// Fails if either sample is absent or if the normal sample has zero depth,
    /// since the normal fraction would be undefined.
    fn sample_counts(&self, record: &VariantRecord) -> SomaticResult<(AlleleCounts, AlleleCounts)> {
        let tumor = record.genotype(&self.config.tumor_id)?;
        let normal = record.genotype(&self.config.normal_id)?;
        normal.allele_fraction(&record.variant, &self.config.normal_id)?;
        Ok((tumor, normal))
    }

    /// Decide whether a record passes every hard threshold.
    ///
    /// `Ok(false)` means the record was well formed but rejected. Malformed
    /// records come back as `Err` so they are never confused with a rejection.
    pub fn accept(&self, record: &VariantRecord) -> SomaticResult<bool> {
        let (tumor, normal) = self.sample_counts(record)?;
        let config = &self.config;

        let abs_svlen = record.svlen.unsigned_abs();
        let microhomology_ok =
            u64::from(record.homlen) < abs_svlen.saturating_add(config.microhomology_offset);

        let tumor_depth = tumor.depth();
        let tumor_depth_ok =
            tumor_depth > config.min_tumor_depth && tumor_depth < config.max_tumor_depth;

        let normal_depth = normal.depth();
        let normal_depth_ok =
            normal_depth > config.min_normal_depth && normal_depth < config.max_normal_depth;

        let normal_fraction = normal.allele_fraction(&record.variant, &config.normal_id)?;
        let normal_fraction_ok = normal_fraction <= config.max_normal_fraction;

        let accepted = microhomology_ok && tumor_depth_ok && normal_depth_ok && normal_fraction_ok;
        if !accepted {
            log::debug!(
                "Rejected {}: homlen={} svlen={} tumor_dp={} normal_dp={} normal_frac={:.4}",
                record.variant,
                record.homlen,
                record.svlen,
                tumor_depth,
                normal_depth,
                normal_fraction
            );
        }

        Ok(accepted)
    }

    /// Reduce an accepted record to a candidate; `None` if it was rejected.
    pub fn candidate(&self, record: &VariantRecord) -> SomaticResult<Option<Candidate>> {
        if !self.accept(record)? {
            return Ok(None);
        }
        let (tumor, normal) = self.sample_counts(record)?;
        Ok(Some(Candidate {
            variant: record.variant.clone(),
            tumor,
            normal,
        }))
    }
}

/// Run the filter over records in parallel chunks.
///
/// Decisions are returned in input order, one per record.
pub fn screen(
    filter: &CandidateFilter,
    records: &[VariantRecord],
    num_processes: usize,
) -> Vec<SomaticResult<Option<Candidate>>> {
    if records.is_empty() {
        return Vec::new();
    }

    let indices: Vec<usize> = (0..records.len()).collect();
    let chunks = chunk_work(indices, num_processes.max(1));

    let chunk_results: Vec<Vec<_>> = chunks
        .into_par_iter()
        .map(|chunk| {
            chunk
                .into_iter()
                .map(|i| filter.candidate(&records[i]))
                .collect()
        })
        .collect();

    chunk_results.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SomaticError, Variant};

    fn config() -> FilterConfig {
        FilterConfig {
            tumor_id: "T".to_string(),
            normal_id: "N".to_string(),
            ..FilterConfig::default()
        }
    }

    fn record(homlen: u32, svlen: i64, tumor: (u32, u32), normal: (u32, u32)) -> VariantRecord {
        VariantRecord::new(
            Variant::new("chr1".to_string(), 1000, "ACGTACGTACG".to_string(), "A".to_string()),
            homlen,
            svlen,
        )
        .with_genotype("T", AlleleCounts::new(tumor.0, tumor.1))
        .with_genotype("N", AlleleCounts::new(normal.0, normal.1))
    }

    #[test]
    fn test_accepts_clean_candidate() {
        let filter = CandidateFilter::new(config());
        assert!(filter.accept(&record(1, -10, (10, 40), (45, 5))).unwrap());
    }

    #[test]
    fn test_accept_is_pure() {
        let filter = CandidateFilter::new(config());
        let r = record(1, -10, (10, 40), (45, 5));
        assert_eq!(filter.accept(&r).unwrap(), filter.accept(&r).unwrap());
        let r = record(1, -10, (10, 40), (5, 5));
        assert_eq!(filter.accept(&r).unwrap(), filter.accept(&r).unwrap());
    }

    #[test]
    fn test_microhomology_threshold() {
        let filter = CandidateFilter::new(config());
        // |svlen| + 2 = 5
        assert!(filter.accept(&record(4, -3, (10, 40), (45, 5))).unwrap());
        assert!(!filter.accept(&record(5, -3, (10, 40), (45, 5))).unwrap());
        assert!(!filter.accept(&record(5, 3, (10, 40), (45, 5))).unwrap());

        let filter = CandidateFilter::new(FilterConfig {
            microhomology_offset: 0,
            ..config()
        });
        assert!(!filter.accept(&record(3, -3, (10, 40), (45, 5))).unwrap());
    }

    #[test]
    fn test_depth_bounds_are_strict() {
        let filter = CandidateFilter::new(config());
        // tumor depth exactly at the minimum and maximum
        assert!(!filter.accept(&record(0, 5, (5, 20), (45, 5))).unwrap());
        assert!(filter.accept(&record(0, 5, (6, 20), (45, 5))).unwrap());
        assert!(!filter.accept(&record(0, 5, (500, 500), (45, 5))).unwrap());
        assert!(filter.accept(&record(0, 5, (499, 500), (45, 5))).unwrap());

        // normal depth exactly at the minimum and maximum
        assert!(!filter.accept(&record(0, 5, (10, 40), (25, 0))).unwrap());
        assert!(filter.accept(&record(0, 5, (10, 40), (26, 0))).unwrap());
        assert!(!filter.accept(&record(0, 5, (10, 40), (1000, 0))).unwrap());
    }

    #[test]
    fn test_low_normal_depth_rejected_regardless_of_fractions() {
        let filter = CandidateFilter::new(config());
        assert!(!filter.accept(&record(0, -10, (0, 500), (10, 0))).unwrap());
    }

    #[test]
    fn test_normal_fraction_threshold_inclusive() {
        let filter = CandidateFilter::new(config());
        // 15 / 100 sits exactly on the cutoff
        assert!(filter.accept(&record(0, 5, (10, 40), (85, 15))).unwrap());
        assert!(!filter.accept(&record(0, 5, (10, 40), (84, 16))).unwrap());
    }

    #[test]
    fn test_missing_genotype_is_error() {
        let filter = CandidateFilter::new(config());
        let r = VariantRecord::new(
            Variant::new("chr1".to_string(), 5, "AT".to_string(), "A".to_string()),
            0,
            -1,
        )
        .with_genotype("T", AlleleCounts::new(10, 40));

        let err = filter.accept(&r).unwrap_err();
        assert!(matches!(err, SomaticError::MissingGenotype { ref sample, .. } if sample == "N"));
    }

    #[test]
    fn test_zero_normal_depth_is_error() {
        let filter = CandidateFilter::new(config());
        let err = filter.accept(&record(0, 5, (10, 40), (0, 0))).unwrap_err();
        assert!(matches!(err, SomaticError::DivisionByZero { .. }));
    }

    #[test]
    fn test_candidate_extraction() {
        let filter = CandidateFilter::new(config());
        let candidate = filter.candidate(&record(1, -10, (10, 40), (45, 5))).unwrap().unwrap();
        assert_eq!(candidate.tumor, AlleleCounts::new(10, 40));
        assert_eq!(candidate.normal, AlleleCounts::new(45, 5));

        assert!(filter.candidate(&record(1, -10, (10, 40), (5, 5))).unwrap().is_none());
    }

    #[test]
    fn test_screen_preserves_order() {
        let filter = CandidateFilter::new(config());
        let records: Vec<VariantRecord> = (0..20u32)
            .map(|i| {
                let mut r = record(0, 5, (10, 40), (45 + i, if i % 3 == 0 { 30 } else { 2 }));
                r.variant.pos = 100 + i;
                r
            })
            .collect();

        let sequential: Vec<bool> = records.iter().map(|r| filter.accept(r).unwrap()).collect();
        let screened = screen(&filter, &records, 4);
        assert_eq!(screened.len(), records.len());

        for (i, (decision, expected)) in screened.into_iter().zip(sequential).enumerate() {
            let candidate = decision.unwrap();
            assert_eq!(candidate.is_some(), expected);
            if let Some(c) = candidate {
                assert_eq!(c.variant.pos, 100 + i as u32);
            }
        }
    }

    #[test]
    fn test_screen_empty() {
        let filter = CandidateFilter::new(config());
        assert!(screen(&filter, &[], 4).is_empty());
    }
}

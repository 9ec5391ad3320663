//! Two-pass significance pipeline: collect candidates, then test and correct them

use crate::{
    fdr::benjamini_hochberg,
    filter::{screen, CandidateFilter},
    fisher::{ContingencyTable, FisherExact},
    Candidate, FilterConfig, SignificantVariant, SomaticError, SomaticResult, Variant,
    VariantRecord,
};
use std::collections::HashMap;

/// Lifecycle of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Collecting,
    Finalizing,
    Done,
    /// A duplicate variant was seen; the collected set cannot be trusted
    Failed,
}

/// What to do with a record that is malformed (missing genotype, zero normal depth)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordErrorPolicy {
    /// Propagate the error to the caller
    #[default]
    Abort,
    /// Log a warning and drop the record
    Skip,
}

/// Counts from a collection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectSummary {
    pub seen: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub skipped: usize,
}

/// Accumulates candidates from a record stream and emits the significant ones once.
///
/// Candidates are held in insertion order; that order, together with the
/// stable ranking of the correction, fixes the emission order.
#[derive(Debug)]
pub struct SignificancePipeline {
    filter: CandidateFilter,
    fisher: FisherExact,
    candidates: Vec<Candidate>,
    positions: HashMap<Variant, usize>,
    state: PipelineState,
}

impl SignificancePipeline {
    /// Fails if `max_contingency_total` is beyond what the exact test will tabulate.
    pub fn new(config: FilterConfig) -> SomaticResult<Self> {
        let fisher = FisherExact::new(config.max_contingency_total)?;
        Ok(Self {
            filter: CandidateFilter::new(config),
            fisher,
            candidates: Vec::new(),
            positions: HashMap::new(),
            state: PipelineState::Collecting,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &FilterConfig {
        self.filter.config()
    }

    /// Candidates collected so far, in input order
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    fn ensure_collecting(&self, operation: &str) -> SomaticResult<()> {
        if self.state != PipelineState::Collecting {
            return Err(SomaticError::InvalidState(format!(
                "{} called while {:?}",
                operation, self.state
            )));
        }
        Ok(())
    }

    fn insert_candidate(&mut self, candidate: Candidate) -> SomaticResult<()> {
        if self.positions.contains_key(&candidate.variant) {
            self.state = PipelineState::Failed;
            return Err(SomaticError::DuplicateVariant(candidate.variant.to_string()));
        }
        self.positions
            .insert(candidate.variant.clone(), self.candidates.len());
        self.candidates.push(candidate);
        Ok(())
    }

    /// Filter one record and keep it if it passes. Returns whether it was kept.
    pub fn accept(&mut self, record: &VariantRecord) -> SomaticResult<bool> {
        self.ensure_collecting("accept")?;
        match self.filter.candidate(record)? {
            Some(candidate) => {
                self.insert_candidate(candidate)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Filter a batch of records, screening them in parallel and collecting in input order.
    ///
    /// Record-level errors follow `policy`. Duplicate variants always abort.
    pub fn collect_all(
        &mut self,
        records: &[VariantRecord],
        num_processes: usize,
        policy: RecordErrorPolicy,
    ) -> SomaticResult<CollectSummary> {
        self.ensure_collecting("collect_all")?;

        let mut summary = CollectSummary::default();
        for decision in screen(&self.filter, records, num_processes) {
            summary.seen += 1;
            match decision {
                Ok(Some(candidate)) => {
                    self.insert_candidate(candidate)?;
                    summary.accepted += 1;
                }
                Ok(None) => summary.rejected += 1,
                Err(e) if e.is_record_error() && policy == RecordErrorPolicy::Skip => {
                    log::warn!("Skipping malformed record: {}", e);
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        log::info!(
            "Collected {} candidates from {} records ({} rejected, {} skipped)",
            summary.accepted,
            summary.seen,
            summary.rejected,
            summary.skipped
        );
        Ok(summary)
    }

    /// Score, correct and emit the significant candidates.
    ///
    /// Can only run once, and only from `Collecting`. If it fails part way the
    /// pipeline stays in `Finalizing` and must be discarded.
    pub fn finalize(&mut self) -> SomaticResult<Vec<SignificantVariant>> {
        self.ensure_collecting("finalize")?;
        self.state = PipelineState::Finalizing;
        log::info!("Finalizing {} candidates", self.candidates.len());

        let mut raw_pvalues = Vec::with_capacity(self.candidates.len());
        for candidate in &self.candidates {
            let table = ContingencyTable::from_counts(candidate.tumor, candidate.normal);
            let p = self.fisher.left_tailed_p(&table)?;
            raw_pvalues.push((candidate.variant.clone(), p));
        }

        let cutoff = self.config().adjusted_p_cutoff;
        let correction = benjamini_hochberg(raw_pvalues, cutoff)?;
        if let Some(rank) = correction.critical_rank() {
            log::info!("Benjamini-Hochberg critical rank at alpha {}: {}", cutoff, rank);
        }

        let tumor_id = &self.filter.config().tumor_id;
        let normal_id = &self.filter.config().normal_id;
        let mut significant = Vec::new();
        for entry in correction.iter() {
            if entry.adjusted_p >= cutoff {
                continue;
            }
            let index = self.positions.get(&entry.key).copied().ok_or_else(|| {
                SomaticError::InvalidState(format!("corrected key {} has no candidate", entry.key))
            })?;
            let candidate = &self.candidates[index];

            significant.push(SignificantVariant {
                variant: candidate.variant.clone(),
                raw_p: entry.raw_p,
                adjusted_p: entry.adjusted_p,
                tumor_fraction: candidate.tumor.allele_fraction(&candidate.variant, tumor_id)?,
                normal_fraction: candidate.normal.allele_fraction(&candidate.variant, normal_id)?,
            });
        }

        log::info!(
            "{} of {} candidates significant at adjusted p < {}",
            significant.len(),
            self.candidates.len(),
            cutoff
        );

        self.state = PipelineState::Done;
        Ok(significant)
    }
}

//! # somatic-filter - Somatic indel significance filter
//!
//! Filters candidate structural/indel variants from a matched tumor/normal
//! experiment. Records are gated by hard thresholds on depth, microhomology and
//! normal contamination, scored with a one-tailed Fisher's exact test, and
//! corrected for multiple testing with Benjamini-Hochberg before the
//! significant ones are emitted.

pub mod fdr;
pub mod filter;
pub mod fisher;
pub mod pipeline;
pub mod table;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a genomic variant identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    pub chrom: String,
    pub pos: u32,
    pub ref_allele: String,
    pub alt_allele: String,
}

impl Variant {
    pub fn new(chrom: String, pos: u32, ref_allele: String, alt_allele: String) -> Self {
        Self {
            chrom,
            pos,
            ref_allele,
            alt_allele,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.chrom, self.pos, self.ref_allele, self.alt_allele
        )
    }
}

/// Reference and alternate supporting read counts for one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlleleCounts {
    pub ref_count: u32,
    pub alt_count: u32,
}

impl AlleleCounts {
    pub fn new(ref_count: u32, alt_count: u32) -> Self {
        Self {
            ref_count,
            alt_count,
        }
    }

    pub fn depth(&self) -> u64 {
        u64::from(self.ref_count) + u64::from(self.alt_count)
    }

    /// Alternate allele fraction, alt / (ref + alt).
    ///
    /// A sample with no reads has no defined fraction; this is reported as
    /// [`SomaticError::DivisionByZero`] rather than folded into a filter decision.
    pub fn allele_fraction(&self, variant: &Variant, sample: &str) -> SomaticResult<f64> {
        let depth = self.depth();
        if depth == 0 {
            return Err(SomaticError::DivisionByZero {
                variant: variant.to_string(),
                sample: sample.to_string(),
            });
        }
        Ok(f64::from(self.alt_count) / depth as f64)
    }
}

/// One input record: a variant, its indel attributes and per-sample allele depths
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    pub variant: Variant,
    /// Length of breakpoint microhomology (HOMLEN)
    pub homlen: u32,
    /// Signed indel length (SVLEN); only the magnitude is used
    pub svlen: i64,
    pub genotypes: Vec<(String, AlleleCounts)>,
}

impl VariantRecord {
    pub fn new(variant: Variant, homlen: u32, svlen: i64) -> Self {
        Self {
            variant,
            homlen,
            svlen,
            genotypes: Vec::new(),
        }
    }

    pub fn with_genotype(mut self, sample: &str, counts: AlleleCounts) -> Self {
        self.genotypes.push((sample.to_string(), counts));
        self
    }

    /// Look up the allele counts of a named sample
    pub fn genotype(&self, sample: &str) -> SomaticResult<AlleleCounts> {
        self.genotypes
            .iter()
            .find(|(name, _)| name == sample)
            .map(|(_, counts)| *counts)
            .ok_or_else(|| SomaticError::MissingGenotype {
                variant: self.variant.to_string(),
                sample: sample.to_string(),
            })
    }
}

/// A record that passed the hard thresholds, reduced to its tumor/normal counts
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub variant: Variant,
    pub tumor: AlleleCounts,
    pub normal: AlleleCounts,
}

/// A candidate that survived multiple testing correction
#[derive(Debug, Clone, PartialEq)]
pub struct SignificantVariant {
    pub variant: Variant,
    pub raw_p: f64,
    /// Benjamini-Hochberg adjusted p-value (PVP)
    pub adjusted_p: f64,
    /// Tumor alternate allele fraction (FA)
    pub tumor_fraction: f64,
    /// Normal alternate allele fraction (FA)
    pub normal_fraction: f64,
}

/// Thresholds and sample identities used by the filter and the pipeline
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub tumor_id: String,
    pub normal_id: String,
    pub min_tumor_depth: u64,
    pub max_tumor_depth: u64,
    pub min_normal_depth: u64,
    pub max_normal_depth: u64,
    pub max_normal_fraction: f64,
    pub adjusted_p_cutoff: f64,
    pub microhomology_offset: u64,
    /// Largest tumor+normal depth the exact test tabulates
    pub max_contingency_total: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            tumor_id: "TUMOR".to_string(),
            normal_id: "NORMAL".to_string(),
            min_tumor_depth: 25,
            max_tumor_depth: 1000,
            min_normal_depth: 25,
            max_normal_depth: 1000,
            max_normal_fraction: 0.15,
            adjusted_p_cutoff: 0.05,
            microhomology_offset: 2,
            max_contingency_total: 100_000,
        }
    }
}

/// Validate filter configuration parameters
pub fn validate_filter_config(config: &FilterConfig) -> SomaticResult<()> {
    if config.tumor_id.is_empty() || config.normal_id.is_empty() {
        return Err(SomaticError::InvalidConfig(
            "tumor and normal sample ids must not be empty".to_string(),
        ));
    }

    if config.tumor_id == config.normal_id {
        return Err(SomaticError::InvalidConfig(format!(
            "tumor and normal sample ids must differ (both are {})",
            config.tumor_id
        )));
    }

    if config.min_tumor_depth >= config.max_tumor_depth {
        return Err(SomaticError::InvalidConfig(
            "min tumor depth must be below max tumor depth".to_string(),
        ));
    }

    if config.min_normal_depth >= config.max_normal_depth {
        return Err(SomaticError::InvalidConfig(
            "min normal depth must be below max normal depth".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&config.max_normal_fraction) {
        return Err(SomaticError::InvalidConfig(
            "max normal fraction must be between 0 and 1".to_string(),
        ));
    }

    if !(config.adjusted_p_cutoff > 0.0 && config.adjusted_p_cutoff <= 1.0) {
        return Err(SomaticError::InvalidConfig(
            "adjusted p-value cutoff must be in (0, 1]".to_string(),
        ));
    }

    if config.max_contingency_total == 0 {
        return Err(SomaticError::InvalidConfig(
            "max contingency total must be positive".to_string(),
        ));
    }

    if config.max_contingency_total > fisher::MAX_CONTINGENCY_TOTAL {
        return Err(SomaticError::InvalidConfig(format!(
            "max contingency total must be at most {}",
            fisher::MAX_CONTINGENCY_TOTAL
        )));
    }

    Ok(())
}

/// Error types for the somatic filter library
#[derive(Debug, thiserror::Error)]
pub enum SomaticError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("No genotype for sample {sample} at {variant}")]
    MissingGenotype { variant: String, sample: String },

    #[error("Zero depth for sample {sample} at {variant}; allele fraction undefined")]
    DivisionByZero { variant: String, sample: String },

    #[error("Contingency table total {total} exceeds the exact test range of {max}")]
    Range { total: u64, max: usize },

    #[error("Duplicate key submitted for correction: {0}")]
    DuplicateKey(String),

    #[error("Duplicate variant in input: {0}")]
    DuplicateVariant(String),

    #[error("Invalid pipeline state: {0}")]
    InvalidState(String),

    #[error("Invalid p-value {value} for {key}")]
    InvalidPValue { key: String, value: f64 },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SomaticError {
    /// Errors confined to a single malformed record, as opposed to run-level failures
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            SomaticError::MissingGenotype { .. } | SomaticError::DivisionByZero { .. }
        )
    }
}

pub type SomaticResult<T> = Result<T, SomaticError>;

//! One-tailed Fisher's exact test over tumor/normal allele counts

use crate::{AlleleCounts, SomaticError, SomaticResult};

/// 2x2 table of allele counts
///
/// ```text
///           REF   ALT
///   TUMOR    a     b
///   NORMAL   c     d
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContingencyTable {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
}

impl ContingencyTable {
    pub fn new(a: u32, b: u32, c: u32, d: u32) -> Self {
        Self { a, b, c, d }
    }

    pub fn from_counts(tumor: AlleleCounts, normal: AlleleCounts) -> Self {
        Self::new(
            tumor.ref_count,
            tumor.alt_count,
            normal.ref_count,
            normal.alt_count,
        )
    }

    pub fn total(&self) -> u64 {
        u64::from(self.a) + u64::from(self.b) + u64::from(self.c) + u64::from(self.d)
    }
}

/// Upper bound on the tabulated table total (80 MB of log factorials).
///
/// Tumor plus normal depth is far below this for any sequencing run.
pub const MAX_CONTINGENCY_TOTAL: usize = 10_000_000;

/// Fisher's exact test backed by a precomputed table of ln(k!)
#[derive(Debug, Clone)]
pub struct FisherExact {
    log_factorials: Vec<f64>,
}

impl FisherExact {
    /// Tabulate ln(k!) for k in 0..=max_total.
    ///
    /// `max_total` above [`MAX_CONTINGENCY_TOTAL`] is refused rather than allocated.
    pub fn new(max_total: usize) -> SomaticResult<Self> {
        if max_total > MAX_CONTINGENCY_TOTAL {
            return Err(SomaticError::InvalidConfig(format!(
                "max contingency total {} exceeds the supported limit of {}",
                max_total, MAX_CONTINGENCY_TOTAL
            )));
        }

        let mut log_factorials = Vec::with_capacity(max_total + 1);
        log_factorials.push(0.0);
        for k in 1..=max_total {
            let prev = log_factorials[k - 1];
            log_factorials.push(prev + (k as f64).ln());
        }
        log::debug!("Tabulated log factorials up to {}", max_total);
        Ok(Self { log_factorials })
    }

    /// Largest table total this instance can score
    pub fn max_total(&self) -> usize {
        self.log_factorials.len() - 1
    }

    fn check_range(&self, table: &ContingencyTable) -> SomaticResult<usize> {
        let total = table.total();
        if total > self.max_total() as u64 {
            return Err(SomaticError::Range {
                total,
                max: self.max_total(),
            });
        }
        Ok(total as usize)
    }

    /// ln P of one table under the hypergeometric null with its own marginals.
    fn log_probability_unchecked(&self, a: usize, b: usize, c: usize, d: usize) -> f64 {
        let lf = &self.log_factorials;
        let n = a + b + c + d;
        (lf[a + b] + lf[c + d] + lf[a + c] + lf[b + d])
            - (lf[a] + lf[b] + lf[c] + lf[d] + lf[n])
    }

    /// Point probability of exactly this table given its marginals
    #[cfg(test)]
    fn probability(&self, table: &ContingencyTable) -> SomaticResult<f64> {
        self.check_range(table)?;
        let p = self
            .log_probability_unchecked(
                table.a as usize,
                table.b as usize,
                table.c as usize,
                table.d as usize,
            )
            .exp();
        Ok(p.min(1.0))
    }

    /// One-tailed p-value that the tumor alternate fraction exceeds the normal one.
    ///
    /// Sums the probabilities of every table with the observed marginals whose
    /// tumor REF cell is at most `a`, i.e. tumor ALT at least as enriched as
    /// observed. The result is clamped to `[f64::MIN_POSITIVE, 1.0]` so that an
    /// underflowing tail never comes back as zero or NaN.
    pub fn left_tailed_p(&self, table: &ContingencyTable) -> SomaticResult<f64> {
        self.check_range(table)?;

        let a = table.a as usize;
        let b = table.b as usize;
        let c = table.c as usize;
        let d = table.d as usize;

        let tumor_total = a + b;
        let ref_total = a + c;
        let n = a + b + c + d;
        let lowest_a = a.saturating_sub(d);

        // log-sum-exp over the tail keeps deep tails from flushing to zero early
        let log_terms: Vec<f64> = (lowest_a..=a)
            .map(|x| {
                let x_b = tumor_total - x;
                let x_c = ref_total - x;
                let x_d = n - tumor_total - x_c;
                self.log_probability_unchecked(x, x_b, x_c, x_d)
            })
            .collect();

        let max_log = log_terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let scaled: f64 = log_terms.iter().map(|l| (l - max_log).exp()).sum();
        let p = max_log.exp() * scaled;

        if !p.is_finite() || p <= 0.0 {
            log::debug!(
                "Exact test underflow for table ({}, {}, {}, {}); clamping",
                a,
                b,
                c,
                d
            );
            return Ok(f64::MIN_POSITIVE);
        }

        Ok(p.min(1.0))
    }

    /// Alias for [`FisherExact::left_tailed_p`] on raw cell counts.
    pub fn score(&self, a: u32, b: u32, c: u32, d: u32) -> SomaticResult<f64> {
        self.left_tailed_p(&ContingencyTable::new(a, b, c, d))
    }
}

//! CLI binary: filter tumor/normal indel candidates and report the significant ones

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use std::path::PathBuf;
use somatic_filter_rs::{
    pipeline::{RecordErrorPolicy, SignificancePipeline},
    table::{read_variant_records, write_significant_variants},
    utils::{ensure_parent_dirs, get_num_cpus, validate_file_readable, Timer},
    validate_filter_config, FilterConfig, SomaticError,
};

#[derive(Parser)]
#[command(name = "somatic_filter")]
#[command(about = "Somatic indel filter: hard thresholds, Fisher's exact test and BH correction")]
#[command(long_about = "
Filters candidate indels from a matched tumor/normal experiment.

1. Quality filters
   Tumor read depth > MIN_DP_T and < MAX_DP_T
   Normal read depth > MIN_DP_N and < MAX_DP_N
   Microhomology shorter than the indel plus an offset (HOMLEN < |SVLEN| + offset)
   Normal alternate allele fraction <= MAX_N_FRAC

2. Test for a tumor allele fraction above the normal one
   A one-tailed Fisher's exact test is run on each remaining variant and the
   p-values are adjusted with Benjamini-Hochberg.

The input is a tab-separated table with columns CHROM POS REF ALT HOMLEN SVLEN
followed by one column per sample holding `ref,alt` allele depths (`.` if absent).
Variants with an adjusted p-value (PVP) below the cutoff are written with their
tumor and normal allele fractions (FA), ordered by raw p-value.
")]
struct Args {
    /// Path to the input candidate table (optionally gzipped)
    #[arg(long, short = 'V', value_name = "FILE")]
    input: PathBuf,

    /// Path to the output table (gzipped if it ends in .gz)
    #[arg(long, short = 'o', value_name = "FILE")]
    output: PathBuf,

    /// Sample name of the tumor
    #[arg(long, visible_alias = "TID")]
    tumor_id: String,

    /// Sample name of the normal
    #[arg(long, visible_alias = "NID")]
    normal_id: String,

    /// Minimum depth required in the normal (exclusive)
    #[arg(long, visible_alias = "MIN_DP_N", default_value_t = 25)]
    min_coverage_normal: u64,

    /// Minimum depth required in the tumor (exclusive)
    #[arg(long, visible_alias = "MIN_DP_T", default_value_t = 25)]
    min_coverage_tumor: u64,

    /// Maximum depth allowed in the normal (exclusive)
    #[arg(long, visible_alias = "MAX_DP_N", default_value_t = 1000)]
    max_coverage_normal: u64,

    /// Maximum depth allowed in the tumor (exclusive)
    #[arg(long, visible_alias = "MAX_DP_T", default_value_t = 1000)]
    max_coverage_tumor: u64,

    /// Maximum alternate allele fraction allowed in the normal
    #[arg(long, visible_alias = "MAX_N_FRAC", default_value_t = 0.15)]
    max_normal_fraction: f64,

    /// Cutoff for the adjusted p-values
    #[arg(long, visible_alias = "ADJ_P_CUTOFF", default_value_t = 0.05)]
    adjusted_p_cutoff: f64,

    /// Allowed microhomology beyond the indel length
    #[arg(long, default_value_t = 2)]
    microhomology_offset: u64,

    /// Largest tumor+normal depth the exact test can score
    #[arg(long, default_value_t = 100_000)]
    max_contingency_total: usize,

    /// Drop records with a missing genotype or zero normal depth instead of failing
    #[arg(long)]
    skip_invalid: bool,

    /// Number of processes to use for parallel filtering
    #[arg(long, default_value_t = get_num_cpus())]
    num_processes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Force overwrite of output file if it exists
    #[arg(short, long)]
    force: bool,
}

impl Args {
    fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            tumor_id: self.tumor_id.clone(),
            normal_id: self.normal_id.clone(),
            min_tumor_depth: self.min_coverage_tumor,
            max_tumor_depth: self.max_coverage_tumor,
            min_normal_depth: self.min_coverage_normal,
            max_normal_depth: self.max_coverage_normal,
            max_normal_fraction: self.max_normal_fraction,
            adjusted_p_cutoff: self.adjusted_p_cutoff,
            microhomology_offset: self.microhomology_offset,
            max_contingency_total: self.max_contingency_total,
        }
    }
}

fn run(args: Args) -> Result<()> {
    log::info!("Starting somatic filter");
    log::info!("Input: {:?}", args.input);
    log::info!("Output: {:?}", args.output);
    log::info!("Tumor: {}, normal: {}", args.tumor_id, args.normal_id);

    validate_file_readable(&args.input)?;

    if args.output.exists() && !args.force {
        return Err(SomaticError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("Output file {:?} already exists. Use --force to overwrite.", args.output),
        ))
        .into());
    }
    ensure_parent_dirs(&args.output)?;

    let config = args.filter_config();
    validate_filter_config(&config)?;
    log::info!(
        "Configuration: DP_T=({}, {}), DP_N=({}, {}), MAX_N_FRAC={}, ADJ_P_CUTOFF={}",
        config.min_tumor_depth,
        config.max_tumor_depth,
        config.min_normal_depth,
        config.max_normal_depth,
        config.max_normal_fraction,
        config.adjusted_p_cutoff
    );

    let records = {
        let _timer = Timer::new("Reading candidate table");
        read_variant_records(&args.input)
            .with_context(|| format!("failed to read {}", args.input.display()))?
    };
    log::info!("Read {} records", records.len());

    let policy = if args.skip_invalid {
        RecordErrorPolicy::Skip
    } else {
        RecordErrorPolicy::Abort
    };

    let mut pipeline = SignificancePipeline::new(config)?;
    {
        let _timer = Timer::new("Filtering candidates");
        pipeline.collect_all(&records, args.num_processes, policy)?;
    }

    let significant = {
        let _timer = Timer::new("Testing and correcting candidates");
        pipeline.finalize()?
    };

    write_significant_variants(&significant, &args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    log::info!(
        "Wrote {} significant variants to {:?}",
        significant.len(),
        args.output
    );
    Ok(())
}

/// Print a user-facing message for a failed run
fn report_error(error: &anyhow::Error) {
    eprintln!("Error: {:#}", error);
    match error.downcast_ref::<SomaticError>() {
        Some(SomaticError::MissingGenotype { .. }) | Some(SomaticError::DivisionByZero { .. }) => {
            eprintln!("Check the tumor/normal sample ids, or rerun with --skip-invalid to drop such records.");
        }
        Some(SomaticError::Range { .. }) => {
            eprintln!("Raise --max-contingency-total above the largest tumor+normal depth.");
        }
        Some(SomaticError::DuplicateVariant(_)) | Some(SomaticError::DuplicateKey(_)) => {
            eprintln!("Each variant may appear only once in the input.");
        }
        Some(SomaticError::InvalidRecord(_)) => {
            eprintln!("Please check that the input table is properly formatted.");
        }
        Some(SomaticError::InvalidConfig(_)) => {
            eprintln!("Please check the depth, fraction and cutoff parameters.");
        }
        Some(SomaticError::FileNotFound(_)) => {
            eprintln!("Please check that the file exists and is readable.");
        }
        _ => {}
    }
}

fn main() {
    let args = Args::parse();

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    if let Err(e) = run(args) {
        report_error(&e);
        std::process::exit(1);
    }
}

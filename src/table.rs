//! Tab-separated record input and significant-variant output

use crate::{
    utils::is_gzipped, AlleleCounts, SignificantVariant, SomaticError, SomaticResult, Variant,
    VariantRecord,
};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Fixed leading columns of an input table; every further column is a sample
const FIXED_COLUMNS: [&str; 6] = ["CHROM", "POS", "REF", "ALT", "HOMLEN", "SVLEN"];

/// Column indices resolved from the input header
#[derive(Debug, Clone)]
pub struct ColumnIndices {
    pub chrom: usize,
    pub pos: usize,
    pub ref_allele: usize,
    pub alt: usize,
    pub homlen: usize,
    pub svlen: usize,
    pub samples: Vec<(usize, String)>,
}

impl ColumnIndices {
    pub fn from_header(header: &csv::StringRecord) -> SomaticResult<Self> {
        let find = |name: &str| {
            header
                .iter()
                .position(|col| col.trim_start_matches('#') == name)
                .ok_or_else(|| {
                    SomaticError::InvalidRecord(format!("{} column not found in header", name))
                })
        };

        let chrom = find("CHROM")?;
        let pos = find("POS")?;
        let ref_allele = find("REF")?;
        let alt = find("ALT")?;
        let homlen = find("HOMLEN")?;
        let svlen = find("SVLEN")?;

        let samples = header
            .iter()
            .enumerate()
            .filter(|(_, col)| !FIXED_COLUMNS.contains(&col.trim_start_matches('#')))
            .map(|(i, col)| (i, col.to_string()))
            .collect();

        Ok(ColumnIndices {
            chrom,
            pos,
            ref_allele,
            alt,
            homlen,
            svlen,
            samples,
        })
    }
}

fn parse_field<T: std::str::FromStr>(
    record: &csv::StringRecord,
    index: usize,
    name: &str,
) -> SomaticResult<T> {
    let value = record
        .get(index)
        .ok_or_else(|| SomaticError::InvalidRecord(format!("missing {} column", name)))?;
    value
        .trim()
        .parse::<T>()
        .map_err(|_| SomaticError::InvalidRecord(format!("Invalid {}: {}", name, value)))
}

/// Parse an allele-depth cell `ref,alt`. `.` or an empty cell means no genotype.
pub fn parse_allele_depths(cell: &str) -> SomaticResult<Option<AlleleCounts>> {
    let cell = cell.trim();
    if cell.is_empty() || cell == "." {
        return Ok(None);
    }

    let mut parts = cell.split(',');
    let (ref_count, alt_count) = match (parts.next(), parts.next(), parts.next()) {
        (Some(r), Some(a), None) => (r, a),
        _ => {
            return Err(SomaticError::InvalidRecord(format!(
                "Invalid allele depths: {}",
                cell
            )))
        }
    };

    let parse = |value: &str| {
        value
            .trim()
            .parse::<u32>()
            .map_err(|_| SomaticError::InvalidRecord(format!("Invalid allele depths: {}", cell)))
    };

    Ok(Some(AlleleCounts::new(parse(ref_count)?, parse(alt_count)?)))
}

impl VariantRecord {
    pub fn from_row(row: &csv::StringRecord, indices: &ColumnIndices) -> SomaticResult<Self> {
        let chrom = parse_field::<String>(row, indices.chrom, "CHROM")?;
        let pos = parse_field::<u32>(row, indices.pos, "POS")?;
        let ref_allele = parse_field::<String>(row, indices.ref_allele, "REF")?;
        let alt_allele = parse_field::<String>(row, indices.alt, "ALT")?;
        let homlen = parse_field::<u32>(row, indices.homlen, "HOMLEN")?;
        let svlen = parse_field::<i64>(row, indices.svlen, "SVLEN")?;

        let mut record =
            VariantRecord::new(Variant::new(chrom, pos, ref_allele, alt_allele), homlen, svlen);

        for (index, sample) in &indices.samples {
            let cell = row.get(*index).unwrap_or(".");
            if let Some(counts) = parse_allele_depths(cell)? {
                record.genotypes.push((sample.clone(), counts));
            }
        }

        Ok(record)
    }
}

fn open_input<P: AsRef<Path>>(path: P) -> SomaticResult<Box<dyn BufRead>> {
    let file = File::open(&path)
        .map_err(|_| SomaticError::FileNotFound(path.as_ref().to_string_lossy().to_string()))?;

    let reader: Box<dyn BufRead> = if is_gzipped(&path)? {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(reader)
}

/// Read every record of an input table, in file order.
///
/// Lines starting with `##` are ignored. Any unparsable row is an error.
pub fn read_variant_records<P: AsRef<Path>>(path: P) -> SomaticResult<Vec<VariantRecord>> {
    let mut reader = open_input(&path)?;

    // strip ## comment lines before handing the table to csv
    let mut body = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if line.starts_with("##") || line.trim().is_empty() {
            continue;
        }
        body.extend_from_slice(line.as_bytes());
    }

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(body.as_slice());

    let indices = ColumnIndices::from_header(csv_reader.headers()?)?;
    log::debug!(
        "Input samples: {:?}",
        indices.samples.iter().map(|(_, s)| s).collect::<Vec<_>>()
    );

    let mut records = Vec::new();
    for row in csv_reader.records() {
        let row = row?;
        records.push(VariantRecord::from_row(&row, &indices)?);
    }

    Ok(records)
}

/// Output row layout
#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    #[serde(rename = "CHROM")]
    chrom: &'a str,
    #[serde(rename = "POS")]
    pos: u32,
    #[serde(rename = "REF")]
    ref_allele: &'a str,
    #[serde(rename = "ALT")]
    alt_allele: &'a str,
    #[serde(rename = "RAW_P")]
    raw_p: f64,
    #[serde(rename = "PVP")]
    adjusted_p: f64,
    #[serde(rename = "TUMOR_FA")]
    tumor_fraction: f64,
    #[serde(rename = "NORMAL_FA")]
    normal_fraction: f64,
}

impl<'a> From<&'a SignificantVariant> for OutputRow<'a> {
    fn from(hit: &'a SignificantVariant) -> Self {
        Self {
            chrom: &hit.variant.chrom,
            pos: hit.variant.pos,
            ref_allele: &hit.variant.ref_allele,
            alt_allele: &hit.variant.alt_allele,
            raw_p: hit.raw_p,
            adjusted_p: hit.adjusted_p,
            tumor_fraction: hit.tumor_fraction,
            normal_fraction: hit.normal_fraction,
        }
    }
}

/// Write significant variants to a TSV file, gzip-compressed if the path ends in `.gz`
pub fn write_significant_variants(
    results: &[SignificantVariant],
    output_path: &Path,
) -> SomaticResult<()> {
    let file = File::create(output_path)?;
    let writer: Box<dyn Write> = if output_path.extension().and_then(|s| s.to_str()) == Some("gz")
    {
        Box::new(GzEncoder::new(file, Compression::default()))
    } else {
        Box::new(file)
    };

    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer);

    csv_writer.write_record([
        "CHROM",
        "POS",
        "REF",
        "ALT",
        "RAW_P",
        "PVP",
        "TUMOR_FA",
        "NORMAL_FA",
    ])?;
    for hit in results {
        csv_writer.serialize(OutputRow::from(hit))?;
    }
    csv_writer.flush()?;

    Ok(())
}

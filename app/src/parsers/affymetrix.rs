// ==============================================================================
// affymetrix.rs - Affymetrix Report Reader
// ==============================================================================
// Description: Reads an Affymetrix (Axiom) genotype report, one line per
//              probeset across all samples
// Author: Matt Barham
// Created: 2026-09-22
// Modified: 2026-10-14
// Version: 1.2.0
// ==============================================================================
// Format (tab delimited):
//   #%create_date=...
//   ##samples-per-snp=2
//   ##snp-count=2
//   probeset_id  ID1.CEL_call_code  ID2.CEL_call_code  chromosome ...
//   AX-124359447 AA                 AB                 1          ...
//
// Calls: AA/AB/BB (or 0/1/2) use allele_a/allele_b; NoCall, -1, --- and
// empty cells are missing. Records without allele_a/allele_b keep the call
// letters and report them through `GenotypeSource::is_ab_call`.
// ==============================================================================

use csv::ReaderBuilder;
use std::collections::HashSet;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{
    family_id, open_text, sanitize, FakePed, GenotypeSource, RowStream, SampleId, SourceError,
};
use crate::models::{MarkerRecord, SampleRow};

const PROBESET_COLUMN: &str = "probeset_id";

/// Optional columns; records lacking any of them are partial
const OPTIONAL_COLUMNS: [&str; 4] = ["chromosome", "chromosomal_position", "allele_a", "allele_b"];

/// Annotation columns that never hold calls
const ANNOTATION_COLUMNS: [&str; 14] = [
    "probeset_id",
    "affy_snp_id",
    "dbsnp_rs_id",
    "dbsnp_loctype",
    "chromosome",
    "chromosomal_position",
    "physical_position",
    "allele_a",
    "allele_b",
    "strand",
    "strand_versus_dbsnp",
    "cytoband",
    "flank",
    "cr",
];

const NO_CALLS: [&str; 4] = ["NoCall", "-1", "---", ""];

/// Completeness of a parsed record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordStatus {
    Complete,
    /// Chromosome, position or alleles were missing and defaulted
    /// (chrom `0`, position `0`, raw A/B call letters)
    Partial { missing: Vec<String> },
}

/// One probeset line of the report
#[derive(Debug, Clone, PartialEq)]
pub struct AffymetrixRecord {
    pub marker: MarkerRecord,
    /// Alleles A and B, when known
    pub alleles: Option<[String; 2]>,
    pub status: RecordStatus,
}

impl AffymetrixRecord {
    pub fn is_partial(&self) -> bool {
        matches!(self.status, RecordStatus::Partial { .. })
    }

    /// Calls of this record are the letters `A`/`B`
    pub fn has_call_letters(&self) -> bool {
        self.alleles.is_none()
    }
}

/// Header information of a report
#[derive(Debug, Clone, Default)]
struct ReportHeader {
    n_samples: Option<usize>,
    n_snps: Option<usize>,
    /// Sanitized column names
    columns: Vec<String>,
    /// Sample ids and the column holding their calls
    samples: Vec<(String, usize)>,
    /// Line number of the column header
    line: usize,
}

impl ReportHeader {
    fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Parsed report: records plus the genotype matrix, one row per sample
#[derive(Debug, Default)]
struct ParsedReport {
    records: Vec<AffymetrixRecord>,
    markers: Vec<MarkerRecord>,
    samples: Vec<String>,
    genotypes: Vec<Vec<String>>,
}

/// Affymetrix genotype report
pub struct AffymetrixReport {
    path: PathBuf,
    parsed: Option<ParsedReport>,
}

fn header_value(line: &str, key: &str) -> Option<usize> {
    line.strip_prefix(key).and_then(|v| v.trim().parse().ok())
}

/// Sample id of a call column ("ID1.CEL_call_code" → "ID1")
fn sample_name(raw: &str) -> String {
    match raw.to_ascii_uppercase().find(".CEL") {
        Some(idx) => raw[..idx].to_string(),
        None => raw.trim().to_string(),
    }
}

/// Genotype of a call given the A/B alleles
///
/// # Returns
/// * `Ok(None)` - No call
/// * `Ok(Some([a, b]))` - Alleles of the call
fn parse_call(call: &str, alleles: &[String; 2]) -> Result<Option<[String; 2]>, String> {
    let [a, b] = alleles;
    match call.trim() {
        c if NO_CALLS.contains(&c) => Ok(None),
        "AA" | "0" => Ok(Some([a.clone(), a.clone()])),
        "AB" | "1" => Ok(Some([a.clone(), b.clone()])),
        "BB" | "2" => Ok(Some([b.clone(), b.clone()])),
        other => Err(format!("unknown call '{}'", other)),
    }
}

impl AffymetrixReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            parsed: None,
        }
    }

    /// Parsed records, once markers were read
    pub fn records(&self) -> &[AffymetrixRecord] {
        self.parsed.as_ref().map(|p| p.records.as_slice()).unwrap_or(&[])
    }

    pub fn n_partial(&self) -> usize {
        self.records().iter().filter(|r| r.is_partial()).count()
    }

    /// Read comment lines and the column header
    fn read_header(&self, reader: &mut dyn BufRead) -> Result<ReportHeader, SourceError> {
        let path = &self.path;
        let mut header = ReportHeader::default();
        let mut line = String::new();

        loop {
            line.clear();
            let n = reader.read_line(&mut line).map_err(SourceError::io(path))?;
            if n == 0 {
                return Err(SourceError::format(path, header.line, "missing column header"));
            }
            header.line += 1;

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if let Some(n) = header_value(trimmed, "##samples-per-snp=") {
                header.n_samples = Some(n);
            } else if let Some(n) = header_value(trimmed, "##snp-count=") {
                header.n_snps = Some(n);
            } else if trimmed.starts_with('#') || trimmed.is_empty() {
                continue;
            } else {
                break;
            }
        }

        let raw: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        let mut seen = HashSet::new();

        for (idx, name) in raw.iter().enumerate() {
            let column = sanitize(name);
            if ANNOTATION_COLUMNS.contains(&column.as_str()) {
                if !seen.insert(column.clone()) {
                    debug!("Ignoring duplicated column '{}' in {}", name, path.display());
                }
            } else {
                let sample = sample_name(name);
                if seen.insert(format!("sample:{}", sample)) {
                    header.samples.push((sample, idx));
                } else {
                    debug!("Ignoring duplicated sample column '{}' in {}", name, path.display());
                }
            }
            header.columns.push(column);
        }

        if header.column(PROBESET_COLUMN).is_none() {
            return Err(SourceError::MissingColumn {
                path: path.clone(),
                column: PROBESET_COLUMN.to_string(),
            });
        }

        if let Some(expected) = header.n_samples {
            if expected != header.samples.len() {
                return Err(SourceError::format(
                    path,
                    header.line,
                    format!(
                        "header declares {} samples, found {} sample columns",
                        expected,
                        header.samples.len()
                    ),
                ));
            }
        }

        Ok(header)
    }

    fn parse(&self) -> Result<ParsedReport, SourceError> {
        let path = &self.path;
        let mut reader = open_text(path)?;
        let header = self.read_header(&mut reader)?;

        let probeset_col = header.column(PROBESET_COLUMN).unwrap_or(0);
        let optional: Vec<Option<usize>> =
            OPTIONAL_COLUMNS.iter().map(|c| header.column(c)).collect();

        let absent: Vec<&str> = OPTIONAL_COLUMNS
            .iter()
            .zip(&optional)
            .filter(|(_, col)| col.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !absent.is_empty() {
            warn!(
                "Columns {:?} not found in {}: markers will have default coordinates and A/B alleles",
                absent,
                path.display()
            );
        }

        let mut report = ParsedReport {
            samples: header.samples.iter().map(|(s, _)| s.clone()).collect(),
            genotypes: vec![Vec::new(); header.samples.len()],
            ..Default::default()
        };

        let mut csv_reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        for record in csv_reader.records() {
            let record = record.map_err(SourceError::csv(path))?;
            let line = header.line + record.position().map(|p| p.line() as usize).unwrap_or(0);

            // missing or placeholder values count as absent
            let value = |col: Option<usize>| {
                col.and_then(|c| record.get(c))
                    .map(str::trim)
                    .filter(|v| !v.is_empty() && *v != "---")
            };

            let probeset_id = value(Some(probeset_col))
                .ok_or_else(|| SourceError::format(path, line, "empty probeset_id"))?;

            let mut missing = Vec::new();
            let mut field = |idx: usize| {
                let v = value(optional[idx]);
                if v.is_none() {
                    missing.push(OPTIONAL_COLUMNS[idx].to_string());
                }
                v
            };

            let chrom = field(0).unwrap_or("0").to_string();
            let position = match field(1) {
                Some(v) => v.parse::<u64>().map_err(|_| {
                    SourceError::format(path, line, format!("invalid position '{}'", v))
                })?,
                None => 0,
            };
            let alleles = match (field(2), field(3)) {
                (Some(a), Some(b)) => Some([a.to_string(), b.to_string()]),
                _ => None,
            };

            let status = if missing.is_empty() {
                RecordStatus::Complete
            } else {
                RecordStatus::Partial { missing }
            };

            let call_alleles = alleles
                .clone()
                .unwrap_or_else(|| ["A".to_string(), "B".to_string()]);

            for (sample_idx, (_, col)) in header.samples.iter().enumerate() {
                let call = record.get(*col).unwrap_or("");
                let genotype = parse_call(call, &call_alleles)
                    .map_err(|details| SourceError::format(path, line, details))?
                    .unwrap_or_else(|| ["0".to_string(), "0".to_string()]);
                report.genotypes[sample_idx].extend(genotype);
            }

            let marker = MarkerRecord::new(chrom, probeset_id, 0.0, position);
            report.markers.push(marker.clone());
            report.records.push(AffymetrixRecord {
                marker,
                alleles,
                status,
            });
        }

        if let Some(expected) = header.n_snps {
            if expected != report.records.len() {
                return Err(SourceError::format(
                    path,
                    header.line,
                    format!(
                        "header declares {} SNPs, found {}",
                        expected,
                        report.records.len()
                    ),
                ));
            }
        }

        Ok(report)
    }
}

impl GenotypeSource for AffymetrixReport {
    fn describe(&self) -> String {
        format!("Affymetrix report {}", self.path.display())
    }

    fn input_paths(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }

    fn read_markers(&mut self) -> Result<usize, SourceError> {
        let report = self.parse()?;
        let partial = report.records.iter().filter(|r| r.is_partial()).count();

        info!(
            "Read {} markers and {} samples from {} ({} partial records)",
            report.markers.len(),
            report.samples.len(),
            self.path.display(),
            partial
        );

        let count = report.markers.len();
        self.parsed = Some(report);
        Ok(count)
    }

    fn markers(&self) -> &[MarkerRecord] {
        self.parsed.as_ref().map(|p| p.markers.as_slice()).unwrap_or(&[])
    }

    fn stream_rows<'s>(
        &'s self,
        fake_ped: Option<&'s FakePed<'s>>,
    ) -> Result<RowStream<'s>, SourceError> {
        let report = self
            .parsed
            .as_ref()
            .ok_or_else(|| SourceError::MarkersNotRead(self.path.clone()))?;
        let path: &Path = &self.path;

        let rows = report
            .samples
            .iter()
            .zip(&report.genotypes)
            .map(move |(iid, genotypes)| {
                let fid = family_id(fake_ped, None, iid, path)?;
                let mut row = SampleRow::new(fid, iid.clone(), 0);
                row.genotypes = genotypes.clone();
                Ok(row)
            });

        Ok(Box::new(rows))
    }

    fn list_sample_ids(&self) -> Result<Vec<SampleId>, SourceError> {
        let mut reader = open_text(&self.path)?;
        let header = self.read_header(&mut reader)?;

        Ok(header
            .samples
            .into_iter()
            .map(|(iid, _)| SampleId { fid: None, iid })
            .collect())
    }

    fn is_ab_call(&self, index: usize) -> bool {
        self.records()
            .get(index)
            .map(AffymetrixRecord::has_call_letters)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const REPORT: &str = "#%create_date=Tue Jun 08 2021\n\
        ##samples-per-snp=2\n\
        ##snp-count=2\n\
        probeset_id\tID1.CEL_call_code\tID2.CEL_call_code\tchromosome\tchromosomal_position\tallele_a\tallele_b\n\
        AX-124359447\tAA\tAB\t1\t105267\tC\tA\n\
        AX-124359448\tNoCall\tBB\t15\t5859890\tT\tC\n";

    fn create_test_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn rows(report: &AffymetrixReport) -> Vec<SampleRow> {
        let fake = FakePed::Breed("TEX".to_string());
        report
            .stream_rows(Some(&fake))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_parse_report() {
        let file = create_test_file(REPORT);
        let mut report = AffymetrixReport::new(file.path());

        assert_eq!(report.read_markers().unwrap(), 2);
        assert_eq!(report.markers()[0].name, "AX-124359447");
        assert_eq!(report.markers()[1].position, 5859890);
        assert_eq!(report.n_partial(), 0);

        let rows = rows(&report);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].iid, "ID1");
        assert_eq!(rows[0].fid, "TEX");
        assert_eq!(rows[0].genotypes, vec!["C", "C", "0", "0"]);
        assert_eq!(rows[1].genotypes, vec!["C", "A", "C", "C"]);
    }

    #[test]
    fn test_missing_optional_columns_are_partial() {
        let content = "probeset_id\tID1.CEL_call_code\n\
            AX-124359447\tAB\n\
            AX-124359448\t2\n";
        let file = create_test_file(content);
        let mut report = AffymetrixReport::new(file.path());
        report.read_markers().unwrap();

        assert_eq!(report.n_partial(), 2);
        let record = &report.records()[0];
        assert_eq!(record.marker.chrom, "0");
        assert_eq!(record.marker.position, 0);
        assert!(matches!(
            &record.status,
            RecordStatus::Partial { missing } if missing.len() == 4
        ));

        assert_eq!(rows(&report)[0].genotypes, vec!["A", "B", "B", "B"]);
        assert!(report.is_ab_call(0));
        assert!(report.is_ab_call(1));
        assert!(!report.is_ab_call(2));
    }

    #[test]
    fn test_blank_alleles_keep_call_letters() {
        let content = "probeset_id\tID1.CEL_call_code\tchromosome\tchromosomal_position\tallele_a\tallele_b\n\
            AX-124359447\tAA\t1\t105267\tC\tA\n\
            AX-124359448\tAB\t15\t5859890\t---\t\n";
        let file = create_test_file(content);
        let mut report = AffymetrixReport::new(file.path());
        report.read_markers().unwrap();

        assert!(!report.is_ab_call(0));
        assert!(report.is_ab_call(1));
        assert_eq!(rows(&report)[0].genotypes, vec!["C", "C", "A", "B"]);
    }

    #[test]
    fn test_snp_count_mismatch() {
        let content = REPORT.replace("##snp-count=2", "##snp-count=3");
        let file = create_test_file(&content);

        let mut report = AffymetrixReport::new(file.path());
        assert!(matches!(
            report.read_markers(),
            Err(SourceError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_sample_count_mismatch() {
        let content = REPORT.replace("##samples-per-snp=2", "##samples-per-snp=5");
        let file = create_test_file(&content);

        let mut report = AffymetrixReport::new(file.path());
        assert!(report.read_markers().is_err());
    }

    #[test]
    fn test_duplicated_columns_keep_first() {
        let content = "probeset_id\tID1.CEL_call_code\tID1.CEL_call_code\tchromosome\tchromosome\n\
            AX-124359447\tAA\tBB\t1\t2\n";
        let file = create_test_file(content);

        let mut report = AffymetrixReport::new(file.path());
        report.read_markers().unwrap();

        assert_eq!(report.markers()[0].chrom, "1");
        assert_eq!(rows(&report)[0].genotypes, vec!["A", "A"]);
    }

    #[test]
    fn test_missing_probeset_column() {
        let file = create_test_file("chromosome\tID1\n1\tAA\n");
        let mut report = AffymetrixReport::new(file.path());
        assert!(matches!(
            report.read_markers(),
            Err(SourceError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_list_sample_ids() {
        let file = create_test_file(REPORT);
        let ids = AffymetrixReport::new(file.path()).list_sample_ids().unwrap();
        let iids: Vec<&str> = ids.iter().map(|id| id.iid.as_str()).collect();
        assert_eq!(iids, vec!["ID1", "ID2"]);
    }
}

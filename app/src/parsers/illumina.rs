// ==============================================================================
// illumina.rs - Illumina Final Report Reader
// ==============================================================================
// Description: Reads markers from an Illumina SNP list and samples from the
//              [Data] section of a final report
// Author: Matt Barham
// Created: 2026-09-21
// Modified: 2026-10-05
// Version: 1.1.0
// ==============================================================================
// Format:
//   SNP list (CSV or TSV):
//     Index  Name  Chromosome  Position  ...
//   Final report (one line per marker per sample, grouped by sample):
//     [Header]
//     ...
//     [Data]
//     SNP Name  Sample ID  Allele1 - Top  Allele2 - Top  Allele1 - AB ...
//
//   Every sample block must list the SNP list markers in the same order.
// ==============================================================================

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};
use std::collections::HashSet;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{
    family_id, open_text, sanitize, FakePed, GenotypeSource, RowStream, SampleId, SourceError,
};
use crate::allele_coding::Coding;
use crate::models::{MarkerRecord, SampleRow};

const DATA_SECTION: &str = "[Data]";

/// Delimiter of a header line: tab when present, else comma
fn sniff_delimiter(header: &str) -> u8 {
    if header.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

/// Split a header line and sanitize its column names
fn parse_header(line: &str, delimiter: u8) -> Vec<String> {
    line.trim_end_matches(['\r', '\n'])
        .split(delimiter as char)
        .map(sanitize)
        .collect()
}

fn column_index(header: &[String], column: &str, path: &Path) -> Result<usize, SourceError> {
    header
        .iter()
        .position(|c| c == column)
        .ok_or_else(|| SourceError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })
}

/// Report columns used to build rows
#[derive(Debug, Clone, Copy)]
struct Columns {
    snp: usize,
    sample: usize,
    allele1: usize,
    allele2: usize,
}

/// Report records after the [Data] header
struct DataSection {
    records: StringRecordsIntoIter<Box<dyn BufRead>>,
    header: Vec<String>,
    /// Line number of the header
    header_line: usize,
}

/// Illumina final report plus its SNP list
pub struct IlluminaReport {
    report_path: PathBuf,
    snpfile_path: PathBuf,
    coding: Coding,
    markers: Option<Vec<MarkerRecord>>,
}

impl IlluminaReport {
    pub fn new(
        report_path: impl Into<PathBuf>,
        snpfile_path: impl Into<PathBuf>,
        coding: Coding,
    ) -> Self {
        Self {
            report_path: report_path.into(),
            snpfile_path: snpfile_path.into(),
            coding,
            markers: None,
        }
    }

    /// Allele columns holding genotypes in the requested coding
    fn allele_columns(&self) -> Result<(&'static str, &'static str), SourceError> {
        match self.coding {
            Coding::Top => Ok(("allele1_top", "allele2_top")),
            Coding::Forward => Ok(("allele1_forward", "allele2_forward")),
            Coding::Ab => Ok(("allele1_ab", "allele2_ab")),
            coding => Err(SourceError::UnsupportedCoding {
                path: self.report_path.clone(),
                coding,
            }),
        }
    }

    /// Skip to the [Data] section and read its header
    fn open_data(&self) -> Result<DataSection, SourceError> {
        let path = &self.report_path;
        let mut reader = open_text(path)?;
        let mut line = String::new();
        let mut line_number = 0;

        loop {
            line.clear();
            let n = reader.read_line(&mut line).map_err(SourceError::io(path))?;
            if n == 0 {
                return Err(SourceError::format(
                    path,
                    line_number,
                    format!("{} section not found", DATA_SECTION),
                ));
            }
            line_number += 1;
            if line.trim().starts_with(DATA_SECTION) {
                break;
            }
        }

        line.clear();
        reader.read_line(&mut line).map_err(SourceError::io(path))?;
        line_number += 1;

        let delimiter = sniff_delimiter(&line);
        let header = parse_header(&line, delimiter);
        debug!("Illumina report columns: {:?}", header);

        let records = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(reader)
            .into_records();

        Ok(DataSection {
            records,
            header,
            header_line: line_number,
        })
    }

    fn read_snp_list(&self) -> Result<Vec<MarkerRecord>, SourceError> {
        let path = &self.snpfile_path;
        let mut reader = open_text(path)?;

        let mut line = String::new();
        reader.read_line(&mut line).map_err(SourceError::io(path))?;
        let delimiter = sniff_delimiter(&line);
        let header = parse_header(&line, delimiter);

        let index_col = column_index(&header, "index", path)?;
        let name_col = column_index(&header, "name", path)?;
        let chrom_col = column_index(&header, "chromosome", path)?;
        let position_col = column_index(&header, "position", path)?;

        let mut csv_reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut markers = Vec::new();
        for (idx, record) in csv_reader.records().enumerate() {
            let record = record.map_err(SourceError::csv(path))?;
            let line_number = idx + 2;
            let field = |col: usize| record.get(col).unwrap_or("").trim();

            field(index_col).parse::<u64>().map_err(|_| {
                SourceError::format(path, line_number, format!("invalid index '{}'", field(index_col)))
            })?;
            let position = field(position_col).parse::<u64>().map_err(|_| {
                SourceError::format(
                    path,
                    line_number,
                    format!("invalid position '{}'", field(position_col)),
                )
            })?;

            markers.push(MarkerRecord::new(field(chrom_col), field(name_col), 0.0, position));
        }

        Ok(markers)
    }
}

impl GenotypeSource for IlluminaReport {
    fn describe(&self) -> String {
        format!("Illumina report {}", self.report_path.display())
    }

    fn input_paths(&self) -> Vec<PathBuf> {
        vec![self.report_path.clone(), self.snpfile_path.clone()]
    }

    fn read_markers(&mut self) -> Result<usize, SourceError> {
        let markers = self.read_snp_list()?;
        info!(
            "Read {} markers from {}",
            markers.len(),
            self.snpfile_path.display()
        );

        let count = markers.len();
        self.markers = Some(markers);
        Ok(count)
    }

    fn markers(&self) -> &[MarkerRecord] {
        self.markers.as_deref().unwrap_or(&[])
    }

    fn stream_rows<'s>(
        &'s self,
        fake_ped: Option<&'s FakePed<'s>>,
    ) -> Result<RowStream<'s>, SourceError> {
        let markers = self
            .markers
            .as_deref()
            .ok_or_else(|| SourceError::MarkersNotRead(self.snpfile_path.clone()))?;

        let (allele1, allele2) = self.allele_columns()?;
        let data = self.open_data()?;
        let path = &self.report_path;

        let columns = Columns {
            snp: column_index(&data.header, "snp_name", path)?,
            sample: column_index(&data.header, "sample_id", path)?,
            allele1: column_index(&data.header, allele1, path)?,
            allele2: column_index(&data.header, allele2, path)?,
        };

        Ok(Box::new(IlluminaRows {
            path,
            markers,
            records: data.records,
            header_line: data.header_line,
            columns,
            fake_ped,
            pending: None,
            done: false,
        }))
    }

    fn list_sample_ids(&self) -> Result<Vec<SampleId>, SourceError> {
        let data = self.open_data()?;
        let sample_col = column_index(&data.header, "sample_id", &self.report_path)?;

        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        for record in data.records {
            let record = record.map_err(SourceError::csv(&self.report_path))?;
            let sample = record.get(sample_col).unwrap_or("");
            if seen.insert(sample.to_string()) {
                ids.push(SampleId {
                    fid: None,
                    iid: sample.to_string(),
                });
            }
        }

        Ok(ids)
    }
}

/// Groups report lines into one row per sample block
struct IlluminaRows<'s> {
    path: &'s Path,
    markers: &'s [MarkerRecord],
    records: StringRecordsIntoIter<Box<dyn BufRead>>,
    header_line: usize,
    columns: Columns,
    fake_ped: Option<&'s FakePed<'s>>,
    /// First record of the next sample block
    pending: Option<StringRecord>,
    done: bool,
}

impl IlluminaRows<'_> {
    fn line_of(&self, record: &StringRecord) -> usize {
        self.header_line + record.position().map(|p| p.line() as usize).unwrap_or(0)
    }

    fn next_record(&mut self) -> Result<Option<StringRecord>, SourceError> {
        match self.records.next() {
            None => Ok(None),
            Some(record) => Ok(Some(record.map_err(SourceError::csv(self.path))?)),
        }
    }

    fn next_row(&mut self) -> Result<Option<SampleRow>, SourceError> {
        let mut record = match self.pending.take() {
            Some(record) => record,
            None => match self.next_record()? {
                Some(record) => record,
                None => return Ok(None),
            },
        };

        let n_markers = self.markers.len();
        let sample = record.get(self.columns.sample).unwrap_or("").to_string();
        let mut row = SampleRow::new("0", sample.clone(), n_markers);
        let mut count = 0;

        loop {
            let snp = record.get(self.columns.snp).unwrap_or("");
            let expected = self.markers.get(count).ok_or_else(|| SourceError::MarkerCountMismatch {
                path: self.path.to_path_buf(),
                sample: sample.clone(),
                found: count + 1,
                expected: n_markers,
            })?;

            if snp != expected.name {
                return Err(SourceError::MarkerOrder {
                    path: self.path.to_path_buf(),
                    line: self.line_of(&record),
                    found: snp.to_string(),
                    expected: expected.name.clone(),
                });
            }

            row.set_allele_pair(
                count,
                [
                    record.get(self.columns.allele1).unwrap_or("0").to_string(),
                    record.get(self.columns.allele2).unwrap_or("0").to_string(),
                ],
            );
            count += 1;

            match self.next_record()? {
                None => {
                    self.done = true;
                    break;
                }
                Some(next) if next.get(self.columns.sample) != Some(sample.as_str()) => {
                    self.pending = Some(next);
                    break;
                }
                Some(next) => record = next,
            }
        }

        if count != n_markers {
            return Err(SourceError::MarkerCountMismatch {
                path: self.path.to_path_buf(),
                sample,
                found: count,
                expected: n_markers,
            });
        }

        row.fid = family_id(self.fake_ped, None, &row.iid, self.path)?;
        Ok(Some(row))
    }
}

impl Iterator for IlluminaRows<'_> {
    type Item = Result<SampleRow, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done && self.pending.is_none() {
            return None;
        }

        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                self.pending = None;
                Some(Err(e))
            }
        }
    }
}

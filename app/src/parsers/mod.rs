// ==============================================================================
// parsers/mod.rs - Genotype Source Adapters
// ==============================================================================
// Description: Common contract and helpers for the PLINK, Illumina and
//              Affymetrix genotype readers
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2026-10-04
// Version: 2.0.0
// ==============================================================================

pub mod affymetrix;
pub mod binary_plink;
pub mod illumina;
pub mod text_plink;

pub use affymetrix::{AffymetrixRecord, AffymetrixReport, RecordStatus};
pub use binary_plink::BinaryPlink;
pub use illumina::IlluminaReport;
pub use text_plink::TextPlink;

use flate2::bufread::MultiGzDecoder;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::allele_coding::Coding;
use crate::models::{Dataset, MarkerRecord, SampleField, SampleRow};
use crate::reference_store::StoreError;
use crate::sample_store::SampleStore;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Errors raised while reading a genotype source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Invalid format in {path} at line {line}: {details}")]
    InvalidFormat {
        path: PathBuf,
        line: usize,
        details: String,
    },

    #[error("Missing column '{column}' in {path}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Sample '{sample}' in {path} has {found} markers, expected {expected}")]
    MarkerCountMismatch {
        path: PathBuf,
        sample: String,
        found: usize,
        expected: usize,
    },

    #[error(
        "Marker order mismatch in {path} at line {line}: found '{found}', expected '{expected}'"
    )]
    MarkerOrder {
        path: PathBuf,
        line: usize,
        found: String,
        expected: String,
    },

    #[error("{coding} coding is not available in {path}")]
    UnsupportedCoding { path: PathBuf, coding: Coding },

    #[error("Markers were not read from {0}")]
    MarkersNotRead(PathBuf),

    #[error("{0} has no family ids: a breed code or a sample lookup is required")]
    FamilyIdRequired(PathBuf),

    #[error("Couldn't find sample '{0}' to determine its family id")]
    UnknownFamily(String),

    #[error("Got {count} samples for '{iid}' while determining its family id")]
    AmbiguousFamily { iid: String, count: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SourceError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> SourceError + '_ {
        move |source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: &Path) -> impl FnOnce(csv::Error) -> SourceError + '_ {
        move |source| SourceError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn format(path: &Path, line: usize, details: impl Into<String>) -> SourceError {
        SourceError::InvalidFormat {
            path: path.to_path_buf(),
            line,
            details: details.into(),
        }
    }
}

/// Lazy, forward-only sequence of sample rows
pub type RowStream<'s> = Box<dyn Iterator<Item = Result<SampleRow, SourceError>> + 's>;

/// Identifier of one sample as found in a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleId {
    /// Family id, when the format has one
    pub fid: Option<String>,
    pub iid: String,
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.fid {
            Some(fid) => write!(f, "{}\t{}", fid, self.iid),
            None => f.write_str(&self.iid),
        }
    }
}

/// Family ids for sources that have none
pub enum FakePed<'a> {
    /// The same breed code for every sample
    Breed(String),
    /// The breed code of the already stored sample
    Lookup {
        store: &'a SampleStore,
        dataset: &'a Dataset,
        field: SampleField,
    },
}

impl<'a> FakePed<'a> {
    pub fn family_id(&self, iid: &str) -> Result<String, SourceError> {
        match self {
            FakePed::Breed(code) => Ok(code.clone()),
            FakePed::Lookup {
                store,
                dataset,
                field,
            } => {
                let mut samples = store.find_samples(dataset.id, None, *field, iid)?;
                match samples.len() {
                    1 => Ok(samples.remove(0).breed_code),
                    0 => Err(SourceError::UnknownFamily(iid.to_string())),
                    count => Err(SourceError::AmbiguousFamily {
                        iid: iid.to_string(),
                        count,
                    }),
                }
            }
        }
    }
}

/// Uniform contract of every genotype reader
///
/// Markers are read once with [`GenotypeSource::read_markers`]; their order
/// defines the allele slot layout of every streamed row.
pub trait GenotypeSource {
    /// Short description used in logs and reports
    fn describe(&self) -> String;

    /// Files read by this source
    fn input_paths(&self) -> Vec<PathBuf>;

    /// Parse the marker list, returning the number of markers
    fn read_markers(&mut self) -> Result<usize, SourceError>;

    fn markers(&self) -> &[MarkerRecord];

    /// Stream sample rows in source order
    ///
    /// When `fake_ped` is given the family id of every row comes from it.
    /// Sources without native family ids require it.
    fn stream_rows<'s>(&'s self, fake_ped: Option<&'s FakePed<'s>>)
        -> Result<RowStream<'s>, SourceError>;

    /// Sample identifiers, without reading genotypes
    fn list_sample_ids(&self) -> Result<Vec<SampleId>, SourceError>;

    /// True when the genotypes of marker `index` are raw Affymetrix `A`/`B`
    /// call letters rather than alleles in the requested coding
    fn is_ab_call(&self, _index: usize) -> bool {
        false
    }
}

/// Open a plain text or gzip compressed file
pub fn open_text(path: &Path) -> Result<Box<dyn BufRead>, SourceError> {
    let file = File::open(path).map_err(SourceError::io(path))?;
    let mut reader = BufReader::new(file);

    let is_gzip = reader
        .fill_buf()
        .map_err(SourceError::io(path))?
        .starts_with(&GZIP_MAGIC);

    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Normalize a column name: punctuation becomes a separator, whitespace
/// runs become `_`, and everything is lowercased
/// (e.g., "Allele1 - Top" → "allele1_top")
pub fn sanitize(column: &str) -> String {
    column
        .replace(['.', ',', '-', '/', '#'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// `<prefix>.<extension>`, keeping any dots already in the prefix
pub(crate) fn prefixed(prefix: &Path, extension: &str) -> PathBuf {
    let mut path = prefix.as_os_str().to_os_string();
    path.push(".");
    path.push(extension);
    PathBuf::from(path)
}

/// Family id of a row: the fake one when provided, else the native one
pub(crate) fn family_id(
    fake_ped: Option<&FakePed<'_>>,
    native: Option<&str>,
    iid: &str,
    path: &Path,
) -> Result<String, SourceError> {
    match (fake_ped, native) {
        (Some(fake), _) => fake.family_id(iid),
        (None, Some(fid)) => Ok(fid.to_string()),
        (None, None) => Err(SourceError::FamilyIdRequired(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seeded_samples;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Read, Write};
    use tempfile::NamedTempFile;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Allele1 - Top"), "allele1_top");
        assert_eq!(sanitize("SNP Name"), "snp_name");
        assert_eq!(sanitize("probeset_id"), "probeset_id");
        assert_eq!(sanitize(" GC Score "), "gc_score");
    }

    #[test]
    fn test_open_text_plain_and_gzip() {
        let mut plain = NamedTempFile::new().unwrap();
        writeln!(plain, "hello").unwrap();
        plain.flush().unwrap();

        let mut content = String::new();
        open_text(plain.path()).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello\n");

        let gz = NamedTempFile::new().unwrap();
        let mut encoder = GzEncoder::new(gz.as_file(), Compression::default());
        encoder.write_all(b"compressed\n").unwrap();
        encoder.finish().unwrap();

        let mut content = String::new();
        open_text(gz.path()).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "compressed\n");
    }

    #[test]
    fn test_fake_ped_lookup() {
        let (store, dataset) = seeded_samples();
        let breed = store.breeds_by_code(dataset.species, "TEX").unwrap().remove(0);
        store
            .insert_sample(&crate::sample_store::NewSample {
                original_id: "ID1",
                alias: None,
                dataset: &dataset,
                breed: &breed,
                sex: None,
            })
            .unwrap();

        let fake = FakePed::Lookup {
            store: &store,
            dataset: &dataset,
            field: SampleField::OriginalId,
        };
        assert_eq!(fake.family_id("ID1").unwrap(), "TEX");
        assert!(matches!(fake.family_id("ID2"), Err(SourceError::UnknownFamily(_))));

        assert_eq!(FakePed::Breed("MER".into()).family_id("x").unwrap(), "MER");
    }
}

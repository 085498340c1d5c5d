// ==============================================================================
// binary_plink.rs - PLINK Binary (BED/BIM/FAM) Reader
// ==============================================================================
// Description: Reads markers and allele pairs from .bim, samples from .fam
//              and the packed genotype matrix from .bed
// Author: Matt Barham
// Created: 2026-09-20
// Modified: 2026-10-04
// Version: 1.0.0
// ==============================================================================
// Format:
//   .bim  chrom name cM position allele1 allele2
//   .fam  fid iid father mother sex phenotype
//   .bed  magic 0x6C 0x1B, mode 0x01 (SNP-major), then for every marker
//         ceil(n_samples / 4) bytes of 2-bit genotypes, low bits first
//
//   bits  code  genotype
//   00    0     allele1 allele1
//   10    1     allele1 allele2
//   11    2     allele2 allele2
//   01    3     missing
// ==============================================================================

use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{
    family_id, open_text, prefixed, FakePed, GenotypeSource, RowStream, SampleId, SourceError,
};
use crate::models::{MarkerRecord, SampleRow, MISSING_ALLELE};

/// Magic number plus SNP-major mode byte
pub const BED_MAGIC: [u8; 3] = [0x6c, 0x1b, 0x01];

/// Genotype code of a 2-bit value
///
/// # Returns
/// 0 homozygous first allele, 1 heterozygous, 2 homozygous second allele,
/// 3 missing
pub fn genotype_code(bits: u8) -> u8 {
    match bits & 0b11 {
        0b00 => 0,
        0b10 => 1,
        0b11 => 2,
        _ => 3,
    }
}

/// Alleles of a genotype code given the locus allele pair
pub fn decode_genotype(code: u8, alleles: &[String; 2]) -> [String; 2] {
    let [a1, a2] = alleles;
    match code {
        0 => [a1.clone(), a1.clone()],
        1 => [a1.clone(), a2.clone()],
        2 => [a2.clone(), a2.clone()],
        _ => [MISSING_ALLELE.to_string(), MISSING_ALLELE.to_string()],
    }
}

/// One line of the .fam file
#[derive(Debug, Clone, PartialEq)]
struct FamRecord {
    fid: String,
    iid: String,
    father: String,
    mother: String,
    sex: String,
    phenotype: String,
}

/// PLINK binary file triple
pub struct BinaryPlink {
    bed_path: PathBuf,
    bim_path: PathBuf,
    fam_path: PathBuf,
    markers: Option<Vec<MarkerRecord>>,
    alleles: Vec<[String; 2]>,
}

impl BinaryPlink {
    /// Files `<prefix>.bed`, `<prefix>.bim` and `<prefix>.fam`
    pub fn new(prefix: impl AsRef<Path>) -> Self {
        let prefix = prefix.as_ref();
        Self {
            bed_path: prefixed(prefix, "bed"),
            bim_path: prefixed(prefix, "bim"),
            fam_path: prefixed(prefix, "fam"),
            markers: None,
            alleles: Vec::new(),
        }
    }

    pub fn bed_path(&self) -> &Path {
        &self.bed_path
    }

    fn read_fam(&self) -> Result<Vec<FamRecord>, SourceError> {
        let reader = open_text(&self.fam_path)?;
        let mut records = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(SourceError::io(&self.fam_path))?;
            if line.trim().is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 6 {
                return Err(SourceError::format(
                    &self.fam_path,
                    idx + 1,
                    format!("expected 6 columns, found {}", fields.len()),
                ));
            }

            records.push(FamRecord {
                fid: fields[0].to_string(),
                iid: fields[1].to_string(),
                father: fields[2].to_string(),
                mother: fields[3].to_string(),
                sex: fields[4].to_string(),
                phenotype: fields[5].to_string(),
            });
        }

        Ok(records)
    }

    /// Read the whole genotype matrix, checking header and payload size
    fn read_bed(&self, n_samples: usize, n_markers: usize) -> Result<Vec<u8>, SourceError> {
        let data = fs::read(&self.bed_path).map_err(SourceError::io(&self.bed_path))?;

        if !data.starts_with(&BED_MAGIC) {
            return Err(SourceError::format(
                &self.bed_path,
                0,
                "not a SNP-major PLINK .bed file (bad magic number)",
            ));
        }

        let bytes_per_marker = n_samples.div_ceil(4);
        let expected = bytes_per_marker * n_markers;
        let actual = data.len() - BED_MAGIC.len();
        if actual != expected {
            return Err(SourceError::format(
                &self.bed_path,
                0,
                format!(
                    "expected {} bytes of genotypes for {} samples and {} markers, found {}",
                    expected, n_samples, n_markers, actual
                ),
            ));
        }

        Ok(data[BED_MAGIC.len()..].to_vec())
    }
}

impl GenotypeSource for BinaryPlink {
    fn describe(&self) -> String {
        format!("PLINK binary {}", self.bed_path.display())
    }

    fn input_paths(&self) -> Vec<PathBuf> {
        vec![
            self.bed_path.clone(),
            self.bim_path.clone(),
            self.fam_path.clone(),
        ]
    }

    fn read_markers(&mut self) -> Result<usize, SourceError> {
        let reader = open_text(&self.bim_path)?;
        let mut markers = Vec::new();
        let mut alleles = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(SourceError::io(&self.bim_path))?;
            if line.trim().is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 6 {
                return Err(SourceError::format(
                    &self.bim_path,
                    idx + 1,
                    format!("expected 6 columns, found {}", fields.len()),
                ));
            }

            let cm = fields[2].parse::<f64>().map_err(|_| {
                SourceError::format(&self.bim_path, idx + 1, format!("invalid cM '{}'", fields[2]))
            })?;
            let position = fields[3].parse::<u64>().map_err(|_| {
                SourceError::format(
                    &self.bim_path,
                    idx + 1,
                    format!("invalid position '{}'", fields[3]),
                )
            })?;

            markers.push(MarkerRecord::new(fields[0], fields[1], cm, position));
            alleles.push([fields[4].to_string(), fields[5].to_string()]);
        }

        info!("Read {} markers from {}", markers.len(), self.bim_path.display());
        let count = markers.len();
        self.markers = Some(markers);
        self.alleles = alleles;
        Ok(count)
    }

    fn markers(&self) -> &[MarkerRecord] {
        self.markers.as_deref().unwrap_or(&[])
    }

    fn stream_rows<'s>(
        &'s self,
        fake_ped: Option<&'s FakePed<'s>>,
    ) -> Result<RowStream<'s>, SourceError> {
        let n_markers = self
            .markers
            .as_ref()
            .map(Vec::len)
            .ok_or_else(|| SourceError::MarkersNotRead(self.bim_path.clone()))?;

        let samples = self.read_fam()?;
        let matrix = self.read_bed(samples.len(), n_markers)?;
        let bytes_per_marker = samples.len().div_ceil(4);

        debug!(
            "Loaded {}x{} genotype matrix from {}",
            n_markers,
            samples.len(),
            self.bed_path.display()
        );

        let rows = samples.into_iter().enumerate().map(move |(sample_idx, fam)| {
            let fid = family_id(fake_ped, Some(&fam.fid), &fam.iid, &self.fam_path)?;

            let mut row = SampleRow::new(fid, fam.iid, n_markers);
            row.father = fam.father;
            row.mother = fam.mother;
            row.sex = fam.sex;
            row.phenotype = fam.phenotype;

            let byte_offset = sample_idx / 4;
            let shift = (sample_idx % 4) * 2;

            for (marker_idx, alleles) in self.alleles.iter().enumerate() {
                let byte = matrix[marker_idx * bytes_per_marker + byte_offset];
                let code = genotype_code(byte >> shift);
                row.set_allele_pair(marker_idx, decode_genotype(code, alleles));
            }

            Ok(row)
        });

        Ok(Box::new(rows))
    }

    fn list_sample_ids(&self) -> Result<Vec<SampleId>, SourceError> {
        Ok(self
            .read_fam()?
            .into_iter()
            .map(|fam| SampleId {
                fid: Some(fam.fid),
                iid: fam.iid,
            })
            .collect())
    }
}

// ==============================================================================
// models.rs - Marker, Location and Identity Data Models
// ==============================================================================
// Description: Data structures shared by adapters, resolvers and the pipeline
// Author: Matt Barham
// Created: 2026-09-14
// Modified: 2026-10-02
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::allele_coding::complement_alleles;

/// Missing allele written to PED files
pub const MISSING_ALLELE: &str = "0";

/// Pedigree columns preceding the genotypes in a PED row
pub const PED_HEADER_FIELDS: usize = 6;

/// One marker as declared by the source file.
///
/// The position of a record in the marker list is the key used to address
/// its two allele slots in every [`SampleRow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub chrom: String,
    pub name: String,
    /// Genetic distance in centimorgan (0 when the source has none)
    pub cm: f64,
    pub position: u64,
}

impl MarkerRecord {
    pub fn new(chrom: impl Into<String>, name: impl Into<String>, cm: f64, position: u64) -> Self {
        Self {
            chrom: chrom.into(),
            name: name.into(),
            cm,
            position,
        }
    }
}

/// A genome assembly version plus the source that supplied its coordinates
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssemblyRef {
    /// Assembly version (e.g., "Oar_v3.1")
    pub version: String,
    /// Coordinate provider (e.g., "SNPchiMp v.3")
    pub imported_from: String,
}

impl AssemblyRef {
    pub fn new(version: impl Into<String>, imported_from: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            imported_from: imported_from.into(),
        }
    }
}

impl fmt::Display for AssemblyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.imported_from, self.version)
    }
}

/// Probe orientation relative to the Illumina TOP strand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IlluminaStrand {
    Top,
    Bottom,
}

impl IlluminaStrand {
    /// Parse the strand labels found in manifests ("TOP", "top", "BOT", "bottom")
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "TOP" | "top" => Some(IlluminaStrand::Top),
            "BOT" | "bottom" => Some(IlluminaStrand::Bottom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IlluminaStrand::Top => "TOP",
            IlluminaStrand::Bottom => "BOT",
        }
    }
}

/// Coordinates and allele representations of a variant under one assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub version: String,
    pub imported_from: String,
    pub chrom: String,
    pub position: u64,
    /// SNP submission id (dbSNP ss)
    pub ss_id: Option<String>,
    /// dbSNP alleles
    pub alleles: Option<String>,
    /// Alleles as recorded in the Illumina manifest (e.g., "A/G")
    pub illumina: String,
    /// Strand of the `illumina` alleles. `None` means TOP
    pub illumina_strand: Option<IlluminaStrand>,
    pub illumina_forward: Option<String>,
    pub affymetrix_ab: Option<String>,
    /// Alignment strand
    pub strand: Option<String>,
}

impl Location {
    /// Alleles in Illumina TOP coding
    pub fn illumina_top(&self) -> String {
        match self.illumina_strand {
            Some(IlluminaStrand::Bottom) => complement_alleles(&self.illumina),
            Some(IlluminaStrand::Top) | None => self.illumina.clone(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}:{}) {}:{} [{}]",
            self.imported_from,
            self.version,
            self.chrom,
            self.position,
            self.illumina_top()
        )
    }
}

/// Managed species
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    Sheep,
    Goat,
}

impl Species {
    pub fn as_str(&self) -> &'static str {
        match self {
            Species::Sheep => "Sheep",
            Species::Goat => "Goat",
        }
    }

    /// Two letter code used in cross-reference ids
    pub fn code(&self) -> &'static str {
        match self {
            Species::Sheep => "OA",
            Species::Goat => "CH",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "sheep" => Some(Species::Sheep),
            "goat" => Some(Species::Goat),
            _ => None,
        }
    }
}

/// Sample sex, coded like PLINK does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Unknown,
    Male,
    Female,
}

impl Sex {
    pub fn from_code(value: &str) -> Self {
        match value.to_uppercase().as_str() {
            "1" | "M" | "MALE" => Sex::Male,
            "2" | "F" | "FEMALE" => Sex::Female,
            _ => Sex::Unknown,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Sex::Unknown => 0,
            Sex::Male => 1,
            Sex::Female => 2,
        }
    }

    pub fn from_db(code: i64) -> Self {
        match code {
            1 => Sex::Male,
            2 => Sex::Female,
            _ => Sex::Unknown,
        }
    }
}

/// Whether a dataset contributes reference (background) or study
/// (foreground) samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    Background,
    Foreground,
}

impl SampleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleType::Background => "background",
            SampleType::Foreground => "foreground",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "background" => Some(SampleType::Background),
            "foreground" => Some(SampleType::Foreground),
            _ => None,
        }
    }
}

/// Sample attribute matched against the individual id of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum SampleField {
    OriginalId,
    Alias,
}

impl SampleField {
    /// Column holding this field in the sample store
    pub fn column(&self) -> &'static str {
        match self {
            SampleField::OriginalId => "original_id",
            SampleField::Alias => "alias",
        }
    }
}

impl fmt::Display for SampleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: i64,
    /// Submitted archive name, unique
    pub file: String,
    pub species: Species,
    pub country: String,
    /// ISO alpha-2 code of `country` ("UN" when unknown)
    pub country_code: String,
    pub chip_name: Option<String>,
    pub sample_type: SampleType,
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file={}, species={}", self.file, self.species.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breed {
    pub id: i64,
    pub species: Species,
    pub name: String,
    pub code: String,
    pub n_individuals: i64,
}

impl fmt::Display for Breed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) {}", self.name, self.code, self.species.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: i64,
    /// Generated cross-reference id (e.g., "ITOA-TEX-000000001")
    pub xref_id: String,
    pub original_id: String,
    pub alias: Option<String>,
    pub dataset_id: i64,
    pub species: Species,
    pub breed: String,
    pub breed_code: String,
    pub country: String,
    pub sex: Option<Sex>,
    pub sample_type: SampleType,
    pub chip_name: Option<String>,
    pub father_id: Option<i64>,
    pub mother_id: Option<i64>,
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.xref_id, self.breed)
    }
}

/// One individual: six pedigree fields followed by two allele slots per
/// source marker, in marker order.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    pub fid: String,
    pub iid: String,
    pub father: String,
    pub mother: String,
    pub sex: String,
    pub phenotype: String,
    pub genotypes: Vec<String>,
}

impl SampleRow {
    /// A row with unknown parents, sex and phenotype and all genotypes missing
    pub fn new(fid: impl Into<String>, iid: impl Into<String>, n_markers: usize) -> Self {
        Self {
            fid: fid.into(),
            iid: iid.into(),
            father: "0".to_string(),
            mother: "0".to_string(),
            sex: "0".to_string(),
            phenotype: "-9".to_string(),
            genotypes: vec![MISSING_ALLELE.to_string(); n_markers * 2],
        }
    }

    /// Number of fields a PED line carries for `n_markers` markers
    pub fn expected_fields(n_markers: usize) -> usize {
        PED_HEADER_FIELDS + n_markers * 2
    }

    /// Build a row from PED fields. `None` when the field count does not
    /// match `n_markers`.
    pub fn from_fields(fields: Vec<String>, n_markers: usize) -> Option<Self> {
        if fields.len() != Self::expected_fields(n_markers) {
            return None;
        }

        let mut iter = fields.into_iter();
        let mut next = || iter.next().unwrap_or_default();
        let fid = next();
        let iid = next();
        let father = next();
        let mother = next();
        let sex = next();
        let phenotype = next();
        let genotypes = iter.collect();

        Some(Self {
            fid,
            iid,
            father,
            mother,
            sex,
            phenotype,
            genotypes,
        })
    }

    pub fn n_markers(&self) -> usize {
        self.genotypes.len() / 2
    }

    /// Alleles of the marker at `index`
    pub fn allele_pair(&self, index: usize) -> [&str; 2] {
        [
            self.genotypes[index * 2].as_str(),
            self.genotypes[index * 2 + 1].as_str(),
        ]
    }

    pub fn set_allele_pair(&mut self, index: usize, pair: [String; 2]) {
        let [first, second] = pair;
        self.genotypes[index * 2] = first;
        self.genotypes[index * 2 + 1] = second;
    }

    /// Remove the allele slots of the given marker indices. Indices are
    /// removed from the highest down so lower ones stay valid.
    pub fn strip_markers(&mut self, filtered: &[usize]) {
        let mut indices = filtered.to_vec();
        indices.sort_unstable();
        indices.dedup();

        for index in indices.into_iter().rev() {
            self.genotypes.drain(index * 2..index * 2 + 2);
        }
    }

    /// Leading fields, for log messages
    pub fn head(&self) -> String {
        let mut fields = vec![
            self.fid.as_str(),
            self.iid.as_str(),
            self.father.as_str(),
            self.mother.as_str(),
            self.sex.as_str(),
            self.phenotype.as_str(),
        ];
        fields.extend(self.genotypes.iter().take(4).map(String::as_str));
        format!("[{} ...]", fields.join(", "))
    }
}

impl fmt::Display for SampleRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.fid, self.iid, self.father, self.mother, self.sex, self.phenotype
        )?;
        for allele in &self.genotypes {
            write!(f, " {}", allele)?;
        }
        Ok(())
    }
}

// ==============================================================================
// allele_coding.rs - Allele Coding Conversion
// ==============================================================================
// Description: Validates genotypes against a marker location and converts
//              them into Illumina TOP coding
// Author: Matt Barham
// Created: 2026-09-15
// Modified: 2026-10-15
// Version: 1.2.0
// ==============================================================================
// Algorithm:
//   Every coding stores the two alleles of a marker in the same order as the
//   TOP alleles, so conversion is positional:
//   - FORWARD  forward[i]     → top[i]   (a complement only when strands differ)
//   - AB       A → top[0], B → top[1]
//   - AFFY     affymetrix[i]  → top[i]
//   - ILLUMINA illumina[i]    → top[i]   (as recorded in the manifest)
//   - raw Affymetrix calls: A → affymetrix[0] → top, B → affymetrix[1] → top
//   - "0" / "-" are missing; a genotype with exactly one missing allele is
//     forced to fully missing
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::models::{Location, MISSING_ALLELE};

/// Allele strings meaning "no call"
pub const MISSING_SENTINELS: [&str; 2] = ["0", "-"];

/// Allele coding conventions understood by the converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Coding {
    /// Illumina TOP (the canonical output coding)
    Top,
    /// Illumina FORWARD
    Forward,
    /// Illumina A/B
    Ab,
    /// Affymetrix A/B alleles
    Affymetrix,
    /// Alleles as recorded in the Illumina manifest
    Illumina,
}

impl Coding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Coding::Top => "top",
            Coding::Forward => "forward",
            Coding::Ab => "ab",
            Coding::Affymetrix => "affymetrix",
            Coding::Illumina => "illumina",
        }
    }
}

impl fmt::Display for Coding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during allele conversion
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodingError {
    #[error("Genotype {genotype:?} of marker '{marker}' is not in {coding} coding")]
    NotInCoding {
        marker: String,
        coding: Coding,
        genotype: [String; 2],
    },

    #[error("There's no {coding} information for marker '{marker}' in {location}")]
    MissingRepresentation {
        marker: String,
        coding: Coding,
        location: String,
    },

    #[error("Malformed alleles '{alleles}' for marker '{marker}' (expected 'X/Y')")]
    MalformedAlleles { marker: String, alleles: String },
}

pub fn is_missing(allele: &str) -> bool {
    MISSING_SENTINELS.contains(&allele)
}

/// True when exactly one of the two alleles is missing
pub fn is_half_missing(genotype: [&str; 2]) -> bool {
    is_missing(genotype[0]) != is_missing(genotype[1])
}

/// Watson-Crick complement of a base
///
/// # Mapping
/// - A ↔ T
/// - C ↔ G
pub fn complement(base: char) -> char {
    match base {
        'A' => 'T',
        'T' => 'A',
        'C' => 'G',
        'G' => 'C',
        _ => base, // separators and unknown characters are kept
    }
}

/// Complement every base of an allele string such as "A/G"
pub fn complement_alleles(alleles: &str) -> String {
    alleles.chars().map(complement).collect()
}

fn missing_pair() -> [String; 2] {
    [MISSING_ALLELE.to_string(), MISSING_ALLELE.to_string()]
}

fn split_alleles(marker: &str, alleles: &str) -> Result<[String; 2], CodingError> {
    let parts: Vec<&str> = alleles.split('/').collect();
    if parts.len() != 2 {
        return Err(CodingError::MalformedAlleles {
            marker: marker.to_string(),
            alleles: alleles.to_string(),
        });
    }
    Ok([parts[0].to_string(), parts[1].to_string()])
}

/// The two alleles of `location` in the requested coding
fn coding_alleles(
    location: &Location,
    coding: Coding,
    marker: &str,
) -> Result<[String; 2], CodingError> {
    let missing = || CodingError::MissingRepresentation {
        marker: marker.to_string(),
        coding,
        location: location.to_string(),
    };

    match coding {
        Coding::Top => split_alleles(marker, &location.illumina_top()),
        Coding::Forward => {
            split_alleles(marker, location.illumina_forward.as_deref().ok_or_else(missing)?)
        }
        Coding::Ab => Ok(["A".to_string(), "B".to_string()]),
        Coding::Affymetrix => {
            split_alleles(marker, location.affymetrix_ab.as_deref().ok_or_else(missing)?)
        }
        Coding::Illumina => split_alleles(marker, &location.illumina),
    }
}

/// Check that every called allele of `genotype` belongs to `coding`
pub fn is_coding(
    genotype: [&str; 2],
    coding: Coding,
    location: &Location,
    marker: &str,
) -> Result<bool, CodingError> {
    let alleles = coding_alleles(location, coding, marker)?;

    Ok(genotype
        .iter()
        .filter(|allele| !is_missing(allele))
        .all(|allele| alleles.iter().any(|a| a == allele)))
}

/// Map each allele positionally from one allele pair to another
fn remap(
    genotype: [&str; 2],
    from: &[String; 2],
    to: &[String; 2],
    coding: Coding,
    marker: &str,
) -> Result<[String; 2], CodingError> {
    let convert = |allele: &str| -> Result<String, CodingError> {
        if is_missing(allele) {
            return Ok(MISSING_ALLELE.to_string());
        }

        from.iter()
            .position(|a| a == allele)
            .map(|idx| to[idx].clone())
            .ok_or_else(|| CodingError::NotInCoding {
                marker: marker.to_string(),
                coding,
                genotype: [genotype[0].to_string(), genotype[1].to_string()],
            })
    };

    Ok([convert(genotype[0])?, convert(genotype[1])?])
}

/// Convert a genotype from `coding` into Illumina TOP coding
///
/// # Arguments
/// * `genotype` - Two alleles (e.g., `["T", "C"]`, `["A", "B"]`, `["0", "0"]`)
/// * `coding` - The coding the genotype is expressed in
/// * `location` - The marker location providing the allele representations
/// * `marker` - Marker name, for error reporting
///
/// # Returns
/// * `Ok([a, b])` - Genotype in TOP coding (missing alleles become "0")
/// * `Err(CodingError)` - Genotype does not belong to the declared coding
pub fn to_top(
    genotype: [&str; 2],
    coding: Coding,
    location: &Location,
    marker: &str,
) -> Result<[String; 2], CodingError> {
    if is_half_missing(genotype) {
        warn!(
            "Marker '{}' has a half-missing genotype {:?}: setting to missing",
            marker, genotype
        );
        return Ok(missing_pair());
    }

    let source = coding_alleles(location, coding, marker)?;
    let top = coding_alleles(location, Coding::Top, marker)?;

    remap(genotype, &source, &top, coding, marker)
}

/// Convert a raw Affymetrix A/B call into Illumina TOP coding
///
/// Reports lacking allele columns only carry the call letters. `A` and `B`
/// are the first and second allele of the location's affymetrix
/// representation, which must exist.
pub fn affymetrix_call_to_top(
    genotype: [&str; 2],
    location: &Location,
    marker: &str,
) -> Result<[String; 2], CodingError> {
    if is_half_missing(genotype) {
        warn!(
            "Marker '{}' has a half-missing genotype {:?}: setting to missing",
            marker, genotype
        );
        return Ok(missing_pair());
    }
    if genotype.iter().all(|allele| is_missing(allele)) {
        return Ok(missing_pair());
    }

    let ab = coding_alleles(location, Coding::Ab, marker)?;
    let affymetrix = coding_alleles(location, Coding::Affymetrix, marker)?;
    let top = coding_alleles(location, Coding::Top, marker)?;

    let [a, b] = remap(genotype, &ab, &affymetrix, Coding::Ab, marker)?;
    remap([a.as_str(), b.as_str()], &affymetrix, &top, Coding::Affymetrix, marker)
}

/// Convert a TOP genotype into `coding`. Inverse of [`to_top`]
pub fn from_top(
    genotype: [&str; 2],
    coding: Coding,
    location: &Location,
    marker: &str,
) -> Result<[String; 2], CodingError> {
    if is_half_missing(genotype) {
        return Ok(missing_pair());
    }

    let top = coding_alleles(location, Coding::Top, marker)?;
    let target = coding_alleles(location, coding, marker)?;

    remap(genotype, &top, &target, Coding::Top, marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IlluminaStrand;

    /// A/G SNP probed on the BOT strand, forward coding T/C
    fn bottom_location() -> Location {
        Location {
            version: "Oar_v3.1".to_string(),
            imported_from: "SNPchiMp v.3".to_string(),
            chrom: "15".to_string(),
            position: 5859890,
            ss_id: None,
            alleles: Some("A/G".to_string()),
            illumina: "T/C".to_string(),
            illumina_strand: Some(IlluminaStrand::Bottom),
            illumina_forward: Some("T/C".to_string()),
            affymetrix_ab: Some("T/C".to_string()),
            strand: None,
        }
    }

    /// A/C SNP on the TOP strand whose forward strand is the same
    fn top_location() -> Location {
        Location {
            version: "Oar_v3.1".to_string(),
            imported_from: "SNPchiMp v.3".to_string(),
            chrom: "1".to_string(),
            position: 105267,
            ss_id: None,
            alleles: None,
            illumina: "A/C".to_string(),
            illumina_strand: Some(IlluminaStrand::Top),
            illumina_forward: Some("A/C".to_string()),
            affymetrix_ab: Some("C/A".to_string()),
            strand: None,
        }
    }

    fn pair(a: &str, b: &str) -> [String; 2] {
        [a.to_string(), b.to_string()]
    }

    #[test]
    fn test_forward_on_bottom_strand() {
        let location = bottom_location();

        assert_eq!(
            to_top(["T", "C"], Coding::Forward, &location, "250506CS3900065000002_1238.1").unwrap(),
            pair("A", "G")
        );

        let result = to_top(["T", "C"], Coding::Top, &location, "250506CS3900065000002_1238.1");
        assert!(matches!(result, Err(CodingError::NotInCoding { .. })));
    }

    #[test]
    fn test_forward_on_top_strand_is_unchanged() {
        let location = top_location();
        assert_eq!(
            to_top(["C", "A"], Coding::Forward, &location, "OAR1_105267").unwrap(),
            pair("C", "A")
        );
    }

    #[test]
    fn test_top_is_validated_not_changed() {
        let location = bottom_location();
        assert_eq!(to_top(["G", "G"], Coding::Top, &location, "m").unwrap(), pair("G", "G"));
        assert_eq!(to_top(["G", "A"], Coding::Top, &location, "m").unwrap(), pair("G", "A"));
    }

    #[test]
    fn test_ab_coding() {
        let location = bottom_location();
        assert_eq!(to_top(["A", "B"], Coding::Ab, &location, "m").unwrap(), pair("A", "G"));
        assert_eq!(to_top(["B", "B"], Coding::Ab, &location, "m").unwrap(), pair("G", "G"));
        assert_eq!(to_top(["-", "-"], Coding::Ab, &location, "m").unwrap(), pair("0", "0"));

        let result = to_top(["A", "C"], Coding::Ab, &location, "m");
        assert!(matches!(result, Err(CodingError::NotInCoding { .. })));
    }

    #[test]
    fn test_affymetrix_coding() {
        let location = top_location();
        // affymetrix C/A against top A/C: A allele is C
        assert_eq!(
            to_top(["C", "C"], Coding::Affymetrix, &location, "m").unwrap(),
            pair("A", "A")
        );
        assert_eq!(
            to_top(["C", "A"], Coding::Affymetrix, &location, "m").unwrap(),
            pair("A", "C")
        );
    }

    #[test]
    fn test_affymetrix_call_letters() {
        let location = top_location();
        // A is the affymetrix allele C, which is TOP A
        assert_eq!(
            affymetrix_call_to_top(["A", "A"], &location, "m").unwrap(),
            pair("A", "A")
        );
        assert_eq!(
            affymetrix_call_to_top(["A", "B"], &location, "m").unwrap(),
            pair("A", "C")
        );
        assert_eq!(
            affymetrix_call_to_top(["B", "0"], &location, "m").unwrap(),
            pair("0", "0")
        );
        assert!(matches!(
            affymetrix_call_to_top(["C", "C"], &location, "m"),
            Err(CodingError::NotInCoding { .. })
        ));

        let mut location = bottom_location();
        location.affymetrix_ab = None;
        assert_eq!(
            affymetrix_call_to_top(["0", "0"], &location, "m").unwrap(),
            pair("0", "0")
        );
        assert!(matches!(
            affymetrix_call_to_top(["A", "B"], &location, "m"),
            Err(CodingError::MissingRepresentation { .. })
        ));
    }

    #[test]
    fn test_illumina_coding() {
        let location = bottom_location();
        assert_eq!(
            to_top(["C", "T"], Coding::Illumina, &location, "m").unwrap(),
            pair("G", "A")
        );
    }

    #[test]
    fn test_half_missing_is_forced_missing() {
        let location = bottom_location();
        for coding in [Coding::Top, Coding::Forward, Coding::Ab, Coding::Affymetrix] {
            assert_eq!(to_top(["0", "C"], coding, &location, "m").unwrap(), pair("0", "0"));
            assert_eq!(to_top(["A", "-"], coding, &location, "m").unwrap(), pair("0", "0"));
        }
    }

    #[test]
    fn test_missing_representation() {
        let mut location = top_location();
        location.illumina_forward = None;

        let result = to_top(["A", "C"], Coding::Forward, &location, "m");
        assert!(matches!(result, Err(CodingError::MissingRepresentation { .. })));
    }

    #[test]
    fn test_round_trip_all_states() {
        for location in [bottom_location(), top_location()] {
            let top = coding_alleles(&location, Coding::Top, "m").unwrap();
            let (a, b) = (top[0].as_str(), top[1].as_str());
            let states = [[a, a], [a, b], [b, a], [b, b], ["0", "0"]];

            for coding in [Coding::Forward, Coding::Ab, Coding::Affymetrix, Coding::Illumina] {
                for state in states {
                    let coded = from_top(state, coding, &location, "m").unwrap();
                    let back = to_top([&coded[0], &coded[1]], coding, &location, "m").unwrap();
                    assert_eq!(
                        back,
                        pair(state[0], state[1]),
                        "Failed for {:?} in {} at {}",
                        state,
                        coding,
                        location
                    );
                }
            }
        }
    }

    #[test]
    fn test_is_coding() {
        let location = bottom_location();
        assert!(is_coding(["T", "0"], Coding::Forward, &location, "m").unwrap());
        assert!(!is_coding(["A", "G"], Coding::Forward, &location, "m").unwrap());
        assert!(is_coding(["A", "B"], Coding::Ab, &location, "m").unwrap());
    }

    #[test]
    fn test_complement() {
        assert_eq!(complement_alleles("A/G"), "T/C");
        assert_eq!(complement_alleles("C/G"), "G/C");
        assert_eq!(complement('-'), '-');
    }
}

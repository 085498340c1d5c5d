// ==============================================================================
// test_support.rs - Shared Test Fixtures
// ==============================================================================
// Description: In-memory reference and sample stores seeded for unit tests
// Author: Matt Barham
// Created: 2026-09-18
// Modified: 2026-10-03
// Version: 1.0.0
// ==============================================================================

use crate::models::{Dataset, IlluminaStrand, Location, SampleType, Species};
use crate::reference_store::ReferenceStore;
use crate::sample_store::SampleStore;

pub const OLD_ASSEMBLY: (&str, &str) = ("Oar_v3.1", "SNPchiMp v.3");
pub const NEW_ASSEMBLY: (&str, &str) = ("Oar_v4.0", "SNPchiMp v.3");

pub const CHIP_NAME: &str = "AffymetrixAxiomOviCan";

pub fn location(
    assembly: (&str, &str),
    chrom: &str,
    position: u64,
    illumina: &str,
    strand: Option<IlluminaStrand>,
) -> Location {
    Location {
        version: assembly.0.to_string(),
        imported_from: assembly.1.to_string(),
        chrom: chrom.to_string(),
        position,
        ss_id: None,
        alleles: None,
        illumina: illumina.to_string(),
        illumina_strand: strand,
        illumina_forward: Some(illumina.to_string()),
        affymetrix_ab: Some(illumina.to_string()),
        strand: None,
    }
}

/// Two variants known under both assemblies:
/// - `OAR1_105267`: A/C on TOP, affymetrix C/A, probeset `AX-124359447`
/// - `s70089.1`: T/C on BOT (A/G on TOP), forward T/C
pub fn seeded_reference() -> ReferenceStore {
    let store = ReferenceStore::open_in_memory().unwrap();

    let id = store.add_variant("OAR1_105267").unwrap();
    for (assembly, position) in [(OLD_ASSEMBLY, 105267), (NEW_ASSEMBLY, 205267)] {
        let mut loc = location(assembly, "1", position, "A/C", Some(IlluminaStrand::Top));
        loc.affymetrix_ab = Some("C/A".to_string());
        store.add_location(id, &loc).unwrap();
    }
    store.add_probeset(id, CHIP_NAME, "AX-124359447").unwrap();

    let id = store.add_variant("s70089.1").unwrap();
    for (assembly, position) in [(OLD_ASSEMBLY, 5859890), (NEW_ASSEMBLY, 5870057)] {
        let loc = location(assembly, "15", position, "T/C", Some(IlluminaStrand::Bottom));
        store.add_location(id, &loc).unwrap();
    }
    store.add_probeset(id, CHIP_NAME, "AX-124359448").unwrap();

    store
}

/// A Texel dataset from Uruguay whose family id `TEXEL_UY` is an alias of
/// breed `TEX`
pub fn seeded_samples() -> (SampleStore, Dataset) {
    let store = SampleStore::open_in_memory().unwrap();

    let dataset = store
        .add_dataset(&Dataset {
            id: 0,
            file: "TEXEL_UY.zip".to_string(),
            species: Species::Sheep,
            country: "Uruguay".to_string(),
            country_code: "UY".to_string(),
            chip_name: Some("IlluminaOvineSNP50".to_string()),
            sample_type: SampleType::Background,
        })
        .unwrap();

    let breed = store.add_breed(Species::Sheep, "Texel", "TEX").unwrap();
    store
        .add_breed_alias(breed.id, "TEXEL_UY", dataset.id, Some("Uruguay"))
        .unwrap();

    (store, dataset)
}

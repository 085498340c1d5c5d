// ==============================================================================
// identity.rs - Sample, Breed and Pedigree Resolution
// ==============================================================================
// Description: Maps the family and individual ids of a genotype row to stored
//              breeds and samples, creating samples on demand
// Author: Matt Barham
// Created: 2026-09-18
// Modified: 2026-10-03
// Version: 1.1.0
// ==============================================================================

use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Breed, Dataset, Sample, SampleField, SampleRow, Sex};
use crate::reference_store::StoreError;
use crate::sample_store::{NewSample, SampleStore};

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Couldn't find breed '{fid}' in dataset {dataset}")]
    BreedNotFound { fid: String, dataset: String },

    #[error("Got {count} breeds for '{fid}' in dataset {dataset}")]
    AmbiguousBreed {
        fid: String,
        dataset: String,
        count: usize,
    },

    #[error("Got {count} samples for '{id}' ({field}) in dataset {dataset}")]
    AmbiguousSample {
        id: String,
        field: SampleField,
        dataset: String,
        count: usize,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a sample lookup
#[derive(Debug, Clone, PartialEq)]
pub enum SampleLookup {
    Found(Sample),
    Created(Sample),
    /// No stored sample and creation disabled
    Missing,
}

impl SampleLookup {
    pub fn sample(&self) -> Option<&Sample> {
        match self {
            SampleLookup::Found(sample) | SampleLookup::Created(sample) => Some(sample),
            SampleLookup::Missing => None,
        }
    }

    pub fn into_sample(self) -> Option<Sample> {
        match self {
            SampleLookup::Found(sample) | SampleLookup::Created(sample) => Some(sample),
            SampleLookup::Missing => None,
        }
    }
}

/// Parent links of a sample after pedigree resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parents {
    pub father: Option<Sample>,
    pub mother: Option<Sample>,
    /// True when the stored links were changed
    pub updated: bool,
}

impl Parents {
    pub fn father_xref(&self) -> &str {
        self.father.as_ref().map(|s| s.xref_id.as_str()).unwrap_or("0")
    }

    pub fn mother_xref(&self) -> &str {
        self.mother.as_ref().map(|s| s.xref_id.as_str()).unwrap_or("0")
    }
}

/// Resolves identities of the rows of one dataset
pub struct IdentityResolver<'a> {
    store: &'a SampleStore,
    dataset: &'a Dataset,
    field: SampleField,
    breeds: HashMap<(String, bool), Breed>,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(store: &'a SampleStore, dataset: &'a Dataset, field: SampleField) -> Self {
        Self {
            store,
            dataset,
            field,
            breeds: HashMap::new(),
        }
    }

    pub fn dataset(&self) -> &Dataset {
        self.dataset
    }

    /// Find the breed of a family id
    ///
    /// With `by_code` the family id is a breed code (FakePed sources),
    /// otherwise it is a breed alias scoped to the dataset.
    pub fn resolve_breed(&mut self, fid: &str, by_code: bool) -> Result<Breed, IdentityError> {
        let key = (fid.to_string(), by_code);
        if let Some(breed) = self.breeds.get(&key) {
            return Ok(breed.clone());
        }

        let mut breeds = if by_code {
            self.store.breeds_by_code(self.dataset.species, fid)?
        } else {
            self.store.breeds_by_alias(fid, self.dataset.id)?
        };

        let breed = match breeds.len() {
            1 => breeds.remove(0),
            0 => {
                return Err(IdentityError::BreedNotFound {
                    fid: fid.to_string(),
                    dataset: self.dataset.to_string(),
                })
            }
            count => {
                return Err(IdentityError::AmbiguousBreed {
                    fid: fid.to_string(),
                    dataset: self.dataset.to_string(),
                    count,
                })
            }
        };

        debug!("Found breed {} for '{}'", breed, fid);
        self.breeds.insert(key, breed.clone());
        Ok(breed)
    }

    /// Look up the sample of a row, creating it when allowed
    ///
    /// The lookup key is `(dataset, breed code, field == iid)`. A created
    /// sample increments the breed individual count and takes its sex from
    /// the row when known.
    pub fn get_or_create_sample(
        &self,
        row: &SampleRow,
        breed: &Breed,
        create: bool,
    ) -> Result<SampleLookup, IdentityError> {
        let mut found =
            self.store
                .find_samples(self.dataset.id, Some(&breed.code), self.field, &row.iid)?;

        match found.len() {
            1 => {
                debug!("Sample '{}' found in database", row.iid);
                Ok(SampleLookup::Found(found.remove(0)))
            }
            0 if create => {
                let sex = match Sex::from_code(&row.sex) {
                    Sex::Unknown => None,
                    sex => Some(sex),
                };

                let (original_id, alias) = match self.field {
                    SampleField::OriginalId => (row.iid.as_str(), None),
                    SampleField::Alias => (row.iid.as_str(), Some(row.iid.as_str())),
                };

                let sample = self.store.insert_sample(&NewSample {
                    original_id,
                    alias,
                    dataset: self.dataset,
                    breed,
                    sex,
                })?;
                self.store.increment_breed_individuals(breed.id)?;

                info!("Registered sample '{}' as {}", row.iid, sample.xref_id);
                Ok(SampleLookup::Created(sample))
            }
            0 => Ok(SampleLookup::Missing),
            count => Err(IdentityError::AmbiguousSample {
                id: row.iid.clone(),
                field: self.field,
                dataset: self.dataset.to_string(),
                count,
            }),
        }
    }

    /// Resolve the father and mother of a row and update the stored links
    ///
    /// Parents are searched in the same dataset with the same id field.
    /// Unknown (`0`), unresolved or ambiguous parents leave the stored link
    /// as it is.
    pub fn resolve_parents(
        &self,
        sample: &mut Sample,
        row: &SampleRow,
    ) -> Result<Parents, IdentityError> {
        let father = self.resolve_parent(&row.father, sample.father_id)?;
        let mother = self.resolve_parent(&row.mother, sample.mother_id)?;

        let father_id = father.as_ref().map(|s| s.id);
        let mother_id = mother.as_ref().map(|s| s.id);

        let updated = father_id != sample.father_id || mother_id != sample.mother_id;
        if updated {
            info!(
                "Updating pedigree of {}: father {:?} -> {:?}, mother {:?} -> {:?}",
                sample.xref_id, sample.father_id, father_id, sample.mother_id, mother_id
            );
            self.store.update_parents(sample.id, father_id, mother_id)?;
            sample.father_id = father_id;
            sample.mother_id = mother_id;
        }

        Ok(Parents {
            father,
            mother,
            updated,
        })
    }

    /// The sample a parent id points to, falling back to the stored link
    fn resolve_parent(
        &self,
        parent_id: &str,
        stored: Option<i64>,
    ) -> Result<Option<Sample>, IdentityError> {
        let stored_sample = || -> Result<Option<Sample>, IdentityError> {
            match stored {
                Some(id) => Ok(self.store.sample_by_id(id)?),
                None => Ok(None),
            }
        };

        if parent_id == "0" || parent_id.is_empty() {
            return stored_sample();
        }

        let mut found = self
            .store
            .find_samples(self.dataset.id, None, self.field, parent_id)?;

        match found.len() {
            1 => Ok(Some(found.remove(0))),
            0 => {
                warn!("Couldn't find parent '{}' in {}", parent_id, self.dataset);
                stored_sample()
            }
            count => {
                warn!(
                    "Got {} samples for parent '{}' in {}: ignoring",
                    count, parent_id, self.dataset
                );
                stored_sample()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seeded_samples;

    fn row(fid: &str, iid: &str, father: &str, mother: &str, sex: &str) -> SampleRow {
        let mut row = SampleRow::new(fid, iid, 1);
        row.father = father.to_string();
        row.mother = mother.to_string();
        row.sex = sex.to_string();
        row
    }

    #[test]
    fn test_resolve_breed_by_alias_and_code() {
        let (store, dataset) = seeded_samples();
        let mut resolver = IdentityResolver::new(&store, &dataset, SampleField::OriginalId);

        assert_eq!(resolver.resolve_breed("TEXEL_UY", false).unwrap().code, "TEX");
        assert_eq!(resolver.resolve_breed("TEX", true).unwrap().name, "Texel");

        let result = resolver.resolve_breed("TEX", false);
        assert!(matches!(result, Err(IdentityError::BreedNotFound { .. })));
    }

    #[test]
    fn test_ambiguous_breed_alias() {
        let (store, dataset) = seeded_samples();
        let merino = store
            .add_breed(dataset.species, "Merino", "MER")
            .unwrap();
        store
            .add_breed_alias(merino.id, "TEXEL_UY", dataset.id, None)
            .unwrap();

        let mut resolver = IdentityResolver::new(&store, &dataset, SampleField::OriginalId);
        let result = resolver.resolve_breed("TEXEL_UY", false);
        assert!(matches!(result, Err(IdentityError::AmbiguousBreed { count: 2, .. })));
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (store, dataset) = seeded_samples();
        let mut resolver = IdentityResolver::new(&store, &dataset, SampleField::OriginalId);
        let breed = resolver.resolve_breed("TEXEL_UY", false).unwrap();

        let first = row("TEXEL_UY", "1", "0", "0", "2");
        let second = row("TEXEL_UY", "2", "0", "0", "0");

        let created = resolver.get_or_create_sample(&first, &breed, true).unwrap();
        assert!(matches!(created, SampleLookup::Created(_)));
        assert_eq!(created.sample().unwrap().sex, Some(Sex::Female));

        resolver.get_or_create_sample(&second, &breed, true).unwrap();

        // a second import finds both samples without creating anything
        let again = resolver.get_or_create_sample(&first, &breed, false).unwrap();
        assert_eq!(again, SampleLookup::Found(created.into_sample().unwrap()));
        assert!(matches!(
            resolver.get_or_create_sample(&second, &breed, false).unwrap(),
            SampleLookup::Found(_)
        ));

        assert_eq!(store.breed_individuals(breed.id).unwrap(), 2);
        assert_eq!(store.current_sequence("sampleSheep").unwrap(), Some(2));
    }

    #[test]
    fn test_missing_sample_without_create() {
        let (store, dataset) = seeded_samples();
        let mut resolver = IdentityResolver::new(&store, &dataset, SampleField::OriginalId);
        let breed = resolver.resolve_breed("TEXEL_UY", false).unwrap();

        let lookup = resolver
            .get_or_create_sample(&row("TEXEL_UY", "99", "0", "0", "0"), &breed, false)
            .unwrap();
        assert_eq!(lookup, SampleLookup::Missing);
        assert_eq!(store.breed_individuals(breed.id).unwrap(), 0);
    }

    #[test]
    fn test_resolve_parents() {
        let (store, dataset) = seeded_samples();
        let mut resolver = IdentityResolver::new(&store, &dataset, SampleField::OriginalId);
        let breed = resolver.resolve_breed("TEXEL_UY", false).unwrap();

        let sire = resolver
            .get_or_create_sample(&row("TEXEL_UY", "sire", "0", "0", "1"), &breed, true)
            .unwrap()
            .into_sample()
            .unwrap();

        let child_row = row("TEXEL_UY", "child", "sire", "unknown_dam", "0");
        let mut child = resolver
            .get_or_create_sample(&child_row, &breed, true)
            .unwrap()
            .into_sample()
            .unwrap();

        let parents = resolver.resolve_parents(&mut child, &child_row).unwrap();
        assert!(parents.updated);
        assert_eq!(parents.father_xref(), sire.xref_id);
        assert_eq!(parents.mother_xref(), "0");
        assert_eq!(child.father_id, Some(sire.id));

        // unchanged on the second pass
        let parents = resolver.resolve_parents(&mut child, &child_row).unwrap();
        assert!(!parents.updated);

        // an unknown father keeps the stored link
        let orphan_row = row("TEXEL_UY", "child", "0", "0", "0");
        let parents = resolver.resolve_parents(&mut child, &orphan_row).unwrap();
        assert!(!parents.updated);
        assert_eq!(parents.father_xref(), sire.xref_id);
    }
}

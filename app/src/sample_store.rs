// ==============================================================================
// sample_store.rs - Sample, Breed and Dataset Database
// ==============================================================================
// Description: SQLite store of datasets, breeds with their dataset-scoped
//              aliases, samples and the per-species id sequences
// Author: Matt Barham
// Created: 2026-09-17
// Modified: 2026-10-03
// Version: 1.1.0
// ==============================================================================

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

use crate::models::{Breed, Dataset, SampleField, SampleType, Sample, Sex, Species};
use crate::reference_store::StoreError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS datasets (
        id INTEGER PRIMARY KEY,
        file TEXT NOT NULL UNIQUE,
        species TEXT NOT NULL,
        country TEXT NOT NULL,
        country_code TEXT NOT NULL DEFAULT 'UN',
        chip_name TEXT,
        sample_type TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS breeds (
        id INTEGER PRIMARY KEY,
        species TEXT NOT NULL,
        name TEXT NOT NULL,
        code TEXT NOT NULL,
        n_individuals INTEGER NOT NULL DEFAULT 0,
        UNIQUE (species, code)
    );

    CREATE TABLE IF NOT EXISTS breed_aliases (
        breed_id INTEGER NOT NULL REFERENCES breeds(id),
        fid TEXT NOT NULL,
        dataset_id INTEGER NOT NULL REFERENCES datasets(id),
        country TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_breed_aliases_lookup
        ON breed_aliases(fid, dataset_id);

    CREATE TABLE IF NOT EXISTS samples (
        id INTEGER PRIMARY KEY,
        xref_id TEXT NOT NULL UNIQUE,
        original_id TEXT NOT NULL,
        alias TEXT,
        dataset_id INTEGER NOT NULL REFERENCES datasets(id),
        species TEXT NOT NULL,
        breed TEXT NOT NULL,
        breed_code TEXT NOT NULL,
        country TEXT NOT NULL,
        sex INTEGER,
        sample_type TEXT NOT NULL,
        chip_name TEXT,
        father_id INTEGER REFERENCES samples(id),
        mother_id INTEGER REFERENCES samples(id)
    );

    CREATE INDEX IF NOT EXISTS idx_samples_original
        ON samples(dataset_id, original_id);
    CREATE INDEX IF NOT EXISTS idx_samples_alias
        ON samples(dataset_id, alias);

    CREATE TABLE IF NOT EXISTS counters (
        name TEXT PRIMARY KEY,
        sequence_value INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS audit_log (
        id TEXT PRIMARY KEY,
        timestamp TEXT NOT NULL,
        event_type TEXT NOT NULL,
        resource TEXT,
        details TEXT NOT NULL,
        severity TEXT NOT NULL
    );
";

const SAMPLE_COLUMNS: &str = "id, xref_id, original_id, alias, dataset_id, species, breed, \
     breed_code, country, sex, sample_type, chip_name, father_id, mother_id";

/// Attributes of a sample about to be inserted
#[derive(Debug, Clone)]
pub struct NewSample<'a> {
    pub original_id: &'a str,
    pub alias: Option<&'a str>,
    pub dataset: &'a Dataset,
    pub breed: &'a Breed,
    pub sex: Option<Sex>,
}

/// Cross-reference id: `<COUNTRY><SPECIES>-<BREED>-<9-digit sequence>`
pub fn xref_id(country_code: &str, species: Species, breed_code: &str, sequence: i64) -> String {
    format!(
        "{}{}-{}-{:09}",
        country_code.to_uppercase(),
        species.code(),
        breed_code,
        sequence
    )
}

/// Sample, breed and dataset database
pub struct SampleStore {
    conn: Connection,
}

impl SampleStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(|source| StoreError::Open {
            path: path.as_ref().display().to_string(),
            source,
        })?;

        let store = Self { conn };
        store.create_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.create_schema()?;
        Ok(store)
    }

    pub fn create_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        let datasets: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM datasets", [], |row| row.get(0))?;
        let samples: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;

        info!(
            "Sample database validated: {} datasets, {} samples",
            datasets, samples
        );
        Ok(())
    }

    /// Underlying connection, shared with the audit trail
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ------------------------------------------------------------------
    // Datasets
    // ------------------------------------------------------------------

    /// Register a dataset. The `id` of the argument is ignored.
    pub fn add_dataset(&self, dataset: &Dataset) -> Result<Dataset, StoreError> {
        self.conn.execute(
            "INSERT INTO datasets (file, species, country, country_code, chip_name, sample_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                dataset.file,
                dataset.species.as_str(),
                dataset.country,
                dataset.country_code,
                dataset.chip_name,
                dataset.sample_type.as_str(),
            ],
        )?;

        Ok(Dataset {
            id: self.conn.last_insert_rowid(),
            ..dataset.clone()
        })
    }

    pub fn dataset_by_file(&self, file: &str) -> Result<Option<Dataset>, StoreError> {
        let dataset = self
            .conn
            .query_row(
                "SELECT id, file, species, country, country_code, chip_name, sample_type
                 FROM datasets WHERE file = ?1",
                params![file],
                |row| {
                    Ok(Dataset {
                        id: row.get(0)?,
                        file: row.get(1)?,
                        species: species_from_row(row, 2)?,
                        country: row.get(3)?,
                        country_code: row.get(4)?,
                        chip_name: row.get(5)?,
                        sample_type: sample_type_from_row(row, 6)?,
                    })
                },
            )
            .optional()?;

        Ok(dataset)
    }

    // ------------------------------------------------------------------
    // Breeds
    // ------------------------------------------------------------------

    pub fn add_breed(&self, species: Species, name: &str, code: &str) -> Result<Breed, StoreError> {
        self.conn.execute(
            "INSERT INTO breeds (species, name, code, n_individuals) VALUES (?1, ?2, ?3, 0)",
            params![species.as_str(), name, code],
        )?;

        Ok(Breed {
            id: self.conn.last_insert_rowid(),
            species,
            name: name.to_string(),
            code: code.to_string(),
            n_individuals: 0,
        })
    }

    pub fn add_breed_alias(
        &self,
        breed_id: i64,
        fid: &str,
        dataset_id: i64,
        country: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO breed_aliases (breed_id, fid, dataset_id, country) VALUES (?1, ?2, ?3, ?4)",
            params![breed_id, fid, dataset_id, country],
        )?;
        Ok(())
    }

    /// Breeds having an alias `fid` in the given dataset
    pub fn breeds_by_alias(&self, fid: &str, dataset_id: i64) -> Result<Vec<Breed>, StoreError> {
        self.query_breeds(
            "SELECT DISTINCT b.id, b.species, b.name, b.code, b.n_individuals
             FROM breeds b JOIN breed_aliases a ON a.breed_id = b.id
             WHERE a.fid = ?1 AND a.dataset_id = ?2",
            params![fid, dataset_id],
        )
    }

    pub fn breeds_by_code(&self, species: Species, code: &str) -> Result<Vec<Breed>, StoreError> {
        self.query_breeds(
            "SELECT id, species, name, code, n_individuals
             FROM breeds WHERE species = ?1 AND code = ?2",
            params![species.as_str(), code],
        )
    }

    fn query_breeds(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Breed>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok(Breed {
                id: row.get(0)?,
                species: species_from_row(row, 1)?,
                name: row.get(2)?,
                code: row.get(3)?,
                n_individuals: row.get(4)?,
            })
        })?;

        let mut breeds = Vec::new();
        for breed in rows {
            breeds.push(breed?);
        }
        Ok(breeds)
    }

    pub fn increment_breed_individuals(&self, breed_id: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE breeds SET n_individuals = n_individuals + 1 WHERE id = ?1",
            params![breed_id],
        )?;
        Ok(())
    }

    pub fn breed_individuals(&self, breed_id: i64) -> Result<i64, StoreError> {
        let count = self.conn.query_row(
            "SELECT n_individuals FROM breeds WHERE id = ?1",
            params![breed_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Samples
    // ------------------------------------------------------------------

    /// Samples of a dataset whose `field` equals `value`, optionally
    /// restricted to one breed code
    pub fn find_samples(
        &self,
        dataset_id: i64,
        breed_code: Option<&str>,
        field: SampleField,
        value: &str,
    ) -> Result<Vec<Sample>, StoreError> {
        let sql = format!(
            "SELECT {} FROM samples
             WHERE dataset_id = ?1 AND {} = ?2 AND (?3 IS NULL OR breed_code = ?3)
             ORDER BY id",
            SAMPLE_COLUMNS,
            field.column()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![dataset_id, value, breed_code], sample_from_row)?;

        let mut samples = Vec::new();
        for sample in rows {
            samples.push(sample?);
        }
        Ok(samples)
    }

    pub fn sample_by_id(&self, id: i64) -> Result<Option<Sample>, StoreError> {
        let sql = format!("SELECT {} FROM samples WHERE id = ?1", SAMPLE_COLUMNS);
        let sample = self
            .conn
            .query_row(&sql, params![id], sample_from_row)
            .optional()?;
        Ok(sample)
    }

    pub fn samples_in_dataset(&self, dataset_id: i64) -> Result<Vec<Sample>, StoreError> {
        let sql = format!(
            "SELECT {} FROM samples WHERE dataset_id = ?1 ORDER BY id",
            SAMPLE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![dataset_id], sample_from_row)?;

        let mut samples = Vec::new();
        for sample in rows {
            samples.push(sample?);
        }
        Ok(samples)
    }

    /// Atomically increment and return the named sequence (starting at 1)
    pub fn next_sequence(&self, name: &str) -> Result<i64, StoreError> {
        let value = self.conn.query_row(
            "INSERT INTO counters (name, sequence_value) VALUES (?1, 1)
             ON CONFLICT(name) DO UPDATE SET sequence_value = sequence_value + 1
             RETURNING sequence_value",
            params![name],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    pub fn current_sequence(&self, name: &str) -> Result<Option<i64>, StoreError> {
        let value = self
            .conn
            .query_row(
                "SELECT sequence_value FROM counters WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Insert a sample with a freshly generated cross-reference id
    pub fn insert_sample(&self, new: &NewSample<'_>) -> Result<Sample, StoreError> {
        let species = new.dataset.species;
        let sequence = self.next_sequence(&sequence_name(species))?;
        let xref = xref_id(&new.dataset.country_code, species, &new.breed.code, sequence);

        self.conn.execute(
            "INSERT INTO samples (
                xref_id, original_id, alias, dataset_id, species, breed, breed_code,
                country, sex, sample_type, chip_name
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                xref,
                new.original_id,
                new.alias,
                new.dataset.id,
                species.as_str(),
                new.breed.name,
                new.breed.code,
                new.dataset.country,
                new.sex.map(|s| s.code()),
                new.dataset.sample_type.as_str(),
                new.dataset.chip_name,
            ],
        )?;

        debug!("Inserted sample {} ({})", xref, new.original_id);

        Ok(Sample {
            id: self.conn.last_insert_rowid(),
            xref_id: xref,
            original_id: new.original_id.to_string(),
            alias: new.alias.map(String::from),
            dataset_id: new.dataset.id,
            species,
            breed: new.breed.name.clone(),
            breed_code: new.breed.code.clone(),
            country: new.dataset.country.clone(),
            sex: new.sex,
            sample_type: new.dataset.sample_type,
            chip_name: new.dataset.chip_name.clone(),
            father_id: None,
            mother_id: None,
        })
    }

    pub fn update_parents(
        &self,
        sample_id: i64,
        father_id: Option<i64>,
        mother_id: Option<i64>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE samples SET father_id = ?2, mother_id = ?3 WHERE id = ?1",
            params![sample_id, father_id, mother_id],
        )?;
        Ok(())
    }
}

/// Counter holding the cross-reference sequence of a species
pub fn sequence_name(species: Species) -> String {
    format!("sample{}", species.as_str())
}

fn conversion_error(column: usize, value: &str, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Unknown {} '{}'", what, value),
        )),
    )
}

fn species_from_row(row: &Row<'_>, column: usize) -> rusqlite::Result<Species> {
    let value: String = row.get(column)?;
    Species::parse(&value).ok_or_else(|| conversion_error(column, &value, "species"))
}

fn sample_type_from_row(row: &Row<'_>, column: usize) -> rusqlite::Result<SampleType> {
    let value: String = row.get(column)?;
    SampleType::parse(&value).ok_or_else(|| conversion_error(column, &value, "sample type"))
}

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<Sample> {
    Ok(Sample {
        id: row.get(0)?,
        xref_id: row.get(1)?,
        original_id: row.get(2)?,
        alias: row.get(3)?,
        dataset_id: row.get(4)?,
        species: species_from_row(row, 5)?,
        breed: row.get(6)?,
        breed_code: row.get(7)?,
        country: row.get(8)?,
        sex: row.get::<_, Option<i64>>(9)?.map(Sex::from_db),
        sample_type: sample_type_from_row(row, 10)?,
        chip_name: row.get(11)?,
        father_id: row.get(12)?,
        mother_id: row.get(13)?,
    })
}

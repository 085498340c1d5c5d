// ==============================================================================
// reference_store.rs - Reference Variant Database
// ==============================================================================
// Description: SQLite store of curated variants, their locations under each
//              assembly and their chip-scoped probeset ids
// Author: Matt Barham
// Created: 2026-09-16
// Modified: 2026-10-02
// Version: 1.1.0
// ==============================================================================
// Schema:
//   variants(id, name)
//   locations(variant_id, version, imported_from, chrom, position, illumina,
//             illumina_strand, illumina_forward, affymetrix_ab, alleles,
//             strand, ss_id)
//   probesets(variant_id, chip_name, probeset_id)
// ==============================================================================

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::models::{AssemblyRef, IlluminaStrand, Location};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to open database {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Invalid value '{value}' in column {column}")]
    InvalidValue { column: String, value: String },
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS variants (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS locations (
        variant_id INTEGER NOT NULL REFERENCES variants(id),
        version TEXT NOT NULL,
        imported_from TEXT NOT NULL,
        chrom TEXT NOT NULL,
        position INTEGER NOT NULL,
        illumina TEXT NOT NULL,
        illumina_strand TEXT,
        illumina_forward TEXT,
        affymetrix_ab TEXT,
        alleles TEXT,
        strand TEXT,
        ss_id TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_locations_variant
        ON locations(variant_id, version, imported_from);
    CREATE INDEX IF NOT EXISTS idx_locations_position
        ON locations(version, imported_from, chrom, position);

    CREATE TABLE IF NOT EXISTS probesets (
        variant_id INTEGER NOT NULL REFERENCES variants(id),
        chip_name TEXT NOT NULL,
        probeset_id TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_probesets_lookup
        ON probesets(chip_name, probeset_id);
";

const LOCATION_COLUMNS: [&str; 11] = [
    "version",
    "imported_from",
    "chrom",
    "position",
    "illumina",
    "illumina_strand",
    "illumina_forward",
    "affymetrix_ab",
    "alleles",
    "strand",
    "ss_id",
];

/// How a source marker is looked up in the store
#[derive(Debug, Clone, PartialEq)]
pub enum VariantQuery<'a> {
    /// Canonical variant name
    Name(&'a str),
    /// Probeset id on a given chip
    Probeset { chip_name: &'a str, probeset_id: &'a str },
    /// Chromosome and position under the source assembly
    Position { chrom: &'a str, position: u64 },
}

/// A variant found under both the source and destination assemblies
#[derive(Debug, Clone, PartialEq)]
pub struct VariantMatch {
    pub name: String,
    pub src: Location,
    pub dst: Location,
}

/// Reference variant database
pub struct ReferenceStore {
    conn: Connection,
}

impl ReferenceStore {
    /// Open reference database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(|source| StoreError::Open {
            path: path.as_ref().display().to_string(),
            source,
        })?;

        Ok(Self { conn })
    }

    /// Empty store with the schema in place
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

    /// Check that the database carries the expected tables
    pub fn validate(&self) -> Result<(), StoreError> {
        let variants: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM variants", [], |row| row.get(0))?;
        let locations: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))?;
        self.conn
            .query_row("SELECT COUNT(*) FROM probesets", [], |row| row.get::<_, i64>(0))?;

        info!(
            "Reference database validated: {} variants, {} locations",
            variants, locations
        );

        Ok(())
    }

    /// Insert a variant, returning its id
    pub fn add_variant(&self, name: &str) -> Result<i64, StoreError> {
        self.conn
            .execute("INSERT INTO variants (name) VALUES (?1)", params![name])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn add_location(&self, variant_id: i64, location: &Location) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO locations (
                variant_id, version, imported_from, chrom, position, illumina,
                illumina_strand, illumina_forward, affymetrix_ab, alleles, strand, ss_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                variant_id,
                location.version,
                location.imported_from,
                location.chrom,
                to_sql_position(location.position)?,
                location.illumina,
                location.illumina_strand.map(|s| s.as_str()),
                location.illumina_forward,
                location.affymetrix_ab,
                location.alleles,
                location.strand,
                location.ss_id,
            ],
        )?;
        Ok(())
    }

    pub fn add_probeset(
        &self,
        variant_id: i64,
        chip_name: &str,
        probeset_id: &str,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO probesets (variant_id, chip_name, probeset_id) VALUES (?1, ?2, ?3)",
            params![variant_id, chip_name, probeset_id],
        )?;
        Ok(())
    }

    /// Every variant matching `query` that has a location under both
    /// assemblies. Issues a single query; callers treat anything other than
    /// exactly one match as unresolved.
    pub fn find_variants(
        &self,
        query: &VariantQuery<'_>,
        src: &AssemblyRef,
        dst: &AssemblyRef,
    ) -> Result<Vec<VariantMatch>, StoreError> {
        let columns = |alias: &str| {
            LOCATION_COLUMNS
                .iter()
                .map(|c| format!("{}.{}", alias, c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut args = vec![
            Value::Text(src.version.clone()),
            Value::Text(src.imported_from.clone()),
            Value::Text(dst.version.clone()),
            Value::Text(dst.imported_from.clone()),
        ];

        let (join, filter) = match query {
            VariantQuery::Name(name) => {
                args.push(Value::Text(name.to_string()));
                ("", "v.name = ?5")
            }
            VariantQuery::Probeset {
                chip_name,
                probeset_id,
            } => {
                args.push(Value::Text(chip_name.to_string()));
                args.push(Value::Text(probeset_id.to_string()));
                (
                    "JOIN probesets p ON p.variant_id = v.id",
                    "p.chip_name = ?5 AND p.probeset_id = ?6",
                )
            }
            VariantQuery::Position { chrom, position } => {
                args.push(Value::Text(chrom.to_string()));
                args.push(Value::Integer(to_sql_position(*position)?));
                ("", "s.chrom = ?5 AND s.position = ?6")
            }
        };

        let sql = format!(
            "SELECT DISTINCT v.id, v.name, {src_cols}, {dst_cols}
             FROM variants v
             {join}
             JOIN locations s
               ON s.variant_id = v.id AND s.version = ?1 AND s.imported_from = ?2
             JOIN locations d
               ON d.variant_id = v.id AND d.version = ?3 AND d.imported_from = ?4
             WHERE {filter}",
            src_cols = columns("s"),
            dst_cols = columns("d"),
            join = join,
            filter = filter,
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok(VariantMatch {
                name: row.get(1)?,
                src: location_from_row(row, 2)?,
                dst: location_from_row(row, 2 + LOCATION_COLUMNS.len())?,
            })
        })?;

        let mut matches = Vec::new();
        for variant in rows {
            matches.push(variant?);
        }

        Ok(matches)
    }
}

fn to_sql_position(position: u64) -> Result<i64, StoreError> {
    i64::try_from(position).map_err(|_| StoreError::InvalidValue {
        column: "position".to_string(),
        value: position.to_string(),
    })
}

/// Read the location columns starting at `offset`
fn location_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Location> {
    let position: i64 = row.get(offset + 3)?;
    let position = u64::try_from(position).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            offset + 3,
            rusqlite::types::Type::Integer,
            Box::new(e),
        )
    })?;

    let strand: Option<String> = row.get(offset + 5)?;
    let illumina_strand = match strand.as_deref() {
        None | Some("") => None,
        Some(value) => Some(IlluminaStrand::parse(value).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                offset + 5,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Unknown illumina strand '{}'", value),
                )),
            )
        })?),
    };

    Ok(Location {
        version: row.get(offset)?,
        imported_from: row.get(offset + 1)?,
        chrom: row.get(offset + 2)?,
        position,
        illumina: row.get(offset + 4)?,
        illumina_strand,
        illumina_forward: row.get(offset + 6)?,
        affymetrix_ab: row.get(offset + 7)?,
        alleles: row.get(offset + 8)?,
        strand: row.get(offset + 9)?,
        ss_id: row.get(offset + 10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{location, NEW_ASSEMBLY, OLD_ASSEMBLY};

    fn assemblies() -> (AssemblyRef, AssemblyRef) {
        (
            AssemblyRef::new(OLD_ASSEMBLY.0, OLD_ASSEMBLY.1),
            AssemblyRef::new(NEW_ASSEMBLY.0, NEW_ASSEMBLY.1),
        )
    }

    fn seeded() -> ReferenceStore {
        let store = ReferenceStore::open_in_memory().unwrap();

        let id = store.add_variant("OAR1_105267").unwrap();
        store.add_location(id, &location(OLD_ASSEMBLY, "1", 105267, "A/C", None)).unwrap();
        store.add_location(id, &location(NEW_ASSEMBLY, "1", 205267, "A/C", None)).unwrap();
        store.add_probeset(id, "AffymetrixAxiomOviCan", "AX-124359447").unwrap();

        // only known under the old assembly
        let id = store.add_variant("OAR1_999").unwrap();
        store.add_location(id, &location(OLD_ASSEMBLY, "1", 999, "A/G", None)).unwrap();

        store
    }

    #[test]
    fn test_find_by_name() {
        let store = seeded();
        let (src, dst) = assemblies();

        let matches = store
            .find_variants(&VariantQuery::Name("OAR1_105267"), &src, &dst)
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].src.position, 105267);
        assert_eq!(matches[0].dst.position, 205267);
    }

    #[test]
    fn test_missing_destination_is_no_match() {
        let store = seeded();
        let (src, dst) = assemblies();

        let matches = store
            .find_variants(&VariantQuery::Name("OAR1_999"), &src, &dst)
            .unwrap();
        assert!(matches.is_empty());

        let matches = store
            .find_variants(&VariantQuery::Name("OAR1_999"), &src, &src)
            .unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_find_by_probeset_and_position() {
        let store = seeded();
        let (src, dst) = assemblies();

        let query = VariantQuery::Probeset {
            chip_name: "AffymetrixAxiomOviCan",
            probeset_id: "AX-124359447",
        };
        let matches = store.find_variants(&query, &src, &dst).unwrap();
        assert_eq!(matches[0].name, "OAR1_105267");

        let query = VariantQuery::Position {
            chrom: "1",
            position: 105267,
        };
        let matches = store.find_variants(&query, &src, &dst).unwrap();
        assert_eq!(matches[0].name, "OAR1_105267");
    }

    #[test]
    fn test_strand_round_trip() {
        let store = ReferenceStore::open_in_memory().unwrap();
        let (src, _) = assemblies();

        let id = store.add_variant("s70089.1").unwrap();
        store
            .add_location(
                id,
                &location(OLD_ASSEMBLY, "15", 5859890, "T/C", Some(IlluminaStrand::Bottom)),
            )
            .unwrap();

        let matches = store
            .find_variants(&VariantQuery::Name("s70089.1"), &src, &src)
            .unwrap();
        assert_eq!(matches[0].src.illumina_top(), "A/G");
    }

    #[test]
    fn test_validate() {
        assert!(seeded().validate().is_ok());

        let conn_only = ReferenceStore {
            conn: Connection::open_in_memory().unwrap(),
        };
        assert!(conn_only.validate().is_err());
    }
}

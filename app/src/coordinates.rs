// ==============================================================================
// coordinates.rs - Marker Coordinate Resolution
// ==============================================================================
// Description: Resolves each source marker against the reference store under
//              the source and destination assemblies
// Author: Matt Barham
// Created: 2026-09-16
// Modified: 2026-10-02
// Version: 1.1.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{AssemblyRef, Location, MarkerRecord};
use crate::reference_store::{ReferenceStore, StoreError, VariantQuery};

/// Marker attribute used to find the variant in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SearchKey {
    /// Variant name
    Name,
    /// Chip-scoped probeset id (requires a chip name)
    ProbesetId,
    /// Chromosome and position under the source assembly
    Position,
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("A chip name is required to search markers by probeset id")]
    MissingChipName,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterReason {
    /// No variant with a location under both assemblies
    NotFound,
    /// More than one candidate variant
    Ambiguous(usize),
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterReason::NotFound => f.write_str("not found"),
            FilterReason::Ambiguous(n) => write!(f, "{} candidate variants", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkerResolution {
    Resolved {
        src: Location,
        dst: Location,
        /// Canonical variant name from the store
        name: String,
    },
    Filtered(FilterReason),
}

impl MarkerResolution {
    pub fn is_filtered(&self) -> bool {
        matches!(self, MarkerResolution::Filtered(_))
    }
}

/// One resolution per source marker, indexed like the marker list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionTable {
    entries: Vec<MarkerResolution>,
}

impl ResolutionTable {
    pub fn new(entries: Vec<MarkerResolution>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolved markers as `(index, src, dst, name)`, in marker order
    pub fn resolved(&self) -> impl Iterator<Item = (usize, &Location, &Location, &str)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| match entry {
                MarkerResolution::Resolved { src, dst, name } => {
                    Some((idx, src, dst, name.as_str()))
                }
                MarkerResolution::Filtered(_) => None,
            })
    }

    pub fn src_locations(&self) -> Vec<Option<&Location>> {
        self.entries
            .iter()
            .map(|entry| match entry {
                MarkerResolution::Resolved { src, .. } => Some(src),
                MarkerResolution::Filtered(_) => None,
            })
            .collect()
    }

    pub fn dst_locations(&self) -> Vec<Option<&Location>> {
        self.entries
            .iter()
            .map(|entry| match entry {
                MarkerResolution::Resolved { dst, .. } => Some(dst),
                MarkerResolution::Filtered(_) => None,
            })
            .collect()
    }

    pub fn marker_names(&self) -> Vec<Option<&str>> {
        self.entries
            .iter()
            .map(|entry| match entry {
                MarkerResolution::Resolved { name, .. } => Some(name.as_str()),
                MarkerResolution::Filtered(_) => None,
            })
            .collect()
    }

    /// Indices of filtered markers, ascending
    pub fn filtered_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_filtered())
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn n_filtered(&self) -> usize {
        self.entries.iter().filter(|e| e.is_filtered()).count()
    }

    pub fn n_resolved(&self) -> usize {
        self.len() - self.n_filtered()
    }
}

/// Resolve every marker against the reference store
///
/// # Arguments
/// * `store` - Reference variant database
/// * `markers` - Source markers, in file order
/// * `src` - Assembly the source coordinates refer to
/// * `dst` - Target assembly (defaults to `src`)
/// * `search` - Marker attribute used for the lookup
/// * `chip_name` - Chip scope of probeset ids
///
/// # Returns
/// A table with one entry per marker. Markers with zero or several
/// candidates are filtered; ambiguity is never broken arbitrarily.
pub fn resolve(
    store: &ReferenceStore,
    markers: &[MarkerRecord],
    src: &AssemblyRef,
    dst: Option<&AssemblyRef>,
    search: SearchKey,
    chip_name: Option<&str>,
) -> Result<ResolutionTable, ResolveError> {
    if search == SearchKey::ProbesetId && chip_name.is_none() {
        return Err(ResolveError::MissingChipName);
    }

    let dst = dst.unwrap_or(src);
    info!(
        "Resolving {} markers from {} to {} by {:?}",
        markers.len(),
        src,
        dst,
        search
    );

    let mut entries = Vec::with_capacity(markers.len());

    for (idx, marker) in markers.iter().enumerate() {
        let query = match search {
            SearchKey::Name => VariantQuery::Name(&marker.name),
            SearchKey::ProbesetId => VariantQuery::Probeset {
                chip_name: chip_name.ok_or(ResolveError::MissingChipName)?,
                probeset_id: &marker.name,
            },
            SearchKey::Position => VariantQuery::Position {
                chrom: &marker.chrom,
                position: marker.position,
            },
        };

        let mut matches = store.find_variants(&query, src, dst)?;

        let entry = match matches.len() {
            1 => {
                let found = matches.remove(0);
                debug!("Marker {} '{}' resolved as '{}'", idx, marker.name, found.name);
                MarkerResolution::Resolved {
                    src: found.src,
                    dst: found.dst,
                    name: found.name,
                }
            }
            0 => {
                warn!("Couldn't find marker '{}' in {}: ignoring it", marker.name, src);
                MarkerResolution::Filtered(FilterReason::NotFound)
            }
            n => {
                warn!(
                    "Marker '{}' matches {} variants in {}: ignoring it",
                    marker.name, n, src
                );
                MarkerResolution::Filtered(FilterReason::Ambiguous(n))
            }
        };

        entries.push(entry);
    }

    let table = ResolutionTable::new(entries);
    info!(
        "Resolved {} of {} markers ({} filtered)",
        table.n_resolved(),
        table.len(),
        table.n_filtered()
    );

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{location, seeded_reference, NEW_ASSEMBLY, OLD_ASSEMBLY};

    fn old() -> AssemblyRef {
        AssemblyRef::new(OLD_ASSEMBLY.0, OLD_ASSEMBLY.1)
    }

    fn new() -> AssemblyRef {
        AssemblyRef::new(NEW_ASSEMBLY.0, NEW_ASSEMBLY.1)
    }

    fn markers() -> Vec<MarkerRecord> {
        vec![
            MarkerRecord::new("1", "OAR1_105267", 0.0, 105267),
            MarkerRecord::new("1", "MISSING_MARKER", 0.0, 1),
            MarkerRecord::new("15", "s70089.1", 0.0, 5859890),
        ]
    }

    #[test]
    fn test_resolve_by_name_filters_unknown() {
        let store = seeded_reference();
        let table = resolve(&store, &markers(), &old(), Some(&new()), SearchKey::Name, None).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.filtered_indices(), vec![1]);
        assert_eq!(
            table.entries[1],
            MarkerResolution::Filtered(FilterReason::NotFound)
        );
        assert_eq!(
            table.marker_names(),
            vec![Some("OAR1_105267"), None, Some("s70089.1")]
        );

        let dst = table.dst_locations();
        assert_eq!(dst[0].map(|l| l.position), Some(205267));
        assert!(dst[1].is_none());
    }

    #[test]
    fn test_destination_defaults_to_source() {
        let store = seeded_reference();
        let table = resolve(&store, &markers(), &old(), None, SearchKey::Name, None).unwrap();

        let src = table.src_locations();
        let dst = table.dst_locations();
        assert_eq!(src[0], dst[0]);
        assert_eq!(dst[0].map(|l| l.position), Some(105267));
    }

    #[test]
    fn test_ambiguous_is_filtered() {
        let store = seeded_reference();
        let twin = store.add_variant("OAR1_105267_twin").unwrap();
        store
            .add_location(twin, &location(OLD_ASSEMBLY, "1", 105267, "A/C", None))
            .unwrap();

        let markers = vec![MarkerRecord::new("1", "anything", 0.0, 105267)];
        let table = resolve(&store, &markers, &old(), None, SearchKey::Position, None).unwrap();

        assert_eq!(
            table.entries[0],
            MarkerResolution::Filtered(FilterReason::Ambiguous(2))
        );
    }

    #[test]
    fn test_probeset_requires_chip() {
        let store = seeded_reference();
        let markers = vec![MarkerRecord::new("0", "AX-124359447", 0.0, 0)];

        let result = resolve(&store, &markers, &old(), None, SearchKey::ProbesetId, None);
        assert!(matches!(result, Err(ResolveError::MissingChipName)));

        let table = resolve(
            &store,
            &markers,
            &old(),
            None,
            SearchKey::ProbesetId,
            Some("AffymetrixAxiomOviCan"),
        )
        .unwrap();
        assert_eq!(table.marker_names(), vec![Some("OAR1_105267")]);
    }

    #[test]
    fn test_resolved_iterator_keeps_indices() {
        let store = seeded_reference();
        let table = resolve(&store, &markers(), &old(), None, SearchKey::Name, None).unwrap();

        let indices: Vec<usize> = table.resolved().map(|(idx, ..)| idx).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(table.n_resolved(), 2);
    }
}

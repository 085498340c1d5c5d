// ==============================================================================
// text_plink.rs - PLINK Text (MAP/PED) Reader
// ==============================================================================
// Description: Reads markers from a .map file and samples from a .ped file
// Author: Matt Barham
// Created: 2026-09-19
// Modified: 2026-10-04
// Version: 1.0.0
// ==============================================================================
// Format:
//   .map  chrom  name  cM  position            (one marker per line)
//   .ped  fid iid father mother sex phenotype a1 a2 a1 a2 ...
//   Both whitespace delimited, optionally gzip compressed
// ==============================================================================

use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{
    family_id, open_text, prefixed, FakePed, GenotypeSource, RowStream, SampleId, SourceError,
};
use crate::models::{MarkerRecord, SampleRow};

/// PLINK text file pair
pub struct TextPlink {
    map_path: PathBuf,
    ped_path: PathBuf,
    markers: Option<Vec<MarkerRecord>>,
}

impl TextPlink {
    /// Files `<prefix>.map` and `<prefix>.ped`
    pub fn new(prefix: impl AsRef<Path>) -> Self {
        let prefix = prefix.as_ref();
        Self::with_paths(prefixed(prefix, "map"), prefixed(prefix, "ped"))
    }

    pub fn with_paths(map_path: impl Into<PathBuf>, ped_path: impl Into<PathBuf>) -> Self {
        Self {
            map_path: map_path.into(),
            ped_path: ped_path.into(),
            markers: None,
        }
    }

    fn parse_map_line(&self, line: &str, line_number: usize) -> Result<MarkerRecord, SourceError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(SourceError::format(
                &self.map_path,
                line_number,
                format!("expected 4 columns, found {}", fields.len()),
            ));
        }

        let cm = fields[2].parse::<f64>().map_err(|_| {
            SourceError::format(&self.map_path, line_number, format!("invalid cM '{}'", fields[2]))
        })?;
        let position = fields[3].parse::<u64>().map_err(|_| {
            SourceError::format(
                &self.map_path,
                line_number,
                format!("invalid position '{}'", fields[3]),
            )
        })?;

        Ok(MarkerRecord::new(fields[0], fields[1], cm, position))
    }

    fn parse_ped_line(
        &self,
        line: &str,
        line_number: usize,
        n_markers: usize,
    ) -> Result<SampleRow, SourceError> {
        let fields: Vec<String> = line.split_whitespace().map(String::from).collect();
        let found = fields.len();

        SampleRow::from_fields(fields, n_markers).ok_or_else(|| {
            SourceError::format(
                &self.ped_path,
                line_number,
                format!(
                    "expected {} fields ({} markers), found {}",
                    SampleRow::expected_fields(n_markers),
                    n_markers,
                    found
                ),
            )
        })
    }
}

impl GenotypeSource for TextPlink {
    fn describe(&self) -> String {
        format!("PLINK text {}", self.ped_path.display())
    }

    fn input_paths(&self) -> Vec<PathBuf> {
        vec![self.map_path.clone(), self.ped_path.clone()]
    }

    fn read_markers(&mut self) -> Result<usize, SourceError> {
        let reader = open_text(&self.map_path)?;
        let mut markers = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(SourceError::io(&self.map_path))?;
            if line.trim().is_empty() {
                continue;
            }
            markers.push(self.parse_map_line(&line, idx + 1)?);
        }

        info!("Read {} markers from {}", markers.len(), self.map_path.display());
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
        let n_markers = self
            .markers
            .as_ref()
            .map(Vec::len)
            .ok_or_else(|| SourceError::MarkersNotRead(self.map_path.clone()))?;

        let reader = open_text(&self.ped_path)?;
        debug!("Streaming rows from {}", self.ped_path.display());

        let rows = reader
            .lines()
            .enumerate()
            .filter(|(_, line)| line.as_ref().map(|l| !l.trim().is_empty()).unwrap_or(true))
            .map(move |(idx, line)| {
                let line = line.map_err(SourceError::io(&self.ped_path))?;
                let mut row = self.parse_ped_line(&line, idx + 1, n_markers)?;
                row.fid = family_id(fake_ped, Some(&row.fid), &row.iid, &self.ped_path)?;
                Ok(row)
            });

        Ok(Box::new(rows))
    }

    fn list_sample_ids(&self) -> Result<Vec<SampleId>, SourceError> {
        let reader = open_text(&self.ped_path)?;
        let mut ids = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(SourceError::io(&self.ped_path))?;
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(fid), Some(iid)) => ids.push(SampleId {
                    fid: Some(fid.to_string()),
                    iid: iid.to_string(),
                }),
                (None, _) => continue,
                (Some(_), None) => {
                    return Err(SourceError::format(&self.ped_path, idx + 1, "missing individual id"))
                }
            }
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn create_test_files(dir: &Path, map: &str, ped: &str) -> PathBuf {
        let prefix = dir.join("test");
        fs::write(prefix.with_extension("map"), map).unwrap();
        fs::write(prefix.with_extension("ped"), ped).unwrap();
        prefix
    }

    #[test]
    fn test_read_markers_and_rows() {
        let dir = tempdir().unwrap();
        let prefix = create_test_files(
            dir.path(),
            "1\tOAR1_105267\t0\t105267\n15\ts70089.1\t0.5\t5859890\n",
            "TEXEL_UY 1 0 0 1 -9 A C T C\nTEXEL_UY 2 1 0 2 -9 0 0 C C\n",
        );

        let mut plink = TextPlink::new(&prefix);
        assert_eq!(plink.read_markers().unwrap(), 2);
        assert_eq!(plink.markers()[1].cm, 0.5);

        let rows: Vec<SampleRow> = plink
            .stream_rows(None)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].allele_pair(1), ["T", "C"]);
        assert_eq!(rows[1].father, "1");
    }

    #[test]
    fn test_wrong_field_count_is_fatal() {
        let dir = tempdir().unwrap();
        let prefix = create_test_files(
            dir.path(),
            "1 OAR1_105267 0 105267\n",
            "TEXEL_UY 1 0 0 1 -9 A C\nTEXEL_UY 2 0 0 1 -9 A\n",
        );

        let mut plink = TextPlink::new(&prefix);
        plink.read_markers().unwrap();

        let results: Vec<_> = plink.stream_rows(None).unwrap().collect();
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(SourceError::InvalidFormat { line: 2, .. })
        ));
    }

    #[test]
    fn test_rows_require_markers() {
        let dir = tempdir().unwrap();
        let prefix = create_test_files(dir.path(), "", "");

        let plink = TextPlink::new(&prefix);
        assert!(matches!(
            plink.stream_rows(None),
            Err(SourceError::MarkersNotRead(_))
        ));
    }

    #[test]
    fn test_fake_ped_replaces_family() {
        let dir = tempdir().unwrap();
        let prefix = create_test_files(
            dir.path(),
            "1 OAR1_105267 0 105267\n",
            "0 AX001 0 0 0 -9 A C\n",
        );

        let mut plink = TextPlink::new(&prefix);
        plink.read_markers().unwrap();

        let fake = FakePed::Breed("TEX".to_string());
        let row = plink.stream_rows(Some(&fake)).unwrap().next().unwrap().unwrap();
        assert_eq!(row.fid, "TEX");
        assert_eq!(row.iid, "AX001");
    }

    #[test]
    fn test_list_sample_ids() {
        let dir = tempdir().unwrap();
        let prefix = create_test_files(
            dir.path(),
            "1 OAR1_105267 0 105267\n",
            "TEXEL_UY 1 0 0 1 -9 A C\n\nTEXEL_UY 2 0 0 1 -9 A A\n",
        );

        let ids = TextPlink::new(&prefix).list_sample_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[1].to_string(), "TEXEL_UY\t2");
    }
}

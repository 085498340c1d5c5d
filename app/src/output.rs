// ==============================================================================
// output.rs - PLINK Output and Run Summary
// ==============================================================================
// Description: Writes the reconciled MAP/PED pair and the JSON run summary
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-10-14
// Version: 2.1.0
// ==============================================================================
// Files are written as `<name>.partial` and renamed into place by
// `PlinkWriter::finish`. A writer dropped before finishing removes its
// partial files, so a failed run leaves no output behind.
// ==============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::allele_coding::Coding;
use crate::coordinates::ResolutionTable;
use crate::models::{AssemblyRef, MarkerRecord, SampleRow};
use crate::validator::ValidatedInput;

const PARTIAL_SUFFIX: &str = "partial";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// MAP lines of the retained markers: destination chromosome, canonical
/// name, cM and destination position
pub fn map_lines(markers: &[MarkerRecord], table: &ResolutionTable) -> Vec<String> {
    table
        .resolved()
        .map(|(idx, _, dst, name)| {
            let cm = markers.get(idx).map(|m| m.cm).unwrap_or(0.0);
            format!("{} {} {} {}", dst.chrom, name, cm, dst.position)
        })
        .collect()
}

/// Final paths of a finished PLINK output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlinkOutput {
    pub map_path: PathBuf,
    pub ped_path: PathBuf,
    pub n_markers: usize,
    pub n_rows: usize,
}

/// PLINK text writer with all-or-nothing semantics
pub struct PlinkWriter {
    map_path: PathBuf,
    ped_path: PathBuf,
    map_partial: PathBuf,
    ped_partial: PathBuf,
    ped: BufWriter<File>,
    n_markers: Option<usize>,
    n_rows: usize,
    finished: bool,
}

impl PlinkWriter {
    /// Start writing `<prefix>.map` and `<prefix>.ped`
    pub fn create(prefix: &Path) -> Result<Self> {
        if let Some(parent) = prefix.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory {:?}", parent))?;
        }

        let map_path = with_suffix(prefix, "map");
        let ped_path = with_suffix(prefix, "ped");
        let map_partial = with_suffix(&map_path, PARTIAL_SUFFIX);
        let ped_partial = with_suffix(&ped_path, PARTIAL_SUFFIX);

        let file = File::create(&ped_partial)
            .with_context(|| format!("Failed to create PED file {:?}", ped_partial))?;

        debug!("Writing PLINK output to {:?}", ped_partial);

        Ok(Self {
            map_path,
            ped_path,
            map_partial,
            ped_partial,
            ped: BufWriter::new(file),
            n_markers: None,
            n_rows: 0,
            finished: false,
        })
    }

    pub fn write_row(&mut self, row: &SampleRow) -> Result<()> {
        writeln!(self.ped, "{}", row).context("Failed to write PED row")?;
        self.n_rows += 1;
        Ok(())
    }

    /// Write the MAP of the retained markers
    pub fn write_map(&mut self, markers: &[MarkerRecord], table: &ResolutionTable) -> Result<usize> {
        let lines = map_lines(markers, table);

        let file = File::create(&self.map_partial)
            .with_context(|| format!("Failed to create MAP file {:?}", self.map_partial))?;
        let mut writer = BufWriter::new(file);
        for line in &lines {
            writeln!(writer, "{}", line)?;
        }
        writer.flush().context("Failed to write MAP file")?;

        self.n_markers = Some(lines.len());
        Ok(lines.len())
    }

    /// Flush and move the partial files into place
    pub fn finish(mut self) -> Result<PlinkOutput> {
        let n_markers = self
            .n_markers
            .ok_or_else(|| anyhow::anyhow!("MAP file was not written"))?;

        self.ped.flush().context("Failed to flush PED file")?;

        fs::rename(&self.ped_partial, &self.ped_path)
            .with_context(|| format!("Failed to move {:?} into place", self.ped_partial))?;

        if let Err(e) = fs::rename(&self.map_partial, &self.map_path) {
            // put the PED back so that drop removes both partial files
            if let Err(restore) = fs::rename(&self.ped_path, &self.ped_partial) {
                warn!("Failed to withdraw {:?}: {}", self.ped_path, restore);
            }
            return Err(e)
                .with_context(|| format!("Failed to move {:?} into place", self.map_partial));
        }
        self.finished = true;

        info!(
            "PLINK output complete: {} markers, {} samples in {:?}",
            n_markers, self.n_rows, self.ped_path
        );

        Ok(PlinkOutput {
            map_path: self.map_path.clone(),
            ped_path: self.ped_path.clone(),
            n_markers,
            n_rows: self.n_rows,
        })
    }
}

impl Drop for PlinkWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        for path in [&self.map_partial, &self.ped_partial] {
            if path.exists() {
                if let Err(e) = fs::remove_file(path) {
                    warn!("Failed to remove partial output {:?}: {}", path, e);
                }
            }
        }
    }
}

/// Counters collected during a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunCounts {
    pub markers: usize,
    pub markers_resolved: usize,
    pub markers_filtered: usize,
    pub rows_read: usize,
    pub rows_written: usize,
    pub rows_skipped: usize,
    pub samples_created: usize,
    pub pedigree_updates: usize,
    pub half_missing: usize,
    pub coding_errors_ignored: usize,
    /// Raw A/B calls of markers without affymetrix alleles, written as missing
    pub ab_calls_unresolved: usize,
}

/// JSON report of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source: String,
    pub inputs: Vec<ValidatedInput>,
    pub dataset: Option<String>,
    pub coding: Coding,
    pub src_assembly: AssemblyRef,
    pub dst_assembly: AssemblyRef,
    pub counts: RunCounts,
    pub output: PlinkOutput,
}

impl RunSummary {
    /// Summary file of an output prefix: `<prefix>.summary.json`
    pub fn path_for(prefix: &Path) -> PathBuf {
        with_suffix(prefix, "summary.json")
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create summary file {:?}", path))?;

        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .context("Failed to write run summary")?;

        info!("Run summary written to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::{FilterReason, MarkerResolution};
    use crate::test_support::{location, NEW_ASSEMBLY, OLD_ASSEMBLY};
    use tempfile::tempdir;

    fn table() -> (Vec<MarkerRecord>, ResolutionTable) {
        let markers = vec![
            MarkerRecord::new("1", "src_a", 0.0, 100),
            MarkerRecord::new("1", "src_b", 0.0, 200),
            MarkerRecord::new("2", "src_c", 1.5, 300),
        ];
        let resolved = |name: &str, chrom: &str, pos: u64| MarkerResolution::Resolved {
            src: location(OLD_ASSEMBLY, chrom, pos, "A/G", None),
            dst: location(NEW_ASSEMBLY, chrom, pos + 1000, "A/G", None),
            name: name.to_string(),
        };
        let table = ResolutionTable::new(vec![
            resolved("OAR1_100", "1", 100),
            MarkerResolution::Filtered(FilterReason::NotFound),
            resolved("OAR2_300", "2", 300),
        ]);
        (markers, table)
    }

    #[test]
    fn test_map_lines_skip_filtered() {
        let (markers, table) = table();
        assert_eq!(
            map_lines(&markers, &table),
            vec!["1 OAR1_100 0 1100", "2 OAR2_300 1.5 1300"]
        );
    }

    #[test]
    fn test_finish_renames_partial_files() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("out").join("reconciled");
        let (markers, table) = table();

        let mut writer = PlinkWriter::create(&prefix).unwrap();
        let mut row = SampleRow::new("TEX", "UYOA-TEX-000000001", 2);
        row.set_allele_pair(0, ["A".to_string(), "G".to_string()]);
        writer.write_row(&row).unwrap();
        writer.write_map(&markers, &table).unwrap();

        assert!(with_suffix(&prefix, "ped.partial").exists());
        let output = writer.finish().unwrap();

        assert_eq!(output.n_markers, 2);
        assert_eq!(output.n_rows, 1);
        assert!(!with_suffix(&prefix, "ped.partial").exists());

        let ped = fs::read_to_string(&output.ped_path).unwrap();
        assert_eq!(ped, "TEX UYOA-TEX-000000001 0 0 0 -9 A G 0 0\n");
        let map = fs::read_to_string(&output.map_path).unwrap();
        assert_eq!(map.lines().count(), 2);
    }

    #[test]
    fn test_dropped_writer_leaves_nothing() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("failed");

        {
            let mut writer = PlinkWriter::create(&prefix).unwrap();
            writer.write_row(&SampleRow::new("TEX", "1", 1)).unwrap();
        }

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_map_rename_withdraws_ped() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("blocked");
        let (markers, table) = table();

        // a non-empty directory where the MAP should go
        let blocker = with_suffix(&prefix, "map");
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), "x").unwrap();

        let mut writer = PlinkWriter::create(&prefix).unwrap();
        writer.write_row(&SampleRow::new("TEX", "1", 3)).unwrap();
        writer.write_map(&markers, &table).unwrap();
        assert!(writer.finish().is_err());

        assert!(!with_suffix(&prefix, "ped").exists());
        assert!(!with_suffix(&prefix, "ped.partial").exists());
        assert!(!with_suffix(&prefix, "map.partial").exists());
        assert!(blocker.join("keep").exists());
    }

    #[test]
    fn test_finish_requires_map() {
        let dir = tempdir().unwrap();
        let writer = PlinkWriter::create(&dir.path().join("nomap")).unwrap();
        assert!(writer.finish().is_err());
    }

    #[test]
    fn test_summary_path() {
        assert_eq!(
            RunSummary::path_for(Path::new("/data/out")),
            PathBuf::from("/data/out.summary.json")
        );
    }
}

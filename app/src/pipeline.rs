// ==============================================================================
// pipeline.rs - Genotype Reconciliation Pipeline
// ==============================================================================
// Description: Reads a genotype source, resolves its markers and samples
//              against the stores and writes a reconciled PLINK dataset
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-10-15
// Version: 3.1.0
// ==============================================================================
// Steps: validate inputs, read markers, resolve coordinates, then for every
// row resolve identity and pedigree, convert alleles to TOP, drop filtered
// marker columns and write. The MAP is written last and both files are moved
// into place only when the whole run succeeded.
// ==============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::allele_coding::{affymetrix_call_to_top, is_half_missing, to_top, Coding, CodingError};
use crate::audit::{self, AuditEventType};
use crate::coordinates::{self, ResolutionTable, SearchKey};
use crate::identity::{IdentityResolver, SampleLookup};
use crate::models::{AssemblyRef, Dataset, SampleField, SampleRow, Sex, MISSING_ALLELE};
use crate::output::{PlinkWriter, RunCounts, RunSummary};
use crate::parsers::{FakePed, GenotypeSource};
use crate::reference_store::ReferenceStore;
use crate::sample_store::SampleStore;
use crate::validator::InputValidator;

/// Where the family id of every row comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyIds {
    /// The family id column of the source (a breed alias)
    Native,
    /// One breed code for every row
    BreedCode(String),
    /// The breed code of the already stored sample
    Lookup,
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub coding: Coding,
    pub src_assembly: AssemblyRef,
    /// Target assembly, the source assembly when unset
    pub dst_assembly: Option<AssemblyRef>,
    pub search: SearchKey,
    pub chip_name: Option<String>,
    pub family_ids: FamilyIds,
    pub create_samples: bool,
    pub sample_field: SampleField,
    /// Set genotypes outside the declared coding to missing instead of failing
    pub ignore_coding_errors: bool,
    /// Output prefix of the `.map`, `.ped` and `.summary.json` files
    pub output: PathBuf,
}

impl ReconcileOptions {
    pub fn new(coding: Coding, src_assembly: AssemblyRef, output: impl Into<PathBuf>) -> Self {
        Self {
            coding,
            src_assembly,
            dst_assembly: None,
            search: SearchKey::Name,
            chip_name: None,
            family_ids: FamilyIds::Native,
            create_samples: false,
            sample_field: SampleField::OriginalId,
            ignore_coding_errors: false,
            output: output.into(),
        }
    }

    fn dst_assembly(&self) -> &AssemblyRef {
        self.dst_assembly.as_ref().unwrap_or(&self.src_assembly)
    }
}

pub struct Reconciler<'a> {
    reference: &'a ReferenceStore,
    samples: Option<(&'a SampleStore, &'a Dataset)>,
    options: ReconcileOptions,
    validator: InputValidator,
}

impl<'a> Reconciler<'a> {
    /// A reconciler without a dataset only converts coordinates and alleles;
    /// rows keep their own ids
    pub fn new(reference: &'a ReferenceStore, options: ReconcileOptions) -> Self {
        Self {
            reference,
            samples: None,
            options,
            validator: InputValidator::new(),
        }
    }

    /// Resolve samples, breeds and pedigree within `dataset`
    pub fn with_dataset(mut self, store: &'a SampleStore, dataset: &'a Dataset) -> Self {
        self.samples = Some((store, dataset));
        self
    }

    /// Main reconciliation pipeline
    pub fn run(&self, source: &mut dyn GenotypeSource) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        info!("Starting reconciliation run {} of {}", run_id, source.describe());
        info!(
            "Coding: {}, assemblies: {} -> {}",
            self.options.coding,
            self.options.src_assembly,
            self.options.dst_assembly()
        );

        self.audit(
            AuditEventType::RunStarted,
            run_id,
            self.dataset_file(),
            json!({
                "source": source.describe(),
                "coding": self.options.coding,
                "output": self.options.output,
            }),
        )?;

        match self.execute(source, run_id, started_at) {
            Ok(summary) => {
                self.audit(
                    AuditEventType::RunCompleted,
                    run_id,
                    self.dataset_file(),
                    json!({ "counts": summary.counts }),
                )?;
                Ok(summary)
            }
            Err(e) => {
                error!("Reconciliation run {} failed: {:#}", run_id, e);
                let logged = self.audit(
                    AuditEventType::RunFailed,
                    run_id,
                    self.dataset_file(),
                    json!({ "error": format!("{:#}", e) }),
                );
                if let Err(audit_error) = logged {
                    warn!("Couldn't record failure of run {}: {:#}", run_id, audit_error);
                }
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        source: &mut dyn GenotypeSource,
        run_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<RunSummary> {
        let options = &self.options;
        let mut counts = RunCounts::default();

        // 1. Validate input files
        let inputs = self
            .validator
            .validate_all(&source.input_paths())
            .context("Input validation failed")?;

        // 2. Load markers
        counts.markers = source
            .read_markers()
            .with_context(|| format!("Failed to read markers of {}", source.describe()))?;

        // 3. Resolve coordinates
        let table = coordinates::resolve(
            self.reference,
            source.markers(),
            &options.src_assembly,
            options.dst_assembly.as_ref(),
            options.search,
            options.chip_name.as_deref(),
        )
        .context("Failed to resolve marker coordinates")?;

        if table.is_empty() {
            warn!("No markers found in {}", source.describe());
        }

        counts.markers_resolved = table.n_resolved();
        counts.markers_filtered = table.n_filtered();
        let filtered = table.filtered_indices();
        let ab_calls: Vec<bool> = (0..table.len()).map(|idx| source.is_ab_call(idx)).collect();

        // 4. Process rows
        let fake_ped = self.fake_ped()?;
        let by_code = fake_ped.is_some();
        let mut resolver = self
            .samples
            .map(|(store, dataset)| IdentityResolver::new(store, dataset, options.sample_field));

        let mut writer = PlinkWriter::create(&options.output)?;

        let rows = source
            .stream_rows(fake_ped.as_ref())
            .with_context(|| format!("Failed to read samples of {}", source.describe()))?;

        for row in rows {
            let mut row = row.context("Failed to read sample row")?;
            counts.rows_read += 1;

            if let Some(resolver) = resolver.as_mut() {
                let kept = self
                    .reconcile_identity(resolver, &mut row, by_code, run_id, &mut counts)
                    .with_context(|| format!("Failed to resolve identity of row {}", row.head()))?;
                if !kept {
                    counts.rows_skipped += 1;
                    continue;
                }
            }

            self.transcode(&mut row, &table, &ab_calls, &mut counts)?;
            row.strip_markers(&filtered);

            writer.write_row(&row)?;
            counts.rows_written += 1;

            if counts.rows_written % 1000 == 0 {
                info!("Processed {} samples", counts.rows_written);
            }
        }

        // 5. Write MAP and move outputs into place
        writer.write_map(source.markers(), &table)?;
        let output = writer.finish()?;

        info!(
            "Reconciliation complete: {} rows written, {} skipped, {} markers filtered",
            counts.rows_written, counts.rows_skipped, counts.markers_filtered
        );

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            source: source.describe(),
            inputs,
            dataset: self.dataset_file(),
            coding: options.coding,
            src_assembly: options.src_assembly.clone(),
            dst_assembly: options.dst_assembly().clone(),
            counts,
            output,
        };
        summary.write(&RunSummary::path_for(&options.output))?;

        Ok(summary)
    }

    fn fake_ped(&self) -> Result<Option<FakePed<'a>>> {
        match &self.options.family_ids {
            FamilyIds::Native => Ok(None),
            FamilyIds::BreedCode(code) => Ok(Some(FakePed::Breed(code.clone()))),
            FamilyIds::Lookup => {
                let (store, dataset) = self
                    .samples
                    .context("Looking up family ids requires a dataset")?;
                Ok(Some(FakePed::Lookup {
                    store,
                    dataset,
                    field: self.options.sample_field,
                }))
            }
        }
    }

    /// Replace the ids of a row with the stored ones
    ///
    /// Returns `false` when the row has no stored sample and samples are not
    /// created.
    fn reconcile_identity(
        &self,
        resolver: &mut IdentityResolver<'a>,
        row: &mut SampleRow,
        by_code: bool,
        run_id: Uuid,
        counts: &mut RunCounts,
    ) -> Result<bool> {
        let breed = resolver.resolve_breed(&row.fid, by_code)?;

        let lookup = resolver.get_or_create_sample(row, &breed, self.options.create_samples)?;
        let mut sample = match lookup {
            SampleLookup::Found(sample) => sample,
            SampleLookup::Created(sample) => {
                counts.samples_created += 1;
                self.audit(
                    AuditEventType::SampleCreated,
                    run_id,
                    Some(sample.xref_id.clone()),
                    json!({
                        "original_id": sample.original_id,
                        "breed": sample.breed_code,
                        "dataset": resolver.dataset().file,
                    }),
                )?;
                sample
            }
            SampleLookup::Missing => {
                warn!("Couldn't find sample in database, skipping row {}", row.head());
                self.audit(
                    AuditEventType::RowSkipped,
                    run_id,
                    None,
                    json!({ "row": row.head(), "breed": breed.code }),
                )?;
                return Ok(false);
            }
        };

        match sample.sex {
            Some(Sex::Unknown) | None => {}
            Some(sex) => {
                if Sex::from_code(&row.sex) != sex {
                    debug!(
                        "Sex of {} differs from the database: using {:?}",
                        sample.xref_id, sex
                    );
                    row.sex = sex.code().to_string();
                }
            }
        }

        let parents = resolver.resolve_parents(&mut sample, row)?;
        if parents.updated {
            counts.pedigree_updates += 1;
            self.audit(
                AuditEventType::PedigreeUpdated,
                run_id,
                Some(sample.xref_id.clone()),
                json!({
                    "father": parents.father.as_ref().map(|s| &s.xref_id),
                    "mother": parents.mother.as_ref().map(|s| &s.xref_id),
                }),
            )?;
        }

        row.fid = breed.code;
        row.father = parents.father_xref().to_string();
        row.mother = parents.mother_xref().to_string();
        row.iid = sample.xref_id;

        Ok(true)
    }

    /// Convert every resolved genotype of a row to TOP coding
    ///
    /// Markers flagged in `ab_calls` hold raw Affymetrix call letters and
    /// are converted through the affymetrix alleles of their location,
    /// whatever the run coding. Without those alleles they become missing.
    fn transcode(
        &self,
        row: &mut SampleRow,
        table: &ResolutionTable,
        ab_calls: &[bool],
        counts: &mut RunCounts,
    ) -> Result<()> {
        for (idx, src, _, name) in table.resolved() {
            let genotype = row.allele_pair(idx);
            if is_half_missing(genotype) {
                counts.half_missing += 1;
            }

            let converted = if ab_calls.get(idx).copied().unwrap_or(false) {
                match affymetrix_call_to_top(genotype, src, name) {
                    Err(CodingError::MissingRepresentation { .. }) => {
                        warn!(
                            "Marker '{}' has no affymetrix alleles for call {:?}: setting it to missing",
                            name, genotype
                        );
                        counts.ab_calls_unresolved += 1;
                        Ok([MISSING_ALLELE.to_string(), MISSING_ALLELE.to_string()])
                    }
                    other => other,
                }
            } else {
                to_top(genotype, self.options.coding, src, name)
            };

            let top = match converted {
                Ok(top) => top,
                Err(e @ CodingError::NotInCoding { .. }) if self.options.ignore_coding_errors => {
                    warn!("{}: setting it to missing", e);
                    counts.coding_errors_ignored += 1;
                    [MISSING_ALLELE.to_string(), MISSING_ALLELE.to_string()]
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to convert genotypes of '{}'", row.iid))
                }
            };

            row.set_allele_pair(idx, top);
        }

        Ok(())
    }

    fn dataset_file(&self) -> Option<String> {
        self.samples.map(|(_, dataset)| dataset.file.clone())
    }

    /// Record an audit event when a sample store is attached
    fn audit(
        &self,
        event_type: AuditEventType,
        run_id: Uuid,
        resource: Option<String>,
        details: serde_json::Value,
    ) -> Result<()> {
        if let Some((store, _)) = self.samples {
            audit::log_event(store.connection(), event_type, run_id, resource, details)
                .context("Failed to write audit event")?;
        }
        Ok(())
    }
}
